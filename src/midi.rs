// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::{error::Error, fmt, sync::Arc};

use crossbeam_channel::Sender;
use midly::{live::LiveEvent, MidiMessage};
use tracing::debug;

use crate::notes;
use crate::voices::VoiceEngine;

mod midir;
mod mock;

/// A MIDI input device the live keyboard listens to.
pub trait Device: fmt::Display + std::marker::Send + std::marker::Sync {
    /// Returns the name of the device.
    fn name(&self) -> String;

    /// Watches MIDI input for events and sends them to the given sender.
    fn watch_events(&self, sender: Sender<Vec<u8>>) -> Result<(), Box<dyn Error>>;

    /// Stops watching events.
    fn stop_watch_events(&self);
}

/// Lists devices known to midir.
pub fn list_devices() -> Result<Vec<Box<dyn Device>>, Box<dyn Error>> {
    midir::list()
}

/// Gets a device with the given name.
pub fn get_device(name: &str) -> Result<Arc<dyn Device>, Box<dyn Error>> {
    if name.starts_with("mock") {
        return Ok(Arc::new(mock::Device::get(name)));
    };

    Ok(Arc::new(midir::get(name)?))
}

/// Routes a raw MIDI event to a keyboard. Note-on with velocity zero counts
/// as note-off, and keys outside the 88-key range are ignored.
pub fn route_event(raw: &[u8], engine: &VoiceEngine, keyboard: &str) {
    let Ok(event) = LiveEvent::parse(raw) else {
        debug!("Ignoring unparseable MIDI event.");
        return;
    };
    let LiveEvent::Midi { message, .. } = event else {
        return;
    };

    match message {
        MidiMessage::NoteOn { key, vel } if vel.as_int() > 0 => {
            let key = key.as_int();
            if (notes::NOTE_MIN..=notes::NOTE_MAX).contains(&key) {
                engine.trigger(keyboard, key, vel.as_int());
            }
        }
        MidiMessage::NoteOn { key, .. } | MidiMessage::NoteOff { key, .. } => {
            let key = key.as_int();
            if (notes::NOTE_MIN..=notes::NOTE_MAX).contains(&key) {
                engine.release(keyboard, key);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
pub mod test {
    pub use super::mock::Device;
}

#[cfg(test)]
mod route_test {
    use std::collections::HashMap;
    use std::sync::Arc;

    use super::*;
    use crate::graph::Mixer;
    use crate::store::{SampleStore, TimbreMode};
    use crate::testutil;
    use crate::voices::KeyboardSettings;

    fn engine() -> Arc<VoiceEngine> {
        let store = Arc::new(SampleStore::new(44100));
        let mut buffers = HashMap::new();
        buffers.insert(60u8, Arc::new(testutil::decaying_pluck(44100, 1.0)));
        store.insert_timbre_for_test("piano", TimbreMode::Simple, buffers);

        let (mixer, source_tx) = Mixer::new(44100);
        let engine = Arc::new(VoiceEngine::new(store, mixer, source_tx, 256));
        engine.add_keyboard(
            "main",
            KeyboardSettings {
                timbre: "piano".to_string(),
                volume: 1.0,
                sustain: false,
            },
        );
        engine
    }

    fn note_on(key: u8, vel: u8) -> Vec<u8> {
        vec![0x90, key, vel]
    }

    fn note_off(key: u8) -> Vec<u8> {
        vec![0x80, key, 0]
    }

    #[test]
    fn test_note_on_triggers_and_note_off_releases() {
        let engine = engine();

        route_event(&note_on(60, 100), &engine, "main");
        assert_eq!(engine.active_voice_count("main"), 1);

        route_event(&note_off(60), &engine, "main");
        assert_eq!(engine.active_voice_count("main"), 0);
    }

    #[test]
    fn test_note_on_velocity_zero_releases() {
        let engine = engine();

        route_event(&note_on(60, 100), &engine, "main");
        route_event(&note_on(60, 0), &engine, "main");
        assert_eq!(engine.active_voice_count("main"), 0);
    }

    #[test]
    fn test_out_of_range_keys_ignored() {
        let engine = engine();

        route_event(&note_on(10, 100), &engine, "main");
        route_event(&note_on(120, 100), &engine, "main");
        assert_eq!(engine.active_voice_count("main"), 0);
    }

    #[test]
    fn test_garbage_is_ignored() {
        let engine = engine();
        route_event(&[0xff], &engine, "main");
        route_event(&[], &engine, "main");
        assert_eq!(engine.active_voice_count("main"), 0);
    }
}
