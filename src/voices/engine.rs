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
use std::collections::HashMap;
use std::sync::{atomic::AtomicU64, Arc};

use parking_lot::RwLock;
use tracing::{debug, error, warn};

use crate::graph::{
    next_source_id, BufferSource, Compressor, LoopRegion, Mixer, OnePole, Param, SampleBuffer,
    SourceSender,
};
use crate::playsync::CancelHandle;
use crate::store::{SampleStore, StoreError, TimbreMode};

use super::sustain::{self, LoopPoints};
use super::voice::{SourceHandle, Voice, VoiceKind};
use super::{VoiceId, VoiceState};

/// Release fade for simple voices.
const RELEASE_FADE_SECS: f64 = 0.12;

/// Release fade for the attack half of a sustain pair.
const SUSTAIN_ATTACK_RELEASE_SECS: f64 = 0.08;

/// Release fade for the looped tail. Longer than the attack fade so the tail
/// carries the decay.
const SUSTAIN_LOOP_RELEASE_SECS: f64 = 0.15;

/// Extra time a source lives past the end of its release fade.
const STOP_MARGIN_SECS: f64 = 0.05;

/// Fade used when voices are cut rather than released. Just long enough to
/// avoid a click.
const CUT_FADE_SECS: f64 = 0.015;

/// Exponential release ramps target this instead of zero, which a geometric
/// ramp can never reach.
const GAIN_FLOOR: f32 = 1e-4;

const COMPRESSOR_THRESHOLD: f32 = 0.8;
const COMPRESSOR_RATIO: f32 = 4.0;

/// Maps velocity to linear gain, capped at unity.
pub(crate) fn velocity_to_gain(velocity: u8, volume: f32) -> f32 {
    (velocity as f32 / 127.0 * volume).min(1.0)
}

/// Maps velocity to a lowpass cutoff, 500 Hz at velocity 1 rising
/// geometrically to 16 kHz at velocity 127.
pub(crate) fn velocity_to_cutoff(velocity: u8) -> f32 {
    let velocity = velocity.clamp(1, 127);
    500.0 * (16000.0f32 / 500.0).powf((velocity - 1) as f32 / 126.0)
}

/// Reports a key's logical state changes to a UI or test observer.
pub type StateCallback = Box<dyn Fn(&str, u8, VoiceState) + Send + Sync>;

/// The tunable settings of one keyboard.
#[derive(Clone)]
pub struct KeyboardSettings {
    pub timbre: String,
    /// Linear volume, clamped to [0, 2].
    pub volume: f32,
    /// Whether held notes sustain (only effective for sustain-mode timbres).
    pub sustain: bool,
}

struct KeyboardState {
    settings: KeyboardSettings,
    voices: HashMap<u8, Voice>,
}

/// Starts, crossfades, and releases voices for any number of keyboards.
pub struct VoiceEngine {
    store: Arc<SampleStore>,
    mixer: Arc<Mixer>,
    source_tx: SourceSender,
    keyboards: RwLock<HashMap<String, KeyboardState>>,
    on_state: RwLock<Option<StateCallback>>,
    /// Sources start this many frames ahead of the mixer clock so channel
    /// delivery always beats the audio callback.
    fixed_delay_frames: u64,
}

impl VoiceEngine {
    pub fn new(
        store: Arc<SampleStore>,
        mixer: Arc<Mixer>,
        source_tx: SourceSender,
        buffer_size: usize,
    ) -> VoiceEngine {
        VoiceEngine {
            store,
            mixer,
            source_tx,
            keyboards: RwLock::new(HashMap::new()),
            on_state: RwLock::new(None),
            fixed_delay_frames: buffer_size as u64,
        }
    }

    /// Registers a keyboard. Replaces any keyboard with the same name.
    pub fn add_keyboard(&self, name: &str, mut settings: KeyboardSettings) {
        settings.volume = settings.volume.clamp(0.0, 2.0);
        let mut keyboards = self.keyboards.write();
        if let Some(old) = keyboards.insert(
            name.to_string(),
            KeyboardState {
                settings,
                voices: HashMap::new(),
            },
        ) {
            for voice in old.voices.values() {
                voice.cancel();
            }
        }
    }

    /// Removes a keyboard, hard-stopping anything it was playing.
    pub fn remove_keyboard(&self, name: &str) {
        if let Some(state) = self.keyboards.write().remove(name) {
            for voice in state.voices.values() {
                voice.cancel();
            }
        }
    }

    /// Switches a keyboard to a different registered timbre. Sounding voices
    /// are released since their buffers belong to the old timbre.
    pub fn set_timbre(&self, keyboard: &str, timbre: &str) -> Result<(), StoreError> {
        self.store.mode(timbre)?;
        let voices = {
            let mut keyboards = self.keyboards.write();
            let Some(state) = keyboards.get_mut(keyboard) else {
                return Ok(());
            };
            state.settings.timbre = timbre.to_string();
            std::mem::take(&mut state.voices)
        };
        for (note, voice) in voices {
            self.release_entry(voice);
            self.emit(keyboard, note, VoiceState::Silent);
        }
        Ok(())
    }

    /// Sets a keyboard's volume. Affects subsequent triggers only.
    pub fn set_volume(&self, keyboard: &str, volume: f32) {
        let mut keyboards = self.keyboards.write();
        if let Some(state) = keyboards.get_mut(keyboard) {
            state.settings.volume = volume.clamp(0.0, 2.0);
        }
    }

    /// Toggles a keyboard's sustain flag. Affects subsequent triggers only.
    pub fn set_sustain(&self, keyboard: &str, sustain: bool) {
        let mut keyboards = self.keyboards.write();
        if let Some(state) = keyboards.get_mut(keyboard) {
            state.settings.sustain = sustain;
        }
    }

    pub fn settings(&self, keyboard: &str) -> Option<KeyboardSettings> {
        self.keyboards
            .read()
            .get(keyboard)
            .map(|state| state.settings.clone())
    }

    /// Installs the voice state callback, replacing any previous one.
    pub fn set_on_voice_state(&self, callback: StateCallback) {
        *self.on_state.write() = Some(callback);
    }

    /// The number of voices a keyboard currently tracks.
    pub fn active_voice_count(&self, keyboard: &str) -> usize {
        self.keyboards
            .read()
            .get(keyboard)
            .map(|state| state.voices.len())
            .unwrap_or(0)
    }

    /// Starts a voice. Returns the voice's id, or None when the keyboard is
    /// unknown or the timbre has no sample for the note (the key still
    /// reports [`VoiceState::SoundingWithoutSample`] in the latter case).
    pub fn trigger(&self, keyboard: &str, note: u8, velocity: u8) -> Option<VoiceId> {
        let mut keyboards = self.keyboards.write();
        let Some(state) = keyboards.get_mut(keyboard) else {
            warn!(keyboard, "Trigger for unknown keyboard.");
            return None;
        };
        let settings = state.settings.clone();
        let start_at = self.mixer.current_frame() + self.fixed_delay_frames;

        // Retrigger cut: the old voice stops exactly when the new one starts.
        if let Some(old) = state.voices.remove(&note) {
            for handle in old.handles() {
                handle.stop_no_later_than(start_at);
            }
        }

        let buffer = match self.store.buffer(&settings.timbre, note) {
            Some(buffer) => buffer,
            None => {
                drop(keyboards);
                debug!(keyboard, note, timbre = %settings.timbre, "No sample for note.");
                self.emit(keyboard, note, VoiceState::SoundingWithoutSample);
                return None;
            }
        };

        let gain = velocity_to_gain(velocity, settings.volume);
        let cutoff = velocity_to_cutoff(velocity);
        let rate = sustain::pitch_jitter();
        let sustained = settings.sustain
            && self.store.mode(&settings.timbre) == Ok(TimbreMode::Sustain);

        let kind = if sustained {
            let points = sustain::analyze(&buffer);
            if points.looped {
                self.build_sustain_pair(buffer, gain, cutoff, rate, start_at, &points)
            } else {
                self.build_simple(buffer, gain, cutoff, rate, start_at)
            }
        } else {
            self.build_simple(buffer, gain, cutoff, rate, start_at)
        };

        let id = VoiceId::next();
        state.voices.insert(note, Voice { id, kind });
        drop(keyboards);

        self.emit(keyboard, note, VoiceState::SoundingWithSample);
        debug!(keyboard, note, velocity, gain, cutoff, "Voice triggered.");
        Some(id)
    }

    /// Releases whatever voice currently occupies the key.
    pub fn release(&self, keyboard: &str, note: u8) {
        let voice = {
            let mut keyboards = self.keyboards.write();
            match keyboards.get_mut(keyboard) {
                Some(state) => state.voices.remove(&note),
                None => return,
            }
        };
        if let Some(voice) = voice {
            self.release_entry(voice);
        }
        // Keys sounding without a sample have no voice entry but still need
        // their state cleared.
        self.emit(keyboard, note, VoiceState::Silent);
    }

    /// Releases the key only if the given voice still occupies it. A stale
    /// id (the key was retriggered since) is a no-op.
    pub fn release_voice(&self, keyboard: &str, note: u8, id: VoiceId) {
        let voice = {
            let mut keyboards = self.keyboards.write();
            let Some(state) = keyboards.get_mut(keyboard) else {
                return;
            };
            match state.voices.get(&note) {
                Some(voice) if voice.id == id => state.voices.remove(&note),
                Some(_) => {
                    debug!(keyboard, note, "Stale release ignored.");
                    return;
                }
                None => return,
            }
        };
        if let Some(voice) = voice {
            self.release_entry(voice);
            self.emit(keyboard, note, VoiceState::Silent);
        }
    }

    /// Force-releases every sounding voice on a keyboard. The fade is only a
    /// declick, so the keyboard falls silent almost immediately; pause, stop,
    /// and seek cut voices this way instead of letting them ring out.
    pub fn cut_sounding(&self, keyboard: &str) {
        let voices = {
            let mut keyboards = self.keyboards.write();
            match keyboards.get_mut(keyboard) {
                Some(state) => std::mem::take(&mut state.voices),
                None => return,
            }
        };
        let now = self.mixer.current_frame();
        for (note, voice) in voices {
            for handle in voice.handles() {
                self.fade_out(handle, now, CUT_FADE_SECS);
            }
            self.emit(keyboard, note, VoiceState::Silent);
        }
    }

    /// Hard-stops every voice on a keyboard.
    pub fn release_all(&self, keyboard: &str) {
        let voices = {
            let mut keyboards = self.keyboards.write();
            match keyboards.get_mut(keyboard) {
                Some(state) => std::mem::take(&mut state.voices),
                None => return,
            }
        };
        let stopped = voices.len();
        for (note, voice) in voices {
            voice.cancel();
            self.emit(keyboard, note, VoiceState::Silent);
        }
        if stopped > 0 {
            debug!(keyboard, stopped, "All voices stopped.");
        }
    }

    fn emit(&self, keyboard: &str, note: u8, state: VoiceState) {
        let callback = self.on_state.read();
        if let Some(callback) = callback.as_ref() {
            callback(keyboard, note, state);
        }
    }

    fn release_entry(&self, voice: Voice) {
        let now = self.mixer.current_frame();
        match &voice.kind {
            VoiceKind::Simple(handle) => self.fade_out(handle, now, RELEASE_FADE_SECS),
            VoiceKind::Sustain { attack, loop_tail } => {
                self.fade_out(attack, now, SUSTAIN_ATTACK_RELEASE_SECS);
                self.fade_out(loop_tail, now, SUSTAIN_LOOP_RELEASE_SECS);
            }
        }
    }

    /// Fades a source out exponentially from wherever its gain is now, then
    /// schedules its removal.
    fn fade_out(&self, handle: &SourceHandle, now: u64, fade_secs: f64) {
        let held = handle.gain.cancel_and_hold(now);
        let fade_end = now + self.mixer.frames(fade_secs);
        if held > GAIN_FLOOR {
            handle.gain.exponential_ramp_to(GAIN_FLOOR, fade_end);
        } else {
            handle.gain.set_value_at(0.0, now);
        }
        handle.stop_no_later_than(fade_end + self.mixer.frames(STOP_MARGIN_SECS));
    }

    fn build_simple(
        &self,
        buffer: Arc<SampleBuffer>,
        gain: f32,
        cutoff: f32,
        rate: f64,
        start_at: u64,
    ) -> VoiceKind {
        let gain_param = Param::new(gain);
        let stop_at = Arc::new(AtomicU64::new(0));
        let cancel_handle = CancelHandle::new();
        self.send_source(BufferSource::new(
            next_source_id(),
            buffer,
            0.0,
            rate,
            None,
            start_at,
            stop_at.clone(),
            gain_param.clone(),
            Some(OnePole::new(cutoff, self.mixer.sample_rate())),
            None,
            cancel_handle.clone(),
        ));
        VoiceKind::Simple(SourceHandle {
            gain: gain_param,
            stop_at,
            cancel_handle,
        })
    }

    /// Builds the attack source plus the looping tail it crossfades into.
    fn build_sustain_pair(
        &self,
        buffer: Arc<SampleBuffer>,
        gain: f32,
        cutoff: f32,
        rate: f64,
        start_at: u64,
        points: &LoopPoints,
    ) -> VoiceKind {
        let sample_rate = self.mixer.sample_rate();
        let crossfade_at = start_at + points.loop_start as u64;
        let crossfade_frames = self.mixer.frames(sustain::CROSSFADE_SECS);
        let (fade_out, fade_in) = sustain::equal_power_curves(gain);

        // The attack plays the whole natural onset, fades across the loop
        // entry, and is dropped shortly after the fade lands.
        let attack_gain = Param::new(gain);
        attack_gain.set_curve_at(fade_out, crossfade_at, crossfade_frames);
        let attack_stop = Arc::new(AtomicU64::new(
            crossfade_at + crossfade_frames + self.mixer.frames(STOP_MARGIN_SECS),
        ));
        let attack_cancel = CancelHandle::new();
        self.send_source(BufferSource::new(
            next_source_id(),
            buffer.clone(),
            0.0,
            rate,
            None,
            start_at,
            attack_stop.clone(),
            attack_gain.clone(),
            Some(OnePole::new(cutoff, sample_rate)),
            Some(Compressor::new(COMPRESSOR_THRESHOLD, COMPRESSOR_RATIO)),
            attack_cancel.clone(),
        ));

        // The tail gets its own jitter draw so the pair never phase-locks.
        let tail_rate = sustain::pitch_jitter();

        // The tail starts slightly early at the matching buffer position so
        // its filter state has settled before it becomes audible.
        let tail_start = crossfade_at
            .saturating_sub(self.mixer.frames(sustain::LOOP_LEAD_SECS))
            .max(start_at);
        let tail_offset = (tail_start - start_at) as f64 * tail_rate;
        let tail_gain = Param::new(0.0);
        tail_gain.set_curve_at(fade_in, crossfade_at, crossfade_frames);
        let tail_stop = Arc::new(AtomicU64::new(0));
        let tail_cancel = CancelHandle::new();
        self.send_source(BufferSource::new(
            next_source_id(),
            buffer,
            tail_offset,
            tail_rate,
            Some(LoopRegion {
                start: points.loop_start,
                end: points.loop_end,
            }),
            tail_start,
            tail_stop.clone(),
            tail_gain.clone(),
            Some(OnePole::new(cutoff, sample_rate)),
            Some(Compressor::new(COMPRESSOR_THRESHOLD, COMPRESSOR_RATIO)),
            tail_cancel.clone(),
        ));

        VoiceKind::Sustain {
            attack: SourceHandle {
                gain: attack_gain,
                stop_at: attack_stop,
                cancel_handle: attack_cancel,
            },
            loop_tail: SourceHandle {
                gain: tail_gain,
                stop_at: tail_stop,
                cancel_handle: tail_cancel,
            },
        }
    }

    fn send_source(&self, source: BufferSource) {
        if let Err(e) = self.source_tx.send(source) {
            error!(error = %e, "Failed to send source to mixer.");
        }
    }
}
