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
use std::{
    error::Error,
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use tracing::{info, span, Level};

use crate::graph::Mixer;
use crate::playsync::CancelHandle;

/// A mock device. Pulls the mixer at roughly real-time pace without any
/// actual audio hardware.
#[derive(Clone)]
pub struct Device {
    name: String,
    sample_rate: u32,
    is_playing: Arc<AtomicBool>,
    frames_rendered: Arc<AtomicU64>,
}

impl Device {
    /// Gets the given mock device.
    pub fn get(name: &str, sample_rate: u32) -> Device {
        Device {
            name: name.to_string(),
            sample_rate,
            is_playing: Arc::new(AtomicBool::new(false)),
            frames_rendered: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Returns true if the device is currently rendering.
    #[cfg(test)]
    pub fn is_playing(&self) -> bool {
        self.is_playing.load(Ordering::Relaxed)
    }

    /// The number of frames pulled from the mixer so far.
    #[cfg(test)]
    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered.load(Ordering::Relaxed)
    }
}

impl crate::audio::Device for Device {
    fn run(&self, mixer: Arc<Mixer>, cancel_handle: CancelHandle) -> Result<(), Box<dyn Error>> {
        let span = span!(Level::INFO, "run output (mock)");
        let _enter = span.enter();

        info!(device = self.name, "Starting mock output.");
        self.is_playing.store(true, Ordering::Relaxed);

        let block_secs = super::BUFFER_SIZE as f64 / self.sample_rate as f64;
        let join_handle = {
            let cancel_handle = cancel_handle.clone();
            let frames_rendered = self.frames_rendered.clone();
            thread::spawn(move || {
                let mut block = vec![0.0f32; super::BUFFER_SIZE * 2];
                while !cancel_handle.is_cancelled() {
                    mixer.fill(&mut block);
                    frames_rendered.fetch_add(super::BUFFER_SIZE as u64, Ordering::Relaxed);
                    thread::sleep(Duration::from_secs_f64(block_secs));
                }
            })
        };

        cancel_handle.wait();
        let join_result = join_handle.join();
        self.is_playing.store(false, Ordering::Relaxed);

        if join_result.is_err() {
            return Err("Error while joining thread!".into());
        }

        Ok(())
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (Mock)", self.name)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::audio::Device as _;
    use crate::testutil::eventually;

    #[test]
    fn test_mock_device_pulls_mixer_until_cancelled() {
        let device = Device::get("mock", 44100);
        let (mixer, _sender) = Mixer::new(44100);
        let cancel_handle = CancelHandle::new();

        let join = {
            let device = device.clone();
            let cancel_handle = cancel_handle.clone();
            thread::spawn(move || {
                device
                    .run(mixer.clone(), cancel_handle)
                    .map_err(|e| e.to_string())
            })
        };

        eventually(|| device.frames_rendered() > 0, "mixer never pulled");
        assert!(device.is_playing());

        cancel_handle.cancel();
        assert!(join.join().expect("join").is_ok());
        assert!(!device.is_playing());
    }

    #[test]
    fn test_get_device_dispatches_mock() {
        let device = crate::audio::get_device("mock-device", 48000).expect("device");
        assert_eq!(device.sample_rate(), 48000);
        assert_eq!(format!("{}", device), "mock-device (Mock)");
    }
}
