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

//! Helpers shared across test modules.

use std::{
    f64::consts::TAU,
    thread,
    time::{Duration, SystemTime},
};

use crate::graph::{Mixer, SampleBuffer};

/// Wait for the given predicate to return true or fail.
#[inline]
pub fn eventually<F>(predicate: F, error_msg: &str)
where
    F: Fn() -> bool,
{
    let start = SystemTime::now();
    let mut tick = Duration::from_millis(5);
    let timeout = Duration::from_secs(10);
    let max_tick = Duration::from_millis(100);

    loop {
        let elapsed = start.elapsed().expect("System time error");
        if elapsed > timeout {
            panic!("{}", error_msg);
        }
        if predicate() {
            return;
        }

        thread::sleep(tick);
        tick = std::cmp::min(tick * 2, max_tick);
    }
}

/// A plucked-string-like signal: a 440 Hz tone decaying exponentially from
/// full scale.
pub fn decaying_pluck(sample_rate: u32, duration_secs: f64) -> SampleBuffer {
    let frames = (sample_rate as f64 * duration_secs) as usize;
    let data = (0..frames)
        .map(|i| {
            let t = i as f64 / sample_rate as f64;
            ((TAU * 440.0 * t).sin() * (-3.0 * t).exp()) as f32
        })
        .collect();
    SampleBuffer { data, sample_rate }
}

/// A bowed-string-like signal: a loud 100 ms onset settling into a steady
/// 440 Hz tone. Long enough renditions have a clean loopable region.
pub fn sustained_tone(sample_rate: u32, duration_secs: f64) -> SampleBuffer {
    let frames = (sample_rate as f64 * duration_secs) as usize;
    let data = (0..frames)
        .map(|i| {
            let t = i as f64 / sample_rate as f64;
            let amplitude = if t < 0.1 { 1.0 - 7.0 * t } else { 0.3 };
            ((TAU * 440.0 * t).sin() * amplitude) as f32
        })
        .collect();
    SampleBuffer { data, sample_rate }
}

/// Renders the given number of frames from the mixer in audio-callback-sized
/// blocks and returns the interleaved stereo output.
pub fn pump_frames(mixer: &Mixer, frames: usize) -> Vec<f32> {
    const BLOCK_FRAMES: usize = 256;

    let mut rendered = Vec::with_capacity(frames * 2);
    let mut remaining = frames;
    let mut block = vec![0.0f32; BLOCK_FRAMES * 2];
    while remaining > 0 {
        let this_block = remaining.min(BLOCK_FRAMES);
        let out = &mut block[..this_block * 2];
        mixer.fill(out);
        rendered.extend_from_slice(out);
        remaining -= this_block;
    }
    rendered
}
