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
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use crate::playsync::CancelHandle;

use super::{Compressor, OnePole, Param};

static NEXT_SOURCE_ID: AtomicU64 = AtomicU64::new(1);

/// Allocates a process-unique source ID.
pub fn next_source_id() -> u64 {
    NEXT_SOURCE_ID.fetch_add(1, Ordering::Relaxed)
}

/// A decoded mono sample, already resampled to the engine rate.
pub struct SampleBuffer {
    pub data: Vec<f32>,
    pub sample_rate: u32,
}

impl SampleBuffer {
    /// The buffer duration in seconds.
    pub fn duration_secs(&self) -> f64 {
        self.data.len() as f64 / self.sample_rate as f64
    }
}

/// A loop region in frames. The end is exclusive; playback wraps back to the
/// start whenever the position crosses it.
#[derive(Clone, Copy)]
pub struct LoopRegion {
    pub start: usize,
    pub end: usize,
}

/// A playing instance of a sample buffer.
///
/// Rendering applies, in order: linear-interpolated buffer read at the
/// playback rate, the optional lowpass, the gain automation, the optional
/// compressor. A source is dropped by the mixer once it reports None.
pub struct BufferSource {
    pub id: u64,
    buffer: Arc<SampleBuffer>,
    /// Read position in frames. Fractional because of the playback rate.
    position: f64,
    rate: f64,
    loop_region: Option<LoopRegion>,
    /// First frame at which the source is audible.
    start_at: u64,
    /// Frame at which the source is dropped. Zero means no stop scheduled.
    /// Shared so the voice engine can schedule a stop after the fact.
    stop_at: Arc<AtomicU64>,
    pub gain: Param,
    filter: Option<OnePole>,
    compressor: Option<Compressor>,
    cancel_handle: CancelHandle,
}

impl BufferSource {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: u64,
        buffer: Arc<SampleBuffer>,
        offset_frames: f64,
        rate: f64,
        loop_region: Option<LoopRegion>,
        start_at: u64,
        stop_at: Arc<AtomicU64>,
        gain: Param,
        filter: Option<OnePole>,
        compressor: Option<Compressor>,
        cancel_handle: CancelHandle,
    ) -> BufferSource {
        BufferSource {
            id,
            buffer,
            position: offset_frames,
            rate,
            loop_region,
            start_at,
            stop_at,
            gain,
            filter,
            compressor,
            cancel_handle,
        }
    }

    /// The playback rate the source was built with.
    #[cfg(test)]
    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Renders the sample for the given mixer frame, or None once the source
    /// is done and should be removed.
    pub fn render(&mut self, t: u64) -> Option<f32> {
        if self.cancel_handle.is_cancelled() {
            return None;
        }
        let stop_at = self.stop_at.load(Ordering::Relaxed);
        if stop_at != 0 && t >= stop_at {
            return None;
        }
        if t < self.start_at {
            return Some(0.0);
        }

        if let Some(region) = self.loop_region {
            let span = (region.end - region.start) as f64;
            while self.position >= region.end as f64 {
                self.position -= span;
            }
        }

        let index = self.position as usize;
        let sample = if index + 1 < self.buffer.data.len() {
            let frac = (self.position - index as f64) as f32;
            self.buffer.data[index] + (self.buffer.data[index + 1] - self.buffer.data[index]) * frac
        } else if index < self.buffer.data.len() {
            self.buffer.data[index]
        } else {
            // Ran off the end of a non-looping buffer.
            return None;
        };
        self.position += self.rate;

        let mut sample = match self.filter.as_mut() {
            Some(filter) => filter.process(sample),
            None => sample,
        };
        sample *= self.gain.value_at(t);
        if let Some(compressor) = self.compressor.as_mut() {
            sample = compressor.process(sample);
        }
        Some(sample)
    }
}
