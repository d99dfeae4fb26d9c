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

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;

use super::BufferSource;

/// The sending half used by the voice engine to start sources.
pub type SourceSender = Sender<BufferSource>;

/// Mixes active sources into interleaved stereo.
///
/// New sources arrive over a channel so senders never contend with the render
/// thread for the source list. The frame counter doubles as the clock that
/// all gain automation and scheduled stops are expressed against.
pub struct Mixer {
    sources: Mutex<Vec<BufferSource>>,
    receiver: Receiver<BufferSource>,
    current_frame: AtomicU64,
    sample_rate: u32,
}

impl Mixer {
    /// Creates a mixer and the sender used to feed it sources.
    pub fn new(sample_rate: u32) -> (Arc<Mixer>, SourceSender) {
        let (sender, receiver) = crossbeam_channel::unbounded();
        (
            Arc::new(Mixer {
                sources: Mutex::new(Vec::new()),
                receiver,
                current_frame: AtomicU64::new(0),
                sample_rate,
            }),
            sender,
        )
    }

    /// Fills an interleaved stereo buffer and advances the frame clock.
    /// Finished and cancelled sources are dropped along the way.
    pub fn fill(&self, out: &mut [f32]) {
        let mut sources = self.sources.lock();
        for source in self.receiver.try_iter() {
            sources.push(source);
        }

        let mut t = self.current_frame.load(Ordering::Relaxed);
        for frame in out.chunks_exact_mut(2) {
            let mut mix = 0.0f32;
            sources.retain_mut(|source| match source.render(t) {
                Some(sample) => {
                    mix += sample;
                    true
                }
                None => false,
            });
            frame[0] = mix;
            frame[1] = mix;
            t += 1;
        }
        self.current_frame.store(t, Ordering::Relaxed);
    }

    /// The current frame clock. Everything scheduled against the mixer is
    /// relative to this.
    pub fn current_frame(&self) -> u64 {
        self.current_frame.load(Ordering::Relaxed)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// The number of sources currently rendering, including any waiting in
    /// the channel.
    pub fn active_source_count(&self) -> usize {
        self.sources.lock().len() + self.receiver.len()
    }

    /// Converts seconds to frames at the mixer rate.
    pub fn frames(&self, seconds: f64) -> u64 {
        (seconds * self.sample_rate as f64) as u64
    }

    /// The playback rates of the sources currently rendering.
    #[cfg(test)]
    pub fn source_rates(&self) -> Vec<f64> {
        self.sources.lock().iter().map(|s| s.rate()).collect()
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::AtomicU64;

    use super::*;
    use crate::graph::{next_source_id, LoopRegion, Param, SampleBuffer};
    use crate::playsync::CancelHandle;

    fn test_source(data: Vec<f32>, loop_region: Option<LoopRegion>) -> BufferSource {
        BufferSource::new(
            next_source_id(),
            Arc::new(SampleBuffer {
                data,
                sample_rate: 44100,
            }),
            0.0,
            1.0,
            loop_region,
            0,
            Arc::new(AtomicU64::new(0)),
            Param::new(1.0),
            None,
            None,
            CancelHandle::new(),
        )
    }

    #[test]
    fn test_mixes_sources_into_stereo() {
        let (mixer, sender) = Mixer::new(44100);
        sender
            .send(test_source(vec![0.5, 0.3], None))
            .expect("send");
        sender
            .send(test_source(vec![0.2, 0.1], None))
            .expect("send");

        let mut out = vec![0.0f32; 4];
        mixer.fill(&mut out);

        assert!((out[0] - 0.7).abs() < 1e-6);
        assert!((out[1] - 0.7).abs() < 1e-6);
        assert!((out[2] - 0.4).abs() < 1e-6);
        assert!((out[3] - 0.4).abs() < 1e-6);
        assert_eq!(mixer.current_frame(), 2);
    }

    #[test]
    fn test_finished_sources_are_dropped() {
        let (mixer, sender) = Mixer::new(44100);
        sender
            .send(test_source(vec![0.5, 0.5], None))
            .expect("send");

        let mut out = vec![0.0f32; 8];
        mixer.fill(&mut out);

        assert_eq!(mixer.active_source_count(), 0);
        // The tail after the source finished is silence.
        assert_eq!(out[4], 0.0);
        assert_eq!(out[6], 0.0);
    }

    #[test]
    fn test_looping_source_stays_active() {
        let (mixer, sender) = Mixer::new(44100);
        sender
            .send(test_source(
                vec![0.5; 16],
                Some(LoopRegion { start: 0, end: 16 }),
            ))
            .expect("send");

        let mut out = vec![0.0f32; 128];
        mixer.fill(&mut out);

        assert_eq!(mixer.active_source_count(), 1);
        assert!(out.iter().all(|sample| (*sample - 0.5).abs() < 1e-6));
    }

    #[test]
    fn test_frame_clock_advances_without_sources() {
        let (mixer, _sender) = Mixer::new(48000);
        let mut out = vec![0.0f32; 64];
        mixer.fill(&mut out);
        mixer.fill(&mut out);
        assert_eq!(mixer.current_frame(), 64);
    }
}
