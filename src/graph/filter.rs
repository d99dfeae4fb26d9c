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
use std::f32::consts::PI;

/// A one-pole lowpass. The voice engine maps velocity to the cutoff so soft
/// notes come out darker.
pub struct OnePole {
    coefficient: f32,
    state: f32,
}

impl OnePole {
    pub fn new(cutoff_hz: f32, sample_rate: u32) -> OnePole {
        let cutoff = cutoff_hz.max(1.0).min(sample_rate as f32 / 2.0);
        OnePole {
            coefficient: 1.0 - (-2.0 * PI * cutoff / sample_rate as f32).exp(),
            state: 0.0,
        }
    }

    #[inline]
    pub fn process(&mut self, input: f32) -> f32 {
        self.state += self.coefficient * (input - self.state);
        self.state
    }
}

/// A feed-forward compressor that squashes peaks above a threshold. Sustained
/// voices run through one of these so the looped tail never clips.
pub struct Compressor {
    threshold: f32,
    ratio: f32,
}

impl Compressor {
    pub fn new(threshold: f32, ratio: f32) -> Compressor {
        Compressor { threshold, ratio }
    }

    #[inline]
    pub fn process(&mut self, input: f32) -> f32 {
        let magnitude = input.abs();
        if magnitude <= self.threshold {
            input
        } else {
            let compressed = self.threshold + (magnitude - self.threshold) / self.ratio;
            compressed.copysign(input)
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_lowpass_attenuates_alternating_signal() {
        let mut filter = OnePole::new(500.0, 44100);

        // A Nyquist-rate square wave should come out much smaller than it
        // went in.
        let mut peak = 0.0f32;
        for i in 0..1000 {
            let input = if i % 2 == 0 { 1.0 } else { -1.0 };
            let output = filter.process(input);
            if i > 100 {
                peak = peak.max(output.abs());
            }
        }
        assert!(peak < 0.25, "peak was {}", peak);
    }

    #[test]
    fn test_lowpass_passes_dc() {
        let mut filter = OnePole::new(500.0, 44100);
        let mut output = 0.0;
        for _ in 0..10000 {
            output = filter.process(1.0);
        }
        assert!((output - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_compressor_below_threshold_is_transparent() {
        let mut compressor = Compressor::new(0.8, 4.0);
        assert_eq!(compressor.process(0.5), 0.5);
        assert_eq!(compressor.process(-0.5), -0.5);
    }

    #[test]
    fn test_compressor_squashes_peaks() {
        let mut compressor = Compressor::new(0.8, 4.0);
        let output = compressor.process(1.6);
        assert!((output - 1.0).abs() < 1e-6);
        let output = compressor.process(-1.6);
        assert!((output + 1.0).abs() < 1e-6);
    }
}
