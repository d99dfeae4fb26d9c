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

//! Crossfade sustain analysis.
//!
//! A sustained voice plays the sample's natural attack, then crossfades into
//! a looped slice of the sample's steady region so the note can ring for as
//! long as the key is held. This module finds usable loop points in a
//! decoded buffer and builds the equal-power fade curves.

use rand::Rng;

use crate::graph::SampleBuffer;

/// Loops shorter than this repeat audibly; analysis falls back to
/// attack-only playback instead.
pub const MIN_LOOP_SECS: f64 = 1.0;

/// Length of the attack-to-loop crossfade.
pub const CROSSFADE_SECS: f64 = 1.2;

/// How far ahead of the crossfade the loop source starts rendering, to give
/// its lowpass time to settle.
pub const LOOP_LEAD_SECS: f64 = 0.05;

/// Resolution of the fade curves.
pub const CURVE_STEPS: usize = 64;

/// Samples within this margin of the buffer end are never used for looping;
/// many recordings fade or click right at the end.
const END_MARGIN_SECS: f64 = 0.2;

/// Added to the measured decay time so the loop starts past the transient.
const ATTACK_MARGIN_SECS: f64 = 0.2;

/// How far (in frames) from the ideal loop start to search for a zero
/// crossing.
const ZERO_CROSSING_SEARCH: usize = 1000;

/// Window used both for decay detection and for loop end matching.
const MATCH_WINDOW_SECS: f64 = 0.02;

/// Loop points for one decoded buffer.
#[derive(Clone, Copy, Debug)]
pub struct LoopPoints {
    /// Seconds of attack played before the crossfade begins.
    pub attack_secs: f64,
    /// Loop entry in frames, snapped to a zero crossing.
    pub loop_start: usize,
    /// Loop exit in frames, exclusive.
    pub loop_end: usize,
    /// False when no usable loop region was found; the voice then plays the
    /// sample once like a simple timbre.
    pub looped: bool,
}

/// Analyzes a buffer for loop points.
pub fn analyze(buffer: &SampleBuffer) -> LoopPoints {
    let data = &buffer.data;
    let rate = buffer.sample_rate as f64;
    let duration = buffer.duration_secs();

    let attack_only = |attack_secs: f64| LoopPoints {
        attack_secs,
        loop_start: 0,
        loop_end: data.len(),
        looped: false,
    };

    if duration <= 2.0 * END_MARGIN_SECS || data.is_empty() {
        return attack_only(duration);
    }

    let window = ((rate * MATCH_WINDOW_SECS) as usize).max(1);
    let end_secs = duration - END_MARGIN_SECS;

    // Find the peak within the first third, then the point where the
    // envelope has decayed to half of it.
    let third = (data.len() / 3).max(1);
    let mut peak = 0.0f32;
    let mut peak_index = 0usize;
    for (i, sample) in data[..third].iter().enumerate() {
        if sample.abs() > peak {
            peak = sample.abs();
            peak_index = i;
        }
    }

    let decay_window = ((rate * 0.01) as usize).max(1);
    let mut decay_index = None;
    let mut i = peak_index;
    while i + decay_window <= data.len() {
        let mean: f32 =
            data[i..i + decay_window].iter().map(|s| s.abs()).sum::<f32>() / decay_window as f32;
        if mean <= peak * 0.5 {
            decay_index = Some(i);
            break;
        }
        i += decay_window;
    }

    let attack_floor = 0.5f64.min(duration * 0.5);
    let measured_attack = decay_index
        .map(|index| (index as f64 / rate + ATTACK_MARGIN_SECS).clamp(attack_floor, duration * 0.5));

    // When the decay point couldn't be measured, or the region between it
    // and the end margin is too short to loop from, fall back to fixed
    // defaults.
    let (attack_secs, loop_end) = match measured_attack {
        Some(attack) if end_secs - attack >= MIN_LOOP_SECS => {
            let loop_start = find_zero_crossing(data, (attack * rate) as usize);
            let loop_end = find_loop_end(data, loop_start, window, rate, end_secs);
            (attack, loop_end)
        }
        _ => ((2.0f64).min(duration * 0.3), (end_secs * rate) as usize),
    };

    let loop_start = find_zero_crossing(data, (attack_secs * rate) as usize);
    if loop_end.saturating_sub(loop_start) as f64 / rate < MIN_LOOP_SECS {
        return attack_only(attack_secs);
    }
    LoopPoints {
        attack_secs,
        loop_start,
        loop_end,
        looped: true,
    }
}

/// Finds the positive-going zero crossing nearest to `target`, searching
/// outward a bounded distance. Returns `target` when none is found. Only the
/// rising direction qualifies so every loop entry starts the waveform the
/// same way.
fn find_zero_crossing(data: &[f32], target: usize) -> usize {
    let crossing_at =
        |i: usize| -> bool { i + 1 < data.len() && data[i] <= 0.0 && data[i + 1] >= 0.0 };
    if crossing_at(target) {
        return target;
    }
    for offset in 1..=ZERO_CROSSING_SEARCH {
        if target >= offset && crossing_at(target - offset) {
            return target - offset;
        }
        if crossing_at(target + offset) {
            return target + offset;
        }
    }
    target
}

/// Picks a loop end near the end margin whose surrounding waveform best
/// matches the loop start, so the wrap is as close to seamless as the
/// recording allows.
fn find_loop_end(data: &[f32], loop_start: usize, window: usize, rate: f64, end_secs: f64) -> usize {
    let latest = ((end_secs * rate) as usize).min(data.len().saturating_sub(window));
    let earliest = ((end_secs - 0.25) * rate) as usize;
    let earliest = earliest.max(loop_start + window);
    if earliest >= latest || loop_start + window > data.len() {
        return latest;
    }

    let reference = &data[loop_start..loop_start + window];
    let step = (window / 4).max(1);
    let mut best = latest;
    let mut best_score = f32::INFINITY;
    let mut candidate = earliest;
    while candidate <= latest {
        let score: f32 = data[candidate..candidate + window]
            .iter()
            .zip(reference)
            .map(|(a, b)| (a - b).abs())
            .sum::<f32>()
            / window as f32;
        if score < best_score {
            best_score = score;
            best = candidate;
        }
        candidate += step;
    }
    best
}

/// Builds the eased equal-power fade curves for the crossfade: the first
/// fades the attack source from `gain` to zero, the second fades the loop
/// source in. At every step the two squared gains sum to `gain` squared, so
/// perceived loudness stays flat through the fade.
pub fn equal_power_curves(gain: f32) -> (Vec<f32>, Vec<f32>) {
    let mut fade_out = Vec::with_capacity(CURVE_STEPS);
    let mut fade_in = Vec::with_capacity(CURVE_STEPS);
    for step in 0..CURVE_STEPS {
        let t = step as f32 / (CURVE_STEPS - 1) as f32;
        // Smoothstep easing keeps the fade gentle at both ends.
        let s = t * t * (3.0 - 2.0 * t);
        fade_out.push(gain * (s * std::f32::consts::FRAC_PI_2).cos());
        fade_in.push(gain * ((1.0 - s) * std::f32::consts::FRAC_PI_2).cos());
    }
    (fade_out, fade_in)
}

/// A sub-0.1% playback rate deviation applied per trigger so repeated notes
/// and stacked unisons don't phase-lock.
pub fn pitch_jitter() -> f64 {
    1.0 + rand::thread_rng().gen_range(-1.0..1.0) * 0.0005
}
