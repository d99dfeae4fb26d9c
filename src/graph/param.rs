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
use std::{collections::VecDeque, sync::Arc};

use parking_lot::Mutex;

/// An automatable scalar parameter, sampled once per frame by the render
/// thread. The control side schedules value changes against the mixer's frame
/// clock; events must be scheduled in nondecreasing time order.
///
/// Ramps run from the end of the previous event to their own target time.
#[derive(Clone)]
pub struct Param {
    state: Arc<Mutex<ParamState>>,
}

struct ParamState {
    /// The time and value the next event ramps from.
    anchor_time: u64,
    anchor_value: f32,
    events: VecDeque<Event>,
}

enum Event {
    /// Jump to a value at a frame.
    Set { at: u64, value: f32 },
    /// Ramp from the anchor to a value, linearly or geometrically.
    Ramp {
        at: u64,
        value: f32,
        exponential: bool,
    },
    /// Piecewise-linear curve over a fixed number of frames.
    Curve {
        at: u64,
        values: Vec<f32>,
        duration: u64,
    },
}

impl Event {
    /// The frame at which this event has fully taken effect.
    fn end_time(&self) -> u64 {
        match self {
            Event::Set { at, .. } => *at,
            Event::Ramp { at, .. } => *at,
            Event::Curve { at, duration, .. } => at + duration,
        }
    }

    fn end_value(&self, anchor_value: f32) -> f32 {
        match self {
            Event::Set { value, .. } => *value,
            Event::Ramp { value, .. } => *value,
            Event::Curve { values, .. } => values.last().copied().unwrap_or(anchor_value),
        }
    }

    fn value_at(&self, t: u64, anchor_time: u64, anchor_value: f32) -> f32 {
        match self {
            Event::Set { .. } => anchor_value,
            Event::Ramp {
                at,
                value,
                exponential,
            } => {
                if t <= anchor_time || *at <= anchor_time {
                    return anchor_value;
                }
                let frac = (t - anchor_time) as f32 / (*at - anchor_time) as f32;
                // A geometric ramp is undefined from a non-positive value.
                if *exponential && anchor_value > 0.0 && *value > 0.0 {
                    anchor_value * (value / anchor_value).powf(frac)
                } else {
                    anchor_value + (value - anchor_value) * frac
                }
            }
            Event::Curve {
                at,
                values,
                duration,
            } => {
                if t < *at || values.is_empty() {
                    return anchor_value;
                }
                if values.len() == 1 || *duration == 0 {
                    return values[values.len() - 1];
                }
                let pos = (t - at) as f32 / *duration as f32 * (values.len() - 1) as f32;
                let index = pos as usize;
                if index + 1 >= values.len() {
                    return values[values.len() - 1];
                }
                let frac = pos - index as f32;
                values[index] + (values[index + 1] - values[index]) * frac
            }
        }
    }
}

impl Param {
    pub fn new(value: f32) -> Param {
        Param {
            state: Arc::new(Mutex::new(ParamState {
                anchor_time: 0,
                anchor_value: value,
                events: VecDeque::new(),
            })),
        }
    }

    /// Schedules an instantaneous jump.
    pub fn set_value_at(&self, value: f32, at: u64) {
        self.state
            .lock()
            .events
            .push_back(Event::Set { at, value });
    }

    /// Schedules a linear ramp finishing at the given frame.
    pub fn linear_ramp_to(&self, value: f32, at: u64) {
        self.state.lock().events.push_back(Event::Ramp {
            at,
            value,
            exponential: false,
        });
    }

    /// Schedules a geometric ramp finishing at the given frame. Falls back to
    /// a linear ramp when either endpoint is non-positive.
    pub fn exponential_ramp_to(&self, value: f32, at: u64) {
        self.state.lock().events.push_back(Event::Ramp {
            at,
            value,
            exponential: true,
        });
    }

    /// Schedules a value curve spread evenly over `duration` frames.
    pub fn set_curve_at(&self, values: Vec<f32>, at: u64, duration: u64) {
        self.state.lock().events.push_back(Event::Curve {
            at,
            values,
            duration,
        });
    }

    /// Evaluates the parameter at a frame, consuming completed events. Called
    /// by the render thread with a monotonically increasing clock.
    pub fn value_at(&self, t: u64) -> f32 {
        let mut state = self.state.lock();
        while let Some(event) = state.events.front() {
            if event.end_time() > t {
                break;
            }
            let event = state.events.pop_front().expect("peeked event");
            state.anchor_time = event.end_time();
            state.anchor_value = event.end_value(state.anchor_value);
        }
        match state.events.front() {
            None => state.anchor_value,
            Some(event) => event.value_at(t, state.anchor_time, state.anchor_value),
        }
    }

    /// Drops all scheduled events and holds the value the parameter has at
    /// the given frame. Returns the held value.
    pub fn cancel_and_hold(&self, t: u64) -> f32 {
        let value = self.value_at(t);
        let mut state = self.state.lock();
        state.events.clear();
        state.anchor_time = t;
        state.anchor_value = value;
        value
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_set_value() {
        let param = Param::new(1.0);
        param.set_value_at(0.5, 100);

        assert_eq!(param.value_at(0), 1.0);
        assert_eq!(param.value_at(99), 1.0);
        assert_eq!(param.value_at(100), 0.5);
        assert_eq!(param.value_at(1000), 0.5);
    }

    #[test]
    fn test_linear_ramp() {
        let param = Param::new(0.0);
        param.set_value_at(0.0, 100);
        param.linear_ramp_to(1.0, 200);

        assert_eq!(param.value_at(100), 0.0);
        assert!((param.value_at(150) - 0.5).abs() < 1e-6);
        assert_eq!(param.value_at(200), 1.0);
        assert_eq!(param.value_at(300), 1.0);
    }

    #[test]
    fn test_exponential_ramp() {
        let param = Param::new(1.0);
        param.exponential_ramp_to(0.01, 200);

        // Geometric interpolation hits sqrt(start * end) halfway.
        assert!((param.value_at(100) - 0.1).abs() < 1e-4);
        assert!((param.value_at(200) - 0.01).abs() < 1e-6);
    }

    #[test]
    fn test_exponential_ramp_from_zero_falls_back_to_linear() {
        let param = Param::new(0.0);
        param.exponential_ramp_to(1.0, 100);

        assert!((param.value_at(50) - 0.5).abs() < 1e-6);
        assert_eq!(param.value_at(100), 1.0);
    }

    #[test]
    fn test_curve() {
        let param = Param::new(0.0);
        param.set_curve_at(vec![0.0, 1.0, 0.0], 100, 100);

        assert_eq!(param.value_at(0), 0.0);
        assert!((param.value_at(125) - 0.5).abs() < 1e-6);
        assert!((param.value_at(150) - 1.0).abs() < 1e-6);
        assert!((param.value_at(175) - 0.5).abs() < 1e-6);
        assert_eq!(param.value_at(200), 0.0);
        assert_eq!(param.value_at(500), 0.0);
    }

    #[test]
    fn test_cancel_and_hold() {
        let param = Param::new(0.0);
        param.linear_ramp_to(1.0, 100);

        let held = param.cancel_and_hold(50);
        assert!((held - 0.5).abs() < 1e-6);
        assert!((param.value_at(100) - 0.5).abs() < 1e-6);
        assert!((param.value_at(1000) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_ramp_after_cancel_starts_from_held_value() {
        let param = Param::new(1.0);
        param.linear_ramp_to(0.0, 100);
        param.cancel_and_hold(50);
        param.linear_ramp_to(0.0, 150);

        assert!((param.value_at(100) - 0.25).abs() < 1e-6);
        assert_eq!(param.value_at(150), 0.0);
    }
}
