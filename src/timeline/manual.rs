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

//! Manual-mode cursor state.
//!
//! In manual mode a performer steps through the timeline one onset at a
//! time; every press plays the next chord regardless of the written rhythm.
//! Each press carries a caller token so the matching release can be
//! correlated: only the most recent press may release its notes.

/// The result of advancing the cursor by one step.
pub(crate) struct StepAdvance {
    /// True when the cursor wrapped back to the first step; every key is
    /// released before the step plays.
    pub wrapped: bool,
    /// The previous step's time. None on the first step.
    pub previous: Option<f64>,
    /// The step being played.
    pub current: f64,
}

/// The window a press's release acts on.
pub(crate) struct TriggerWindow {
    pub token: u64,
    /// The step that was played by the press.
    pub current: f64,
    /// The step after it, if any.
    pub next: Option<f64>,
}

#[derive(Default)]
pub(crate) struct ManualState {
    pub enabled: bool,
    index: usize,
    last_trigger: Option<TriggerWindow>,
}

impl ManualState {
    pub fn reset(&mut self) {
        self.index = 0;
        self.last_trigger = None;
    }

    /// Advances the cursor over the given step times. Returns None when
    /// there are no steps at all.
    pub fn advance(&mut self, steps: &[f64], token: u64) -> Option<StepAdvance> {
        if steps.is_empty() {
            return None;
        }

        let wrapped = self.index >= steps.len();
        if wrapped {
            self.index = 0;
        }

        let current = steps[self.index];
        let previous = if self.index == 0 {
            None
        } else {
            Some(steps[self.index - 1])
        };
        self.index += 1;

        self.last_trigger = Some(TriggerWindow {
            token,
            current,
            next: steps.get(self.index).copied(),
        });
        Some(StepAdvance {
            wrapped,
            previous,
            current,
        })
    }

    /// Takes the release window if the token matches the most recent press.
    /// A stale token (a newer press happened since) gets nothing.
    pub fn take_release(&mut self, token: u64) -> Option<TriggerWindow> {
        match &self.last_trigger {
            Some(window) if window.token == token => self.last_trigger.take(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const STEPS: [f64; 3] = [0.0, 1.0, 2.5];

    #[test]
    fn test_advance_walks_steps_in_order() {
        let mut state = ManualState::default();

        let step = state.advance(&STEPS, 1).expect("step");
        assert!(!step.wrapped);
        assert_eq!(step.previous, None);
        assert_eq!(step.current, 0.0);

        let step = state.advance(&STEPS, 2).expect("step");
        assert_eq!(step.previous, Some(0.0));
        assert_eq!(step.current, 1.0);

        let step = state.advance(&STEPS, 3).expect("step");
        assert_eq!(step.previous, Some(1.0));
        assert_eq!(step.current, 2.5);
    }

    #[test]
    fn test_advance_wraps_to_start() {
        let mut state = ManualState::default();
        for token in 0..3 {
            state.advance(&STEPS, token);
        }

        let step = state.advance(&STEPS, 3).expect("step");
        assert!(step.wrapped);
        assert_eq!(step.previous, None);
        assert_eq!(step.current, 0.0);
    }

    #[test]
    fn test_advance_empty_steps() {
        let mut state = ManualState::default();
        assert!(state.advance(&[], 1).is_none());
    }

    #[test]
    fn test_release_requires_matching_token() {
        let mut state = ManualState::default();
        state.advance(&STEPS, 7);

        assert!(state.take_release(8).is_none());
        let window = state.take_release(7).expect("window");
        assert_eq!(window.current, 0.0);
        assert_eq!(window.next, Some(1.0));

        // The window is consumed.
        assert!(state.take_release(7).is_none());
    }

    #[test]
    fn test_newer_press_invalidates_older_release() {
        let mut state = ManualState::default();
        state.advance(&STEPS, 1);
        state.advance(&STEPS, 2);

        assert!(state.take_release(1).is_none());
        assert!(state.take_release(2).is_some());
    }

    #[test]
    fn test_last_step_has_no_next() {
        let mut state = ManualState::default();
        for token in 0..3 {
            state.advance(&STEPS, token);
        }
        let window = state.take_release(2).expect("window");
        assert_eq!(window.current, 2.5);
        assert_eq!(window.next, None);
    }
}
