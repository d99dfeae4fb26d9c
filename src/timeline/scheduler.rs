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
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info};

use crate::notes;
use crate::timer::{TaskHandle, TimerQueue};
use crate::voices::{VoiceEngine, VoiceId};

use super::manual::ManualState;
use super::Timeline;

/// The playback state machine.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Phase {
    Idle,
    Playing,
    Paused,
}

#[derive(Debug, Error, PartialEq)]
pub enum SchedulerError {
    #[error("no timeline loaded")]
    NoTimeline,
    #[error("no keyboard assigned")]
    NoKeyboard,
    #[error("playback is not running")]
    NotPlaying,
    #[error("playback is not paused")]
    NotPaused,
    #[error("manual mode is not enabled")]
    ManualModeDisabled,
}

struct SchedulerState {
    timeline: Option<Timeline>,
    keyboard: Option<String>,
    phase: Phase,
    /// The wall-clock instant timeline second zero maps to while playing.
    started_at: Instant,
    /// The playback position captured at pause time.
    elapsed: Duration,
    pending: Vec<TaskHandle>,
    velocity_multiplier: f64,
    manual: ManualState,
}

/// Plays a timeline through a voice engine.
///
/// Every note of a run is queued on the timer up front, the way the timeline
/// sounds best: a run is cheap to cancel wholesale (pause, stop, seek) and
/// nothing drifts while playing. Callbacks from stale runs are fenced off by
/// an epoch counter in case one fires while being cancelled.
pub struct TimelineScheduler {
    engine: Arc<VoiceEngine>,
    timer: Arc<TimerQueue>,
    epoch: Arc<AtomicU64>,
    state: Mutex<SchedulerState>,
}

impl TimelineScheduler {
    pub fn new(engine: Arc<VoiceEngine>, timer: Arc<TimerQueue>) -> TimelineScheduler {
        TimelineScheduler {
            engine,
            timer,
            epoch: Arc::new(AtomicU64::new(0)),
            state: Mutex::new(SchedulerState {
                timeline: None,
                keyboard: None,
                phase: Phase::Idle,
                started_at: Instant::now(),
                elapsed: Duration::ZERO,
                pending: Vec::new(),
                velocity_multiplier: 1.0,
                manual: ManualState::default(),
            }),
        }
    }

    /// Loads a timeline, stopping any current playback.
    pub fn load(&self, timeline: Timeline) {
        let state = &mut *self.state.lock();
        self.halt(state);
        info!(
            notes = timeline.notes().len(),
            duration_secs = timeline.duration(),
            "Timeline loaded."
        );
        state.timeline = Some(timeline);
        state.phase = Phase::Idle;
        state.elapsed = Duration::ZERO;
        state.manual.reset();
    }

    /// Assigns the keyboard playback drives. Voices on the previous keyboard
    /// are released.
    pub fn set_keyboard(&self, keyboard: &str) {
        let state = &mut *self.state.lock();
        self.halt(state);
        state.phase = Phase::Idle;
        state.keyboard = Some(keyboard.to_string());
    }

    pub fn phase(&self) -> Phase {
        self.state.lock().phase
    }

    /// The current playback position.
    pub fn position(&self) -> Duration {
        let state = self.state.lock();
        match state.phase {
            Phase::Playing => state.started_at.elapsed(),
            Phase::Paused => state.elapsed,
            Phase::Idle => Duration::ZERO,
        }
    }

    /// Scales the velocity of everything scheduled from now on. Already
    /// scheduled notes keep the velocity they were queued with.
    pub fn set_velocity_multiplier(&self, multiplier: f64) {
        self.state.lock().velocity_multiplier = multiplier.max(0.0);
    }

    /// Starts playback from the beginning. Leaves manual mode if it was on.
    pub fn play(&self) -> Result<(), SchedulerError> {
        let state = &mut *self.state.lock();
        if state.timeline.is_none() {
            return Err(SchedulerError::NoTimeline);
        }
        if state.keyboard.is_none() {
            return Err(SchedulerError::NoKeyboard);
        }
        state.manual.enabled = false;
        state.manual.reset();
        self.halt(state);
        state.elapsed = Duration::ZERO;
        state.started_at = Instant::now();
        self.schedule_from(state, 0.0);
        state.phase = Phase::Playing;
        info!("Timeline playback started.");
        Ok(())
    }

    /// Pauses playback, force-releasing sounding voices and holding the
    /// position.
    pub fn pause(&self) -> Result<(), SchedulerError> {
        let state = &mut *self.state.lock();
        if state.phase != Phase::Playing {
            return Err(SchedulerError::NotPlaying);
        }
        state.elapsed = state.started_at.elapsed();
        self.halt(state);
        state.phase = Phase::Paused;
        debug!(
            position_secs = state.elapsed.as_secs_f64(),
            "Playback paused."
        );
        Ok(())
    }

    /// Resumes from the paused position. Notes already past their onset are
    /// not replayed.
    pub fn resume(&self) -> Result<(), SchedulerError> {
        let state = &mut *self.state.lock();
        if state.phase != Phase::Paused {
            return Err(SchedulerError::NotPaused);
        }
        state.started_at = Instant::now() - state.elapsed;
        self.schedule_from(state, state.elapsed.as_secs_f64());
        state.phase = Phase::Playing;
        debug!(
            position_secs = state.elapsed.as_secs_f64(),
            "Playback resumed."
        );
        Ok(())
    }

    /// Stops playback from any state. The timeline stays loaded.
    pub fn stop(&self) {
        let state = &mut *self.state.lock();
        self.halt(state);
        state.phase = Phase::Idle;
        state.elapsed = Duration::ZERO;
    }

    /// Jumps to a fraction of the timeline and plays from there, whatever
    /// state playback was in. Leaves manual mode if it was on.
    pub fn seek(&self, fraction: f64) -> Result<(), SchedulerError> {
        let state = &mut *self.state.lock();
        let Some(timeline) = &state.timeline else {
            return Err(SchedulerError::NoTimeline);
        };
        if state.keyboard.is_none() {
            return Err(SchedulerError::NoKeyboard);
        }
        let position = timeline.duration() * fraction.clamp(0.0, 1.0);
        state.manual.enabled = false;
        state.manual.reset();
        self.halt(state);
        state.elapsed = Duration::from_secs_f64(position);
        state.started_at = Instant::now() - state.elapsed;
        self.schedule_from(state, position);
        state.phase = Phase::Playing;
        debug!(position_secs = position, "Playback seeked.");
        Ok(())
    }

    /// Enables or disables manual mode. Enabling stops timed playback and
    /// resets the step cursor to the beginning.
    pub fn set_manual_mode(&self, enabled: bool) {
        let state = &mut *self.state.lock();
        state.manual.enabled = enabled;
        state.manual.reset();
        if enabled {
            self.halt(state);
            state.phase = Phase::Idle;
            state.elapsed = Duration::ZERO;
        }
    }

    /// Plays the next step of the timeline: releases the notes that ended
    /// since the previous step, then triggers everything starting at this
    /// one, all at the pressed velocity. Stepping past the end wraps around
    /// and clears the whole keyboard first.
    pub fn manual_step(&self, velocity: u8, token: u64) -> Result<(), SchedulerError> {
        let (keyboard, wrapped, releases, triggers, velocity) = {
            let state = &mut *self.state.lock();
            if !state.manual.enabled {
                return Err(SchedulerError::ManualModeDisabled);
            }
            let timeline = state.timeline.as_ref().ok_or(SchedulerError::NoTimeline)?;
            let keyboard = state.keyboard.clone().ok_or(SchedulerError::NoKeyboard)?;

            let Some(step) = state.manual.advance(timeline.step_times(), token) else {
                return Ok(());
            };
            let releases = timeline.notes_ending_in(step.previous, step.current);
            let triggers: Vec<u8> = timeline
                .notes_starting_at(step.current)
                .map(|note| note.key)
                .collect();
            let velocity =
                (velocity as f64 * state.velocity_multiplier).min(127.0).round() as u8;
            (keyboard, step.wrapped, releases, triggers, velocity)
        };

        if wrapped {
            for note in notes::note_range() {
                self.engine.release(&keyboard, note);
            }
        }
        for key in releases {
            self.engine.release(&keyboard, key);
        }
        for key in triggers {
            self.engine.trigger(&keyboard, key, velocity);
        }
        Ok(())
    }

    /// Releases the notes belonging to the most recent manual step. Only the
    /// press identified by `token` may release; anything else is stale.
    pub fn manual_release(&self, token: u64) {
        let (keyboard, releases) = {
            let state = &mut *self.state.lock();
            if !state.manual.enabled {
                return;
            }
            let Some(timeline) = state.timeline.as_ref() else {
                return;
            };
            let Some(keyboard) = state.keyboard.clone() else {
                return;
            };
            let Some(window) = state.manual.take_release(token) else {
                return;
            };
            let Some(next) = window.next else {
                return;
            };
            (keyboard, timeline.notes_ending_in(Some(window.current), next))
        };
        for key in releases {
            self.engine.release(&keyboard, key);
        }
    }

    /// Cancels everything queued for the current run and force-releases
    /// whatever is sounding.
    fn halt(&self, state: &mut SchedulerState) {
        self.epoch.fetch_add(1, Ordering::Relaxed);
        for task in state.pending.drain(..) {
            task.cancel();
        }
        if let Some(keyboard) = &state.keyboard {
            self.engine.cut_sounding(keyboard);
        }
    }

    /// Queues note on/off tasks for every note at or after `position`.
    fn schedule_from(&self, state: &mut SchedulerState, position: f64) {
        let Some(timeline) = &state.timeline else {
            return;
        };
        let Some(keyboard) = state.keyboard.clone() else {
            return;
        };
        let run_epoch = self.epoch.load(Ordering::Relaxed);
        let multiplier = state.velocity_multiplier;

        for note in timeline.notes() {
            if note.start < position - 1e-9 {
                continue;
            }
            let key = note.key;
            let velocity =
                ((note.velocity as f64 * 127.0 * multiplier).min(127.0)).round() as u8;
            // The off task releases exactly the voice the on task started, so
            // a later retrigger of the same key is never cut short.
            let slot: Arc<Mutex<Option<VoiceId>>> = Arc::new(Mutex::new(None));

            let on = {
                let engine = self.engine.clone();
                let epoch = self.epoch.clone();
                let keyboard = keyboard.clone();
                let slot = slot.clone();
                self.timer.schedule_in(
                    Duration::from_secs_f64((note.start - position).max(0.0)),
                    move || {
                        if epoch.load(Ordering::Relaxed) != run_epoch {
                            return;
                        }
                        *slot.lock() = engine.trigger(&keyboard, key, velocity);
                    },
                )
            };
            let off = {
                let engine = self.engine.clone();
                let epoch = self.epoch.clone();
                let keyboard = keyboard.clone();
                self.timer.schedule_in(
                    Duration::from_secs_f64((note.end() - position).max(0.0)),
                    move || {
                        if epoch.load(Ordering::Relaxed) != run_epoch {
                            return;
                        }
                        match slot.lock().take() {
                            Some(id) => engine.release_voice(&keyboard, key, id),
                            None => engine.release(&keyboard, key),
                        }
                    },
                )
            };
            state.pending.push(on);
            state.pending.push(off);
        }
    }
}

#[cfg(test)]
mod test {
    use std::collections::HashMap;
    use std::thread;

    use super::*;
    use crate::graph::Mixer;
    use crate::store::{SampleStore, TimbreMode};
    use crate::testutil::{self, eventually};
    use crate::timeline::NoteEvent;
    use crate::voices::{KeyboardSettings, VoiceState};

    fn note(start: f64, duration: f64, key: u8) -> NoteEvent {
        NoteEvent {
            start,
            duration,
            key,
            velocity: 0.8,
        }
    }

    fn fixture() -> (TimelineScheduler, Arc<VoiceEngine>) {
        let store = Arc::new(SampleStore::new(44100));
        let mut buffers = HashMap::new();
        for key in [60u8, 64, 67, 72] {
            buffers.insert(key, Arc::new(testutil::decaying_pluck(44100, 3.0)));
        }
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

        let scheduler = TimelineScheduler::new(engine.clone(), Arc::new(TimerQueue::new()));
        scheduler.set_keyboard("main");
        (scheduler, engine)
    }

    #[test]
    fn test_play_requires_timeline_and_keyboard() {
        let (scheduler, _engine) = fixture();
        assert_eq!(scheduler.play(), Err(SchedulerError::NoTimeline));

        let store = Arc::new(SampleStore::new(44100));
        let (mixer, source_tx) = Mixer::new(44100);
        let engine = Arc::new(VoiceEngine::new(store, mixer, source_tx, 256));
        let keyboardless = TimelineScheduler::new(engine, Arc::new(TimerQueue::new()));
        keyboardless.load(Timeline::from_notes(vec![note(0.0, 0.1, 60)]));
        assert_eq!(keyboardless.play(), Err(SchedulerError::NoKeyboard));
    }

    #[test]
    fn test_play_triggers_and_releases() {
        let (scheduler, engine) = fixture();
        scheduler.load(Timeline::from_notes(vec![note(0.0, 0.15, 60)]));

        scheduler.play().expect("play");
        assert_eq!(scheduler.phase(), Phase::Playing);

        eventually(
            || engine.active_voice_count("main") == 1,
            "note never triggered",
        );
        eventually(
            || engine.active_voice_count("main") == 0,
            "note never released",
        );
    }

    #[test]
    fn test_pause_holds_and_resume_continues() {
        let (scheduler, engine) = fixture();
        scheduler.load(Timeline::from_notes(vec![
            note(0.0, 1.0, 60),
            note(0.5, 0.2, 64),
        ]));

        scheduler.play().expect("play");
        eventually(
            || engine.active_voice_count("main") == 1,
            "first note never triggered",
        );
        scheduler.pause().expect("pause");
        assert_eq!(scheduler.phase(), Phase::Paused);
        assert_eq!(engine.active_voice_count("main"), 0);

        // The second note must not fire while paused.
        thread::sleep(Duration::from_millis(600));
        assert_eq!(engine.active_voice_count("main"), 0);
        let position = scheduler.position();
        assert!(position < Duration::from_millis(500));

        scheduler.resume().expect("resume");
        // The first note's onset has passed, so it is not replayed.
        assert_eq!(engine.active_voice_count("main"), 0);
        eventually(
            || engine.active_voice_count("main") == 1,
            "second note never triggered",
        );
    }

    #[test]
    fn test_phase_preconditions() {
        let (scheduler, _engine) = fixture();
        scheduler.load(Timeline::from_notes(vec![note(0.0, 0.1, 60)]));

        assert_eq!(scheduler.pause(), Err(SchedulerError::NotPlaying));
        assert_eq!(scheduler.resume(), Err(SchedulerError::NotPaused));

        scheduler.play().expect("play");
        assert_eq!(scheduler.resume(), Err(SchedulerError::NotPaused));
        scheduler.stop();
        assert_eq!(scheduler.phase(), Phase::Idle);
        assert_eq!(scheduler.pause(), Err(SchedulerError::NotPlaying));
    }

    #[test]
    fn test_seek_schedules_only_later_notes() {
        let (scheduler, engine) = fixture();
        let triggered = Arc::new(Mutex::new(Vec::new()));
        {
            let triggered = triggered.clone();
            engine.set_on_voice_state(Box::new(move |_, key, state| {
                if state == VoiceState::SoundingWithSample {
                    triggered.lock().push(key);
                }
            }));
        }
        // One second long in total.
        scheduler.load(Timeline::from_notes(vec![
            note(0.1, 0.1, 60),
            note(0.8, 0.2, 67),
        ]));

        scheduler.seek(0.5).expect("seek");
        assert_eq!(scheduler.phase(), Phase::Playing);
        assert!(scheduler.position() >= Duration::from_millis(500));

        eventually(
            || triggered.lock().contains(&67),
            "later note never triggered",
        );
        assert!(!triggered.lock().contains(&60));
    }

    #[test]
    fn test_stale_note_off_spares_retriggered_voice() {
        let (scheduler, engine) = fixture();
        scheduler.load(Timeline::from_notes(vec![
            note(0.0, 0.2, 60),
            note(0.1, 0.5, 60),
        ]));

        scheduler.play().expect("play");
        // At 0.2 s the first note's off fires, but the key was retriggered
        // at 0.1 s; the newer voice must survive until 0.6 s.
        thread::sleep(Duration::from_millis(350));
        assert_eq!(engine.active_voice_count("main"), 1);
        eventually(
            || engine.active_voice_count("main") == 0,
            "second voice never released",
        );
    }

    fn manual_timeline() -> Timeline {
        Timeline::from_notes(vec![
            note(0.0, 1.0, 60),
            note(0.0, 2.5, 64),
            note(1.0, 1.0, 67),
            note(2.5, 0.5, 72),
        ])
    }

    #[test]
    fn test_manual_step_walkthrough() {
        let (scheduler, engine) = fixture();
        scheduler.load(manual_timeline());
        scheduler.set_manual_mode(true);

        // Step 1 plays the opening chord; nothing is released.
        scheduler.manual_step(100, 1).expect("step");
        assert_eq!(engine.active_voice_count("main"), 2);

        // Step 2 releases the note that ended by t=1 and adds G4.
        scheduler.manual_step(100, 2).expect("step");
        assert_eq!(engine.active_voice_count("main"), 2);

        // Step 3 releases everything ending in (1, 2.5] and adds C5.
        scheduler.manual_step(100, 3).expect("step");
        assert_eq!(engine.active_voice_count("main"), 1);

        // Step 4 wraps: the whole keyboard clears, then the opening chord
        // plays again.
        scheduler.manual_step(100, 4).expect("step");
        assert_eq!(engine.active_voice_count("main"), 2);
    }

    #[test]
    fn test_manual_step_requires_manual_mode() {
        let (scheduler, _engine) = fixture();
        scheduler.load(manual_timeline());
        assert_eq!(
            scheduler.manual_step(100, 1),
            Err(SchedulerError::ManualModeDisabled)
        );
    }

    #[test]
    fn test_manual_release_matches_token() {
        let (scheduler, engine) = fixture();
        scheduler.load(manual_timeline());
        scheduler.set_manual_mode(true);

        scheduler.manual_step(100, 5).expect("step");
        assert_eq!(engine.active_voice_count("main"), 2);

        // A stale token releases nothing.
        scheduler.manual_release(6);
        assert_eq!(engine.active_voice_count("main"), 2);

        // The matching token releases the notes ending before the next step.
        scheduler.manual_release(5);
        assert_eq!(engine.active_voice_count("main"), 1);
    }

    #[test]
    fn test_enabling_manual_mode_stops_playback() {
        let (scheduler, engine) = fixture();
        scheduler.load(Timeline::from_notes(vec![note(0.0, 5.0, 60)]));

        scheduler.play().expect("play");
        eventually(
            || engine.active_voice_count("main") == 1,
            "note never triggered",
        );

        scheduler.set_manual_mode(true);
        assert_eq!(scheduler.phase(), Phase::Idle);
        assert_eq!(engine.active_voice_count("main"), 0);
    }
}
