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

//! Timelines and their playback.
//!
//! A [`Timeline`] is a flat, start-ordered list of note events, usually
//! parsed from a standard MIDI file. The [`TimelineScheduler`] plays one
//! through a voice engine with pause/resume/seek, or steps through it one
//! chord at a time in manual mode.

mod manual;
mod scheduler;

use std::collections::HashMap;

use midly::{MetaMessage, MidiMessage, Smf, Timing, TrackEventKind};

pub use scheduler::{Phase, SchedulerError, TimelineScheduler};

/// Two event times closer than this are the same step.
const TIME_EPSILON: f64 = 1e-9;

/// One note in a timeline.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NoteEvent {
    /// Onset in seconds from the start of the timeline.
    pub start: f64,
    /// Length in seconds.
    pub duration: f64,
    /// MIDI note number.
    pub key: u8,
    /// Normalized velocity in [0, 1].
    pub velocity: f32,
}

impl NoteEvent {
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }
}

/// A parsed, immutable sequence of notes.
#[derive(Clone, Debug, Default)]
pub struct Timeline {
    /// Sorted by start time.
    notes: Vec<NoteEvent>,
    /// Distinct onset times, sorted. These are the steps of manual mode.
    step_times: Vec<f64>,
    /// The largest note end time.
    duration: f64,
}

impl Timeline {
    pub fn from_notes(mut notes: Vec<NoteEvent>) -> Timeline {
        notes.sort_by(|a, b| a.start.total_cmp(&b.start));
        let duration = notes.iter().map(|n| n.end()).fold(0.0, f64::max);
        let mut step_times = Vec::new();
        for note in &notes {
            if step_times
                .last()
                .map(|last: &f64| (note.start - last).abs() > TIME_EPSILON)
                .unwrap_or(true)
            {
                step_times.push(note.start);
            }
        }
        Timeline {
            notes,
            step_times,
            duration,
        }
    }

    /// Converts a standard MIDI file. Note-on with velocity zero counts as
    /// note-off, and notes left open at the end of a track are closed there.
    pub fn from_midi(smf: &Smf) -> Timeline {
        let tempo_map = TempoMap::from_smf(smf);
        let mut notes = Vec::new();

        for track in &smf.tracks {
            let mut tick = 0u64;
            // Open notes by (channel, key), oldest first.
            let mut open: HashMap<(u8, u8), Vec<(u64, u8)>> = HashMap::new();

            for event in track {
                tick += u64::from(event.delta.as_int());
                let TrackEventKind::Midi { channel, message } = event.kind else {
                    continue;
                };
                let slot = |key: midly::num::u7| (channel.as_int(), key.as_int());
                match message {
                    MidiMessage::NoteOn { key, vel } if vel.as_int() > 0 => {
                        open.entry(slot(key)).or_default().push((tick, vel.as_int()));
                    }
                    MidiMessage::NoteOn { key, .. } | MidiMessage::NoteOff { key, .. } => {
                        if let Some(starts) = open.get_mut(&slot(key)) {
                            if !starts.is_empty() {
                                let (start_tick, velocity) = starts.remove(0);
                                notes.push(tempo_map.note(start_tick, tick, key.as_int(), velocity));
                            }
                        }
                    }
                    _ => {}
                }
            }

            for ((_, key), starts) in open {
                for (start_tick, velocity) in starts {
                    notes.push(tempo_map.note(start_tick, tick, key, velocity));
                }
            }
        }

        Timeline::from_notes(notes)
    }

    pub fn notes(&self) -> &[NoteEvent] {
        &self.notes
    }

    pub fn step_times(&self) -> &[f64] {
        &self.step_times
    }

    /// Total length in seconds.
    pub fn duration(&self) -> f64 {
        self.duration
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    /// The notes starting exactly at the given step time.
    fn notes_starting_at(&self, time: f64) -> impl Iterator<Item = &NoteEvent> {
        self.notes
            .iter()
            .filter(move |note| (note.start - time).abs() <= TIME_EPSILON)
    }

    /// The notes whose end falls in the half-open window (previous, until].
    /// No previous step means nothing has had a chance to end yet.
    fn notes_ending_in(&self, previous: Option<f64>, until: f64) -> Vec<u8> {
        let Some(previous) = previous else {
            return Vec::new();
        };
        self.notes
            .iter()
            .filter(|note| {
                note.end() > previous + TIME_EPSILON && note.end() <= until + TIME_EPSILON
            })
            .map(|note| note.key)
            .collect()
    }
}

/// Converts SMF ticks to seconds, honoring every tempo change in the file.
struct TempoMap {
    /// (start tick, seconds at start tick, seconds per tick), sorted.
    segments: Vec<(u64, f64, f64)>,
}

impl TempoMap {
    fn from_smf(smf: &Smf) -> TempoMap {
        let ticks_per_beat = match smf.header.timing {
            Timing::Metrical(tpb) => tpb.as_int() as f64,
            Timing::Timecode(fps, subframes) => {
                let secs_per_tick = 1.0 / (fps.as_f32() as f64 * subframes as f64);
                return TempoMap {
                    segments: vec![(0, 0.0, secs_per_tick)],
                };
            }
        };

        let mut changes: Vec<(u64, u32)> = Vec::new();
        for track in &smf.tracks {
            let mut tick = 0u64;
            for event in track {
                tick += u64::from(event.delta.as_int());
                if let TrackEventKind::Meta(MetaMessage::Tempo(tempo)) = event.kind {
                    changes.push((tick, tempo.as_int()));
                }
            }
        }
        changes.sort();

        // 120 bpm until the first tempo event says otherwise.
        let mut segments = vec![(0u64, 0.0, 500000.0 / 1e6 / ticks_per_beat)];
        for (tick, tempo) in changes {
            let secs = Self::secs_at_with(&segments, tick);
            let secs_per_tick = tempo as f64 / 1e6 / ticks_per_beat;
            if segments.last().map(|s| s.0) == Some(tick) {
                *segments.last_mut().expect("segment") = (tick, secs, secs_per_tick);
            } else {
                segments.push((tick, secs, secs_per_tick));
            }
        }
        TempoMap { segments }
    }

    fn secs_at_with(segments: &[(u64, f64, f64)], tick: u64) -> f64 {
        let index = segments.partition_point(|s| s.0 <= tick) - 1;
        let (start, secs, secs_per_tick) = segments[index];
        secs + (tick - start) as f64 * secs_per_tick
    }

    fn secs_at(&self, tick: u64) -> f64 {
        Self::secs_at_with(&self.segments, tick)
    }

    fn note(&self, start_tick: u64, end_tick: u64, key: u8, velocity: u8) -> NoteEvent {
        let start = self.secs_at(start_tick);
        NoteEvent {
            start,
            duration: self.secs_at(end_tick) - start,
            key,
            velocity: velocity as f32 / 127.0,
        }
    }
}
