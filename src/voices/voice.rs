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

use crate::graph::Param;
use crate::playsync::CancelHandle;

static NEXT_VOICE_ID: AtomicU64 = AtomicU64::new(1);

/// A process-unique handle to one triggered voice. Note-offs are matched
/// against the id so a release aimed at an older voice can't stop a newer
/// one on the same key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct VoiceId(u64);

impl VoiceId {
    pub(crate) fn next() -> VoiceId {
        VoiceId(NEXT_VOICE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// The logical state of a key, reported through the engine's state callback.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum VoiceState {
    /// The key is down and a sample is playing.
    SoundingWithSample,
    /// The key is down but the timbre has no sample for it.
    SoundingWithoutSample,
    Silent,
}

/// The control handles for one buffer source owned by a voice.
pub(crate) struct SourceHandle {
    pub gain: Param,
    /// Shared with the source; storing a frame here schedules its removal.
    pub stop_at: Arc<AtomicU64>,
    pub cancel_handle: CancelHandle,
}

impl SourceHandle {
    /// Schedules the source to be dropped no later than the given mixer
    /// frame. An earlier already-scheduled stop wins.
    pub fn stop_no_later_than(&self, frame: u64) {
        let current = self.stop_at.load(Ordering::Relaxed);
        if current == 0 || frame < current {
            self.stop_at.store(frame, Ordering::Relaxed);
        }
    }
}

pub(crate) enum VoiceKind {
    /// One source playing the sample through.
    Simple(SourceHandle),
    /// An attack source crossfaded into a looping tail.
    Sustain {
        attack: SourceHandle,
        loop_tail: SourceHandle,
    },
}

/// One sounding note.
pub(crate) struct Voice {
    pub id: VoiceId,
    pub kind: VoiceKind,
}

impl Voice {
    pub fn handles(&self) -> Vec<&SourceHandle> {
        match &self.kind {
            VoiceKind::Simple(handle) => vec![handle],
            VoiceKind::Sustain { attack, loop_tail } => vec![attack, loop_tail],
        }
    }

    /// Hard-stops every source of this voice without a fade.
    pub fn cancel(&self) {
        for handle in self.handles() {
            handle.cancel_handle.cancel();
        }
    }
}
