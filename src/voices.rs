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

//! The voice engine.
//!
//! Keyboards are registered with a timbre, a volume, and a sustain flag. A
//! trigger maps velocity to gain and lowpass cutoff, builds one or two buffer
//! sources (two for crossfade-sustained timbres), and hands them to the
//! mixer. Every trigger gets its own [`VoiceId`] so a scheduled note-off can
//! never silence a newer voice on the same key.

mod engine;
pub mod sustain;
mod voice;

pub use engine::{KeyboardSettings, StateCallback, VoiceEngine};
pub use voice::{VoiceId, VoiceState};
