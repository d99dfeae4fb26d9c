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

//! The render-side audio graph.
//!
//! The voice engine builds [`BufferSource`]s (a decoded sample buffer plus
//! gain automation, an optional lowpass/compressor chain, and an optional
//! loop region) and hands them to the [`Mixer`] over a channel. The output
//! device pulls interleaved stereo from the mixer on its own schedule, so
//! nothing on the trigger path ever blocks on the audio callback.

mod filter;
mod mixer;
mod param;
mod source;

pub use filter::{Compressor, OnePole};
pub use mixer::{Mixer, SourceSender};
pub use param::Param;
pub use source::{next_source_id, BufferSource, LoopRegion, SampleBuffer};
