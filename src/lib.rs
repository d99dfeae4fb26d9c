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

//! A virtual multi-instrument keyboard engine.
//!
//! The engine renders one or more 88-key keyboards from sampled instruments:
//! - the [`store`] caches decoded per-note sample buffers per timbre,
//! - the [`voices`] engine starts, crossfades, and releases sounding notes,
//! - the [`timeline`] scheduler plays parsed MIDI files with pause/resume/seek
//!   and a manual step-through mode,
//! - the [`graph`] is the render-side audio graph the voices play into,
//! - [`audio`] and [`midi`] are the output/input device layers.

pub mod audio;
pub mod config;
pub mod graph;
pub mod midi;
pub mod notes;
pub mod playsync;
pub mod store;
pub mod timeline;
pub mod timer;
pub mod voices;

#[cfg(test)]
pub mod testutil;
