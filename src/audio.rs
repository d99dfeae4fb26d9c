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
use std::{error::Error, fmt, sync::Arc};

use crate::graph::Mixer;
use crate::playsync::CancelHandle;

pub mod cpal;
pub mod mock;

/// Frames per callback requested from the device. The voice engine uses the
/// same figure as its scheduling lead.
pub const BUFFER_SIZE: usize = 256;

pub trait Device: fmt::Display + Send + Sync {
    /// Renders the mixer through the device until the handle is cancelled.
    fn run(&self, mixer: Arc<Mixer>, cancel_handle: CancelHandle) -> Result<(), Box<dyn Error>>;

    /// The rate the device will pull the mixer at.
    fn sample_rate(&self) -> u32;
}

/// Lists output devices known to cpal.
pub fn list_devices() -> Result<Vec<Box<dyn Device>>, Box<dyn Error>> {
    cpal::Device::list()
}

/// Gets an output device by name. Names starting with "mock" produce a mock
/// device that consumes the mixer without touching real hardware.
pub fn get_device(name: &str, sample_rate: u32) -> Result<Arc<dyn Device>, Box<dyn Error>> {
    if name.starts_with("mock") {
        return Ok(Arc::new(mock::Device::get(name, sample_rate)));
    }

    Ok(Arc::new(cpal::Device::get(name, sample_rate)?))
}
