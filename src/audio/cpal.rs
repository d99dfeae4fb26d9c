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

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use thread_priority::{set_current_thread_priority, ThreadPriority, ThreadPriorityValue};
use tracing::{error, info, span, warn, Level};

use crate::audio::Device as AudioDevice;
use crate::graph::Mixer;
use crate::playsync::CancelHandle;

/// Priority for the audio callback thread.
const CALLBACK_THREAD_PRIORITY: u8 = 70;

/// A small wrapper around a cpal::Device.
pub struct Device {
    /// The name of the device.
    name: String,
    /// The maximum number of output channels the device supports.
    max_channels: u16,
    /// The host ID of the device.
    host_id: cpal::HostId,
    /// The underlying cpal device.
    device: cpal::Device,
    /// The rate the mixer will be pulled at.
    sample_rate: u32,
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (Channels={}) ({})",
            self.name,
            self.max_channels,
            self.host_id.name()
        )
    }
}

impl Device {
    /// Lists cpal devices and produces the Device trait.
    pub fn list() -> Result<Vec<Box<dyn AudioDevice>>, Box<dyn Error>> {
        Ok(Device::list_cpal_devices(44100)?
            .into_iter()
            .map(|device| {
                let device: Box<dyn AudioDevice> = Box::new(device);
                device
            })
            .collect())
    }

    /// Lists cpal devices with at least a stereo output.
    fn list_cpal_devices(sample_rate: u32) -> Result<Vec<Device>, Box<dyn Error>> {
        let mut devices: Vec<Device> = Vec::new();
        for host_id in cpal::available_hosts() {
            let host_devices = match cpal::host_from_id(host_id)?.devices() {
                Ok(host_devices) => host_devices,
                Err(e) => {
                    error!(
                        err = e.to_string(),
                        host = host_id.name(),
                        "Unable to list devices for host"
                    );
                    continue;
                }
            };

            for device in host_devices {
                let Ok(output_configs) = device.supported_output_configs() else {
                    continue;
                };

                let mut max_channels = 0;
                for output_config in output_configs {
                    if max_channels < output_config.channels() {
                        max_channels = output_config.channels();
                    }
                }

                if max_channels >= 2 {
                    devices.push(Device {
                        name: device.name()?,
                        max_channels,
                        host_id,
                        device,
                        sample_rate,
                    })
                }
            }
        }

        devices.sort_by_key(|device| device.name.to_string());
        Ok(devices)
    }

    /// Gets the given cpal device.
    pub fn get(name: &str, sample_rate: u32) -> Result<Device, Box<dyn Error>> {
        match Device::list_cpal_devices(sample_rate)?
            .into_iter()
            .find(|device| device.name.trim() == name)
        {
            Some(device) => Ok(device),
            None => Err(format!("no device found with name {}", name).into()),
        }
    }
}

impl AudioDevice for Device {
    /// Renders the mixer through a stereo f32 output stream until cancelled.
    fn run(&self, mixer: Arc<Mixer>, cancel_handle: CancelHandle) -> Result<(), Box<dyn Error>> {
        let span = span!(Level::INFO, "run output (cpal)");
        let _enter = span.enter();

        info!(
            device = self.name,
            sample_rate = self.sample_rate,
            "Starting output stream."
        );

        let config = cpal::StreamConfig {
            channels: 2,
            sample_rate: self.sample_rate,
            buffer_size: cpal::BufferSize::Fixed(super::BUFFER_SIZE as u32),
        };

        // Promoted once, from inside the callback, so the right thread gets it.
        let mut priority_set = false;
        let stream = self.device.build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                if !priority_set {
                    promote_callback_thread();
                    priority_set = true;
                }
                mixer.fill(data);
            },
            |err| error!("cpal output stream error: {}", err),
            None,
        )?;
        stream.play()?;

        cancel_handle.wait();
        info!(device = self.name, "Output stream stopped.");
        Ok(())
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

fn promote_callback_thread() {
    match ThreadPriorityValue::try_from(CALLBACK_THREAD_PRIORITY) {
        Ok(priority) => {
            if let Err(e) = set_current_thread_priority(ThreadPriority::Crossplatform(priority)) {
                warn!(
                    err = format!("{:?}", e),
                    "Unable to promote audio callback thread."
                );
            }
        }
        Err(e) => warn!(
            err = format!("{:?}", e),
            "Invalid audio callback thread priority."
        ),
    }
}
