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
use std::error::Error;
use std::fmt;

use cpal::traits::{DeviceTrait, HostTrait};
use tracing::error;

/// An output (playback) device known to cpal.
pub struct OutputDevice {
    /// The human readable name of the device.
    name: String,
    /// The maximum number of output channels the device supports.
    max_channels: u16,
    /// The host ID of the device.
    host_id: cpal::HostId,
    /// The sample format of the device's default output configuration.
    default_sample_format: cpal::SampleFormat,
    /// The underlying cpal device.
    device: cpal::Device,
}

impl OutputDevice {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_channels(&self) -> u16 {
        self.max_channels
    }

    pub fn default_sample_format(&self) -> cpal::SampleFormat {
        self.default_sample_format
    }

    pub fn raw(&self) -> &cpal::Device {
        &self.device
    }
}

impl fmt::Display for OutputDevice {
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

/// An input (capture) device known to cpal.
pub struct InputDevice {
    /// The human readable name of the device.
    name: String,
    /// The maximum number of input channels the device supports.
    max_channels: u16,
    /// The host ID of the device.
    host_id: cpal::HostId,
    /// The sample rate of the device's default input configuration.
    default_sample_rate: u32,
    /// The sample format of the device's default input configuration.
    default_sample_format: cpal::SampleFormat,
    /// The underlying cpal device.
    device: cpal::Device,
}

impl InputDevice {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_channels(&self) -> u16 {
        self.max_channels
    }

    pub fn default_sample_rate(&self) -> u32 {
        self.default_sample_rate
    }

    pub fn default_sample_format(&self) -> cpal::SampleFormat {
        self.default_sample_format
    }

    pub fn raw(&self) -> &cpal::Device {
        &self.device
    }
}

impl fmt::Display for InputDevice {
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

/// Lists output devices across all available hosts.
pub fn list_outputs() -> Result<Vec<OutputDevice>, Box<dyn Error>> {
    // Suppress noisy output here.
    let _shh_stdout = shh::stdout()?;
    let _shh_stderr = shh::stderr()?;

    let mut devices: Vec<OutputDevice> = Vec::new();
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
            let mut max_channels = 0;

            let output_configs = match device.supported_output_configs() {
                Ok(output_configs) => output_configs,
                Err(_) => continue,
            };
            for output_config in output_configs {
                if max_channels < output_config.channels() {
                    max_channels = output_config.channels();
                }
            }

            if max_channels > 0 {
                let default_config = match device.default_output_config() {
                    Ok(default_config) => default_config,
                    Err(_) => continue,
                };
                devices.push(OutputDevice {
                    name: device.name()?,
                    max_channels,
                    host_id,
                    default_sample_format: default_config.sample_format(),
                    device,
                })
            }
        }
    }

    devices.sort_by_key(|device| device.name.to_string());
    Ok(devices)
}

/// Lists input devices across all available hosts.
pub fn list_inputs() -> Result<Vec<InputDevice>, Box<dyn Error>> {
    // Suppress noisy output here.
    let _shh_stdout = shh::stdout()?;
    let _shh_stderr = shh::stderr()?;

    let mut devices: Vec<InputDevice> = Vec::new();
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
            let mut max_channels = 0;

            let input_configs = match device.supported_input_configs() {
                Ok(input_configs) => input_configs,
                Err(_) => continue,
            };
            for input_config in input_configs {
                if max_channels < input_config.channels() {
                    max_channels = input_config.channels();
                }
            }

            if max_channels > 0 {
                let default_config = match device.default_input_config() {
                    Ok(default_config) => default_config,
                    Err(_) => continue,
                };
                devices.push(InputDevice {
                    name: device.name()?,
                    max_channels,
                    host_id,
                    default_sample_rate: default_config.sample_rate().0,
                    default_sample_format: default_config.sample_format(),
                    device,
                })
            }
        }
    }

    devices.sort_by_key(|device| device.name.to_string());
    Ok(devices)
}

/// Gets the output device with the given name, or the system default when no
/// name is given.
pub fn output(name: Option<&str>) -> Result<OutputDevice, Box<dyn Error>> {
    let devices = list_outputs()?;
    match name {
        Some(name) => devices
            .into_iter()
            .find(|device| device.name.trim() == name)
            .ok_or_else(|| format!("no output device found with name {}", name).into()),
        None => {
            let default = cpal::default_host()
                .default_output_device()
                .ok_or("no default output device")?;
            let default_name = default.name()?;
            devices
                .into_iter()
                .find(|device| device.name == default_name)
                .ok_or_else(|| "no default output device".into())
        }
    }
}

/// Gets the input device with the given name, or the system default when no
/// name is given.
pub fn input(name: Option<&str>) -> Result<InputDevice, Box<dyn Error>> {
    let devices = list_inputs()?;
    match name {
        Some(name) => devices
            .into_iter()
            .find(|device| device.name.trim() == name)
            .ok_or_else(|| format!("no input device found with name {}", name).into()),
        None => {
            let default = cpal::default_host()
                .default_input_device()
                .ok_or("no default input device")?;
            let default_name = default.name()?;
            devices
                .into_iter()
                .find(|device| device.name == default_name)
                .ok_or_else(|| "no default input device".into())
        }
    }
}
