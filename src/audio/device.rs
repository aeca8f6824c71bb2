//! Output device lookup

use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{BufferSize, SampleRate, StreamConfig};

use crate::error::AudioError;

/// Wrapper around a cpal output device
pub struct AudioDevice {
    inner: cpal::Device,
    pub name: String,
}

impl AudioDevice {
    pub fn from_cpal(device: cpal::Device) -> Self {
        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        Self {
            inner: device,
            name,
        }
    }

    pub fn into_inner(self) -> cpal::Device {
        self.inner
    }

    /// Stream config playing at `sample_rate`, stereo when the device allows it
    pub fn output_config(&self, sample_rate: u32) -> Result<StreamConfig, AudioError> {
        let rate = SampleRate(sample_rate);
        let ranges: Vec<_> = self
            .inner
            .supported_output_configs()
            .map_err(|e| AudioError::DeviceNotFound(e.to_string()))?
            .filter(|range| range.min_sample_rate() <= rate && rate <= range.max_sample_rate())
            .collect();

        let channels = ranges
            .iter()
            .map(|range| range.channels())
            .find(|channels| *channels == 2)
            .or_else(|| ranges.iter().map(|range| range.channels()).max())
            .ok_or_else(|| {
                AudioError::UnsupportedFormat(format!(
                    "{} cannot play at {} Hz",
                    self.name, sample_rate
                ))
            })?;

        Ok(StreamConfig {
            channels,
            sample_rate: rate,
            buffer_size: BufferSize::Default,
        })
    }
}

/// Get default output device
pub fn get_default_output_device() -> Result<AudioDevice, AudioError> {
    let host = cpal::default_host();
    host.default_output_device()
        .map(AudioDevice::from_cpal)
        .ok_or_else(|| AudioError::DeviceNotFound("No default output device".to_string()))
}
