//! Startup context handed to every component

use std::sync::Arc;

use crate::config::AppConfig;
use crate::identity::DeviceId;

/// Identity and configuration, built once at startup and shared read-only
#[derive(Debug, Clone)]
pub struct Context {
    device_id: DeviceId,
    device_name: String,
    pub config: AppConfig,
}

impl Context {
    pub fn new(device_id: DeviceId, config: AppConfig) -> Arc<Self> {
        Arc::new(Self {
            device_id,
            device_name: device_id.to_string(),
            config,
        })
    }

    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    /// Name this device announces itself with
    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Mesh-wide playback sample rate
    pub fn sample_rate(&self) -> u32 {
        self.config.streamer.resampling_rate
    }
}
