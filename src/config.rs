//! Application configuration
//!
//! Loaded from a TOML file. Every section and field is optional; missing
//! values fall back to the defaults below.
//!
//! ```toml
//! [discovery]
//! port = 19416
//!
//! [mesh]
//! auto_accept = true
//!
//! [streamer]
//! auto_start = false
//! playlist_dir = "/srv/music"
//! resampling_rate = 44100
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::constants::{DEFAULT_DISCOVERY_PORT, DEFAULT_SAMPLE_RATE};
use crate::error::{Error, Result};

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub discovery: DiscoveryConfig,
    pub mesh: MeshConfig,
    pub streamer: StreamerConfig,
}

/// Peer discovery settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// UDP port used for announces and all mesh traffic
    pub port: u16,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_DISCOVERY_PORT,
        }
    }
}

/// Mesh trust settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    /// Trust newly discovered devices without operator action
    pub auto_accept: bool,
}

/// Audio producer settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamerConfig {
    /// Start streaming as soon as the node is up
    pub auto_start: bool,
    /// Directory holding the files to play
    pub playlist_dir: PathBuf,
    /// Mesh-wide playback rate sources are normalized to
    pub resampling_rate: u32,
}

impl Default for StreamerConfig {
    fn default() -> Self {
        Self {
            auto_start: false,
            playlist_dir: PathBuf::from("."),
            resampling_rate: DEFAULT_SAMPLE_RATE,
        }
    }
}

impl AppConfig {
    /// Parse configuration from TOML text
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(text) => Self::from_toml(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No config at {}, using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(Error::Config(format!("{}: {}", path.display(), e))),
        }
    }

    /// Per-user configuration file location
    pub fn default_path() -> Option<PathBuf> {
        crate::identity::project_dirs().map(|dirs| dirs.config_dir().join("config.toml"))
    }

    pub fn validate(&self) -> Result<()> {
        if self.streamer.resampling_rate == 0 {
            return Err(Error::Config("streamer.resampling_rate must be non-zero".into()));
        }
        Ok(())
    }
}
