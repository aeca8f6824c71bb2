//! Stable device identity
//!
//! A random UUID generated on first start and kept in the per-user config
//! directory, so a device is known by the same name across restarts.

use directories::ProjectDirs;
use std::fmt;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::error::{Error, Result};

const ID_FILE: &str = "device-id";

/// Mesh-wide name of this installation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceId(Uuid);

impl DeviceId {
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Read the id stored in `dir`, creating and storing a fresh one if absent
    pub fn load_or_create(dir: &Path) -> Result<Self> {
        let path = dir.join(ID_FILE);

        match std::fs::read_to_string(&path) {
            Ok(text) => {
                let id = Uuid::parse_str(text.trim())
                    .map_err(|e| Error::Identity(format!("{}: {}", path.display(), e)))?;
                Ok(Self(id))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let id = Self::random();
                std::fs::create_dir_all(dir)?;
                std::fs::write(&path, id.to_string())?;
                tracing::info!("Generated new device id {} in {}", id, path.display());
                Ok(id)
            }
            Err(e) => Err(Error::Identity(format!("{}: {}", path.display(), e))),
        }
    }

    /// Default storage directory for the id
    pub fn default_dir() -> Result<PathBuf> {
        project_dirs()
            .map(|dirs| dirs.config_dir().to_path_buf())
            .ok_or_else(|| Error::Identity("no home directory to store the device id".into()))
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

pub(crate) fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "lan-audio-mesh")
}
