//! Trust record of one device

use crate::protocol::DeviceStatus;

/// Reachability and authorization of a device, as seen by this node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub id: String,
    pub online: bool,
    pub allowed: bool,
}

impl Device {
    pub fn new(id: impl Into<String>, allowed: bool) -> Self {
        Self {
            id: id.into(),
            online: true,
            allowed,
        }
    }

    /// Trust message describing this device
    pub fn status(&self) -> DeviceStatus {
        DeviceStatus {
            device_id: self.id.clone(),
            allowed: self.allowed,
        }
    }
}
