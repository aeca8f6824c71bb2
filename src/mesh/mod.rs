//! Mesh membership and trust

pub mod device;
pub mod manager;

pub use device::Device;
pub use manager::{request_trust_change, MeshService, TrustTable};
