//! Mesh message vocabulary
//!
//! Every message travelling over the wire or across the in-process bus is a
//! [`Message`]. Each variant maps to exactly one [`Opcode`], which is the first
//! byte of a wire frame:
//!
//! ```text
//! ┌──────────┬────────────────────────────┐
//! │ opcode   │ payload (bincode, varint)  │
//! │ 1 byte   │ variable                   │
//! └──────────┴────────────────────────────┘
//! ```
//!
//! Opcodes `0xF0..=0xF2` are internal: they are produced and consumed inside a
//! single process and are refused when they arrive from the network.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// Mesh service identifier. Announces carrying another value come from an
/// incompatible protocol version and are ignored.
pub const SERVICE_NUMBER: u32 = 0xECC3_77BC;

/// Write request target addressing every known peer
pub const BROADCAST_TARGET: &str = "*";

/// One-byte message discriminant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Opcode {
    Announce = 0x00,
    DeviceStatus = 0x10,
    StreamData = 0x20,
    PeerOnline = 0xF0,
    PeerOffline = 0xF1,
    WriteRequest = 0xF2,
}

impl Opcode {
    /// Convert from raw byte value
    pub fn from_byte(byte: u8) -> Result<Self, ProtocolError> {
        match byte {
            0x00 => Ok(Self::Announce),
            0x10 => Ok(Self::DeviceStatus),
            0x20 => Ok(Self::StreamData),
            0xF0 => Ok(Self::PeerOnline),
            0xF1 => Ok(Self::PeerOffline),
            0xF2 => Ok(Self::WriteRequest),
            _ => Err(ProtocolError::UnknownOpcode(byte)),
        }
    }

    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// Whether this opcode only ever travels inside one process
    pub fn is_internal(self) -> bool {
        matches!(self, Self::PeerOnline | Self::PeerOffline | Self::WriteRequest)
    }
}

/// Discovery beacon, broadcast once per tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Announce {
    pub service_number: u32,
    pub device_name: String,
    /// Address peers should answer to, when it differs from the datagram source
    pub return_address: Option<String>,
}

impl Announce {
    pub fn new(device_name: impl Into<String>) -> Self {
        Self {
            service_number: SERVICE_NUMBER,
            device_name: device_name.into(),
            return_address: None,
        }
    }
}

/// Trust state of one device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceStatus {
    pub device_id: String,
    pub allowed: bool,
}

/// One stereo audio chunk and the wall-clock instant its first frame plays at
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamData {
    pub samples_left: Vec<f64>,
    pub samples_right: Vec<f64>,
    /// Nanoseconds since the Unix epoch
    pub next_at: i64,
}

impl StreamData {
    pub fn from_frames(frames: &[[f64; 2]], next_at: i64) -> Self {
        let (samples_left, samples_right) = frames.iter().map(|f| (f[0], f[1])).unzip();
        Self {
            samples_left,
            samples_right,
            next_at,
        }
    }

    /// Number of usable frames. Channels of unequal length are truncated to
    /// the shorter one.
    pub fn frame_count(&self) -> usize {
        self.samples_left.len().min(self.samples_right.len())
    }

    /// Paired stereo frames
    pub fn frames(&self) -> impl Iterator<Item = [f64; 2]> + '_ {
        self.samples_left
            .iter()
            .zip(self.samples_right.iter())
            .map(|(l, r)| [*l, *r])
    }
}

/// Transport noticed a peer, either for the first time or again after eviction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerOnline {
    pub device_id: String,
}

/// Transport stopped hearing from a peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerOffline {
    pub device_id: String,
}

/// Ask the transport to send an encoded frame to one peer or to all of them
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteRequest {
    /// Device id, or [`BROADCAST_TARGET`]
    pub target: String,
    pub payload: Bytes,
}

impl WriteRequest {
    pub fn broadcast(payload: Bytes) -> Self {
        Self {
            target: BROADCAST_TARGET.to_string(),
            payload,
        }
    }

    pub fn to(device_id: impl Into<String>, payload: Bytes) -> Self {
        Self {
            target: device_id.into(),
            payload,
        }
    }

    pub fn is_broadcast(&self) -> bool {
        self.target == BROADCAST_TARGET
    }
}

/// Every message known to the mesh
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Announce(Announce),
    DeviceStatus(DeviceStatus),
    StreamData(StreamData),
    PeerOnline(PeerOnline),
    PeerOffline(PeerOffline),
    WriteRequest(WriteRequest),
}

impl Message {
    pub fn opcode(&self) -> Opcode {
        match self {
            Message::Announce(_) => Opcode::Announce,
            Message::DeviceStatus(_) => Opcode::DeviceStatus,
            Message::StreamData(_) => Opcode::StreamData,
            Message::PeerOnline(_) => Opcode::PeerOnline,
            Message::PeerOffline(_) => Opcode::PeerOffline,
            Message::WriteRequest(_) => Opcode::WriteRequest,
        }
    }
}

macro_rules! impl_from_payload {
    ($($variant:ident),* $(,)?) => {
        $(
            impl From<$variant> for Message {
                fn from(payload: $variant) -> Self {
                    Message::$variant(payload)
                }
            }
        )*
    };
}

impl_from_payload!(
    Announce,
    DeviceStatus,
    StreamData,
    PeerOnline,
    PeerOffline,
    WriteRequest,
);
