//! Error types for the audio mesh

use thiserror::Error;

use crate::protocol::Opcode;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum Error {
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Bus error: {0}")]
    Bus(#[from] BusError),

    #[error("Identity error: {0}")]
    Identity(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Audio subsystem errors
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to open stream: {0}")]
    StreamError(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Source failed: {0}")]
    SourceFailed(String),

    #[error("cpal error: {0}")]
    CpalError(String),
}

/// Wire protocol errors. The offending frame is dropped, the peer is not penalized.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Unknown opcode 0x{0:02x}")]
    UnknownOpcode(u8),

    #[error("Malformed {opcode:?} payload: {reason}")]
    MalformedPayload { opcode: Opcode, reason: String },

    #[error("Encoding failed: {0}")]
    Encode(String),
}

/// Network errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Socket bind failed: {0}")]
    BindFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    #[error("Packet too large: {0} bytes")]
    PacketTooLarge(usize),

    #[error("Failed to spawn {0} thread: {1}")]
    Spawn(&'static str, String),
}

/// Inbound traffic that is well-formed but not acceptable. Dropped silently.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PolicyViolation {
    #[error("Announce echoed from this device")]
    SelfEcho,

    #[error("Service number mismatch: expected 0x{expected:08x}, got 0x{got:08x}")]
    ServiceMismatch { expected: u32, got: u32 },

    #[error("Internal message {0:?} received from the network")]
    InternalOpcode(Opcode),
}

/// Message bus errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    #[error("Message bus is closed")]
    Closed,

    #[error("Failed to spawn bus thread: {0}")]
    Spawn(String),
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, Error>;
