//! # LAN Audio Mesh
//!
//! Devices on a local network discover each other, agree on who is trusted,
//! and play one audio source at the same wall-clock instant everywhere.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                 DEVICE                                  │
//! │                                                                         │
//! │   UDP :19416 ◄──────────────────────────────────────────────┐           │
//! │      │                                                      │           │
//! │      ▼                                                      │           │
//! │  ┌──────────────┐  Sighting   ┌──────────────────┐  send_to │           │
//! │  │   listener   │────────────►│  transport loop  │──────────┘           │
//! │  │ (network::)  │             │  peer table,     │                      │
//! │  └──────┬───────┘             │  ticker, writer  │                      │
//! │         │ relay                └───▲──────┬──────┘                      │
//! │         │                   Write  │      │ PeerOnline / PeerOffline    │
//! │         ▼                  Request │      ▼                             │
//! │  ┌───────────────────────────────────────────────────────────────────┐  │
//! │  │                     Message bus (bus::)                           │  │
//! │  │            opcode ──► [mailbox, mailbox, ...]                     │  │
//! │  └───────┬───────────────────────────▲───────────────────┬───────────┘  │
//! │          │ PeerOnline/Offline,        │ StreamData,       │ StreamData  │
//! │          │ DeviceStatus               │ WriteRequest      │             │
//! │          ▼                            │                   ▼             │
//! │  ┌──────────────┐            ┌────────┴───────┐   ┌────────────────┐    │
//! │  │ mesh trust   │            │ streamer       │   │ playout        │    │
//! │  │ (mesh::)     │            │ (sync::)       │   │ scheduler      │    │
//! │  └──────────────┘            └────────────────┘   └───────┬────────┘    │
//! │                                                           │ release     │
//! │                                                           ▼             │
//! │                                                   ┌────────────────┐    │
//! │                                                   │ render buffer  │◄─ cpal pull
//! │                                                   └────────────────┘    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod bus;
pub mod codec;
pub mod config;
pub mod context;
pub mod error;
pub mod identity;
pub mod mesh;
pub mod network;
pub mod node;
pub mod protocol;
pub mod shutdown;
pub mod sync;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    use std::time::Duration;

    /// Default UDP port for discovery and mesh traffic
    pub const DEFAULT_DISCOVERY_PORT: u16 = 19416;

    /// Default mesh-wide playback sample rate
    pub const DEFAULT_SAMPLE_RATE: u32 = 44100;

    /// Largest UDP payload over IPv4
    pub const MAX_DATAGRAM_SIZE: usize = 65_507;

    /// Announce and liveness sweep period
    pub const TICK_INTERVAL: Duration = Duration::from_secs(1);

    /// A peer silent for this many ticks is considered gone
    pub const PEER_TIMEOUT_TICKS: u32 = 3;

    /// Pending publish commands before publishers block
    pub const BUS_CAPACITY: usize = 1024;

    /// Default inbound queue size of a bus subscriber
    pub const MAILBOX_CAPACITY: usize = 256;

    /// Frames per stream chunk
    pub const BLOCK_FRAMES: usize = 512;

    /// Lead time between producing a chunk and playing it
    pub const LOOKAHEAD: Duration = Duration::from_secs(2);

    /// A chunk this close to its play time is released
    pub const ARRIVAL_WINDOW: Duration = Duration::from_millis(1);

    /// How far ahead of its play time a chunk is handed to the render buffer.
    /// Must cover one output callback block plus the device output latency.
    pub const RELEASE_HORIZON: Duration = Duration::from_millis(100);

    /// Largest block the output callback renders in one pass
    pub const MAX_CALLBACK_FRAMES: usize = 4096;

    /// A chunk or frame later than this is discarded unplayed
    pub const LATE_TOLERANCE: Duration = Duration::from_millis(10);

    /// Release loop sleep when nothing is pending
    pub const IDLE_POLL: Duration = Duration::from_millis(5);

    /// Upper bound on chunks waiting for their play time
    pub const MAX_PENDING_CHUNKS: usize = 4096;

    /// Render buffer capacity in seconds of audio
    pub const RENDER_BUFFER_SECONDS: usize = 10;
}
