//! Peer transport over UDP broadcast

pub mod peers;
pub mod transport;
pub mod udp;

pub use peers::{Peer, PeerTable};
pub use transport::{classify, Inbound, PeerTransport, Rejection, TransportHandle, TransportStats};
pub use udp::create_socket;
