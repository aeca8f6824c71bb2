//! UDP socket setup

use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::time::Duration;

use crate::error::NetworkError;

/// How long a blocked receive waits before re-checking for shutdown
pub const READ_TIMEOUT: Duration = Duration::from_millis(250);

const SOCKET_BUFFER_SIZE: usize = 1 << 20;

/// Bind a broadcast-capable UDP socket on all interfaces
pub fn create_socket(port: u16) -> Result<UdpSocket, NetworkError> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
        .map_err(|e| NetworkError::BindFailed(e.to_string()))?;

    socket
        .set_reuse_address(true)
        .map_err(|e| NetworkError::BindFailed(format!("SO_REUSEADDR: {}", e)))?;
    socket
        .set_broadcast(true)
        .map_err(|e| NetworkError::BindFailed(format!("SO_BROADCAST: {}", e)))?;

    // Larger buffers absorb bursts of stream chunks; the OS may clamp these
    if let Err(e) = socket.set_recv_buffer_size(SOCKET_BUFFER_SIZE) {
        tracing::debug!("Could not raise receive buffer: {}", e);
    }
    if let Err(e) = socket.set_send_buffer_size(SOCKET_BUFFER_SIZE) {
        tracing::debug!("Could not raise send buffer: {}", e);
    }

    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    socket
        .bind(&SockAddr::from(addr))
        .map_err(|e| NetworkError::BindFailed(format!("{}: {}", addr, e)))?;

    let socket: UdpSocket = socket.into();
    socket
        .set_read_timeout(Some(READ_TIMEOUT))
        .map_err(|e| NetworkError::BindFailed(e.to_string()))?;

    Ok(socket)
}

/// Subnet-wide broadcast destination for `port`
pub fn broadcast_addr(port: u16) -> SocketAddr {
    SocketAddr::from((Ipv4Addr::BROADCAST, port))
}
