use std::net::{SocketAddr, UdpSocket};

use crate::error::Result;

/// Open a UDP socket bound to `local` and connected to `remote`.
///
/// Connecting fixes the destination, so every later `send` goes to the
/// receiver without an address argument, and ICMP errors for that peer are
/// reported on the socket.
pub fn connect(local: SocketAddr, remote: SocketAddr) -> Result<UdpSocket> {
    let socket = UdpSocket::bind(local)?;
    socket.connect(remote)?;
    tracing::debug!(
        local = %socket.local_addr()?,
        %remote,
        "UDP socket connected"
    );
    Ok(socket)
}
