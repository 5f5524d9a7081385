use std::net::{SocketAddr, TcpListener, TcpStream};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, TryRecvError};

use crate::error::Result;

/// How often the accept loop wakes up to check for a stop request.
pub const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Bind a non-blocking listener for passive-mode delivery.
pub fn listen(local: SocketAddr) -> Result<TcpListener> {
    let listener = TcpListener::bind(local)?;
    listener.set_nonblocking(true)?;
    tracing::debug!(local = %listener.local_addr()?, "TCP listener bound");
    Ok(listener)
}

/// Non-blocking accept of exactly one receiver connection.
///
/// Accept errors are logged and retried indefinitely. The `stop` channel is
/// checked between attempts with a 50ms poll interval; a message or a
/// disconnected sender ends the wait with `None`.
pub fn accept_one(listener: &TcpListener, stop: &Receiver<()>) -> Option<TcpStream> {
    loop {
        match stop.try_recv() {
            Err(TryRecvError::Empty) => {}
            Ok(()) | Err(TryRecvError::Disconnected) => {
                tracing::debug!("accept abandoned on stop request");
                return None;
            }
        }

        match listener.accept() {
            Ok((stream, peer)) => {
                if let Err(e) = stream.set_nonblocking(false) {
                    tracing::warn!(%peer, error = %e, "dropping receiver connection");
                    continue;
                }
                tracing::info!(%peer, "receiver connected");
                return Some(stream);
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL_INTERVAL);
            }
            Err(e) => {
                tracing::warn!(error = %e, "TCP accept error");
                thread::sleep(ACCEPT_POLL_INTERVAL);
            }
        }
    }
}
