//! Network transports for outbound RTP delivery.
//!
//! A session delivers over exactly one of:
//!
//! - **UDP** ([`udp`]): a socket bound to the local address and connected
//!   to the receiver. One RTP packet per datagram.
//!
//! - **TCP passive** ([`tcp`]): the sender listens on the local address and
//!   streams to the first peer that connects. Packets are length-prefixed
//!   (see [`Framing::LengthPrefixed`]).
//!
//! - **TCP active**: the sender would dial the receiver. Not implemented;
//!   requesting it is a configuration error.

pub mod tcp;
pub mod udp;

use std::fmt;
use std::io::Write;
use std::net::{Shutdown, SocketAddr, TcpStream, UdpSocket};
use std::str::FromStr;

use crate::error::{Result, RtpError};
use crate::media::rtp::Framing;

/// How RTP packets reach the receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportMode {
    #[default]
    Udp,
    TcpPassive,
    TcpActive,
}

impl TransportMode {
    /// Wire framing used on this transport.
    pub fn framing(self) -> Framing {
        match self {
            Self::Udp => Framing::Datagram,
            Self::TcpPassive | Self::TcpActive => Framing::LengthPrefixed,
        }
    }
}

impl fmt::Display for TransportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Udp => write!(f, "udp"),
            Self::TcpPassive => write!(f, "tcp-passive"),
            Self::TcpActive => write!(f, "tcp-active"),
        }
    }
}

impl FromStr for TransportMode {
    type Err = RtpError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "udp" => Ok(Self::Udp),
            "tcp-passive" | "tcp_passive" | "passive" => Ok(Self::TcpPassive),
            "tcp-active" | "tcp_active" | "active" => Ok(Self::TcpActive),
            other => Err(RtpError::UnknownTransport(other.to_string())),
        }
    }
}

/// Numeric transport codes as carried in SDP-style signaling
/// (`0` = UDP, `1` = TCP active, `2` = TCP passive).
impl TryFrom<u8> for TransportMode {
    type Error = RtpError;

    fn try_from(code: u8) -> Result<Self> {
        match code {
            0 => Ok(Self::Udp),
            1 => Ok(Self::TcpActive),
            2 => Ok(Self::TcpPassive),
            other => Err(RtpError::UnknownTransport(other.to_string())),
        }
    }
}

/// The single socket a delivery thread writes to.
#[derive(Debug)]
pub enum Connection {
    Udp(UdpSocket),
    Tcp(TcpStream),
}

impl Connection {
    /// Write one complete wire packet.
    ///
    /// A datagram that goes out short is reported as
    /// [`RtpError::ShortWrite`]; on TCP the whole buffer is written or the
    /// call fails.
    pub fn write_packet(&mut self, packet: &[u8]) -> Result<()> {
        match self {
            Self::Udp(socket) => {
                let written = socket.send(packet)?;
                if written != packet.len() {
                    return Err(RtpError::ShortWrite {
                        written,
                        expected: packet.len(),
                    });
                }
                Ok(())
            }
            Self::Tcp(stream) => {
                stream.write_all(packet)?;
                Ok(())
            }
        }
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        match self {
            Self::Udp(socket) => socket.peer_addr().ok(),
            Self::Tcp(stream) => stream.peer_addr().ok(),
        }
    }

    /// Close the socket. Consumes the connection so it can only happen once.
    pub fn close(self) {
        match self {
            Self::Udp(socket) => drop(socket),
            Self::Tcp(stream) => {
                if let Err(e) = stream.shutdown(Shutdown::Both) {
                    tracing::debug!(error = %e, "TCP shutdown failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_names() {
        assert_eq!("udp".parse::<TransportMode>().unwrap(), TransportMode::Udp);
        assert_eq!(
            "TCP-Passive".parse::<TransportMode>().unwrap(),
            TransportMode::TcpPassive
        );
        assert_eq!(
            "tcp-active".parse::<TransportMode>().unwrap(),
            TransportMode::TcpActive
        );
        assert!(matches!(
            "sctp".parse::<TransportMode>(),
            Err(RtpError::UnknownTransport(_))
        ));
    }

    #[test]
    fn parse_codes() {
        assert_eq!(TransportMode::try_from(0).unwrap(), TransportMode::Udp);
        assert_eq!(TransportMode::try_from(1).unwrap(), TransportMode::TcpActive);
        assert_eq!(TransportMode::try_from(2).unwrap(), TransportMode::TcpPassive);
        assert!(TransportMode::try_from(7).is_err());
    }

    #[test]
    fn display_round_trips() {
        for mode in [
            TransportMode::Udp,
            TransportMode::TcpPassive,
            TransportMode::TcpActive,
        ] {
            assert_eq!(mode.to_string().parse::<TransportMode>().unwrap(), mode);
        }
    }

    #[test]
    fn framing_per_mode() {
        assert_eq!(TransportMode::Udp.framing(), Framing::Datagram);
        assert_eq!(TransportMode::TcpPassive.framing(), Framing::LengthPrefixed);
    }
}
