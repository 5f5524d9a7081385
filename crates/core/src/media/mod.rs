//! Media framing: PS/PES muxing and RTP packetization.
//!
//! ## Pipeline
//!
//! One encoded access unit goes through three stages:
//!
//! 1. [`ps`] wraps it into a pack header, an optional system header, a
//!    program stream map and one or more PES units.
//! 2. [`packetizer::PsPacketizer`] splits each PS/PES byte range into
//!    MTU-bounded chunks.
//! 3. [`rtp::RtpHeader`] prefixes each chunk with a 12-byte RTP header
//!    (plus a 2-byte length on stream transports).
//!
//! Every packet is handed to a [`PacketSink`] as soon as it is built. The
//! session's sink is a bounded queue, so a slow network pushes back on the
//! frame producer.
//!
//! ## RTP header fields (RFC 3550)
//!
//! - **Sequence number** (16-bit, wrapping): one per packet, starting at 1.
//! - **Timestamp** (32-bit): the access unit's PTS, not rescaled.
//! - **SSRC** (32-bit): random, fixed for the session.
//! - **Marker bit**: set only on the last packet of an access unit.

pub mod annexb;
pub mod bits;
pub mod packetizer;
pub mod ps;
pub mod rtp;

use std::fmt;
use std::str::FromStr;

use crossbeam_channel::Sender;

use crate::error::{Result, RtpError};

/// Video codec carried in the program stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VideoCodec {
    #[default]
    H264,
    H265,
}

impl VideoCodec {
    /// `stream_type` for the program stream map (ISO/IEC 13818-1 Table 2-34).
    pub fn stream_type(self) -> u8 {
        match self {
            Self::H264 => 0x1B,
            Self::H265 => 0x24,
        }
    }
}

impl fmt::Display for VideoCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::H264 => write!(f, "h264"),
            Self::H265 => write!(f, "h265"),
        }
    }
}

impl FromStr for VideoCodec {
    type Err = RtpError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "h264" | "avc" => Ok(Self::H264),
            "h265" | "hevc" => Ok(Self::H265),
            _ => Err(RtpError::InvalidConfig("unknown video codec")),
        }
    }
}

/// Destination for finished wire packets.
///
/// `push` may block; that is how queue backpressure reaches the producer.
pub trait PacketSink {
    fn push(&mut self, packet: Vec<u8>) -> Result<()>;
}

impl PacketSink for Vec<Vec<u8>> {
    fn push(&mut self, packet: Vec<u8>) -> Result<()> {
        Vec::push(self, packet);
        Ok(())
    }
}

impl PacketSink for Sender<Vec<u8>> {
    fn push(&mut self, packet: Vec<u8>) -> Result<()> {
        self.send(packet).map_err(|_| RtpError::DeliveryStopped)
    }
}

/// Turns access units into wire-ready RTP packets.
///
/// The session drives one packetizer per stream. Implementations own the
/// RTP sequence counter and SSRC, so packets from one packetizer always
/// form a single RTP stream.
pub trait Packetizer: Send {
    /// Packetize one access unit, pushing every packet to `sink` in order.
    ///
    /// Returns the number of packets pushed. An empty access unit yields
    /// no packets.
    fn packetize(
        &mut self,
        access_unit: &[u8],
        key_frame: bool,
        pts: u64,
        sink: &mut dyn PacketSink,
    ) -> Result<usize>;

    /// SSRC stamped on every packet.
    fn ssrc(&self) -> u32;

    /// Sequence number of the next packet.
    fn next_sequence(&self) -> u16;
}
