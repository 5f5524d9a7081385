/// Size of the RTP fixed header in bytes.
pub const RTP_HEADER_LEN: usize = 12;

/// Size of the length prefix used on stream transports.
pub const LENGTH_PREFIX_LEN: usize = 2;

/// How an encoded RTP packet is framed for the wire.
///
/// Datagram transports carry one packet per datagram, so the packet is
/// sent as-is. Stream transports need packet boundaries recovered by the
/// reader, so every packet is preceded by a 2-byte big-endian length.
///
/// ```text
/// Datagram:        [RTP header (12)][payload]
/// LengthPrefixed:  [len (2)][RTP header (12)][payload]   len = 12 + payload
/// ```
///
/// This is not the RFC 2326 §10.12 interleaved framing: there is no `$`
/// marker and no channel byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    Datagram,
    LengthPrefixed,
}

/// RTP fixed header writer (RFC 3550 §5.1).
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |V=2|P|X|  CC   |M|     PT      |       Sequence Number         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                           Timestamp                           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                             SSRC                              |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// Holds the per-session sequence counter and SSRC. The timestamp is not
/// tracked here: every packet carries the presentation timestamp of the
/// access unit it belongs to, truncated to 32 bits. No 90 kHz rescaling is
/// applied; the caller's PTS is expected to already be on the RTP clock.
#[derive(Debug)]
pub struct RtpHeader {
    /// RTP payload type (7-bit, RFC 3551).
    pub pt: u8,
    /// Synchronization source identifier (RFC 3550 §8.1).
    pub ssrc: u32,
    sequence: u16,
}

impl RtpHeader {
    /// Create a new header state with explicit SSRC.
    pub fn new(pt: u8, ssrc: u32) -> Self {
        tracing::debug!(
            pt,
            ssrc = format_args!("{:#010X}", ssrc),
            "RTP header state created"
        );
        Self {
            pt: pt & 0x7f,
            ssrc,
            sequence: 0,
        }
    }

    /// Create with an SSRC drawn from the process-wide RNG.
    pub fn with_random_ssrc(pt: u8) -> Self {
        Self::new(pt, rand::random::<u32>())
    }

    /// Sequence number of the last packet written, 0 before the first.
    pub fn sequence(&self) -> u16 {
        self.sequence
    }

    /// Advance the sequence number and serialize a 12-byte RTP fixed header.
    ///
    /// The first packet of a stream carries sequence 1.
    pub fn write(&mut self, marker: bool, timestamp: u32) -> [u8; RTP_HEADER_LEN] {
        self.sequence = self.sequence.wrapping_add(1);

        let mut header = [0u8; RTP_HEADER_LEN];
        header[0] = 2 << 6;
        header[1] = ((marker as u8) << 7) | self.pt;
        header[2..4].copy_from_slice(&self.sequence.to_be_bytes());
        header[4..8].copy_from_slice(&timestamp.to_be_bytes());
        header[8..12].copy_from_slice(&self.ssrc.to_be_bytes());
        header
    }

    /// Build one complete wire packet around `payload`.
    pub fn encode(&mut self, payload: &[u8], marker: bool, pts: u64, framing: Framing) -> Vec<u8> {
        let header = self.write(marker, pts as u32);
        let rtp_len = RTP_HEADER_LEN + payload.len();

        match framing {
            Framing::Datagram => {
                let mut packet = Vec::with_capacity(rtp_len);
                packet.extend_from_slice(&header);
                packet.extend_from_slice(payload);
                packet
            }
            Framing::LengthPrefixed => {
                let mut packet = Vec::with_capacity(LENGTH_PREFIX_LEN + rtp_len);
                packet.extend_from_slice(&(rtp_len as u16).to_be_bytes());
                packet.extend_from_slice(&header);
                packet.extend_from_slice(payload);
                packet
            }
        }
    }
}
