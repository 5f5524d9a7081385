use super::ps::{Encapsulator, PES_MAX_PAYLOAD, PsMuxer, STREAM_ID_VIDEO};
use super::rtp::{Framing, RTP_HEADER_LEN, RtpHeader};
use super::{PacketSink, Packetizer};
use crate::error::{Result, RtpError};

/// Default upper bound on RTP header + payload, leaving room for IP/UDP
/// headers inside a 1500-byte Ethernet MTU.
pub const DEFAULT_MAX_RTP_PACKET_SIZE: usize = 1460;

/// P-STD video buffer bound written into key-frame system headers.
pub const SYSTEM_HEADER_VIDEO_BOUND: u16 = 2048;
/// P-STD audio buffer bound written into key-frame system headers.
pub const SYSTEM_HEADER_AUDIO_BOUND: u16 = 512;

/// MPEG-PS over RTP packetizer.
///
/// Each access unit becomes:
///
/// ```text
/// range 0:  [pack hdr][system hdr]?[PSM][PES hdr][data 0 .. N)
/// range 1:  [PES hdr][data N .. 2N)
/// ...
/// ```
///
/// where `N` is [`PES_MAX_PAYLOAD`]. Each range is then cut into RTP
/// payloads of at most `max_rtp_packet_size - 12` bytes. The PS/RTP
/// boundaries are independent: an RTP payload may start in the middle of a
/// PES header.
///
/// ## Marker bit
///
/// Only the final RTP packet of the final range carries the marker, so a
/// receiver sees exactly one marker per access unit.
#[derive(Debug)]
pub struct PsPacketizer<E = PsMuxer> {
    header: RtpHeader,
    muxer: E,
    framing: Framing,
    max_rtp_packet_size: usize,
}

impl PsPacketizer<PsMuxer> {
    /// Create with explicit payload type and SSRC and an H.264 muxer.
    pub fn new(pt: u8, ssrc: u32, framing: Framing) -> Self {
        Self::with_muxer(RtpHeader::new(pt, ssrc), PsMuxer::default(), framing)
    }
}

impl<E: Encapsulator> PsPacketizer<E> {
    pub fn with_muxer(header: RtpHeader, muxer: E, framing: Framing) -> Self {
        Self {
            header,
            muxer,
            framing,
            max_rtp_packet_size: DEFAULT_MAX_RTP_PACKET_SIZE,
        }
    }

    /// Set the RTP packet size limit (12-byte header + payload).
    ///
    /// Must leave room for at least one payload byte and, for the 2-byte
    /// length prefix, must fit in 16 bits.
    pub fn set_max_rtp_packet_size(&mut self, size: usize) -> Result<()> {
        if size <= RTP_HEADER_LEN {
            return Err(RtpError::InvalidConfig(
                "max RTP packet size must exceed the 12-byte header",
            ));
        }
        if size > u16::MAX as usize {
            return Err(RtpError::InvalidConfig(
                "max RTP packet size must fit in 16 bits",
            ));
        }
        self.max_rtp_packet_size = size;
        Ok(())
    }

    pub fn max_rtp_packet_size(&self) -> usize {
        self.max_rtp_packet_size
    }

    /// Split one PS/PES byte range into RTP packets.
    ///
    /// The marker is set only on the last packet of the range, and only
    /// when `last_range_of_frame` is true. Returns the number of packets
    /// pushed.
    pub fn fragment(
        &mut self,
        range: &[u8],
        pts: u64,
        last_range_of_frame: bool,
        sink: &mut dyn PacketSink,
    ) -> Result<usize> {
        let max_payload = self.max_rtp_packet_size - RTP_HEADER_LEN;
        let mut chunks = range.chunks(max_payload).peekable();
        let mut count = 0;

        while let Some(chunk) = chunks.next() {
            let marker = last_range_of_frame && chunks.peek().is_none();
            sink.push(self.header.encode(chunk, marker, pts, self.framing))?;
            count += 1;
        }

        if count > 1 {
            tracing::trace!(
                range_len = range.len(),
                fragments = count,
                "PS range fragmented"
            );
        }

        Ok(count)
    }
}

impl<E: Encapsulator> Packetizer for PsPacketizer<E> {
    fn packetize(
        &mut self,
        access_unit: &[u8],
        key_frame: bool,
        pts: u64,
        sink: &mut dyn PacketSink,
    ) -> Result<usize> {
        if access_unit.is_empty() {
            tracing::trace!(pts, "empty access unit skipped");
            return Ok(0);
        }

        let mut ps = self.muxer.pack_header(pts);
        if key_frame {
            self.muxer.append_system_header(
                &mut ps,
                SYSTEM_HEADER_VIDEO_BOUND,
                SYSTEM_HEADER_AUDIO_BOUND,
            );
        }
        self.muxer.append_program_map(&mut ps);

        let pes_count = access_unit.len().div_ceil(PES_MAX_PAYLOAD);
        let mut packets = 0;

        for (i, chunk) in access_unit.chunks(PES_MAX_PAYLOAD).enumerate() {
            let pes = self.muxer.pes_unit(chunk, STREAM_ID_VIDEO, pts, pts);
            let range = if i == 0 {
                let mut first = std::mem::take(&mut ps);
                first.extend_from_slice(&pes);
                first
            } else {
                pes
            };
            packets += self.fragment(&range, pts, i + 1 == pes_count, sink)?;
        }

        tracing::trace!(
            pes_count,
            rtp_packets = packets,
            frame_bytes = access_unit.len(),
            key_frame,
            seq = self.header.sequence(),
            pts,
            "frame packetized"
        );

        Ok(packets)
    }

    fn ssrc(&self) -> u32 {
        self.header.ssrc
    }

    fn next_sequence(&self) -> u16 {
        self.header.sequence().wrapping_add(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::ps::{PACK_HEADER_LEN, PES_HEADER_LEN, PROGRAM_MAP_LEN, SYSTEM_HEADER_LEN};

    const SSRC: u32 = 0x1122_3344;

    fn make_packetizer(max: usize) -> PsPacketizer {
        let mut p = PsPacketizer::new(96, SSRC, Framing::Datagram);
        p.set_max_rtp_packet_size(max).unwrap();
        p
    }

    fn marker(packet: &[u8]) -> bool {
        packet[1] & 0x80 != 0
    }

    fn seq(packet: &[u8]) -> u16 {
        u16::from_be_bytes([packet[2], packet[3]])
    }

    fn payloads(packets: &[Vec<u8>]) -> Vec<u8> {
        packets
            .iter()
            .flat_map(|p| p[RTP_HEADER_LEN..].iter().copied())
            .collect()
    }

    // --- Fragmenter ---

    #[test]
    fn small_range_single_packet() {
        let mut p = make_packetizer(DEFAULT_MAX_RTP_PACKET_SIZE);
        let mut out: Vec<Vec<u8>> = Vec::new();
        let n = p.fragment(&[0xAB; 100], 0, true, &mut out).unwrap();
        assert_eq!(n, 1);
        assert_eq!(out[0].len(), RTP_HEADER_LEN + 100);
        assert!(marker(&out[0]));
    }

    #[test]
    fn single_packet_without_last_flag_has_no_marker() {
        let mut p = make_packetizer(DEFAULT_MAX_RTP_PACKET_SIZE);
        let mut out: Vec<Vec<u8>> = Vec::new();
        p.fragment(&[0xAB; 100], 0, false, &mut out).unwrap();
        assert!(!marker(&out[0]));
    }

    #[test]
    fn range_exactly_at_limit_is_not_split() {
        let mut p = make_packetizer(112);
        let mut out: Vec<Vec<u8>> = Vec::new();
        assert_eq!(p.fragment(&[1; 100], 0, true, &mut out).unwrap(), 1);
        assert_eq!(out[0].len(), 112);
    }

    #[test]
    fn fragment_count_and_reassembly() {
        let mut p = make_packetizer(112);
        let range: Vec<u8> = (0..1001u32).map(|i| i as u8).collect();
        let mut out: Vec<Vec<u8>> = Vec::new();
        let n = p.fragment(&range, 0, true, &mut out).unwrap();

        assert_eq!(n, range.len().div_ceil(100));
        assert!(out.iter().all(|pkt| pkt.len() <= 112));
        assert_eq!(payloads(&out), range);
    }

    #[test]
    fn marker_only_on_last_fragment_of_last_range() {
        let mut p = make_packetizer(112);
        let mut out: Vec<Vec<u8>> = Vec::new();
        p.fragment(&[0; 250], 0, false, &mut out).unwrap();
        assert!(out.iter().all(|pkt| !marker(pkt)));

        out.clear();
        p.fragment(&[0; 250], 0, true, &mut out).unwrap();
        let markers: Vec<bool> = out.iter().map(|pkt| marker(pkt)).collect();
        assert_eq!(markers, vec![false, false, true]);
    }

    #[test]
    fn invalid_packet_sizes_rejected() {
        let mut p = make_packetizer(DEFAULT_MAX_RTP_PACKET_SIZE);
        assert!(p.set_max_rtp_packet_size(RTP_HEADER_LEN).is_err());
        assert!(p.set_max_rtp_packet_size(70_000).is_err());
        assert_eq!(p.max_rtp_packet_size(), DEFAULT_MAX_RTP_PACKET_SIZE);
    }

    // --- Frame packetizer ---

    #[test]
    fn key_frame_prefix_layout() {
        let mut p = make_packetizer(DEFAULT_MAX_RTP_PACKET_SIZE);
        let frame = [0u8, 0, 0, 1, 0x65, 0x88, 0x84];
        let mut out: Vec<Vec<u8>> = Vec::new();
        assert_eq!(p.packetize(&frame, true, 3600, &mut out).unwrap(), 1);

        let body = &out[0][RTP_HEADER_LEN..];
        assert_eq!(&body[..4], &[0x00, 0x00, 0x01, 0xBA]);
        let sys = PACK_HEADER_LEN;
        assert_eq!(&body[sys..sys + 4], &[0x00, 0x00, 0x01, 0xBB]);
        let psm = sys + SYSTEM_HEADER_LEN;
        assert_eq!(&body[psm..psm + 4], &[0x00, 0x00, 0x01, 0xBC]);
        let pes = psm + PROGRAM_MAP_LEN;
        assert_eq!(&body[pes..pes + 4], &[0x00, 0x00, 0x01, 0xE0]);
        assert_eq!(&body[pes + PES_HEADER_LEN..], &frame);
        assert!(marker(&out[0]));
    }

    #[test]
    fn non_key_frame_has_no_system_header() {
        let mut p = make_packetizer(DEFAULT_MAX_RTP_PACKET_SIZE);
        let frame = [0u8, 0, 0, 1, 0x41, 0x9a];
        let mut out: Vec<Vec<u8>> = Vec::new();
        p.packetize(&frame, false, 0, &mut out).unwrap();

        let body = &out[0][RTP_HEADER_LEN..];
        assert_eq!(
            body.len(),
            PACK_HEADER_LEN + PROGRAM_MAP_LEN + PES_HEADER_LEN + frame.len()
        );
        assert_eq!(
            &body[PACK_HEADER_LEN..PACK_HEADER_LEN + 4],
            &[0x00, 0x00, 0x01, 0xBC]
        );
    }

    #[test]
    fn three_fragment_frame() {
        // 14 + 24 + 19 + 200 = 257 bytes of PS -> 100 + 100 + 57
        let mut p = make_packetizer(112);
        let mut out: Vec<Vec<u8>> = Vec::new();
        let n = p.packetize(&[0x11; 200], false, 0, &mut out).unwrap();
        assert_eq!(n, 3);

        let markers: Vec<bool> = out.iter().map(|pkt| marker(pkt)).collect();
        assert_eq!(markers, vec![false, false, true]);
        let seqs: Vec<u16> = out.iter().map(|pkt| seq(pkt)).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
    }

    #[test]
    fn large_frame_splits_into_pes_units() {
        let mut p = make_packetizer(DEFAULT_MAX_RTP_PACKET_SIZE);
        let frame = vec![0x5A; PES_MAX_PAYLOAD + 1000];
        let mut out: Vec<Vec<u8>> = Vec::new();
        p.packetize(&frame, true, 0, &mut out).unwrap();

        let stream = payloads(&out);
        let prefix = PACK_HEADER_LEN + SYSTEM_HEADER_LEN + PROGRAM_MAP_LEN;
        let second_pes = prefix + PES_HEADER_LEN + PES_MAX_PAYLOAD;
        assert_eq!(stream.len(), second_pes + PES_HEADER_LEN + 1000);
        assert_eq!(&stream[prefix..prefix + 4], &[0x00, 0x00, 0x01, 0xE0]);
        assert_eq!(
            &stream[second_pes..second_pes + 4],
            &[0x00, 0x00, 0x01, 0xE0]
        );
        // PS prefix appears once per frame
        assert_eq!(
            stream.windows(4).filter(|w| *w == [0, 0, 1, 0xBA]).count(),
            1
        );

        let marked: Vec<usize> = out
            .iter()
            .enumerate()
            .filter(|(_, pkt)| marker(pkt))
            .map(|(i, _)| i)
            .collect();
        assert_eq!(marked, vec![out.len() - 1]);
    }

    #[test]
    fn sequence_continues_across_frames() {
        let mut p = make_packetizer(112);
        let mut out: Vec<Vec<u8>> = Vec::new();
        for pts in [0u64, 3600, 7200] {
            p.packetize(&[0x22; 300], pts == 0, pts, &mut out).unwrap();
        }
        for pair in out.windows(2) {
            assert_eq!(seq(&pair[1]), seq(&pair[0]).wrapping_add(1));
        }
        assert!(
            out.iter()
                .all(|pkt| u32::from_be_bytes([pkt[8], pkt[9], pkt[10], pkt[11]]) == SSRC)
        );
        assert_eq!(seq(&out[0]), 1);
        assert_eq!(p.next_sequence() as usize, out.len() + 1);
    }

    #[test]
    fn empty_frame_emits_nothing() {
        let mut p = make_packetizer(DEFAULT_MAX_RTP_PACKET_SIZE);
        let mut out: Vec<Vec<u8>> = Vec::new();
        assert_eq!(p.packetize(&[], true, 0, &mut out).unwrap(), 0);
        assert!(out.is_empty());
        assert_eq!(p.next_sequence(), 1);
    }

    #[test]
    fn length_prefixed_framing() {
        let mut p = PsPacketizer::new(96, SSRC, Framing::LengthPrefixed);
        p.set_max_rtp_packet_size(112).unwrap();
        let mut out: Vec<Vec<u8>> = Vec::new();
        p.packetize(&[0x33; 200], false, 0, &mut out).unwrap();
        for pkt in &out {
            let len = u16::from_be_bytes([pkt[0], pkt[1]]) as usize;
            assert_eq!(len, pkt.len() - 2);
            assert!(len <= 112);
        }
    }

    #[test]
    fn pts_written_to_every_packet() {
        let mut p = make_packetizer(112);
        let mut out: Vec<Vec<u8>> = Vec::new();
        p.packetize(&[0x44; 300], false, 180_000, &mut out).unwrap();
        assert!(
            out.iter()
                .all(|pkt| u32::from_be_bytes([pkt[4], pkt[5], pkt[6], pkt[7]]) == 180_000)
        );
    }
}
