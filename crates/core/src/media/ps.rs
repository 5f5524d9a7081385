//! MPEG-2 Program Stream muxing (ISO/IEC 13818-1 §2.5).
//!
//! A PS-over-RTP access unit on the wire looks like:
//!
//! ```text
//! [pack header][system header]?[program stream map][PES][PES]...
//! ```
//!
//! The system header is only emitted ahead of key frames. The muxer
//! produces each piece separately; [`super::packetizer::PsPacketizer`]
//! decides the order and where the container prefix goes.

use super::VideoCodec;
use super::bits::BitWriter;

pub const PACK_HEADER_LEN: usize = 14;
pub const SYSTEM_HEADER_LEN: usize = 18;
pub const PROGRAM_MAP_LEN: usize = 24;
pub const PES_HEADER_LEN: usize = 19;

/// Largest PES payload whose `PES_packet_length` still fits in 16 bits.
///
/// The length field counts the 3 flag/length bytes and 10 timestamp bytes
/// that follow it, plus the payload.
pub const PES_MAX_PAYLOAD: usize = 0xFFFF - (PES_HEADER_LEN - 6);

/// PES stream id for the first video elementary stream.
pub const STREAM_ID_VIDEO: u8 = 0xE0;
/// PES stream id for the first audio elementary stream.
pub const STREAM_ID_AUDIO: u8 = 0xC0;

/// `stream_type` for G.711 A-law audio, as registered by GB/T 28181.
pub const STREAM_TYPE_G711A: u8 = 0x90;

const PACK_START_CODE: u64 = 0x0000_01BA;
const SYSTEM_HEADER_START_CODE: u64 = 0x0000_01BB;
const PACKET_START_CODE_PREFIX: u64 = 0x00_0001;
const PROGRAM_STREAM_MAP_ID: u64 = 0xBC;

/// `program_mux_rate` in units of 50 bytes/s.
const PROGRAM_MUX_RATE: u64 = 255;
/// `rate_bound` advertised in the system header.
const RATE_BOUND: u64 = 50_000;

/// Builds the byte ranges that make up a PS access unit.
///
/// Implementations only lay out bytes; they never see RTP framing.
pub trait Encapsulator: Send {
    /// Pack header carrying `pts` as the system clock reference.
    fn pack_header(&self, pts: u64) -> Vec<u8>;

    /// Append a system header with the given P-STD buffer size bounds.
    fn append_system_header(&self, buf: &mut Vec<u8>, video_bound: u16, audio_bound: u16);

    /// Append a program stream map describing the elementary streams.
    fn append_program_map(&self, buf: &mut Vec<u8>);

    /// Wrap `payload` in a PES header with PTS and DTS.
    ///
    /// `payload` must not exceed [`PES_MAX_PAYLOAD`].
    fn pes_unit(&self, payload: &[u8], stream_id: u8, pts: u64, dts: u64) -> Vec<u8>;
}

/// Default [`Encapsulator`] for a single video stream plus a declared
/// (but unused) G.711A audio stream, the layout GB/T 28181 receivers expect.
#[derive(Debug, Clone)]
pub struct PsMuxer {
    video_stream_type: u8,
}

impl PsMuxer {
    pub fn new(codec: VideoCodec) -> Self {
        Self {
            video_stream_type: codec.stream_type(),
        }
    }
}

impl Default for PsMuxer {
    fn default() -> Self {
        Self::new(VideoCodec::H264)
    }
}

/// Write a 33-bit timestamp as `3 | marker | 15 | marker | 15 | marker`.
fn put_timestamp(w: &mut BitWriter, ts: u64) {
    w.put(3, (ts >> 30) & 0x07);
    w.put(1, 1);
    w.put(15, (ts >> 15) & 0x7FFF);
    w.put(1, 1);
    w.put(15, ts & 0x7FFF);
    w.put(1, 1);
}

impl Encapsulator for PsMuxer {
    fn pack_header(&self, pts: u64) -> Vec<u8> {
        let mut w = BitWriter::new(PACK_HEADER_LEN);
        w.put(32, PACK_START_CODE);
        w.put(2, 0b01);
        put_timestamp(&mut w, pts);
        w.put(9, 0); // SCR extension
        w.put(1, 1);
        w.put(22, PROGRAM_MUX_RATE);
        w.put(2, 0b11);
        w.put(5, 0x1F); // reserved
        w.put(3, 0); // pack_stuffing_length
        w.finish()
    }

    fn append_system_header(&self, buf: &mut Vec<u8>, video_bound: u16, audio_bound: u16) {
        let mut w = BitWriter::new(SYSTEM_HEADER_LEN);
        w.put(32, SYSTEM_HEADER_START_CODE);
        w.put(16, (SYSTEM_HEADER_LEN - 6) as u64);
        w.put(1, 1);
        w.put(22, RATE_BOUND);
        w.put(1, 1);
        w.put(6, 1); // audio_bound
        w.put(1, 0); // fixed_flag
        w.put(1, 1); // CSPS_flag
        w.put(1, 1); // system_audio_lock_flag
        w.put(1, 1); // system_video_lock_flag
        w.put(1, 1);
        w.put(5, 1); // video_bound
        w.put(1, 0); // packet_rate_restriction_flag
        w.put(7, 0x7F);

        // P-STD bounds: audio scales by 128 bytes, video by 1024 bytes
        w.put(8, STREAM_ID_AUDIO as u64);
        w.put(2, 0b11);
        w.put(1, 0);
        w.put(13, audio_bound as u64);
        w.put(8, STREAM_ID_VIDEO as u64);
        w.put(2, 0b11);
        w.put(1, 1);
        w.put(13, video_bound as u64);

        buf.extend_from_slice(&w.finish());
    }

    fn append_program_map(&self, buf: &mut Vec<u8>) {
        let mut w = BitWriter::new(PROGRAM_MAP_LEN);
        w.put(24, PACKET_START_CODE_PREFIX);
        w.put(8, PROGRAM_STREAM_MAP_ID);
        w.put(16, (PROGRAM_MAP_LEN - 6) as u64);
        w.put(1, 1); // current_next_indicator
        w.put(2, 0b11);
        w.put(5, 0); // program_stream_map_version
        w.put(7, 0x7F);
        w.put(1, 1);
        w.put(16, 0); // program_stream_info_length
        w.put(16, 8); // elementary_stream_map_length

        w.put(8, STREAM_TYPE_G711A as u64);
        w.put(8, STREAM_ID_AUDIO as u64);
        w.put(16, 0);

        w.put(8, self.video_stream_type as u64);
        w.put(8, STREAM_ID_VIDEO as u64);
        w.put(16, 0);

        let mut map = w.finish();
        let crc = crc32_mpeg2(&map[..PROGRAM_MAP_LEN - 4]);
        map[PROGRAM_MAP_LEN - 4..].copy_from_slice(&crc.to_be_bytes());
        buf.extend_from_slice(&map);
    }

    fn pes_unit(&self, payload: &[u8], stream_id: u8, pts: u64, dts: u64) -> Vec<u8> {
        debug_assert!(payload.len() <= PES_MAX_PAYLOAD);

        let mut w = BitWriter::new(PES_HEADER_LEN);
        w.put(24, PACKET_START_CODE_PREFIX);
        w.put(8, stream_id as u64);
        w.put(16, (payload.len() + PES_HEADER_LEN - 6) as u64);
        w.put(2, 0b10);
        w.put(2, 0); // PES_scrambling_control
        w.put(1, 0); // PES_priority
        w.put(1, 0); // data_alignment_indicator
        w.put(1, 0); // copyright
        w.put(1, 0); // original_or_copy
        w.put(2, 0b11); // PTS_DTS_flags
        w.put(6, 0); // ESCR, ES_rate, DSM_trick_mode, additional_copy_info, CRC, extension
        w.put(8, 10); // PES_header_data_length
        w.put(4, 0b0011);
        put_timestamp(&mut w, pts);
        w.put(4, 0b0001);
        put_timestamp(&mut w, dts);

        let mut pes = w.finish();
        pes.extend_from_slice(payload);
        pes
    }
}

/// CRC-32/MPEG-2: poly 0x04C11DB7, init all ones, no reflection, no final xor.
pub fn crc32_mpeg2(data: &[u8]) -> u32 {
    let mut crc = 0xFFFF_FFFFu32;
    for &byte in data {
        crc ^= (byte as u32) << 24;
        for _ in 0..8 {
            crc = if crc & 0x8000_0000 != 0 {
                (crc << 1) ^ 0x04C1_1DB7
            } else {
                crc << 1
            };
        }
    }
    crc
}
