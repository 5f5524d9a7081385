//! Annex B elementary stream splitting.
//!
//! Program streams carry the elementary stream with its start codes
//! intact, so access units are sliced out of the input as-is rather than
//! re-encoded. Only the NAL header (and the first slice header bit) is
//! inspected to find frame boundaries and key frames.

use super::VideoCodec;

/// One NAL unit inside an Annex B buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NalUnit {
    /// Offset of the start code.
    pub start: usize,
    /// Offset of the first NAL header byte.
    pub payload_start: usize,
    /// One past the last byte.
    pub end: usize,
}

/// One access unit (frame), start codes included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessUnit<'a> {
    pub data: &'a [u8],
    pub key_frame: bool,
}

/// Locate NAL units in an Annex B bitstream.
///
/// Scans for start codes (both 4-byte `00 00 00 01` and 3-byte
/// `00 00 01`). The start code length is tracked per NAL so adjacent NALs
/// with mixed start code lengths get correct boundaries. Empty NALs are
/// dropped.
pub fn find_nal_units(data: &[u8]) -> Vec<NalUnit> {
    let mut starts: Vec<(usize, usize)> = Vec::new();
    let mut i = 0usize;

    while i < data.len() {
        if i + 3 < data.len() && data[i..i + 4] == [0, 0, 0, 1] {
            starts.push((i, 4));
            i += 4;
        } else if i + 2 < data.len() && data[i..i + 3] == [0, 0, 1] {
            starts.push((i, 3));
            i += 3;
        } else {
            i += 1;
        }
    }

    let mut nals = Vec::with_capacity(starts.len());
    for (idx, &(start, sc_len)) in starts.iter().enumerate() {
        let end = starts.get(idx + 1).map_or(data.len(), |&(next, _)| next);
        if start + sc_len < end {
            nals.push(NalUnit {
                start,
                payload_start: start + sc_len,
                end,
            });
        }
    }
    nals
}

/// What a NAL unit means for access unit grouping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NalRole {
    /// Access unit delimiter: always opens a new access unit.
    Delimiter,
    /// Parameter sets and SEI: open a new access unit if a picture was already seen.
    Prefix { parameter_set: bool },
    /// Coded slice. `first_slice` marks the first slice of a new picture.
    Slice { first_slice: bool, irap: bool },
    Other,
}

fn classify(codec: VideoCodec, nal: &[u8]) -> NalRole {
    match codec {
        VideoCodec::H264 => {
            let nal_type = nal[0] & 0x1f;
            match nal_type {
                9 => NalRole::Delimiter,
                7 | 8 => NalRole::Prefix {
                    parameter_set: true,
                },
                6 => NalRole::Prefix {
                    parameter_set: false,
                },
                1 | 5 => NalRole::Slice {
                    // first_mb_in_slice == 0 is coded as a single '1' bit
                    first_slice: nal.get(1).is_some_and(|b| b & 0x80 != 0),
                    irap: nal_type == 5,
                },
                _ => NalRole::Other,
            }
        }
        VideoCodec::H265 => {
            let nal_type = (nal[0] >> 1) & 0x3f;
            match nal_type {
                35 => NalRole::Delimiter,
                32..=34 => NalRole::Prefix {
                    parameter_set: true,
                },
                39 => NalRole::Prefix {
                    parameter_set: false,
                },
                0..=31 => NalRole::Slice {
                    first_slice: nal.get(2).is_some_and(|b| b & 0x80 != 0),
                    irap: (16..=23).contains(&nal_type),
                },
                _ => NalRole::Other,
            }
        }
    }
}

/// Group an Annex B bitstream into access units.
///
/// An access unit is flagged as a key frame when it contains an IDR/IRAP
/// slice or carries parameter sets (the receiver needs those to start
/// decoding). Bytes before the first start code are discarded.
pub fn split_access_units(data: &[u8], codec: VideoCodec) -> Vec<AccessUnit<'_>> {
    let mut units = Vec::new();
    let mut au_start: Option<usize> = None;
    let mut seen_slice = false;
    let mut key_frame = false;

    for nal in find_nal_units(data) {
        let role = classify(codec, &data[nal.payload_start..nal.end]);

        let opens_new = match role {
            NalRole::Delimiter => true,
            NalRole::Prefix { .. } => seen_slice,
            NalRole::Slice { first_slice, .. } => seen_slice && first_slice,
            NalRole::Other => false,
        };

        if opens_new {
            if let Some(start) = au_start {
                units.push(AccessUnit {
                    data: &data[start..nal.start],
                    key_frame,
                });
            }
            au_start = Some(nal.start);
            seen_slice = false;
            key_frame = false;
        } else if au_start.is_none() {
            au_start = Some(nal.start);
        }

        match role {
            NalRole::Prefix { parameter_set } => key_frame |= parameter_set,
            NalRole::Slice { irap, .. } => {
                seen_slice = true;
                key_frame |= irap;
            }
            _ => {}
        }
    }

    if let Some(start) = au_start {
        units.push(AccessUnit {
            data: &data[start..],
            key_frame,
        });
    }

    tracing::debug!(
        %codec,
        access_units = units.len(),
        key_frames = units.iter().filter(|au| au.key_frame).count(),
        "elementary stream split"
    );

    units
}
