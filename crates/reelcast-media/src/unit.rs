use bytes::Bytes;
use std::fmt;

/// Kind of media carried by a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Video,
    Audio,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Video => f.write_str("video"),
            MediaKind::Audio => f.write_str("audio"),
        }
    }
}

/// H.264 NAL unit header (first payload byte)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NalHeader {
    pub forbidden_zero_bit: bool,
    pub ref_idc: u8,
    pub unit_type: u8,
}

impl NalHeader {
    pub const TYPE_SEI: u8 = 6;

    pub fn parse(byte: u8) -> Self {
        Self {
            forbidden_zero_bit: byte & 0x80 != 0,
            ref_idc: (byte >> 5) & 0x03,
            unit_type: byte & 0x1f,
        }
    }
}

/// Container metadata carried alongside a unit's payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitMeta {
    Nal(NalHeader),
    /// Opus packet, with the granule position and sequence number of the
    /// page it completes on
    OggPacket {
        granule_position: i64,
        page_sequence: u32,
    },
}

/// One access unit extracted from a container
///
/// The unit carries no presentation duration. Every unit of a stream
/// plays for the stream's nominal interval.
#[derive(Debug, Clone)]
pub struct EncodedUnit {
    /// Position in container order, starting at 0
    pub index: u64,
    pub data: Bytes,
    pub meta: UnitMeta,
}
