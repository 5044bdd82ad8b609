//! Ogg/Opus demuxer
//!
//! Pages are split into packets on their lacing values, and each Opus packet
//! becomes one unit. A packet continued across pages is reassembled before it
//! is emitted. The identification header is consumed on construction and the
//! comment header is skipped, so only audio packets reach the pacer.

use bytes::Bytes;
use std::collections::VecDeque;
use std::io::Read;

use super::{ByteReader, Cursor, Demuxer};
use crate::error::DemuxError;
use crate::unit::{EncodedUnit, MediaKind, UnitMeta};

const CAPTURE_PATTERN: &[u8; 4] = b"OggS";
const PAGE_HEADER_LEN: usize = 27;
const HEADER_TYPE_CONTINUED: u8 = 0x01;
const HEADER_TYPE_BEGINNING_OF_STREAM: u8 = 0x02;
const OPUS_HEAD_MAGIC: &[u8; 8] = b"OpusHead";
const OPUS_TAGS_MAGIC: &[u8; 8] = b"OpusTags";
const OPUS_HEAD_LEN: usize = 19;

static CRC_TABLE: [u32; 256] = crc_table();

const fn crc_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut r = (i as u32) << 24;
        let mut bit = 0;
        while bit < 8 {
            r = if r & 0x8000_0000 != 0 {
                (r << 1) ^ 0x04c1_1db7
            } else {
                r << 1
            };
            bit += 1;
        }
        table[i] = r;
        i += 1;
    }
    table
}

pub(crate) fn crc32(crc: u32, data: &[u8]) -> u32 {
    data.iter().fold(crc, |crc, &byte| {
        (crc << 8) ^ CRC_TABLE[(((crc >> 24) as u8) ^ byte) as usize]
    })
}

/// Opus identification header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpusHead {
    pub version: u8,
    pub channels: u8,
    pub pre_skip: u16,
    pub input_sample_rate: u32,
    pub output_gain: i16,
    pub mapping_family: u8,
}

impl OpusHead {
    fn parse(payload: &[u8]) -> Option<Self> {
        if payload.len() < OPUS_HEAD_LEN || &payload[..8] != OPUS_HEAD_MAGIC {
            return None;
        }
        Some(Self {
            version: payload[8],
            channels: payload[9],
            pre_skip: u16::from_le_bytes([payload[10], payload[11]]),
            input_sample_rate: u32::from_le_bytes([
                payload[12],
                payload[13],
                payload[14],
                payload[15],
            ]),
            output_gain: i16::from_le_bytes([payload[16], payload[17]]),
            mapping_family: payload[18],
        })
    }
}

struct Page {
    header_type: u8,
    granule_position: i64,
    serial: u32,
    sequence: u32,
    lacing: Vec<u8>,
    payload: Vec<u8>,
}

/// A complete packet waiting to be handed out
struct Packet {
    data: Vec<u8>,
    granule_position: i64,
    page_sequence: u32,
}

pub struct OggDemuxer<R> {
    reader: ByteReader<R>,
    cursor: Cursor,
    head: OpusHead,
    serial: u32,
    packets: VecDeque<Packet>,
    // bytes of a packet that continues on the next page
    partial: Vec<u8>,
    tags_checked: bool,
    emitted: u64,
}

impl<R: Read> OggDemuxer<R> {
    /// Read the identification page and prepare to yield audio packets
    pub fn new(inner: R) -> Result<Self, DemuxError> {
        let mut reader = ByteReader::new(inner);
        let page = read_page(&mut reader)?
            .ok_or_else(|| DemuxError::malformed(0, "empty Ogg stream"))?;

        if page.header_type & HEADER_TYPE_BEGINNING_OF_STREAM == 0 {
            return Err(DemuxError::malformed(
                0,
                "first page is not a beginning-of-stream page",
            ));
        }
        let head = OpusHead::parse(&page.payload)
            .ok_or_else(|| DemuxError::malformed(0, "missing OpusHead identification header"))?;

        tracing::debug!(
            "Opus stream: {} channel(s), {} Hz input, pre-skip {}",
            head.channels,
            head.input_sample_rate,
            head.pre_skip
        );

        Ok(Self {
            reader,
            cursor: Cursor::Reading,
            head,
            serial: page.serial,
            packets: VecDeque::new(),
            partial: Vec::new(),
            tags_checked: false,
            emitted: 0,
        })
    }

    pub fn head(&self) -> &OpusHead {
        &self.head
    }

    fn step(&mut self) -> Result<Option<EncodedUnit>, DemuxError> {
        loop {
            if let Some(packet) = self.packets.pop_front() {
                if !self.tags_checked {
                    self.tags_checked = true;
                    if packet.data.starts_with(OPUS_TAGS_MAGIC) {
                        tracing::trace!("Skipping OpusTags packet");
                        continue;
                    }
                }
                if packet.data.is_empty() {
                    tracing::trace!("Skipping empty packet in page {}", packet.page_sequence);
                    continue;
                }

                let unit = EncodedUnit {
                    index: self.emitted,
                    data: Bytes::from(packet.data),
                    meta: UnitMeta::OggPacket {
                        granule_position: packet.granule_position,
                        page_sequence: packet.page_sequence,
                    },
                };
                self.emitted += 1;
                return Ok(Some(unit));
            }

            let page_offset = self.reader.offset();
            let Some(page) = read_page(&mut self.reader)? else {
                if !self.partial.is_empty() {
                    return Err(DemuxError::malformed(
                        page_offset,
                        "stream ends inside a continued packet",
                    ));
                }
                return Ok(None);
            };
            if page.serial != self.serial {
                return Err(DemuxError::malformed(
                    page_offset,
                    format!(
                        "unexpected bitstream serial {:#x} (expected {:#x})",
                        page.serial, self.serial
                    ),
                ));
            }
            self.split_packets(page, page_offset)?;
        }
    }

    /// Queue every packet the page completes. A lacing value below 255 ends
    /// a packet; a trailing 255 carries it over to the next page.
    fn split_packets(&mut self, page: Page, offset: u64) -> Result<(), DemuxError> {
        let continued = page.header_type & HEADER_TYPE_CONTINUED != 0;
        if continued && self.partial.is_empty() {
            return Err(DemuxError::malformed(
                offset,
                format!("page {} continues a packet that never started", page.sequence),
            ));
        }
        if !continued && !self.partial.is_empty() {
            return Err(DemuxError::malformed(
                offset,
                format!("page {} drops an unfinished packet", page.sequence),
            ));
        }

        let mut start = 0;
        for &lacing in &page.lacing {
            let end = start + lacing as usize;
            self.partial.extend_from_slice(&page.payload[start..end]);
            start = end;
            if lacing < 255 {
                self.packets.push_back(Packet {
                    data: std::mem::take(&mut self.partial),
                    granule_position: page.granule_position,
                    page_sequence: page.sequence,
                });
            }
        }
        Ok(())
    }
}

/// The `N` header bytes starting at `at`
fn field<const N: usize>(header: &[u8; PAGE_HEADER_LEN], at: usize) -> [u8; N] {
    std::array::from_fn(|i| header[at + i])
}

/// Read one complete page. `Ok(None)` only on a clean page boundary.
fn read_page<R: Read>(reader: &mut ByteReader<R>) -> Result<Option<Page>, DemuxError> {
    let start = reader.offset();
    let mut header = [0u8; PAGE_HEADER_LEN];
    match reader.read_up_to(&mut header)? {
        0 => return Ok(None),
        PAGE_HEADER_LEN => {}
        _ => return Err(DemuxError::malformed(start, "truncated page header")),
    }

    if &header[..4] != CAPTURE_PATTERN {
        return Err(DemuxError::malformed(start, "missing OggS capture pattern"));
    }
    if header[4] != 0 {
        return Err(DemuxError::malformed(
            start,
            format!("unsupported stream structure version {}", header[4]),
        ));
    }

    let header_type = header[5];
    let granule_position = i64::from_le_bytes(field(&header, 6));
    let serial = u32::from_le_bytes(field(&header, 14));
    let sequence = u32::from_le_bytes(field(&header, 18));
    let checksum = u32::from_le_bytes(field(&header, 22));
    let segment_count = header[26] as usize;

    let mut lacing = vec![0u8; segment_count];
    if reader.read_up_to(&mut lacing)? != segment_count {
        return Err(DemuxError::malformed(start, "truncated segment table"));
    }
    let payload_len: usize = lacing.iter().map(|&s| s as usize).sum();
    let mut payload = vec![0u8; payload_len];
    if reader.read_up_to(&mut payload)? != payload_len {
        return Err(DemuxError::malformed(
            start,
            format!("truncated page payload in page {}", sequence),
        ));
    }

    header[22..26].fill(0);
    let computed = [&header[..], &lacing[..], &payload[..]]
        .iter()
        .fold(0, |crc, chunk| crc32(crc, chunk));
    if computed != checksum {
        return Err(DemuxError::malformed(
            start,
            format!(
                "checksum mismatch in page {}: stored {:#010x}, computed {:#010x}",
                sequence, checksum, computed
            ),
        ));
    }

    Ok(Some(Page {
        header_type,
        granule_position,
        serial,
        sequence,
        lacing,
        payload,
    }))
}

impl<R: Read + Send> Demuxer for OggDemuxer<R> {
    fn kind(&self) -> MediaKind {
        MediaKind::Audio
    }

    fn next_unit(&mut self) -> Result<Option<EncodedUnit>, DemuxError> {
        if let Some(result) = self.cursor.terminal() {
            return result;
        }
        match self.step() {
            Ok(Some(unit)) => Ok(Some(unit)),
            Ok(None) => {
                tracing::debug!("Ogg stream exhausted after {} packets", self.emitted);
                self.cursor = Cursor::Exhausted;
                Ok(None)
            }
            Err(e) => {
                self.cursor.fail(self.reader.offset(), &e);
                Err(e)
            }
        }
    }
}
