//! H.264 Annex-B elementary stream demuxer
//!
//! Units are delimited by `00 00 01` / `00 00 00 01` start codes. The scan is
//! byte-at-a-time so unit boundaries land exactly where a packetizer expects
//! them: one unit is one NAL, start code excluded.

use bytes::Bytes;
use std::io::Read;

use super::{ByteReader, Cursor, Demuxer};
use crate::error::DemuxError;
use crate::unit::{EncodedUnit, MediaKind, NalHeader, UnitMeta};

const PREFIX_3: [u8; 3] = [0, 0, 1];
const PREFIX_4: [u8; 4] = [0, 0, 0, 1];

pub struct AnnexBDemuxer<R> {
    reader: ByteReader<R>,
    cursor: Cursor,
    prefix_parsed: bool,
    nal_buffer: Vec<u8>,
    zero_run: usize,
    emitted: u64,
}

impl<R: Read> AnnexBDemuxer<R> {
    pub fn new(inner: R) -> Self {
        Self {
            reader: ByteReader::new(inner),
            cursor: Cursor::Reading,
            prefix_parsed: false,
            nal_buffer: Vec::new(),
            zero_run: 0,
            emitted: 0,
        }
    }

    /// Consume the leading start code. Returns false on an empty or
    /// prefix-only stream.
    fn parse_leading_prefix(&mut self) -> Result<bool, DemuxError> {
        let mut prefix = [0u8; 4];
        let n = self.reader.read_up_to(&mut prefix)?;
        let starts_with_3 = n >= 3 && prefix[..3] == PREFIX_3;
        match n {
            0 => Ok(false),
            3 if starts_with_3 => Ok(false),
            4 if starts_with_3 => {
                self.nal_buffer.push(prefix[3]);
                Ok(true)
            }
            4 if prefix == PREFIX_4 => Ok(true),
            _ => Err(DemuxError::malformed(0, "not an Annex-B stream")),
        }
    }

    /// Feed one byte into the start-code detector. Returns true when the
    /// buffer now holds a complete NAL.
    fn scan(&mut self, byte: u8) -> bool {
        match byte {
            0 => {
                self.zero_run += 1;
                self.nal_buffer.push(byte);
                false
            }
            1 if self.zero_run >= 2 => {
                let prefix_zeros = if self.zero_run > 2 { 3 } else { 2 };
                self.zero_run = 0;
                let len = self.nal_buffer.len().saturating_sub(prefix_zeros);
                self.nal_buffer.truncate(len);
                // back-to-back start codes delimit nothing
                len > 0
            }
            _ => {
                self.zero_run = 0;
                self.nal_buffer.push(byte);
                false
            }
        }
    }

    fn step(&mut self) -> Result<Option<EncodedUnit>, DemuxError> {
        if !self.prefix_parsed {
            if !self.parse_leading_prefix()? {
                return Ok(None);
            }
            self.prefix_parsed = true;
        }

        loop {
            let complete = match self.reader.read_byte()? {
                Some(byte) => self.scan(byte),
                None if self.nal_buffer.is_empty() => return Ok(None),
                None => true,
            };
            if !complete {
                continue;
            }

            let data = std::mem::take(&mut self.nal_buffer);
            let header = NalHeader::parse(data[0]);
            if header.forbidden_zero_bit {
                return Err(DemuxError::malformed(
                    self.reader.offset(),
                    format!("forbidden_zero_bit set in NAL {}", self.emitted),
                ));
            }
            if header.unit_type == NalHeader::TYPE_SEI {
                tracing::trace!("Skipping SEI NAL at byte {}", self.reader.offset());
                continue;
            }

            let unit = EncodedUnit {
                index: self.emitted,
                data: Bytes::from(data),
                meta: UnitMeta::Nal(header),
            };
            self.emitted += 1;
            return Ok(Some(unit));
        }
    }
}

impl<R: Read + Send> Demuxer for AnnexBDemuxer<R> {
    fn kind(&self) -> MediaKind {
        MediaKind::Video
    }

    fn next_unit(&mut self) -> Result<Option<EncodedUnit>, DemuxError> {
        if let Some(result) = self.cursor.terminal() {
            return result;
        }
        match self.step() {
            Ok(Some(unit)) => Ok(Some(unit)),
            Ok(None) => {
                tracing::debug!("Annex-B stream exhausted after {} NALs", self.emitted);
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
