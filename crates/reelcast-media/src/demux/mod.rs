//! Container demuxers
//!
//! A demuxer walks one container file forward, one unit per call. Both
//! formats share the same terminal behavior: end of stream is sticky, and
//! a fatal error poisons the demuxer so later calls fail without reading.

pub mod h264;
pub mod ogg;

pub use h264::AnnexBDemuxer;
pub use ogg::{OggDemuxer, OpusHead};

use std::fs::File;
use std::io::{self, BufReader, ErrorKind, Read};
use std::path::Path;

use crate::error::DemuxError;
use crate::unit::{EncodedUnit, MediaKind};

/// Forward-only source of encoded units
pub trait Demuxer: Send {
    fn kind(&self) -> MediaKind;

    /// Parse the next unit. `Ok(None)` is end of stream and repeats forever.
    fn next_unit(&mut self) -> Result<Option<EncodedUnit>, DemuxError>;
}

impl<D: Demuxer + ?Sized> Demuxer for Box<D> {
    fn kind(&self) -> MediaKind {
        (**self).kind()
    }

    fn next_unit(&mut self) -> Result<Option<EncodedUnit>, DemuxError> {
        (**self).next_unit()
    }
}

/// Open the demuxer matching `kind` on the file at `path`
pub fn open(kind: MediaKind, path: &Path) -> Result<Box<dyn Demuxer>, DemuxError> {
    let file = open_file(path)?;
    let demuxer: Box<dyn Demuxer> = match kind {
        MediaKind::Video => Box::new(AnnexBDemuxer::new(file)),
        MediaKind::Audio => Box::new(OggDemuxer::new(file)?),
    };
    tracing::info!("Opened {} container {}", kind, path.display());
    Ok(demuxer)
}

pub(crate) fn open_file(path: &Path) -> Result<File, DemuxError> {
    File::open(path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => DemuxError::NotFound(path.to_path_buf()),
        _ => DemuxError::Unreadable(e),
    })
}

/// Where a demuxer is in its lifetime
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Cursor {
    Reading,
    Exhausted,
    Failed { offset: u64, reason: String },
}

impl Cursor {
    /// Result to hand back once the cursor has left `Reading`
    pub(crate) fn terminal(&self) -> Option<Result<Option<EncodedUnit>, DemuxError>> {
        match self {
            Cursor::Reading => None,
            Cursor::Exhausted => Some(Ok(None)),
            Cursor::Failed { offset, reason } => Some(Err(DemuxError::malformed(
                *offset,
                format!("stream already failed: {}", reason),
            ))),
        }
    }

    /// Record a fatal error, keeping enough of it to repeat later
    pub(crate) fn fail(&mut self, offset: u64, err: &DemuxError) {
        *self = Cursor::Failed {
            offset,
            reason: err.to_string(),
        };
    }
}

/// Buffered reader that tracks the absolute byte offset
pub(crate) struct ByteReader<R> {
    inner: BufReader<R>,
    offset: u64,
}

impl<R: Read> ByteReader<R> {
    pub(crate) fn new(inner: R) -> Self {
        Self {
            inner: BufReader::new(inner),
            offset: 0,
        }
    }

    pub(crate) fn offset(&self) -> u64 {
        self.offset
    }

    /// Fill as much of `buf` as the input allows, returning the count read.
    /// A short count means end of input.
    pub(crate) fn read_up_to(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.inner.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        self.offset += filled as u64;
        Ok(filled)
    }

    pub(crate) fn read_byte(&mut self) -> io::Result<Option<u8>> {
        let mut byte = [0u8; 1];
        match self.read_up_to(&mut byte)? {
            0 => Ok(None),
            _ => Ok(Some(byte[0])),
        }
    }
}
