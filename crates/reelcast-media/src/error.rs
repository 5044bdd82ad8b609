use std::path::PathBuf;
use thiserror::Error;

/// Failure while opening or reading a media container
#[derive(Error, Debug)]
pub enum DemuxError {
    #[error("Input file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Failed to read input: {0}")]
    Unreadable(#[from] std::io::Error),

    #[error("Malformed container at byte {offset}: {reason}")]
    Malformed { offset: u64, reason: String },
}

impl DemuxError {
    pub(crate) fn malformed(offset: u64, reason: impl Into<String>) -> Self {
        DemuxError::Malformed {
            offset,
            reason: reason.into(),
        }
    }
}

/// Failure reported by an outbound sample sink
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Track rejected sample: {0}")]
    Track(#[from] webrtc::Error),

    #[error("Sink closed")]
    Closed,

    #[error("Sample rejected: {0}")]
    Rejected(String),
}

/// Fatal condition that ends a pacing run
#[derive(Error, Debug)]
pub enum PacerError {
    #[error("Pacing interval must be non-zero")]
    ZeroInterval,

    #[error("Pacer has already run")]
    AlreadyRun,

    #[error(transparent)]
    Demux(#[from] DemuxError),

    #[error("Sink failed on unit {index}: {source}")]
    Sink {
        index: u64,
        #[source]
        source: SinkError,
    },
}
