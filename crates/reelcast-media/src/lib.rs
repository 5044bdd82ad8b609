//! Media handling for Reelcast
//!
//! This crate turns recorded media files into paced samples:
//! - Container demuxing (H.264 Annex-B, Ogg/Opus)
//! - Real-time pacing onto an outbound sample sink
//! - The WebRTC track sink used by the publisher

pub mod demux;
pub mod error;
pub mod pacer;
pub mod sink;
pub mod unit;

pub use demux::Demuxer;
pub use error::{DemuxError, PacerError, SinkError};
pub use pacer::{Pacer, PacerReport, PacerState};
pub use sink::{SampleSink, TrackSink};
pub use unit::{EncodedUnit, MediaKind, UnitMeta};
