//! Outbound sample sinks

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use webrtc::media::Sample;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

use crate::error::SinkError;

/// Write target for paced samples, e.g. a published media track
#[async_trait]
pub trait SampleSink: Send {
    async fn write_sample(&mut self, data: Bytes, duration: Duration) -> Result<(), SinkError>;
}

#[async_trait]
impl<S: SampleSink + ?Sized> SampleSink for Box<S> {
    async fn write_sample(&mut self, data: Bytes, duration: Duration) -> Result<(), SinkError> {
        (**self).write_sample(data, duration).await
    }
}

/// Sink writing into a local WebRTC track, which packetizes each sample
/// into RTP for every bound peer connection
#[derive(Clone)]
pub struct TrackSink {
    track: Arc<TrackLocalStaticSample>,
}

impl TrackSink {
    pub fn new(track: Arc<TrackLocalStaticSample>) -> Self {
        Self { track }
    }
}

#[async_trait]
impl SampleSink for TrackSink {
    async fn write_sample(&mut self, data: Bytes, duration: Duration) -> Result<(), SinkError> {
        let sample = Sample {
            data,
            duration,
            ..Default::default()
        };
        self.track.write_sample(&sample).await?;
        Ok(())
    }
}
