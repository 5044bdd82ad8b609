//! Top-level session runner
//!
//! Owns process lifecycle: every fatal condition comes back here as a
//! [`SessionError`], and the runner alone decides how the process exits.

use anyhow::{anyhow, Context};
use rand::{distributions::Alphanumeric, Rng};
use reelcast_media::{
    demux, pacer, DemuxError, Demuxer, MediaKind, PacerError, PacerReport, SampleSink,
    TrackSink,
};
use reelcast_protocol::IceCandidate;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle, JoinSet};

use crate::config::Config;
use crate::health;
use crate::publisher::Publisher;
use crate::signal;

pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_NOT_FOUND: u8 = 2;
pub const EXIT_MALFORMED: u8 = 3;
pub const EXIT_SINK_FAILURE: u8 = 4;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Pacer(#[from] PacerError),

    #[error("Pacer task failed: {0}")]
    Task(#[from] JoinError),

    #[error(transparent)]
    Bootstrap(#[from] anyhow::Error),
}

impl From<DemuxError> for SessionError {
    fn from(e: DemuxError) -> Self {
        SessionError::Pacer(PacerError::Demux(e))
    }
}

impl SessionError {
    /// Process exit status distinguishing the failure classes
    pub fn exit_code(&self) -> u8 {
        match self {
            SessionError::Pacer(PacerError::Demux(DemuxError::NotFound(_))) => EXIT_NOT_FOUND,
            SessionError::Pacer(PacerError::Demux(_)) => EXIT_MALFORMED,
            SessionError::Pacer(PacerError::Sink { .. }) => EXIT_SINK_FAILURE,
            _ => EXIT_FAILURE,
        }
    }
}

/// One pacer's inputs
pub struct Stream<S> {
    pub demuxer: Box<dyn Demuxer>,
    pub sink: S,
    pub interval: Duration,
}

#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub reports: Vec<PacerReport>,
}

impl SessionSummary {
    pub fn units_sent(&self) -> u64 {
        self.reports.iter().map(|r| r.units_sent).sum()
    }
}

/// Run one pacer task per stream until all drain. The first fatal error
/// aborts the remaining pacers and is returned.
pub async fn drive_pacers<S: SampleSink + 'static>(
    streams: Vec<Stream<S>>,
) -> Result<Vec<PacerReport>, SessionError> {
    let mut pacers = JoinSet::new();
    for stream in streams {
        pacers.spawn(pacer::run(stream.demuxer, stream.sink, stream.interval));
    }

    let mut reports = Vec::new();
    while let Some(joined) = pacers.join_next().await {
        let error = match joined {
            Ok(Ok(report)) => {
                reports.push(report);
                continue;
            }
            Ok(Err(e)) => SessionError::from(e),
            Err(e) => SessionError::from(e),
        };
        if !pacers.is_empty() {
            tracing::warn!("Stopping {} remaining pacer(s)", pacers.len());
            pacers.abort_all();
        }
        return Err(error);
    }
    Ok(reports)
}

/// Publish the configured media files into the session
pub async fn run(config: Config) -> Result<SessionSummary, SessionError> {
    // Containers are opened before joining so a missing or bad file never
    // reaches the SFU
    let mut opened = Vec::new();
    for source in config.publish_sources() {
        opened.push((demux::open(source.kind, &source.path)?, source.interval));
    }
    let kinds: Vec<MediaKind> = opened.iter().map(|(demuxer, _)| demuxer.kind()).collect();

    let listener = TcpListener::bind(&config.health_address)
        .await
        .with_context(|| format!("Failed to bind health endpoint on {}", config.health_address))?;
    let mut health = tokio::spawn(health::serve(listener));

    let (ice_tx, ice_rx) = mpsc::unbounded_channel();
    let publisher = match Publisher::new(config.ice_servers(), &hostname(), &kinds, ice_tx).await {
        Ok(publisher) => Arc::new(publisher),
        Err(e) => {
            health.abort();
            return Err(e.context("Failed to create peer connection").into());
        }
    };

    let outcome = publish(&config, &publisher, opened, ice_rx, &mut health).await;

    health.abort();
    if let Err(e) = publisher.close().await {
        tracing::warn!("Failed to close peer connection: {}", e);
    }

    outcome.map(|reports| SessionSummary { reports })
}

/// Join the session and pace every stream into its track
async fn publish(
    config: &Config,
    publisher: &Arc<Publisher>,
    opened: Vec<(Box<dyn Demuxer>, Duration)>,
    ice_rx: mpsc::UnboundedReceiver<IceCandidate>,
    health: &mut JoinHandle<anyhow::Result<()>>,
) -> Result<Vec<PacerReport>, SessionError> {
    let mut streams: Vec<Stream<TrackSink>> = Vec::with_capacity(opened.len());
    for (demuxer, interval) in opened {
        let kind = demuxer.kind();
        let sink = publisher
            .sink(kind)
            .ok_or_else(|| anyhow!("No {} track was published", kind))?;
        streams.push(Stream {
            demuxer,
            sink,
            interval,
        });
    }

    let mut signaling = signal::join(
        &config.signal_url,
        &config.session_id,
        &random_key(4),
        publisher.clone(),
        ice_rx,
        config.join_timeout,
    )
    .await
    .context("Failed to join session")?;

    let outcome = tokio::select! {
        result = drive_pacers(streams) => result,
        result = &mut *health => Err(task_ended("Health endpoint", result)),
        result = &mut signaling => Err(task_ended("Signaling", result)),
    };
    signaling.abort();
    outcome
}

fn task_ended(name: &str, result: Result<anyhow::Result<()>, JoinError>) -> SessionError {
    match result {
        Ok(Ok(())) => anyhow!("{} stopped unexpectedly", name).into(),
        Ok(Err(e)) => e.context(format!("{} failed", name)).into(),
        Err(e) => anyhow::Error::new(e)
            .context(format!("{} task panicked", name))
            .into(),
    }
}

fn hostname() -> String {
    std::fs::read_to_string("/etc/hostname")
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .or_else(|| std::env::var("HOSTNAME").ok())
        .unwrap_or_else(|| "reelcast".to_string())
}

/// Random alphanumeric participant key
fn random_key(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}
