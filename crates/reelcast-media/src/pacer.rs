//! Real-time pacer
//!
//! Pulls one unit per timer tick from a [`Demuxer`] and writes it to a
//! [`SampleSink`], reconstructing the stream's playback cadence.
//!
//! The tick source is a monotonic [`tokio::time::Interval`], so time spent
//! parsing and writing a unit does not accumulate skew. A tick that fires
//! late dispatches its unit immediately and the cadence restarts from there;
//! missed ticks are never replayed as a burst.

use std::time::Duration;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::demux::Demuxer;
use crate::error::PacerError;
use crate::sink::SampleSink;
use crate::unit::MediaKind;

/// Lifecycle of one pacing run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacerState {
    Idle,
    Priming,
    Streaming,
    Draining,
    Terminated,
}

impl PacerState {
    pub fn can_transition_to(self, next: PacerState) -> bool {
        use PacerState::*;
        matches!(
            (self, next),
            (Idle, Priming)
                | (Priming, Streaming)
                | (Priming, Terminated)
                | (Streaming, Draining)
                | (Streaming, Terminated)
                | (Draining, Terminated)
        )
    }
}

/// Outcome of a run that reached end of stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacerReport {
    pub kind: MediaKind,
    pub units_sent: u64,
    pub elapsed: Duration,
}

pub struct Pacer<D, S> {
    demuxer: D,
    sink: S,
    interval: Duration,
    state: PacerState,
    units_sent: u64,
}

impl<D: Demuxer, S: SampleSink> Pacer<D, S> {
    pub fn new(demuxer: D, sink: S, interval: Duration) -> Self {
        Self {
            demuxer,
            sink,
            interval,
            state: PacerState::Idle,
            units_sent: 0,
        }
    }

    pub fn state(&self) -> PacerState {
        self.state
    }

    pub fn kind(&self) -> MediaKind {
        self.demuxer.kind()
    }

    fn transition(&mut self, next: PacerState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "invalid pacer transition {:?} -> {:?}",
            self.state,
            next
        );
        tracing::debug!("{} pacer: {:?} -> {:?}", self.kind(), self.state, next);
        self.state = next;
    }

    /// Stream every unit, one per tick, until end of stream or the first
    /// fatal error. A pacer runs once; it is `Terminated` afterwards.
    pub async fn run(&mut self) -> Result<PacerReport, PacerError> {
        let kind = self.kind();
        if self.state != PacerState::Idle {
            return Err(PacerError::AlreadyRun);
        }

        self.transition(PacerState::Priming);
        if self.interval.is_zero() {
            tracing::error!("{} pacer has a zero interval", kind);
            self.transition(PacerState::Terminated);
            return Err(PacerError::ZeroInterval);
        }
        let started = Instant::now();
        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!("Pacing {} every {:?}", kind, self.interval);
        self.transition(PacerState::Streaming);

        loop {
            ticker.tick().await;

            let unit = match self.demuxer.next_unit() {
                Ok(Some(unit)) => unit,
                Ok(None) => break,
                Err(e) => {
                    tracing::error!(
                        "{} demux failed after {} units: {}",
                        kind,
                        self.units_sent,
                        e
                    );
                    self.transition(PacerState::Terminated);
                    return Err(e.into());
                }
            };

            let index = unit.index;
            if let Err(source) = self.sink.write_sample(unit.data, self.interval).await {
                tracing::error!("{} sink rejected unit {}: {}", kind, index, source);
                self.transition(PacerState::Terminated);
                return Err(PacerError::Sink { index, source });
            }
            self.units_sent += 1;

            if self.units_sent % 300 == 1 {
                tracing::debug!("{} pacer sent unit {}", kind, index);
            }
        }

        self.transition(PacerState::Draining);
        let report = PacerReport {
            kind,
            units_sent: self.units_sent,
            elapsed: started.elapsed(),
        };
        tracing::info!(
            "All {} units parsed and sent ({} in {:?})",
            kind,
            report.units_sent,
            report.elapsed
        );
        self.transition(PacerState::Terminated);
        Ok(report)
    }
}

/// Pace `demuxer` into `sink` at one unit per `interval`
pub async fn run<D: Demuxer, S: SampleSink>(
    demuxer: D,
    sink: S,
    interval: Duration,
) -> Result<PacerReport, PacerError> {
    let mut pacer = Pacer::new(demuxer, sink, interval);
    pacer.run().await
}
