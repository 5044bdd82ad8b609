//! Integration tests for the session runner and health endpoint
//!
//! These run entirely locally: no SFU is contacted.
//!
//! Run with: cargo test -p reelcast --test session_tests

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use reelcast::config::Config;
use reelcast::health;
use reelcast::session::{
    self, SessionError, Stream, EXIT_FAILURE, EXIT_NOT_FOUND, EXIT_SINK_FAILURE,
};
use reelcast_media::demux::AnnexBDemuxer;
use reelcast_media::{DemuxError, MediaKind, PacerError, SampleSink, SinkError};
use std::collections::HashMap;
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Clone, Default)]
struct CountingSink {
    attempts: Arc<Mutex<usize>>,
    fail_on: Option<usize>,
}

#[async_trait]
impl SampleSink for CountingSink {
    async fn write_sample(&mut self, _data: Bytes, _duration: Duration) -> Result<(), SinkError> {
        let attempt = {
            let mut attempts = self.attempts.lock().unwrap();
            *attempts += 1;
            *attempts
        };
        if self.fail_on == Some(attempt) {
            return Err(SinkError::Closed);
        }
        Ok(())
    }
}

fn video_stream(frames: usize, sink: CountingSink, interval_ms: u64) -> Stream<CountingSink> {
    let mut data = Vec::new();
    for i in 0..frames {
        data.extend_from_slice(&[0, 0, 0, 1, 0x41, i as u8 + 1]);
    }
    Stream {
        demuxer: Box::new(AnnexBDemuxer::new(Cursor::new(data))),
        sink,
        interval: Duration::from_millis(interval_ms),
    }
}

#[tokio::test(start_paused = true)]
async fn test_all_pacers_drain() {
    let first = CountingSink::default();
    let second = CountingSink::default();

    let reports = session::drive_pacers(vec![
        video_stream(3, first.clone(), 33),
        video_stream(5, second.clone(), 20),
    ])
    .await
    .unwrap();

    assert_eq!(reports.len(), 2);
    assert!(reports.iter().all(|r| r.kind == MediaKind::Video));
    assert_eq!(reports.iter().map(|r| r.units_sent).sum::<u64>(), 8);
    assert_eq!(*first.attempts.lock().unwrap(), 3);
    assert_eq!(*second.attempts.lock().unwrap(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_sink_failure_aborts_session() {
    let failing = CountingSink {
        fail_on: Some(2),
        ..Default::default()
    };
    let long_running = CountingSink::default();

    let err = session::drive_pacers(vec![
        video_stream(3, failing.clone(), 33),
        video_stream(200, long_running.clone(), 33),
    ])
    .await
    .unwrap_err();

    assert!(matches!(
        err,
        SessionError::Pacer(PacerError::Sink { index: 1, .. })
    ));
    assert_eq!(err.exit_code(), EXIT_SINK_FAILURE);
    assert_eq!(*failing.attempts.lock().unwrap(), 2);

    // the sibling pacer was cancelled well before its 200 units
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(*long_running.attempts.lock().unwrap() < 200);
}

/// Media file in the temp directory, removed on drop
struct TempMedia {
    path: PathBuf,
}

impl TempMedia {
    fn write(name: &str, contents: &[u8]) -> Self {
        let path = std::env::temp_dir().join(format!("reelcast-{}-{}", std::process::id(), name));
        std::fs::write(&path, contents).expect("Failed to write test media");
        Self { path }
    }
}

impl Drop for TempMedia {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .and_then(|listener| listener.local_addr())
        .map(|addr| addr.port())
        .expect("Failed to find a free port")
}

fn config_with(vars: &[(&str, String)]) -> Config {
    let vars: HashMap<&str, String> = vars.iter().cloned().collect();
    Config::from_lookup(|key| vars.get(key).cloned()).unwrap()
}

/// Wait for the health endpoint's port to be released
async fn port_released(port: u16) -> bool {
    for _ in 0..50 {
        if tokio::net::TcpListener::bind(("127.0.0.1", port)).await.is_ok() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

#[tokio::test]
async fn test_missing_video_is_not_found_even_with_audio() {
    let audio = TempMedia::write("present.ogg", b"OggS");
    let missing = std::env::temp_dir().join(format!("reelcast-absent-{}.h264", std::process::id()));
    let config = config_with(&[
        ("ISGS_VIDEO_SRC", missing.display().to_string()),
        ("ISGS_AUDIO_SRC", audio.path.display().to_string()),
        ("ISGS_ADDR", format!("ws://127.0.0.1:{}/ws", free_port())),
        ("ISGS_HEALTH_ADDR", format!("127.0.0.1:{}", free_port())),
    ]);

    let err = session::run(config).await.unwrap_err();
    assert!(matches!(
        err,
        SessionError::Pacer(PacerError::Demux(DemuxError::NotFound(ref path))) if *path == missing
    ));
    assert_eq!(err.exit_code(), EXIT_NOT_FOUND);
}

#[tokio::test]
async fn test_failed_join_releases_health_endpoint() {
    let video = TempMedia::write("refused.h264", &[0, 0, 0, 1, 0x65, 0x88]);
    let health_port = free_port();
    let config = config_with(&[
        ("ISGS_VIDEO_SRC", video.path.display().to_string()),
        ("ISGS_AUDIO_SRC", "/nonexistent/output.ogg".to_string()),
        ("ISGS_ADDR", format!("ws://127.0.0.1:{}/ws", free_port())),
        ("ISGS_HEALTH_ADDR", format!("127.0.0.1:{}", health_port)),
    ]);

    let err = session::run(config).await.unwrap_err();
    assert!(matches!(err, SessionError::Bootstrap(_)));
    assert_eq!(err.exit_code(), EXIT_FAILURE);
    assert!(port_released(health_port).await);
}

#[tokio::test]
async fn test_unanswered_join_times_out() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let signal_addr = listener.local_addr().unwrap();
    // Accepts the join and never answers it
    let sfu = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        while ws.next().await.is_some() {}
    });

    let video = TempMedia::write("silent.h264", &[0, 0, 0, 1, 0x65, 0x88]);
    let health_port = free_port();
    let config = config_with(&[
        ("ISGS_VIDEO_SRC", video.path.display().to_string()),
        ("ISGS_AUDIO_SRC", "/nonexistent/output.ogg".to_string()),
        ("ISGS_ADDR", format!("ws://{}/ws", signal_addr)),
        ("ISGS_HEALTH_ADDR", format!("127.0.0.1:{}", health_port)),
        ("ISGS_JOIN_TIMEOUT_MS", "300".to_string()),
    ]);

    let err = tokio::time::timeout(Duration::from_secs(10), session::run(config))
        .await
        .expect("join wait was not bounded")
        .unwrap_err();

    match &err {
        SessionError::Bootstrap(e) => assert!(format!("{:#}", e).contains("No answer to join")),
        other => panic!("expected a bootstrap error, got {:?}", other),
    }
    assert_eq!(err.exit_code(), EXIT_FAILURE);
    assert!(port_released(health_port).await);
    sfu.abort();
}

#[tokio::test]
async fn test_health_endpoint() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(health::serve(listener));

    let response = reqwest::get(format!("http://{}/healthz", addr))
        .await
        .expect("Failed to reach health endpoint");
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "OK\n");

    let missing = reqwest::get(format!("http://{}/nope", addr)).await.unwrap();
    assert_eq!(missing.status(), 404);

    server.abort();
}
