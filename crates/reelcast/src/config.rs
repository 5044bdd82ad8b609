use anyhow::{Context, Result};
use reelcast_media::MediaKind;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use webrtc::ice_transport::ice_server::RTCIceServer;

pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";

#[derive(Clone, Debug)]
pub struct Config {
    pub signal_url: String,
    pub session_id: String,
    pub video_path: PathBuf,
    pub audio_path: PathBuf,
    pub turn_server: Option<TurnServer>,
    pub health_address: String,
    pub video_frame_interval: Duration,
    pub audio_packet_interval: Duration,
    /// How long to wait for the SFU to answer the join request
    pub join_timeout: Duration,
}

#[derive(Clone)]
pub struct TurnServer {
    pub address: String,
    pub username: String,
    pub credential: String,
}

impl fmt::Debug for TurnServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TurnServer")
            .field("address", &self.address)
            .field("username", &self.username)
            .field("credential", &"<redacted>")
            .finish()
    }
}

/// One media file to publish, with its nominal per-unit duration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MediaSource {
    pub kind: MediaKind,
    pub path: PathBuf,
    pub interval: Duration,
}

impl Config {
    pub fn load() -> Result<Self> {
        // A missing .env file is fine
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str, default: &str| {
            lookup(key)
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| default.to_string())
        };
        let millis = |key: &str, default: u64| -> Result<Duration> {
            let ms = match lookup(key).filter(|v| !v.is_empty()) {
                Some(v) => v
                    .trim()
                    .parse::<u64>()
                    .with_context(|| format!("{} must be a whole number of milliseconds, got {:?}", key, v))?,
                None => default,
            };
            if ms == 0 {
                anyhow::bail!("{} must be greater than zero", key);
            }
            Ok(Duration::from_millis(ms))
        };

        let turn_server = lookup("ISGS_TURN_ADDR")
            .filter(|addr| !addr.is_empty())
            .map(|address| TurnServer {
                address,
                username: lookup("ISGS_TURN_USER").unwrap_or_default(),
                credential: lookup("ISGS_TURN_PASS").unwrap_or_default(),
            });

        let config = Config {
            signal_url: var("ISGS_ADDR", "ws://localhost:7000/ws"),
            session_id: var("ISGS_SESSION", "test session"),
            video_path: PathBuf::from(var("ISGS_VIDEO_SRC", "output.h264")),
            audio_path: PathBuf::from(var("ISGS_AUDIO_SRC", "output.ogg")),
            turn_server,
            health_address: var("ISGS_HEALTH_ADDR", "0.0.0.0:8090"),
            video_frame_interval: millis("ISGS_VIDEO_FRAME_MS", 33)?,
            audio_packet_interval: millis("ISGS_AUDIO_PACKET_MS", 20)?,
            join_timeout: millis("ISGS_JOIN_TIMEOUT_MS", 10_000)?,
        };

        tracing::info!("Signaling address: {}", config.signal_url);
        tracing::info!("Session: {}", config.session_id);
        tracing::info!("Video source: {}", config.video_path.display());
        tracing::info!("Audio source: {}", config.audio_path.display());
        match &config.turn_server {
            Some(turn) => tracing::info!("TURN server: {} (user {})", turn.address, turn.username),
            None => tracing::info!("No TURN server configured, using {}", DEFAULT_STUN_SERVER),
        }

        Ok(config)
    }

    pub fn ice_servers(&self) -> Vec<RTCIceServer> {
        match &self.turn_server {
            Some(turn) => vec![RTCIceServer {
                urls: vec![format!("turn:{}", turn.address)],
                username: turn.username.clone(),
                credential: turn.credential.clone(),
                ..Default::default()
            }],
            None => vec![RTCIceServer {
                urls: vec![DEFAULT_STUN_SERVER.to_string()],
                ..Default::default()
            }],
        }
    }

    /// Media files to publish. Video is always published, so a missing
    /// video file surfaces as not found when it is opened. Audio is only
    /// published when its file exists.
    pub fn publish_sources(&self) -> Vec<MediaSource> {
        let mut sources = vec![MediaSource {
            kind: MediaKind::Video,
            path: self.video_path.clone(),
            interval: self.video_frame_interval,
        }];
        if self.audio_path.exists() {
            sources.push(MediaSource {
                kind: MediaKind::Audio,
                path: self.audio_path.clone(),
                interval: self.audio_packet_interval,
            });
        } else {
            tracing::warn!(
                "No audio file at {}, publishing video only",
                self.audio_path.display()
            );
        }
        sources
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.signal_url, "ws://localhost:7000/ws");
        assert_eq!(config.video_path, PathBuf::from("output.h264"));
        assert_eq!(config.audio_path, PathBuf::from("output.ogg"));
        assert_eq!(config.health_address, "0.0.0.0:8090");
        assert_eq!(config.video_frame_interval, Duration::from_millis(33));
        assert_eq!(config.audio_packet_interval, Duration::from_millis(20));
        assert_eq!(config.join_timeout, Duration::from_secs(10));
        assert!(config.turn_server.is_none());

        let ice = config.ice_servers();
        assert_eq!(ice.len(), 1);
        assert_eq!(ice[0].urls, vec![DEFAULT_STUN_SERVER.to_string()]);
    }

    #[test]
    fn test_turn_server_from_env() {
        let config = config_from(&[
            ("ISGS_TURN_ADDR", "turn.example.com:3478"),
            ("ISGS_TURN_USER", "pub"),
            ("ISGS_TURN_PASS", "hunter2"),
        ])
        .unwrap();

        let ice = config.ice_servers();
        assert_eq!(ice[0].urls, vec!["turn:turn.example.com:3478".to_string()]);
        assert_eq!(ice[0].username, "pub");
        assert_eq!(ice[0].credential, "hunter2");
        assert!(!format!("{:?}", config).contains("hunter2"));
    }

    #[test]
    fn test_invalid_interval_is_an_error() {
        assert!(config_from(&[("ISGS_VIDEO_FRAME_MS", "fast")]).is_err());
        assert!(config_from(&[("ISGS_AUDIO_PACKET_MS", "0")]).is_err());
        let config = config_from(&[("ISGS_VIDEO_FRAME_MS", "40")]).unwrap();
        assert_eq!(config.video_frame_interval, Duration::from_millis(40));
    }

    #[test]
    fn test_missing_audio_is_skipped() {
        let missing = std::env::temp_dir().join("reelcast-config-missing.ogg");
        let config = config_from(&[
            ("ISGS_VIDEO_SRC", "clip.h264"),
            ("ISGS_AUDIO_SRC", missing.to_str().unwrap()),
        ])
        .unwrap();

        let sources = config.publish_sources();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].kind, MediaKind::Video);
        assert_eq!(sources[0].path, PathBuf::from("clip.h264"));
    }

    #[test]
    fn test_missing_video_is_still_published() {
        let missing = std::env::temp_dir().join("reelcast-config-missing.h264");
        let present = std::env::temp_dir().join("reelcast-config-present.ogg");
        std::fs::write(&present, b"OggS").unwrap();

        let config = config_from(&[
            ("ISGS_VIDEO_SRC", missing.to_str().unwrap()),
            ("ISGS_AUDIO_SRC", present.to_str().unwrap()),
        ])
        .unwrap();
        let sources = config.publish_sources();
        let _ = std::fs::remove_file(&present);

        let kinds: Vec<MediaKind> = sources.iter().map(|s| s.kind).collect();
        assert_eq!(kinds, vec![MediaKind::Video, MediaKind::Audio]);
        assert_eq!(sources[0].path, missing);
        assert_eq!(sources[1].interval, Duration::from_millis(20));
    }
}
