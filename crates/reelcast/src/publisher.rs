//! WebRTC peer connection carrying the published tracks

use anyhow::Result;
use reelcast_media::{MediaKind, TrackSink};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MIME_TYPE_H264, MIME_TYPE_OPUS, MediaEngine};
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

use reelcast_protocol::IceCandidate;

/// Channel for handing local ICE candidates to the signaling layer
pub type IceCandidateSender = mpsc::UnboundedSender<IceCandidate>;

fn codec_capability(kind: MediaKind) -> RTCRtpCodecCapability {
    match kind {
        MediaKind::Video => RTCRtpCodecCapability {
            mime_type: MIME_TYPE_H264.to_string(),
            clock_rate: 90000,
            channels: 0,
            ..Default::default()
        },
        MediaKind::Audio => RTCRtpCodecCapability {
            mime_type: MIME_TYPE_OPUS.to_string(),
            clock_rate: 48000,
            channels: 2,
            ..Default::default()
        },
    }
}

/// Publishing side of a session: one peer connection, one local track per
/// media kind being streamed
pub struct Publisher {
    peer_connection: Arc<RTCPeerConnection>,
    tracks: HashMap<MediaKind, Arc<TrackLocalStaticSample>>,
}

impl Publisher {
    /// Build the peer connection and add a track for each of `kinds`
    pub async fn new(
        ice_servers: Vec<RTCIceServer>,
        stream_id: &str,
        kinds: &[MediaKind],
        ice_candidate_tx: IceCandidateSender,
    ) -> Result<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;

        let registry = register_default_interceptors(Registry::new(), &mut media_engine)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let config = RTCConfiguration {
            ice_servers,
            ..Default::default()
        };
        let peer_connection = Arc::new(api.new_peer_connection(config).await?);

        let mut tracks = HashMap::new();
        for &kind in kinds {
            let track = Arc::new(TrackLocalStaticSample::new(
                codec_capability(kind),
                kind.to_string(),
                stream_id.to_string(),
            ));
            let rtp_sender = peer_connection
                .add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
                .await?;

            // Drain RTCP so the interceptors keep running
            tokio::spawn(async move {
                let mut rtcp_buf = vec![0u8; 1500];
                while rtp_sender.read(&mut rtcp_buf).await.is_ok() {}
                tracing::debug!("RTCP reader for {} track stopped", kind);
            });

            tracing::info!("Added local {} track to stream {}", kind, stream_id);
            tracks.insert(kind, track);
        }

        peer_connection.on_ice_candidate(Box::new(move |candidate| {
            let tx = ice_candidate_tx.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else {
                    return;
                };
                match candidate.to_json() {
                    Ok(json) => {
                        let _ = tx.send(IceCandidate {
                            candidate: json.candidate,
                            sdp_mid: json.sdp_mid,
                            sdp_mline_index: json.sdp_mline_index,
                            username_fragment: json.username_fragment,
                        });
                    }
                    Err(e) => tracing::warn!("Failed to serialize ICE candidate: {}", e),
                }
            })
        }));

        peer_connection.on_peer_connection_state_change(Box::new(
            move |state: RTCPeerConnectionState| {
                match state {
                    RTCPeerConnectionState::Failed => {
                        tracing::warn!("Peer connection failed")
                    }
                    _ => tracing::info!("Peer connection state: {}", state),
                }
                Box::pin(async {})
            },
        ));

        Ok(Self {
            peer_connection,
            tracks,
        })
    }

    /// Sink writing into the track for `kind`, if one was added
    pub fn sink(&self, kind: MediaKind) -> Option<TrackSink> {
        self.tracks.get(&kind).cloned().map(TrackSink::new)
    }

    pub async fn create_offer(&self) -> Result<String> {
        let offer = self.peer_connection.create_offer(None).await?;
        self.peer_connection
            .set_local_description(offer.clone())
            .await?;
        Ok(offer.sdp)
    }

    pub async fn apply_answer(&self, sdp: String) -> Result<()> {
        let answer = RTCSessionDescription::answer(sdp)?;
        self.peer_connection.set_remote_description(answer).await?;
        tracing::info!("SFU answer applied");
        Ok(())
    }

    pub async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        };
        self.peer_connection.add_ice_candidate(init).await?;
        Ok(())
    }

    pub async fn close(&self) -> Result<()> {
        self.peer_connection.close().await?;
        tracing::info!("Peer connection closed");
        Ok(())
    }
}
