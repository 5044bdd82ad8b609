//! Session join over the SFU's JSON-RPC WebSocket
//!
//! Only the publisher transport is negotiated. Subscriber offers from the
//! SFU are acknowledged in the log and otherwise ignored.

use anyhow::{anyhow, bail, Result};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

use reelcast_protocol::{
    ClientCall, ClientMessage, IceCandidate, JoinParams, ServerMessage, SessionDescription,
    Target, TrickleParams,
};

use crate::publisher::Publisher;

const JOIN_REQUEST_ID: u64 = 1;
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWrite = SplitSink<WsStream, Message>;
type WsRead = SplitStream<WsStream>;

/// Join `session_id` as `uid`, returning the task that keeps signaling
/// alive for the rest of the session. Fails if the SFU has not answered
/// within `answer_timeout`.
pub async fn join(
    url: &str,
    session_id: &str,
    uid: &str,
    publisher: Arc<Publisher>,
    local_candidates: mpsc::UnboundedReceiver<IceCandidate>,
    answer_timeout: Duration,
) -> Result<JoinHandle<Result<()>>> {
    let (write, read, early_candidates) = tokio::time::timeout(
        answer_timeout,
        negotiate(url, session_id, uid, &publisher),
    )
    .await
    .map_err(|_| anyhow!("No answer to join from {} within {:?}", url, answer_timeout))??;

    for candidate in early_candidates {
        publisher.add_ice_candidate(candidate).await?;
    }
    tracing::info!("Joined session {:?}", session_id);

    Ok(tokio::spawn(run_signaling(write, read, publisher, local_candidates)))
}

/// Connect, send the join offer and apply the SFU's answer. Returns the
/// publisher candidates trickled before the answer arrived.
async fn negotiate(
    url: &str,
    session_id: &str,
    uid: &str,
    publisher: &Publisher,
) -> Result<(WsWrite, WsRead, Vec<IceCandidate>)> {
    let (ws_stream, _) = connect_async(url).await?;
    let (mut write, mut read) = ws_stream.split();
    tracing::info!("Connected to signaling server at {}", url);

    let offer = publisher.create_offer().await?;
    let join = ClientMessage::request(
        JOIN_REQUEST_ID,
        ClientCall::Join(JoinParams {
            sid: session_id.to_string(),
            uid: uid.to_string(),
            offer: SessionDescription::offer(offer),
        }),
    );
    write.send(Message::Text(join.to_json()?.into())).await?;
    tracing::info!("Joining session {:?} as {}", session_id, uid);

    // Candidates the SFU trickles before the answer can't be applied yet
    let mut early_candidates = Vec::new();
    loop {
        let text = match read.next().await {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Close(_))) | None => bail!("Signaling closed before join completed"),
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(e.into()),
        };

        match ServerMessage::parse(&text)? {
            ServerMessage::Response { id, result } if id == JOIN_REQUEST_ID => {
                let answer: SessionDescription = serde_json::from_value(
                    result.map_err(|e| anyhow!("Join rejected: {}", e))?,
                )?;
                publisher.apply_answer(answer.sdp).await?;
                return Ok((write, read, early_candidates));
            }
            ServerMessage::Trickle(params) if params.target == Target::Publisher => {
                early_candidates.push(params.candidate);
            }
            other => tracing::debug!("Ignoring message during join: {:?}", other),
        }
    }
}

/// Forward local candidates, apply remote ones, and keep the socket alive
async fn run_signaling(
    mut write: WsWrite,
    mut read: WsRead,
    publisher: Arc<Publisher>,
    mut local_candidates: mpsc::UnboundedReceiver<IceCandidate>,
) -> Result<()> {
    let mut keepalive = tokio::time::interval(KEEPALIVE_INTERVAL);
    loop {
        tokio::select! {
            Some(candidate) = local_candidates.recv() => {
                let trickle = ClientMessage::notification(ClientCall::Trickle(TrickleParams {
                    target: Target::Publisher,
                    candidate,
                }));
                write.send(Message::Text(trickle.to_json()?.into())).await?;
            }
            _ = keepalive.tick() => {
                write.send(Message::Ping(Vec::new().into())).await?;
            }
            message = read.next() => match message {
                Some(Ok(Message::Text(text))) => handle_message(&publisher, &text).await?,
                Some(Ok(Message::Close(_))) | None => bail!("Signaling connection closed"),
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
            },
        }
    }
}

async fn handle_message(publisher: &Publisher, text: &str) -> Result<()> {
    let message = match ServerMessage::parse(text) {
        Ok(message) => message,
        Err(e) => {
            tracing::warn!("Unparseable signaling message: {}", e);
            return Ok(());
        }
    };

    match message {
        ServerMessage::Trickle(params) => match params.target {
            Target::Publisher => publisher.add_ice_candidate(params.candidate).await?,
            Target::Subscriber => {
                tracing::trace!("Ignoring subscriber candidate");
            }
        },
        ServerMessage::Offer(_) => {
            tracing::debug!("Ignoring subscriber offer, this client only publishes");
        }
        ServerMessage::Response { id, result: Err(e) } => {
            tracing::warn!("Request {} failed: {}", id, e);
        }
        ServerMessage::Response { .. } => {}
        ServerMessage::Other { method } => {
            tracing::debug!("Ignoring {} notification", method);
        }
    }
    Ok(())
}
