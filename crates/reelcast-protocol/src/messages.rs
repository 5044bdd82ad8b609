use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{IceCandidate, ProtocolError, RpcError, SessionDescription, Target};

const JSONRPC_VERSION: &str = "2.0";

/// Parameters of the `join` request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinParams {
    /// Session (room) to join
    pub sid: String,
    /// Participant id
    pub uid: String,
    pub offer: SessionDescription,
}

/// Parameters of a `trickle` notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrickleParams {
    pub target: Target,
    pub candidate: IceCandidate,
}

/// Calls sent from the publisher to the SFU
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "lowercase")]
pub enum ClientCall {
    Join(JoinParams),
    Trickle(TrickleParams),
}

/// JSON-RPC envelope around a [`ClientCall`]
#[derive(Debug, Clone, Serialize)]
pub struct ClientMessage {
    jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(flatten)]
    pub call: ClientCall,
}

impl ClientMessage {
    /// A call expecting a response with the same `id`
    pub fn request(id: u64, call: ClientCall) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id: Some(id),
            call,
        }
    }

    /// A fire-and-forget call
    pub fn notification(call: ClientCall) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id: None,
            call,
        }
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Messages received from the SFU
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    /// Reply to one of our requests
    Response {
        id: u64,
        result: Result<Value, RpcError>,
    },
    /// Renegotiation offer for the subscriber transport
    Offer(SessionDescription),
    Trickle(TrickleParams),
    /// Notification this client does not handle
    Other { method: String },
}

#[derive(Deserialize)]
struct RawServerMessage {
    #[serde(default)]
    id: Option<u64>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<Value>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

impl ServerMessage {
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let raw: RawServerMessage = serde_json::from_str(text)?;

        if let Some(method) = raw.method {
            let params = raw.params.unwrap_or(Value::Null);
            return match method.as_str() {
                "offer" => Ok(ServerMessage::Offer(serde_json::from_value(params)?)),
                "trickle" => Ok(ServerMessage::Trickle(serde_json::from_value(params)?)),
                _ => Ok(ServerMessage::Other { method }),
            };
        }

        let id = raw
            .id
            .ok_or_else(|| ProtocolError::Invalid("message has neither method nor id".into()))?;
        let result = match (raw.result, raw.error) {
            (_, Some(error)) => Err(error),
            (Some(result), None) => Ok(result),
            (None, None) => Ok(Value::Null),
        };
        Ok(ServerMessage::Response { id, result })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_join_request_shape() {
        let msg = ClientMessage::request(
            1,
            ClientCall::Join(JoinParams {
                sid: "lobby".into(),
                uid: "a1b2".into(),
                offer: SessionDescription::offer("v=0"),
            }),
        );

        let value: Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "jsonrpc": "2.0",
                "id": 1,
                "method": "join",
                "params": {
                    "sid": "lobby",
                    "uid": "a1b2",
                    "offer": { "type": "offer", "sdp": "v=0" }
                }
            })
        );
    }

    #[test]
    fn test_trickle_notification_has_no_id() {
        let msg = ClientMessage::notification(ClientCall::Trickle(TrickleParams {
            target: Target::Publisher,
            candidate: IceCandidate {
                candidate: "candidate:1 1 udp 2130706431 10.0.0.2 50000 typ host".into(),
                sdp_mid: Some("0".into()),
                sdp_mline_index: Some(0),
                username_fragment: None,
            },
        }));

        let value: Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert!(value.get("id").is_none());
        assert_eq!(value["method"], "trickle");
        assert_eq!(value["params"]["target"], 0);
        assert_eq!(value["params"]["candidate"]["sdpMLineIndex"], 0);
        assert_eq!(value["params"]["candidate"]["sdpMid"], "0");
    }

    #[test]
    fn test_parse_join_answer() {
        let text = r#"{"jsonrpc":"2.0","id":1,"result":{"type":"answer","sdp":"v=0"}}"#;
        let ServerMessage::Response { id, result } = ServerMessage::parse(text).unwrap() else {
            panic!("expected response");
        };
        assert_eq!(id, 1);
        let answer: SessionDescription = serde_json::from_value(result.unwrap()).unwrap();
        assert_eq!(answer, SessionDescription::answer("v=0"));
    }

    #[test]
    fn test_parse_error_response() {
        let text = r#"{"jsonrpc":"2.0","id":1,"error":{"code":500,"message":"no such session"}}"#;
        match ServerMessage::parse(text).unwrap() {
            ServerMessage::Response { result: Err(e), .. } => {
                assert_eq!(e.code, 500);
                assert_eq!(e.message, "no such session");
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_parse_notifications() {
        let trickle = r#"{"jsonrpc":"2.0","method":"trickle","params":{"target":1,"candidate":{"candidate":"candidate:2","sdpMid":"1","sdpMLineIndex":1}}}"#;
        match ServerMessage::parse(trickle).unwrap() {
            ServerMessage::Trickle(params) => {
                assert_eq!(params.target, Target::Subscriber);
                assert_eq!(params.candidate.sdp_mline_index, Some(1));
            }
            other => panic!("unexpected message: {:?}", other),
        }

        let offer = r#"{"jsonrpc":"2.0","method":"offer","params":{"type":"offer","sdp":"v=0"}}"#;
        assert_eq!(
            ServerMessage::parse(offer).unwrap(),
            ServerMessage::Offer(SessionDescription::offer("v=0"))
        );

        let other = r#"{"jsonrpc":"2.0","method":"ping"}"#;
        assert!(matches!(
            ServerMessage::parse(other).unwrap(),
            ServerMessage::Other { .. }
        ));
    }

    #[test]
    fn test_unknown_trickle_target_is_rejected() {
        let text = r#"{"method":"trickle","params":{"target":7,"candidate":{"candidate":"c"}}}"#;
        assert!(ServerMessage::parse(text).is_err());
    }
}
