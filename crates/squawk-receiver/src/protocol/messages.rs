//! Signaling wire messages.
//!
//! Every message is a JSON object with `id`, `type` and an optional `error`
//! plus type-specific fields. Outbound messages are serialized from
//! [`OutboundMessage`]; inbound text is decoded into [`InboundMessage`].

use crate::errors::ReceiverError;
use serde::{Deserialize, Serialize};

/// A remote presenter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Broadcaster {
    #[serde(rename = "userId")]
    pub user_id: String,
    #[serde(default)]
    pub username: String,
}

/// Outbound message: a fresh id plus a typed payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutboundMessage {
    pub id: String,
    #[serde(flatten)]
    pub payload: OutboundPayload,
}

impl OutboundMessage {
    /// Serialize to the JSON text sent on the wire.
    ///
    /// # Errors
    ///
    /// Returns `ReceiverError::Internal` if serialization fails.
    pub fn to_json(&self) -> Result<String, ReceiverError> {
        serde_json::to_string(self)
            .map_err(|e| ReceiverError::Internal(format!("failed to encode message: {e}")))
    }

    /// Wire `type` of this message.
    #[must_use]
    pub fn message_type(&self) -> &'static str {
        self.payload.message_type()
    }
}

/// Outbound payloads, tagged by wire `type`.
#[derive(Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum OutboundPayload {
    #[serde(rename = "auth")]
    Auth { role: String, apikey: String },

    #[serde(rename = "joinRoom")]
    JoinRoom { room: String },

    #[serde(rename = "receiveMedia")]
    ReceiveMedia {
        #[serde(rename = "sdpOffer")]
        sdp_offer: String,
        #[serde(rename = "userId")]
        user_id: String,
    },

    #[serde(rename = "logout")]
    Logout,

    #[serde(rename = "ping")]
    Ping,
}

impl OutboundPayload {
    #[must_use]
    pub fn message_type(&self) -> &'static str {
        match self {
            OutboundPayload::Auth { .. } => "auth",
            OutboundPayload::JoinRoom { .. } => "joinRoom",
            OutboundPayload::ReceiveMedia { .. } => "receiveMedia",
            OutboundPayload::Logout => "logout",
            OutboundPayload::Ping => "ping",
        }
    }
}

/// Custom Debug implementation that redacts the API key.
impl std::fmt::Debug for OutboundPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutboundPayload::Auth { role, .. } => f
                .debug_struct("Auth")
                .field("role", role)
                .field("apikey", &"[REDACTED]")
                .finish(),
            OutboundPayload::JoinRoom { room } => {
                f.debug_struct("JoinRoom").field("room", room).finish()
            }
            OutboundPayload::ReceiveMedia { sdp_offer, user_id } => f
                .debug_struct("ReceiveMedia")
                .field("sdp_offer_len", &sdp_offer.len())
                .field("user_id", user_id)
                .finish(),
            OutboundPayload::Logout => f.write_str("Logout"),
            OutboundPayload::Ping => f.write_str("Ping"),
        }
    }
}

/// A decoded inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    AuthResponse {
        error: Option<String>,
    },
    JoinRoomResponse {
        error: Option<String>,
        existing_presenters: Vec<Broadcaster>,
    },
    ReceiveMediaResponse {
        id: String,
        error: Option<String>,
        sdp_answer: Option<String>,
    },
    NewPresenterArrived {
        user: Broadcaster,
    },
    PresenterLeft {
        user_id: String,
    },
    MediaOverride,
    PingResponse,
    /// A well-formed message of a type this client does not handle.
    Unknown {
        message_type: String,
    },
}

/// Loose envelope used to decode any inbound message.
#[derive(Debug, Deserialize)]
struct RawInbound {
    #[serde(default)]
    id: Option<String>,
    #[serde(rename = "type")]
    message_type: String,
    #[serde(default)]
    error: Option<serde_json::Value>,
    #[serde(default, rename = "existingPresenters")]
    existing_presenters: Option<Vec<Broadcaster>>,
    #[serde(default, rename = "sdpAnswer")]
    sdp_answer: Option<String>,
    #[serde(default)]
    user: Option<Broadcaster>,
    #[serde(default, rename = "userId")]
    user_id: Option<String>,
}

impl InboundMessage {
    /// Decode inbound text.
    ///
    /// # Errors
    ///
    /// Returns `ReceiverError::Protocol` for text that is not a JSON object
    /// with a string `type`, or for a known type missing a required field.
    pub fn parse(text: &str) -> Result<Self, ReceiverError> {
        let raw: RawInbound = serde_json::from_str(text)
            .map_err(|e| ReceiverError::Protocol(format!("undecodable message: {e}")))?;

        let error = raw.error.map(|value| match value {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        });

        let message = match raw.message_type.as_str() {
            "authResponse" => InboundMessage::AuthResponse { error },
            "joinRoomResponse" => InboundMessage::JoinRoomResponse {
                error,
                existing_presenters: raw.existing_presenters.unwrap_or_default(),
            },
            "receiveMediaResponse" => InboundMessage::ReceiveMediaResponse {
                id: raw.id.ok_or_else(|| missing("receiveMediaResponse", "id"))?,
                error,
                sdp_answer: raw.sdp_answer,
            },
            "newPresenterArrived" => InboundMessage::NewPresenterArrived {
                user: raw
                    .user
                    .ok_or_else(|| missing("newPresenterArrived", "user"))?,
            },
            "presenterLeft" => InboundMessage::PresenterLeft {
                user_id: raw
                    .user_id
                    .ok_or_else(|| missing("presenterLeft", "userId"))?,
            },
            "mediaOverride" => InboundMessage::MediaOverride,
            "pingResponse" => InboundMessage::PingResponse,
            other => InboundMessage::Unknown {
                message_type: other.to_string(),
            },
        };

        Ok(message)
    }

    /// Wire `type` of this message, used as a bounded metric label.
    #[must_use]
    pub fn message_type(&self) -> &'static str {
        match self {
            InboundMessage::AuthResponse { .. } => "authResponse",
            InboundMessage::JoinRoomResponse { .. } => "joinRoomResponse",
            InboundMessage::ReceiveMediaResponse { .. } => "receiveMediaResponse",
            InboundMessage::NewPresenterArrived { .. } => "newPresenterArrived",
            InboundMessage::PresenterLeft { .. } => "presenterLeft",
            InboundMessage::MediaOverride => "mediaOverride",
            InboundMessage::PingResponse => "pingResponse",
            InboundMessage::Unknown { .. } => "unknown",
        }
    }
}

fn missing(message_type: &str, field: &str) -> ReceiverError {
    ReceiverError::Protocol(format!("{message_type} is missing `{field}`"))
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[test]
    fn test_outbound_wire_shape() {
        let auth = OutboundMessage {
            id: "id-1".to_string(),
            payload: OutboundPayload::Auth {
                role: "listener".to_string(),
                apikey: "secret".to_string(),
            },
        };
        let value: Value = serde_json::from_str(&auth.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"id": "id-1", "type": "auth", "role": "listener", "apikey": "secret"})
        );

        let receive = OutboundMessage {
            id: "id-2".to_string(),
            payload: OutboundPayload::ReceiveMedia {
                sdp_offer: "v=0".to_string(),
                user_id: "u1".to_string(),
            },
        };
        let value: Value = serde_json::from_str(&receive.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"id": "id-2", "type": "receiveMedia", "sdpOffer": "v=0", "userId": "u1"})
        );

        let logout = OutboundMessage {
            id: "id-3".to_string(),
            payload: OutboundPayload::Logout,
        };
        let value: Value = serde_json::from_str(&logout.to_json().unwrap()).unwrap();
        assert_eq!(value, json!({"id": "id-3", "type": "logout"}));
    }

    #[test]
    fn test_auth_debug_redacts_api_key() {
        let payload = OutboundPayload::Auth {
            role: "listener".to_string(),
            apikey: "super-secret-key".to_string(),
        };
        let debug = format!("{payload:?}");
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("super-secret-key"));
    }

    #[test]
    fn test_parse_join_room_response() {
        let text = r#"{
            "id": "r1",
            "type": "joinRoomResponse",
            "existingPresenters": [
                {"userId": "u1", "username": "alice"},
                {"userId": "u2", "username": "bob"}
            ]
        }"#;

        let message = InboundMessage::parse(text).unwrap();
        let InboundMessage::JoinRoomResponse {
            error,
            existing_presenters,
        } = message
        else {
            panic!("expected JoinRoomResponse, got {message:?}");
        };
        assert!(error.is_none());
        assert_eq!(existing_presenters.len(), 2);
        assert_eq!(existing_presenters[1].user_id, "u2");
        assert_eq!(existing_presenters[1].username, "bob");
    }

    #[test]
    fn test_parse_error_field() {
        let message =
            InboundMessage::parse(r#"{"id":"a","type":"authResponse","error":"bad key"}"#)
                .unwrap();
        assert_eq!(
            message,
            InboundMessage::AuthResponse {
                error: Some("bad key".to_string())
            }
        );

        // Non-string errors are still treated as errors
        let message =
            InboundMessage::parse(r#"{"id":"a","type":"authResponse","error":{"code":401}}"#)
                .unwrap();
        assert!(matches!(message, InboundMessage::AuthResponse { error: Some(_) }));
    }

    #[test]
    fn test_parse_notifications() {
        let arrived = InboundMessage::parse(
            r#"{"type":"newPresenterArrived","user":{"userId":"u9","username":"carol"}}"#,
        )
        .unwrap();
        assert_eq!(
            arrived,
            InboundMessage::NewPresenterArrived {
                user: Broadcaster {
                    user_id: "u9".to_string(),
                    username: "carol".to_string(),
                }
            }
        );

        let left = InboundMessage::parse(r#"{"type":"presenterLeft","userId":"u9"}"#).unwrap();
        assert_eq!(
            left,
            InboundMessage::PresenterLeft {
                user_id: "u9".to_string()
            }
        );

        assert_eq!(
            InboundMessage::parse(r#"{"type":"mediaOverride"}"#).unwrap(),
            InboundMessage::MediaOverride
        );
        assert_eq!(
            InboundMessage::parse(r#"{"id":"p","type":"pingResponse"}"#).unwrap(),
            InboundMessage::PingResponse
        );
    }

    #[test]
    fn test_parse_unknown_type() {
        let message = InboundMessage::parse(r#"{"type":"iceCandidate","candidate":{}}"#).unwrap();
        assert_eq!(
            message,
            InboundMessage::Unknown {
                message_type: "iceCandidate".to_string()
            }
        );
    }

    #[test]
    fn test_parse_malformed() {
        assert!(matches!(
            InboundMessage::parse("not json"),
            Err(ReceiverError::Protocol(_))
        ));
        assert!(matches!(
            InboundMessage::parse(r#"{"id":"x"}"#),
            Err(ReceiverError::Protocol(_))
        ));
        assert!(matches!(
            InboundMessage::parse(r#"{"type":"presenterLeft"}"#),
            Err(ReceiverError::Protocol(msg)) if msg.contains("userId")
        ));
        assert!(matches!(
            InboundMessage::parse(r#"{"type":"receiveMediaResponse","sdpAnswer":"v=0"}"#),
            Err(ReceiverError::Protocol(msg)) if msg.contains("id")
        ));
    }
}
