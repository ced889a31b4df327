//! Outbound message construction.
//!
//! Every message gets a fresh time-ordered UUIDv7 id, so ids sort in send
//! order and never repeat within a process.

use super::messages::{OutboundMessage, OutboundPayload};
use secrecy::{ExposeSecret, SecretString};
use uuid::Uuid;

/// Builds outbound messages for one set of credentials.
#[derive(Debug, Clone)]
pub struct MessageBuilder {
    role: String,
    api_key: SecretString,
    room: String,
}

impl MessageBuilder {
    #[must_use]
    pub fn new(role: String, api_key: SecretString, room: String) -> Self {
        Self {
            role,
            api_key,
            room,
        }
    }

    #[must_use]
    pub fn auth(&self) -> OutboundMessage {
        Self::with_fresh_id(OutboundPayload::Auth {
            role: self.role.clone(),
            apikey: self.api_key.expose_secret().to_string(),
        })
    }

    #[must_use]
    pub fn join_room(&self) -> OutboundMessage {
        Self::with_fresh_id(OutboundPayload::JoinRoom {
            room: self.room.clone(),
        })
    }

    /// Negotiation request for one broadcaster.
    #[must_use]
    pub fn receive_media(&self, sdp_offer: String, user_id: String) -> OutboundMessage {
        Self::with_fresh_id(OutboundPayload::ReceiveMedia { sdp_offer, user_id })
    }

    #[must_use]
    pub fn logout(&self) -> OutboundMessage {
        Self::with_fresh_id(OutboundPayload::Logout)
    }

    #[must_use]
    pub fn ping(&self) -> OutboundMessage {
        Self::with_fresh_id(OutboundPayload::Ping)
    }

    #[must_use]
    pub fn room(&self) -> &str {
        &self.room
    }

    fn with_fresh_id(payload: OutboundPayload) -> OutboundMessage {
        OutboundMessage {
            id: Uuid::now_v7().to_string(),
            payload,
        }
    }
}
