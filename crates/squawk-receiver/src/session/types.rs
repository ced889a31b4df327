//! Streaming session type.

use crate::artifacts::ArtifactHandle;
use crate::protocol::Broadcaster;
use chrono::{DateTime, TimeDelta, Utc};

/// One negotiated (or negotiating) stream from a broadcaster.
#[derive(Debug, Clone)]
pub struct StreamingSession {
    broadcaster: Broadcaster,
    receiver_port: u16,
    sdp_offer: String,
    sdp_answer: Option<String>,
    offer_artifact: ArtifactHandle,
    created_at: DateTime<Utc>,
}

impl StreamingSession {
    /// Create a session that is waiting for its answer.
    #[must_use]
    pub fn new(
        broadcaster: Broadcaster,
        receiver_port: u16,
        sdp_offer: String,
        offer_artifact: ArtifactHandle,
    ) -> Self {
        Self {
            broadcaster,
            receiver_port,
            sdp_offer,
            sdp_answer: None,
            offer_artifact,
            created_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    /// Shorthand for `broadcaster().user_id`.
    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.broadcaster.user_id
    }

    #[must_use]
    pub fn receiver_port(&self) -> u16 {
        self.receiver_port
    }

    #[must_use]
    pub fn sdp_offer(&self) -> &str {
        &self.sdp_offer
    }

    /// The server's answer, once negotiation has completed.
    #[must_use]
    pub fn sdp_answer(&self) -> Option<&str> {
        self.sdp_answer.as_deref()
    }

    /// Handle of the offer file the recorder reads.
    #[must_use]
    pub fn offer_artifact(&self) -> &ArtifactHandle {
        &self.offer_artifact
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Time since the session was created, as of `now`.
    #[must_use]
    pub fn age_at(&self, now: DateTime<Utc>) -> TimeDelta {
        now.signed_duration_since(self.created_at)
    }

    /// Whole seconds since the session was created.
    #[must_use]
    pub fn age_secs(&self) -> i64 {
        self.age_at(Utc::now()).num_seconds()
    }

    #[must_use]
    pub fn is_negotiated(&self) -> bool {
        self.sdp_answer.is_some()
    }

    pub(crate) fn set_answer(&mut self, answer: String) {
        self.sdp_answer = Some(answer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn session() -> StreamingSession {
        StreamingSession::new(
            Broadcaster {
                user_id: "u1".to_string(),
                username: "alice".to_string(),
            },
            5004,
            "v=0".to_string(),
            ArtifactHandle::new(PathBuf::from("u1.sdp")),
        )
    }

    #[test]
    fn test_age_measured_from_creation() {
        let session = session();
        let later = session.created_at() + TimeDelta::seconds(90);
        assert_eq!(session.age_at(later), TimeDelta::seconds(90));
        assert_eq!(session.age_at(later).num_seconds(), 90);
    }

    #[test]
    fn test_fresh_session_has_no_age() {
        let session = session();
        assert!(session.age_secs() <= 1);
        assert!(!session.is_negotiated());
    }
}
