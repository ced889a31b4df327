//! Session registry keyed by broadcaster user id.
//!
//! Holds at most one session per broadcaster. Removing a session hands it
//! back to the caller, who owns port release and artifact cleanup.

use super::port_pool::PortPool;
use super::types::StreamingSession;
use crate::artifacts::ArtifactHandle;
use crate::errors::ReceiverError;
use crate::protocol::Broadcaster;
use std::collections::HashMap;
use tracing::error;

/// Active sessions, one per broadcaster.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<String, StreamingSession>,
}

impl SessionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new session.
    ///
    /// # Errors
    ///
    /// Returns `ReceiverError::DuplicateSession` if the broadcaster already
    /// has a session; the existing session is left untouched.
    pub fn create(
        &mut self,
        broadcaster: Broadcaster,
        receiver_port: u16,
        sdp_offer: String,
        offer_artifact: ArtifactHandle,
    ) -> Result<&StreamingSession, ReceiverError> {
        use std::collections::hash_map::Entry;

        match self.sessions.entry(broadcaster.user_id.clone()) {
            Entry::Occupied(_) => Err(ReceiverError::DuplicateSession(broadcaster.user_id)),
            Entry::Vacant(slot) => Ok(slot.insert(StreamingSession::new(
                broadcaster,
                receiver_port,
                sdp_offer,
                offer_artifact,
            ))),
        }
    }

    #[must_use]
    pub fn get(&self, user_id: &str) -> Option<&StreamingSession> {
        self.sessions.get(user_id)
    }

    #[must_use]
    pub fn contains(&self, user_id: &str) -> bool {
        self.sessions.contains_key(user_id)
    }

    /// Record the negotiated answer for a session.
    ///
    /// # Errors
    ///
    /// Returns `ReceiverError::SessionNotFound` if no session exists.
    pub fn set_answer(
        &mut self,
        user_id: &str,
        answer: String,
    ) -> Result<&StreamingSession, ReceiverError> {
        let session = self
            .sessions
            .get_mut(user_id)
            .ok_or_else(|| ReceiverError::SessionNotFound(user_id.to_string()))?;
        session.set_answer(answer);
        Ok(session)
    }

    /// Remove a session. A second removal for the same user returns `None`.
    pub fn remove(&mut self, user_id: &str) -> Option<StreamingSession> {
        self.sessions.remove(user_id)
    }

    /// Remove every session and return all of their ports to `pool`.
    ///
    /// No other cleanup happens here; the drained sessions are returned so
    /// the caller can decide what to do with their artifacts.
    pub fn clear(&mut self, pool: &mut PortPool) -> Vec<StreamingSession> {
        let drained: Vec<StreamingSession> = self.sessions.drain().map(|(_, s)| s).collect();
        for session in &drained {
            if let Err(e) = pool.release(session.receiver_port()) {
                error!(
                    target: "receiver.session",
                    user_id = %session.user_id(),
                    error = %e,
                    "Session held a port the pool did not lease"
                );
            }
        }
        drained
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Iterate over the active sessions in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &StreamingSession> {
        self.sessions.values()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn broadcaster(user_id: &str) -> Broadcaster {
        Broadcaster {
            user_id: user_id.to_string(),
            username: format!("{user_id}-name"),
        }
    }

    fn artifact(user_id: &str) -> ArtifactHandle {
        ArtifactHandle::new(PathBuf::from(format!("/tmp/{user_id}.sdp")))
    }

    #[test]
    fn test_create_and_get() {
        let mut registry = SessionRegistry::new();
        let session = registry
            .create(broadcaster("u1"), 5004, "offer".to_string(), artifact("u1"))
            .unwrap();

        assert_eq!(session.user_id(), "u1");
        assert_eq!(session.receiver_port(), 5004);
        assert!(!session.is_negotiated());

        assert!(registry.get("u1").is_some());
        assert!(registry.get("u2").is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_duplicate_create_is_rejected() {
        let mut registry = SessionRegistry::new();
        registry
            .create(broadcaster("u1"), 5004, "first".to_string(), artifact("u1"))
            .unwrap();

        let err = registry
            .create(broadcaster("u1"), 5006, "second".to_string(), artifact("u1"))
            .unwrap_err();
        assert!(matches!(err, ReceiverError::DuplicateSession(id) if id == "u1"));

        // Original session is untouched
        let session = registry.get("u1").unwrap();
        assert_eq!(session.receiver_port(), 5004);
        assert_eq!(session.sdp_offer(), "first");
    }

    #[test]
    fn test_set_answer() {
        let mut registry = SessionRegistry::new();
        registry
            .create(broadcaster("u1"), 5004, "offer".to_string(), artifact("u1"))
            .unwrap();

        let session = registry.set_answer("u1", "answer".to_string()).unwrap();
        assert_eq!(session.sdp_answer(), Some("answer"));

        assert!(matches!(
            registry.set_answer("missing", "answer".to_string()),
            Err(ReceiverError::SessionNotFound(_))
        ));
    }

    #[test]
    fn test_remove_is_idempotent() {
        let mut registry = SessionRegistry::new();
        registry
            .create(broadcaster("u1"), 5004, "offer".to_string(), artifact("u1"))
            .unwrap();

        let removed = registry.remove("u1").unwrap();
        assert_eq!(removed.receiver_port(), 5004);
        assert!(registry.remove("u1").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_clear_releases_every_port() {
        let mut pool = PortPool::new(&[5004, 5006, 5008]);
        let mut registry = SessionRegistry::new();

        for user in ["u1", "u2"] {
            let port = pool.lease().unwrap();
            registry
                .create(broadcaster(user), port, "offer".to_string(), artifact(user))
                .unwrap();
        }
        assert_eq!(pool.available(), 1);

        let drained = registry.clear(&mut pool);

        assert_eq!(drained.len(), 2);
        assert!(registry.is_empty());
        assert_eq!(pool.available(), 3);
        assert_eq!(pool.leased(), 0);
    }
}
