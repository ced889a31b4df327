//! Pending negotiation requests.
//!
//! A `receiveMediaResponse` only echoes the id of the request it answers, so
//! the id is mapped back to the broadcaster it was sent for.

use std::collections::HashMap;

/// Outstanding negotiation requests, keyed by request id.
#[derive(Debug, Default)]
pub struct PendingRequests {
    by_request: HashMap<String, String>,
}

impl PendingRequests {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `request_id` negotiates the session of `user_id`.
    pub fn put(&mut self, request_id: String, user_id: String) {
        self.by_request.insert(request_id, user_id);
    }

    /// Remove and return the user id for a request.
    pub fn take(&mut self, request_id: &str) -> Option<String> {
        self.by_request.remove(request_id)
    }

    /// Drop every outstanding request for a user. Returns how many were dropped.
    pub fn forget_user(&mut self, user_id: &str) -> usize {
        let before = self.by_request.len();
        self.by_request.retain(|_, user| user != user_id);
        before - self.by_request.len()
    }

    pub fn clear(&mut self) {
        self.by_request.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_request.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_request.is_empty()
    }

    #[must_use]
    pub fn is_pending_for(&self, user_id: &str) -> bool {
        self.by_request.values().any(|user| user == user_id)
    }
}
