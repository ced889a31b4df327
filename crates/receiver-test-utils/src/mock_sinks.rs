//! In-memory artifact sink and recording session-event sink.
//!
//! Both are cheap to clone; clones share state so the test keeps one copy
//! while the client owns the other.

use squawk_receiver::artifacts::{ArtifactHandle, ArtifactSink};
use squawk_receiver::events::SessionEvents;
use squawk_receiver::session::StreamingSession;
use squawk_receiver::ReceiverError;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
struct MemoryArtifactSinkInner {
    files: HashMap<PathBuf, String>,
    fail_writes: bool,
    writes: usize,
    deletes: usize,
}

/// Artifact sink that keeps offers in memory under `mem/<key>.sdp`.
#[derive(Debug, Clone, Default)]
pub struct MemoryArtifactSink {
    inner: Arc<Mutex<MemoryArtifactSinkInner>>,
}

impl MemoryArtifactSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following write fail.
    pub fn set_fail_writes(&self, fail: bool) {
        self.inner.lock().unwrap().fail_writes = fail;
    }

    /// Content stored for `key`, if any.
    #[must_use]
    pub fn content_for(&self, key: &str) -> Option<String> {
        self.inner
            .lock()
            .unwrap()
            .files
            .get(&Self::path_for(key))
            .cloned()
    }

    /// Number of artifacts currently stored.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().files.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn writes(&self) -> usize {
        self.inner.lock().unwrap().writes
    }

    #[must_use]
    pub fn deletes(&self) -> usize {
        self.inner.lock().unwrap().deletes
    }

    fn path_for(key: &str) -> PathBuf {
        PathBuf::from(format!("mem/{key}.sdp"))
    }
}

impl ArtifactSink for MemoryArtifactSink {
    fn write(&mut self, content: &str, key: &str) -> Result<ArtifactHandle, ReceiverError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_writes {
            return Err(ReceiverError::Artifact("mock write failure".to_string()));
        }
        let path = Self::path_for(key);
        inner.files.insert(path.clone(), content.to_string());
        inner.writes += 1;
        Ok(ArtifactHandle::new(path))
    }

    fn delete(&mut self, handle: &ArtifactHandle) -> Result<(), ReceiverError> {
        let mut inner = self.inner.lock().unwrap();
        inner.files.remove(handle.path());
        inner.deletes += 1;
        Ok(())
    }
}

/// A session notification as seen by the sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    pub user_id: String,
    pub port: u16,
    pub sdp_answer: Option<String>,
}

impl SessionRecord {
    fn from_session(session: &StreamingSession) -> Self {
        Self {
            user_id: session.user_id().to_string(),
            port: session.receiver_port(),
            sdp_answer: session.sdp_answer().map(str::to_string),
        }
    }
}

#[derive(Debug, Default)]
struct RecordingSessionEventsInner {
    joined: Vec<SessionRecord>,
    left: Vec<SessionRecord>,
}

/// Session event sink that records every notification.
#[derive(Debug, Clone, Default)]
pub struct RecordingSessionEvents {
    inner: Arc<Mutex<RecordingSessionEventsInner>>,
}

impl RecordingSessionEvents {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn joined(&self) -> Vec<SessionRecord> {
        self.inner.lock().unwrap().joined.clone()
    }

    #[must_use]
    pub fn left(&self) -> Vec<SessionRecord> {
        self.inner.lock().unwrap().left.clone()
    }
}

impl SessionEvents for RecordingSessionEvents {
    fn on_session_joined(&mut self, session: &StreamingSession) {
        self.inner
            .lock()
            .unwrap()
            .joined
            .push(SessionRecord::from_session(session));
    }

    fn on_session_left(&mut self, session: &StreamingSession) {
        self.inner
            .lock()
            .unwrap()
            .left
            .push(SessionRecord::from_session(session));
    }
}
