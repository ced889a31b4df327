//! Offer artifacts handed to the recorder.
//!
//! The recorder consumes a session's offer by path, so each offer is written
//! to its own file before the negotiation request goes out and removed when
//! the session ends.

use crate::errors::ReceiverError;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Opaque handle to a written artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactHandle(PathBuf);

impl ArtifactHandle {
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self(path)
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.0
    }
}

/// Destination for offer artifacts.
pub trait ArtifactSink {
    /// Persist `content` under `key` and return a handle to it.
    ///
    /// # Errors
    ///
    /// Returns `ReceiverError::Artifact` if the content cannot be stored.
    fn write(&mut self, content: &str, key: &str) -> Result<ArtifactHandle, ReceiverError>;

    /// Remove a previously written artifact.
    ///
    /// # Errors
    ///
    /// Returns `ReceiverError::Artifact` if the artifact exists but cannot be
    /// removed.
    fn delete(&mut self, handle: &ArtifactHandle) -> Result<(), ReceiverError>;
}

/// Writes each offer to `<dir>/<key>.sdp`.
#[derive(Debug, Clone)]
pub struct FileArtifactSink {
    dir: PathBuf,
}

impl FileArtifactSink {
    #[must_use]
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.sdp", sanitize_key(key)))
    }
}

impl ArtifactSink for FileArtifactSink {
    fn write(&mut self, content: &str, key: &str) -> Result<ArtifactHandle, ReceiverError> {
        if !self.dir.exists() {
            fs::create_dir_all(&self.dir).map_err(|e| {
                ReceiverError::Artifact(format!(
                    "failed to create {}: {e}",
                    self.dir.display()
                ))
            })?;
            info!(
                target: "receiver.artifacts",
                dir = %self.dir.display(),
                "Created SDP offer directory"
            );
        }

        let path = self.path_for(key);
        fs::write(&path, content).map_err(|e| {
            ReceiverError::Artifact(format!("failed to write {}: {e}", path.display()))
        })?;

        debug!(
            target: "receiver.artifacts",
            path = %path.display(),
            "SDP offer written"
        );
        Ok(ArtifactHandle::new(path))
    }

    fn delete(&mut self, handle: &ArtifactHandle) -> Result<(), ReceiverError> {
        match fs::remove_file(handle.path()) {
            Ok(()) => {
                debug!(
                    target: "receiver.artifacts",
                    path = %handle.path().display(),
                    "SDP offer removed"
                );
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ReceiverError::Artifact(format!(
                "failed to remove {}: {e}",
                handle.path().display()
            ))),
        }
    }
}

/// Keep keys usable as file names: anything outside `[A-Za-z0-9._-]` becomes `_`.
fn sanitize_key(key: &str) -> String {
    let cleaned: String = key
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    // Never produce "", "." or ".."
    if cleaned.trim_matches('.').is_empty() {
        format!("session{cleaned}")
    } else {
        cleaned
    }
}
