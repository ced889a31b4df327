//! External recorder supervision.
//!
//! One recorder process per negotiated session. The command line is split on
//! whitespace and the placeholders `{sdp}`, `{port}` and `{user_id}` are
//! substituted per session.

use crate::errors::ReceiverError;
use crate::events::SessionEvents;
use crate::session::StreamingSession;
use std::collections::HashMap;
use std::process::{Child, Command, Stdio};
use tracing::{debug, error, info, warn};

/// Spawns a recorder when a session joins and kills it when the session leaves.
#[derive(Debug)]
pub struct RecorderLauncher {
    program: String,
    args: Vec<String>,
    children: HashMap<String, Child>,
}

impl RecorderLauncher {
    /// Parse a recorder command line.
    ///
    /// # Errors
    ///
    /// Returns `ReceiverError::Config` if the command line is blank.
    pub fn new(command_line: &str) -> Result<Self, ReceiverError> {
        let mut parts = command_line.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| ReceiverError::Config("recorder command is empty".to_string()))?;
        Ok(Self {
            program,
            args: parts.collect(),
            children: HashMap::new(),
        })
    }

    /// Number of recorder processes being supervised.
    #[must_use]
    pub fn running(&self) -> usize {
        self.children.len()
    }

    /// Arguments for one session, placeholders substituted.
    fn args_for(&self, session: &StreamingSession) -> Vec<String> {
        let sdp = session.offer_artifact().path().display().to_string();
        let port = session.receiver_port().to_string();
        self.args
            .iter()
            .map(|arg| {
                arg.replace("{sdp}", &sdp)
                    .replace("{port}", &port)
                    .replace("{user_id}", session.user_id())
            })
            .collect()
    }

    fn spawn(&self, session: &StreamingSession) -> Result<Child, ReceiverError> {
        Command::new(&self.program)
            .args(self.args_for(session))
            .stdin(Stdio::null())
            .spawn()
            .map_err(|e| ReceiverError::Recorder(format!("failed to spawn {}: {e}", self.program)))
    }

    fn stop(user_id: &str, mut child: Child, session_secs: Option<i64>) {
        // Already exited is fine, the wait below still reaps it
        if let Err(e) = child.kill() {
            debug!(target: "receiver.recorder", user_id = %user_id, error = %e, "Recorder kill failed");
        }
        match child.wait() {
            Ok(status) => info!(
                target: "receiver.recorder",
                user_id = %user_id,
                status = %status,
                session_secs = session_secs,
                "Recorder stopped"
            ),
            Err(e) => warn!(
                target: "receiver.recorder",
                user_id = %user_id,
                error = %e,
                "Failed to reap recorder"
            ),
        }
    }
}

impl SessionEvents for RecorderLauncher {
    fn on_session_joined(&mut self, session: &StreamingSession) {
        // A re-negotiated session replaces its recorder
        if let Some(previous) = self.children.remove(session.user_id()) {
            Self::stop(session.user_id(), previous, None);
        }

        match self.spawn(session) {
            Ok(child) => {
                info!(
                    target: "receiver.recorder",
                    user_id = %session.user_id(),
                    port = session.receiver_port(),
                    pid = child.id(),
                    "Recorder started"
                );
                self.children.insert(session.user_id().to_string(), child);
            }
            Err(e) => {
                error!(
                    target: "receiver.recorder",
                    user_id = %session.user_id(),
                    error = %e,
                    "Failed to start recorder"
                );
            }
        }
    }

    fn on_session_left(&mut self, session: &StreamingSession) {
        if let Some(child) = self.children.remove(session.user_id()) {
            Self::stop(session.user_id(), child, Some(session.age_secs()));
        }
    }
}

impl Drop for RecorderLauncher {
    fn drop(&mut self) {
        for (user_id, child) in self.children.drain() {
            Self::stop(&user_id, child, None);
        }
    }
}
