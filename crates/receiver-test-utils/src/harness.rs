//! Client harness for end-to-end tests.
//!
//! Runs a real `ReceiverClient` on a spawned task, wired to the in-memory
//! transport and sinks. The test plays the signaling server through
//! [`ReceiverHarness::server_sends`] and the mock transport handle.
//!
//! # Example
//!
//! ```rust,ignore
//! #[tokio::test(start_paused = true)]
//! async fn test_example() -> anyhow::Result<()> {
//!     let mut harness = ReceiverHarness::start(test_settings(&[5004]));
//!     let requests = harness.complete_handshake(&["u1"]).await;
//!     assert_eq!(requests.len(), 1);
//!
//!     assert_eq!(harness.shutdown().await?, TerminalReason::Shutdown);
//!     Ok(())
//! }
//! ```

use crate::fixtures::{auth_ok, join_room_ok};
use crate::mock_sinks::{MemoryArtifactSink, RecordingSessionEvents};
use crate::mock_transport::{MockTransport, MockTransportHandle};
use anyhow::{anyhow, Context, Result};
use serde_json::Value;
use squawk_receiver::client::{event_channel, ClientEvent};
use squawk_receiver::transport::TransportEvent;
use squawk_receiver::{ClientSettings, ReceiverClient, TerminalReason};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// How long to wait for the client to stop. Longer than the default retry
/// window so paused-clock tests can run it out.
const FINISH_TIMEOUT: Duration = Duration::from_secs(3600);

/// How long `eventually` polls before giving up.
const EVENTUALLY_TIMEOUT: Duration = Duration::from_secs(60);

/// A running client plus the handles a test needs to drive it.
pub struct ReceiverHarness {
    pub transport: MockTransportHandle,
    pub artifacts: MemoryArtifactSink,
    pub sessions: RecordingSessionEvents,
    events: mpsc::Sender<ClientEvent>,
    shutdown: CancellationToken,
    task: JoinHandle<TerminalReason>,
}

impl ReceiverHarness {
    /// Build the client and spawn its run loop. Must be called inside a
    /// Tokio runtime.
    #[must_use]
    pub fn start(settings: ClientSettings) -> Self {
        let (events_tx, events_rx) = event_channel();
        let (transport, handle) = MockTransport::new(events_tx.clone());
        let artifacts = MemoryArtifactSink::new();
        let sessions = RecordingSessionEvents::new();

        let client = ReceiverClient::new(
            settings,
            transport,
            artifacts.clone(),
            sessions.clone(),
            events_tx.clone(),
            events_rx,
        );

        let shutdown = CancellationToken::new();
        let task = tokio::spawn(client.run(shutdown.clone()));

        Self {
            transport: handle,
            artifacts,
            sessions,
            events: events_tx,
            shutdown,
            task,
        }
    }

    /// Deliver a server message to the client.
    pub async fn server_sends(&self, message: Value) {
        self.events
            .send(ClientEvent::Transport(TransportEvent::Message(
                message.to_string(),
            )))
            .await
            .expect("client event channel closed");
        settle().await;
    }

    /// Drop the connection from the server side.
    pub async fn drop_connection(&self) {
        self.transport.drop_connection().await;
        settle().await;
    }

    /// Wait for the next sent message of `message_type`.
    pub async fn next_sent(&mut self, message_type: &str) -> Value {
        self.transport.next_sent_of_type(message_type).await
    }

    /// Play auth and join, listing `presenters` in the room. Returns the
    /// `receiveMedia` requests the client sent for them, in send order.
    pub async fn complete_handshake(&mut self, presenters: &[&str]) -> Vec<Value> {
        self.next_sent("auth").await;
        self.server_sends(auth_ok()).await;
        self.next_sent("joinRoom").await;
        self.server_sends(join_room_ok(presenters)).await;

        let mut requests = Vec::with_capacity(presenters.len());
        for _ in presenters {
            requests.push(self.next_sent("receiveMedia").await);
        }
        requests
    }

    /// Poll `condition` until it holds.
    ///
    /// # Errors
    ///
    /// Returns an error if the condition is still false after the timeout.
    pub async fn eventually<F>(&self, mut condition: F) -> Result<()>
    where
        F: FnMut(&Self) -> bool,
    {
        let deadline = tokio::time::Instant::now() + EVENTUALLY_TIMEOUT;
        while !condition(self) {
            if tokio::time::Instant::now() >= deadline {
                return Err(anyhow!("condition not met within {EVENTUALLY_TIMEOUT:?}"));
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        Ok(())
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Request shutdown and wait for the client to stop.
    ///
    /// # Errors
    ///
    /// Returns an error if the client does not stop in time or panicked.
    pub async fn shutdown(&mut self) -> Result<TerminalReason> {
        self.shutdown.cancel();
        self.finish().await
    }

    /// Wait for the client to stop on its own.
    ///
    /// # Errors
    ///
    /// Returns an error if the client does not stop in time or panicked.
    pub async fn finish(&mut self) -> Result<TerminalReason> {
        tokio::time::timeout(FINISH_TIMEOUT, &mut self.task)
            .await
            .context("client did not stop in time")?
            .context("client task panicked")
    }
}

/// Let the client task drain what is already queued.
pub async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}
