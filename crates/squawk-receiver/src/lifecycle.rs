//! Connection lifecycle and retry policy.
//!
//! An unexpected close arms one retry scheduler. The scheduler requests a
//! reconnect every `interval` (first one `interval` after the close) until a
//! connection opens or `window` elapses. Arming clears the retry flag, so a
//! failed reconnect does not arm a second scheduler; a successful open sets
//! it again.
//!
//! Scheduler events carry the generation of the scheduler that sent them.
//! Events from a cancelled scheduler that were already queued are ignored.

use crate::client::ClientEvent;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    /// Open, handshake in progress.
    Authenticating,
    InRoom,
    /// Waiting for the next scheduled reconnect.
    Retrying,
    /// Terminal.
    Closed,
}

/// Reconnect timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub interval: Duration,
    pub window: Duration,
}

/// A running retry scheduler. Dropping it stops the task.
#[derive(Debug)]
struct RetryScheduler {
    generation: u64,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl RetryScheduler {
    fn spawn(policy: RetryPolicy, generation: u64, events: mpsc::Sender<ClientEvent>) -> Self {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_scheduler(policy, generation, events, cancel.clone()));
        Self {
            generation,
            cancel,
            task,
        }
    }
}

impl Drop for RetryScheduler {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.task.abort();
    }
}

async fn run_scheduler(
    policy: RetryPolicy,
    generation: u64,
    events: mpsc::Sender<ClientEvent>,
    cancel: CancellationToken,
) {
    let start = Instant::now();
    let deadline = tokio::time::sleep_until(start + policy.window);
    tokio::pin!(deadline);

    let mut ticker = tokio::time::interval_at(start + policy.interval, policy.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        // Window expiry wins over a tick due at the same instant
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(target: "receiver.lifecycle", generation = generation, "Retry scheduler cancelled");
                return;
            }
            () = &mut deadline => {
                let _ = events.send(ClientEvent::RetryWindowElapsed { generation }).await;
                return;
            }
            _ = ticker.tick() => {
                if events.send(ClientEvent::RetryTick { generation }).await.is_err() {
                    return;
                }
            }
        }
    }
}

/// Owns the connection state, the retry flag and at most one scheduler.
#[derive(Debug)]
pub struct ConnectionLifecycle {
    state: ConnectionState,
    retry_enabled: bool,
    policy: RetryPolicy,
    scheduler: Option<RetryScheduler>,
    generation: u64,
    events: mpsc::Sender<ClientEvent>,
}

impl ConnectionLifecycle {
    #[must_use]
    pub fn new(policy: RetryPolicy, events: mpsc::Sender<ClientEvent>) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            retry_enabled: true,
            policy,
            scheduler: None,
            generation: 0,
            events,
        }
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    #[must_use]
    pub fn retry_enabled(&self) -> bool {
        self.retry_enabled
    }

    /// Whether a retry scheduler is running.
    #[must_use]
    pub fn is_retrying(&self) -> bool {
        self.scheduler.is_some()
    }

    #[must_use]
    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// A connection attempt was started.
    pub fn on_connecting(&mut self) {
        if self.state != ConnectionState::Closed {
            self.state = ConnectionState::Connecting;
        }
    }

    /// The channel opened: stop retrying and re-arm the retry flag.
    pub fn on_open(&mut self) {
        if self.scheduler.take().is_some() {
            info!(target: "receiver.lifecycle", "Reconnected, retry scheduler stopped");
        }
        self.retry_enabled = true;
        self.state = ConnectionState::Authenticating;
    }

    /// The room was joined.
    pub fn on_joined(&mut self) {
        if self.state == ConnectionState::Authenticating {
            self.state = ConnectionState::InRoom;
        }
    }

    /// The channel closed without us asking. Returns whether a scheduler was
    /// armed by this call.
    pub fn on_unexpected_close(&mut self) -> bool {
        if self.state == ConnectionState::Closed {
            return false;
        }

        if !self.retry_enabled {
            self.state = if self.scheduler.is_some() {
                ConnectionState::Retrying
            } else {
                ConnectionState::Disconnected
            };
            debug!(
                target: "receiver.lifecycle",
                retrying = self.scheduler.is_some(),
                "Close while retry is disabled, no new scheduler"
            );
            return false;
        }

        self.generation += 1;
        self.scheduler = Some(RetryScheduler::spawn(
            self.policy,
            self.generation,
            self.events.clone(),
        ));
        self.retry_enabled = false;
        self.state = ConnectionState::Retrying;

        info!(
            target: "receiver.lifecycle",
            interval_secs = self.policy.interval.as_secs(),
            window_secs = self.policy.window.as_secs(),
            generation = self.generation,
            "Connection lost, retry scheduler armed"
        );
        true
    }

    /// Whether a tick should trigger a reconnect.
    #[must_use]
    pub fn accept_tick(&self, generation: u64) -> bool {
        self.state != ConnectionState::Closed
            && self
                .scheduler
                .as_ref()
                .is_some_and(|s| s.generation == generation)
    }

    /// The retry window elapsed. Returns `true` if this ends the client.
    pub fn on_window_elapsed(&mut self, generation: u64) -> bool {
        if !self.accept_tick(generation) {
            debug!(target: "receiver.lifecycle", generation = generation, "Stale retry window event ignored");
            return false;
        }
        warn!(
            target: "receiver.lifecycle",
            window_secs = self.policy.window.as_secs(),
            "Not able to reconnect within the retry window, giving up"
        );
        self.scheduler = None;
        self.retry_enabled = false;
        self.state = ConnectionState::Closed;
        true
    }

    /// Deliberate close: no retry from here on.
    pub fn shutdown(&mut self) {
        self.retry_enabled = false;
        self.scheduler = None;
        self.state = ConnectionState::Closed;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    const POLICY: RetryPolicy = RetryPolicy {
        interval: Duration::from_secs(20),
        window: Duration::from_secs(900),
    };

    #[tokio::test(start_paused = true)]
    async fn test_ticks_at_interval_then_window_elapses() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut lifecycle = ConnectionLifecycle::new(POLICY, tx);
        let start = Instant::now();

        assert!(lifecycle.on_unexpected_close());
        assert_eq!(lifecycle.state(), ConnectionState::Retrying);
        assert!(!lifecycle.retry_enabled());

        let mut ticks = 0;
        loop {
            match rx.recv().await.unwrap() {
                ClientEvent::RetryTick { generation } => {
                    ticks += 1;
                    assert!(lifecycle.accept_tick(generation));
                    let expected = POLICY.interval * ticks;
                    assert!(start.elapsed() >= expected);
                    assert!(start.elapsed() < expected + Duration::from_secs(1));
                }
                ClientEvent::RetryWindowElapsed { generation } => {
                    assert!(start.elapsed() >= POLICY.window);
                    assert!(start.elapsed() < POLICY.window + Duration::from_secs(1));
                    assert!(lifecycle.on_window_elapsed(generation));
                    break;
                }
                other => panic!("unexpected event {other:?}"),
            }
        }

        // Ticks at 20s..880s; the one due at 900s loses to the window
        assert_eq!(ticks, 44);
        assert_eq!(lifecycle.state(), ConnectionState::Closed);
        assert!(!lifecycle.is_retrying());
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_close_does_not_arm_second_scheduler() {
        let (tx, _rx) = mpsc::channel(16);
        let mut lifecycle = ConnectionLifecycle::new(POLICY, tx);

        assert!(lifecycle.on_unexpected_close());
        assert!(!lifecycle.on_unexpected_close());
        assert!(lifecycle.is_retrying());
        assert_eq!(lifecycle.state(), ConnectionState::Retrying);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_cancels_scheduler_and_rearms() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut lifecycle = ConnectionLifecycle::new(POLICY, tx);

        lifecycle.on_unexpected_close();
        let ClientEvent::RetryTick { generation: first } = rx.recv().await.unwrap() else {
            panic!("expected a retry tick");
        };

        lifecycle.on_open();
        assert!(!lifecycle.is_retrying());
        assert!(lifecycle.retry_enabled());
        assert_eq!(lifecycle.state(), ConnectionState::Authenticating);

        // A tick from the old scheduler is stale
        assert!(!lifecycle.accept_tick(first));
        assert!(!lifecycle.on_window_elapsed(first));

        // The next loss arms a fresh scheduler with a new generation
        assert!(lifecycle.on_unexpected_close());
        let ClientEvent::RetryTick { generation: second } = rx.recv().await.unwrap() else {
            panic!("expected a retry tick");
        };
        assert_ne!(first, second);
        assert!(lifecycle.accept_tick(second));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_retrying() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut lifecycle = ConnectionLifecycle::new(POLICY, tx);

        lifecycle.on_unexpected_close();
        lifecycle.shutdown();
        assert_eq!(lifecycle.state(), ConnectionState::Closed);
        assert!(!lifecycle.on_unexpected_close());

        // Scheduler task is gone, so the channel only closes when the
        // lifecycle (and its sender) is dropped
        drop(lifecycle);
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn test_joined_only_from_authenticating() {
        let (tx, _rx) = mpsc::channel(1);
        let mut lifecycle = ConnectionLifecycle::new(POLICY, tx);

        lifecycle.on_joined();
        assert_eq!(lifecycle.state(), ConnectionState::Disconnected);

        lifecycle.on_connecting();
        assert_eq!(lifecycle.state(), ConnectionState::Connecting);
    }
}
