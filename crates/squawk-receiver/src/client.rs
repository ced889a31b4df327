//! Receiver client.
//!
//! One task owns the signaling machine and the connection lifecycle and
//! processes events one at a time from a single bounded channel:
//!
//! - transport events from the connection task
//! - retry ticks and retry-window expiry from the retry scheduler
//!
//! plus a keep-alive ticker and the shutdown token. The client runs until it
//! reaches exactly one [`TerminalReason`].

use crate::artifacts::ArtifactSink;
use crate::config::Config;
use crate::events::SessionEvents;
use crate::lifecycle::{ConnectionLifecycle, ConnectionState, RetryPolicy};
use crate::observability;
use crate::protocol::MessageBuilder;
use crate::sdp::OfferSource;
use crate::signaling::{Outcome, SignalingMachine};
use crate::transport::{Transport, TransportEvent};
use secrecy::SecretString;
use std::fmt;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Event channel capacity.
pub const EVENT_CHANNEL_BUFFER: usize = 256;

/// How long to wait for the channel to finish closing after a deliberate close.
pub const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Everything the dispatch task reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Transport(TransportEvent),
    /// Time to reconnect.
    RetryTick { generation: u64 },
    /// The retry window is over.
    RetryWindowElapsed { generation: u64 },
}

/// Create the client's event channel.
#[must_use]
pub fn event_channel() -> (mpsc::Sender<ClientEvent>, mpsc::Receiver<ClientEvent>) {
    mpsc::channel(EVENT_CHANNEL_BUFFER)
}

/// Protocol step a server error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolStage {
    Auth,
    Join,
    Negotiate,
}

impl ProtocolStage {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ProtocolStage::Auth => "auth",
            ProtocolStage::Join => "join",
            ProtocolStage::Negotiate => "negotiate",
        }
    }
}

/// Why the client stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalReason {
    /// The server answered a protocol step with an error.
    ProtocolRejected {
        stage: ProtocolStage,
        message: String,
    },
    /// The API key signed in from somewhere else.
    SessionOverridden,
    /// No reconnect succeeded within the retry window.
    RetriesExhausted,
    /// Asked to stop.
    Shutdown,
}

impl TerminalReason {
    /// Bounded label for metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            TerminalReason::ProtocolRejected { .. } => "protocol_rejected",
            TerminalReason::SessionOverridden => "session_overridden",
            TerminalReason::RetriesExhausted => "retries_exhausted",
            TerminalReason::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for TerminalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminalReason::ProtocolRejected { stage, message } => {
                write!(f, "{} rejected: {message}", stage.as_str())
            }
            TerminalReason::SessionOverridden => {
                f.write_str("session overridden by another login")
            }
            TerminalReason::RetriesExhausted => f.write_str("retry window exhausted"),
            TerminalReason::Shutdown => f.write_str("shutdown requested"),
        }
    }
}

/// Client settings, usually taken from [`Config`].
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub role: String,
    pub api_key: SecretString,
    pub room: String,
    pub receiver_ip: String,
    pub receiver_ports: Vec<u16>,
    pub prebuilt_offer: Option<String>,
    pub retry: RetryPolicy,
    pub ping_interval: Duration,
}

impl From<&Config> for ClientSettings {
    fn from(config: &Config) -> Self {
        Self {
            role: config.role.clone(),
            api_key: config.api_key.clone(),
            room: config.room.clone(),
            receiver_ip: config.receiver_ip.clone(),
            receiver_ports: config.receiver_ports.clone(),
            prebuilt_offer: config.prebuilt_offer.clone(),
            retry: RetryPolicy {
                interval: config.retry_interval,
                window: config.retry_window,
            },
            ping_interval: config.ping_interval,
        }
    }
}

/// The signaling client.
#[derive(Debug)]
pub struct ReceiverClient<T, A, E> {
    machine: SignalingMachine<T, A, E>,
    lifecycle: ConnectionLifecycle,
    events: mpsc::Receiver<ClientEvent>,
    ping_interval: Duration,
    /// A deliberate close was issued on an open channel.
    close_pending: bool,
}

impl<T, A, E> ReceiverClient<T, A, E>
where
    T: Transport,
    A: ArtifactSink,
    E: SessionEvents,
{
    /// Build a client. `events_tx`/`events_rx` must come from the same
    /// [`event_channel`], and `transport` must post into that channel too.
    #[must_use]
    pub fn new(
        settings: ClientSettings,
        transport: T,
        artifacts: A,
        session_events: E,
        events_tx: mpsc::Sender<ClientEvent>,
        events_rx: mpsc::Receiver<ClientEvent>,
    ) -> Self {
        let builder = MessageBuilder::new(settings.role, settings.api_key, settings.room);
        let offers = OfferSource::new(settings.receiver_ip, settings.prebuilt_offer);
        let machine = SignalingMachine::new(
            builder,
            offers,
            &settings.receiver_ports,
            transport,
            artifacts,
            session_events,
        );
        Self {
            machine,
            lifecycle: ConnectionLifecycle::new(settings.retry, events_tx),
            events: events_rx,
            ping_interval: settings.ping_interval,
            close_pending: false,
        }
    }

    #[must_use]
    pub fn machine(&self) -> &SignalingMachine<T, A, E> {
        &self.machine
    }

    #[must_use]
    pub fn lifecycle(&self) -> &ConnectionLifecycle {
        &self.lifecycle
    }

    /// Connect and process events until the client stops.
    pub async fn run(mut self, shutdown: CancellationToken) -> TerminalReason {
        info!(target: "receiver.lifecycle", "Receiver client starting");
        self.lifecycle.on_connecting();
        self.machine.connect();

        let mut ping = tokio::time::interval_at(
            Instant::now() + self.ping_interval,
            self.ping_interval,
        );
        ping.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let reason = loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    info!(target: "receiver.lifecycle", "Shutdown requested");
                    break self.shut_down();
                }
                event = self.events.recv() => {
                    let Some(event) = event else {
                        // The lifecycle keeps a sender alive, so this is unreachable in practice
                        error!(target: "receiver.lifecycle", "Event channel closed");
                        break self.shut_down();
                    };
                    if let Some(reason) = self.handle_event(event) {
                        break reason;
                    }
                }
                _ = ping.tick() => {
                    self.machine.send_ping();
                }
            }
        };

        if self.close_pending {
            self.await_channel_closed().await;
        }

        observability::record_terminal(reason.as_str());
        info!(target: "receiver.lifecycle", reason = %reason, "Receiver client stopped");
        reason
    }

    /// Give the connection task a moment to flush and send its close frame.
    async fn await_channel_closed(&mut self) {
        let closed = async {
            while let Some(event) = self.events.recv().await {
                if matches!(event, ClientEvent::Transport(TransportEvent::Closed { .. })) {
                    return;
                }
            }
        };
        if tokio::time::timeout(CLOSE_GRACE, closed).await.is_err() {
            debug!(target: "receiver.lifecycle", "Channel did not confirm close in time");
        }
    }

    /// React to one event. Returns the terminal reason once the client is done.
    pub fn handle_event(&mut self, event: ClientEvent) -> Option<TerminalReason> {
        match event {
            ClientEvent::Transport(TransportEvent::Opened) => {
                if self.lifecycle.state() == ConnectionState::Closed {
                    debug!(target: "receiver.lifecycle", "Open after close ignored");
                    return None;
                }
                self.lifecycle.on_open();
                self.machine.on_open();
                None
            }
            ClientEvent::Transport(TransportEvent::Message(text)) => {
                match self.machine.handle_text(&text) {
                    Outcome::Continue => None,
                    Outcome::Joined => {
                        self.lifecycle.on_joined();
                        None
                    }
                    Outcome::Terminate(reason) => {
                        self.lifecycle.shutdown();
                        if self.machine.close_channel() {
                            self.close_pending = true;
                        }
                        Some(reason)
                    }
                }
            }
            ClientEvent::Transport(TransportEvent::Closed {
                code,
                reason,
                remote,
            }) => {
                let by = if remote { "remote peer" } else { "us" };
                info!(
                    target: "receiver.lifecycle",
                    code = code,
                    reason = %reason,
                    by = by,
                    "Connection closed"
                );
                self.machine.on_close();
                self.lifecycle.on_unexpected_close();
                None
            }
            ClientEvent::Transport(TransportEvent::Error(message)) => {
                warn!(target: "receiver.transport", error = %message, "Transport error");
                None
            }
            ClientEvent::RetryTick { generation } => {
                if self.lifecycle.accept_tick(generation) {
                    info!(target: "receiver.lifecycle", "Retrying connection");
                    observability::record_reconnect_attempt();
                    self.lifecycle.on_connecting();
                    self.machine.reconnect();
                } else {
                    debug!(target: "receiver.lifecycle", generation = generation, "Stale retry tick ignored");
                }
                None
            }
            ClientEvent::RetryWindowElapsed { generation } => {
                if self.lifecycle.on_window_elapsed(generation) {
                    self.machine.close_channel();
                    Some(TerminalReason::RetriesExhausted)
                } else {
                    None
                }
            }
        }
    }

    /// Deliberate stop: no retry, log out, close.
    fn shut_down(&mut self) -> TerminalReason {
        self.lifecycle.shutdown();
        self.machine.logout();
        if self.machine.close_channel() {
            self.close_pending = true;
        }
        TerminalReason::Shutdown
    }
}
