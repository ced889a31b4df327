//! WebSocket transport over `tokio-tungstenite`.
//!
//! Each connection attempt runs in its own task that owns the socket. The
//! task reports `Opened`, forwards text frames, writes queued outbound text,
//! and reports exactly one `Closed` when it ends. A task that is aborted by
//! [`Transport::reconnect`] reports nothing.
//!
//! With an idle timeout set, a connection that receives nothing for that
//! long is dropped and reported as `Closed` with code 1006, the same as a
//! broken socket. Without one, a peer that vanishes silently is never noticed.

use super::{
    Transport, TransportEvent, CLOSE_CODE_ABNORMAL, CLOSE_CODE_NORMAL, CONNECTION_LOST_REASON,
};
use crate::client::ClientEvent;
use crate::errors::ReceiverError;
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Message, Utf8Bytes};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Live connection task and its controls.
struct Connection {
    outbound: mpsc::UnboundedSender<String>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// WebSocket implementation of [`Transport`].
pub struct WsTransport {
    url: String,
    events: mpsc::Sender<ClientEvent>,
    open: Arc<AtomicBool>,
    idle_timeout: Option<Duration>,
    connection: Option<Connection>,
}

impl WsTransport {
    /// Create a transport for `url`. Nothing is dialed until `connect`.
    #[must_use]
    pub fn new(url: String, events: mpsc::Sender<ClientEvent>) -> Self {
        Self {
            url,
            events,
            open: Arc::new(AtomicBool::new(false)),
            idle_timeout: None,
            connection: None,
        }
    }

    /// Drop connections that receive nothing for `timeout`.
    #[must_use]
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    fn spawn_connection(&mut self) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let open = Arc::clone(&self.open);
        open.store(false, Ordering::SeqCst);

        let task = tokio::spawn(run_connection(
            self.url.clone(),
            self.events.clone(),
            open,
            outbound_rx,
            cancel.clone(),
            self.idle_timeout,
        ));

        self.connection = Some(Connection {
            outbound: outbound_tx,
            cancel,
            task,
        });
    }
}

impl std::fmt::Debug for WsTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsTransport")
            .field("url", &self.url)
            .field("open", &self.open.load(Ordering::SeqCst))
            .field("idle_timeout", &self.idle_timeout)
            .field("connected", &self.connection.is_some())
            .finish()
    }
}

impl Transport for WsTransport {
    fn connect(&mut self) {
        if let Some(connection) = &self.connection {
            if !connection.task.is_finished() {
                debug!(target: "receiver.transport", "Connect requested while a connection is live");
                return;
            }
        }
        info!(target: "receiver.transport", url = %self.url, "Connecting");
        self.spawn_connection();
    }

    fn send(&mut self, text: String) -> Result<(), ReceiverError> {
        if !self.is_open() {
            return Err(ReceiverError::Transport("channel is not open".to_string()));
        }
        let connection = self
            .connection
            .as_ref()
            .ok_or_else(|| ReceiverError::Transport("no connection".to_string()))?;
        connection
            .outbound
            .send(text)
            .map_err(|_| ReceiverError::Transport("connection task has stopped".to_string()))
    }

    fn close(&mut self) {
        self.open.store(false, Ordering::SeqCst);
        if let Some(connection) = &self.connection {
            connection.cancel.cancel();
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn reconnect(&mut self) {
        if let Some(old) = self.connection.take() {
            old.cancel.cancel();
            old.task.abort();
        }
        info!(target: "receiver.transport", url = %self.url, "Reconnecting");
        self.spawn_connection();
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.cancel.cancel();
            connection.task.abort();
        }
    }
}

async fn emit(events: &mpsc::Sender<ClientEvent>, event: TransportEvent) {
    // Receiver gone means the client has stopped
    let _ = events.send(ClientEvent::Transport(event)).await;
}

/// Resolves once `timeout` has passed since `last_seen`; never without a timeout.
async fn idle_expired(last_seen: Instant, timeout: Option<Duration>) {
    match timeout {
        Some(timeout) => tokio::time::sleep_until(last_seen + timeout).await,
        None => std::future::pending().await,
    }
}

async fn run_connection(
    url: String,
    events: mpsc::Sender<ClientEvent>,
    open: Arc<AtomicBool>,
    mut outbound: mpsc::UnboundedReceiver<String>,
    cancel: CancellationToken,
    idle_timeout: Option<Duration>,
) {
    let dialed = tokio::select! {
        () = cancel.cancelled() => {
            emit(&events, TransportEvent::Closed {
                code: CLOSE_CODE_NORMAL,
                reason: "closed before open".to_string(),
                remote: false,
            }).await;
            return;
        }
        result = connect_async(url.as_str()) => result,
    };

    let ws = match dialed {
        Ok((ws, _response)) => ws,
        Err(e) => {
            warn!(target: "receiver.transport", url = %url, error = %e, "Dial failed");
            emit(
                &events,
                TransportEvent::Closed {
                    code: CLOSE_CODE_ABNORMAL,
                    reason: e.to_string(),
                    remote: false,
                },
            )
            .await;
            return;
        }
    };

    open.store(true, Ordering::SeqCst);
    info!(target: "receiver.transport", url = %url, "WebSocket connection opened");
    emit(&events, TransportEvent::Opened).await;

    let (mut ws_tx, mut ws_rx) = ws.split();
    let mut last_seen = Instant::now();

    let (code, reason, remote) = loop {
        // Queued text is flushed before a close is honored
        tokio::select! {
            biased;

            text = outbound.recv() => {
                let Some(text) = text else {
                    break (CLOSE_CODE_NORMAL, "transport dropped".to_string(), false);
                };
                if let Err(e) = ws_tx.send(Message::Text(text.into())).await {
                    emit(&events, TransportEvent::Error(e.to_string())).await;
                    break (CLOSE_CODE_ABNORMAL, e.to_string(), false);
                }
            }
            () = cancel.cancelled() => {
                let frame = CloseFrame {
                    code: CloseCode::Normal,
                    reason: Utf8Bytes::from_static("client closing"),
                };
                if let Err(e) = ws_tx.send(Message::Close(Some(frame))).await {
                    debug!(target: "receiver.transport", error = %e, "Close frame not sent");
                }
                break (CLOSE_CODE_NORMAL, "client closing".to_string(), false);
            }
            frame = ws_rx.next() => {
                if matches!(frame, Some(Ok(_))) {
                    last_seen = Instant::now();
                }
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        emit(&events, TransportEvent::Message(text.as_str().to_owned())).await;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = frame.map_or_else(
                            || (CLOSE_CODE_ABNORMAL, String::new()),
                            |f| (u16::from(f.code), f.reason.as_str().to_owned()),
                        );
                        break (code, reason, true);
                    }
                    Some(Ok(Message::Binary(data))) => {
                        debug!(
                            target: "receiver.transport",
                            len = data.len(),
                            "Ignoring binary frame"
                        );
                    }
                    // Ping/pong are answered by tungstenite and only count as liveness
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        emit(&events, TransportEvent::Error(e.to_string())).await;
                        break (CLOSE_CODE_ABNORMAL, e.to_string(), true);
                    }
                    None => break (CLOSE_CODE_ABNORMAL, "stream ended".to_string(), true),
                }
            }
            () = idle_expired(last_seen, idle_timeout) => {
                warn!(
                    target: "receiver.transport",
                    url = %url,
                    idle_ms = u64::try_from(last_seen.elapsed().as_millis()).unwrap_or(u64::MAX),
                    "Nothing received from peer, dropping connection"
                );
                break (CLOSE_CODE_ABNORMAL, CONNECTION_LOST_REASON.to_string(), false);
            }
        }
    };

    open.store(false, Ordering::SeqCst);
    info!(
        target: "receiver.transport",
        code = code,
        reason = %reason,
        remote = remote,
        "WebSocket connection closed"
    );
    emit(&events, TransportEvent::Closed { code, reason, remote }).await;
}
