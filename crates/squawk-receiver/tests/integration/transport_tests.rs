//! Integration tests over a real WebSocket
//!
//! These run the client with `WsTransport` against a local server on real
//! time, with millisecond intervals.

use futures::{SinkExt, StreamExt};
use receiver_test_utils::*;
use serde_json::Value;
use squawk_receiver::client::event_channel;
use squawk_receiver::events::LoggingSessionEvents;
use squawk_receiver::lifecycle::RetryPolicy;
use squawk_receiver::transport::{connection_lost_timeout, WsTransport};
use squawk_receiver::{ReceiverClient, TerminalReason};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

const WAIT: Duration = Duration::from_secs(10);

/// Answers auth and join, then ignores everything including pings.
/// Reports the arrival time of every `auth`.
async fn silent_after_join(listener: TcpListener, auths: mpsc::UnboundedSender<Instant>) {
    while let Ok((stream, _)) = listener.accept().await {
        let auths = auths.clone();
        tokio::spawn(async move {
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            while let Some(Ok(message)) = ws.next().await {
                let Message::Text(text) = message else {
                    continue;
                };
                let value: Value = serde_json::from_str(text.as_str()).unwrap();
                let reply = match value["type"].as_str() {
                    Some("auth") => {
                        let _ = auths.send(Instant::now());
                        auth_ok()
                    }
                    Some("joinRoom") => join_room_ok(&[]),
                    _ => continue,
                };
                if ws.send(Message::Text(reply.to_string().into())).await.is_err() {
                    return;
                }
            }
        });
    }
}

// ============================================================================
// Test 1: Silent server
// ============================================================================

/// A server that stops answering is detected and the retry schedule
/// reconnects, even though the socket itself never reports an error.
#[tokio::test]
async fn test_silent_server_triggers_reconnect() -> Result<(), anyhow::Error> {
    // Arrange
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let (auth_tx, mut auth_rx) = mpsc::unbounded_channel();
    tokio::spawn(silent_after_join(listener, auth_tx));

    let ping_interval = Duration::from_millis(100);
    let mut settings = test_settings_with_ping(&[5004], ping_interval);
    settings.retry = RetryPolicy {
        interval: Duration::from_millis(100),
        window: Duration::from_secs(30),
    };

    let (events_tx, events_rx) = event_channel();
    let transport = WsTransport::new(format!("ws://{addr}"), events_tx.clone())
        .with_idle_timeout(connection_lost_timeout(ping_interval));
    let client = ReceiverClient::new(
        settings,
        transport,
        MemoryArtifactSink::new(),
        LoggingSessionEvents,
        events_tx,
        events_rx,
    );
    let shutdown = CancellationToken::new();
    let task = tokio::spawn(client.run(shutdown.clone()));

    // Act
    let first = tokio::time::timeout(WAIT, auth_rx.recv())
        .await?
        .expect("server stopped");
    // A second auth can only come from a new connection
    let second = tokio::time::timeout(WAIT, auth_rx.recv())
        .await?
        .expect("server stopped");

    // Assert: idle timeout (150ms) plus one retry interval (100ms)
    assert!(
        second.duration_since(first) >= Duration::from_millis(250),
        "reconnected too early: {:?}",
        second.duration_since(first)
    );

    shutdown.cancel();
    assert_eq!(task.await?, TerminalReason::Shutdown);
    Ok(())
}
