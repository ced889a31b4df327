//! Scriptable in-memory transport.
//!
//! `MockTransport` goes into the client; the paired `MockTransportHandle`
//! stays with the test. Every call the client makes is recorded and also
//! streamed to the handle, so a test can await the next outbound message
//! instead of polling.
//!
//! # Example
//!
//! ```rust,ignore
//! let (events_tx, events_rx) = event_channel();
//! let (transport, mut handle) = MockTransport::new(events_tx.clone());
//!
//! // ... build and spawn the client ...
//!
//! let auth = handle.next_sent_of_type("auth").await;
//! assert_eq!(auth["role"], "listener");
//! ```

use serde_json::Value;
use squawk_receiver::client::ClientEvent;
use squawk_receiver::transport::{
    Transport, TransportEvent, CLOSE_CODE_ABNORMAL, CLOSE_CODE_NORMAL,
};
use squawk_receiver::ReceiverError;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// How long `next_call` waits before failing the test.
const CALL_TIMEOUT: Duration = Duration::from_secs(3600);

/// One call the client made on the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportCall {
    Connect,
    Send(Value),
    Close,
    Reconnect,
}

#[derive(Debug)]
struct MockTransportInner {
    open: bool,
    accept_connections: bool,
    sent: Vec<Value>,
    connects: usize,
    reconnects: usize,
    closes: usize,
}

/// Transport half handed to the client.
#[derive(Debug)]
pub struct MockTransport {
    inner: Arc<Mutex<MockTransportInner>>,
    events: mpsc::Sender<ClientEvent>,
    calls: mpsc::UnboundedSender<TransportCall>,
}

/// Test half: inspect calls, flip connection behavior, drop the connection.
#[derive(Debug)]
pub struct MockTransportHandle {
    inner: Arc<Mutex<MockTransportInner>>,
    events: mpsc::Sender<ClientEvent>,
    calls: mpsc::UnboundedReceiver<TransportCall>,
}

impl MockTransport {
    /// Create a transport that accepts every connection attempt.
    #[must_use]
    pub fn new(events: mpsc::Sender<ClientEvent>) -> (Self, MockTransportHandle) {
        let inner = Arc::new(Mutex::new(MockTransportInner {
            open: false,
            accept_connections: true,
            sent: Vec::new(),
            connects: 0,
            reconnects: 0,
            closes: 0,
        }));
        let (calls_tx, calls_rx) = mpsc::unbounded_channel();
        (
            Self {
                inner: Arc::clone(&inner),
                events: events.clone(),
                calls: calls_tx,
            },
            MockTransportHandle {
                inner,
                events,
                calls: calls_rx,
            },
        )
    }

    fn dial(&mut self) {
        let accept = {
            let mut inner = self.inner.lock().unwrap();
            inner.open = inner.accept_connections;
            inner.accept_connections
        };
        let event = if accept {
            TransportEvent::Opened
        } else {
            TransportEvent::Closed {
                code: CLOSE_CODE_ABNORMAL,
                reason: "connection refused".to_string(),
                remote: false,
            }
        };
        self.events
            .try_send(ClientEvent::Transport(event))
            .expect("client event channel full or closed");
    }

    fn record(&self, call: TransportCall) {
        // Handle dropped means the test no longer cares
        let _ = self.calls.send(call);
    }
}

impl Transport for MockTransport {
    fn connect(&mut self) {
        self.inner.lock().unwrap().connects += 1;
        self.record(TransportCall::Connect);
        self.dial();
    }

    fn send(&mut self, text: String) -> Result<(), ReceiverError> {
        let value: Value = serde_json::from_str(&text).expect("client sent invalid JSON");
        {
            let mut inner = self.inner.lock().unwrap();
            if !inner.open {
                return Err(ReceiverError::Transport("mock channel is closed".to_string()));
            }
            inner.sent.push(value.clone());
        }
        self.record(TransportCall::Send(value));
        Ok(())
    }

    fn close(&mut self) {
        let was_open = {
            let mut inner = self.inner.lock().unwrap();
            inner.closes += 1;
            std::mem::replace(&mut inner.open, false)
        };
        self.record(TransportCall::Close);
        if was_open {
            let _ = self.events.try_send(ClientEvent::Transport(TransportEvent::Closed {
                code: CLOSE_CODE_NORMAL,
                reason: "client closing".to_string(),
                remote: false,
            }));
        }
    }

    fn is_open(&self) -> bool {
        self.inner.lock().unwrap().open
    }

    fn reconnect(&mut self) {
        self.inner.lock().unwrap().reconnects += 1;
        self.record(TransportCall::Reconnect);
        self.dial();
    }
}

impl MockTransportHandle {
    /// Make future connection attempts succeed or fail.
    pub fn set_accept_connections(&self, accept: bool) {
        self.inner.lock().unwrap().accept_connections = accept;
    }

    /// Simulate the server dropping the connection.
    pub async fn drop_connection(&self) {
        self.inner.lock().unwrap().open = false;
        self.events
            .send(ClientEvent::Transport(TransportEvent::Closed {
                code: CLOSE_CODE_ABNORMAL,
                reason: "connection reset".to_string(),
                remote: true,
            }))
            .await
            .expect("client event channel closed");
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.inner.lock().unwrap().open
    }

    /// Every message sent so far, oldest first.
    #[must_use]
    pub fn sent(&self) -> Vec<Value> {
        self.inner.lock().unwrap().sent.clone()
    }

    /// Sent messages with the given wire `type`.
    #[must_use]
    pub fn sent_of_type(&self, message_type: &str) -> Vec<Value> {
        self.sent()
            .into_iter()
            .filter(|m| m["type"] == message_type)
            .collect()
    }

    #[must_use]
    pub fn connects(&self) -> usize {
        self.inner.lock().unwrap().connects
    }

    #[must_use]
    pub fn reconnects(&self) -> usize {
        self.inner.lock().unwrap().reconnects
    }

    #[must_use]
    pub fn closes(&self) -> usize {
        self.inner.lock().unwrap().closes
    }

    /// Wait for the next call. Panics if none arrives.
    pub async fn next_call(&mut self) -> TransportCall {
        tokio::time::timeout(CALL_TIMEOUT, self.calls.recv())
            .await
            .expect("timed out waiting for a transport call")
            .expect("transport dropped")
    }

    /// Next call without waiting.
    pub fn try_next_call(&mut self) -> Option<TransportCall> {
        self.calls.try_recv().ok()
    }

    /// Wait for the next sent message of `message_type`, skipping other calls.
    pub async fn next_sent_of_type(&mut self, message_type: &str) -> Value {
        loop {
            if let TransportCall::Send(value) = self.next_call().await {
                if value["type"] == message_type {
                    return value;
                }
            }
        }
    }
}
