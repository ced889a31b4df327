//! Signaling channel abstraction.
//!
//! A [`Transport`] is driven synchronously from the dispatch task. Everything
//! that happens on the wire comes back asynchronously as a
//! [`TransportEvent`] on the client's event channel.

pub mod websocket;

pub use websocket::WsTransport;

use crate::errors::ReceiverError;
use std::time::Duration;

/// Close code reported when a connection drops or a dial fails without a
/// close frame.
pub const CLOSE_CODE_ABNORMAL: u16 = 1006;

/// Close code sent on a deliberate close.
pub const CLOSE_CODE_NORMAL: u16 = 1000;

/// Reason reported when the peer stops sending anything.
pub const CONNECTION_LOST_REASON: &str = "connection lost";

/// How long a connection may go without inbound traffic before it is
/// considered dead: one and a half keep-alive intervals, so a single late
/// `pingResponse` is tolerated.
#[must_use]
pub fn connection_lost_timeout(ping_interval: Duration) -> Duration {
    ping_interval + ping_interval / 2
}

/// What happened on the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The channel is open and ready to send.
    Opened,
    /// A text frame arrived.
    Message(String),
    /// The channel is closed. Emitted exactly once per connection attempt.
    Closed {
        code: u16,
        reason: String,
        /// Whether the peer initiated the close.
        remote: bool,
    },
    /// A non-fatal error. A `Closed` follows if the channel went down.
    Error(String),
}

/// Bidirectional text message channel.
pub trait Transport {
    /// Start connecting. The outcome arrives as `Opened` or `Closed`.
    fn connect(&mut self);

    /// Queue a text message.
    ///
    /// # Errors
    ///
    /// Returns `ReceiverError::Transport` if the channel is not open.
    fn send(&mut self, text: String) -> Result<(), ReceiverError>;

    /// Close the channel. No-op when already closed.
    fn close(&mut self);

    /// Whether the channel is open.
    fn is_open(&self) -> bool;

    /// Drop any current connection and connect again.
    fn reconnect(&mut self);
}
