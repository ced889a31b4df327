//! Receiver error types.
//!
//! Every variant is handled inside the client; nothing here crosses the
//! session-event or transport boundary. Variants that describe a rejected
//! protocol step are terminal, the rest are logged and recovered from.

use thiserror::Error;

/// Receiver error type.
#[derive(Debug, Error)]
pub enum ReceiverError {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Signaling channel failure (dial, send, close).
    #[error("Transport error: {0}")]
    Transport(String),

    /// Inbound message could not be understood.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Every configured receiver port is leased.
    #[error("Receiver port pool exhausted ({capacity} ports configured)")]
    PortsExhausted { capacity: usize },

    /// A port was released that is not currently leased.
    #[error("Port {0} is not leased")]
    PortNotLeased(u16),

    /// A session already exists for this broadcaster.
    #[error("Session already exists for broadcaster: {0}")]
    DuplicateSession(String),

    /// No session exists for this broadcaster.
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Offer artifact could not be written or removed.
    #[error("Artifact error: {0}")]
    Artifact(String),

    /// Recorder process could not be started or stopped.
    #[error("Recorder error: {0}")]
    Recorder(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ReceiverError {
    /// Whether the client can keep running after this error.
    ///
    /// Only configuration and internal failures stop the process; everything
    /// else is scoped to one message or one broadcaster.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, ReceiverError::Config(_) | ReceiverError::Internal(_))
    }
}
