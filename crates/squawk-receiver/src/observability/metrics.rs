//! Metrics definitions for the receiver.
//!
//! All metrics follow Prometheus naming conventions:
//! - `receiver_` prefix
//! - `_total` suffix for counters
//!
//! Nothing is recorded until a recorder is installed; without one every call
//! here is a no-op.

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

/// Install the Prometheus recorder and serve `/metrics` on `addr`.
///
/// Must be called from inside a tokio runtime, before any metric is recorded.
///
/// # Errors
///
/// Returns error if the recorder is already installed or the listener cannot
/// be started.
pub fn init_metrics_exporter(addr: SocketAddr) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))
}

// ============================================================================
// Session Metrics (Gauges)
// ============================================================================

/// Set the number of sessions in the registry.
///
/// Metric: `receiver_sessions_active`
pub fn set_sessions_active(count: usize) {
    // Session counts are bounded by the port pool
    #[allow(clippy::cast_precision_loss)]
    gauge!("receiver_sessions_active").set(count as f64);
}

/// Set the number of receiver ports ready to lease.
///
/// Metric: `receiver_ports_available`
pub fn set_ports_available(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("receiver_ports_available").set(count as f64);
}

// ============================================================================
// Message Metrics (Counters)
// ============================================================================

/// Record a decoded inbound message.
///
/// Metric: `receiver_messages_received_total`
/// Labels: `message_type` (bounded by `InboundMessage::message_type`)
pub fn record_message_received(message_type: &'static str) {
    counter!("receiver_messages_received_total", "message_type" => message_type).increment(1);
}

/// Record an outbound message handed to the transport.
///
/// Metric: `receiver_messages_sent_total`
/// Labels: `message_type` (bounded by `OutboundPayload::message_type`)
pub fn record_message_sent(message_type: &'static str) {
    counter!("receiver_messages_sent_total", "message_type" => message_type).increment(1);
}

// ============================================================================
// Lifecycle Metrics (Counters)
// ============================================================================

/// Record a reconnect issued by the retry scheduler.
///
/// Metric: `receiver_reconnect_attempts_total`
pub fn record_reconnect_attempt() {
    counter!("receiver_reconnect_attempts_total").increment(1);
}

/// Record a broadcaster that could not get a port.
///
/// Metric: `receiver_port_exhausted_total`
///
/// A steady non-zero rate means the configured port list is too small for
/// the room.
pub fn record_port_exhausted() {
    counter!("receiver_port_exhausted_total").increment(1);
}

/// Record a protocol step the server rejected.
///
/// Metric: `receiver_protocol_errors_total`
/// Labels: `stage` (auth, join, negotiate)
pub fn record_protocol_error(stage: &'static str) {
    counter!("receiver_protocol_errors_total", "stage" => stage).increment(1);
}

/// Record why the client stopped.
///
/// Metric: `receiver_terminal_total`
/// Labels: `reason` (protocol_rejected, session_overridden, retries_exhausted, shutdown)
pub fn record_terminal(reason: &'static str) {
    counter!("receiver_terminal_total", "reason" => reason).increment(1);
}
