//! Observability for the receiver.
//!
//! Metric labels are bounded:
//! - `message_type`: wire message types plus `unknown`
//! - `stage`: auth, join, negotiate
//! - `reason`: the four terminal reasons
//!
//! # Metrics
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `receiver_sessions_active` | Gauge | none | Sessions in the registry |
//! | `receiver_ports_available` | Gauge | none | Ports left in the pool |
//! | `receiver_messages_received_total` | Counter | `message_type` | Decoded inbound messages |
//! | `receiver_messages_sent_total` | Counter | `message_type` | Outbound messages handed to the transport |
//! | `receiver_reconnect_attempts_total` | Counter | none | Scheduled reconnects |
//! | `receiver_port_exhausted_total` | Counter | none | Broadcasters parked for lack of a port |
//! | `receiver_protocol_errors_total` | Counter | `stage` | Server-rejected protocol steps |
//! | `receiver_terminal_total` | Counter | `reason` | Client terminations |

pub mod metrics;

pub use metrics::{
    init_metrics_exporter, record_message_received, record_message_sent,
    record_port_exhausted, record_protocol_error, record_reconnect_attempt, record_terminal,
    set_ports_available, set_sessions_active,
};
