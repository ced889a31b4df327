//! Signaling protocol: wire messages and the outbound message builder.

pub mod builder;
pub mod messages;

pub use builder::MessageBuilder;
pub use messages::{Broadcaster, InboundMessage, OutboundMessage, OutboundPayload};
