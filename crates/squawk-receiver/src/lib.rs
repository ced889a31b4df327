//! Squawk Receiver Library
//!
//! Signaling client that receives audio from every broadcaster in a squawk
//! room. For each broadcaster it:
//!
//! - leases a local receiver port
//! - writes a receive-only SDP offer for the recorder
//! - negotiates the session over the WebSocket signaling channel
//! - tears everything down when the broadcaster leaves
//!
//! # Architecture
//!
//! ```text
//! ReceiverClient (one dispatch task)
//! ├── SignalingMachine
//! │   ├── PortPool / SessionRegistry / PendingRequests
//! │   ├── Transport      (WsTransport: connection task)
//! │   ├── ArtifactSink   (FileArtifactSink)
//! │   └── SessionEvents  (RecorderLauncher or LoggingSessionEvents)
//! └── ConnectionLifecycle
//!     └── retry scheduler task
//! ```
//!
//! Tasks outside the dispatch task only post [`client::ClientEvent`]s into
//! its channel, so none of the session state is shared or locked.
//!
//! # Modules
//!
//! - [`client`] - Dispatch loop and terminal reasons
//! - [`signaling`] - Handshake and per-broadcaster negotiation
//! - [`lifecycle`] - Connection state and retry policy
//! - [`session`] - Ports, sessions and request correlation
//! - [`protocol`] - Wire messages
//! - [`transport`] - Signaling channel
//! - [`config`] - Configuration from environment

pub mod artifacts;
pub mod client;
pub mod config;
pub mod errors;
pub mod events;
pub mod lifecycle;
pub mod observability;
pub mod protocol;
pub mod recorder;
pub mod sdp;
pub mod session;
pub mod signaling;
pub mod transport;

pub use client::{ClientEvent, ClientSettings, ReceiverClient, TerminalReason};
pub use errors::ReceiverError;
