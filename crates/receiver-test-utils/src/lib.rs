//! # Receiver Test Utilities
//!
//! Shared test utilities for the squawk receiver.
//!
//! This crate provides in-memory stand-ins for everything the client talks
//! to, so end-to-end tests run without a signaling server, a filesystem or a
//! recorder process.
//!
//! ## Modules
//!
//! - `mock_transport` - Scriptable signaling channel
//! - `mock_sinks` - In-memory offer sink and recording session events
//! - `fixtures` - Client settings and server messages
//! - `harness` - Spawned client wired to the mocks
//!
//! ## Usage
//!
//! ```rust,ignore
//! use receiver_test_utils::*;
//!
//! #[tokio::test(start_paused = true)]
//! async fn test_example() -> anyhow::Result<()> {
//!     let mut harness = ReceiverHarness::start(test_settings(&[5004, 5006]));
//!     let requests = harness.complete_handshake(&["alice", "bob"]).await;
//!
//!     let id = requests[0]["id"].as_str().unwrap();
//!     harness.server_sends(receive_media_answer(id, "v=0")).await;
//!     assert_eq!(harness.sessions.joined().len(), 1);
//!     Ok(())
//! }
//! ```

pub mod fixtures;
pub mod harness;
pub mod mock_sinks;
pub mod mock_transport;

// Re-export commonly used items
pub use fixtures::*;
pub use harness::*;
pub use mock_sinks::*;
pub use mock_transport::*;
