//! Integration tests for the squawk receiver
//!
//! This is the top-level integration test harness that Cargo discovers.
//! Test modules are organized in the integration/ subdirectory. Every test
//! drives a real `ReceiverClient` through the in-memory transport on a
//! paused clock.

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]

#[path = "integration/handshake_tests.rs"]
mod handshake_tests;

#[path = "integration/session_tests.rs"]
mod session_tests;

#[path = "integration/retry_tests.rs"]
mod retry_tests;

#[path = "integration/transport_tests.rs"]
mod transport_tests;
