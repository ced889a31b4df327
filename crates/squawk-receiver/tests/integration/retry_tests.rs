//! Integration tests for reconnect and keep-alive timing
//!
//! All tests run on a paused clock, so the 20 second retry interval and the
//! 15 minute window elapse instantly while keeping exact virtual timing.

use receiver_test_utils::*;
use squawk_receiver::TerminalReason;
use std::time::Duration;
use tokio::time::Instant;

/// Wait for the next reconnect attempt, skipping any other calls.
async fn next_reconnect(harness: &mut ReceiverHarness) {
    while harness.transport.next_call().await != TransportCall::Reconnect {}
}

fn assert_elapsed(start: Instant, expected: Duration) {
    let elapsed = start.elapsed();
    assert!(
        elapsed >= expected && elapsed < expected + Duration::from_secs(1),
        "expected ~{expected:?}, got {elapsed:?}"
    );
}

// ============================================================================
// Test 1: First retry
// ============================================================================

/// The first reconnect happens one retry interval after the drop.
#[tokio::test(start_paused = true)]
async fn test_reconnect_after_retry_interval() -> Result<(), anyhow::Error> {
    let mut harness = ReceiverHarness::start(test_settings(&[5004]));
    harness.complete_handshake(&[]).await;

    let start = Instant::now();
    harness.drop_connection().await;
    next_reconnect(&mut harness).await;

    assert_elapsed(start, TEST_RETRY.interval);
    assert_eq!(harness.transport.reconnects(), 1);

    // The new connection authenticates again
    harness.next_sent("auth").await;

    assert_eq!(harness.shutdown().await?, TerminalReason::Shutdown);
    Ok(())
}

// ============================================================================
// Test 2: Retry window
// ============================================================================

/// With the server unreachable the client retries every interval and gives
/// up when the window closes.
#[tokio::test(start_paused = true)]
async fn test_retries_exhausted_after_window() -> Result<(), anyhow::Error> {
    let mut harness = ReceiverHarness::start(test_settings(&[5004]));
    harness.complete_handshake(&["u1"]).await;

    harness.transport.set_accept_connections(false);
    let start = Instant::now();
    harness.drop_connection().await;

    assert_eq!(harness.finish().await?, TerminalReason::RetriesExhausted);
    assert_elapsed(start, TEST_RETRY.window);

    // Ticks at 20s, 40s, ... 880s; the window wins the tie at 900s
    assert_eq!(harness.transport.reconnects(), 44);
    assert!(harness.artifacts.is_empty());
    Ok(())
}

// ============================================================================
// Test 3: Recovery
// ============================================================================

/// A successful reconnect stops the retry schedule, and a later drop starts a
/// fresh one.
#[tokio::test(start_paused = true)]
async fn test_successful_reconnect_stops_retrying() -> Result<(), anyhow::Error> {
    let mut harness = ReceiverHarness::start(test_settings(&[5004]));
    harness.complete_handshake(&[]).await;

    harness.drop_connection().await;
    harness.complete_handshake(&[]).await;
    assert_eq!(harness.transport.reconnects(), 1);

    // Well past several retry intervals: nothing else is attempted
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(harness.transport.reconnects(), 1);
    assert!(!harness.is_finished());

    // Past the first window too; a new drop still gets a full schedule
    tokio::time::sleep(TEST_RETRY.window).await;
    let start = Instant::now();
    harness.drop_connection().await;
    next_reconnect(&mut harness).await;
    assert_elapsed(start, TEST_RETRY.interval);
    assert_eq!(harness.transport.reconnects(), 2);

    assert_eq!(harness.shutdown().await?, TerminalReason::Shutdown);
    Ok(())
}

// ============================================================================
// Test 4: Refused reconnects then recovery
// ============================================================================

/// Refused attempts keep the schedule going until one succeeds.
#[tokio::test(start_paused = true)]
async fn test_recovers_after_refused_attempts() -> Result<(), anyhow::Error> {
    let mut harness = ReceiverHarness::start(test_settings(&[5004]));
    harness.complete_handshake(&[]).await;

    harness.transport.set_accept_connections(false);
    let start = Instant::now();
    harness.drop_connection().await;

    next_reconnect(&mut harness).await;
    next_reconnect(&mut harness).await;
    assert_elapsed(start, TEST_RETRY.interval * 2);

    harness.transport.set_accept_connections(true);
    let requests = harness.complete_handshake(&["u1"]).await;
    assert_elapsed(start, TEST_RETRY.interval * 3);
    assert_eq!(requests.len(), 1);
    assert_eq!(harness.transport.reconnects(), 3);

    assert_eq!(harness.shutdown().await?, TerminalReason::Shutdown);
    Ok(())
}

// ============================================================================
// Test 5: Shutdown during retry
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_shutdown_while_retrying() -> Result<(), anyhow::Error> {
    let mut harness = ReceiverHarness::start(test_settings(&[5004]));
    harness.complete_handshake(&[]).await;

    harness.transport.set_accept_connections(false);
    harness.drop_connection().await;
    next_reconnect(&mut harness).await;

    assert_eq!(harness.shutdown().await?, TerminalReason::Shutdown);
    assert!(
        harness.transport.sent_of_type("logout").is_empty(),
        "no logout on a closed channel"
    );

    tokio::time::sleep(TEST_RETRY.interval * 3).await;
    assert_eq!(harness.transport.reconnects(), 1);
    Ok(())
}

// ============================================================================
// Test 6: Keep-alive
// ============================================================================

/// Pings go out on the configured interval while connected.
#[tokio::test(start_paused = true)]
async fn test_ping_sent_on_interval() -> Result<(), anyhow::Error> {
    let ping_interval = Duration::from_secs(30);
    let start = Instant::now();
    let mut harness = ReceiverHarness::start(test_settings_with_ping(&[5004], ping_interval));
    harness.complete_handshake(&[]).await;

    harness.next_sent("ping").await;
    assert_elapsed(start, ping_interval);
    harness.server_sends(ping_response()).await;

    harness.next_sent("ping").await;
    assert_elapsed(start, ping_interval * 2);

    assert_eq!(harness.shutdown().await?, TerminalReason::Shutdown);
    Ok(())
}
