//! Integration tests for per-presenter session management
//!
//! Port leasing, the waiting queue, offer artifacts and teardown when a
//! presenter leaves or the connection drops.

use receiver_test_utils::*;
use squawk_receiver::TerminalReason;

// ============================================================================
// Test 1: Presenter arrives after join
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_new_presenter_gets_a_session() -> Result<(), anyhow::Error> {
    let mut harness = ReceiverHarness::start(test_settings(&[5004, 5006]));
    let requests = harness.complete_handshake(&["u1"]).await;
    let first_port = offer_port(&requests[0]).unwrap();

    harness.server_sends(presenter_arrived("u2")).await;

    let request = harness.next_sent("receiveMedia").await;
    assert_eq!(request["userId"], "u2");
    let second_port = offer_port(&request).unwrap();
    assert_ne!(first_port, second_port, "ports must not be shared");
    assert_eq!(harness.artifacts.len(), 2);

    assert_eq!(harness.shutdown().await?, TerminalReason::Shutdown);
    Ok(())
}

// ============================================================================
// Test 2: Presenter leaves
// ============================================================================

/// Leaving removes the offer, notifies the sink and frees the port.
#[tokio::test(start_paused = true)]
async fn test_presenter_left_tears_down_session() -> Result<(), anyhow::Error> {
    let mut harness = ReceiverHarness::start(test_settings(&[5004]));
    let requests = harness.complete_handshake(&["u1"]).await;
    harness
        .server_sends(receive_media_answer(&request_id(&requests[0]), "v=0"))
        .await;

    harness.server_sends(presenter_left("u1")).await;

    assert!(harness.artifacts.content_for("u1").is_none());
    let left = harness.sessions.left();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].user_id, "u1");
    assert_eq!(left[0].port, 5004);

    // The single port is free again
    harness.server_sends(presenter_arrived("u2")).await;
    let request = harness.next_sent("receiveMedia").await;
    assert_eq!(request["userId"], "u2");
    assert_eq!(offer_port(&request), Some(5004));

    // A repeated leave is a no-op
    harness.server_sends(presenter_left("u1")).await;
    assert_eq!(harness.sessions.left().len(), 1);

    assert_eq!(harness.shutdown().await?, TerminalReason::Shutdown);
    Ok(())
}

// ============================================================================
// Test 3: Late answer
// ============================================================================

/// An answer arriving after the presenter left does not revive the session.
#[tokio::test(start_paused = true)]
async fn test_answer_after_leave_is_ignored() -> Result<(), anyhow::Error> {
    let mut harness = ReceiverHarness::start(test_settings(&[5004]));
    let requests = harness.complete_handshake(&["u1"]).await;

    harness.server_sends(presenter_left("u1")).await;
    harness
        .server_sends(receive_media_answer(&request_id(&requests[0]), "v=0"))
        .await;

    assert!(harness.sessions.joined().is_empty());
    assert!(!harness.is_finished());

    assert_eq!(harness.shutdown().await?, TerminalReason::Shutdown);
    Ok(())
}

// ============================================================================
// Test 4: Port exhaustion
// ============================================================================

/// With every port leased, newcomers wait and are admitted in arrival order.
#[tokio::test(start_paused = true)]
async fn test_waiting_presenters_admitted_in_order() -> Result<(), anyhow::Error> {
    let mut harness = ReceiverHarness::start(test_settings(&[5004]));
    harness.complete_handshake(&["u1"]).await;

    harness.server_sends(presenter_arrived("u2")).await;
    harness.server_sends(presenter_arrived("u3")).await;
    assert_eq!(
        harness.transport.sent_of_type("receiveMedia").len(),
        1,
        "no port for u2 or u3 yet"
    );

    harness.server_sends(presenter_left("u1")).await;
    let request = harness.next_sent("receiveMedia").await;
    assert_eq!(request["userId"], "u2");

    // u3 leaves while still waiting and is never admitted
    harness.server_sends(presenter_left("u3")).await;
    harness.server_sends(presenter_left("u2")).await;
    assert_eq!(harness.transport.sent_of_type("receiveMedia").len(), 2);

    assert_eq!(harness.shutdown().await?, TerminalReason::Shutdown);
    Ok(())
}

// ============================================================================
// Test 5: Artifact failure
// ============================================================================

/// A failed offer write skips the presenter and keeps the port available.
#[tokio::test(start_paused = true)]
async fn test_artifact_failure_skips_presenter() -> Result<(), anyhow::Error> {
    let mut harness = ReceiverHarness::start(test_settings(&[5004]));
    harness.complete_handshake(&[]).await;

    harness.artifacts.set_fail_writes(true);
    harness.server_sends(presenter_arrived("u1")).await;
    assert!(harness.transport.sent_of_type("receiveMedia").is_empty());

    harness.artifacts.set_fail_writes(false);
    harness.server_sends(presenter_arrived("u2")).await;
    let request = harness.next_sent("receiveMedia").await;
    assert_eq!(request["userId"], "u2");
    assert_eq!(offer_port(&request), Some(5004));

    assert_eq!(harness.shutdown().await?, TerminalReason::Shutdown);
    Ok(())
}

// ============================================================================
// Test 6: Connection drop
// ============================================================================

/// A dropped connection discards all session state; the rejoin rebuilds it.
#[tokio::test(start_paused = true)]
async fn test_connection_drop_drains_sessions() -> Result<(), anyhow::Error> {
    let mut harness = ReceiverHarness::start(test_settings(&[5004, 5006]));
    let first = harness.complete_handshake(&["u1", "u2"]).await;
    harness
        .server_sends(receive_media_answer(&request_id(&first[0]), "v=0"))
        .await;

    harness.drop_connection().await;

    assert!(harness.artifacts.is_empty());
    assert_eq!(harness.sessions.left().len(), 2);

    // The retry reconnects and the roster is negotiated from scratch
    let second = harness.complete_handshake(&["u1", "u2"]).await;
    assert_eq!(second.len(), 2);
    for request in &second {
        assert!(
            first.iter().all(|old| request_id(old) != request_id(request)),
            "new requests need new ids"
        );
    }

    // Answers to requests from the old connection are stale
    harness
        .server_sends(receive_media_answer(&request_id(&first[1]), "v=0"))
        .await;
    assert_eq!(harness.sessions.joined().len(), 1);

    assert_eq!(harness.shutdown().await?, TerminalReason::Shutdown);
    Ok(())
}
