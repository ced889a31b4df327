//! Integration tests for the signaling handshake
//!
//! Auth, room join, the initial presenter roster and every way the server
//! can end the client during setup.

use receiver_test_utils::*;
use squawk_receiver::client::ProtocolStage;
use squawk_receiver::TerminalReason;
use std::collections::HashSet;

// ============================================================================
// Test 1: Auth then join
// ============================================================================

/// The client authenticates first and only joins after `authResponse`.
#[tokio::test(start_paused = true)]
async fn test_auth_then_join() -> Result<(), anyhow::Error> {
    // Arrange
    let mut harness = ReceiverHarness::start(test_settings(&[5004]));

    // Act
    let auth = harness.next_sent("auth").await;

    // Assert
    assert_eq!(auth["role"], TEST_ROLE);
    assert_eq!(auth["apikey"], TEST_API_KEY);
    assert!(!request_id(&auth).is_empty(), "auth must carry an id");
    assert!(
        harness.transport.sent_of_type("joinRoom").is_empty(),
        "joinRoom must wait for authResponse"
    );

    harness.server_sends(auth_ok()).await;
    let join = harness.next_sent("joinRoom").await;
    assert_eq!(join["room"], TEST_ROOM);
    assert_ne!(request_id(&join), request_id(&auth), "ids must be fresh");

    assert_eq!(harness.shutdown().await?, TerminalReason::Shutdown);
    Ok(())
}

// ============================================================================
// Test 2: Existing presenters
// ============================================================================

/// Each presenter in the roster gets its own request, port and offer.
#[tokio::test(start_paused = true)]
async fn test_roster_presenters_get_distinct_requests() -> Result<(), anyhow::Error> {
    let mut harness = ReceiverHarness::start(test_settings(&[5004, 5006, 5008]));

    let requests = harness.complete_handshake(&["u1", "u2", "u3"]).await;

    let users: Vec<&str> = requests
        .iter()
        .map(|r| r["userId"].as_str().unwrap())
        .collect();
    assert_eq!(users, vec!["u1", "u2", "u3"]);

    let ids: HashSet<String> = requests.iter().map(request_id).collect();
    assert_eq!(ids.len(), 3, "request ids must be distinct");

    let mut ports: Vec<u16> = requests.iter().map(|r| offer_port(r).unwrap()).collect();
    ports.sort_unstable();
    assert_eq!(ports, vec![5004, 5006, 5008]);

    for request in &requests {
        let user = request["userId"].as_str().unwrap();
        let offer = request["sdpOffer"].as_str().unwrap();
        assert!(offer.contains(&format!("c=IN IP4 {TEST_RECEIVER_IP}")));
        assert_eq!(
            harness.artifacts.content_for(user).as_deref(),
            Some(offer),
            "offer artifact must match the sent offer"
        );
    }

    assert_eq!(harness.shutdown().await?, TerminalReason::Shutdown);
    Ok(())
}

// ============================================================================
// Test 3: Negotiated answer
// ============================================================================

/// An answer for a pending request marks the session joined.
#[tokio::test(start_paused = true)]
async fn test_answer_marks_session_joined() -> Result<(), anyhow::Error> {
    let mut harness = ReceiverHarness::start(test_settings(&[5004]));
    let requests = harness.complete_handshake(&["u1"]).await;

    harness
        .server_sends(receive_media_answer(&request_id(&requests[0]), "v=0 answer"))
        .await;

    harness
        .eventually(|h| h.sessions.joined().len() == 1)
        .await?;
    let joined = harness.sessions.joined();
    assert_eq!(joined[0].user_id, "u1");
    assert_eq!(joined[0].port, 5004);
    assert_eq!(joined[0].sdp_answer.as_deref(), Some("v=0 answer"));

    // Unknown request ids are ignored
    harness
        .server_sends(receive_media_answer("no-such-request", "v=0"))
        .await;
    assert_eq!(harness.sessions.joined().len(), 1);

    assert_eq!(harness.shutdown().await?, TerminalReason::Shutdown);
    Ok(())
}

// ============================================================================
// Test 4: Auth rejected
// ============================================================================

/// An auth error is terminal and no join is attempted.
#[tokio::test(start_paused = true)]
async fn test_auth_error_is_terminal() -> Result<(), anyhow::Error> {
    let mut harness = ReceiverHarness::start(test_settings(&[5004]));
    harness.next_sent("auth").await;

    harness.server_sends(auth_error("invalid api key")).await;

    assert_eq!(
        harness.finish().await?,
        TerminalReason::ProtocolRejected {
            stage: ProtocolStage::Auth,
            message: "invalid api key".to_string(),
        }
    );
    assert!(harness.transport.sent_of_type("joinRoom").is_empty());
    assert!(!harness.transport.is_open(), "channel must be closed");
    assert_eq!(harness.transport.reconnects(), 0, "no retry after rejection");
    Ok(())
}

// ============================================================================
// Test 5: Join rejected
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_join_error_is_terminal() -> Result<(), anyhow::Error> {
    let mut harness = ReceiverHarness::start(test_settings(&[5004]));
    harness.next_sent("auth").await;
    harness.server_sends(auth_ok()).await;
    harness.next_sent("joinRoom").await;

    harness.server_sends(join_room_error("room not found")).await;

    assert_eq!(
        harness.finish().await?,
        TerminalReason::ProtocolRejected {
            stage: ProtocolStage::Join,
            message: "room not found".to_string(),
        }
    );
    assert!(harness.transport.sent_of_type("receiveMedia").is_empty());
    Ok(())
}

// ============================================================================
// Test 6: Negotiation rejected
// ============================================================================

/// A `receiveMediaResponse` error ends the client and drops every session.
#[tokio::test(start_paused = true)]
async fn test_negotiation_error_is_terminal() -> Result<(), anyhow::Error> {
    let mut harness = ReceiverHarness::start(test_settings(&[5004, 5006]));
    let requests = harness.complete_handshake(&["u1", "u2"]).await;

    harness
        .server_sends(receive_media_error(&request_id(&requests[1]), "codec mismatch"))
        .await;

    assert_eq!(
        harness.finish().await?,
        TerminalReason::ProtocolRejected {
            stage: ProtocolStage::Negotiate,
            message: "codec mismatch".to_string(),
        }
    );
    assert!(harness.artifacts.is_empty(), "offers must be removed");
    assert_eq!(harness.sessions.left().len(), 2);
    Ok(())
}

// ============================================================================
// Test 7: Media override
// ============================================================================

/// Another login with the same key ends the client without a retry.
#[tokio::test(start_paused = true)]
async fn test_media_override_is_terminal() -> Result<(), anyhow::Error> {
    let mut harness = ReceiverHarness::start(test_settings(&[5004]));
    harness.complete_handshake(&["u1"]).await;

    harness.server_sends(media_override()).await;

    assert_eq!(harness.finish().await?, TerminalReason::SessionOverridden);
    assert!(harness.artifacts.is_empty());
    assert_eq!(harness.transport.reconnects(), 0);
    Ok(())
}

// ============================================================================
// Test 8: Shutdown
// ============================================================================

/// Shutdown logs out before closing the channel.
#[tokio::test(start_paused = true)]
async fn test_shutdown_logs_out_then_closes() -> Result<(), anyhow::Error> {
    let mut harness = ReceiverHarness::start(test_settings(&[5004]));
    harness.complete_handshake(&["u1"]).await;

    assert_eq!(harness.shutdown().await?, TerminalReason::Shutdown);

    let logout = harness.next_sent("logout").await;
    assert!(!request_id(&logout).is_empty());
    assert_eq!(harness.transport.next_call().await, TransportCall::Close);
    assert!(harness.artifacts.is_empty());
    assert_eq!(harness.sessions.left().len(), 1);
    Ok(())
}

// ============================================================================
// Test 9: Noise
// ============================================================================

/// Malformed, unknown and out-of-order messages do not disturb the client.
#[tokio::test(start_paused = true)]
async fn test_unexpected_messages_are_ignored() -> Result<(), anyhow::Error> {
    let mut harness = ReceiverHarness::start(test_settings(&[5004]));
    harness.next_sent("auth").await;

    // Join response before auth completes
    harness.server_sends(join_room_ok(&["u1"])).await;
    harness
        .server_sends(serde_json::json!({"type": "iceCandidate", "candidate": "x"}))
        .await;
    harness.server_sends(serde_json::json!({"no": "type"})).await;
    harness.server_sends(ping_response()).await;

    assert!(!harness.is_finished());
    assert!(harness.transport.sent_of_type("receiveMedia").is_empty());

    // The handshake still completes normally afterwards
    harness.server_sends(auth_ok()).await;
    harness.next_sent("joinRoom").await;
    harness.server_sends(join_room_ok(&["u1"])).await;
    let request = harness.next_sent("receiveMedia").await;
    assert_eq!(request["userId"], "u1");

    assert_eq!(harness.shutdown().await?, TerminalReason::Shutdown);
    Ok(())
}
