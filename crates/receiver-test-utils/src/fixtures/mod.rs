//! Test fixtures: client settings and server messages.
//!
//! The message builders return `serde_json::Value` so tests can tweak a field
//! before sending it.

use secrecy::SecretString;
use serde_json::{json, Value};
use squawk_receiver::lifecycle::RetryPolicy;
use squawk_receiver::ClientSettings;
use std::time::Duration;

pub const TEST_API_KEY: &str = "test-api-key";
pub const TEST_ROLE: &str = "listener";
pub const TEST_ROOM: &str = "PRO";
pub const TEST_RECEIVER_IP: &str = "10.0.0.5";

/// Production retry cadence: every 20s for up to 15 minutes.
pub const TEST_RETRY: RetryPolicy = RetryPolicy {
    interval: Duration::from_secs(20),
    window: Duration::from_secs(15 * 60),
};

/// Settings for a client receiving on `ports`.
///
/// The keep-alive is pushed out to an hour so it stays out of the way;
/// tests that care about pings use [`test_settings_with_ping`].
#[must_use]
pub fn test_settings(ports: &[u16]) -> ClientSettings {
    test_settings_with_ping(ports, Duration::from_secs(3600))
}

#[must_use]
pub fn test_settings_with_ping(ports: &[u16], ping_interval: Duration) -> ClientSettings {
    ClientSettings {
        role: TEST_ROLE.to_string(),
        api_key: SecretString::from(TEST_API_KEY),
        room: TEST_ROOM.to_string(),
        receiver_ip: TEST_RECEIVER_IP.to_string(),
        receiver_ports: ports.to_vec(),
        prebuilt_offer: None,
        retry: TEST_RETRY,
        ping_interval,
    }
}

fn presenter_json(user_id: &str) -> Value {
    json!({"userId": user_id, "username": format!("{user_id}-name")})
}

#[must_use]
pub fn auth_ok() -> Value {
    json!({"id": "srv-auth", "type": "authResponse"})
}

#[must_use]
pub fn auth_error(message: &str) -> Value {
    json!({"id": "srv-auth", "type": "authResponse", "error": message})
}

/// Successful join listing `presenters` as already broadcasting.
#[must_use]
pub fn join_room_ok(presenters: &[&str]) -> Value {
    let existing: Vec<Value> = presenters.iter().map(|id| presenter_json(id)).collect();
    json!({
        "id": "srv-join",
        "type": "joinRoomResponse",
        "existingPresenters": existing,
    })
}

#[must_use]
pub fn join_room_error(message: &str) -> Value {
    json!({"id": "srv-join", "type": "joinRoomResponse", "error": message})
}

/// Answer to the `receiveMedia` request with id `request_id`.
#[must_use]
pub fn receive_media_answer(request_id: &str, sdp_answer: &str) -> Value {
    json!({
        "id": request_id,
        "type": "receiveMediaResponse",
        "sdpAnswer": sdp_answer,
    })
}

#[must_use]
pub fn receive_media_error(request_id: &str, message: &str) -> Value {
    json!({"id": request_id, "type": "receiveMediaResponse", "error": message})
}

#[must_use]
pub fn presenter_arrived(user_id: &str) -> Value {
    json!({"type": "newPresenterArrived", "user": presenter_json(user_id)})
}

#[must_use]
pub fn presenter_left(user_id: &str) -> Value {
    json!({"type": "presenterLeft", "userId": user_id})
}

#[must_use]
pub fn media_override() -> Value {
    json!({"type": "mediaOverride"})
}

#[must_use]
pub fn ping_response() -> Value {
    json!({"type": "pingResponse"})
}

/// Receiver port announced in a `receiveMedia` request's offer.
#[must_use]
pub fn offer_port(request: &Value) -> Option<u16> {
    request["sdpOffer"]
        .as_str()?
        .lines()
        .find_map(|line| line.strip_prefix("m=audio "))?
        .split_whitespace()
        .next()?
        .parse()
        .ok()
}

/// Request id of an outbound message.
#[must_use]
pub fn request_id(message: &Value) -> String {
    message["id"].as_str().unwrap_or_default().to_string()
}
