//! Signaling state machine.
//!
//! Drives the handshake (auth, join room) and one negotiation per
//! broadcaster. Owns the port pool, session registry, request correlator and
//! the queue of broadcasters waiting for a port. All of it is mutated only
//! from the dispatch task, one event at a time.
//!
//! Phase transitions:
//!
//! | Phase | Message | Result |
//! |-------|---------|--------|
//! | Authenticating | `authResponse` ok | send `joinRoom`, Joining |
//! | Joining | `joinRoomResponse` ok | negotiate every roster entry, InRoom |
//! | InRoom | `newPresenterArrived` | negotiate the newcomer |
//! | InRoom | `receiveMediaResponse` ok | record answer, session joined |
//! | InRoom | `presenterLeft` | tear the session down |
//! | any | error on auth/join/negotiation | terminal |
//! | any | `mediaOverride` | terminal |
//!
//! Anything else is logged and ignored.

use crate::artifacts::ArtifactSink;
use crate::client::{ProtocolStage, TerminalReason};
use crate::events::SessionEvents;
use crate::observability;
use crate::protocol::{Broadcaster, InboundMessage, MessageBuilder, OutboundMessage};
use crate::sdp::OfferSource;
use crate::session::{PendingRequests, PortPool, SessionRegistry};
use crate::transport::Transport;
use std::collections::VecDeque;
use tracing::{debug, error, info, warn};

/// Handshake phase of the current connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No connection.
    Idle,
    /// `auth` sent, waiting for `authResponse`.
    Authenticating,
    /// `joinRoom` sent, waiting for `joinRoomResponse`.
    Joining,
    InRoom,
    /// Terminal.
    Closed,
}

/// What the dispatcher should do after a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Continue,
    /// The room was joined.
    Joined,
    /// Stop for good.
    Terminate(TerminalReason),
}

/// Signaling state machine over an injected transport, artifact sink and
/// session event sink.
#[derive(Debug)]
pub struct SignalingMachine<T, A, E> {
    phase: Phase,
    pool: PortPool,
    registry: SessionRegistry,
    pending: PendingRequests,
    waiting: VecDeque<Broadcaster>,
    builder: MessageBuilder,
    offers: OfferSource,
    transport: T,
    artifacts: A,
    events: E,
}

impl<T, A, E> SignalingMachine<T, A, E>
where
    T: Transport,
    A: ArtifactSink,
    E: SessionEvents,
{
    #[must_use]
    pub fn new(
        builder: MessageBuilder,
        offers: OfferSource,
        ports: &[u16],
        transport: T,
        artifacts: A,
        events: E,
    ) -> Self {
        let machine = Self {
            phase: Phase::Idle,
            pool: PortPool::new(ports),
            registry: SessionRegistry::new(),
            pending: PendingRequests::new(),
            waiting: VecDeque::new(),
            builder,
            offers,
            transport,
            artifacts,
            events,
        };
        machine.publish_gauges();
        machine
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    #[must_use]
    pub fn pool(&self) -> &PortPool {
        &self.pool
    }

    #[must_use]
    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    #[must_use]
    pub fn pending(&self) -> &PendingRequests {
        &self.pending
    }

    /// Broadcasters waiting for a free port, oldest first.
    pub fn waiting(&self) -> impl Iterator<Item = &Broadcaster> {
        self.waiting.iter()
    }

    #[must_use]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    #[must_use]
    pub fn artifacts(&self) -> &A {
        &self.artifacts
    }

    #[must_use]
    pub fn events(&self) -> &E {
        &self.events
    }

    /// Start the first connection attempt.
    pub fn connect(&mut self) {
        self.transport.connect();
    }

    /// Drop the current connection and dial again.
    pub fn reconnect(&mut self) {
        self.transport.reconnect();
    }

    /// The channel opened: discard leftovers and authenticate.
    pub fn on_open(&mut self) {
        if self.phase == Phase::Closed {
            return;
        }
        self.drain_sessions("connection reopened");

        info!(target: "receiver.signaling", "Authenticating");
        let auth = self.builder.auth();
        self.send(&auth);
        self.phase = Phase::Authenticating;
    }

    /// The channel closed: every session goes with it.
    pub fn on_close(&mut self) {
        self.drain_sessions("connection closed");
        if self.phase != Phase::Closed {
            self.phase = Phase::Idle;
        }
    }

    /// Decode and dispatch one inbound text message.
    pub fn handle_text(&mut self, text: &str) -> Outcome {
        match InboundMessage::parse(text) {
            Ok(message) => self.handle_message(message),
            Err(e) => {
                warn!(target: "receiver.signaling", error = %e, "Ignoring undecodable message");
                Outcome::Continue
            }
        }
    }

    /// Dispatch one decoded message.
    pub fn handle_message(&mut self, message: InboundMessage) -> Outcome {
        observability::record_message_received(message.message_type());

        if self.phase == Phase::Closed {
            debug!(
                target: "receiver.signaling",
                message_type = message.message_type(),
                "Message after close ignored"
            );
            return Outcome::Continue;
        }

        match message {
            InboundMessage::AuthResponse { error } => self.on_auth_response(error),
            InboundMessage::JoinRoomResponse {
                error,
                existing_presenters,
            } => self.on_join_room_response(error, existing_presenters),
            InboundMessage::ReceiveMediaResponse {
                id,
                error,
                sdp_answer,
            } => self.on_receive_media_response(&id, error, sdp_answer),
            InboundMessage::NewPresenterArrived { user } => {
                if self.expect_phase(Phase::InRoom, "newPresenterArrived") {
                    info!(
                        target: "receiver.signaling",
                        user_id = %user.user_id,
                        username = %user.username,
                        "Presenter arrived"
                    );
                    self.open_session(user);
                }
                Outcome::Continue
            }
            InboundMessage::PresenterLeft { user_id } => {
                if self.expect_phase(Phase::InRoom, "presenterLeft") {
                    self.on_presenter_left(&user_id);
                }
                Outcome::Continue
            }
            InboundMessage::MediaOverride => {
                warn!(
                    target: "receiver.signaling",
                    "Media override received, the API key is in use by another session"
                );
                self.phase = Phase::Closed;
                Outcome::Terminate(TerminalReason::SessionOverridden)
            }
            InboundMessage::PingResponse => {
                debug!(target: "receiver.signaling", "Pong received");
                Outcome::Continue
            }
            InboundMessage::Unknown { message_type } => {
                debug!(
                    target: "receiver.signaling",
                    message_type = %message_type,
                    "Ignoring unknown message type"
                );
                Outcome::Continue
            }
        }
    }

    fn on_auth_response(&mut self, error: Option<String>) -> Outcome {
        if !self.expect_phase(Phase::Authenticating, "authResponse") {
            return Outcome::Continue;
        }
        if let Some(message) = error {
            return self.reject(ProtocolStage::Auth, message);
        }

        info!(
            target: "receiver.signaling",
            room = %self.builder.room(),
            "Authentication successful, joining room"
        );
        let join = self.builder.join_room();
        self.send(&join);
        self.phase = Phase::Joining;
        Outcome::Continue
    }

    fn on_join_room_response(
        &mut self,
        error: Option<String>,
        presenters: Vec<Broadcaster>,
    ) -> Outcome {
        if !self.expect_phase(Phase::Joining, "joinRoomResponse") {
            return Outcome::Continue;
        }
        if let Some(message) = error {
            return self.reject(ProtocolStage::Join, message);
        }

        info!(
            target: "receiver.signaling",
            room = %self.builder.room(),
            presenters = presenters.len(),
            "Joined room"
        );
        self.phase = Phase::InRoom;
        for presenter in presenters {
            self.open_session(presenter);
        }
        Outcome::Joined
    }

    fn on_receive_media_response(
        &mut self,
        request_id: &str,
        error: Option<String>,
        sdp_answer: Option<String>,
    ) -> Outcome {
        if !self.expect_phase(Phase::InRoom, "receiveMediaResponse") {
            return Outcome::Continue;
        }

        let user_id = self.pending.take(request_id);

        if let Some(message) = error {
            warn!(
                target: "receiver.signaling",
                request_id = %request_id,
                user_id = user_id.as_deref().unwrap_or("unknown"),
                "Negotiation rejected"
            );
            return self.reject(ProtocolStage::Negotiate, message);
        }

        let Some(user_id) = user_id else {
            warn!(
                target: "receiver.signaling",
                request_id = %request_id,
                "Answer for an unknown request, ignoring"
            );
            return Outcome::Continue;
        };

        let Some(answer) = sdp_answer else {
            warn!(
                target: "receiver.signaling",
                user_id = %user_id,
                "Answer without sdpAnswer, ignoring"
            );
            return Outcome::Continue;
        };

        match self.registry.set_answer(&user_id, answer) {
            Ok(session) => {
                info!(
                    target: "receiver.signaling",
                    user_id = %user_id,
                    port = session.receiver_port(),
                    "SDP negotiation successful"
                );
                self.events.on_session_joined(session);
            }
            Err(e) => {
                warn!(target: "receiver.signaling", error = %e, "Answer for a closed session");
            }
        }
        Outcome::Continue
    }

    fn on_presenter_left(&mut self, user_id: &str) {
        let before = self.waiting.len();
        self.waiting.retain(|b| b.user_id != user_id);
        if self.waiting.len() != before {
            info!(
                target: "receiver.signaling",
                user_id = %user_id,
                "Waiting presenter left before getting a port"
            );
            return;
        }

        if self.close_session(user_id) {
            info!(target: "receiver.signaling", user_id = %user_id, "Presenter left");
            self.admit_waiting();
        } else {
            debug!(
                target: "receiver.signaling",
                user_id = %user_id,
                "Presenter left without a session"
            );
        }
    }

    /// Lease a port, write the offer and send the negotiation request.
    fn open_session(&mut self, broadcaster: Broadcaster) {
        if self.registry.contains(&broadcaster.user_id)
            || self.waiting.iter().any(|b| b.user_id == broadcaster.user_id)
        {
            info!(
                target: "receiver.signaling",
                user_id = %broadcaster.user_id,
                "Presenter already known, ignoring"
            );
            return;
        }

        let port = match self.pool.lease() {
            Ok(port) => port,
            Err(e) => {
                warn!(
                    target: "receiver.signaling",
                    user_id = %broadcaster.user_id,
                    error = %e,
                    "No receiver port free, presenter queued"
                );
                observability::record_port_exhausted();
                self.waiting.push_back(broadcaster);
                return;
            }
        };

        let offer = self.offers.offer_for(port);
        let artifact = match self.artifacts.write(&offer, &broadcaster.user_id) {
            Ok(handle) => handle,
            Err(e) => {
                error!(
                    target: "receiver.signaling",
                    user_id = %broadcaster.user_id,
                    port = port,
                    error = %e,
                    "Failed to write offer, abandoning negotiation"
                );
                self.release_port(port);
                return;
            }
        };

        let user_id = broadcaster.user_id.clone();
        if let Err(e) = self
            .registry
            .create(broadcaster, port, offer.clone(), artifact.clone())
        {
            error!(target: "receiver.signaling", error = %e, "Session create failed");
            self.release_port(port);
            if let Err(e) = self.artifacts.delete(&artifact) {
                warn!(target: "receiver.signaling", error = %e, "Failed to remove offer");
            }
            return;
        }

        let request = self.builder.receive_media(offer, user_id.clone());
        // Registered before sending so the response can never outrun it
        self.pending.put(request.id.clone(), user_id.clone());
        info!(
            target: "receiver.signaling",
            user_id = %user_id,
            port = port,
            request_id = %request.id,
            "Sending SDP offer"
        );
        self.send(&request);
        self.publish_gauges();
    }

    /// Tear a session down. Returns `false` if there was none.
    fn close_session(&mut self, user_id: &str) -> bool {
        let Some(session) = self.registry.remove(user_id) else {
            return false;
        };
        self.pending.forget_user(user_id);
        self.release_port(session.receiver_port());
        if let Err(e) = self.artifacts.delete(session.offer_artifact()) {
            warn!(
                target: "receiver.signaling",
                user_id = %user_id,
                error = %e,
                "Failed to remove offer"
            );
        }
        self.events.on_session_left(&session);
        self.publish_gauges();
        true
    }

    /// Give freed ports to queued presenters.
    fn admit_waiting(&mut self) {
        while self.phase == Phase::InRoom && self.pool.available() > 0 {
            let Some(next) = self.waiting.pop_front() else {
                break;
            };
            info!(
                target: "receiver.signaling",
                user_id = %next.user_id,
                "Port freed, admitting queued presenter"
            );
            self.open_session(next);
        }
    }

    /// Tear down every session and forget all pending state.
    fn drain_sessions(&mut self, why: &str) {
        let drained = self.registry.clear(&mut self.pool);
        let dropped_requests = self.pending.len();
        self.pending.clear();
        let dropped_waiting = self.waiting.len();
        self.waiting.clear();

        if drained.is_empty() && dropped_requests == 0 && dropped_waiting == 0 {
            return;
        }

        info!(
            target: "receiver.signaling",
            sessions = drained.len(),
            pending = dropped_requests,
            waiting = dropped_waiting,
            reason = why,
            "Dropping session state"
        );
        for session in &drained {
            if let Err(e) = self.artifacts.delete(session.offer_artifact()) {
                warn!(
                    target: "receiver.signaling",
                    user_id = %session.user_id(),
                    error = %e,
                    "Failed to remove offer"
                );
            }
            self.events.on_session_left(session);
        }
        self.publish_gauges();
    }

    fn release_port(&mut self, port: u16) {
        if let Err(e) = self.pool.release(port) {
            error!(target: "receiver.signaling", port = port, error = %e, "Port release failed");
        }
    }

    fn expect_phase(&self, expected: Phase, message_type: &'static str) -> bool {
        if self.phase == expected {
            return true;
        }
        warn!(
            target: "receiver.signaling",
            message_type = message_type,
            phase = ?self.phase,
            "Unexpected message for phase, ignoring"
        );
        false
    }

    fn reject(&mut self, stage: ProtocolStage, message: String) -> Outcome {
        error!(
            target: "receiver.signaling",
            stage = stage.as_str(),
            error = %message,
            "Server rejected request"
        );
        observability::record_protocol_error(stage.as_str());
        self.phase = Phase::Closed;
        Outcome::Terminate(TerminalReason::ProtocolRejected { stage, message })
    }

    /// Send a ping if the channel is up.
    pub fn send_ping(&mut self) {
        if self.phase != Phase::Closed && self.transport.is_open() {
            debug!(target: "receiver.signaling", "Sending ping");
            let ping = self.builder.ping();
            self.send(&ping);
        }
    }

    /// Send `logout` if the channel is up.
    pub fn logout(&mut self) {
        if self.transport.is_open() {
            info!(target: "receiver.signaling", "Logging out");
            let logout = self.builder.logout();
            self.send(&logout);
        }
    }

    /// Close the channel for good and tear everything down. Returns whether
    /// the channel was open.
    pub fn close_channel(&mut self) -> bool {
        self.phase = Phase::Closed;
        let was_open = self.transport.is_open();
        info!(target: "receiver.signaling", "Closing signaling channel");
        self.transport.close();
        self.drain_sessions("client closing");
        was_open
    }

    /// Send one message. Failures are only logged; a failed send means the
    /// channel is going down and a `Closed` event follows.
    fn send(&mut self, message: &OutboundMessage) {
        let result = message
            .to_json()
            .and_then(|text| self.transport.send(text));
        match result {
            Ok(()) => observability::record_message_sent(message.message_type()),
            Err(e) if e.is_recoverable() => warn!(
                target: "receiver.signaling",
                message_type = message.message_type(),
                error = %e,
                "Send failed"
            ),
            Err(e) => error!(
                target: "receiver.signaling",
                message_type = message.message_type(),
                error = %e,
                "Send failed"
            ),
        }
    }

    fn publish_gauges(&self) {
        observability::set_sessions_active(self.registry.len());
        observability::set_ports_available(self.pool.available());
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::artifacts::ArtifactHandle;
    use crate::errors::ReceiverError;
    use crate::session::StreamingSession;
    use secrecy::SecretString;
    use serde_json::Value;
    use std::path::PathBuf;

    #[derive(Debug, Default)]
    struct FakeTransport {
        open: bool,
        sent: Vec<Value>,
        closes: usize,
    }

    impl Transport for FakeTransport {
        fn connect(&mut self) {
            self.open = true;
        }
        fn send(&mut self, text: String) -> Result<(), ReceiverError> {
            if !self.open {
                return Err(ReceiverError::Transport("closed".to_string()));
            }
            self.sent.push(serde_json::from_str(&text).unwrap());
            Ok(())
        }
        fn close(&mut self) {
            self.open = false;
            self.closes += 1;
        }
        fn is_open(&self) -> bool {
            self.open
        }
        fn reconnect(&mut self) {
            self.open = true;
        }
    }

    #[derive(Debug, Default)]
    struct FakeSink {
        files: Vec<String>,
        fail_writes: bool,
    }

    impl ArtifactSink for FakeSink {
        fn write(&mut self, _content: &str, key: &str) -> Result<ArtifactHandle, ReceiverError> {
            if self.fail_writes {
                return Err(ReceiverError::Artifact("disk full".to_string()));
            }
            self.files.push(key.to_string());
            Ok(ArtifactHandle::new(PathBuf::from(format!("{key}.sdp"))))
        }
        fn delete(&mut self, handle: &ArtifactHandle) -> Result<(), ReceiverError> {
            let key = handle.path().display().to_string().replace(".sdp", "");
            self.files.retain(|f| *f != key);
            Ok(())
        }
    }

    #[derive(Debug, Default)]
    struct FakeEvents {
        joined: Vec<String>,
        left: Vec<(String, u16)>,
    }

    impl SessionEvents for FakeEvents {
        fn on_session_joined(&mut self, session: &StreamingSession) {
            self.joined.push(session.user_id().to_string());
        }
        fn on_session_left(&mut self, session: &StreamingSession) {
            self.left
                .push((session.user_id().to_string(), session.receiver_port()));
        }
    }

    type Machine = SignalingMachine<FakeTransport, FakeSink, FakeEvents>;

    fn machine(ports: &[u16]) -> Machine {
        let mut machine = SignalingMachine::new(
            MessageBuilder::new(
                "listener".to_string(),
                SecretString::from("key"),
                "PRO".to_string(),
            ),
            OfferSource::new("10.0.0.5".to_string(), None),
            ports,
            FakeTransport::default(),
            FakeSink::default(),
            FakeEvents::default(),
        );
        machine.connect();
        machine.on_open();
        machine
    }

    fn in_room(ports: &[u16], presenters: &[&str]) -> Machine {
        let mut machine = machine(ports);
        machine.handle_text(r#"{"id":"a","type":"authResponse"}"#);
        let roster: Vec<Value> = presenters
            .iter()
            .map(|id| serde_json::json!({"userId": id, "username": id}))
            .collect();
        let join = serde_json::json!({
            "id": "j",
            "type": "joinRoomResponse",
            "existingPresenters": roster,
        });
        assert_eq!(machine.handle_text(&join.to_string()), Outcome::Joined);
        machine
    }

    fn sent_of_type<'a>(machine: &'a Machine, kind: &str) -> Vec<&'a Value> {
        machine
            .transport()
            .sent
            .iter()
            .filter(|m| m["type"] == kind)
            .collect()
    }

    fn request_id_for(machine: &Machine, user_id: &str) -> String {
        sent_of_type(machine, "receiveMedia")
            .into_iter()
            .rev()
            .find(|m| m["userId"] == user_id)
            .map(|m| m["id"].as_str().unwrap().to_string())
            .unwrap()
    }

    fn answer(machine: &mut Machine, user_id: &str) -> Outcome {
        let id = request_id_for(machine, user_id);
        let text = serde_json::json!({
            "id": id,
            "type": "receiveMediaResponse",
            "sdpAnswer": "v=0 answer",
        });
        machine.handle_text(&text.to_string())
    }

    #[test]
    fn test_open_sends_auth() {
        let machine = machine(&[5004]);
        assert_eq!(machine.phase(), Phase::Authenticating);
        let auth = &machine.transport().sent[0];
        assert_eq!(auth["type"], "auth");
        assert_eq!(auth["role"], "listener");
        assert_eq!(auth["apikey"], "key");
    }

    #[test]
    fn test_auth_ok_sends_join_room() {
        let mut machine = machine(&[5004]);
        let outcome = machine.handle_text(r#"{"id":"a","type":"authResponse"}"#);

        assert_eq!(outcome, Outcome::Continue);
        assert_eq!(machine.phase(), Phase::Joining);
        let join = sent_of_type(&machine, "joinRoom");
        assert_eq!(join.len(), 1);
        assert_eq!(join[0]["room"], "PRO");
    }

    #[test]
    fn test_auth_error_is_terminal_without_join() {
        let mut machine = machine(&[5004]);
        let outcome =
            machine.handle_text(r#"{"id":"a","type":"authResponse","error":"invalid key"}"#);

        assert_eq!(
            outcome,
            Outcome::Terminate(TerminalReason::ProtocolRejected {
                stage: ProtocolStage::Auth,
                message: "invalid key".to_string(),
            })
        );
        assert_eq!(machine.phase(), Phase::Closed);
        assert!(sent_of_type(&machine, "joinRoom").is_empty());
    }

    #[test]
    fn test_join_error_is_terminal() {
        let mut machine = machine(&[5004]);
        machine.handle_text(r#"{"id":"a","type":"authResponse"}"#);
        let outcome =
            machine.handle_text(r#"{"id":"j","type":"joinRoomResponse","error":"no room"}"#);

        assert!(matches!(
            outcome,
            Outcome::Terminate(TerminalReason::ProtocolRejected {
                stage: ProtocolStage::Join,
                ..
            })
        ));
    }

    #[test]
    fn test_roster_negotiates_each_presenter() {
        let machine = in_room(&[5004, 5006, 5008], &["u1", "u2", "u3"]);

        let requests = sent_of_type(&machine, "receiveMedia");
        assert_eq!(requests.len(), 3);

        let mut ids: Vec<&str> = requests.iter().map(|m| m["id"].as_str().unwrap()).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 3);

        // LIFO pool: last configured port first
        assert_eq!(machine.registry().get("u1").unwrap().receiver_port(), 5008);
        assert_eq!(machine.registry().get("u2").unwrap().receiver_port(), 5006);
        assert_eq!(machine.registry().get("u3").unwrap().receiver_port(), 5004);
        assert!(requests[0]["sdpOffer"]
            .as_str()
            .unwrap()
            .contains("m=audio 5008 RTP/AVP 98"));
        assert_eq!(machine.pending().len(), 3);
    }

    #[test]
    fn test_answer_marks_session_joined() {
        let mut machine = in_room(&[5004], &["u1"]);
        assert_eq!(answer(&mut machine, "u1"), Outcome::Continue);

        let session = machine.registry().get("u1").unwrap();
        assert_eq!(session.sdp_answer(), Some("v=0 answer"));
        assert_eq!(machine.events().joined, vec!["u1".to_string()]);
        assert!(machine.pending().is_empty());

        // Replaying the same response is a correlator miss
        assert_eq!(answer(&mut machine, "u1"), Outcome::Continue);
        assert_eq!(machine.events().joined.len(), 1);
    }

    #[test]
    fn test_negotiation_error_is_terminal() {
        let mut machine = in_room(&[5004], &["u1"]);
        let id = request_id_for(&machine, "u1");
        let text = serde_json::json!({"id": id, "type": "receiveMediaResponse", "error": "codec"});

        assert!(matches!(
            machine.handle_text(&text.to_string()),
            Outcome::Terminate(TerminalReason::ProtocolRejected {
                stage: ProtocolStage::Negotiate,
                ..
            })
        ));
    }

    #[test]
    fn test_presenter_left_releases_its_port() {
        let mut machine = in_room(&[5004, 5006], &["u1", "u2"]);
        answer(&mut machine, "u1");
        let port = machine.registry().get("u2").unwrap().receiver_port();
        let available = machine.pool().available();

        machine.handle_text(r#"{"type":"presenterLeft","userId":"u2"}"#);

        assert!(machine.registry().get("u2").is_none());
        assert!(!machine.pool().is_leased(port));
        assert_eq!(machine.pool().available(), available + 1);
        assert!(!machine.pending().is_pending_for("u2"));
        assert_eq!(machine.events().left, vec![("u2".to_string(), port)]);
        assert_eq!(machine.artifacts().files, vec!["u1".to_string()]);

        // Second departure is a no-op
        machine.handle_text(r#"{"type":"presenterLeft","userId":"u2"}"#);
        assert_eq!(machine.pool().available(), available + 1);
        assert_eq!(machine.events().left.len(), 1);
    }

    #[test]
    fn test_exhaustion_queues_until_port_frees() {
        let mut machine = in_room(&[5004], &["u1", "u2"]);

        assert_eq!(machine.registry().len(), 1);
        let waiting: Vec<&str> = machine.waiting().map(|b| b.user_id.as_str()).collect();
        assert_eq!(waiting, vec!["u2"]);
        assert_eq!(sent_of_type(&machine, "receiveMedia").len(), 1);

        machine.handle_text(r#"{"type":"presenterLeft","userId":"u1"}"#);

        assert_eq!(machine.waiting().count(), 0);
        assert_eq!(machine.registry().get("u2").unwrap().receiver_port(), 5004);
        assert_eq!(sent_of_type(&machine, "receiveMedia").len(), 2);
    }

    #[test]
    fn test_waiting_presenter_can_leave() {
        let mut machine = in_room(&[5004], &["u1", "u2"]);
        machine.handle_text(r#"{"type":"presenterLeft","userId":"u2"}"#);

        assert_eq!(machine.waiting().count(), 0);
        assert!(machine.registry().contains("u1"));
        assert!(machine.events().left.is_empty());
    }

    #[test]
    fn test_duplicate_arrival_ignored() {
        let mut machine = in_room(&[5004, 5006], &["u1"]);
        machine.handle_text(r#"{"type":"newPresenterArrived","user":{"userId":"u1"}}"#);

        assert_eq!(machine.registry().len(), 1);
        assert_eq!(machine.pool().leased(), 1);
        assert_eq!(sent_of_type(&machine, "receiveMedia").len(), 1);
    }

    #[test]
    fn test_artifact_failure_returns_lease() {
        let mut machine = in_room(&[5004, 5006], &[]);
        machine.artifacts.fail_writes = true;

        machine.handle_text(r#"{"type":"newPresenterArrived","user":{"userId":"u1"}}"#);

        assert!(machine.registry().is_empty());
        assert_eq!(machine.pool().available(), 2);
        assert!(machine.pending().is_empty());
        assert!(sent_of_type(&machine, "receiveMedia").is_empty());
    }

    #[test]
    fn test_media_override_is_terminal() {
        let mut machine = in_room(&[5004], &["u1"]);
        assert_eq!(
            machine.handle_text(r#"{"type":"mediaOverride"}"#),
            Outcome::Terminate(TerminalReason::SessionOverridden)
        );
    }

    #[test]
    fn test_out_of_phase_messages_ignored() {
        let mut machine = machine(&[5004]);

        // Roster before auth completes
        let outcome = machine.handle_text(
            r#"{"type":"joinRoomResponse","existingPresenters":[{"userId":"u1"}]}"#,
        );
        assert_eq!(outcome, Outcome::Continue);
        assert_eq!(machine.phase(), Phase::Authenticating);
        assert!(machine.registry().is_empty());

        machine.handle_text(r#"{"type":"newPresenterArrived","user":{"userId":"u2"}}"#);
        assert!(machine.registry().is_empty());
    }

    #[test]
    fn test_malformed_and_unknown_ignored() {
        let mut machine = in_room(&[5004], &[]);
        assert_eq!(machine.handle_text("{not json"), Outcome::Continue);
        assert_eq!(machine.handle_text(r#"{"type":"iceCandidate"}"#), Outcome::Continue);
        assert_eq!(machine.handle_text(r#"{"type":"pingResponse"}"#), Outcome::Continue);
        assert_eq!(machine.phase(), Phase::InRoom);
    }

    #[test]
    fn test_reopen_drains_everything() {
        let mut machine = in_room(&[5004], &["u1", "u2"]);
        answer(&mut machine, "u1");

        machine.on_close();
        assert_eq!(machine.phase(), Phase::Idle);
        assert!(machine.registry().is_empty());
        assert!(machine.pending().is_empty());
        assert_eq!(machine.waiting().count(), 0);
        assert_eq!(machine.pool().available(), 1);
        assert!(machine.artifacts().files.is_empty());
        assert_eq!(machine.events().left, vec![("u1".to_string(), 5004)]);

        machine.reconnect();
        machine.on_open();
        assert_eq!(machine.phase(), Phase::Authenticating);
        assert_eq!(sent_of_type(&machine, "auth").len(), 2);
    }

    #[test]
    fn test_close_channel_and_logout() {
        let mut machine = in_room(&[5004], &["u1"]);
        machine.send_ping();
        machine.logout();
        assert!(machine.close_channel());

        assert_eq!(sent_of_type(&machine, "ping").len(), 1);
        assert_eq!(sent_of_type(&machine, "logout").len(), 1);
        assert_eq!(machine.transport().closes, 1);
        assert!(machine.registry().is_empty());
        assert_eq!(machine.phase(), Phase::Closed);

        // Nothing goes out once closed
        machine.send_ping();
        assert!(!machine.close_channel());
        assert_eq!(sent_of_type(&machine, "ping").len(), 1);
    }

    #[test]
    fn test_failed_send_keeps_session_state() {
        let mut machine = in_room(&[5004, 5006], &[]);
        // Socket gone, Closed not yet delivered
        machine.transport.open = false;

        machine.handle_text(r#"{"type":"newPresenterArrived","user":{"userId":"u1"}}"#);

        assert!(sent_of_type(&machine, "receiveMedia").is_empty());
        assert!(machine.registry().contains("u1"));
        assert!(machine.pending().is_pending_for("u1"));
        assert_eq!(machine.pool().available(), 1);
        assert_eq!(machine.phase(), Phase::InRoom);

        // The Closed that follows clears it all
        machine.on_close();
        assert!(machine.registry().is_empty());
        assert!(machine.pending().is_empty());
        assert_eq!(machine.pool().available(), 2);
    }
}
