//! Session lifecycle notifications.

use crate::session::StreamingSession;
use tracing::info;

/// Receives session-joined and session-left notifications.
///
/// Called from the dispatch task; implementations must not block for long.
pub trait SessionEvents {
    /// A session's answer arrived and media can start flowing.
    fn on_session_joined(&mut self, session: &StreamingSession);

    /// A session was torn down. Its port has already been returned.
    fn on_session_left(&mut self, session: &StreamingSession);
}

/// Session events that only log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingSessionEvents;

impl SessionEvents for LoggingSessionEvents {
    fn on_session_joined(&mut self, session: &StreamingSession) {
        info!(
            target: "receiver.session",
            user_id = %session.user_id(),
            username = %session.broadcaster().username,
            port = session.receiver_port(),
            offer = %session.offer_artifact().path().display(),
            "Session joined"
        );
    }

    fn on_session_left(&mut self, session: &StreamingSession) {
        info!(
            target: "receiver.session",
            user_id = %session.user_id(),
            port = session.receiver_port(),
            negotiated = session.is_negotiated(),
            session_secs = session.age_secs(),
            "Session left"
        );
    }
}

/// Either a recorder or the log-only fallback, chosen at startup.
impl<T: SessionEvents + ?Sized> SessionEvents for Box<T> {
    fn on_session_joined(&mut self, session: &StreamingSession) {
        (**self).on_session_joined(session);
    }

    fn on_session_left(&mut self, session: &StreamingSession) {
        (**self).on_session_left(session);
    }
}
