//! Caller-facing notifications.
//!
//! All three callbacks of [`TranslationHandler`] run on the client's
//! orchestration task, one at a time, in the order the events happened.

use thiserror::Error;

use crate::protocol::{ChannelError, TranscriptionEvent};
use crate::session::SessionError;

use super::state::ConnectionState;

/// Code attached to every error reported to the caller.
pub const CLIENT_ERROR_CODE: u16 = 500;

/// An error reported through [`TranslationHandler::on_error`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {message}")]
pub struct ClientError {
    pub code: u16,
    pub message: String,
}

impl ClientError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: CLIENT_ERROR_CODE,
            message: message.into(),
        }
    }
}

impl From<SessionError> for ClientError {
    fn from(e: SessionError) -> Self {
        ClientError::new(e.to_string())
    }
}

impl From<ChannelError> for ClientError {
    fn from(e: ChannelError) -> Self {
        ClientError::new(e.to_string())
    }
}

/// One caller-facing event, queued for the orchestration task.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    ConnectionState(ConnectionState),
    Transcription(TranscriptionEvent),
    Error(ClientError),
}

/// Receives client events.  Every method defaults to doing nothing.
pub trait TranslationHandler: Send + Sync {
    fn on_connection_state(&self, _state: ConnectionState) {}

    fn on_transcription(&self, _event: &TranscriptionEvent) {}

    fn on_error(&self, _error: &ClientError) {}
}

/// Handler used until the caller installs one.
#[derive(Debug, Default)]
pub struct NoopHandler;

impl TranslationHandler for NoopHandler {}

/// Invoke the matching callback on `handler`.
pub(crate) fn dispatch(handler: &dyn TranslationHandler, notification: &Notification) {
    match notification {
        Notification::ConnectionState(state) => handler.on_connection_state(*state),
        Notification::Transcription(event) => handler.on_transcription(event),
        Notification::Error(error) => handler.on_error(error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Seen(Mutex<Vec<String>>);

    impl TranslationHandler for Seen {
        fn on_connection_state(&self, state: ConnectionState) {
            self.0.lock().unwrap().push(format!("state:{state}"));
        }
        fn on_error(&self, error: &ClientError) {
            self.0.lock().unwrap().push(format!("error:{error}"));
        }
    }

    #[test]
    fn session_errors_become_code_500() {
        let err = ClientError::from(SessionError::Status(401));
        assert_eq!(err.code, 500);
        assert_eq!(err.message, "session_http_error_401");
        assert_eq!(err.to_string(), "500: session_http_error_401");
    }

    #[test]
    fn dispatch_routes_to_callbacks() {
        let seen = Seen::default();
        dispatch(&seen, &Notification::ConnectionState(ConnectionState::Connected));
        dispatch(&seen, &Notification::Error(ClientError::new("boom")));
        // Defaulted callback is a no-op.
        dispatch(
            &seen,
            &Notification::Transcription(TranscriptionEvent {
                text: "hi".into(),
                language_code: "en".into(),
                is_final: true,
            }),
        );
        assert_eq!(
            *seen.0.lock().unwrap(),
            vec!["state:connected", "error:500: boom"]
        );
    }

    #[test]
    fn noop_handler_accepts_everything() {
        let handler = NoopHandler;
        dispatch(&handler, &Notification::Error(ClientError::new("ignored")));
    }
}
