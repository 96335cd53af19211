//! Session management.

use std::time::Instant;
use uuid::Uuid;

/// Dispatcher state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for the next message.
    Listening,
    /// Handling a message.
    Dispatching,
    /// The loop has exited; no further messages are read.
    Terminated,
}

/// The single session a pod serves over its standard streams.
#[derive(Debug)]
pub struct Session {
    /// Unique session ID, attached to log lines.
    pub id: String,

    state: SessionState,

    /// Messages decoded and dispatched.
    request_count: u64,

    /// Exception responses sent.
    error_count: u64,

    created_at: Instant,
}

impl Session {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            state: SessionState::Listening,
            request_count: 0,
            error_count: 0,
            created_at: Instant::now(),
        }
    }

    /// Returns the session state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Sets the session state. A terminated session stays terminated.
    pub fn set_state(&mut self, state: SessionState) {
        if self.state != SessionState::Terminated {
            self.state = state;
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.state == SessionState::Terminated
    }

    /// Records a dispatched message.
    pub fn record_request(&mut self) {
        self.request_count += 1;
    }

    /// Records an exception response.
    pub fn record_error(&mut self) {
        self.error_count += 1;
    }

    pub fn request_count(&self) -> u64 {
        self.request_count
    }

    pub fn error_count(&self) -> u64 {
        self.error_count
    }

    /// Returns the session age.
    pub fn age(&self) -> std::time::Duration {
        self.created_at.elapsed()
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_creation() {
        let session = Session::new();
        assert_eq!(session.state(), SessionState::Listening);
        assert_eq!(session.request_count(), 0);
        assert_eq!(session.error_count(), 0);
        assert!(Uuid::parse_str(&session.id).is_ok());
        assert_ne!(session.id, Session::new().id);
    }

    #[test]
    fn test_counters() {
        let mut session = Session::new();
        session.record_request();
        session.record_request();
        session.record_error();
        assert_eq!(session.request_count(), 2);
        assert_eq!(session.error_count(), 1);
    }

    #[test]
    fn test_terminated_is_final() {
        let mut session = Session::new();
        session.set_state(SessionState::Dispatching);
        assert_eq!(session.state(), SessionState::Dispatching);

        session.set_state(SessionState::Terminated);
        session.set_state(SessionState::Listening);
        assert!(session.is_terminated());
    }
}
