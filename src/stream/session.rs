//! Session identity and the reconnect state machine.

use chrono::Utc;
use serde::Serialize;
use std::fmt;
use tracing::debug;
use uuid::Uuid;

use crate::models::EvaluationStatus;

/// Client-generated id correlating a run with reconnect notifications.
///
/// Created once per client session and passed explicitly to everything
/// that needs it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Generates `session-<9 random chars>-<unix millis>`.
    pub fn generate() -> Self {
        let random = Uuid::new_v4().simple().to_string();
        Self(format!(
            "session-{}-{}",
            &random[..9],
            Utc::now().timestamp_millis()
        ))
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for SessionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Connection state of the main stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No stream opened for the current run.
    #[default]
    Idle,
    Connected,
    /// Closed before the run finished; waiting for a reconnect notification.
    Disconnected,
}

/// Tracks whether a reconnect notification may resume the current run.
#[derive(Debug, Clone, Default)]
pub struct ReconnectWatch {
    state: ConnectionState,
    resume_id: Option<String>,
}

impl ReconnectWatch {
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Id the server gave the queued run, if any.
    pub fn resume_id(&self) -> Option<&str> {
        self.resume_id.as_deref()
    }

    /// Forgets the previous run.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn connected(&mut self) {
        self.state = ConnectionState::Connected;
    }

    /// Records an unexpected close. Closes after a terminal status are
    /// normal and leave the state untouched.
    pub fn disconnected(&mut self, status: EvaluationStatus) {
        if !status.is_terminal() {
            self.state = ConnectionState::Disconnected;
        }
    }

    /// Remembers the id a queued run can be resumed under.
    pub fn arm(&mut self, id: &str) {
        self.resume_id = Some(id.to_string());
    }

    /// Decides whether a reconnect notification for `id` resumes the run.
    ///
    /// Only a disconnected, unfinished run is resumed.
    pub fn accept_reconnect(&mut self, id: &str, status: EvaluationStatus) -> bool {
        if status.is_terminal() || status == EvaluationStatus::Idle {
            return false;
        }
        if self.state != ConnectionState::Disconnected {
            debug!("Ignoring reconnect for {}: stream is {:?}", id, self.state);
            return false;
        }
        if let Some(armed) = self.resume_id.as_deref() {
            if armed != id {
                debug!("Reconnect id {} differs from queued id {}", id, armed);
            }
        }
        self.resume_id = Some(id.to_string());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_format() {
        let id = SessionId::generate();
        let parts: Vec<_> = id.as_str().splitn(3, '-').collect();
        assert_eq!(parts[0], "session");
        assert_eq!(parts[1].len(), 9);
        assert!(parts[2].parse::<i64>().is_ok());
        assert_ne!(SessionId::generate(), id);
    }

    #[test]
    fn test_reconnect_only_when_disconnected() {
        let mut watch = ReconnectWatch::default();
        assert!(!watch.accept_reconnect("s", EvaluationStatus::Analyzing));

        watch.connected();
        assert!(!watch.accept_reconnect("s", EvaluationStatus::Analyzing));

        watch.disconnected(EvaluationStatus::Analyzing);
        assert_eq!(watch.state(), ConnectionState::Disconnected);
        assert!(watch.accept_reconnect("s", EvaluationStatus::Analyzing));
        assert_eq!(watch.resume_id(), Some("s"));
    }

    #[test]
    fn test_terminal_runs_are_not_resumed() {
        let mut watch = ReconnectWatch::default();
        watch.connected();
        watch.disconnected(EvaluationStatus::Complete);
        assert_eq!(watch.state(), ConnectionState::Connected);

        watch.disconnected(EvaluationStatus::Analyzing);
        assert!(!watch.accept_reconnect("s", EvaluationStatus::Failed));
        assert!(!watch.accept_reconnect("s", EvaluationStatus::Idle));
    }

    #[test]
    fn test_reset_forgets_run() {
        let mut watch = ReconnectWatch::default();
        watch.arm("q-1");
        watch.connected();
        watch.reset();
        assert_eq!(watch.state(), ConnectionState::Idle);
        assert_eq!(watch.resume_id(), None);
    }
}
