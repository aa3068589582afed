//! Error types.
//!
//! Library-level failures are typed here; `main` and the configuration
//! layer wrap them in `anyhow` with context for the user.

use std::path::PathBuf;
use thiserror::Error;

use crate::models::EvaluationStatus;

/// Errors from the GradEx REST API.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ApiError {
    #[error("request to {endpoint} timed out after {seconds}s")]
    Timeout { endpoint: String, seconds: u64 },
    #[error("cannot connect to GradEx API at {0}. Is the server running?")]
    Connect(String),
    #[error("{endpoint} returned status {status}: {body}")]
    Status {
        endpoint: String,
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

/// Errors from a WebSocket channel.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TransportError {
    #[error("could not open WebSocket to {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: tokio_tungstenite::tungstenite::Error,
    },
    #[error(transparent)]
    Socket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Conditions that reject an evaluation before any channel is opened.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PreconditionError {
    #[error("No file selected: {0}")]
    MissingFile(PathBuf),
    #[error("Unsupported file type (expected .pdf or .docx): {0}")]
    UnsupportedFile(PathBuf),
    #[error("No rubric selected")]
    EmptyRubric,
}

/// An inbound frame that could not be decoded.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("malformed `{kind}` payload: {source}")]
    Payload {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
}

/// A well-formed event that cannot be folded into the current snapshot.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolViolation {
    #[error("`{event}` references criterion {criterion:?} that was never started")]
    UnknownCriterion { event: &'static str, criterion: String },
    #[error("`{event}` arrived after the run became {status}")]
    AfterTerminal {
        event: &'static str,
        status: EvaluationStatus,
    },
    #[error("unknown event type {0:?}")]
    UnknownEvent(String),
}

/// Errors from staff score editing.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EditError {
    #[error("no evaluated user with id {0}")]
    UnknownUser(i64),
    #[error("user {user_id} has no score for dimension {dimension:?}")]
    UnknownDimension { user_id: i64, dimension: String },
    #[error("invalid score edit {0:?} (expected USER:DIMENSION=SCORE)")]
    Malformed(String),
}
