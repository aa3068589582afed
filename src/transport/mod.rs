//! Network collaborators: the GradEx REST API and the WebSocket channels.
//!
//! Both WebSocket channels deliver into one ordered inbox of [`Inbound`]
//! messages, which the runner drains one at a time.

pub mod client;
pub mod ws;

pub use client::ApiClient;
pub use ws::{open_notifications, open_stream, NotificationHandle, StreamHandle};

use crate::stream::EvaluationEvent;

/// Message delivered to the runner's inbox.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Something happened on the main (or resumed) stream opened as
    /// `generation`. Messages from older generations are stale.
    Stream {
        generation: u64,
        event: TransportEvent,
    },
    /// The notification channel asked to resume under this id.
    Reconnect(String),
    /// The notification channel is gone for good.
    NotificationsClosed,
}

/// What a stream channel reports.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The channel is open and the initial message, if any, was sent.
    Opened,
    Frame(EvaluationEvent),
    /// Closed by the peer or dropped after a successful connect.
    Closed,
    /// Could not connect, or failed in a way that is not a plain close.
    Failed(String),
}

/// URLs of every endpoint under one API base.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    api: String,
    ws: String,
}

impl Endpoints {
    /// `api_url` is the HTTP base, e.g. `http://localhost:8006/dissertation`.
    pub fn new(api_url: &str) -> Self {
        let api = api_url.trim_end_matches('/').to_string();
        let ws = if let Some(rest) = api.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = api.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            api.clone()
        };
        Self { api, ws }
    }

    pub fn api_base(&self) -> &str {
        &self.api
    }

    pub fn analysis_stream(&self) -> String {
        format!("{}/api/ws/dissertation_analysis", self.ws)
    }

    pub fn resume_stream(&self, session_id: &str) -> String {
        let base = format!("{}/api/ws/dissertation_analysis_reconnect", self.ws);
        match reqwest::Url::parse_with_params(&base, &[("session_id", session_id)]) {
            Ok(url) => url.to_string(),
            Err(_) => format!("{}?session_id={}", base, session_id),
        }
    }

    pub fn notifications(&self) -> String {
        format!("{}/api/ws/notifications", self.ws)
    }

    pub fn extract(&self) -> String {
        format!("{}/api/extract_text_from_file_and_analyze_images", self.api)
    }

    pub fn pre_analyze(&self) -> String {
        format!("{}/api/pre_analyze", self.api)
    }

    pub fn post_user_data(&self) -> String {
        format!("{}/api/postUserData", self.api)
    }

    pub fn scope_extraction(&self) -> String {
        format!("{}/api/scope_extraction", self.api)
    }

    pub fn scoped_feedback(&self) -> String {
        format!("{}/api/generate_scoped_feedback", self.api)
    }

    pub fn rubrics(&self) -> String {
        format!("{}/api/rubrics", self.api)
    }

    pub fn rubric(&self, id: i64) -> String {
        format!("{}/api/rubrics/{}", self.api, id)
    }

    pub fn batch_input(&self) -> String {
        format!("{}/api/batch_input", self.api)
    }

    pub fn users(&self) -> String {
        format!("{}/api/users", self.api)
    }

    pub fn user_scores(&self, user_id: i64) -> String {
        format!("{}/api/users/{}/scores", self.api, user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ws_scheme_follows_http_scheme() {
        let plain = Endpoints::new("http://localhost:8006/dissertation/");
        assert_eq!(
            plain.analysis_stream(),
            "ws://localhost:8006/dissertation/api/ws/dissertation_analysis"
        );
        assert_eq!(
            plain.notifications(),
            "ws://localhost:8006/dissertation/api/ws/notifications"
        );
        assert_eq!(
            plain.extract(),
            "http://localhost:8006/dissertation/api/extract_text_from_file_and_analyze_images"
        );

        let secure = Endpoints::new("https://gradex.example.org/dissertation");
        assert!(secure.analysis_stream().starts_with("wss://gradex.example.org/"));
        assert_eq!(secure.api_base(), "https://gradex.example.org/dissertation");
    }

    #[test]
    fn test_resume_url_encodes_id() {
        let endpoints = Endpoints::new("http://localhost:8006/dissertation");
        assert_eq!(
            endpoints.resume_stream("abc-123"),
            "ws://localhost:8006/dissertation/api/ws/dissertation_analysis_reconnect?session_id=abc-123"
        );
        assert!(endpoints.resume_stream("a b&c").ends_with("session_id=a+b%26c"));
    }

    #[test]
    fn test_rest_paths() {
        let endpoints = Endpoints::new("http://h/d");
        assert_eq!(endpoints.user_scores(9), "http://h/d/api/users/9/scores");
        assert_eq!(endpoints.rubric(2), "http://h/d/api/rubrics/2");
        assert_eq!(endpoints.post_user_data(), "http://h/d/api/postUserData");
    }
}
