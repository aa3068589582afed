//! Wire events of the evaluation stream.
//!
//! Every inbound frame is a JSON object `{ "type": ..., "data": {...} }`.
//! Frames are decoded into [`EvaluationEvent`], a closed tagged union, so
//! the fold can match on every variant explicitly. Unknown tags decode to
//! [`EvaluationEvent::Unknown`] instead of failing.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::FrameError;
use crate::models::{PreAnalysis, SubjectMetadata};

/// Payload of a `queue_status` frame.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct QueueStatus {
    #[serde(default)]
    pub message: Option<String>,
    /// Id under which the queued request can be resumed.
    #[serde(default, alias = "sessionId")]
    pub session_id: Option<String>,
    #[serde(default, alias = "queue_position")]
    pub position: Option<u32>,
}

/// Payload of the terminal `complete` frame. The fold only uses the tag.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CompletionSummary {
    #[serde(default)]
    pub total_score: Option<f64>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub degree: Option<String>,
    #[serde(default)]
    pub topic: Option<String>,
}

/// One decoded event of the evaluation stream.
#[derive(Debug, Clone, PartialEq)]
pub enum EvaluationEvent {
    QueueStatus(QueueStatus),
    Metadata(SubjectMetadata),
    CriterionStart { criterion: String },
    AnalysisChunk { criterion: String, chunk: String },
    CriterionComplete { criterion: String, score: u32 },
    Complete(CompletionSummary),
    Error { message: String },
    /// A tag this client does not know.
    Unknown(String),
}

#[derive(Deserialize)]
struct RawFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

#[derive(Deserialize)]
struct CriterionRef {
    criterion: String,
}

#[derive(Deserialize)]
struct ChunkPayload {
    criterion: String,
    #[serde(default)]
    chunk: String,
}

#[derive(Deserialize)]
struct ScorePayload {
    criterion: String,
    #[serde(default)]
    score: Option<f64>,
}

#[derive(Deserialize)]
struct ErrorPayload {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    criterion: Option<String>,
}

impl EvaluationEvent {
    /// Decodes one text frame.
    pub fn decode(text: &str) -> Result<Self, FrameError> {
        let frame: RawFrame = serde_json::from_str(text)?;
        Self::from_parts(frame.kind, frame.data)
    }

    fn from_parts(kind: String, data: Value) -> Result<Self, FrameError> {
        // `{}` and a missing `data` are equivalent
        let data = if data.is_null() { json!({}) } else { data };
        let payload = |e| FrameError::Payload {
            kind: kind.clone(),
            source: e,
        };

        let event = match kind.as_str() {
            "queue_status" => {
                EvaluationEvent::QueueStatus(serde_json::from_value(data).map_err(payload)?)
            }
            "metadata" => EvaluationEvent::Metadata(serde_json::from_value(data).map_err(payload)?),
            "criterion_start" => {
                let r: CriterionRef = serde_json::from_value(data).map_err(payload)?;
                EvaluationEvent::CriterionStart {
                    criterion: r.criterion,
                }
            }
            "analysis_chunk" => {
                let c: ChunkPayload = serde_json::from_value(data).map_err(payload)?;
                EvaluationEvent::AnalysisChunk {
                    criterion: c.criterion,
                    chunk: c.chunk,
                }
            }
            "criterion_complete" => {
                let s: ScorePayload = serde_json::from_value(data).map_err(payload)?;
                EvaluationEvent::CriterionComplete {
                    criterion: s.criterion,
                    score: score_from_wire(s.score.unwrap_or(0.0)),
                }
            }
            "complete" => EvaluationEvent::Complete(
                serde_json::from_value(data).unwrap_or_default(),
            ),
            "error" => {
                let e: ErrorPayload = serde_json::from_value(data).map_err(payload)?;
                let message = e
                    .message
                    .unwrap_or_else(|| "The evaluation service reported an error".to_string());
                EvaluationEvent::Error {
                    message: match e.criterion {
                        Some(criterion) => format!("{} (criterion: {})", message, criterion),
                        None => message,
                    },
                }
            }
            _ => EvaluationEvent::Unknown(kind.clone()),
        };

        Ok(event)
    }

    /// The wire tag of this event.
    pub fn kind(&self) -> &'static str {
        match self {
            EvaluationEvent::QueueStatus(_) => "queue_status",
            EvaluationEvent::Metadata(_) => "metadata",
            EvaluationEvent::CriterionStart { .. } => "criterion_start",
            EvaluationEvent::AnalysisChunk { .. } => "analysis_chunk",
            EvaluationEvent::CriterionComplete { .. } => "criterion_complete",
            EvaluationEvent::Complete(_) => "complete",
            EvaluationEvent::Error { .. } => "error",
            EvaluationEvent::Unknown(_) => "unknown",
        }
    }

    /// Encodes the event as a wire frame.
    #[cfg(test)]
    pub fn to_frame(&self) -> Value {
        match self {
            EvaluationEvent::QueueStatus(q) => json!({
                "type": "queue_status",
                "data": { "message": q.message, "session_id": q.session_id },
            }),
            EvaluationEvent::Metadata(m) => json!({
                "type": "metadata",
                "data": { "name": m.name, "degree": m.degree, "topic": m.topic },
            }),
            EvaluationEvent::CriterionStart { criterion } => json!({
                "type": "criterion_start",
                "data": { "criterion": criterion },
            }),
            EvaluationEvent::AnalysisChunk { criterion, chunk } => json!({
                "type": "analysis_chunk",
                "data": { "criterion": criterion, "chunk": chunk },
            }),
            EvaluationEvent::CriterionComplete { criterion, score } => json!({
                "type": "criterion_complete",
                "data": { "criterion": criterion, "score": score },
            }),
            EvaluationEvent::Complete(_) => json!({ "type": "complete", "data": {} }),
            EvaluationEvent::Error { message } => json!({
                "type": "error",
                "data": { "message": message },
            }),
            EvaluationEvent::Unknown(kind) => json!({ "type": kind, "data": {} }),
        }
    }
}

/// Highest per-criterion score accepted from the wire.
pub const MAX_WIRE_SCORE: u32 = 10_000;

/// Rounds a wire score to the nearest integer. Negative or non-finite
/// values become 0; larger values are capped at [`MAX_WIRE_SCORE`].
pub fn score_from_wire(score: f64) -> u32 {
    if !score.is_finite() || score <= 0.0 {
        0
    } else {
        score.round().min(MAX_WIRE_SCORE as f64) as u32
    }
}

/// The single message sent when the main stream opens.
#[derive(Debug, Clone, Serialize)]
pub struct OutboundPayload {
    pub pre_analysis: PreAnalysis,
    pub rubric: Value,
    pub feedback: String,
}

/// A message on the notification channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// Resume the run queued or dropped under this id.
    Reconnect(String),
    Other,
}

#[derive(Deserialize)]
struct RawNotification {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    session_id: Option<String>,
}

impl Notification {
    pub fn decode(text: &str) -> Result<Self, FrameError> {
        let raw: RawNotification = serde_json::from_str(text)?;
        Ok(match (raw.kind.as_str(), raw.session_id) {
            ("reconnect", Some(id)) if !id.is_empty() => Notification::Reconnect(id),
            _ => Notification::Other,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_chunk() {
        let event = EvaluationEvent::decode(
            r#"{"type":"analysis_chunk","data":{"criterion":"Rigor","chunk":"Good "}}"#,
        )
        .unwrap();
        assert_eq!(
            event,
            EvaluationEvent::AnalysisChunk {
                criterion: "Rigor".to_string(),
                chunk: "Good ".to_string()
            }
        );
        assert_eq!(event.kind(), "analysis_chunk");
    }

    #[test]
    fn test_decode_fractional_score() {
        let event = EvaluationEvent::decode(
            r#"{"type":"criterion_complete","data":{"criterion":"A","score":3.6}}"#,
        )
        .unwrap();
        assert_eq!(
            event,
            EvaluationEvent::CriterionComplete {
                criterion: "A".to_string(),
                score: 4
            }
        );
    }

    #[test]
    fn test_score_from_wire() {
        assert_eq!(score_from_wire(4.0), 4);
        assert_eq!(score_from_wire(2.5), 3);
        assert_eq!(score_from_wire(2.4), 2);
        assert_eq!(score_from_wire(-1.0), 0);
        assert_eq!(score_from_wire(f64::NAN), 0);
        assert_eq!(score_from_wire(3e9), MAX_WIRE_SCORE);
        assert_eq!(score_from_wire(f64::INFINITY), 0);
    }

    #[test]
    fn test_decode_queue_status() {
        let event = EvaluationEvent::decode(
            r#"{"type":"queue_status","data":{"message":"Your request has been queued.","session_id":"abc"}}"#,
        )
        .unwrap();
        match event {
            EvaluationEvent::QueueStatus(q) => {
                assert_eq!(q.session_id.as_deref(), Some("abc"));
                assert_eq!(q.position, None);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_decode_complete_without_data() {
        let event = EvaluationEvent::decode(r#"{"type":"complete"}"#).unwrap();
        assert!(matches!(event, EvaluationEvent::Complete(_)));

        let event = EvaluationEvent::decode(
            r#"{"type":"complete","data":{"criteria_evaluations":{},"total_score":21,"name":"Ada"}}"#,
        )
        .unwrap();
        match event {
            EvaluationEvent::Complete(summary) => assert_eq!(summary.total_score, Some(21.0)),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_decode_error_with_criterion() {
        let event = EvaluationEvent::decode(
            r#"{"type":"error","data":{"message":"model overloaded","criterion":"Rigor"}}"#,
        )
        .unwrap();
        assert_eq!(
            event,
            EvaluationEvent::Error {
                message: "model overloaded (criterion: Rigor)".to_string()
            }
        );
    }

    #[test]
    fn test_decode_unknown_and_malformed() {
        let event = EvaluationEvent::decode(r#"{"type":"heartbeat","data":{}}"#).unwrap();
        assert_eq!(event, EvaluationEvent::Unknown("heartbeat".to_string()));

        assert!(matches!(
            EvaluationEvent::decode("not json"),
            Err(FrameError::Json(_))
        ));
        assert!(matches!(
            EvaluationEvent::decode(r#"{"type":"criterion_start","data":{}}"#),
            Err(FrameError::Payload { .. })
        ));
    }

    #[test]
    fn test_frame_round_trip() {
        let event = EvaluationEvent::CriterionComplete {
            criterion: "A".to_string(),
            score: 5,
        };
        let decoded = EvaluationEvent::decode(&event.to_frame().to_string()).unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn test_outbound_payload_shape() {
        let payload = OutboundPayload {
            pre_analysis: PreAnalysis {
                name: Some("Ada".to_string()),
                ..PreAnalysis::default()
            },
            rubric: json!({"A": {"criteria_explanation": "a"}}),
            feedback: "Be kind".to_string(),
        };
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["pre_analysis"]["name"], "Ada");
        assert_eq!(value["rubric"]["A"]["criteria_explanation"], "a");
        assert_eq!(value["feedback"], "Be kind");
    }

    #[test]
    fn test_notification_decode() {
        assert_eq!(
            Notification::decode(r#"{"type":"reconnect","session_id":"s-1"}"#).unwrap(),
            Notification::Reconnect("s-1".to_string())
        );
        assert_eq!(
            Notification::decode(r#"{"type":"reconnect"}"#).unwrap(),
            Notification::Other
        );
        assert_eq!(
            Notification::decode(r#"{"type":"ping"}"#).unwrap(),
            Notification::Other
        );
    }
}
