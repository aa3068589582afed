//! Data models for the evaluation client.
//!
//! This module contains the evaluation snapshot folded from the stream,
//! the records exchanged with the GradEx API, and the report types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::rubric::RubricCriterion;

/// Lifecycle status of one evaluation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationStatus {
    /// No run started, or a run rejected before any channel opened.
    #[default]
    Idle,
    /// Waiting for the server to pick the request up.
    Queued,
    /// Document text and images are being extracted.
    Extracting,
    /// Subject metadata is being pre-analysed.
    PreAnalyzing,
    /// Criteria are being streamed.
    Analyzing,
    /// The `complete` event was folded.
    Complete,
    /// An `error` event or a transport failure ended the run.
    Failed,
}

impl fmt::Display for EvaluationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvaluationStatus::Idle => write!(f, "Idle"),
            EvaluationStatus::Queued => write!(f, "Queued"),
            EvaluationStatus::Extracting => write!(f, "Extracting"),
            EvaluationStatus::PreAnalyzing => write!(f, "PreAnalyzing"),
            EvaluationStatus::Analyzing => write!(f, "Analyzing"),
            EvaluationStatus::Complete => write!(f, "Complete"),
            EvaluationStatus::Failed => write!(f, "Failed"),
        }
    }
}

impl EvaluationStatus {
    /// Whether no further stream events may change the run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, EvaluationStatus::Complete | EvaluationStatus::Failed)
    }

    /// Returns an emoji representation of the status.
    pub fn emoji(&self) -> &'static str {
        match self {
            EvaluationStatus::Idle => "⚪",
            EvaluationStatus::Queued => "⏳",
            EvaluationStatus::Extracting | EvaluationStatus::PreAnalyzing => "📄",
            EvaluationStatus::Analyzing => "🔬",
            EvaluationStatus::Complete => "✅",
            EvaluationStatus::Failed => "❌",
        }
    }
}

/// Who wrote the document under evaluation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectMetadata {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub degree: Option<String>,
    #[serde(default)]
    pub topic: Option<String>,
}

/// Streamed evaluation of one rubric criterion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CriterionEvaluation {
    /// Criterion name, the key into the result.
    pub name: String,
    /// Concatenation of every chunk since the last `criterion_start`.
    pub feedback: String,
    /// Zero until `criterion_complete` arrives.
    pub score: u32,
    /// Rubric text copied in when the criterion started.
    pub criteria_explanation: String,
    pub criteria_output: String,
    pub score_explanation: String,
}

impl CriterionEvaluation {
    /// A freshly started criterion with empty feedback and score 0.
    pub fn started(name: &str, rubric: Option<&RubricCriterion>) -> Self {
        let (criteria_explanation, criteria_output, score_explanation) = match rubric {
            Some(r) => (
                r.criteria_explanation.clone(),
                r.criteria_output.clone(),
                r.score_explanation.clone(),
            ),
            None => Default::default(),
        };

        Self {
            name: name.to_string(),
            feedback: String::new(),
            score: 0,
            criteria_explanation,
            criteria_output,
            score_explanation,
        }
    }
}

/// The accumulated result of one evaluation run.
///
/// Criteria keep insertion order, which is also display order. The total
/// is derived from the criterion scores and cannot be set directly.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EvaluationResult {
    pub subject_metadata: Option<SubjectMetadata>,
    criteria: Vec<CriterionEvaluation>,
    total_score: u32,
    evaluation_complete: bool,
}

impl EvaluationResult {
    /// Criteria in the order they were first started.
    pub fn criteria(&self) -> &[CriterionEvaluation] {
        &self.criteria
    }

    /// Looks up a criterion by name.
    #[cfg(test)]
    pub fn criterion(&self, name: &str) -> Option<&CriterionEvaluation> {
        self.criteria.iter().find(|c| c.name == name)
    }

    pub fn criterion_count(&self) -> usize {
        self.criteria.len()
    }

    /// Sum of all criterion scores.
    pub fn total_score(&self) -> u32 {
        self.total_score
    }

    pub fn is_complete(&self) -> bool {
        self.evaluation_complete
    }

    /// Total divided by the number of criteria, the figure shown as `X.XX/5`.
    pub fn normalized_score(&self) -> Option<f64> {
        if self.criteria.is_empty() {
            None
        } else {
            Some(self.total_score as f64 / self.criteria.len() as f64)
        }
    }

    /// Creates the criterion, or resets it in place if it already exists.
    pub(crate) fn start_criterion(&mut self, evaluation: CriterionEvaluation) {
        match self.criteria.iter_mut().find(|c| c.name == evaluation.name) {
            Some(existing) => *existing = evaluation,
            None => self.criteria.push(evaluation),
        }
        self.recompute_total();
    }

    /// Appends a chunk to a started criterion. Returns false if unknown.
    pub(crate) fn append_feedback(&mut self, name: &str, chunk: &str) -> bool {
        match self.criteria.iter_mut().find(|c| c.name == name) {
            Some(criterion) => {
                criterion.feedback.push_str(chunk);
                true
            }
            None => false,
        }
    }

    /// Sets the score of a started criterion. Returns false if unknown.
    pub(crate) fn set_score(&mut self, name: &str, score: u32) -> bool {
        match self.criteria.iter_mut().find(|c| c.name == name) {
            Some(criterion) => {
                criterion.score = score;
                self.recompute_total();
                true
            }
            None => false,
        }
    }

    pub(crate) fn mark_complete(&mut self) {
        self.evaluation_complete = true;
    }

    fn recompute_total(&mut self) {
        self.total_score = self
            .criteria
            .iter()
            .fold(0u32, |total, c| total.saturating_add(c.score));
    }
}

/// The `(EvaluationResult, status)` pair exposed to renderers.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Snapshot {
    pub result: EvaluationResult,
    pub status: EvaluationStatus,
    /// Present only while queued and only when the server reports it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_position: Option<u32>,
    /// Last user-facing message (queue notice or failure reason).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Criterion most recently started.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_criterion: Option<String>,
}

/// How the stream for one document ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamEnd {
    /// The run reached `Complete` or `Failed`.
    Finished,
    /// The transport dropped and nothing is left that could resume it.
    Disconnected,
    /// Interrupted by the user.
    Cancelled,
}

/// Response of the pre-analysis endpoint, forwarded verbatim on stream open.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PreAnalysis {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub degree: Option<String>,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub pre_analyzed_summary: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Body of the result persistence call made after completion.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PostData {
    #[serde(rename = "userData")]
    pub user_data: UserData,
    #[serde(rename = "userScores")]
    pub user_scores: Vec<DimensionScore>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserData {
    pub name: String,
    pub degree: String,
    pub topic: Option<String>,
    pub total_score: f64,
}

impl PostData {
    /// Builds the payload, or `None` when the name or degree is unknown.
    pub fn from_result(result: &EvaluationResult) -> Option<Self> {
        let subject = result.subject_metadata.as_ref()?;
        let name = subject.name.clone().filter(|n| !n.trim().is_empty())?;
        let degree = subject.degree.clone().filter(|d| !d.trim().is_empty())?;

        Some(Self {
            user_data: UserData {
                name,
                degree,
                topic: subject.topic.clone(),
                total_score: result.normalized_score().unwrap_or(0.0),
            },
            user_scores: result
                .criteria()
                .iter()
                .map(|c| DimensionScore {
                    dimension_name: c.name.clone(),
                    score: c.score as f64,
                    data: None,
                })
                .collect(),
        })
    }
}

/// One scored dimension as stored by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionScore {
    pub dimension_name: String,
    pub score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// An evaluated user as listed by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredUser {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub degree: Option<String>,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub total_score: f64,
    #[serde(default)]
    pub scores: Vec<DimensionScore>,
}

/// Outcome of evaluating one document.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentEvaluation {
    /// Path of the evaluated document.
    pub document: String,
    /// Final snapshot of the run.
    pub snapshot: Snapshot,
    /// How the stream ended.
    pub end: StreamEnd,
    /// `total / criteria`, when any criterion was scored.
    pub normalized_score: Option<f64>,
    /// Scope-aware feedback derived after completion.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scoped_feedback: Option<String>,
}

impl DocumentEvaluation {
    pub fn new(document: String, snapshot: Snapshot, end: StreamEnd) -> Self {
        let normalized_score = snapshot.result.normalized_score();
        Self {
            document,
            snapshot,
            end,
            normalized_score,
            scoped_feedback: None,
        }
    }

    /// Whether the run completed with a full result.
    pub fn is_complete(&self) -> bool {
        self.snapshot.status == EvaluationStatus::Complete && self.snapshot.result.is_complete()
    }
}

/// Metadata about the evaluation report.
#[derive(Debug, Clone, Serialize)]
pub struct ReportMetadata {
    /// Date and time the report was generated.
    pub generated_at: DateTime<Utc>,
    /// Name of the rubric used.
    pub rubric: String,
    /// GradEx API the documents were evaluated against.
    pub api_url: String,
    /// Session id used for reconnects.
    pub session_id: String,
    /// Wall-clock duration of the whole run in seconds.
    pub duration_seconds: f64,
}

/// Summary across all documents in a batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchSummary {
    pub documents: usize,
    pub completed: usize,
    pub failed: usize,
    pub disconnected: usize,
    /// Mean normalized score of completed documents.
    pub mean_score: Option<f64>,
}

impl BatchSummary {
    /// Creates a summary from a list of document evaluations.
    pub fn from_documents(documents: &[DocumentEvaluation]) -> Self {
        let mut summary = Self {
            documents: documents.len(),
            ..Self::default()
        };

        let mut scores = Vec::new();
        for doc in documents {
            match (doc.snapshot.status, doc.end) {
                (EvaluationStatus::Complete, _) => {
                    summary.completed += 1;
                    if let Some(score) = doc.normalized_score {
                        scores.push(score);
                    }
                }
                (_, StreamEnd::Disconnected) | (_, StreamEnd::Cancelled) => {
                    summary.disconnected += 1
                }
                _ => summary.failed += 1,
            }
        }

        if !scores.is_empty() {
            summary.mean_score = Some(scores.iter().sum::<f64>() / scores.len() as f64);
        }

        summary
    }
}

/// The complete evaluation report.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    /// Metadata about the report.
    pub metadata: ReportMetadata,
    /// One entry per evaluated document, in evaluation order.
    pub documents: Vec<DocumentEvaluation>,
    /// Present when more than one document was evaluated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<BatchSummary>,
}
