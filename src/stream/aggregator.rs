//! Incremental evaluation-stream aggregator.
//!
//! [`fold`] is a pure reducer from `(Snapshot, EvaluationEvent)` to the
//! next snapshot. [`StreamAggregator`] owns the current snapshot for one
//! run, applies events strictly in arrival order and publishes every new
//! snapshot on a `watch` channel for renderers.

use std::mem;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::ProtocolViolation;
use crate::models::{CriterionEvaluation, EvaluationResult, EvaluationStatus, Snapshot};
use crate::rubric::Rubric;
use crate::stream::events::EvaluationEvent;
use crate::stream::session::SessionId;

/// Side effect requested by a folded event. The fold itself never
/// performs I/O.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// A queued run can be resumed under this id.
    AwaitResume(String),
    /// The run completed; post-processing may start.
    Completed,
    /// The run failed with this message.
    Failed(String),
    /// The event was ignored and the snapshot left unchanged.
    Rejected(ProtocolViolation),
}

/// Folds one event into a snapshot.
///
/// Total: every event yields a snapshot. Events that would corrupt the
/// result (unknown criterion, anything after a terminal status, unknown
/// tags) return the input unchanged with [`Effect::Rejected`].
pub fn fold(
    mut snapshot: Snapshot,
    event: &EvaluationEvent,
    rubric: &Rubric,
) -> (Snapshot, Option<Effect>) {
    if snapshot.status.is_terminal() {
        let violation = ProtocolViolation::AfterTerminal {
            event: event.kind(),
            status: snapshot.status,
        };
        return (snapshot, Some(Effect::Rejected(violation)));
    }

    let effect = match event {
        EvaluationEvent::QueueStatus(queue) => {
            snapshot.status = EvaluationStatus::Queued;
            snapshot.queue_position = queue.position;
            if queue.message.is_some() {
                snapshot.message = queue.message.clone();
            }
            queue.session_id.clone().map(Effect::AwaitResume)
        }
        EvaluationEvent::Metadata(subject) => {
            snapshot.status = EvaluationStatus::Analyzing;
            snapshot.queue_position = None;
            snapshot.message = None;
            snapshot.result.subject_metadata = Some(subject.clone());
            None
        }
        EvaluationEvent::CriterionStart { criterion } => {
            let evaluation = CriterionEvaluation::started(criterion, rubric.lookup(criterion));
            snapshot.result.start_criterion(evaluation);
            snapshot.active_criterion = Some(criterion.clone());
            leave_queue(&mut snapshot);
            None
        }
        EvaluationEvent::AnalysisChunk { criterion, chunk } => {
            if !snapshot.result.append_feedback(criterion, chunk) {
                return unknown_criterion(snapshot, event, criterion);
            }
            leave_queue(&mut snapshot);
            None
        }
        EvaluationEvent::CriterionComplete { criterion, score } => {
            if !snapshot.result.set_score(criterion, *score) {
                return unknown_criterion(snapshot, event, criterion);
            }
            leave_queue(&mut snapshot);
            None
        }
        EvaluationEvent::Complete(_) => {
            snapshot.result.mark_complete();
            snapshot.status = EvaluationStatus::Complete;
            snapshot.queue_position = None;
            snapshot.active_criterion = None;
            Some(Effect::Completed)
        }
        EvaluationEvent::Error { message } => {
            snapshot.status = EvaluationStatus::Failed;
            snapshot.queue_position = None;
            snapshot.message = Some(message.clone());
            Some(Effect::Failed(message.clone()))
        }
        EvaluationEvent::Unknown(kind) => {
            Some(Effect::Rejected(ProtocolViolation::UnknownEvent(kind.clone())))
        }
    };

    (snapshot, effect)
}

/// Criterion traffic proves a queued request is being processed.
fn leave_queue(snapshot: &mut Snapshot) {
    if snapshot.status == EvaluationStatus::Queued {
        snapshot.status = EvaluationStatus::Analyzing;
        snapshot.queue_position = None;
    }
}

fn unknown_criterion(
    snapshot: Snapshot,
    event: &EvaluationEvent,
    criterion: &str,
) -> (Snapshot, Option<Effect>) {
    let violation = ProtocolViolation::UnknownCriterion {
        event: event.kind(),
        criterion: criterion.to_string(),
    };
    (snapshot, Some(Effect::Rejected(violation)))
}

/// Result of applying one event.
#[derive(Debug, Clone)]
pub struct Step {
    pub snapshot: Snapshot,
    pub effect: Option<Effect>,
}

/// Owns the snapshot of the in-flight run.
pub struct StreamAggregator {
    session_id: SessionId,
    rubric: Rubric,
    subject: Option<String>,
    snapshot: Snapshot,
    diagnostics: Vec<ProtocolViolation>,
    publisher: watch::Sender<Snapshot>,
}

impl StreamAggregator {
    pub fn new(session_id: SessionId, rubric: Rubric) -> Self {
        let (publisher, _) = watch::channel(Snapshot::default());
        Self {
            session_id,
            rubric,
            subject: None,
            snapshot: Snapshot::default(),
            diagnostics: Vec::new(),
            publisher,
        }
    }

    /// Discards the previous run and starts a new one, optimistically
    /// `Queued` until the first event arrives.
    pub fn reset(&mut self, subject: &str) {
        debug!("Resetting aggregator for {}", subject);
        self.subject = Some(subject.to_string());
        self.diagnostics.clear();
        self.snapshot = Snapshot {
            status: EvaluationStatus::Queued,
            ..Snapshot::default()
        };
        self.publish();
    }

    /// Moves to a pre-stream phase such as `Extracting`.
    pub fn begin_phase(&mut self, status: EvaluationStatus) {
        if self.snapshot.status.is_terminal() {
            return;
        }
        self.snapshot.status = status;
        self.publish();
    }

    /// Marks the run failed outside the event stream, e.g. on a
    /// transport error. No-op once the run is terminal.
    pub fn fail(&mut self, message: impl Into<String>) {
        if self.snapshot.status.is_terminal() {
            return;
        }
        self.snapshot.status = EvaluationStatus::Failed;
        self.snapshot.queue_position = None;
        self.snapshot.message = Some(message.into());
        self.publish();
    }

    /// Replaces the run with an `Idle` snapshot carrying the reason a
    /// document was refused before any request was made.
    pub fn reject(&mut self, subject: &str, message: impl Into<String>) {
        debug!("Rejecting {}", subject);
        self.subject = Some(subject.to_string());
        self.diagnostics.clear();
        self.snapshot = Snapshot {
            status: EvaluationStatus::Idle,
            message: Some(message.into()),
            ..Snapshot::default()
        };
        self.publish();
    }

    /// Records a user-facing message without changing the status.
    pub fn notice(&mut self, message: impl Into<String>) {
        self.snapshot.message = Some(message.into());
        self.publish();
    }

    /// Folds one event into the current snapshot and publishes the result.
    pub fn apply(&mut self, event: &EvaluationEvent) -> Step {
        let current = mem::take(&mut self.snapshot);
        let (next, effect) = fold(current, event, &self.rubric);
        self.snapshot = next;

        if let Some(Effect::Rejected(violation)) = &effect {
            warn!(
                "Ignoring event for {}: {}",
                self.subject.as_deref().unwrap_or("<no document>"),
                violation
            );
            self.diagnostics.push(violation.clone());
        } else {
            self.publish();
        }

        Step {
            snapshot: self.snapshot.clone(),
            effect,
        }
    }

    /// The latest folded state.
    pub fn current_snapshot(&self) -> Snapshot {
        self.snapshot.clone()
    }

    pub fn result(&self) -> &EvaluationResult {
        &self.snapshot.result
    }

    pub fn status(&self) -> EvaluationStatus {
        self.snapshot.status
    }

    /// Receives every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.publisher.subscribe()
    }

    /// Protocol violations seen since the last reset.
    pub fn diagnostics(&self) -> &[ProtocolViolation] {
        &self.diagnostics
    }

    pub fn rubric(&self) -> &Rubric {
        &self.rubric
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    fn publish(&self) {
        self.publisher.send_replace(self.snapshot.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SubjectMetadata;
    use crate::rubric::RubricCriterion;
    use crate::stream::events::{CompletionSummary, QueueStatus, MAX_WIRE_SCORE};

    fn rubric() -> Rubric {
        Rubric::new(
            "test",
            vec![(
                "Rigor".to_string(),
                RubricCriterion {
                    criteria_explanation: "How rigorous?".to_string(),
                    criteria_output: "1. Check".to_string(),
                    score_explanation: "Score 1: weak.".to_string(),
                },
            )],
        )
    }

    fn aggregator() -> StreamAggregator {
        let mut agg = StreamAggregator::new(SessionId::new("session-test"), rubric());
        agg.reset("thesis.pdf");
        agg
    }

    fn start(c: &str) -> EvaluationEvent {
        EvaluationEvent::CriterionStart {
            criterion: c.to_string(),
        }
    }

    fn chunk(c: &str, text: &str) -> EvaluationEvent {
        EvaluationEvent::AnalysisChunk {
            criterion: c.to_string(),
            chunk: text.to_string(),
        }
    }

    fn done(c: &str, score: u32) -> EvaluationEvent {
        EvaluationEvent::CriterionComplete {
            criterion: c.to_string(),
            score,
        }
    }

    fn metadata() -> EvaluationEvent {
        EvaluationEvent::Metadata(SubjectMetadata {
            name: Some("Ada".to_string()),
            degree: Some("PhD".to_string()),
            topic: Some("Engines".to_string()),
        })
    }

    #[test]
    fn test_reset_is_queued() {
        let agg = aggregator();
        assert_eq!(agg.status(), EvaluationStatus::Queued);
        assert_eq!(agg.result().criterion_count(), 0);
        assert!(!agg.result().is_complete());
    }

    #[test]
    fn test_single_criterion_scenario() {
        let mut agg = aggregator();
        for event in [
            start("Rigor"),
            chunk("Rigor", "Good "),
            chunk("Rigor", "work."),
            done("Rigor", 4),
        ] {
            agg.apply(&event);
        }

        let rigor = agg.result().criterion("Rigor").unwrap();
        assert_eq!(rigor.feedback, "Good work.");
        assert_eq!(rigor.score, 4);
        assert_eq!(rigor.criteria_explanation, "How rigorous?");
        assert_eq!(agg.result().total_score(), 4);
    }

    #[test]
    fn test_two_criteria_total_and_normalized() {
        let mut agg = aggregator();
        for event in [start("A"), done("A", 3), start("B"), done("B", 5)] {
            agg.apply(&event);
        }

        assert_eq!(agg.result().total_score(), 8);
        let normalized = agg.result().normalized_score().unwrap();
        assert_eq!(format!("{:.2}/5", normalized), "4.00/5");
        // not in the rubric, so no rubric text
        assert!(agg.result().criterion("A").unwrap().criteria_explanation.is_empty());
    }

    #[test]
    fn test_restart_discards_chunks() {
        let mut agg = aggregator();
        agg.apply(&start("A"));
        agg.apply(&chunk("A", "draft"));
        agg.apply(&done("A", 2));
        agg.apply(&start("A"));

        let a = agg.result().criterion("A").unwrap();
        assert_eq!(a.feedback, "");
        assert_eq!(a.score, 0);
        assert_eq!(agg.result().total_score(), 0);
        assert_eq!(agg.result().criterion_count(), 1);
    }

    #[test]
    fn test_error_after_metadata_keeps_criteria() {
        let mut agg = aggregator();
        agg.apply(&metadata());
        agg.apply(&start("Rigor"));
        agg.apply(&chunk("Rigor", "partial"));
        let step = agg.apply(&EvaluationEvent::Error {
            message: "model crashed".to_string(),
        });

        assert_eq!(step.effect, Some(Effect::Failed("model crashed".to_string())));
        assert_eq!(agg.status(), EvaluationStatus::Failed);
        assert_eq!(agg.result().criterion("Rigor").unwrap().feedback, "partial");
        assert!(!agg.result().is_complete());
        assert_eq!(agg.current_snapshot().message.as_deref(), Some("model crashed"));
    }

    #[test]
    fn test_duplicate_chunk_appends_twice() {
        let mut agg = aggregator();
        agg.apply(&start("A"));
        agg.apply(&chunk("A", "x"));
        agg.apply(&chunk("A", "x"));
        assert_eq!(agg.result().criterion("A").unwrap().feedback, "xx");
    }

    #[test]
    fn test_unknown_criterion_is_rejected() {
        let mut agg = aggregator();
        agg.apply(&start("A"));
        agg.apply(&done("A", 3));
        let before = agg.current_snapshot();

        let step = agg.apply(&chunk("Ghost", "boo"));
        assert!(matches!(
            step.effect,
            Some(Effect::Rejected(ProtocolViolation::UnknownCriterion { .. }))
        ));
        let step = agg.apply(&done("Ghost", 5));
        assert!(matches!(step.effect, Some(Effect::Rejected(_))));

        assert_eq!(agg.current_snapshot(), before);
        assert!(agg.result().criterion("Ghost").is_none());
        assert_eq!(agg.result().total_score(), 3);
        assert_eq!(agg.diagnostics().len(), 2);
    }

    #[test]
    fn test_complete_is_terminal() {
        let mut agg = aggregator();
        agg.apply(&start("A"));
        agg.apply(&done("A", 5));
        let step = agg.apply(&EvaluationEvent::Complete(CompletionSummary::default()));
        assert_eq!(step.effect, Some(Effect::Completed));
        assert!(agg.result().is_complete());
        assert_eq!(agg.status(), EvaluationStatus::Complete);

        let step = agg.apply(&start("A"));
        assert!(matches!(
            step.effect,
            Some(Effect::Rejected(ProtocolViolation::AfterTerminal { .. }))
        ));
        let step = agg.apply(&EvaluationEvent::Complete(CompletionSummary::default()));
        assert!(matches!(step.effect, Some(Effect::Rejected(_))));
        assert_eq!(agg.result().total_score(), 5);
        assert!(agg.result().is_complete());

        agg.fail("late transport error");
        assert_eq!(agg.status(), EvaluationStatus::Complete);
    }

    #[test]
    fn test_queue_status_requests_resume() {
        let mut agg = aggregator();
        let step = agg.apply(&EvaluationEvent::QueueStatus(QueueStatus {
            message: Some("Your request has been queued.".to_string()),
            session_id: Some("q-42".to_string()),
            position: Some(3),
        }));
        assert_eq!(step.effect, Some(Effect::AwaitResume("q-42".to_string())));
        assert_eq!(step.snapshot.status, EvaluationStatus::Queued);
        assert_eq!(step.snapshot.queue_position, Some(3));

        agg.apply(&metadata());
        let snapshot = agg.current_snapshot();
        assert_eq!(snapshot.status, EvaluationStatus::Analyzing);
        assert_eq!(snapshot.queue_position, None);
        assert_eq!(
            snapshot.result.subject_metadata.unwrap().name.as_deref(),
            Some("Ada")
        );
    }

    #[test]
    fn test_start_while_queued_moves_to_analyzing() {
        let mut agg = aggregator();
        agg.apply(&EvaluationEvent::QueueStatus(QueueStatus {
            message: Some("Position 2 in queue".to_string()),
            position: Some(2),
            session_id: None,
        }));
        assert_eq!(agg.current_snapshot().queue_position, Some(2));

        agg.apply(&start("A"));
        let snapshot = agg.current_snapshot();
        assert_eq!(snapshot.status, EvaluationStatus::Analyzing);
        assert_eq!(snapshot.queue_position, None);
    }

    /// A snapshot that is queued but already holds criterion "A".
    fn queued_with_criterion() -> Snapshot {
        let (mut snapshot, _) = fold(Snapshot::default(), &start("A"), &rubric());
        snapshot.status = EvaluationStatus::Queued;
        snapshot.queue_position = Some(1);
        snapshot
    }

    #[test]
    fn test_chunk_while_queued_moves_to_analyzing() {
        let (after, effect) = fold(queued_with_criterion(), &chunk("A", "go"), &rubric());
        assert!(effect.is_none());
        assert_eq!(after.status, EvaluationStatus::Analyzing);
        assert_eq!(after.queue_position, None);
    }

    #[test]
    fn test_score_while_queued_moves_to_analyzing() {
        let (after, effect) = fold(queued_with_criterion(), &done("A", 3), &rubric());
        assert!(effect.is_none());
        assert_eq!(after.status, EvaluationStatus::Analyzing);
        assert_eq!(after.queue_position, None);
        assert_eq!(after.result.total_score(), 3);

        // a rejected score leaves the queue state alone
        let (after, effect) = fold(queued_with_criterion(), &done("Ghost", 3), &rubric());
        assert!(matches!(effect, Some(Effect::Rejected(_))));
        assert_eq!(after.status, EvaluationStatus::Queued);
    }

    #[test]
    fn test_oversized_scores_do_not_overflow_total() {
        let mut agg = aggregator();
        agg.apply(&start("A"));
        agg.apply(&start("B"));
        for criterion in ["A", "B"] {
            let frame = format!(
                r#"{{"type":"criterion_complete","data":{{"criterion":"{}","score":3000000000}}}}"#,
                criterion
            );
            let event = EvaluationEvent::decode(&frame).unwrap();
            assert!(agg.apply(&event).effect.is_none());
        }
        assert_eq!(agg.result().criterion("A").unwrap().score, MAX_WIRE_SCORE);
        assert_eq!(agg.result().total_score(), 2 * MAX_WIRE_SCORE);
    }

    #[test]
    fn test_metadata_last_write_wins() {
        let mut agg = aggregator();
        agg.apply(&metadata());
        let second = SubjectMetadata {
            name: Some("Grace".to_string()),
            degree: None,
            topic: None,
        };
        agg.apply(&EvaluationEvent::Metadata(second.clone()));
        assert_eq!(agg.result().subject_metadata, Some(second));
    }

    #[test]
    fn test_reject_publishes_idle_with_reason() {
        let mut agg = aggregator();
        let mut rx = agg.subscribe();
        agg.apply(&start("A"));

        agg.reject("notes.txt", "Unsupported file type");
        let published = rx.borrow_and_update().clone();
        assert_eq!(published.status, EvaluationStatus::Idle);
        assert_eq!(published.message.as_deref(), Some("Unsupported file type"));
        assert_eq!(published.result.criterion_count(), 0);
        assert!(agg.diagnostics().is_empty());
    }

    #[test]
    fn test_unknown_event_is_ignored() {
        let mut agg = aggregator();
        let step = agg.apply(&EvaluationEvent::Unknown("heartbeat".to_string()));
        assert_eq!(
            step.effect,
            Some(Effect::Rejected(ProtocolViolation::UnknownEvent(
                "heartbeat".to_string()
            )))
        );
        assert_eq!(agg.status(), EvaluationStatus::Queued);
    }

    #[test]
    fn test_reset_discards_previous_run() {
        let mut agg = aggregator();
        agg.apply(&start("A"));
        agg.apply(&done("A", 4));
        agg.apply(&EvaluationEvent::Complete(CompletionSummary::default()));

        agg.reset("next.pdf");
        assert_eq!(agg.status(), EvaluationStatus::Queued);
        assert_eq!(agg.result().criterion_count(), 0);
        assert!(!agg.result().is_complete());
        assert!(agg.diagnostics().is_empty());
    }

    #[test]
    fn test_fold_is_pure() {
        let rubric = rubric();
        let before = Snapshot::default();
        let (after, effect) = fold(before.clone(), &start("Rigor"), &rubric);
        assert!(effect.is_none());
        assert_eq!(before.result.criterion_count(), 0);
        assert_eq!(after.result.criterion_count(), 1);
        assert_eq!(after.active_criterion.as_deref(), Some("Rigor"));
    }

    #[tokio::test]
    async fn test_subscribers_see_every_change() {
        let mut agg = aggregator();
        let mut rx = agg.subscribe();
        assert_eq!(rx.borrow_and_update().status, EvaluationStatus::Queued);

        agg.begin_phase(EvaluationStatus::Extracting);
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().status, EvaluationStatus::Extracting);

        agg.apply(&start("A"));
        agg.apply(&done("A", 2));
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().result.total_score(), 2);
    }
}
