//! Console progress for a running evaluation.
//!
//! A spinner follows the aggregator's snapshot channel and shows the
//! current phase, queue position or criterion, and the running total.

use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::models::{EvaluationStatus, Snapshot};

/// One-line description of a snapshot.
pub fn status_line(snapshot: &Snapshot) -> String {
    let total = snapshot.result.total_score();
    let scored = snapshot.result.criterion_count();

    match snapshot.status {
        EvaluationStatus::Idle => "Idle".to_string(),
        EvaluationStatus::Extracting => "Extracting text and images".to_string(),
        EvaluationStatus::PreAnalyzing => "Pre-analyzing".to_string(),
        EvaluationStatus::Queued => match snapshot.queue_position {
            Some(position) => format!("Queued (position {})", position),
            None => "Queued".to_string(),
        },
        EvaluationStatus::Analyzing => match snapshot.active_criterion {
            Some(ref criterion) => {
                format!("Analyzing {} (total {} over {})", criterion, total, scored)
            }
            None => "Analyzing".to_string(),
        },
        EvaluationStatus::Complete => format!("Complete (total {} over {})", total, scored),
        EvaluationStatus::Failed => match snapshot.message {
            Some(ref message) => format!("Failed: {}", message),
            None => "Failed".to_string(),
        },
    }
}

/// Spinner bound to one document's evaluation.
pub struct ProgressDisplay {
    bar: ProgressBar,
    task: JoinHandle<()>,
}

impl ProgressDisplay {
    /// Starts following `snapshots`. A hidden bar is used when `visible` is false.
    pub fn spawn(document: &str, mut snapshots: watch::Receiver<Snapshot>, visible: bool) -> Self {
        let bar = if visible {
            let bar = ProgressBar::new_spinner();
            bar.set_style(
                ProgressStyle::default_spinner()
                    .template("{spinner:.green} [{elapsed_precise}] {prefix:.bold} {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner()),
            );
            bar.enable_steady_tick(Duration::from_millis(120));
            bar
        } else {
            ProgressBar::hidden()
        };
        bar.set_prefix(document.to_string());
        bar.set_message(status_line(&snapshots.borrow()));

        let task_bar = bar.clone();
        let task = tokio::spawn(async move {
            while snapshots.changed().await.is_ok() {
                let line = status_line(&snapshots.borrow_and_update());
                task_bar.set_message(line);
            }
        });

        Self { bar, task }
    }

    /// Stops following and leaves the final status on screen.
    pub fn finish(self, snapshot: &Snapshot) {
        self.task.abort();
        self.bar
            .finish_with_message(format!("{} {}", snapshot.status.emoji(), status_line(snapshot)));
    }
}
