//! Evaluation runner.
//!
//! Drives one document at a time through extraction, pre-analysis and the
//! evaluation stream. Stream and notification channels deliver into a
//! single inbox which is drained in arrival order, so the aggregator sees
//! one event at a time and needs no locking.

use serde_json::Value;
use std::path::Path;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::error::PreconditionError;
use crate::models::{DocumentEvaluation, EvaluationStatus, PostData, PreAnalysis, Snapshot, StreamEnd};
use crate::rubric::Rubric;
use crate::scanner::is_document;
use crate::stream::{ConnectionState, Effect, OutboundPayload, ReconnectWatch, StreamAggregator};
use crate::transport::{
    open_notifications, open_stream, ApiClient, Inbound, NotificationHandle, StreamHandle,
    TransportEvent,
};

/// Behaviour switches for a run.
#[derive(Debug, Clone)]
pub struct RunnerOptions {
    /// Free-text instruction sent with the rubric.
    pub feedback: String,
    /// Persist completed results to the backend.
    pub post_results: bool,
    /// Derive scope-aware feedback after completion.
    pub scoped_feedback: bool,
    /// Keep a notification channel open for reconnects.
    pub notifications: bool,
}

/// Runs evaluations against one GradEx API.
pub struct EvaluationRunner {
    client: ApiClient,
    options: RunnerOptions,
    aggregator: StreamAggregator,
    watch: ReconnectWatch,
    inbox_tx: mpsc::UnboundedSender<Inbound>,
    inbox_rx: mpsc::UnboundedReceiver<Inbound>,
    stream: Option<StreamHandle>,
    generation: u64,
    notifications: Option<NotificationHandle>,
    notifications_alive: bool,
}

/// Rejects a run before anything is sent.
pub fn check_preconditions(path: &Path, rubric: &Rubric) -> Result<(), PreconditionError> {
    if !path.is_file() {
        return Err(PreconditionError::MissingFile(path.to_path_buf()));
    }

    if !is_document(path) {
        return Err(PreconditionError::UnsupportedFile(path.to_path_buf()));
    }

    if rubric.is_empty() {
        return Err(PreconditionError::EmptyRubric);
    }

    Ok(())
}

impl EvaluationRunner {
    pub fn new(client: ApiClient, aggregator: StreamAggregator, options: RunnerOptions) -> Self {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        Self {
            client,
            options,
            aggregator,
            watch: ReconnectWatch::default(),
            inbox_tx,
            inbox_rx,
            stream: None,
            generation: 0,
            notifications: None,
            notifications_alive: false,
        }
    }

    /// Opens the notification channel for the lifetime of the runner.
    pub fn start_notifications(&mut self) {
        if !self.options.notifications || self.notifications.is_some() {
            return;
        }
        let url = self.client.endpoints().notifications();
        let session_id = self.aggregator.session_id().clone();
        self.notifications = Some(open_notifications(url, session_id, self.inbox_tx.clone()));
        self.notifications_alive = true;
    }

    /// Receives every snapshot the aggregator publishes.
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.aggregator.subscribe()
    }

    #[cfg(test)]
    pub fn aggregator(&self) -> &StreamAggregator {
        &self.aggregator
    }

    /// Evaluates one document end to end.
    pub async fn evaluate(&mut self, path: &Path) -> DocumentEvaluation {
        let document = path.display().to_string();

        if let Err(e) = check_preconditions(path, self.aggregator.rubric()) {
            warn!("Skipping {}: {}", document, e);
            self.abandon();
            self.watch.reset();
            self.aggregator.reject(&document, e.to_string());
            return DocumentEvaluation::new(
                document,
                self.aggregator.current_snapshot(),
                StreamEnd::Finished,
            );
        }

        self.begin(&document);

        let Some(pre_analysis) = self.prepare(path).await else {
            return DocumentEvaluation::new(
                document,
                self.aggregator.current_snapshot(),
                StreamEnd::Finished,
            );
        };

        let end = self.stream_evaluation(&pre_analysis).await;
        let ignored = self.aggregator.diagnostics().len();
        if ignored > 0 {
            warn!("Ignored {} out-of-order event(s) for {}", ignored, document);
        }
        let mut evaluation =
            DocumentEvaluation::new(document, self.aggregator.current_snapshot(), end);

        if evaluation.is_complete() {
            evaluation.scoped_feedback = self.post_process(&pre_analysis).await;
        }

        evaluation
    }

    /// Abandons any in-flight run and resets the aggregator for `subject`.
    pub fn begin(&mut self, subject: &str) {
        self.abandon();
        self.watch.reset();
        self.aggregator.reset(subject);
    }

    /// Closes the current stream and drops everything it queued.
    fn abandon(&mut self) {
        if let Some(handle) = self.stream.take() {
            debug!("Closing stream #{} ({})", handle.generation(), handle.url());
        }
        while let Ok(message) = self.inbox_rx.try_recv() {
            if matches!(message, Inbound::NotificationsClosed) {
                self.notifications_closed();
            }
        }
    }

    async fn prepare(&mut self, path: &Path) -> Option<PreAnalysis> {
        self.aggregator.begin_phase(EvaluationStatus::Extracting);
        let extracted = match self.client.extract_document(path).await {
            Ok(doc) => doc,
            Err(e) => {
                error!("Extraction failed for {}: {}", path.display(), e);
                self.aggregator.fail(format!("Failed to extract text: {}", e));
                return None;
            }
        };

        self.aggregator.begin_phase(EvaluationStatus::PreAnalyzing);
        match self.client.pre_analyze(&extracted.text_and_image_analysis).await {
            Ok(pre_analysis) => Some(pre_analysis),
            Err(e) => {
                error!("Pre-analysis failed for {}: {}", path.display(), e);
                self.aggregator.fail(format!("Failed to pre-analyze text: {}", e));
                None
            }
        }
    }

    /// Opens the main stream and folds events until the run ends.
    pub async fn stream_evaluation(&mut self, pre_analysis: &PreAnalysis) -> StreamEnd {
        let payload = OutboundPayload {
            pre_analysis: pre_analysis.clone(),
            rubric: self.aggregator.rubric().payload(),
            feedback: self.options.feedback.clone(),
        };
        let initial = match serde_json::to_string(&payload) {
            Ok(text) => text,
            Err(e) => {
                self.aggregator.fail(format!("Could not encode request: {}", e));
                return StreamEnd::Finished;
            }
        };

        let url = self.client.endpoints().analysis_stream();
        self.open(url, Some(initial));

        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        loop {
            let next = tokio::select! {
                message = self.inbox_rx.recv() => Some(message),
                _ = &mut ctrl_c => None,
            };

            let message = match next {
                Some(Some(message)) => message,
                // the runner holds a sender, so the inbox never closes
                Some(None) => return StreamEnd::Disconnected,
                None => {
                    warn!("Interrupted; abandoning the evaluation");
                    self.abandon();
                    self.aggregator.notice("Evaluation interrupted");
                    return StreamEnd::Cancelled;
                }
            };

            match message {
                Inbound::Stream { generation, .. } if generation != self.generation => {
                    debug!("Dropping message from stale stream #{}", generation);
                }
                Inbound::Stream { event, .. } => {
                    if let Some(end) = self.on_transport(event) {
                        return end;
                    }
                }
                Inbound::Reconnect(id) => {
                    debug!(
                        "Reconnect notification for {} (last session {:?})",
                        id,
                        self.watch.resume_id()
                    );
                    if self.watch.accept_reconnect(&id, self.aggregator.status()) {
                        info!("Resuming session {}", id);
                        self.resume(&id);
                    }
                }
                Inbound::NotificationsClosed => {
                    self.notifications_closed();
                    if self.watch.state() == ConnectionState::Disconnected {
                        warn!("Notification channel closed; the evaluation cannot be resumed");
                        return StreamEnd::Disconnected;
                    }
                }
            }
        }
    }

    fn on_transport(&mut self, event: TransportEvent) -> Option<StreamEnd> {
        match event {
            TransportEvent::Opened => {
                self.watch.connected();
                None
            }
            TransportEvent::Frame(event) => {
                let step = self.aggregator.apply(&event);
                match step.effect {
                    Some(Effect::AwaitResume(id)) => {
                        info!("Request queued; attaching to session {}", id);
                        self.watch.arm(&id);
                        self.resume(&id);
                        None
                    }
                    Some(Effect::Completed) => {
                        info!(
                            "Evaluation complete: {} criteria, total {}",
                            step.snapshot.result.criterion_count(),
                            step.snapshot.result.total_score()
                        );
                        self.stream = None;
                        Some(StreamEnd::Finished)
                    }
                    Some(Effect::Failed(message)) => {
                        error!("Evaluation failed: {}", message);
                        self.stream = None;
                        Some(StreamEnd::Finished)
                    }
                    Some(Effect::Rejected(_)) | None => None,
                }
            }
            TransportEvent::Closed => {
                self.stream = None;
                let status = self.aggregator.status();
                if status.is_terminal() {
                    return Some(StreamEnd::Finished);
                }

                self.watch.disconnected(status);
                if self.notifications_alive {
                    info!("Stream closed while {}; waiting for a reconnect notification", status);
                    self.aggregator
                        .notice("Connection lost. Waiting for the server to resume the evaluation...");
                    None
                } else {
                    warn!("Stream closed while {} and no notification channel is open", status);
                    self.aggregator
                        .notice("Connection lost. Restart the evaluation to try again.");
                    Some(StreamEnd::Disconnected)
                }
            }
            TransportEvent::Failed(message) => {
                self.stream = None;
                error!("WebSocket error: {}", message);
                self.aggregator.fail(format!(
                    "There was an error with the WebSocket connection: {}",
                    message
                ));
                Some(StreamEnd::Finished)
            }
        }
    }

    fn open(&mut self, url: String, initial: Option<String>) {
        self.generation += 1;
        // replacing the handle closes the previous stream
        self.stream = Some(open_stream(
            url,
            initial,
            self.generation,
            self.inbox_tx.clone(),
        ));
    }

    fn resume(&mut self, id: &str) {
        let url = self.client.endpoints().resume_stream(id);
        self.open(url, None);
    }

    fn notifications_closed(&mut self) {
        self.notifications = None;
        self.notifications_alive = false;
    }

    /// One-shot calls made after completion. Failures are logged only.
    async fn post_process(&mut self, pre_analysis: &PreAnalysis) -> Option<String> {
        let result = self.aggregator.result().clone();

        if self.options.post_results {
            match PostData::from_result(&result) {
                Some(data) => match self.client.post_user_data(&data).await {
                    Ok(()) => info!("Saved evaluation results for {}", data.user_data.name),
                    Err(e) => warn!("Failed to save evaluation results: {}", e),
                },
                None => warn!("Name or degree is missing, so the results were not saved"),
            }
        }

        if !self.options.scoped_feedback {
            return None;
        }

        let summary = pre_analysis.pre_analyzed_summary.clone().unwrap_or_default();
        let scope = match self.client.extract_scope(&summary).await {
            Ok(scope) => scope,
            Err(e) => {
                warn!("Scope extraction failed: {}", e);
                return None;
            }
        };

        let feedback = result
            .criteria()
            .iter()
            .map(|c| format!("{}: {}", c.name, c.feedback))
            .collect::<Vec<_>>()
            .join("\n\n");

        match self.client.generate_scoped_feedback(&feedback, &scope).await {
            Ok(Value::Null) => None,
            Ok(Value::String(text)) => Some(text),
            Ok(other) => serde_json::to_string_pretty(&other).ok(),
            Err(e) => {
                warn!("Scoped feedback failed: {}", e);
                None
            }
        }
    }
}
