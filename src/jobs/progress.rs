use super::registry::JobRegistry;
use super::status::{JobKind, JobStatus, ProgressEvent, Stage};
use crate::error::TraceError;
use log::{debug, warn};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc::{self, error::TrySendError};

/// Cumulative record counters carried on every event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counts {
    pub processed: u64,
    pub emitted: u64,
}

#[derive(Debug)]
struct State {
    stage: Stage,
    percent: u32,
    counts: Counts,
    terminal: bool,
    disconnected: bool,
}

enum Delivery {
    /// Wait for buffer space.
    Lossless,
    /// Drop the event if the buffer is full.
    BestEffort,
}

/// Writes a job's events to its stream and to the registry.
///
/// Stage, percent and counters never go backwards, and at most one terminal
/// event is produced. Intermediate updates are dropped from the stream when
/// the reader lags, but the registry always sees them. A reader going away
/// never stops the job.
#[derive(Clone)]
pub struct ProgressReporter {
    job_id: Arc<str>,
    kind: JobKind,
    tx: mpsc::Sender<ProgressEvent>,
    registry: Arc<JobRegistry>,
    state: Arc<Mutex<State>>,
}

impl ProgressReporter {
    pub fn new(
        job_id: &str,
        kind: JobKind,
        tx: mpsc::Sender<ProgressEvent>,
        registry: Arc<JobRegistry>,
    ) -> Self {
        ProgressReporter {
            job_id: Arc::from(job_id),
            kind,
            tx,
            registry,
            state: Arc::new(Mutex::new(State {
                stage: Stage::Unknown,
                percent: 0,
                counts: Counts::default(),
                terminal: false,
                disconnected: false,
            })),
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn counts(&self) -> Counts {
        self.lock().counts
    }

    /// Fold an update into the state and the registry. `None` once the job
    /// has finished.
    fn apply(
        &self,
        stage: Stage,
        percent: u32,
        message: String,
        counts: Option<Counts>,
        finish: Option<Finish>,
    ) -> Option<ProgressEvent> {
        let mut state = self.lock();
        if state.terminal {
            debug!("[{}] update after terminal event ignored: {message}", self.job_id);
            return None;
        }

        if finish.is_some() || stage.rank() >= state.stage.rank() {
            state.stage = stage;
        }
        state.percent = state.percent.max(percent.min(100));
        if let Some(counts) = counts {
            state.counts.processed = state.counts.processed.max(counts.processed);
            state.counts.emitted = state.counts.emitted.max(counts.emitted);
        }

        let mut event = ProgressEvent {
            job_id: self.job_id.to_string(),
            kind: self.kind,
            stage: state.stage,
            progress_percent: state.percent,
            message,
            records_processed: state.counts.processed,
            records_emitted: state.counts.emitted,
            output_files: Vec::new(),
            success: None,
            error: None,
            error_kind: None,
        };
        match finish {
            Some(Finish::Completed(files)) => {
                event.stage = Stage::Completed;
                event.progress_percent = 100;
                event.output_files = files;
                event.success = Some(true);
            }
            Some(Finish::Failed(error)) => {
                event.stage = Stage::Failed;
                event.success = Some(false);
                event.error = Some(error.to_string());
                event.error_kind = Some(error.kind());
            }
            None => {}
        }
        state.stage = event.stage;
        state.percent = event.progress_percent;
        state.terminal = event.stage.is_terminal();

        self.registry.update(JobStatus::from(&event));
        Some(event)
    }

    fn mark_disconnected(&self) {
        let mut state = self.lock();
        if !state.disconnected {
            state.disconnected = true;
            warn!("[{}] progress reader disconnected; job continues", self.job_id);
        }
    }

    fn is_disconnected(&self) -> bool {
        self.lock().disconnected
    }

    async fn deliver(&self, event: ProgressEvent, delivery: Delivery) {
        if self.is_disconnected() {
            return;
        }
        match delivery {
            Delivery::Lossless => {
                if self.tx.send(event).await.is_err() {
                    self.mark_disconnected();
                }
            }
            Delivery::BestEffort => self.try_deliver(event),
        }
    }

    fn try_deliver(&self, event: ProgressEvent) {
        if self.is_disconnected() {
            return;
        }
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                debug!(
                    "[{}] stream full, dropped {}% update",
                    self.job_id, event.progress_percent
                );
            }
            Err(TrySendError::Closed(_)) => self.mark_disconnected(),
        }
    }

    /// Stage boundary. Delivered losslessly while a reader is attached.
    pub async fn stage(&self, stage: Stage, percent: u32, message: impl Into<String>) {
        if let Some(event) = self.apply(stage, percent, message.into(), None, None) {
            self.deliver(event, Delivery::Lossless).await;
        }
    }

    /// Stage boundary from a blocking worker thread.
    ///
    /// Must not be called from an async context.
    pub fn stage_blocking(&self, stage: Stage, percent: u32, message: impl Into<String>) {
        if let Some(event) = self.apply(stage, percent, message.into(), None, None) {
            if self.is_disconnected() {
                return;
            }
            if self.tx.blocking_send(event).is_err() {
                self.mark_disconnected();
            }
        }
    }

    /// Intermediate update within a stage. Never blocks.
    pub fn progress(&self, stage: Stage, percent: u32, message: impl Into<String>, counts: Counts) {
        if let Some(event) = self.apply(stage, percent, message.into(), Some(counts), None) {
            self.try_deliver(event);
        }
    }

    /// Update the counters carried by later events without emitting one.
    pub fn set_counts(&self, counts: Counts) {
        let mut state = self.lock();
        if !state.terminal {
            state.counts.processed = state.counts.processed.max(counts.processed);
            state.counts.emitted = state.counts.emitted.max(counts.emitted);
        }
    }

    pub async fn complete(&self, output_files: Vec<String>, message: impl Into<String>) {
        let finish = Some(Finish::Completed(output_files));
        if let Some(event) = self.apply(Stage::Completed, 100, message.into(), None, finish) {
            self.deliver(event, Delivery::Lossless).await;
        }
    }

    /// Terminal failure. Percent and counters keep their last values.
    pub async fn fail(&self, error: &TraceError) {
        let message = format!("Processing failed: {error}");
        let finish = Some(Finish::Failed(error));
        if let Some(event) = self.apply(Stage::Failed, 0, message, None, finish) {
            self.deliver(event, Delivery::Lossless).await;
        }
    }

    pub fn is_finished(&self) -> bool {
        self.lock().terminal
    }
}

enum Finish<'a> {
    Completed(Vec<String>),
    Failed(&'a TraceError),
}
