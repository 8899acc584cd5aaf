use super::pipeline::{run_convert_to_csv, run_process_logs, JobContext};
use super::progress::ProgressReporter;
use super::registry::JobRegistry;
use super::request::{ConvertToCsvRequest, JobRequest, ProcessLogsRequest};
use super::status::{JobKind, JobStatus, ProgressEvent, Stage};
use crate::config::EngineConfig;
use crate::error::{Result, TraceError};
use crate::storage::ObjectStore;
use log::{info, warn};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, Semaphore};
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

/// A submitted job: its id and its progress stream.
///
/// The stream ends after the terminal event. Dropping it does not stop the job.
pub struct JobHandle {
    pub job_id: String,
    pub events: ReceiverStream<ProgressEvent>,
}

impl fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobHandle").field("job_id", &self.job_id).finish()
    }
}

type CancelFlags = Arc<Mutex<HashMap<String, Arc<AtomicBool>>>>;

fn lock_flags(flags: &Mutex<HashMap<String, Arc<AtomicBool>>>) -> MutexGuard<'_, HashMap<String, Arc<AtomicBool>>> {
    flags.lock().unwrap_or_else(|e| e.into_inner())
}

/// Accepts jobs, runs them on the tokio runtime and answers status queries.
///
/// Job-starting methods spawn tasks and must be called from within a tokio
/// runtime.
#[derive(Clone)]
pub struct JobManager {
    config: Arc<EngineConfig>,
    store: Arc<dyn ObjectStore>,
    registry: Arc<JobRegistry>,
    slots: Arc<Semaphore>,
    cancel_flags: CancelFlags,
}

impl JobManager {
    pub fn new(config: EngineConfig, store: Arc<dyn ObjectStore>) -> Result<Self> {
        config.validate()?;
        info!(
            "Job manager ready: {} worker slot(s), scratch dir {}",
            config.max_concurrent_jobs,
            config.scratch_dir.display()
        );
        Ok(JobManager {
            registry: Arc::new(JobRegistry::new(config.max_retained_jobs)),
            slots: Arc::new(Semaphore::new(config.max_concurrent_jobs)),
            config: Arc::new(config),
            store,
            cancel_flags: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn process_logs(&self, request: ProcessLogsRequest) -> Result<JobHandle> {
        request.validate()?;
        Ok(self.spawn(JobKind::ProcessLogs, move |ctx| run_process_logs(ctx, request)))
    }

    pub fn convert_to_csv(&self, request: ConvertToCsvRequest) -> Result<JobHandle> {
        request.validate()?;
        Ok(self.spawn(JobKind::ConvertToCsv, move |ctx| run_convert_to_csv(ctx, request)))
    }

    pub fn submit(&self, request: JobRequest) -> Result<JobHandle> {
        match request {
            JobRequest::ProcessLogs(req) => self.process_logs(req),
            JobRequest::ConvertToCsv(req) => self.convert_to_csv(req),
        }
    }

    fn spawn<F, Fut>(&self, kind: JobKind, run: F) -> JobHandle
    where
        F: FnOnce(JobContext) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let job_id = Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::channel(self.config.event_buffer);

        // 초기 상태 저장 (슬롯 대기)
        let queued = JobStatus::queued(&job_id, kind);
        let waiting = queued.message.clone();
        self.registry.update(queued);

        let cancel = Arc::new(AtomicBool::new(false));
        lock_flags(&self.cancel_flags).insert(job_id.clone(), cancel.clone());

        let ctx = JobContext {
            job_id: job_id.clone(),
            config: self.config.clone(),
            store: self.store.clone(),
            reporter: ProgressReporter::new(&job_id, kind, tx, self.registry.clone()),
            cancel,
        };
        let slots = self.slots.clone();
        let flags = self.cancel_flags.clone();
        let id = job_id.clone();

        tokio::spawn(async move {
            let reporter = ctx.reporter.clone();
            reporter.stage(Stage::Downloading, 0, waiting).await;

            match slots.acquire_owned().await {
                Ok(_permit) => {
                    if ctx.cancel.load(Ordering::SeqCst) {
                        reporter
                            .fail(&TraceError::Cancelled(format!("job {id} was cancelled before it started")))
                            .await;
                    } else {
                        run(ctx).await;
                    }
                }
                Err(e) => {
                    reporter
                        .fail(&TraceError::Internal(format!("worker pool closed: {e}")))
                        .await;
                }
            }
            lock_flags(&flags).remove(&id);
        });

        info!("Job {job_id} ({kind:?}) accepted");
        JobHandle {
            job_id,
            events: ReceiverStream::new(rx),
        }
    }

    pub fn get_status(&self, job_id: &str) -> Result<JobStatus> {
        self.registry
            .get(job_id)
            .ok_or_else(|| TraceError::NotFound(job_id.to_string()))
    }

    /// Object keys under `prefix`, sorted.
    pub async fn list_files(&self, bucket: &str, prefix: &str) -> Result<Vec<String>> {
        if bucket.trim().is_empty() {
            return Err(TraceError::InvalidRequest("bucket must not be empty".into()));
        }
        let mut files = self.store.list(bucket, prefix).await?;
        files.sort();
        Ok(files)
    }

    /// Ask a running job to stop. Returns false if the job already finished.
    pub fn cancel(&self, job_id: &str) -> Result<bool> {
        // 종료 이벤트 이후 플래그 제거 전까지의 구간도 완료로 취급
        match self.registry.get(job_id) {
            Some(status) if status.is_completed => return Ok(false),
            Some(_) => {}
            None => return Err(TraceError::NotFound(job_id.to_string())),
        }
        match lock_flags(&self.cancel_flags).get(job_id) {
            Some(flag) => {
                flag.store(true, Ordering::SeqCst);
                warn!("Job {job_id} cancellation requested");
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
