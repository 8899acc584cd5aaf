use crate::error::ErrorKind;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which pipeline a job runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    ProcessLogs,
    ConvertToCsv,
}

/// Pipeline stage. CSV jobs never enter `Parsing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    Unknown,
    Downloading,
    Parsing,
    Converting,
    Uploading,
    Completed,
    Failed,
}

impl Stage {
    /// Wire code of the stage for a job kind.
    ///
    /// Log processing: 0 unknown, 1 downloading, 2 parsing, 3 converting,
    /// 4 uploading, 5 completed, 6 failed.
    /// CSV conversion: 0 unknown, 1 downloading, 2 converting, 3 uploading,
    /// 4 completed, 5 failed.
    pub fn code(self, kind: JobKind) -> i32 {
        match kind {
            JobKind::ProcessLogs => match self {
                Stage::Unknown => 0,
                Stage::Downloading => 1,
                Stage::Parsing => 2,
                Stage::Converting => 3,
                Stage::Uploading => 4,
                Stage::Completed => 5,
                Stage::Failed => 6,
            },
            JobKind::ConvertToCsv => match self {
                Stage::Unknown => 0,
                Stage::Downloading => 1,
                // CSV 변환에는 파싱 단계가 없음
                Stage::Parsing | Stage::Converting => 2,
                Stage::Uploading => 3,
                Stage::Completed => 4,
                Stage::Failed => 5,
            },
        }
    }

    pub fn from_code(kind: JobKind, code: i32) -> Option<Stage> {
        let stages: &[Stage] = match kind {
            JobKind::ProcessLogs => &[
                Stage::Unknown,
                Stage::Downloading,
                Stage::Parsing,
                Stage::Converting,
                Stage::Uploading,
                Stage::Completed,
                Stage::Failed,
            ],
            JobKind::ConvertToCsv => &[
                Stage::Unknown,
                Stage::Downloading,
                Stage::Converting,
                Stage::Uploading,
                Stage::Completed,
                Stage::Failed,
            ],
        };
        usize::try_from(code).ok().and_then(|i| stages.get(i).copied())
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Completed | Stage::Failed)
    }

    /// Position in the forward walk. Both terminal stages rank last.
    pub(crate) fn rank(self) -> u8 {
        match self {
            Stage::Unknown => 0,
            Stage::Downloading => 1,
            Stage::Parsing => 2,
            Stage::Converting => 3,
            Stage::Uploading => 4,
            Stage::Completed | Stage::Failed => 5,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Unknown => "UNKNOWN",
            Stage::Downloading => "DOWNLOADING",
            Stage::Parsing => "PARSING",
            Stage::Converting => "CONVERTING",
            Stage::Uploading => "UPLOADING",
            Stage::Completed => "COMPLETED",
            Stage::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// One update on a job's progress stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub job_id: String,
    pub kind: JobKind,
    pub stage: Stage,
    pub progress_percent: u32,
    pub message: String,
    /// Records scanned so far.
    pub records_processed: u64,
    /// Records written to the output after filtering.
    pub records_emitted: u64,
    /// Uploaded object keys; only set on COMPLETED.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub output_files: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

impl ProgressEvent {
    pub fn stage_code(&self) -> i32 {
        self.stage.code(self.kind)
    }

    pub fn is_terminal(&self) -> bool {
        self.stage.is_terminal()
    }
}

/// Last known state of a job, as returned by status polling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    pub job_id: String,
    pub kind: JobKind,
    pub stage: Stage,
    pub progress_percent: u32,
    pub message: String,
    pub records_processed: u64,
    pub records_emitted: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub output_files: Vec<String>,
    pub is_completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

impl JobStatus {
    /// Status of a job that has been accepted but has not run yet.
    pub fn queued(job_id: &str, kind: JobKind) -> Self {
        JobStatus {
            job_id: job_id.to_string(),
            kind,
            stage: Stage::Downloading,
            progress_percent: 0,
            message: "Waiting for a worker slot".to_string(),
            records_processed: 0,
            records_emitted: 0,
            output_files: Vec::new(),
            is_completed: false,
            success: None,
            error: None,
            error_kind: None,
        }
    }

    pub fn stage_code(&self) -> i32 {
        self.stage.code(self.kind)
    }
}

impl From<&ProgressEvent> for JobStatus {
    fn from(event: &ProgressEvent) -> Self {
        JobStatus {
            job_id: event.job_id.clone(),
            kind: event.kind,
            stage: event.stage,
            progress_percent: event.progress_percent,
            message: event.message.clone(),
            records_processed: event.records_processed,
            records_emitted: event.records_emitted,
            output_files: event.output_files.clone(),
            is_completed: event.stage.is_terminal(),
            success: event.success,
            error: event.error.clone(),
            error_kind: event.error_kind,
        }
    }
}
