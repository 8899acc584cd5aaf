pub mod config;
pub mod error;
pub mod jobs;
pub mod models;
pub mod output;
pub mod parsers;
pub mod processors;
pub mod storage;
pub mod utils;

// 주요 기능 재내보내기(re-exporting)
pub use config::EngineConfig;
pub use error::{ErrorKind, Result, TraceError};
pub use jobs::{
    ConvertToCsvRequest, JobHandle, JobKind, JobManager, JobRequest, JobStatus, ProcessLogsRequest,
    ProgressEvent, Stage,
};
pub use models::{Block, LogRecord, LogTypeHint, TraceItem, TraceType, Ufs};
pub use parsers::{detect_format, DetectedFormat, LogParser};
pub use storage::{MemoryStore, MinioConfig, MinioStore, ObjectStore, StorageError};
pub use utils::FilterOptions;
