//! Job engine: requests, progress events, the registry and the pipelines.

mod manager;
mod pipeline;
pub mod progress;
pub mod registry;
pub mod request;
pub mod status;

pub use manager::{JobHandle, JobManager};
pub use progress::{Counts, ProgressReporter};
pub use registry::JobRegistry;
pub use request::{ConvertToCsvRequest, JobRequest, ProcessLogsRequest, DEFAULT_CHUNK_SIZE};
pub use status::{JobKind, JobStatus, ProgressEvent, Stage};
