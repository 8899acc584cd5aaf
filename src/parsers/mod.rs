pub mod detect;
pub mod log;
pub mod log_common;

pub use detect::{detect_format, DetectedFormat, DEFAULT_SAMPLE_BYTES};
pub use log::{LogParser, ParseStats, ParserOptions};
