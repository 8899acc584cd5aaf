//! Engine configuration.

use crate::error::{Result, TraceError};
use crate::output::DEFAULT_PARTITION_ROWS;
use crate::parsers::log::DEFAULT_MAX_MALFORMED_RATIO;
use crate::parsers::DEFAULT_SAMPLE_BYTES;
use crate::processors::{DEFAULT_MAX_PENDING, DEFAULT_REORDER_WINDOW};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const DEFAULT_EVENT_BUFFER: usize = 16;
pub const DEFAULT_MAX_RETAINED_JOBS: usize = 10_000;
pub const DEFAULT_PIPELINE_DEPTH: usize = 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Per-job scratch directories are created under this path.
    pub scratch_dir: PathBuf,
    pub max_concurrent_jobs: usize,
    /// Capacity of each job's progress channel.
    pub event_buffer: usize,
    /// Finished jobs kept in the registry before the oldest are evicted.
    pub max_retained_jobs: usize,
    pub partition_rows: u64,
    pub detect_sample_bytes: usize,
    pub max_malformed_ratio: f64,
    /// Parsed chunks that may wait for the writer.
    pub pipeline_depth: usize,
    /// Records held to put interleaved sources back in time order; 0 disables it.
    pub reorder_window: usize,
    /// Block issues awaiting completion before the oldest is dropped.
    pub max_pending_requests: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            scratch_dir: std::env::temp_dir().join("trace-jobs"),
            max_concurrent_jobs: num_cpus::get(),
            event_buffer: DEFAULT_EVENT_BUFFER,
            max_retained_jobs: DEFAULT_MAX_RETAINED_JOBS,
            partition_rows: DEFAULT_PARTITION_ROWS,
            detect_sample_bytes: DEFAULT_SAMPLE_BYTES,
            max_malformed_ratio: DEFAULT_MAX_MALFORMED_RATIO,
            pipeline_depth: DEFAULT_PIPELINE_DEPTH,
            reorder_window: DEFAULT_REORDER_WINDOW,
            max_pending_requests: DEFAULT_MAX_PENDING,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| TraceError::InvalidRequest(format!("{name}: cannot parse '{raw}'"))),
        Err(_) => Ok(None),
    }
}

impl EngineConfig {
    /// Defaults overridden by `TRACE_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let mut config = EngineConfig::default();
        if let Ok(dir) = std::env::var("TRACE_SCRATCH_DIR") {
            config.scratch_dir = PathBuf::from(dir);
        }
        if let Some(v) = env_parse("TRACE_MAX_JOBS")? {
            config.max_concurrent_jobs = v;
        }
        if let Some(v) = env_parse("TRACE_EVENT_BUFFER")? {
            config.event_buffer = v;
        }
        if let Some(v) = env_parse("TRACE_MAX_RETAINED_JOBS")? {
            config.max_retained_jobs = v;
        }
        if let Some(v) = env_parse("TRACE_PARTITION_ROWS")? {
            config.partition_rows = v;
        }
        if let Some(v) = env_parse("TRACE_REORDER_WINDOW")? {
            config.reorder_window = v;
        }
        config.validate()?;
        Ok(config)
    }

    /// Parse a JSON document; missing fields keep their defaults.
    pub fn from_json(text: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(text)
            .map_err(|e| TraceError::InvalidRequest(format!("engine config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("max_concurrent_jobs", self.max_concurrent_jobs),
            ("event_buffer", self.event_buffer),
            ("max_retained_jobs", self.max_retained_jobs),
            ("detect_sample_bytes", self.detect_sample_bytes),
            ("pipeline_depth", self.pipeline_depth),
            ("max_pending_requests", self.max_pending_requests),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, v)| *v == 0) {
            return Err(TraceError::InvalidRequest(format!("{name} must be positive")));
        }
        if self.partition_rows == 0 {
            return Err(TraceError::InvalidRequest("partition_rows must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.max_malformed_ratio) {
            return Err(TraceError::InvalidRequest(
                "max_malformed_ratio must be within [0, 1]".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.event_buffer, 16);
        assert_eq!(config.max_retained_jobs, 10_000);
        assert_eq!(config.partition_rows, 1_000_000);
        assert_eq!(config.detect_sample_bytes, 64 * 1024);
        assert_eq!(config.reorder_window, 65_536);
    }

    #[test]
    fn test_from_json_keeps_missing_defaults() {
        let config =
            EngineConfig::from_json(r#"{"max_concurrent_jobs": 2, "partition_rows": 500}"#).unwrap();
        assert_eq!(config.max_concurrent_jobs, 2);
        assert_eq!(config.partition_rows, 500);
        assert_eq!(config.pipeline_depth, DEFAULT_PIPELINE_DEPTH);

        assert!(EngineConfig::from_json(r#"{"event_buffer": 0}"#).is_err());
        assert!(EngineConfig::from_json("not json").is_err());
    }
}
