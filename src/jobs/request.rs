use crate::error::{Result, TraceError};
use crate::models::LogTypeHint;
use crate::utils::FilterOptions;
use serde::{Deserialize, Serialize};

pub const DEFAULT_CHUNK_SIZE: u32 = 100_000;

fn default_chunk_size() -> u32 {
    DEFAULT_CHUNK_SIZE
}

fn default_log_type() -> String {
    "auto".to_string()
}

/// Convert a trace log (or every object under a prefix) to Parquet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessLogsRequest {
    pub source_bucket: String,
    pub source_path: String,
    pub target_bucket: String,
    pub target_path: String,
    /// `auto`, `ufs` or `block`.
    #[serde(default = "default_log_type")]
    pub log_type: String,
    /// Records per parse chunk. Chunks are capped at one million records.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u32,
    #[serde(default)]
    pub filter_options: Option<FilterOptions>,
}

/// Re-export Parquet artifacts as CSV.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvertToCsvRequest {
    pub source_bucket: String,
    /// One `.parquet` object, or a prefix holding several.
    pub source_parquet_path: String,
    pub target_bucket: String,
    pub target_csv_path: String,
    #[serde(default)]
    pub csv_prefix: Option<String>,
    #[serde(default)]
    pub filter_options: Option<FilterOptions>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobRequest {
    ProcessLogs(ProcessLogsRequest),
    ConvertToCsv(ConvertToCsvRequest),
}

fn require(name: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(TraceError::InvalidRequest(format!("{name} must not be empty")));
    }
    Ok(())
}

fn check_filter(filter: Option<&FilterOptions>) -> Result<()> {
    match filter {
        Some(filter) => filter.validate().map_err(TraceError::InvalidRequest),
        None => Ok(()),
    }
}

impl ProcessLogsRequest {
    pub fn validate(&self) -> Result<()> {
        require("source_bucket", &self.source_bucket)?;
        require("source_path", &self.source_path)?;
        require("target_bucket", &self.target_bucket)?;
        require("target_path", &self.target_path)?;
        if self.chunk_size == 0 {
            return Err(TraceError::InvalidRequest("chunk_size must be positive".into()));
        }
        self.log_type_hint()?;
        check_filter(self.filter_options.as_ref())
    }

    pub fn log_type_hint(&self) -> Result<LogTypeHint> {
        self.log_type.parse().map_err(TraceError::InvalidRequest)
    }

    /// Filter in effect; an empty filter passes everything.
    pub fn filter(&self) -> FilterOptions {
        self.filter_options.clone().unwrap_or_default()
    }
}

impl ConvertToCsvRequest {
    pub fn validate(&self) -> Result<()> {
        require("source_bucket", &self.source_bucket)?;
        require("source_parquet_path", &self.source_parquet_path)?;
        require("target_bucket", &self.target_bucket)?;
        require("target_csv_path", &self.target_csv_path)?;
        check_filter(self.filter_options.as_ref())
    }

    pub fn filter(&self) -> FilterOptions {
        self.filter_options.clone().unwrap_or_default()
    }

    pub fn prefix(&self) -> Option<&str> {
        self.csv_prefix.as_deref().filter(|p| !p.is_empty())
    }
}

impl JobRequest {
    pub fn validate(&self) -> Result<()> {
        match self {
            JobRequest::ProcessLogs(req) => req.validate(),
            JobRequest::ConvertToCsv(req) => req.validate(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn logs_request() -> ProcessLogsRequest {
        ProcessLogsRequest {
            source_bucket: "trace-logs".into(),
            source_path: "logs/trace.csv".into(),
            target_bucket: "trace-parquet".into(),
            target_path: "output/data".into(),
            log_type: "ufs".into(),
            chunk_size: 100_000,
            filter_options: None,
        }
    }

    #[test]
    fn test_process_logs_validation() {
        assert!(logs_request().validate().is_ok());

        let mut req = logs_request();
        req.source_path = "  ".into();
        assert_eq!(req.validate().unwrap_err().kind(), ErrorKind::InvalidRequest);

        let mut req = logs_request();
        req.chunk_size = 0;
        assert!(req.validate().is_err());

        let mut req = logs_request();
        req.log_type = "nvme".into();
        assert!(req.validate().is_err());

        let mut req = logs_request();
        req.filter_options = Some(FilterOptions {
            min_dtoc: Some(5.0),
            max_dtoc: Some(1.0),
            ..Default::default()
        });
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_request_defaults_from_json() {
        let req: JobRequest = serde_json::from_str(
            r#"{"type":"process_logs","source_bucket":"a","source_path":"b",
                "target_bucket":"c","target_path":"d"}"#,
        )
        .unwrap();
        match req {
            JobRequest::ProcessLogs(req) => {
                assert_eq!(req.chunk_size, DEFAULT_CHUNK_SIZE);
                assert_eq!(req.log_type_hint().unwrap(), LogTypeHint::Auto);
                assert!(!req.filter().is_active());
            }
            other => panic!("unexpected request: {other:?}"),
        }
    }

    #[test]
    fn test_chunk_size_beyond_u32_is_rejected() {
        let parsed: std::result::Result<ProcessLogsRequest, _> = serde_json::from_str(
            r#"{"source_bucket":"a","source_path":"b","target_bucket":"c",
                "target_path":"d","chunk_size":4294967296}"#,
        );
        assert!(parsed.is_err());
    }

    #[test]
    fn test_csv_prefix_empty_means_none() {
        let req = ConvertToCsvRequest {
            source_bucket: "trace-parquet".into(),
            source_parquet_path: "output/data/ufs.parquet".into(),
            target_bucket: "trace-csv".into(),
            target_csv_path: "csv".into(),
            csv_prefix: Some(String::new()),
            filter_options: None,
        };
        assert!(req.validate().is_ok());
        assert_eq!(req.prefix(), None);
    }
}
