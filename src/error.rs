//! Error types shared by the parser, writers and the job engine.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::storage::StorageError;

/// Machine-readable error category carried on FAILED events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    InvalidRequest,
    FormatDetectionFailed,
    SourceNotFound,
    ParseFailure,
    ConversionFailure,
    UploadFailure,
    NotFound,
    Cancelled,
    Internal,
}

#[derive(Error, Debug)]
pub enum TraceError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("format detection failed: {0}")]
    FormatDetectionFailed(String),

    #[error("source not found: {0}")]
    SourceNotFound(String),

    #[error("parse failure: {0}")]
    ParseFailure(String),

    #[error("conversion failure: {0}")]
    ConversionFailure(String),

    #[error("upload failure: {0}")]
    UploadFailure(String),

    #[error("job not found: {0}")]
    NotFound(String),

    #[error("job cancelled: {0}")]
    Cancelled(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl TraceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TraceError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            TraceError::FormatDetectionFailed(_) => ErrorKind::FormatDetectionFailed,
            TraceError::SourceNotFound(_) => ErrorKind::SourceNotFound,
            TraceError::ParseFailure(_) => ErrorKind::ParseFailure,
            TraceError::ConversionFailure(_) => ErrorKind::ConversionFailure,
            TraceError::UploadFailure(_) => ErrorKind::UploadFailure,
            TraceError::NotFound(_) => ErrorKind::NotFound,
            TraceError::Cancelled(_) => ErrorKind::Cancelled,
            TraceError::Internal(_) => ErrorKind::Internal,
        }
    }
}

impl From<arrow::error::ArrowError> for TraceError {
    fn from(e: arrow::error::ArrowError) -> Self {
        TraceError::ConversionFailure(e.to_string())
    }
}

impl From<parquet::errors::ParquetError> for TraceError {
    fn from(e: parquet::errors::ParquetError) -> Self {
        TraceError::ConversionFailure(e.to_string())
    }
}

impl From<csv::Error> for TraceError {
    fn from(e: csv::Error) -> Self {
        TraceError::ConversionFailure(e.to_string())
    }
}

impl From<std::io::Error> for TraceError {
    fn from(e: std::io::Error) -> Self {
        TraceError::Internal(format!("I/O error: {e}"))
    }
}

impl From<StorageError> for TraceError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound(path) => TraceError::SourceNotFound(path),
            StorageError::Backend(msg) => TraceError::Internal(msg),
        }
    }
}

pub type Result<T> = std::result::Result<T, TraceError>;
