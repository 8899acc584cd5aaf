use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Record family processed by a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceType {
    Ufs,
    Block,
    // 여기에 새로운 트레이스 타입 추가 가능
    // 예: NVMe, F2FS, EXT4 등
}

impl FromStr for TraceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ufs" => Ok(TraceType::Ufs),
            "block" => Ok(TraceType::Block),
            _ => Err(format!("Unknown trace type: {s}")),
        }
    }
}

impl TraceType {
    // 표시 이름 반환
    pub fn display_name(&self) -> &'static str {
        match self {
            TraceType::Ufs => "UFS",
            TraceType::Block => "Block I/O",
        }
    }

    /// Short name used in artifact file names (`ufs.parquet`, `block.parquet`).
    pub fn file_stem(&self) -> &'static str {
        match self {
            TraceType::Ufs => "ufs",
            TraceType::Block => "block",
        }
    }
}

impl fmt::Display for TraceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.file_stem())
    }
}

/// The `log_type` a caller asks for: a fixed family, or detection from content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogTypeHint {
    #[default]
    Auto,
    Ufs,
    Block,
}

impl FromStr for LogTypeHint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "auto" => Ok(LogTypeHint::Auto),
            "ufs" => Ok(LogTypeHint::Ufs),
            "block" => Ok(LogTypeHint::Block),
            _ => Err(format!("log_type must be one of auto, ufs, block (got '{s}')")),
        }
    }
}

impl LogTypeHint {
    /// The family fixed by the hint, or `None` when detection is required.
    pub fn fixed(&self) -> Option<TraceType> {
        match self {
            LogTypeHint::Auto => None,
            LogTypeHint::Ufs => Some(TraceType::Ufs),
            LogTypeHint::Block => Some(TraceType::Block),
        }
    }
}
