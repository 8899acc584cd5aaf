//! Trace family detection from a leading byte sample.

use crate::models::TraceType;
use crate::parsers::log_common::{categorize_line_fast, CsvHeader, LineCategory, BLKTRACE_CSV_HEADER};
use crate::utils::decode_bytes_auto;
use serde::{Deserialize, Serialize};

/// Default size of the sample handed to [`detect_format`].
pub const DEFAULT_SAMPLE_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DetectedFormat {
    Ufs,
    Block,
    Unknown,
}

impl DetectedFormat {
    pub fn trace_type(self) -> Option<TraceType> {
        match self {
            DetectedFormat::Ufs => Some(TraceType::Ufs),
            DetectedFormat::Block => Some(TraceType::Block),
            DetectedFormat::Unknown => None,
        }
    }
}

impl From<TraceType> for DetectedFormat {
    fn from(t: TraceType) -> Self {
        match t {
            TraceType::Ufs => DetectedFormat::Ufs,
            TraceType::Block => DetectedFormat::Block,
        }
    }
}

/// Decide which family a sample belongs to.
///
/// Pure function of the bytes: a header row naming record columns decides
/// immediately, otherwise every line is categorized and the family with
/// more matching lines wins. No match or a tie is `Unknown`.
pub fn detect_format(sample: &[u8]) -> DetectedFormat {
    let text = decode_bytes_auto(sample);

    let mut lines: Vec<&str> = text.lines().collect();
    // 샘플 경계에서 잘린 마지막 줄은 제외
    if lines.len() > 1 && !text.ends_with('\n') {
        lines.pop();
    }

    let first = lines
        .iter()
        .map(|l| l.trim_start_matches('\u{feff}'))
        .find(|l| {
            !matches!(
                categorize_line_fast(l),
                LineCategory::Empty | LineCategory::Comment
            )
        });
    if let Some(first) = first {
        if let Some(header) = CsvHeader::parse(first) {
            return header.family().into();
        }
        if first.trim() == BLKTRACE_CSV_HEADER {
            return DetectedFormat::Block;
        }
    }

    let (mut ufs, mut block) = (0usize, 0usize);
    for line in &lines {
        match categorize_line_fast(line).family() {
            Some(TraceType::Ufs) => ufs += 1,
            Some(TraceType::Block) => block += 1,
            None => {}
        }
    }

    match ufs.cmp(&block) {
        std::cmp::Ordering::Greater => DetectedFormat::Ufs,
        std::cmp::Ordering::Less => DetectedFormat::Block,
        std::cmp::Ordering::Equal => DetectedFormat::Unknown,
    }
}
