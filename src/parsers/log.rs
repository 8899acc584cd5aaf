use crate::error::TraceError;
use crate::models::{LogRecord, TraceType};
use crate::parsers::log_common::{categorize_line_fast, parse_trace_line, CsvHeader, LineCategory};
use log::debug;
use std::io::BufRead;

/// Lines seen before the malformed ratio is enforced.
pub const MIN_LINES_FOR_THRESHOLD: u64 = 100;
pub const DEFAULT_MAX_MALFORMED_RATIO: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParserOptions {
    pub max_malformed_ratio: f64,
    pub min_lines_for_threshold: u64,
}

impl Default for ParserOptions {
    fn default() -> Self {
        ParserOptions {
            max_malformed_ratio: DEFAULT_MAX_MALFORMED_RATIO,
            min_lines_for_threshold: MIN_LINES_FOR_THRESHOLD,
        }
    }
}

/// Running counters of a parse.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParseStats {
    /// Records successfully parsed.
    pub records: u64,
    /// Lines that looked like events of the family but failed to parse.
    pub malformed: u64,
    /// Lines that are not events of the family (other ftrace events, comments, blanks).
    pub ignored: u64,
}

impl ParseStats {
    pub fn candidates(&self) -> u64 {
        self.records + self.malformed
    }

    /// Add the counters of another parse (e.g. the next file of a prefix).
    pub fn merge(&mut self, other: ParseStats) {
        self.records += other.records;
        self.malformed += other.malformed;
        self.ignored += other.ignored;
    }
}

/// Streaming parser over decoded trace text.
///
/// Yields one record per event line of the committed family, in input order.
/// After an error is yielded the iterator is fused.
pub struct LogParser<R: BufRead> {
    reader: R,
    family: TraceType,
    options: ParserOptions,
    csv_header: Option<CsvHeader>,
    // 헤더가 다른 family의 CSV이면 모든 행을 무시
    foreign_csv: bool,
    first_line_seen: bool,
    buffer: Vec<u8>,
    line_no: u64,
    bytes_read: u64,
    stats: ParseStats,
    done: bool,
}

impl<R: BufRead> LogParser<R> {
    pub fn new(reader: R, family: TraceType) -> Self {
        Self::with_options(reader, family, ParserOptions::default())
    }

    pub fn with_options(reader: R, family: TraceType, options: ParserOptions) -> Self {
        LogParser {
            reader,
            family,
            options,
            csv_header: None,
            foreign_csv: false,
            first_line_seen: false,
            buffer: Vec::with_capacity(512),
            line_no: 0,
            bytes_read: 0,
            stats: ParseStats::default(),
            done: false,
        }
    }

    pub fn family(&self) -> TraceType {
        self.family
    }

    pub fn stats(&self) -> ParseStats {
        self.stats
    }

    /// Decoded bytes consumed so far.
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// The input is a columnar CSV export that already carries latency fields.
    pub fn latency_in_source(&self) -> bool {
        self.csv_header
            .as_ref()
            .map_or(false, |header| header.has_latency())
    }

    // EOF이면 Ok(false)
    fn read_line(&mut self) -> std::io::Result<bool> {
        self.buffer.clear();
        let n = self.reader.read_until(b'\n', &mut self.buffer)?;
        if n == 0 {
            return Ok(false);
        }
        self.bytes_read += n as u64;
        self.line_no += 1;
        while matches!(self.buffer.last(), Some(b'\n' | b'\r')) {
            self.buffer.pop();
        }
        Ok(true)
    }

    fn parse_current(&mut self) -> Result<Option<LogRecord>, &'static str> {
        let decoded = String::from_utf8_lossy(&self.buffer);
        let line = decoded.trim_start_matches('\u{feff}');

        if !self.first_line_seen {
            if matches!(
                categorize_line_fast(line),
                LineCategory::Empty | LineCategory::Comment
            ) {
                return Ok(None);
            }
            self.first_line_seen = true;
            if let Some(header) = CsvHeader::parse(line) {
                if header.family() == self.family {
                    self.csv_header = Some(header);
                } else {
                    self.foreign_csv = true;
                }
                return Ok(None);
            }
        }

        if self.foreign_csv {
            return Ok(None);
        }

        match &self.csv_header {
            Some(header) => {
                if line.trim().is_empty() {
                    Ok(None)
                } else {
                    header.parse_row(line).map(Some)
                }
            }
            None => parse_trace_line(line, self.family),
        }
    }

    fn over_threshold(&self) -> bool {
        let candidates = self.stats.candidates();
        candidates >= self.options.min_lines_for_threshold
            && self.stats.malformed as f64 / candidates as f64 > self.options.max_malformed_ratio
    }

    fn fail(&mut self, message: String) -> Option<Result<LogRecord, TraceError>> {
        self.done = true;
        Some(Err(TraceError::ParseFailure(message)))
    }
}

impl<R: BufRead> Iterator for LogParser<R> {
    type Item = Result<LogRecord, TraceError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        loop {
            match self.read_line() {
                Ok(true) => {}
                Ok(false) => {
                    self.done = true;
                    if self.stats.records == 0 && self.stats.malformed > 0 {
                        let malformed = self.stats.malformed;
                        return self.fail(format!(
                            "no parsable {} records ({malformed} malformed lines)",
                            self.family.display_name()
                        ));
                    }
                    return None;
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e.into()));
                }
            }

            match self.parse_current() {
                Ok(Some(record)) => {
                    self.stats.records += 1;
                    return Some(Ok(record));
                }
                Ok(None) => self.stats.ignored += 1,
                Err(reason) => {
                    self.stats.malformed += 1;
                    debug!("line {}: {reason}", self.line_no);
                    if self.over_threshold() {
                        let ParseStats {
                            records, malformed, ..
                        } = self.stats;
                        return self.fail(format!(
                            "too many malformed lines: {malformed} of {} (records: {records})",
                            records + malformed
                        ));
                    }
                }
            }
        }
    }
}
