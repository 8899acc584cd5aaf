// Line-level parsing shared by the format detector and the streaming parser

use crate::models::{Block, LogRecord, TraceType, Ufs};
use crate::utils::constants::{MAX_VALID_UFS_LBA, UFS_BLOCK_BYTES, UFS_DEBUG_LBA};
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    pub static ref UFS_RE: Regex = Regex::new(r"^\s*(?P<process>.*?)\s+\[(?P<cpu>[0-9]+)\].*?(?P<time>[0-9]+\.[0-9]+):\s+ufshcd_command:\s+(?P<command>send_req|complete_rsp):.*?tag:\s*(?P<tag>\d+).*?size:\s*(?P<size>[-]?\d+).*?LBA:\s*(?P<lba>\d+).*?opcode:\s*(?P<opcode>0x[0-9a-f]+).*?group_id:\s*0x(?P<group_id>[0-9a-f]+).*?hwq_id:\s*(?P<hwq_id>[-]?\d+)").unwrap();
    pub static ref BLOCK_RE: Regex = Regex::new(r"^\s*(?P<process>.*?)\s+\[(?P<cpu>\d+)\]\s+(?P<flags>.+?)\s+(?P<time>[\d\.]+):\s+(?P<action>\S+):\s+(?P<devmajor>\d+),(?P<devminor>\d+)\s+(?P<io_type>[A-Z]+)(?:\s+(?P<extra>\d+))?\s+\(\)\s+(?P<sector>\d+)\s+\+\s+(?P<size>\d+)(?:\s+\S+)?\s+\[(?P<comm>.*?)\]$").unwrap();
    pub static ref BLKTRACE_CSV_RE: Regex = Regex::new(r"^(?P<time>[\d\.]+),(?P<cpu>\d+),(?P<major>\d+),(?P<minor>\d+),(?P<pid>\d+),(?P<action>[A-Z]),(?P<rwds>[A-Z]*),(?P<sector>\d+),(?P<size>\d+),(?P<comm>.*)$").unwrap();

    // regex 전에 수행하는 빠른 분류용 패턴
    static ref UFS_QUICK_CHECK: Regex = Regex::new(r"ufshcd_command:").unwrap();
    static ref BLOCK_QUICK_CHECK: Regex = Regex::new(r"\s(block_rq_\w+|blk_\w+):\s").unwrap();
    static ref BLKTRACE_CSV_QUICK_CHECK: Regex = Regex::new(r"^\d+\.\d+,\d+,\d+,\d+,\d+,[A-Z],[A-Z]*,\d+,\d+,").unwrap();
}

pub const BLKTRACE_CSV_HEADER: &str = "time,cpu,major,minor,pid,action,rwds,sector,size,comm";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineCategory {
    Ufs,
    Block,
    BlktraceCsv,
    Empty,
    Comment,
    Unknown,
}

impl LineCategory {
    /// Family a line of this category belongs to, if any.
    pub fn family(self) -> Option<TraceType> {
        match self {
            LineCategory::Ufs => Some(TraceType::Ufs),
            LineCategory::Block | LineCategory::BlktraceCsv => Some(TraceType::Block),
            _ => None,
        }
    }
}

// Fast pattern matching for line categorization
pub fn categorize_line_fast(line: &str) -> LineCategory {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return LineCategory::Empty;
    }
    if trimmed.starts_with('#') || trimmed.starts_with("//") {
        return LineCategory::Comment;
    }

    if UFS_QUICK_CHECK.is_match(line) {
        return LineCategory::Ufs;
    }
    if BLKTRACE_CSV_QUICK_CHECK.is_match(line) {
        return LineCategory::BlktraceCsv;
    }
    if BLOCK_QUICK_CHECK.is_match(line) {
        return LineCategory::Block;
    }

    LineCategory::Unknown
}

// Debug 또는 비정상적으로 큰 LBA 값은 0으로 처리
#[inline]
fn normalize_lba(raw_lba: u64) -> u64 {
    if raw_lba == UFS_DEBUG_LBA || raw_lba > MAX_VALID_UFS_LBA {
        0
    } else {
        raw_lba
    }
}

// Parse UFS event from a line
pub fn parse_ufs_event(line: &str) -> Result<Ufs, &'static str> {
    let caps = UFS_RE
        .captures(line)
        .ok_or("Line does not match UFS pattern")?;

    let lba = normalize_lba(caps["lba"].parse().map_err(|_| "invalid UFS LBA")?);
    let raw_size = caps["size"]
        .parse::<i64>()
        .map_err(|_| "invalid UFS size")?
        .unsigned_abs();

    // bytes -> 4KB 단위
    let size = (raw_size as f64 / UFS_BLOCK_BYTES).ceil() as u32;

    Ok(Ufs {
        time: caps["time"].parse().map_err(|_| "invalid UFS timestamp")?,
        process: caps["process"].trim().to_string(),
        cpu: caps["cpu"].parse().unwrap_or(0),
        action: caps["command"].to_string(),
        tag: caps["tag"].parse().unwrap_or(0),
        opcode: caps["opcode"].to_string(),
        lba,
        size,
        groupid: u32::from_str_radix(&caps["group_id"], 16).unwrap_or(0),
        hwqid: caps["hwq_id"].parse().unwrap_or(0),
        aligned: crate::utils::is_ufs_aligned(lba),
        ..Default::default()
    })
}

// Parse Block IO event from a line
pub fn parse_block_io_event(line: &str) -> Result<Block, &'static str> {
    let caps = BLOCK_RE
        .captures(line)
        .ok_or("Line does not match Block IO pattern")?;

    let sector: u64 = caps["sector"].parse().map_err(|_| "invalid sector")?;

    Ok(Block {
        time: caps["time"].parse().map_err(|_| "invalid block timestamp")?,
        process: caps["process"].trim().to_string(),
        cpu: caps["cpu"].parse().unwrap_or(0),
        flags: caps["flags"].to_string(),
        action: caps["action"].to_string(),
        devmajor: caps["devmajor"].parse().unwrap_or(0),
        devminor: caps["devminor"].parse().unwrap_or(0),
        io_type: caps["io_type"].to_string(),
        extra: caps
            .name("extra")
            .map_or(0, |m| m.as_str().parse().unwrap_or(0)),
        sector,
        size: caps["size"].parse().map_err(|_| "invalid block size")?,
        comm: caps["comm"].to_string(),
        aligned: crate::utils::is_block_aligned(sector),
        ..Default::default()
    })
}

// Parse blktrace CSV format block event from a line
// Format: time,cpu,major,minor,pid,action,rwds,sector,size,comm
pub fn parse_blktrace_csv_event(line: &str) -> Result<Block, &'static str> {
    let caps = BLKTRACE_CSV_RE
        .captures(line)
        .ok_or("Line does not match blktrace CSV pattern")?;

    let sector: u64 = caps["sector"].parse().map_err(|_| "invalid sector")?;

    Ok(Block {
        time: caps["time"].parse().map_err(|_| "invalid blktrace timestamp")?,
        process: caps["pid"].to_string(), // PID를 process 식별자로 사용
        cpu: caps["cpu"].parse().unwrap_or(0),
        action: caps["action"].to_string(),
        devmajor: caps["major"].parse().unwrap_or(0),
        devminor: caps["minor"].parse().unwrap_or(0),
        io_type: caps["rwds"].to_string(),
        sector,
        size: caps["size"].parse().map_err(|_| "invalid block size")?,
        comm: caps["comm"].to_string(),
        aligned: crate::utils::is_block_aligned(sector),
        ..Default::default()
    })
}

/// Parse a raw trace line of the committed family.
///
/// `Ok(None)` means the line is not an event of this family at all (another
/// ftrace event, a header, a comment). `Err` means it looked like one but
/// could not be parsed.
pub fn parse_trace_line(line: &str, family: TraceType) -> Result<Option<LogRecord>, &'static str> {
    match (categorize_line_fast(line), family) {
        (LineCategory::Ufs, TraceType::Ufs) => parse_ufs_event(line).map(|u| Some(LogRecord::Ufs(u))),
        (LineCategory::Block, TraceType::Block) => {
            parse_block_io_event(line).map(|b| Some(LogRecord::Block(b)))
        }
        (LineCategory::BlktraceCsv, TraceType::Block) => {
            parse_blktrace_csv_event(line).map(|b| Some(LogRecord::Block(b)))
        }
        _ => Ok(None),
    }
}

/// Split one CSV line into fields, honouring quotes.
pub fn split_csv_line(line: &str) -> Option<csv::StringRecord> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(line.as_bytes());
    let mut record = csv::StringRecord::new();
    match reader.read_record(&mut record) {
        Ok(true) => Some(record),
        _ => None,
    }
}

const UFS_COLUMNS: [&str; 16] = [
    "time", "process", "cpu", "action", "tag", "opcode", "lba", "size", "groupid", "hwqid", "qd",
    "dtoc", "ctoc", "ctod", "continuous", "aligned",
];

const BLOCK_COLUMNS: [&str; 18] = [
    "time", "process", "cpu", "flags", "action", "devmajor", "devminor", "io_type", "extra",
    "sector", "size", "comm", "qd", "dtoc", "ctoc", "ctod", "continuous", "aligned",
];

/// Column layout of a headed CSV export: maps each known field to its position.
#[derive(Debug, Clone)]
pub struct CsvHeader {
    family: TraceType,
    positions: Vec<Option<usize>>,
}

impl CsvHeader {
    /// Recognize a header row. UFS needs `time,lba,opcode`, block needs
    /// `time,sector,io_type`; anything else is not a columnar export.
    pub fn parse(line: &str) -> Option<CsvHeader> {
        let fields = split_csv_line(line)?;
        let names: Vec<String> = fields.iter().map(|f| f.trim().to_lowercase()).collect();
        let has = |col: &str| names.iter().any(|n| n == col);

        let family = if has("time") && has("lba") && has("opcode") {
            TraceType::Ufs
        } else if has("time") && has("sector") && has("io_type") {
            TraceType::Block
        } else {
            return None;
        };

        let columns: &[&str] = match family {
            TraceType::Ufs => &UFS_COLUMNS,
            TraceType::Block => &BLOCK_COLUMNS,
        };
        let positions = columns
            .iter()
            .map(|col| names.iter().position(|n| n == col))
            .collect();

        Some(CsvHeader { family, positions })
    }

    pub fn family(&self) -> TraceType {
        self.family
    }

    /// The file already carries latency columns, so they must not be re-derived.
    pub fn has_latency(&self) -> bool {
        self.position("dtoc").is_some()
    }

    fn position(&self, column: &str) -> Option<usize> {
        let columns: &[&str] = match self.family {
            TraceType::Ufs => &UFS_COLUMNS,
            TraceType::Block => &BLOCK_COLUMNS,
        };
        columns
            .iter()
            .position(|c| *c == column)
            .and_then(|i| self.positions[i])
    }

    pub fn parse_row(&self, line: &str) -> Result<LogRecord, &'static str> {
        let fields = split_csv_line(line).ok_or("unreadable CSV row")?;
        let row = Row {
            header: self,
            fields: &fields,
        };

        match self.family {
            TraceType::Ufs => {
                let lba = normalize_lba(row.required("lba")?);
                Ok(LogRecord::Ufs(Ufs {
                    time: row.required("time")?,
                    process: row.text("process"),
                    cpu: row.optional("cpu")?,
                    action: row.text("action"),
                    tag: row.optional("tag")?,
                    opcode: row.text("opcode"),
                    lba,
                    size: row.optional("size")?,
                    groupid: row.optional("groupid")?,
                    hwqid: row.optional("hwqid")?,
                    qd: row.optional("qd")?,
                    dtoc: row.optional("dtoc")?,
                    ctoc: row.optional("ctoc")?,
                    ctod: row.optional("ctod")?,
                    continuous: row.flag("continuous")?,
                    aligned: match self.position("aligned") {
                        Some(_) => row.flag("aligned")?,
                        None => crate::utils::is_ufs_aligned(lba),
                    },
                }))
            }
            TraceType::Block => {
                let sector = row.required("sector")?;
                Ok(LogRecord::Block(Block {
                    time: row.required("time")?,
                    process: row.text("process"),
                    cpu: row.optional("cpu")?,
                    flags: row.text("flags"),
                    action: row.text("action"),
                    devmajor: row.optional("devmajor")?,
                    devminor: row.optional("devminor")?,
                    io_type: row.text("io_type"),
                    extra: row.optional("extra")?,
                    sector,
                    size: row.optional("size")?,
                    comm: row.text("comm"),
                    qd: row.optional("qd")?,
                    dtoc: row.optional("dtoc")?,
                    ctoc: row.optional("ctoc")?,
                    ctod: row.optional("ctod")?,
                    continuous: row.flag("continuous")?,
                    aligned: match self.position("aligned") {
                        Some(_) => row.flag("aligned")?,
                        None => crate::utils::is_block_aligned(sector),
                    },
                }))
            }
        }
    }
}

struct Row<'a> {
    header: &'a CsvHeader,
    fields: &'a csv::StringRecord,
}

impl Row<'_> {
    fn raw(&self, column: &str) -> Option<&str> {
        self.header
            .position(column)
            .and_then(|i| self.fields.get(i))
            .map(str::trim)
    }

    fn required<T: std::str::FromStr>(&self, column: &str) -> Result<T, &'static str> {
        self.raw(column)
            .filter(|v| !v.is_empty())
            .ok_or("missing required column value")?
            .parse()
            .map_err(|_| "invalid numeric value")
    }

    fn optional<T: std::str::FromStr + Default>(&self, column: &str) -> Result<T, &'static str> {
        match self.raw(column) {
            None | Some("") => Ok(T::default()),
            Some(v) => v.parse().map_err(|_| "invalid numeric value"),
        }
    }

    fn text(&self, column: &str) -> String {
        self.raw(column).unwrap_or("").to_string()
    }

    fn flag(&self, column: &str) -> Result<bool, &'static str> {
        match self.raw(column) {
            None | Some("") => Ok(false),
            Some(v) if v.eq_ignore_ascii_case("true") || v == "1" => Ok(true),
            Some(v) if v.eq_ignore_ascii_case("false") || v == "0" => Ok(false),
            Some(_) => Err("invalid boolean value"),
        }
    }
}
