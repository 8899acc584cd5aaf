use chrono::Local;
use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

/// Console logger that mirrors every line into an optional log file.
///
/// Info and below go to stdout, warnings and errors to stderr. Installed once
/// per process through [`Logger::init`]; later calls return the `log` crate's
/// `SetLoggerError`.
pub struct Logger {
    level: LevelFilter,
    file: Mutex<Option<File>>,
}

impl Logger {
    pub fn new(level: LevelFilter, log_path: Option<&Path>) -> Self {
        let file = log_path.and_then(open_log_file);
        Logger {
            level,
            file: Mutex::new(file),
        }
    }

    pub fn init(level: LevelFilter, log_path: Option<&Path>) -> Result<(), SetLoggerError> {
        let logger = Logger::new(level, log_path);
        log::set_boxed_logger(Box::new(logger))?;
        log::set_max_level(level);
        Ok(())
    }

    fn format_line(record: &Record) -> String {
        format!(
            "{} {:<5} [{}] {}",
            Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
            record.level(),
            record.target(),
            record.args()
        )
    }
}

// 로그 파일 열기. 디렉토리가 없으면 생성하고, 실패하면 콘솔만 사용
fn open_log_file(path: &Path) -> Option<File> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() && !dir.exists() {
            if let Err(e) = fs::create_dir_all(dir) {
                eprintln!("Cannot create log directory {}: {e}", dir.display());
                return None;
            }
        }
    }

    match OpenOptions::new().create(true).append(true).open(path) {
        Ok(file) => Some(file),
        Err(e) => {
            eprintln!("Cannot open log file {}: {e}", path.display());
            None
        }
    }
}

impl Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let line = Logger::format_line(record);
        if record.level() <= Level::Warn {
            eprintln!("{line}");
        } else {
            println!("{line}");
        }

        let mut guard = self.file.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(file) = guard.as_mut() {
            if let Err(e) = writeln!(file, "{line}") {
                eprintln!("Log file write failed: {e}");
            }
        }
    }

    fn flush(&self) {
        let mut guard = self.file.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(file) = guard.as_mut() {
            let _ = file.flush();
        }
    }
}
