//! Decoupled logging pipeline.
//!
//! ```text
//! log::info!() ...
//!     |
//! [LogCollector] --stderr--> CI console
//!     | (crossbeam channel)
//! [disk writer thread]
//!     |
//! logs/kbuild-<ts>.log
//! ```
//!
//! Disk writes never block the caller. `flush` waits until every line sent
//! before it has reached the file.

use chrono::Local;
use crossbeam_channel::{unbounded, Sender};
use log::{LevelFilter, Log, Metadata, Record};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;

enum LogMessage {
    Line(String),
    /// Flush marker, answered once everything before it is on disk
    Flush(std::sync::mpsc::Sender<()>),
}

/// `log` backend writing to stderr and a per-run file.
#[derive(Clone)]
pub struct LogCollector {
    tx: Sender<LogMessage>,
    log_path: PathBuf,
    level: LevelFilter,
    echo_stderr: bool,
}

impl LogCollector {
    /// Create the log directory and start the disk writer thread.
    pub fn new(log_dir: &Path, level: LevelFilter) -> Result<Self, String> {
        std::fs::create_dir_all(log_dir)
            .map_err(|e| format!("Failed to create logs directory {}: {}", log_dir.display(), e))?;

        let log_path = log_dir.join(format!("kbuild-{}.log", Local::now().format("%Y%m%d_%H%M%S")));
        let mut file: File = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .map_err(|e| format!("Failed to create log file {}: {}", log_path.display(), e))?;

        let (tx, rx) = unbounded::<LogMessage>();

        std::thread::spawn(move || {
            while let Ok(msg) = rx.recv() {
                match msg {
                    LogMessage::Line(line) => {
                        let _ = file.write_all(line.as_bytes());
                        let _ = file.write_all(b"\n");
                    }
                    LogMessage::Flush(done) => {
                        let _ = file.flush();
                        let _ = done.send(());
                    }
                }
            }
        });

        Ok(LogCollector {
            tx,
            log_path,
            level,
            echo_stderr: true,
        })
    }

    /// Keep the file, drop the console copy.
    pub fn quiet(mut self) -> Self {
        self.echo_stderr = false;
        self
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Queue one line for the file.
    pub fn log_str(&self, message: impl Into<String>) {
        let _ = self.tx.send(LogMessage::Line(message.into()));
    }

    /// Block until all queued lines are written.
    pub fn wait_for_empty(&self) -> Result<(), String> {
        let (done_tx, done_rx) = std::sync::mpsc::channel::<()>();
        self.tx
            .send(LogMessage::Flush(done_tx))
            .map_err(|e| format!("Failed to send flush marker: {}", e))?;
        done_rx
            .recv()
            .map_err(|e| format!("Flush signal interrupted: {}", e))
    }

    /// Install as the global `log` backend.
    pub fn install(self) -> Result<Self, String> {
        let level = self.level;
        log::set_boxed_logger(Box::new(self.clone()))
            .map_err(|e| format!("Failed to set global logger: {}", e))?;
        log::set_max_level(level);
        Ok(self)
    }
}

impl Log for LogCollector {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = format!(
            "[{}] [{}] {}",
            Local::now().format("%H:%M:%S%.3f"),
            record.level(),
            record.args()
        );
        if self.echo_stderr {
            eprintln!("{}", line);
        }
        self.log_str(line);
    }

    fn flush(&self) {
        let _ = self.wait_for_empty();
    }
}

/// Level from a `KBUILD_LOG`-style value, `info` when unset or invalid.
pub fn level_from(value: Option<&str>) -> LevelFilter {
    value
        .and_then(|v| LevelFilter::from_str(v.trim()).ok())
        .unwrap_or(LevelFilter::Info)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_collector_persists_lines() {
        let temp = TempDir::new().unwrap();
        let collector = LogCollector::new(&temp.path().join("logs"), LevelFilter::Debug)
            .unwrap()
            .quiet();

        for i in 0..100 {
            collector.log_str(format!("line {}", i));
        }
        collector.wait_for_empty().unwrap();

        let content = fs::read_to_string(collector.log_path()).unwrap();
        assert_eq!(content.lines().count(), 100);
        assert!(content.ends_with("line 99\n"));
    }

    #[test]
    fn test_records_filtered_by_level() {
        let temp = TempDir::new().unwrap();
        let collector = LogCollector::new(temp.path(), LevelFilter::Warn).unwrap().quiet();

        collector.log(
            &Record::builder()
                .level(log::Level::Info)
                .args(format_args!("hidden"))
                .build(),
        );
        collector.log(
            &Record::builder()
                .level(log::Level::Error)
                .args(format_args!("shown"))
                .build(),
        );
        collector.wait_for_empty().unwrap();

        let content = fs::read_to_string(collector.log_path()).unwrap();
        assert!(!content.contains("hidden"));
        assert!(content.contains("[ERROR] shown"));
    }

    #[test]
    fn test_level_from() {
        assert_eq!(level_from(Some("debug")), LevelFilter::Debug);
        assert_eq!(level_from(Some("nonsense")), LevelFilter::Info);
        assert_eq!(level_from(None), LevelFilter::Info);
    }
}
