//! Per-invocation log sink
//!
//! Each run writes `timestamp - LEVEL - source - message` lines to
//! `{source}{environment}etl.log` in the configured log directory. The same
//! text is kept in memory for the audit row and every line is mirrored as a
//! tracing event.

use chrono::Utc;
use chrono_tz::Tz;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

use crate::errors::AppResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Level {
    Info,
    Warning,
    Error,
}

impl Level {
    fn as_str(self) -> &'static str {
        match self {
            Level::Info => "INFO",
            Level::Warning => "WARNING",
            Level::Error => "ERROR",
        }
    }
}

struct Sink {
    text: String,
    file: Option<File>,
}

#[derive(Clone)]
pub struct RunLog {
    sink: Arc<Mutex<Sink>>,
    path: Option<PathBuf>,
    source: String,
    environment: String,
    timezone: Tz,
}

impl RunLog {
    pub fn file_name(source: &str, environment: &str) -> String {
        format!("{source}{environment}etl.log")
    }

    /// Create (or truncate) the run log file under `dir`
    pub fn create(dir: &Path, source: &str, environment: &str, timezone: Tz) -> AppResult<Self> {
        fs::create_dir_all(dir)?;
        let path = dir.join(Self::file_name(source, environment));
        let file = File::create(&path)?;
        debug!("Run log for {}/{} at {}", source, environment, path.display());
        Ok(Self {
            sink: Arc::new(Mutex::new(Sink {
                text: String::new(),
                file: Some(file),
            })),
            path: Some(path),
            source: source.to_string(),
            environment: environment.to_string(),
            timezone,
        })
    }

    /// A log that is only kept in memory; used when the log file cannot be created
    pub fn in_memory(source: &str, environment: &str, timezone: Tz) -> Self {
        Self {
            sink: Arc::new(Mutex::new(Sink {
                text: String::new(),
                file: None,
            })),
            path: None,
            source: source.to_string(),
            environment: environment.to_string(),
            timezone,
        }
    }

    pub fn info<S: AsRef<str>>(&self, message: S) {
        self.write(Level::Info, message.as_ref());
    }

    pub fn warn<S: AsRef<str>>(&self, message: S) {
        self.write(Level::Warning, message.as_ref());
    }

    pub fn error<S: AsRef<str>>(&self, message: S) {
        self.write(Level::Error, message.as_ref());
    }

    fn lock(&self) -> MutexGuard<'_, Sink> {
        self.sink.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self, level: Level, message: &str) {
        match level {
            Level::Info => info!(source = %self.source, environment = %self.environment, "{}", message),
            Level::Warning => warn!(source = %self.source, environment = %self.environment, "{}", message),
            Level::Error => error!(source = %self.source, environment = %self.environment, "{}", message),
        }

        let timestamp = Utc::now().with_timezone(&self.timezone);
        let line = format!(
            "{} - {} - {} - {}\n",
            timestamp.format("%Y-%m-%d %H:%M:%S,%3f"),
            level.as_str(),
            self.source,
            message
        );
        let mut sink = self.lock();
        sink.text.push_str(&line);
        let failed = match sink.file.as_mut() {
            Some(file) => file.write_all(line.as_bytes()).is_err(),
            None => false,
        };
        if failed {
            warn!("Run log file write failed, continuing in memory only");
            sink.file = None;
        }
    }

    /// Everything logged so far
    pub fn text(&self) -> String {
        self.lock().text.clone()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Flush and release the file handle; later lines are kept in memory only
    pub fn close(&self) {
        let mut sink = self.lock();
        if let Some(mut file) = sink.file.take()
            && let Err(e) = file.flush()
        {
            warn!("Failed to flush run log: {}", e);
        }
    }

    /// Close and delete the log file
    pub fn remove(&self) -> AppResult<()> {
        self.close();
        if let Some(path) = &self.path
            && path.exists()
        {
            fs::remove_file(path)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[test]
    #[traced_test]
    fn test_lines_written_to_file_and_tracing() {
        let dir = tempfile::tempdir().unwrap();
        let log = RunLog::create(dir.path(), "agmarknet", "staging", chrono_tz::Asia::Kolkata).unwrap();
        log.info("Extracted 10 rows");
        log.error("Load failure: boom");
        log.close();

        let path = dir.path().join("agmarknetstagingetl.log");
        assert_eq!(log.path(), Some(path.as_path()));
        let written = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = written.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with(" - INFO - agmarknet - Extracted 10 rows"));
        assert!(lines[1].contains(" - ERROR - agmarknet - "));
        assert_eq!(log.text(), written);
        assert!(logs_contain("Extracted 10 rows"));
    }

    #[test]
    fn test_create_truncates_previous_run() {
        let dir = tempfile::tempdir().unwrap();
        let first = RunLog::create(dir.path(), "cpi", "dev", chrono_tz::UTC).unwrap();
        first.info("old run");
        first.close();

        let second = RunLog::create(dir.path(), "cpi", "dev", chrono_tz::UTC).unwrap();
        second.info("new run");
        second.close();
        let written = fs::read_to_string(dir.path().join("cpidevetl.log")).unwrap();
        assert!(!written.contains("old run"));
        assert!(written.contains("new run"));
    }

    #[test]
    fn test_remove_deletes_file() {
        let dir = tempfile::tempdir().unwrap();
        let log = RunLog::create(dir.path(), "cpi", "dev", chrono_tz::UTC).unwrap();
        log.info("done");
        log.remove().unwrap();
        assert!(!dir.path().join("cpidevetl.log").exists());
        assert!(log.text().contains("done"));
    }
}
