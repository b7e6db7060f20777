//! JSON-lines file backend with rotation and retention.
//!
//! Records are appended one per line to `<prefix>-<stamp>.jsonl`, where the
//! stamp is the time the file was opened. A new file is started when the
//! current one would exceed its size limit or has been open longer than its
//! age limit; rotated files older than the retention window are deleted.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use parking_lot::Mutex;
use tlsguard_core::{Clock, SystemClock};
use tracing::{debug, info, warn};

use crate::event::AuditRecord;
use crate::logger::{LoggerBackend, LoggerError};

const STAMP_FORMAT: &str = "%Y%m%d-%H%M%S%.3f";
const STAMP_LEN: usize = 19;

/// Default file name prefix.
pub const DEFAULT_FILE_PREFIX: &str = "security-audit";

/// Configuration for [`RotatingFileBackend`].
#[derive(Debug, Clone)]
pub struct FileBackendConfig {
    /// Directory the log files live in.
    pub dir: PathBuf,

    /// File name prefix.
    pub prefix: String,

    /// Rotate before a file grows past this many bytes.
    pub max_file_size: u64,

    /// Rotate once a file has been open this long.
    pub max_file_age: Duration,

    /// Delete rotated files older than this.
    pub retention: Duration,
}

impl FileBackendConfig {
    /// Creates a configuration writing into `dir`.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            prefix: DEFAULT_FILE_PREFIX.to_string(),
            max_file_size: 10 * 1024 * 1024,
            max_file_age: Duration::hours(24),
            retention: Duration::days(30),
        }
    }

    /// Default directory: the per-user data directory.
    #[must_use]
    pub fn default_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("tlsguard")
            .join("security")
    }

    /// Sets the file name prefix.
    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Sets the size threshold.
    #[must_use]
    pub const fn with_max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size = bytes;
        self
    }

    /// Sets the age threshold.
    #[must_use]
    pub const fn with_max_file_age(mut self, age: Duration) -> Self {
        self.max_file_age = age;
        self
    }

    /// Sets the retention window.
    #[must_use]
    pub const fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }
}

impl Default for FileBackendConfig {
    fn default() -> Self {
        Self::new(Self::default_dir())
    }
}

#[derive(Debug)]
struct OpenFile {
    file: File,
    path: PathBuf,
    opened_at: DateTime<Utc>,
    written: u64,
}

/// Appends records to rotating JSON-lines files.
#[derive(Debug)]
pub struct RotatingFileBackend {
    config: FileBackendConfig,
    clock: Arc<dyn Clock>,
    current: Mutex<Option<OpenFile>>,
}

impl RotatingFileBackend {
    /// Creates a backend. The first file is opened on the first write.
    #[must_use]
    pub fn new(config: FileBackendConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Creates a backend that stamps and ages files using `clock`.
    #[must_use]
    pub fn with_clock(config: FileBackendConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            current: Mutex::new(None),
        }
    }

    /// Path of the file currently being written, if one is open.
    #[must_use]
    pub fn current_path(&self) -> Option<PathBuf> {
        self.current.lock().as_ref().map(|f| f.path.clone())
    }

    /// Lists the log files in the directory, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be read.
    pub fn log_files(&self) -> Result<Vec<PathBuf>, LoggerError> {
        list_log_files(&self.config.dir, &self.config.prefix)
    }

    fn open(&self, now: DateTime<Utc>) -> Result<OpenFile, LoggerError> {
        fs::create_dir_all(&self.config.dir)?;

        let stamp = now.format(STAMP_FORMAT);
        let mut path = self
            .config
            .dir
            .join(format!("{}-{stamp}.jsonl", self.config.prefix));
        let mut n = 1;
        while path.exists() {
            path = self
                .config
                .dir
                .join(format!("{}-{stamp}-{n}.jsonl", self.config.prefix));
            n += 1;
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        info!(path = %path.display(), "Opened security audit log");
        Ok(OpenFile {
            file,
            path,
            opened_at: now,
            written: 0,
        })
    }

    fn needs_rotation(&self, open: &OpenFile, incoming: u64, now: DateTime<Utc>) -> bool {
        let too_big = open.written > 0 && open.written + incoming > self.config.max_file_size;
        let too_old = now - open.opened_at >= self.config.max_file_age;
        too_big || too_old
    }

    /// Deletes rotated files whose stamp is older than the retention window.
    ///
    /// Returns the number of files removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be read.
    pub fn cleanup(&self) -> Result<usize, LoggerError> {
        let now = self.clock.now();
        let current = self.current_path();
        let mut removed = 0;

        for path in self.log_files()? {
            if Some(&path) == current.as_ref() {
                continue;
            }
            let Some(stamp) = file_stamp(&path, &self.config.prefix) else {
                continue;
            };
            if now - stamp > self.config.retention {
                match fs::remove_file(&path) {
                    Ok(()) => {
                        debug!(path = %path.display(), "Removed expired audit log");
                        removed += 1;
                    }
                    Err(e) => warn!(path = %path.display(), "Failed to remove audit log: {}", e),
                }
            }
        }
        Ok(removed)
    }
}

impl LoggerBackend for RotatingFileBackend {
    fn log(&self, record_json: &str) -> Result<(), LoggerError> {
        let now = self.clock.now();
        let line_len = record_json.len() as u64 + 1;

        let rotated = {
            let mut current = self.current.lock();
            let rotate = current
                .as_ref()
                .map_or(true, |open| self.needs_rotation(open, line_len, now));
            if rotate {
                if let Some(mut old) = current.take() {
                    old.file.flush()?;
                }
                *current = Some(self.open(now)?);
            }

            let Some(open) = current.as_mut() else {
                return Err(LoggerError::Backend("no audit file open".to_string()));
            };
            open.file.write_all(record_json.as_bytes())?;
            open.file.write_all(b"\n")?;
            open.written += line_len;
            rotate
        };

        if rotated {
            if let Err(e) = self.cleanup() {
                warn!("Audit log retention cleanup failed: {}", e);
            }
        }
        Ok(())
    }

    fn flush(&self) -> Result<(), LoggerError> {
        if let Some(open) = self.current.lock().as_mut() {
            open.file.flush()?;
            open.file.sync_data()?;
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "file"
    }
}

fn file_stamp(path: &Path, prefix: &str) -> Option<DateTime<Utc>> {
    let name = path.file_name()?.to_str()?;
    let rest = name.strip_prefix(prefix)?.strip_prefix('-')?;
    let stamp = rest.get(..STAMP_LEN)?;
    NaiveDateTime::parse_from_str(stamp, STAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

fn list_log_files(dir: &Path, prefix: &str) -> Result<Vec<PathBuf>, LoggerError> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut files: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.extension().is_some_and(|ext| ext == "jsonl")
                && file_stamp(path, prefix).is_some()
        })
        .collect();
    files.sort();
    Ok(files)
}

/// Reads every record from the log files in `dir`, oldest file first.
///
/// Lines that do not parse are skipped.
///
/// # Errors
///
/// Returns an error if the directory or a file cannot be read.
pub fn read_records(dir: &Path) -> Result<Vec<AuditRecord>, LoggerError> {
    let mut records = Vec::new();
    for path in list_log_files(dir, DEFAULT_FILE_PREFIX)? {
        let reader = BufReader::new(File::open(&path)?);
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<AuditRecord>(&line) {
                Ok(record) => records.push(record),
                Err(e) => debug!(path = %path.display(), "Skipping malformed audit line: {}", e),
            }
        }
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::SecurityEventType;
    use chrono::TimeZone;
    use tlsguard_core::ManualClock;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 9, 30, 0).unwrap()
    }

    fn line(host: &str) -> String {
        serde_json::to_string(&AuditRecord::new(SecurityEventType::SecurityDecision, host))
            .unwrap()
    }

    #[test]
    fn test_writes_one_record_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(start()));
        let backend =
            RotatingFileBackend::with_clock(FileBackendConfig::new(dir.path()), clock);

        backend.log(&line("a.example.com")).unwrap();
        backend.log(&line("b.example.com")).unwrap();
        backend.flush().unwrap();

        let path = backend.current_path().unwrap();
        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            "security-audit-20250301-093000.000.jsonl"
        );
        let records = read_records(dir.path()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].hostname, "b.example.com");
    }

    #[test]
    fn test_rotates_on_size() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(start()));
        let record = line("a.example.com");
        let config = FileBackendConfig::new(dir.path())
            .with_max_file_size(record.len() as u64 * 2 + 2);
        let backend = RotatingFileBackend::with_clock(config, clock);

        for _ in 0..5 {
            backend.log(&record).unwrap();
        }
        assert_eq!(backend.log_files().unwrap().len(), 3);
        assert_eq!(read_records(dir.path()).unwrap().len(), 5);
    }

    #[test]
    fn test_rotates_on_age() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(start()));
        let backend =
            RotatingFileBackend::with_clock(FileBackendConfig::new(dir.path()), clock.clone());

        backend.log(&line("a")).unwrap();
        let first = backend.current_path().unwrap();
        clock.advance(Duration::hours(25));
        backend.log(&line("b")).unwrap();

        assert_ne!(backend.current_path().unwrap(), first);
        assert_eq!(backend.log_files().unwrap().len(), 2);
    }

    #[test]
    fn test_retention_removes_old_files() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(start()));
        let config = FileBackendConfig::new(dir.path()).with_retention(Duration::days(7));
        let backend = RotatingFileBackend::with_clock(config, clock.clone());

        backend.log(&line("old")).unwrap();
        clock.advance(Duration::days(2));
        backend.log(&line("recent")).unwrap();
        clock.advance(Duration::days(6));
        backend.log(&line("new")).unwrap();

        // The first file is now 8 days old; the second is 6.
        let files = backend.log_files().unwrap();
        assert_eq!(files.len(), 2);
        let hosts: Vec<_> = read_records(dir.path())
            .unwrap()
            .into_iter()
            .map(|r| r.hostname)
            .collect();
        assert_eq!(hosts, vec!["recent", "new"]);
    }

    #[test]
    fn test_read_records_skips_garbage_and_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("security-audit-20250301-093000.000.jsonl"),
            format!("{}\nnot json\n\n", line("ok")),
        )
        .unwrap();
        fs::write(dir.path().join("notes.jsonl"), line("ignored")).unwrap();

        let records = read_records(dir.path()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].hostname, "ok");
    }

    #[test]
    fn test_read_records_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_records(&dir.path().join("nope")).unwrap().is_empty());
    }
}
