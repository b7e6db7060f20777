//! Audit logger implementation.

use std::collections::VecDeque;
use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, RwLock};
use tlsguard_core::{CertificateErrorKind, SecurityRiskLevel};
use tracing::{debug, error, info, warn};

use crate::event::{AuditRecord, EventSeverity, SecurityEventType};
use crate::summary::SecuritySummary;

/// Default number of records kept in memory for summaries.
pub const DEFAULT_TAIL_CAPACITY: usize = 1000;

/// Backend trait for audit log storage.
pub trait LoggerBackend: Send + Sync + Debug {
    /// Appends one serialized record.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be stored.
    fn log(&self, record_json: &str) -> Result<(), LoggerError>;

    /// Flushes any buffered records.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush operation fails.
    fn flush(&self) -> Result<(), LoggerError>;

    /// Returns the backend name for identification.
    fn name(&self) -> &'static str;
}

/// Errors that can occur during audit logging.
#[derive(Debug, thiserror::Error)]
pub enum LoggerError {
    /// Serialization error
    #[error("Failed to serialize record: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Backend-specific error
    #[error("Backend error: {0}")]
    Backend(String),
}

/// Audit logger that fans records out to configured backends.
///
/// Recording never fails from the caller's point of view: serialization and
/// backend errors are reported through `tracing` and counted.
#[derive(Debug)]
pub struct AuditLogger {
    /// Backends to send records to
    backends: Vec<Arc<dyn LoggerBackend>>,

    /// Whether logging is enabled
    enabled: bool,

    /// Records below this severity are dropped and counted
    min_severity: EventSeverity,

    /// Attributed to records that carry no actor of their own
    actor: Option<String>,

    /// Most recent records, oldest first
    tail: RwLock<VecDeque<AuditRecord>>,

    tail_capacity: usize,

    dropped: AtomicU64,

    write_failures: AtomicU64,

    closed: Mutex<bool>,
}

impl Default for AuditLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditLogger {
    /// Creates a new audit logger with no backends.
    #[must_use]
    pub fn new() -> Self {
        AuditLoggerBuilder::new().build()
    }

    /// Creates a builder for configuring the logger.
    #[must_use]
    pub fn builder() -> AuditLoggerBuilder {
        AuditLoggerBuilder::new()
    }

    /// Appends one record to every backend and the in-memory tail.
    pub fn record(&self, mut record: AuditRecord) {
        if !self.enabled {
            debug!("Audit logging disabled, skipping record");
            return;
        }

        if record.severity < self.min_severity {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            debug!(
                "Record severity {:?} below threshold {:?}, dropping",
                record.severity, self.min_severity
            );
            return;
        }

        if record.actor.is_none() {
            record.actor.clone_from(&self.actor);
        }

        let json = match serde_json::to_string(&record) {
            Ok(json) => json,
            Err(e) => {
                self.write_failures.fetch_add(1, Ordering::Relaxed);
                error!("Failed to serialize audit record: {}", e);
                return;
            }
        };

        for backend in &self.backends {
            if let Err(e) = backend.log(&json) {
                self.write_failures.fetch_add(1, Ordering::Relaxed);
                error!(
                    audit_record = %json,
                    "Failed to write audit record to backend {}: {}",
                    backend.name(),
                    e
                );
            }
        }

        if self.tail_capacity > 0 {
            let mut tail = self.tail.write();
            if tail.len() == self.tail_capacity {
                tail.pop_front();
            }
            tail.push_back(record);
        }
    }

    /// Records a classified certificate failure.
    pub fn log_certificate_failure(&self, hostname: &str, kind: CertificateErrorKind, error: &str) {
        self.record(AuditRecord::certificate_failure(hostname, kind, error));
    }

    /// Records one escalation attempt.
    pub fn log_fallback_attempt(
        &self,
        hostname: &str,
        strategy: &str,
        risk: SecurityRiskLevel,
        attempt_id: &str,
        outcome: Result<(), &str>,
    ) {
        self.record(AuditRecord::fallback_attempt(
            hostname, strategy, risk, attempt_id, outcome,
        ));
    }

    /// Records a strategy that produced a working connection.
    pub fn log_fallback_success(
        &self,
        hostname: &str,
        strategy: &str,
        risk: SecurityRiskLevel,
        attempt_id: &str,
    ) {
        self.record(AuditRecord::fallback_success(
            hostname, strategy, risk, attempt_id,
        ));
    }

    /// Records an insecure-mode outcome.
    pub fn log_insecure_mode(&self, hostname: &str, source: &str, confirmed: bool, reason: &str) {
        self.record(AuditRecord::insecure_mode_used(
            hostname, source, confirmed, reason,
        ));
    }

    /// Records a generic security decision.
    pub fn log_security_decision(
        &self,
        hostname: &str,
        decision: &str,
        reason: &str,
        risk: SecurityRiskLevel,
        allowed: bool,
    ) {
        self.record(AuditRecord::security_decision(
            hostname, decision, reason, risk, allowed,
        ));
    }

    /// Records an accepted risk.
    pub fn log_risk_accepted(&self, hostname: &str, risk: SecurityRiskLevel, reason: &str) {
        self.record(AuditRecord::risk_accepted(hostname, risk, reason));
    }

    /// Records a rejected risk.
    pub fn log_risk_rejected(&self, hostname: &str, risk: SecurityRiskLevel, reason: &str) {
        self.record(AuditRecord::risk_rejected(hostname, risk, reason));
    }

    /// Returns up to `n` of the most recent records, oldest first.
    #[must_use]
    pub fn recent(&self, n: usize) -> Vec<AuditRecord> {
        let tail = self.tail.read();
        tail.iter().skip(tail.len().saturating_sub(n)).cloned().collect()
    }

    /// Summarizes the in-memory records from the last `window`.
    #[must_use]
    pub fn summarize(&self, window: Duration) -> SecuritySummary {
        self.summarize_at(Utc::now(), window)
    }

    /// Summarizes the in-memory records in `(now - window, now]`.
    #[must_use]
    pub fn summarize_at(&self, now: DateTime<Utc>, window: Duration) -> SecuritySummary {
        let tail = self.tail.read();
        SecuritySummary::from_records(tail.iter(), now - window, now)
    }

    /// Number of records dropped for being below the severity threshold.
    #[must_use]
    pub fn dropped_below_threshold(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Number of records that failed to serialize or reach a backend.
    #[must_use]
    pub fn write_failures(&self) -> u64 {
        self.write_failures.load(Ordering::Relaxed)
    }

    /// Flushes all backends.
    ///
    /// # Errors
    ///
    /// Returns an error if any backend fails to flush.
    pub fn flush(&self) -> Result<(), LoggerError> {
        for backend in &self.backends {
            backend.flush()?;
        }
        Ok(())
    }

    /// Records shutdown and flushes. Later calls do nothing.
    ///
    /// # Errors
    ///
    /// Returns an error if any backend fails to flush.
    pub fn close(&self) -> Result<(), LoggerError> {
        {
            let mut closed = self.closed.lock();
            if *closed {
                return Ok(());
            }
            *closed = true;
        }
        self.record(
            AuditRecord::new(SecurityEventType::LoggerShutdown, "")
                .with_detail("dropped_below_threshold", self.dropped_below_threshold().to_string())
                .with_detail("write_failures", self.write_failures().to_string()),
        );
        self.flush()
    }

    /// Returns the number of configured backends.
    #[must_use]
    pub fn backend_count(&self) -> usize {
        self.backends.len()
    }
}

/// Builder for configuring an audit logger.
#[derive(Debug)]
pub struct AuditLoggerBuilder {
    backends: Vec<Arc<dyn LoggerBackend>>,
    enabled: bool,
    min_severity: EventSeverity,
    actor: Option<String>,
    tail_capacity: usize,
}

impl Default for AuditLoggerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditLoggerBuilder {
    /// Creates a new builder.
    #[must_use]
    pub fn new() -> Self {
        Self {
            backends: Vec::new(),
            enabled: true,
            min_severity: EventSeverity::Info,
            actor: None,
            tail_capacity: DEFAULT_TAIL_CAPACITY,
        }
    }

    /// Adds a backend to the logger.
    #[must_use]
    pub fn with_backend(mut self, backend: Arc<dyn LoggerBackend>) -> Self {
        self.backends.push(backend);
        self
    }

    /// Enables or disables the logger.
    #[must_use]
    pub const fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Sets the minimum severity level.
    #[must_use]
    pub const fn min_severity(mut self, severity: EventSeverity) -> Self {
        self.min_severity = severity;
        self
    }

    /// Sets the actor attributed to records.
    #[must_use]
    pub fn actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    /// Sets how many recent records are kept in memory.
    #[must_use]
    pub const fn tail_capacity(mut self, capacity: usize) -> Self {
        self.tail_capacity = capacity;
        self
    }

    /// Builds the audit logger and records its initialization.
    #[must_use]
    pub fn build(self) -> AuditLogger {
        let logger = AuditLogger {
            backends: self.backends,
            enabled: self.enabled,
            min_severity: self.min_severity,
            actor: self.actor,
            tail: RwLock::new(VecDeque::with_capacity(
                self.tail_capacity.min(DEFAULT_TAIL_CAPACITY),
            )),
            tail_capacity: self.tail_capacity,
            dropped: AtomicU64::new(0),
            write_failures: AtomicU64::new(0),
            closed: Mutex::new(false),
        };
        if !logger.backends.is_empty() {
            let names: Vec<_> = logger.backends.iter().map(|b| b.name()).collect();
            logger.record(
                AuditRecord::new(SecurityEventType::LoggerInitialized, "")
                    .with_detail("backends", names.join(",")),
            );
        }
        logger
    }
}

/// Tracing-based backend that mirrors records into diagnostics.
#[derive(Debug, Default)]
pub struct TracingBackend;

impl TracingBackend {
    /// Creates a new tracing backend.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl LoggerBackend for TracingBackend {
    fn log(&self, record_json: &str) -> Result<(), LoggerError> {
        let value: serde_json::Value = serde_json::from_str(record_json)?;

        let severity = value
            .get("severity")
            .and_then(|v| v.as_str())
            .unwrap_or("info");

        match severity {
            "critical" | "error" | "warning" => warn!(audit_record = %record_json, "Security audit"),
            _ => info!(audit_record = %record_json, "Security audit"),
        }

        Ok(())
    }

    fn flush(&self) -> Result<(), LoggerError> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "tracing"
    }
}

/// In-memory backend for testing.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    lines: Mutex<Vec<String>>,
}

impl InMemoryBackend {
    /// Creates a new in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all logged lines.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }

    /// Returns all logged records that parse.
    #[must_use]
    pub fn records(&self) -> Vec<AuditRecord> {
        self.lines
            .lock()
            .iter()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect()
    }

    /// Returns logged records of one event type.
    #[must_use]
    pub fn records_of(&self, event_type: SecurityEventType) -> Vec<AuditRecord> {
        self.records()
            .into_iter()
            .filter(|r| r.event_type == event_type)
            .collect()
    }

    /// Clears all logged lines.
    pub fn clear(&self) {
        self.lines.lock().clear();
    }
}

impl LoggerBackend for InMemoryBackend {
    fn log(&self, record_json: &str) -> Result<(), LoggerError> {
        self.lines.lock().push(record_json.to_string());
        Ok(())
    }

    fn flush(&self) -> Result<(), LoggerError> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "in_memory"
    }
}
