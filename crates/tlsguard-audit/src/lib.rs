//! Security audit trail for tlsguard.
//!
//! Every classification, fallback attempt, final decision and insecure-mode
//! activation is recorded as one JSON object per line. Records are:
//! - appended to every configured backend (rotating files, tracing, memory)
//! - filtered by a minimum severity, with drops counted
//! - kept in a bounded in-memory tail for [`AuditLogger::summarize`]
//!
//! Logging never fails the caller: backend errors are reported through
//! `tracing` and counted by [`AuditLogger::write_failures`].
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use tlsguard_audit::{AuditLogger, InMemoryBackend, SecurityEventType};
//! use tlsguard_core::CertificateErrorKind;
//!
//! let backend = Arc::new(InMemoryBackend::new());
//! let logger = AuditLogger::builder()
//!     .with_backend(backend.clone())
//!     .actor("ci")
//!     .build();
//!
//! logger.log_certificate_failure(
//!     "registry.example.com",
//!     CertificateErrorKind::UntrustedCA,
//!     "x509: certificate signed by unknown authority",
//! );
//! assert_eq!(backend.records_of(SecurityEventType::CertificateFailure).len(), 1);
//! ```

mod event;
mod file;
mod logger;
mod summary;


pub use event::{categorize_error, new_record_id, AuditRecord, EventSeverity, SecurityEventType};
pub use file::{read_records, FileBackendConfig, RotatingFileBackend, DEFAULT_FILE_PREFIX};
pub use logger::{
    AuditLogger, AuditLoggerBuilder, InMemoryBackend, LoggerBackend, LoggerError, TracingBackend,
    DEFAULT_TAIL_CAPACITY,
};
pub use summary::SecuritySummary;
