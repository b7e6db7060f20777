//! Integration tests for the audit trail on disk.

use std::sync::Arc;

use chrono::Duration;
use tlsguard_audit::{
    read_records, AuditLogger, EventSeverity, FileBackendConfig, RotatingFileBackend,
    SecurityEventType,
};
use tlsguard_core::{CertificateErrorKind, SecurityRiskLevel};

#[test]
fn test_logger_writes_jsonl_and_summarizes() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(RotatingFileBackend::new(FileBackendConfig::new(dir.path())));
    let logger = AuditLogger::builder()
        .with_backend(backend.clone())
        .actor("integration")
        .build();

    logger.log_certificate_failure(
        "registry.example.com",
        CertificateErrorKind::SelfSigned,
        "x509: self signed certificate",
    );
    logger.log_fallback_attempt(
        "registry.example.com",
        "system_ca",
        SecurityRiskLevel::Low,
        "attempt-1",
        Err("still untrusted"),
    );
    logger.log_fallback_success(
        "registry.example.com",
        "accept_self_signed",
        SecurityRiskLevel::High,
        "attempt-2",
    );
    logger.close().unwrap();

    let records = read_records(dir.path()).unwrap();
    let types: Vec<_> = records.iter().map(|r| r.event_type).collect();
    assert_eq!(
        types,
        vec![
            SecurityEventType::LoggerInitialized,
            SecurityEventType::CertificateFailure,
            SecurityEventType::FallbackAttempt,
            SecurityEventType::FallbackSuccess,
            SecurityEventType::LoggerShutdown,
        ]
    );
    assert!(records.iter().all(|r| r.actor.as_deref() == Some("integration")));

    let summary = logger.summarize(Duration::hours(1));
    assert_eq!(summary.total, 5);
    assert_eq!(summary.by_host.get("registry.example.com"), Some(&3));
    assert_eq!(summary.high_risk_events, 1);
}

#[test]
fn test_unwritable_directory_does_not_fail_decisions() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("not-a-dir");
    std::fs::write(&blocker, b"file in the way").unwrap();

    let logger = AuditLogger::builder()
        .with_backend(Arc::new(RotatingFileBackend::new(FileBackendConfig::new(&blocker))))
        .min_severity(EventSeverity::Warning)
        .build();

    logger.log_risk_accepted("r.io", SecurityRiskLevel::Medium, "operator");

    assert_eq!(logger.write_failures(), 1);
    assert_eq!(logger.recent(5).len(), 1);
}
