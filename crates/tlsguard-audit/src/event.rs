//! Audit record definitions.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tlsguard_core::{CertificateErrorKind, SecurityRiskLevel};
use uuid::{Timestamp, Uuid};

/// Generates a new v7 UUID for audit records and attempt identifiers.
#[must_use]
pub fn new_record_id() -> Uuid {
    let ts = Timestamp::now(uuid::NoContext);
    Uuid::new_v7(ts)
}

/// Severity level for audit records.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum EventSeverity {
    /// Informational record
    #[default]
    Info,
    /// Something an operator should review
    Warning,
    /// A failure
    Error,
    /// Security posture was weakened
    Critical,
}

/// What an audit record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityEventType {
    /// The audit logger started.
    LoggerInitialized,
    /// The audit logger shut down.
    LoggerShutdown,
    /// A certificate failure was observed and classified.
    CertificateFailure,
    /// A fallback strategy was tried.
    FallbackAttempt,
    /// A fallback strategy produced a working connection.
    FallbackSuccess,
    /// Certificate verification was disabled for a host.
    InsecureModeUsed,
    /// A decision was made about a failure.
    SecurityDecision,
    /// An operator or policy accepted a risk.
    RiskAccepted,
    /// An operator or policy rejected a risk.
    RiskRejected,
    /// A host was added to or removed from the trusted set.
    TrustChanged,
    /// The active strategy was replaced.
    StrategyChanged,
    /// A remembered decision was reused.
    DecisionCacheHit,
}

impl SecurityEventType {
    /// Returns the stable identifier.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LoggerInitialized => "logger_initialized",
            Self::LoggerShutdown => "logger_shutdown",
            Self::CertificateFailure => "certificate_failure",
            Self::FallbackAttempt => "fallback_attempt",
            Self::FallbackSuccess => "fallback_success",
            Self::InsecureModeUsed => "insecure_mode_used",
            Self::SecurityDecision => "security_decision",
            Self::RiskAccepted => "risk_accepted",
            Self::RiskRejected => "risk_rejected",
            Self::TrustChanged => "trust_changed",
            Self::StrategyChanged => "strategy_changed",
            Self::DecisionCacheHit => "decision_cache_hit",
        }
    }
}

impl fmt::Display for SecurityEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse category of a raw error, for grouping in reports.
#[must_use]
pub fn categorize_error(error_text: &str) -> &'static str {
    let lower = error_text.to_lowercase();
    if lower.contains("unknown authority") || lower.contains("unknownissuer") {
        "unknown_ca"
    } else if lower.contains("expired") {
        "expired_certificate"
    } else if lower.contains("hostname") || lower.contains("notvalidforname") {
        "hostname_mismatch"
    } else if lower.contains("self-signed") || lower.contains("self signed") {
        "self_signed"
    } else if lower.contains("tls") {
        "tls_handshake"
    } else {
        "generic_certificate_error"
    }
}

/// One line of the security audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Unique record ID
    pub id: Uuid,

    /// When the record was created
    pub timestamp: DateTime<Utc>,

    /// Record severity
    pub severity: EventSeverity,

    /// What happened
    pub event_type: SecurityEventType,

    /// Registry host involved
    pub hostname: String,

    /// Classified error kind, when a failure is involved
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<CertificateErrorKind>,

    /// Strategy that was evaluated or applied
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,

    /// Identifier shared by the records of one attempt
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempt_id: Option<String>,

    /// Security risk of the outcome
    pub risk: SecurityRiskLevel,

    /// Whether the connection was allowed to proceed
    pub allowed: bool,

    /// User the process runs as
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,

    /// Free-form details
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, String>,
}

impl AuditRecord {
    /// Creates an informational, not-allowed record with no risk.
    #[must_use]
    pub fn new(event_type: SecurityEventType, hostname: impl Into<String>) -> Self {
        Self {
            id: new_record_id(),
            timestamp: Utc::now(),
            severity: EventSeverity::Info,
            event_type,
            hostname: hostname.into(),
            error_kind: None,
            strategy: None,
            attempt_id: None,
            risk: SecurityRiskLevel::None,
            allowed: false,
            actor: None,
            details: BTreeMap::new(),
        }
    }

    /// A classified certificate failure.
    #[must_use]
    pub fn certificate_failure(
        hostname: &str,
        kind: CertificateErrorKind,
        error_text: &str,
    ) -> Self {
        Self::new(SecurityEventType::CertificateFailure, hostname)
            .with_severity(EventSeverity::Warning)
            .with_error_kind(kind)
            .with_detail("error", error_text)
            .with_detail("error_category", categorize_error(error_text))
            .with_detail("recoverable", kind.is_recoverable().to_string())
    }

    /// One escalation attempt, successful or not.
    #[must_use]
    pub fn fallback_attempt(
        hostname: &str,
        strategy: &str,
        risk: SecurityRiskLevel,
        attempt_id: &str,
        outcome: Result<(), &str>,
    ) -> Self {
        let record = Self::new(SecurityEventType::FallbackAttempt, hostname)
            .with_strategy(strategy)
            .with_attempt_id(attempt_id)
            .with_risk(risk)
            .with_detail("risk_description", risk.description());
        match outcome {
            Ok(()) => record.with_allowed(true).with_detail("result", "success"),
            Err(error) => record
                .with_severity(EventSeverity::Warning)
                .with_detail("result", "failure")
                .with_detail("error", error),
        }
    }

    /// A strategy that produced a working connection.
    #[must_use]
    pub fn fallback_success(
        hostname: &str,
        strategy: &str,
        risk: SecurityRiskLevel,
        attempt_id: &str,
    ) -> Self {
        let severity = if risk.is_high() {
            EventSeverity::Warning
        } else {
            EventSeverity::Info
        };
        let record = Self::new(SecurityEventType::FallbackSuccess, hostname)
            .with_severity(severity)
            .with_strategy(strategy)
            .with_attempt_id(attempt_id)
            .with_risk(risk)
            .with_allowed(true)
            .with_detail("risk_description", risk.description());
        if risk.is_high() {
            record
                .with_detail(
                    "warning",
                    "High-risk certificate bypass in use, review before production use",
                )
                .with_detail(
                    "recommendation",
                    "Install the registry's CA certificate and remove the bypass",
                )
        } else {
            record
        }
    }

    /// Certificate verification was, or was not, disabled for a host.
    #[must_use]
    pub fn insecure_mode_used(hostname: &str, source: &str, confirmed: bool, reason: &str) -> Self {
        let record = Self::new(SecurityEventType::InsecureModeUsed, hostname)
            .with_strategy("insecure_mode")
            .with_allowed(confirmed)
            .with_detail("source", source)
            .with_detail("reason", reason);
        if confirmed {
            record
                .with_severity(EventSeverity::Critical)
                .with_risk(SecurityRiskLevel::Critical)
        } else {
            record.with_severity(EventSeverity::Warning)
        }
    }

    /// A decision about a failure.
    #[must_use]
    pub fn security_decision(
        hostname: &str,
        decision: &str,
        reason: &str,
        risk: SecurityRiskLevel,
        allowed: bool,
    ) -> Self {
        let severity = match (allowed, risk) {
            (true, r) if r.is_high() => EventSeverity::Warning,
            _ => EventSeverity::Info,
        };
        Self::new(SecurityEventType::SecurityDecision, hostname)
            .with_severity(severity)
            .with_risk(risk)
            .with_allowed(allowed)
            .with_detail("decision", decision)
            .with_detail("reason", reason)
    }

    /// A risk that was accepted.
    #[must_use]
    pub fn risk_accepted(hostname: &str, risk: SecurityRiskLevel, reason: &str) -> Self {
        Self::new(SecurityEventType::RiskAccepted, hostname)
            .with_severity(EventSeverity::Warning)
            .with_risk(risk)
            .with_allowed(true)
            .with_detail("reason", reason)
    }

    /// A risk that was rejected.
    #[must_use]
    pub fn risk_rejected(hostname: &str, risk: SecurityRiskLevel, reason: &str) -> Self {
        Self::new(SecurityEventType::RiskRejected, hostname)
            .with_risk(risk)
            .with_detail("reason", reason)
    }

    /// Sets the severity.
    #[must_use]
    pub const fn with_severity(mut self, severity: EventSeverity) -> Self {
        self.severity = severity;
        self
    }

    /// Sets the error kind.
    #[must_use]
    pub const fn with_error_kind(mut self, kind: CertificateErrorKind) -> Self {
        self.error_kind = Some(kind);
        self
    }

    /// Sets the strategy name.
    #[must_use]
    pub fn with_strategy(mut self, strategy: impl Into<String>) -> Self {
        self.strategy = Some(strategy.into());
        self
    }

    /// Sets the attempt identifier.
    #[must_use]
    pub fn with_attempt_id(mut self, attempt_id: impl Into<String>) -> Self {
        self.attempt_id = Some(attempt_id.into());
        self
    }

    /// Sets the risk level.
    #[must_use]
    pub const fn with_risk(mut self, risk: SecurityRiskLevel) -> Self {
        self.risk = risk;
        self
    }

    /// Sets whether the connection was allowed.
    #[must_use]
    pub const fn with_allowed(mut self, allowed: bool) -> Self {
        self.allowed = allowed;
        self
    }

    /// Sets the actor.
    #[must_use]
    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    /// Sets the timestamp.
    #[must_use]
    pub const fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Adds a detail entry.
    #[must_use]
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    /// Returns a detail value.
    #[must_use]
    pub fn detail(&self, key: &str) -> Option<&str> {
        self.details.get(key).map(String::as_str)
    }
}
