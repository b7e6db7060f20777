//! The escalating retry sequence.
//!
//! Steps run in a fixed order, each riskier than the last. The first three
//! keep certificate verification on; the last two turn it off.

use std::fmt;

use serde::{Deserialize, Serialize};
use tlsguard_core::{CertificateErrorKind, ClassifiedError, SecurityRiskLevel, TlsVersion, TransportConfig};

use crate::decision::{Decision, DecisionSource};
use crate::strategy::FallbackAction;

/// One step of fallback escalation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationStep {
    /// Retry trusting only the platform's installed roots.
    SystemCa,
    /// Retry without the server name indication extension.
    NoSni,
    /// Retry allowing TLS versions down to 1.0.
    LowerTls,
    /// Accept the presented certificate for this connection.
    AcceptSelfSigned,
    /// Disable verification for the host, with consent.
    InsecureMode,
}

impl EscalationStep {
    /// Steps in the order they are tried.
    pub const ORDER: [Self; 5] = [
        Self::SystemCa,
        Self::NoSni,
        Self::LowerTls,
        Self::AcceptSelfSigned,
        Self::InsecureMode,
    ];

    /// Returns the stable identifier.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SystemCa => "system_ca",
            Self::NoSni => "no_sni",
            Self::LowerTls => "lower_tls",
            Self::AcceptSelfSigned => "accept_self_signed",
            Self::InsecureMode => "insecure_mode",
        }
    }

    /// Risk of a connection made by this step.
    #[must_use]
    pub const fn risk(self) -> SecurityRiskLevel {
        match self {
            Self::SystemCa => SecurityRiskLevel::Low,
            Self::NoSni | Self::LowerTls => SecurityRiskLevel::Medium,
            Self::AcceptSelfSigned => SecurityRiskLevel::High,
            Self::InsecureMode => SecurityRiskLevel::Critical,
        }
    }

    const fn risk_score(self) -> u8 {
        match self {
            Self::SystemCa => 2,
            Self::NoSni | Self::LowerTls => 4,
            Self::AcceptSelfSigned => 7,
            Self::InsecureMode => 10,
        }
    }

    /// Whether this step turns certificate verification off.
    #[must_use]
    pub const fn disables_verification(self) -> bool {
        matches!(self, Self::AcceptSelfSigned | Self::InsecureMode)
    }

    /// Action a success at this step amounts to.
    #[must_use]
    pub const fn action(self) -> FallbackAction {
        if self.disables_verification() {
            FallbackAction::Accept
        } else {
            FallbackAction::Retry
        }
    }

    /// Transport this step connects with.
    #[must_use]
    pub const fn transport(self) -> TransportConfig {
        match self {
            Self::SystemCa => TransportConfig::strict().with_platform_roots(),
            Self::NoSni => TransportConfig::strict().without_sni(),
            Self::LowerTls => TransportConfig::strict().with_min_tls_version(TlsVersion::Tls10),
            Self::AcceptSelfSigned | Self::InsecureMode => TransportConfig::unverified(),
        }
    }

    /// Whether this step can help with a failure of `kind`.
    ///
    /// A different root set, SNI setting or protocol version cannot fix a
    /// certificate that is outside its validity window.
    #[must_use]
    pub const fn applies_to(self, kind: CertificateErrorKind) -> bool {
        match self {
            Self::SystemCa | Self::NoSni | Self::LowerTls => !matches!(
                kind,
                CertificateErrorKind::Expired | CertificateErrorKind::NotYetValid
            ),
            Self::AcceptSelfSigned => matches!(
                kind,
                CertificateErrorKind::SelfSigned
                    | CertificateErrorKind::UntrustedCA
                    | CertificateErrorKind::Unknown
            ),
            Self::InsecureMode => true,
        }
    }

    /// Decision describing a success at this step.
    #[must_use]
    pub fn success_decision(self, error: &ClassifiedError, attempt_id: &str) -> Decision {
        Decision::new(
            self.action(),
            self.risk_score(),
            format!("connected to {} using {}", error.hostname, self.as_str()),
            DecisionSource::Escalation,
        )
        .with_risk(self.risk())
        .with_transport(self.transport())
        .with_metadata("strategy", self.as_str())
        .with_metadata("attempt_id", attempt_id)
        .with_metadata("error_kind", error.kind.as_str())
    }
}

impl fmt::Display for EscalationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened at one step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "result", content = "detail")]
pub enum AttemptResult {
    /// The probe connected.
    Succeeded,
    /// The probe failed.
    Failed(String),
    /// The step was not tried.
    Skipped(String),
}

/// Record of one step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationAttempt {
    /// Step.
    pub step: EscalationStep,
    /// Attempt identifier, shared with the audit trail. Empty when skipped.
    pub attempt_id: String,
    /// Outcome.
    #[serde(flatten)]
    pub result: AttemptResult,
}

impl fmt::Display for EscalationAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.result {
            AttemptResult::Succeeded => write!(f, "{}: succeeded", self.step),
            AttemptResult::Failed(reason) => write!(f, "{}: failed: {reason}", self.step),
            AttemptResult::Skipped(reason) => write!(f, "{}: skipped: {reason}", self.step),
        }
    }
}

/// A connection that escalation managed to make.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FallbackOutcome {
    /// Step that worked.
    pub step: EscalationStep,
    /// Decision for the caller, with the transport to use.
    pub decision: Decision,
    /// The classified failure that started escalation.
    pub error: ClassifiedError,
    /// Every step considered, in order.
    pub attempts: Vec<EscalationAttempt>,
    /// Remediation for the underlying problem.
    pub recommendations: Vec<String>,
}

impl FallbackOutcome {
    /// Transport the caller should use.
    #[must_use]
    pub const fn transport(&self) -> &TransportConfig {
        &self.decision.transport
    }
}
