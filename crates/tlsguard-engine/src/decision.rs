//! Fallback decision types.
//!
//! A [`Decision`] is the engine's answer to one classified failure: the
//! action, how risky it is, and how the caller's transport should be built.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tlsguard_core::{CertificateErrorKind, SecurityRiskLevel, TransportConfig};

use crate::strategy::FallbackAction;

/// Where a decision's action came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionSource {
    /// A per-hostname override.
    HostOverride,
    /// The host is in the trusted set or marked insecure.
    TrustedHost,
    /// A per-kind rule.
    Rule,
    /// The mode default.
    ModeDefault,
    /// An operator answered a prompt.
    Prompt,
    /// A fallback escalation step succeeded.
    Escalation,
}

impl DecisionSource {
    /// Returns the stable identifier.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::HostOverride => "host_override",
            Self::TrustedHost => "trusted_host",
            Self::Rule => "rule",
            Self::ModeDefault => "mode_default",
            Self::Prompt => "prompt",
            Self::Escalation => "escalation",
        }
    }
}

impl fmt::Display for DecisionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Risk score for taking `action` on a failure of `kind`.
///
/// Denying carries no risk. Retrying, or an action an operator confirmed at a
/// prompt, carries half the base score but never less than 1.
#[must_use]
pub fn risk_score(kind: CertificateErrorKind, action: FallbackAction, prompted: bool) -> u8 {
    let base = kind.base_risk_score();
    match action {
        FallbackAction::Deny => 0,
        FallbackAction::Retry | FallbackAction::Prompt => (base / 2).max(1),
        FallbackAction::Accept | FallbackAction::Log if prompted => (base / 2).max(1),
        FallbackAction::Accept | FallbackAction::Log => base,
    }
}

/// Transport the caller should use for `action`.
///
/// Retries keep verification on; accepting disables it for this connection.
#[must_use]
pub const fn transport_for(action: FallbackAction) -> TransportConfig {
    if action.accepts_certificate() {
        TransportConfig::unverified()
    } else {
        TransportConfig::strict()
    }
}

/// The engine's answer to one classified failure.
///
/// # Examples
///
/// ```rust
/// use tlsguard_core::SecurityRiskLevel;
/// use tlsguard_engine::{Decision, DecisionSource, FallbackAction};
///
/// let denied = Decision::deny("certificate revoked", DecisionSource::Rule);
/// assert_eq!(denied.action, FallbackAction::Deny);
/// assert_eq!(denied.risk, SecurityRiskLevel::None);
/// assert!(denied.transport.verify_certificates);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    /// What to do.
    pub action: FallbackAction,

    /// Risk of taking the action.
    pub risk: SecurityRiskLevel,

    /// Numeric score behind `risk`, 0 to 10.
    pub risk_score: u8,

    /// Human-readable reason.
    pub reason: String,

    /// Where the action came from.
    pub source: DecisionSource,

    /// How the caller's transport should be built.
    pub transport: TransportConfig,

    /// How long a prompt for this decision may wait, in seconds.
    pub timeout_secs: u64,

    /// Whether the decision is remembered.
    pub remember: bool,

    /// Retries the caller may still attempt.
    pub retry_budget: u32,

    /// Context for audit and display.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl Decision {
    /// Creates a decision with an explicit risk score.
    ///
    /// A `Deny` always carries score 0 and risk `None`, whatever `score` says.
    #[must_use]
    pub fn new(
        action: FallbackAction,
        score: u8,
        reason: impl Into<String>,
        source: DecisionSource,
    ) -> Self {
        let score = if action == FallbackAction::Deny {
            0
        } else {
            score.min(10)
        };
        Self {
            action,
            risk: SecurityRiskLevel::from_score(score),
            risk_score: score,
            reason: reason.into(),
            source,
            transport: transport_for(action),
            timeout_secs: 0,
            remember: false,
            retry_budget: 0,
            metadata: BTreeMap::new(),
        }
    }

    /// Creates a decision scored from the failure kind.
    #[must_use]
    pub fn for_kind(
        kind: CertificateErrorKind,
        action: FallbackAction,
        prompted: bool,
        reason: impl Into<String>,
        source: DecisionSource,
    ) -> Self {
        Self::new(action, risk_score(kind, action, prompted), reason, source)
            .with_metadata("error_kind", kind.as_str())
    }

    /// Creates a deny decision.
    #[must_use]
    pub fn deny(reason: impl Into<String>, source: DecisionSource) -> Self {
        Self::new(FallbackAction::Deny, 0, reason, source)
    }

    /// Overrides the risk level, keeping the score. Ignored for `Deny`.
    #[must_use]
    pub const fn with_risk(mut self, risk: SecurityRiskLevel) -> Self {
        if !matches!(self.action, FallbackAction::Deny) {
            self.risk = risk;
        }
        self
    }

    /// Sets the transport.
    #[must_use]
    pub const fn with_transport(mut self, transport: TransportConfig) -> Self {
        self.transport = transport;
        self
    }

    /// Sets the prompt timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = timeout.as_secs();
        self
    }

    /// Sets whether the decision is remembered.
    #[must_use]
    pub const fn with_memory(mut self, remember: bool) -> Self {
        self.remember = remember;
        self
    }

    /// Sets the retry budget.
    #[must_use]
    pub const fn with_retry_budget(mut self, retries: u32) -> Self {
        self.retry_budget = retries;
        self
    }

    /// Adds a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Whether the connection may proceed in some form.
    #[must_use]
    pub const fn is_allowed(&self) -> bool {
        !matches!(self.action, FallbackAction::Deny)
    }

    /// Whether the connection is refused.
    #[must_use]
    pub const fn is_denied(&self) -> bool {
        matches!(self.action, FallbackAction::Deny)
    }

    /// Prompt timeout as a duration.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (risk {}, {}): {}",
            self.action, self.risk, self.source, self.reason
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deny_has_no_risk() {
        let decision = Decision::new(FallbackAction::Deny, 9, "nope", DecisionSource::Rule);
        assert_eq!(decision.risk_score, 0);
        assert_eq!(decision.risk, SecurityRiskLevel::None);
        assert!(decision.is_denied());
        assert!(decision.transport.is_verifying());

        let forced = decision.with_risk(SecurityRiskLevel::High);
        assert_eq!(forced.risk, SecurityRiskLevel::None);
    }

    #[test]
    fn test_accept_uses_base_score() {
        let decision = Decision::for_kind(
            CertificateErrorKind::UntrustedCA,
            FallbackAction::Accept,
            false,
            "dev",
            DecisionSource::ModeDefault,
        );
        assert_eq!(decision.risk_score, 6);
        assert_eq!(decision.risk, SecurityRiskLevel::Medium);
        assert!(!decision.transport.verify_certificates);
        assert_eq!(decision.metadata.get("error_kind").map(String::as_str), Some("untrusted_ca"));
    }

    #[test]
    fn test_retry_and_prompt_halve_the_score() {
        assert_eq!(
            risk_score(CertificateErrorKind::Revoked, FallbackAction::Retry, false),
            5
        );
        assert_eq!(
            risk_score(CertificateErrorKind::Revoked, FallbackAction::Accept, true),
            5
        );
        assert_eq!(
            risk_score(CertificateErrorKind::NotYetValid, FallbackAction::Retry, false),
            1
        );
        assert_eq!(
            risk_score(CertificateErrorKind::SelfSigned, FallbackAction::Deny, true),
            0
        );
    }

    #[test]
    fn test_retry_keeps_verification() {
        assert!(transport_for(FallbackAction::Retry).verify_certificates);
        assert!(!transport_for(FallbackAction::Log).verify_certificates);
    }

    #[test]
    fn test_score_is_clamped() {
        let decision = Decision::new(FallbackAction::Accept, 42, "x", DecisionSource::Escalation);
        assert_eq!(decision.risk_score, 10);
        assert_eq!(decision.risk, SecurityRiskLevel::High);
    }

    #[test]
    fn test_display() {
        let decision = Decision::deny("revoked", DecisionSource::Rule);
        assert_eq!(decision.to_string(), "deny (risk none, rule): revoked");
    }
}
