//! Fallback strategy configuration.
//!
//! A [`Strategy`] decides which [`FallbackAction`] applies to a certificate
//! failure. It is built once and replaced as a whole.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tlsguard_core::{host_without_port, CertificateErrorKind};

use crate::error::EngineError;

/// Longest a prompt may wait for an answer.
pub const MAX_DECISION_TIMEOUT: Duration = Duration::from_secs(600);

/// Upper bound on retry budgets.
pub const MAX_RETRIES: u32 = 10;

/// What to do about a certificate failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FallbackAction {
    /// Refuse the connection.
    Deny,
    /// Accept the certificate for this connection.
    Accept,
    /// Accept the certificate and flag it for review.
    Log,
    /// Ask an operator.
    Prompt,
    /// Retry with a different transport that still verifies certificates.
    Retry,
}

impl FallbackAction {
    /// Returns the lowercase identifier.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Deny => "deny",
            Self::Accept => "accept",
            Self::Log => "log",
            Self::Prompt => "prompt",
            Self::Retry => "retry",
        }
    }

    /// Whether the connection may proceed with verification disabled.
    #[must_use]
    pub const fn accepts_certificate(self) -> bool {
        matches!(self, Self::Accept | Self::Log)
    }
}

impl fmt::Display for FallbackAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Overall security posture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecurityMode {
    /// Never accept invalid certificates.
    #[default]
    Secure,
    /// Accept and log recoverable failures.
    Permissive,
    /// Accept failures typical of local development.
    Development,
    /// Ask an operator.
    Interactive,
    /// Only the explicit rule table applies.
    Custom,
}

impl SecurityMode {
    /// Action for kinds the rule table does not mention.
    #[must_use]
    pub const fn default_action(self) -> FallbackAction {
        match self {
            Self::Secure | Self::Custom => FallbackAction::Deny,
            Self::Permissive => FallbackAction::Log,
            Self::Development => FallbackAction::Accept,
            Self::Interactive => FallbackAction::Prompt,
        }
    }
}

impl fmt::Display for SecurityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Secure => write!(f, "secure"),
            Self::Permissive => write!(f, "permissive"),
            Self::Development => write!(f, "development"),
            Self::Interactive => write!(f, "interactive"),
            Self::Custom => write!(f, "custom"),
        }
    }
}

impl std::str::FromStr for SecurityMode {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "secure" => Ok(Self::Secure),
            "permissive" => Ok(Self::Permissive),
            "development" | "dev" => Ok(Self::Development),
            "interactive" => Ok(Self::Interactive),
            "custom" => Ok(Self::Custom),
            other => Err(EngineError::invalid_strategy(format!(
                "unknown security mode '{other}'"
            ))),
        }
    }
}

/// Lowercases a hostname for use as a table key.
pub(crate) fn host_key(hostname: &str) -> String {
    hostname.trim().trim_end_matches('.').to_ascii_lowercase()
}

/// Strategy configuration.
///
/// A serialized strategy starts from the preset for its `mode`; fields
/// present in the document replace the preset's values and `rules` are
/// merged over the preset's table. Hostname keys are normalized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "StrategyDocument")]
pub struct Strategy {
    /// Security posture, supplying the default action.
    mode: SecurityMode,

    /// Per-kind actions.
    rules: BTreeMap<CertificateErrorKind, FallbackAction>,

    /// Per-hostname actions, which win over everything else.
    host_overrides: BTreeMap<String, FallbackAction>,

    /// Hosts whose certificates are always accepted.
    insecure_hosts: BTreeSet<String>,

    /// Whether operators may be prompted.
    prompt_enabled: bool,

    /// Whether decisions are remembered per (host, kind).
    remember_decisions: bool,

    /// Whether remembered decisions survive this strategy replacing another.
    retain_memory: bool,

    /// How long a prompt waits, in seconds.
    decision_timeout_secs: u64,

    /// Retry budget for transport-level retries.
    max_retries: u32,
}

impl Default for Strategy {
    fn default() -> Self {
        Self::secure()
    }
}

/// A strategy as written in a file: only `mode` has a default.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct StrategyDocument {
    mode: SecurityMode,
    rules: BTreeMap<CertificateErrorKind, FallbackAction>,
    host_overrides: BTreeMap<String, FallbackAction>,
    insecure_hosts: Vec<String>,
    prompt_enabled: Option<bool>,
    remember_decisions: Option<bool>,
    retain_memory: Option<bool>,
    decision_timeout_secs: Option<u64>,
    max_retries: Option<u32>,
}

impl TryFrom<StrategyDocument> for Strategy {
    type Error = EngineError;

    fn try_from(document: StrategyDocument) -> Result<Self, Self::Error> {
        let mut strategy = Self::for_mode(document.mode);
        strategy.rules.extend(document.rules);

        for (hostname, action) in document.host_overrides {
            let key = host_key(&hostname);
            match strategy.host_overrides.insert(key.clone(), action) {
                Some(previous) if previous != action => {
                    return Err(EngineError::invalid_strategy(format!(
                        "conflicting overrides for host '{key}'"
                    )));
                }
                _ => {}
            }
        }
        strategy
            .insecure_hosts
            .extend(document.insecure_hosts.iter().map(|h| host_key(h)));

        if let Some(enabled) = document.prompt_enabled {
            strategy.prompt_enabled = enabled;
        }
        if let Some(enabled) = document.remember_decisions {
            strategy.remember_decisions = enabled;
        }
        if let Some(retain) = document.retain_memory {
            strategy.retain_memory = retain;
        }
        if let Some(secs) = document.decision_timeout_secs {
            strategy.decision_timeout_secs = secs;
        }
        if let Some(retries) = document.max_retries {
            strategy.max_retries = retries;
        }
        Ok(strategy)
    }
}

const BROKEN_AT_SOURCE: [CertificateErrorKind; 3] = [
    CertificateErrorKind::Expired,
    CertificateErrorKind::Revoked,
    CertificateErrorKind::BadCertificate,
];

impl Strategy {
    fn base(mode: SecurityMode) -> Self {
        Self {
            mode,
            rules: BTreeMap::new(),
            host_overrides: BTreeMap::new(),
            insecure_hosts: BTreeSet::new(),
            prompt_enabled: false,
            remember_decisions: false,
            retain_memory: false,
            decision_timeout_secs: 30,
            max_retries: 3,
        }
    }

    /// Denies every certificate failure.
    #[must_use]
    pub fn secure() -> Self {
        let mut strategy = Self::base(SecurityMode::Secure);
        for kind in CertificateErrorKind::ALL {
            strategy.rules.insert(kind, FallbackAction::Deny);
        }
        strategy
    }

    /// Logs and accepts recoverable failures, denies the rest.
    #[must_use]
    pub fn permissive() -> Self {
        let mut strategy = Self::base(SecurityMode::Permissive);
        for kind in CertificateErrorKind::ALL {
            if !kind.is_recoverable() {
                strategy.rules.insert(kind, FallbackAction::Deny);
            }
        }
        strategy.remember_decisions = true;
        strategy
    }

    /// Logs and accepts failures typical of local registries. Certificates
    /// that are expired, revoked or malformed are still denied.
    #[must_use]
    pub fn development() -> Self {
        let mut strategy = Self::base(SecurityMode::Development);
        for kind in CertificateErrorKind::ALL {
            let action = if BROKEN_AT_SOURCE.contains(&kind) {
                FallbackAction::Deny
            } else {
                FallbackAction::Log
            };
            strategy.rules.insert(kind, action);
        }
        strategy.remember_decisions = true;
        strategy
    }

    /// Prompts for everything except certificates broken at the source.
    #[must_use]
    pub fn interactive() -> Self {
        let mut strategy = Self::base(SecurityMode::Interactive);
        for kind in BROKEN_AT_SOURCE {
            strategy.rules.insert(kind, FallbackAction::Deny);
        }
        strategy.prompt_enabled = true;
        strategy.remember_decisions = true;
        strategy.decision_timeout_secs = 60;
        strategy.max_retries = 1;
        strategy
    }

    /// An empty rule table on top of the custom mode default.
    #[must_use]
    pub fn custom() -> Self {
        Self::base(SecurityMode::Custom)
    }

    /// Preset for a mode.
    #[must_use]
    pub fn for_mode(mode: SecurityMode) -> Self {
        match mode {
            SecurityMode::Secure => Self::secure(),
            SecurityMode::Permissive => Self::permissive(),
            SecurityMode::Development => Self::development(),
            SecurityMode::Interactive => Self::interactive(),
            SecurityMode::Custom => Self::custom(),
        }
    }

    /// Parses and validates a YAML (or JSON) strategy document.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::StrategyParse`] or [`EngineError::InvalidStrategy`].
    pub fn from_yaml(document: &str) -> Result<Self, EngineError> {
        let strategy: Self = serde_yaml::from_str(document)
            .map_err(|source| EngineError::StrategyParse { source })?;
        strategy.validate()?;
        Ok(strategy)
    }

    /// Checks the strategy for values the engine cannot honor.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidStrategy`] describing the first problem.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.prompt_enabled && self.decision_timeout_secs == 0 {
            return Err(EngineError::invalid_strategy(
                "decision timeout must be positive when prompting is enabled",
            ));
        }
        if self.decision_timeout() > MAX_DECISION_TIMEOUT {
            return Err(EngineError::invalid_strategy(format!(
                "decision timeout exceeds {}s",
                MAX_DECISION_TIMEOUT.as_secs()
            )));
        }
        if self.max_retries > MAX_RETRIES {
            return Err(EngineError::invalid_strategy(format!(
                "max retries exceeds {MAX_RETRIES}"
            )));
        }
        let empty_host = self
            .host_overrides
            .keys()
            .chain(self.insecure_hosts.iter())
            .any(|h| h.trim().is_empty());
        if empty_host {
            return Err(EngineError::invalid_strategy("hostname entries must not be empty"));
        }
        let unnormalized = self
            .host_overrides
            .keys()
            .chain(self.insecure_hosts.iter())
            .find(|h| host_key(h) != **h);
        if let Some(host) = unnormalized {
            return Err(EngineError::invalid_strategy(format!(
                "hostname entry '{host}' is not normalized"
            )));
        }
        Ok(())
    }

    /// Adds a per-kind rule.
    #[must_use]
    pub fn with_rule(mut self, kind: CertificateErrorKind, action: FallbackAction) -> Self {
        self.rules.insert(kind, action);
        self
    }

    /// Adds a per-hostname override.
    #[must_use]
    pub fn with_host_override(mut self, hostname: &str, action: FallbackAction) -> Self {
        self.host_overrides.insert(host_key(hostname), action);
        self
    }

    /// Marks a hostname as always insecure.
    #[must_use]
    pub fn with_insecure_host(mut self, hostname: &str) -> Self {
        self.insecure_hosts.insert(host_key(hostname));
        self
    }

    /// Enables or disables prompting.
    #[must_use]
    pub const fn with_prompt_enabled(mut self, enabled: bool) -> Self {
        self.prompt_enabled = enabled;
        self
    }

    /// Enables or disables decision memory.
    #[must_use]
    pub const fn with_memory(mut self, enabled: bool) -> Self {
        self.remember_decisions = enabled;
        self
    }

    /// Keeps remembered decisions when this strategy is installed.
    #[must_use]
    pub const fn retaining_memory(mut self) -> Self {
        self.retain_memory = true;
        self
    }

    /// Sets the prompt timeout, truncated to whole seconds.
    #[must_use]
    pub const fn with_decision_timeout(mut self, timeout: Duration) -> Self {
        self.decision_timeout_secs = timeout.as_secs();
        self
    }

    /// Sets the retry budget.
    #[must_use]
    pub const fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Returns the mode.
    #[must_use]
    pub const fn mode(&self) -> SecurityMode {
        self.mode
    }

    /// Returns the explicit rule for `kind`, if any.
    #[must_use]
    pub fn rule(&self, kind: CertificateErrorKind) -> Option<FallbackAction> {
        self.rules.get(&kind).copied()
    }

    /// Resolves `kind` through the rule table, then the mode default.
    #[must_use]
    pub fn action_for(&self, kind: CertificateErrorKind) -> FallbackAction {
        self.rule(kind)
            .unwrap_or_else(|| self.mode.default_action())
    }

    /// Returns the override for `hostname`, trying the exact host first and
    /// then the host without its port.
    #[must_use]
    pub fn host_override(&self, hostname: &str) -> Option<FallbackAction> {
        let key = host_key(hostname);
        self.host_overrides
            .get(&key)
            .or_else(|| self.host_overrides.get(host_without_port(&key)))
            .copied()
    }

    /// Whether `hostname` is marked always insecure.
    #[must_use]
    pub fn is_insecure_host(&self, hostname: &str) -> bool {
        let key = host_key(hostname);
        self.insecure_hosts.contains(&key) || self.insecure_hosts.contains(host_without_port(&key))
    }

    /// Whether prompting is enabled.
    #[must_use]
    pub const fn prompt_enabled(&self) -> bool {
        self.prompt_enabled
    }

    /// Whether decisions are remembered.
    #[must_use]
    pub const fn remember_decisions(&self) -> bool {
        self.remember_decisions
    }

    /// Whether installing this strategy keeps remembered decisions.
    #[must_use]
    pub const fn retain_memory(&self) -> bool {
        self.retain_memory
    }

    /// How long a prompt waits.
    #[must_use]
    pub const fn decision_timeout(&self) -> Duration {
        Duration::from_secs(self.decision_timeout_secs)
    }

    /// Retry budget.
    #[must_use]
    pub const fn max_retries(&self) -> u32 {
        self.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_defaults() {
        assert_eq!(SecurityMode::Secure.default_action(), FallbackAction::Deny);
        assert_eq!(SecurityMode::Permissive.default_action(), FallbackAction::Log);
        assert_eq!(SecurityMode::Development.default_action(), FallbackAction::Accept);
        assert_eq!(SecurityMode::Interactive.default_action(), FallbackAction::Prompt);
        assert_eq!(SecurityMode::Custom.default_action(), FallbackAction::Deny);
    }

    #[test]
    fn test_secure_denies_everything() {
        let strategy = Strategy::secure();
        for kind in CertificateErrorKind::ALL {
            assert_eq!(strategy.action_for(kind), FallbackAction::Deny);
        }
        assert!(!strategy.remember_decisions());
        assert!(!strategy.prompt_enabled());
    }

    #[test]
    fn test_development_preset() {
        let strategy = Strategy::development();
        assert_eq!(strategy.action_for(CertificateErrorKind::Expired), FallbackAction::Deny);
        assert_eq!(strategy.action_for(CertificateErrorKind::UntrustedCA), FallbackAction::Log);
        assert_eq!(strategy.action_for(CertificateErrorKind::SelfSigned), FallbackAction::Log);
        assert!(strategy.remember_decisions());
    }

    #[test]
    fn test_interactive_preset_falls_back_to_prompt() {
        let strategy = Strategy::interactive();
        assert_eq!(strategy.rule(CertificateErrorKind::SelfSigned), None);
        assert_eq!(strategy.action_for(CertificateErrorKind::SelfSigned), FallbackAction::Prompt);
        assert_eq!(strategy.action_for(CertificateErrorKind::Revoked), FallbackAction::Deny);
        assert_eq!(strategy.decision_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn test_permissive_preset() {
        let strategy = Strategy::permissive();
        assert_eq!(strategy.action_for(CertificateErrorKind::HostnameMismatch), FallbackAction::Log);
        assert_eq!(strategy.action_for(CertificateErrorKind::KeyUsageInvalid), FallbackAction::Deny);
    }

    #[test]
    fn test_host_lookup_ignores_case_and_port() {
        let strategy = Strategy::custom()
            .with_host_override("Registry.Example.com", FallbackAction::Accept)
            .with_insecure_host("localhost");
        assert_eq!(
            strategy.host_override("registry.example.com:5000"),
            Some(FallbackAction::Accept)
        );
        assert_eq!(strategy.host_override("other.example.com"), None);
        assert!(strategy.is_insecure_host("LOCALHOST:5000"));
        assert!(!strategy.is_insecure_host("remote"));
    }

    #[test]
    fn test_validate() {
        assert!(Strategy::interactive().validate().is_ok());
        assert!(Strategy::interactive()
            .with_decision_timeout(Duration::ZERO)
            .validate()
            .is_err());
        assert!(Strategy::secure()
            .with_decision_timeout(Duration::from_secs(3600))
            .validate()
            .is_err());
        assert!(Strategy::secure().with_max_retries(50).validate().is_err());
        assert!(Strategy::secure().with_insecure_host("  ").validate().is_err());
    }

    #[test]
    fn test_from_yaml() {
        let strategy = Strategy::from_yaml(
            r"
mode: development
rules:
  self_signed: accept
  expired: deny
host_overrides:
  prod.example.com: deny
insecure_hosts:
  - localhost:5000
remember_decisions: true
decision_timeout_secs: 45
",
        )
        .unwrap();

        assert_eq!(strategy.mode(), SecurityMode::Development);
        assert_eq!(strategy.action_for(CertificateErrorKind::SelfSigned), FallbackAction::Accept);
        assert_eq!(strategy.action_for(CertificateErrorKind::HostnameMismatch), FallbackAction::Log);
        assert_eq!(strategy.host_override("prod.example.com"), Some(FallbackAction::Deny));
        assert!(strategy.is_insecure_host("localhost:5000"));
        assert_eq!(strategy.decision_timeout(), Duration::from_secs(45));
    }

    #[test]
    fn test_mode_only_document_matches_preset() {
        for mode in [
            SecurityMode::Secure,
            SecurityMode::Permissive,
            SecurityMode::Development,
            SecurityMode::Interactive,
            SecurityMode::Custom,
        ] {
            let strategy = Strategy::from_yaml(&format!("mode: {mode}\n")).unwrap();
            assert_eq!(strategy, Strategy::for_mode(mode), "{mode}");
        }

        let development = Strategy::from_yaml("mode: development\n").unwrap();
        assert_eq!(development.action_for(CertificateErrorKind::UntrustedCA), FallbackAction::Log);
        let permissive = Strategy::from_yaml("mode: permissive\n").unwrap();
        assert_eq!(permissive.action_for(CertificateErrorKind::HostnameMismatch), FallbackAction::Log);
        let interactive = Strategy::from_yaml("mode: interactive\n").unwrap();
        assert_eq!(interactive.action_for(CertificateErrorKind::SelfSigned), FallbackAction::Prompt);
        assert!(interactive.prompt_enabled());
    }

    #[test]
    fn test_explicit_fields_replace_preset_values() {
        let strategy = Strategy::from_yaml("mode: interactive\nprompt_enabled: false\nmax_retries: 2\n")
            .unwrap();
        assert!(!strategy.prompt_enabled());
        assert_eq!(strategy.max_retries(), 2);
        assert_eq!(strategy.decision_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn test_document_hostnames_are_normalized() {
        let strategy = Strategy::from_yaml(
            r"
mode: development
host_overrides:
  Prod.Example.com: deny
insecure_hosts:
  - Dev.Local.
",
        )
        .unwrap();
        assert_eq!(strategy.host_override("prod.example.com"), Some(FallbackAction::Deny));
        assert_eq!(strategy.host_override("PROD.example.com:443"), Some(FallbackAction::Deny));
        assert!(strategy.is_insecure_host("dev.local"));
        assert!(strategy.validate().is_ok());
    }

    #[test]
    fn test_conflicting_hostname_overrides_are_rejected() {
        let document = "host_overrides:\n  A.example.com: accept\n  a.example.com: deny\n";
        assert!(Strategy::from_yaml(document).is_err());
    }

    #[test]
    fn test_serialized_strategy_reads_back() {
        let strategy = Strategy::interactive()
            .with_rule(CertificateErrorKind::SelfSigned, FallbackAction::Accept)
            .with_host_override("prod.example.com", FallbackAction::Deny);
        let yaml = serde_yaml::to_string(&strategy).unwrap();
        assert_eq!(Strategy::from_yaml(&yaml).unwrap(), strategy);
    }

    #[test]
    fn test_from_yaml_rejects_bad_documents() {
        assert!(matches!(
            Strategy::from_yaml("mode: reckless"),
            Err(EngineError::StrategyParse { .. })
        ));
        assert!(matches!(
            Strategy::from_yaml("max_retries: 99"),
            Err(EngineError::InvalidStrategy { .. })
        ));
        assert!(matches!(
            Strategy::from_yaml("mode: secure\nmax_retrys: 2"),
            Err(EngineError::StrategyParse { .. })
        ));
    }

    #[test]
    fn test_mode_from_str() {
        assert_eq!("Dev".parse::<SecurityMode>().unwrap(), SecurityMode::Development);
        assert!("nope".parse::<SecurityMode>().is_err());
    }
}
