//! Explicit consent for disabling certificate verification.
//!
//! Insecure mode is only entered for a host when one of these holds:
//! - an environment override names the host, or all hosts
//! - confirmation is not required by configuration
//! - an operator typed `yes` within the confirmation timeout
//!
//! Every outcome is written to the audit trail. Consents expire after a TTL
//! measured on the injected [`Clock`].

use std::collections::HashMap;
use std::fmt::{self, Write as _};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tlsguard_audit::AuditLogger;
use tlsguard_core::{Clock, SecurityRiskLevel, SystemClock, TransportConfig};
use tracing::{debug, info, warn};

use crate::config::EnvOverrides;
use crate::error::EngineError;
use crate::prompt::{ConfirmationInput, Console, ReadOutcome};
use crate::strategy::host_key;

/// Shortest allowed confirmation timeout.
pub const MIN_CONFIRMATION_TIMEOUT: Duration = Duration::from_secs(1);

/// Longest allowed confirmation timeout.
pub const MAX_CONFIRMATION_TIMEOUT: Duration = Duration::from_secs(300);

/// Confirmation behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsecureConfig {
    /// Whether an operator must confirm.
    pub require_confirmation: bool,

    /// Whether warnings are printed before the question.
    pub show_warnings: bool,

    /// Whether answers are remembered for `consent_ttl`.
    pub remember_decisions: bool,

    /// How long the question waits.
    pub confirmation_timeout: Duration,

    /// How long a remembered answer stays valid.
    pub consent_ttl: chrono::Duration,
}

impl Default for InsecureConfig {
    fn default() -> Self {
        Self {
            require_confirmation: true,
            show_warnings: true,
            remember_decisions: true,
            confirmation_timeout: Duration::from_secs(30),
            consent_ttl: chrono::Duration::hours(1),
        }
    }
}

impl InsecureConfig {
    /// Checks the timeout and TTL bounds.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidConfig`] if a bound is violated.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.confirmation_timeout < MIN_CONFIRMATION_TIMEOUT
            || self.confirmation_timeout > MAX_CONFIRMATION_TIMEOUT
        {
            return Err(EngineError::invalid_config(format!(
                "confirmation timeout must be between {}s and {}s",
                MIN_CONFIRMATION_TIMEOUT.as_secs(),
                MAX_CONFIRMATION_TIMEOUT.as_secs()
            )));
        }
        if self.consent_ttl <= chrono::Duration::zero() {
            return Err(EngineError::invalid_config("consent TTL must be positive"));
        }
        Ok(())
    }
}

/// How a consent came about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsentSource {
    /// An operator answered.
    Interactive,
    /// An environment variable allowed it.
    EnvironmentOverride,
    /// Configuration does not require confirmation.
    Configuration,
}

impl ConsentSource {
    /// Returns the stable identifier.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Interactive => "interactive",
            Self::EnvironmentOverride => "environment_override",
            Self::Configuration => "configuration",
        }
    }
}

/// A recorded answer about one host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsecureConsent {
    /// Host the answer covers.
    pub hostname: String,
    /// Whether insecure mode was allowed.
    pub confirmed: bool,
    /// When the answer was recorded.
    pub timestamp: DateTime<Utc>,
    /// Why.
    pub reason: String,
    /// How.
    pub source: ConsentSource,
    /// Whether the consent ends with the process.
    pub session_scoped: bool,
}

impl InsecureConsent {
    /// Transport to use under this consent, if it allows one.
    #[must_use]
    pub fn transport(&self) -> Option<TransportConfig> {
        self.confirmed.then(TransportConfig::unverified)
    }

    /// Whether the consent is past `ttl` at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>, ttl: chrono::Duration) -> bool {
        now - self.timestamp >= ttl
    }
}

/// How loud a warning is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum WarningLevel {
    /// Informational.
    Info,
    /// Worth noticing.
    Caution,
    /// Likely harmful.
    Danger,
    /// Harmful.
    Critical,
}

impl fmt::Display for WarningLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Info => "INFO",
            Self::Caution => "CAUTION",
            Self::Danger => "DANGER",
            Self::Critical => "CRITICAL",
        })
    }
}

/// One warning shown before the insecure-mode question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityWarning {
    /// Level.
    pub level: WarningLevel,
    /// Short title.
    pub title: String,
    /// Body.
    pub message: String,
}

/// Warnings for disabling verification on `hostname`, loudest first.
#[must_use]
pub fn insecure_mode_warnings(hostname: &str) -> Vec<SecurityWarning> {
    vec![
        SecurityWarning {
            level: WarningLevel::Critical,
            title: "Certificate verification disabled".to_string(),
            message: format!(
                "Connections to {hostname} will not verify the server's identity. \
                 Anyone on the network path can impersonate the registry."
            ),
        },
        SecurityWarning {
            level: WarningLevel::Danger,
            title: "Image integrity at risk".to_string(),
            message: "Pulled images and pushed credentials can be intercepted or replaced."
                .to_string(),
        },
        SecurityWarning {
            level: WarningLevel::Caution,
            title: "Not for production".to_string(),
            message: "Use insecure mode only for local or throwaway registries.".to_string(),
        },
        SecurityWarning {
            level: WarningLevel::Info,
            title: "Safer alternative".to_string(),
            message: format!(
                "Install the registry's CA certificate, e.g. under /etc/docker/certs.d/{hostname}/ca.crt"
            ),
        },
    ]
}

fn render_warnings(warnings: &[SecurityWarning]) -> String {
    let mut out = String::from("\n");
    for warning in warnings {
        let _ = writeln!(out, "[{}] {}", warning.level, warning.title);
        let _ = writeln!(out, "    {}", warning.message);
    }
    out
}

/// Obtains, remembers and revokes insecure-mode consent per host.
#[derive(Debug)]
pub struct InsecureModeManager {
    config: InsecureConfig,
    overrides: EnvOverrides,
    consents: RwLock<HashMap<String, InsecureConsent>>,
    input: Arc<dyn ConfirmationInput>,
    console: Console,
    audit: Arc<AuditLogger>,
    clock: Arc<dyn Clock>,
}

impl InsecureModeManager {
    /// Creates a manager.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidConfig`] if `config` fails validation.
    pub fn new(
        config: InsecureConfig,
        overrides: EnvOverrides,
        input: Arc<dyn ConfirmationInput>,
        console: Console,
        audit: Arc<AuditLogger>,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self {
            config,
            overrides,
            consents: RwLock::new(HashMap::new()),
            input,
            console,
            audit,
            clock: Arc::new(SystemClock),
        })
    }

    /// Replaces the clock used for consent expiry.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &InsecureConfig {
        &self.config
    }

    /// Decides whether certificate verification may be disabled for
    /// `hostname`. Returns `true` only with explicit consent.
    pub fn confirm(&self, hostname: &str) -> bool {
        let key = host_key(hostname);
        if key.is_empty() {
            return false;
        }

        if let Some(consent) = self.remembered(&key) {
            info!(
                hostname = %key,
                confirmed = consent.confirmed,
                "Reusing remembered insecure-mode answer"
            );
            self.audit.log_insecure_mode(
                &key,
                "remembered",
                consent.confirmed,
                &format!("{} ({})", consent.reason, consent.source.as_str()),
            );
            return consent.confirmed;
        }

        if let Some(variable) = self.overrides.source_for(&key) {
            warn!(hostname = %key, variable = %variable, "Insecure mode enabled by environment");
            let reason = format!("{variable} is set");
            return self.grant(&key, ConsentSource::EnvironmentOverride, &reason, false);
        }

        if !self.config.require_confirmation {
            warn!(hostname = %key, "Insecure mode enabled without confirmation");
            return self.grant(
                &key,
                ConsentSource::Configuration,
                "confirmation not required by configuration",
                true,
            );
        }

        self.ask(&key)
    }

    fn ask(&self, key: &str) -> bool {
        let timeout = self.config.confirmation_timeout;
        if self.config.show_warnings {
            self.console.write(&render_warnings(&insecure_mode_warnings(key)));
        }
        self.console.write(&format!(
            "Type 'yes' to disable certificate verification for {key} ({}s): ",
            timeout.as_secs()
        ));

        match self.input.read_line(timeout) {
            ReadOutcome::Line(answer) if answer.trim().eq_ignore_ascii_case("yes") => {
                self.grant(key, ConsentSource::Interactive, "confirmed by operator", true)
            }
            ReadOutcome::Line(_) => {
                self.refuse(key, "rejected by operator", true);
                false
            }
            ReadOutcome::TimedOut => {
                self.console.write("\nNo confirmation received, keeping verification on.\n");
                self.refuse(key, "confirmation timed out", false);
                false
            }
            ReadOutcome::Closed => {
                self.refuse(key, "confirmation input closed", false);
                false
            }
            ReadOutcome::Failed(reason) => {
                warn!(hostname = %key, "Failed to read confirmation: {}", reason);
                self.refuse(key, &format!("confirmation input failed: {reason}"), false);
                false
            }
        }
    }

    fn grant(&self, key: &str, source: ConsentSource, reason: &str, session_scoped: bool) -> bool {
        let consent = InsecureConsent {
            hostname: key.to_string(),
            confirmed: true,
            timestamp: self.clock.now(),
            reason: reason.to_string(),
            source,
            session_scoped,
        };
        let expires = consent.timestamp + self.config.consent_ttl;
        self.store(consent);
        self.audit
            .log_insecure_mode(key, source.as_str(), true, reason);
        self.audit
            .log_risk_accepted(key, SecurityRiskLevel::Critical, reason);
        self.console.write(&format!(
            "\nSECURITY ALERT: certificate verification disabled for {key} until {} ({})\n",
            expires.format("%Y-%m-%d %H:%M:%S UTC"),
            source.as_str()
        ));
        true
    }

    fn refuse(&self, key: &str, reason: &str, remember: bool) {
        info!(hostname = %key, reason = %reason, "Insecure mode not enabled");
        if remember {
            self.store(InsecureConsent {
                hostname: key.to_string(),
                confirmed: false,
                timestamp: self.clock.now(),
                reason: reason.to_string(),
                source: ConsentSource::Interactive,
                session_scoped: true,
            });
        }
        self.audit
            .log_insecure_mode(key, ConsentSource::Interactive.as_str(), false, reason);
        self.audit
            .log_risk_rejected(key, SecurityRiskLevel::Critical, reason);
    }

    fn store(&self, consent: InsecureConsent) {
        if self.config.remember_decisions {
            let mut consents = self.consents.write();
            self.prune_expired(&mut consents);
            consents.insert(consent.hostname.clone(), consent);
        }
    }

    fn prune_expired(&self, consents: &mut HashMap<String, InsecureConsent>) {
        let now = self.clock.now();
        let ttl = self.config.consent_ttl;
        let before = consents.len();
        consents.retain(|_, c| !c.is_expired_at(now, ttl));
        let pruned = before - consents.len();
        if pruned > 0 {
            debug!(pruned, "Dropped expired insecure-mode answers");
        }
    }

    fn remembered(&self, key: &str) -> Option<InsecureConsent> {
        if !self.config.remember_decisions {
            return None;
        }
        let now = self.clock.now();
        let consent = self.consents.read().get(key).cloned()?;
        if consent.is_expired_at(now, self.config.consent_ttl) {
            info!(hostname = %key, "Insecure-mode answer expired");
            self.consents.write().remove(key);
            return None;
        }
        Some(consent)
    }

    /// Remembered consent for `hostname`, if still valid.
    #[must_use]
    pub fn consent(&self, hostname: &str) -> Option<InsecureConsent> {
        self.remembered(&host_key(hostname))
    }

    /// Whether insecure mode is currently in effect for `hostname`, without
    /// asking anyone.
    #[must_use]
    pub fn is_insecure(&self, hostname: &str) -> bool {
        let key = host_key(hostname);
        self.overrides.allows(&key)
            || self.remembered(&key).is_some_and(|c| c.confirmed)
    }

    /// Forgets any answer for `hostname`. Returns whether one existed.
    pub fn revoke(&self, hostname: &str) -> bool {
        let key = host_key(hostname);
        let removed = self.consents.write().remove(&key).is_some();
        if removed {
            info!(hostname = %key, "Insecure-mode consent revoked");
            self.audit.log_security_decision(
                &key,
                "revoke_insecure_mode",
                "consent revoked",
                SecurityRiskLevel::None,
                false,
            );
        }
        removed
    }

    /// Hosts with a valid confirmed consent, sorted.
    #[must_use]
    pub fn list_insecure_hosts(&self) -> Vec<String> {
        let mut consents = self.consents.write();
        self.prune_expired(&mut consents);
        let mut hosts: Vec<String> = consents
            .values()
            .filter(|c| c.confirmed)
            .map(|c| c.hostname.clone())
            .collect();
        drop(consents);
        hosts.sort();
        hosts
    }

    /// Human-readable status.
    #[must_use]
    pub fn status_report(&self) -> String {
        let now = self.clock.now();
        let mut out = String::from("Insecure mode status\n");
        let _ = writeln!(
            out,
            "  confirmation required: {}",
            self.config.require_confirmation
        );
        let _ = writeln!(
            out,
            "  environment override: {}",
            if self.overrides.is_global() {
                "all hosts"
            } else if self.overrides.hosts().is_empty() {
                "none"
            } else {
                "per host"
            }
        );
        let hosts = self.list_insecure_hosts();
        if hosts.is_empty() {
            out.push_str("  no hosts in insecure mode\n");
        } else {
            let consents = self.consents.read();
            for host in hosts {
                if let Some(consent) = consents.get(&host) {
                    let remaining = consent.timestamp + self.config.consent_ttl - now;
                    let _ = writeln!(
                        out,
                        "  {host}: {} ({}m remaining)",
                        consent.source.as_str(),
                        remaining.num_minutes()
                    );
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::ScriptedInput;
    use tlsguard_audit::{InMemoryBackend, SecurityEventType};
    use tlsguard_core::ManualClock;

    struct Fixture {
        manager: InsecureModeManager,
        input: Arc<ScriptedInput>,
        backend: Arc<InMemoryBackend>,
        clock: Arc<ManualClock>,
        output: crate::prompt::CapturedOutput,
    }

    fn fixture(answers: Vec<ReadOutcome>, overrides: EnvOverrides) -> Fixture {
        let input = Arc::new(ScriptedInput::new(answers));
        let backend = Arc::new(InMemoryBackend::new());
        let audit = Arc::new(AuditLogger::builder().with_backend(backend.clone()).build());
        let clock = Arc::new(ManualClock::default());
        let (console, output) = Console::captured();
        let manager = InsecureModeManager::new(
            InsecureConfig::default(),
            overrides,
            input.clone(),
            console,
            audit,
        )
        .unwrap()
        .with_clock(clock.clone());
        Fixture {
            manager,
            input,
            backend,
            clock,
            output,
        }
    }

    fn line(s: &str) -> ReadOutcome {
        ReadOutcome::Line(s.to_string())
    }

    #[test]
    fn test_yes_confirms_and_is_audited() {
        let f = fixture(vec![line("yes")], EnvOverrides::default());
        assert!(f.manager.confirm("Registry.Local:5000"));

        let records = f.backend.records_of(SecurityEventType::InsecureModeUsed);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].hostname, "registry.local:5000");
        assert!(records[0].allowed);
        assert_eq!(records[0].detail("source"), Some("interactive"));

        let out = f.output.contents();
        assert!(out.contains("[CRITICAL]"));
        assert!(out.contains("SECURITY ALERT"));
        assert!(f.manager.is_insecure("registry.local:5000"));
    }

    #[test]
    fn test_anything_but_yes_is_rejected_and_remembered() {
        let f = fixture(vec![line("y")], EnvOverrides::default());
        assert!(!f.manager.confirm("registry.local"));
        assert!(!f.manager.confirm("registry.local"));
        assert_eq!(f.input.reads(), 1);
        assert!(f.manager.list_insecure_hosts().is_empty());
    }

    #[test]
    fn test_timeout_is_not_remembered() {
        let f = fixture(
            vec![ReadOutcome::TimedOut, line("yes")],
            EnvOverrides::default(),
        );
        assert!(!f.manager.confirm("registry.local"));
        assert!(f.manager.confirm("registry.local"));
        assert_eq!(f.input.reads(), 2);
    }

    #[test]
    fn test_consent_expires_after_ttl() {
        let f = fixture(vec![line("yes"), line("yes")], EnvOverrides::default());
        assert!(f.manager.confirm("registry.local"));

        f.clock.advance(chrono::Duration::minutes(30));
        assert!(f.manager.confirm("registry.local"));
        assert_eq!(f.input.reads(), 1);

        f.clock.advance(chrono::Duration::minutes(31));
        assert!(!f.manager.is_insecure("registry.local"));
        assert!(f.manager.confirm("registry.local"));
        assert_eq!(f.input.reads(), 2);
    }

    #[test]
    fn test_expired_answers_are_pruned() {
        let f = fixture(vec![line("yes"), line("no"), line("yes")], EnvOverrides::default());
        assert!(f.manager.confirm("a.local"));
        assert!(!f.manager.confirm("b.local"));
        assert_eq!(f.manager.consents.read().len(), 2);

        f.clock.advance(chrono::Duration::minutes(61));
        assert!(f.manager.list_insecure_hosts().is_empty());
        assert!(f.manager.consents.read().is_empty());

        assert!(f.manager.confirm("c.local"));
        f.clock.advance(chrono::Duration::minutes(61));
        assert!(f.manager.list_insecure_hosts().is_empty());
        assert!(f.manager.consents.read().is_empty());
    }

    #[test]
    fn test_storing_an_answer_prunes_expired_ones() {
        let f = fixture(vec![line("yes"), line("yes")], EnvOverrides::default());
        assert!(f.manager.confirm("a.local"));
        f.clock.advance(chrono::Duration::minutes(61));
        assert!(f.manager.confirm("b.local"));

        let consents = f.manager.consents.read();
        assert_eq!(consents.len(), 1);
        assert!(consents.contains_key("b.local"));
    }

    #[test]
    fn test_environment_override_skips_prompt() {
        let overrides = EnvOverrides::default().with_host("kind-registry:5000");
        let f = fixture(Vec::new(), overrides);
        assert!(f.manager.confirm("kind-registry:5000"));
        assert_eq!(f.input.reads(), 0);

        let records = f.backend.records_of(SecurityEventType::InsecureModeUsed);
        assert_eq!(records[0].detail("source"), Some("environment_override"));
        assert!(f.manager.consent("kind-registry:5000").is_some_and(|c| !c.session_scoped));
    }

    #[test]
    fn test_revoke_and_report() {
        let f = fixture(vec![line("yes")], EnvOverrides::default());
        assert!(f.manager.confirm("b.local"));
        assert_eq!(f.manager.list_insecure_hosts(), vec!["b.local".to_string()]);
        assert!(f.manager.status_report().contains("b.local: interactive"));

        assert!(f.manager.revoke("b.local"));
        assert!(!f.manager.revoke("b.local"));
        assert!(f.manager.status_report().contains("no hosts in insecure mode"));
        assert_eq!(f.backend.records_of(SecurityEventType::SecurityDecision).len(), 1);
    }

    #[test]
    fn test_consent_transport() {
        let f = fixture(vec![line("yes")], EnvOverrides::default());
        f.manager.confirm("c.local");
        let consent = f.manager.consent("c.local").unwrap();
        assert_eq!(consent.transport(), Some(TransportConfig::unverified()));

        let refused = InsecureConsent {
            confirmed: false,
            ..consent
        };
        assert_eq!(refused.transport(), None);
    }

    #[test]
    fn test_config_validation() {
        let mut config = InsecureConfig::default();
        assert!(config.validate().is_ok());
        config.confirmation_timeout = Duration::from_millis(10);
        assert!(config.validate().is_err());
        config.confirmation_timeout = Duration::from_secs(600);
        assert!(config.validate().is_err());
        config.confirmation_timeout = Duration::from_secs(30);
        config.consent_ttl = chrono::Duration::zero();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_hostname_is_refused() {
        let f = fixture(vec![line("yes")], EnvOverrides::default());
        assert!(!f.manager.confirm("  "));
        assert_eq!(f.input.reads(), 0);
    }
}
