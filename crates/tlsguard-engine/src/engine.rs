//! The fallback decision engine.
//!
//! [`FallbackEngine`] is a cheaply cloneable handle. Clones share the active
//! strategy, the decision memory, the trusted-host set, the audit logger and
//! the insecure-mode manager.

use std::collections::{BTreeSet, HashMap};
use std::error::Error as StdError;
use std::sync::Arc;

use parking_lot::RwLock;
use tlsguard_audit::{new_record_id, AuditLogger, AuditRecord, SecurityEventType, TracingBackend};
use tlsguard_core::{
    host_without_port, CertificateErrorKind, CertificateFailure, ClassifiedError, Clock,
    ErrorClassifier, SecurityRiskLevel, SystemClock,
};
use tracing::{debug, info, instrument, warn};

use crate::config::EngineConfig;
use crate::decision::{Decision, DecisionSource};
use crate::error::EngineError;
use crate::escalation::{AttemptResult, EscalationAttempt, EscalationStep, FallbackOutcome};
use crate::insecure::InsecureModeManager;
use crate::probe::{ConnectionProbe, HttpsProbe, ProbeError};
use crate::prompt::{ConfirmationInput, Console, DecisionPrompter, StdinLines, TerminalPrompter};
use crate::recommend::{DetailedRecommendation, RecommendationEngine};
use crate::strategy::{host_key, FallbackAction, Strategy};

type MemoryKey = (String, CertificateErrorKind);

/// Remembered decisions, tagged with the strategy generation they were
/// made under. The generation moves on whenever memory is invalidated.
#[derive(Debug, Default)]
struct DecisionMemory {
    generation: u64,
    entries: HashMap<MemoryKey, Decision>,
}

impl DecisionMemory {
    fn invalidate(&mut self) {
        self.generation += 1;
        self.entries.clear();
    }

    fn get(&self, generation: u64, key: &MemoryKey) -> Option<&Decision> {
        if generation != self.generation {
            return None;
        }
        self.entries.get(key)
    }

    /// Stores `decision` unless memory was invalidated after `generation`
    /// was read. Returns whether it was stored.
    fn insert(&mut self, generation: u64, key: MemoryKey, decision: Decision) -> bool {
        if generation != self.generation {
            return false;
        }
        self.entries.insert(key, decision);
        true
    }
}

#[derive(Debug)]
struct Shared {
    config: EngineConfig,
    strategy: RwLock<Arc<Strategy>>,
    memory: RwLock<DecisionMemory>,
    trusted: RwLock<BTreeSet<String>>,
    classifier: ErrorClassifier,
    recommender: RecommendationEngine,
    audit: Arc<AuditLogger>,
    insecure: Arc<InsecureModeManager>,
    prompter: Option<Arc<dyn DecisionPrompter>>,
    probe: Arc<dyn ConnectionProbe>,
}

/// Decides how to respond to certificate failures and runs fallback
/// escalation.
///
/// # Example
///
/// ```rust
/// use tlsguard_core::{CertificateFailure, SecurityRiskLevel};
/// use tlsguard_engine::{FallbackAction, FallbackEngine, Strategy};
///
/// let engine = FallbackEngine::builder()
///     .with_strategy(Strategy::secure())
///     .without_prompter()
///     .build()
///     .unwrap();
///
/// let error = engine.classify(
///     &CertificateFailure::new("x509: certificate signed by unknown authority"),
///     "registry.example.com",
/// );
/// let decision = engine.decide(&error).unwrap();
/// assert_eq!(decision.action, FallbackAction::Deny);
/// assert_eq!(decision.risk, SecurityRiskLevel::None);
/// ```
#[derive(Debug, Clone)]
pub struct FallbackEngine {
    shared: Arc<Shared>,
}

/// Builder for [`FallbackEngine`].
#[derive(Debug, Default)]
pub struct EngineBuilder {
    config: Option<EngineConfig>,
    strategy: Option<Strategy>,
    audit: Option<Arc<AuditLogger>>,
    probe: Option<Arc<dyn ConnectionProbe>>,
    prompter: Option<Option<Arc<dyn DecisionPrompter>>>,
    input: Option<Arc<dyn ConfirmationInput>>,
    console: Option<Console>,
    clock: Option<Arc<dyn Clock>>,
}

impl EngineBuilder {
    /// Sets the configuration.
    #[must_use]
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Sets the initial strategy. Defaults to [`Strategy::secure`].
    #[must_use]
    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    /// Sets the audit logger. Defaults to a tracing-only logger.
    #[must_use]
    pub fn with_audit_logger(mut self, audit: Arc<AuditLogger>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Sets the connection probe. Defaults to [`HttpsProbe`].
    #[must_use]
    pub fn with_probe(mut self, probe: Arc<dyn ConnectionProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Sets the decision prompter. Defaults to a [`TerminalPrompter`] on the
    /// confirmation input.
    #[must_use]
    pub fn with_prompter(mut self, prompter: Arc<dyn DecisionPrompter>) -> Self {
        self.prompter = Some(Some(prompter));
        self
    }

    /// Disables decision prompts; prompt actions resolve to deny.
    #[must_use]
    pub fn without_prompter(mut self) -> Self {
        self.prompter = Some(None);
        self
    }

    /// Sets where answers are read from. Defaults to standard input.
    #[must_use]
    pub fn with_confirmation_input(mut self, input: Arc<dyn ConfirmationInput>) -> Self {
        self.input = Some(input);
        self
    }

    /// Sets where warnings and prompts are written. Defaults to standard error.
    #[must_use]
    pub fn with_console(mut self, console: Console) -> Self {
        self.console = Some(console);
        self
    }

    /// Sets the clock used for timestamps and consent expiry.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Builds the engine.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration or strategy fails validation.
    pub fn build(self) -> Result<FallbackEngine, EngineError> {
        let config = self.config.unwrap_or_default();
        config.validate()?;
        let strategy = self.strategy.unwrap_or_default();
        strategy.validate()?;

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let audit = self.audit.unwrap_or_else(|| {
            let mut builder = AuditLogger::builder().with_backend(Arc::new(TracingBackend::new()));
            if let Some(actor) = &config.actor {
                builder = builder.actor(actor.clone());
            }
            Arc::new(builder.build())
        });
        let input = self
            .input
            .unwrap_or_else(|| Arc::new(StdinLines::new()));
        let console = self.console.unwrap_or_default();
        let prompter = self.prompter.unwrap_or_else(|| {
            Some(Arc::new(TerminalPrompter::new(input.clone(), console.clone())) as Arc<dyn DecisionPrompter>)
        });
        let probe = self
            .probe
            .unwrap_or_else(|| Arc::new(HttpsProbe::new(config.probe_timeout)));

        let insecure = InsecureModeManager::new(
            config.insecure.clone(),
            config.overrides.clone(),
            input,
            console,
            audit.clone(),
        )?
        .with_clock(clock.clone());

        info!(
            mode = %strategy.mode(),
            allow_insecure_mode = config.allow_insecure_mode,
            "Fallback engine initialized"
        );

        Ok(FallbackEngine {
            shared: Arc::new(Shared {
                config,
                strategy: RwLock::new(Arc::new(strategy)),
                memory: RwLock::new(DecisionMemory::default()),
                trusted: RwLock::new(BTreeSet::new()),
                classifier: ErrorClassifier::with_clock(clock),
                recommender: RecommendationEngine::new(),
                audit,
                insecure: Arc::new(insecure),
                prompter,
                probe,
            }),
        })
    }
}

impl FallbackEngine {
    /// Creates a builder.
    #[must_use]
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    /// Returns the audit logger.
    #[must_use]
    pub fn audit(&self) -> &Arc<AuditLogger> {
        &self.shared.audit
    }

    /// Returns the insecure-mode manager.
    #[must_use]
    pub fn insecure_mode(&self) -> &InsecureModeManager {
        &self.shared.insecure
    }

    /// Classifies a failure. Pure: nothing is recorded.
    #[must_use]
    pub fn classify(&self, failure: &CertificateFailure, hostname: &str) -> ClassifiedError {
        self.shared.classifier.classify(failure, hostname)
    }

    /// Classifies an error value. Pure: nothing is recorded.
    #[must_use]
    pub fn classify_error(&self, err: &(dyn StdError + 'static), hostname: &str) -> ClassifiedError {
        self.shared.classifier.classify_error(err, hostname)
    }

    /// The active strategy.
    #[must_use]
    pub fn strategy(&self) -> Arc<Strategy> {
        self.shared.strategy.read().clone()
    }

    /// Replaces the active strategy. Remembered decisions are forgotten
    /// unless the new strategy retains memory.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidStrategy`] if `strategy` fails validation;
    /// the active strategy is unchanged.
    pub fn set_strategy(&self, strategy: Strategy) -> Result<(), EngineError> {
        strategy.validate()?;
        let retain = strategy.retain_memory();
        let mode = strategy.mode();

        let previous = {
            let mut active = self.shared.strategy.write();
            let mut memory = self.shared.memory.write();
            if !retain {
                memory.invalidate();
            }
            std::mem::replace(&mut *active, Arc::new(strategy))
        };

        info!(from = %previous.mode(), to = %mode, memory_cleared = !retain, "Strategy changed");
        self.shared.audit.record(
            AuditRecord::new(SecurityEventType::StrategyChanged, "")
                .with_strategy(mode.to_string())
                .with_allowed(true)
                .with_detail("previous", previous.mode().to_string())
                .with_detail("memory_cleared", (!retain).to_string()),
        );
        Ok(())
    }

    /// Adds a host whose certificate failures are always accepted.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::EmptyHostname`] for an empty hostname.
    pub fn add_trusted_host(&self, hostname: &str) -> Result<(), EngineError> {
        let key = host_key(hostname);
        if key.is_empty() {
            return Err(EngineError::EmptyHostname);
        }
        let added = self.shared.trusted.write().insert(key.clone());
        if added {
            warn!(hostname = %key, "Host added to trusted set");
            self.shared.audit.record(
                AuditRecord::new(SecurityEventType::TrustChanged, key)
                    .with_allowed(true)
                    .with_detail("change", "added"),
            );
        }
        Ok(())
    }

    /// Removes a trusted host. Returns whether it was present.
    pub fn remove_trusted_host(&self, hostname: &str) -> bool {
        let key = host_key(hostname);
        let removed = self.shared.trusted.write().remove(&key);
        if removed {
            info!(hostname = %key, "Host removed from trusted set");
            self.shared.audit.record(
                AuditRecord::new(SecurityEventType::TrustChanged, key)
                    .with_detail("change", "removed"),
            );
        }
        removed
    }

    /// Whether `hostname` is in the trusted set.
    #[must_use]
    pub fn is_trusted_host(&self, hostname: &str) -> bool {
        let key = host_key(hostname);
        let trusted = self.shared.trusted.read();
        trusted.contains(&key) || trusted.contains(host_without_port(&key))
    }

    /// Number of remembered decisions.
    #[must_use]
    pub fn remembered_decisions(&self) -> usize {
        self.shared.memory.read().entries.len()
    }

    /// Forgets all remembered decisions.
    pub fn forget_decisions(&self) {
        self.shared.memory.write().invalidate();
    }

    /// Active strategy and the memory generation it belongs to, read
    /// together so a concurrent swap cannot split them.
    fn snapshot(&self) -> (Arc<Strategy>, u64) {
        let strategy = self.shared.strategy.read();
        let generation = self.shared.memory.read().generation;
        (strategy.clone(), generation)
    }

    /// Decides what to do about `error` under the active strategy.
    ///
    /// May block for up to the strategy's decision timeout when it prompts.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::EmptyHostname`] if the error carries no host.
    #[instrument(skip(self, error), fields(hostname = %error.hostname, kind = %error.kind))]
    pub fn decide(&self, error: &ClassifiedError) -> Result<Decision, EngineError> {
        let host = host_key(&error.hostname);
        if host.is_empty() {
            return Err(EngineError::EmptyHostname);
        }
        let (strategy, generation) = self.snapshot();
        let key = (host.clone(), error.kind);

        if strategy.remember_decisions() {
            let remembered = self.shared.memory.read().get(generation, &key).cloned();
            if let Some(decision) = remembered {
                debug!(action = %decision.action, "Reusing remembered decision");
                self.shared.audit.record(
                    AuditRecord::new(SecurityEventType::DecisionCacheHit, host)
                        .with_error_kind(error.kind)
                        .with_strategy(strategy.mode().to_string())
                        .with_risk(decision.risk)
                        .with_allowed(decision.is_allowed())
                        .with_detail("decision", decision.action.as_str()),
                );
                return Ok(decision);
            }
        }

        let (action, source, reason) = if let Some(action) = strategy.host_override(&host) {
            (action, DecisionSource::HostOverride, format!("host override for {host}"))
        } else if self.is_trusted_host(&host) || strategy.is_insecure_host(&host) {
            (FallbackAction::Accept, DecisionSource::TrustedHost, format!("{host} is trusted"))
        } else if let Some(action) = strategy.rule(error.kind) {
            (action, DecisionSource::Rule, format!("rule for {}", error.kind))
        } else {
            (
                strategy.mode().default_action(),
                DecisionSource::ModeDefault,
                format!("{} mode default for {}", strategy.mode(), error.kind),
            )
        };

        let (action, source, reason, prompted) = if action == FallbackAction::Prompt {
            let (action, reason) = self.ask(error, &strategy);
            (action, DecisionSource::Prompt, reason, true)
        } else {
            (action, source, reason, false)
        };

        let decision = Decision::for_kind(error.kind, action, prompted, reason, source)
            .with_timeout(strategy.decision_timeout())
            .with_memory(strategy.remember_decisions())
            .with_retry_budget(strategy.max_retries())
            .with_metadata("hostname", host.clone())
            .with_metadata("mode", strategy.mode().to_string());

        if strategy.remember_decisions()
            && !self.shared.memory.write().insert(generation, key, decision.clone())
        {
            debug!("Strategy changed while deciding, not remembering decision");
        }

        info!(action = %decision.action, risk = %decision.risk, source = %decision.source, "Certificate decision");
        self.shared.audit.record(
            AuditRecord::security_decision(
                &host,
                decision.action.as_str(),
                &decision.reason,
                decision.risk,
                decision.is_allowed(),
            )
            .with_error_kind(error.kind)
            .with_strategy(strategy.mode().to_string())
            .with_detail("source", decision.source.as_str()),
        );
        Ok(decision)
    }

    fn ask(&self, error: &ClassifiedError, strategy: &Strategy) -> (FallbackAction, String) {
        let prompter = match &self.shared.prompter {
            Some(p) if strategy.prompt_enabled() && p.is_available() => p,
            _ => {
                debug!("Prompt requested but prompting is unavailable");
                return (
                    FallbackAction::Deny,
                    "prompting unavailable, denying".to_string(),
                );
            }
        };

        match prompter.prompt(error, strategy.decision_timeout()) {
            Ok(FallbackAction::Accept | FallbackAction::Log) => (
                FallbackAction::Accept,
                format!("operator accepted {}", error.kind),
            ),
            Ok(FallbackAction::Retry) => (
                FallbackAction::Retry,
                format!("operator chose retry for {}", error.kind),
            ),
            Ok(FallbackAction::Deny | FallbackAction::Prompt) => (
                FallbackAction::Deny,
                format!("operator denied {}", error.kind),
            ),
            Err(e) => {
                warn!("Prompt failed: {}", e);
                (FallbackAction::Deny, format!("{e}, denying"))
            }
        }
    }

    /// Asks for explicit consent to disable verification for `hostname`.
    pub fn confirm_insecure(&self, hostname: &str) -> bool {
        self.shared.insecure.confirm(hostname)
    }

    /// Ordered remediation steps.
    #[must_use]
    pub fn recommend(&self, hostname: &str, error_text: &str) -> Vec<String> {
        self.shared.recommender.recommend(hostname, error_text)
    }

    /// Structured remediation.
    #[must_use]
    pub fn recommend_detailed(&self, hostname: &str, error_text: &str) -> DetailedRecommendation {
        self.shared.recommender.recommend_detailed(hostname, error_text)
    }

    /// Classifies a connection failure, records it, and works through the
    /// escalation steps until one connects.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::EmptyHostname`] for an empty hostname and
    /// [`EngineError::FallbackExhausted`] when no step connects.
    #[instrument(skip(self, failure))]
    pub async fn handle_certificate_failure(
        &self,
        hostname: &str,
        failure: &CertificateFailure,
    ) -> Result<FallbackOutcome, EngineError> {
        let host = host_key(hostname);
        if host.is_empty() {
            return Err(EngineError::EmptyHostname);
        }

        let error = self.classify(failure, &host);
        warn!(kind = %error.kind, "Certificate verification failed: {}", error.error_text);
        self.shared
            .audit
            .log_certificate_failure(&host, error.kind, &error.error_text);
        let recommendations = self.recommend(&host, &error.error_text);

        let policy = {
            let engine = self.clone();
            let error = error.clone();
            tokio::task::spawn_blocking(move || engine.decide(&error))
                .await
                .map_err(|e| EngineError::TaskFailed {
                    reason: e.to_string(),
                })??
        };
        let strategy = self.strategy();

        let mut attempts = Vec::new();
        let mut retries_used = 0_u32;
        for step in EscalationStep::ORDER {
            if let Some(reason) = self.skip_reason(step, &error, &policy, &strategy, retries_used) {
                debug!(step = %step, "Skipping escalation step: {}", reason);
                attempts.push(EscalationAttempt {
                    step,
                    attempt_id: String::new(),
                    result: AttemptResult::Skipped(reason),
                });
                continue;
            }

            if step == EscalationStep::InsecureMode {
                let engine = self.clone();
                let target = host.clone();
                let confirmed = tokio::task::spawn_blocking(move || engine.confirm_insecure(&target))
                    .await
                    .map_err(|e| EngineError::TaskFailed {
                        reason: e.to_string(),
                    })?;
                if !confirmed {
                    attempts.push(EscalationAttempt {
                        step,
                        attempt_id: String::new(),
                        result: AttemptResult::Skipped("insecure mode not confirmed".to_string()),
                    });
                    continue;
                }
            }

            if !step.disables_verification() {
                retries_used += 1;
            }
            let attempt_id = new_record_id().to_string();
            let transport = step.transport();
            info!(step = %step, attempt_id = %attempt_id, transport = %transport, "Trying fallback");

            let timeout = self.shared.config.probe_timeout;
            let result = tokio::time::timeout(timeout, self.shared.probe.probe(&host, &transport))
                .await
                .unwrap_or_else(|_| {
                    Err(ProbeError::Timeout {
                        url: host.clone(),
                        timeout,
                    })
                });

            match result {
                Ok(()) => {
                    self.shared
                        .audit
                        .log_fallback_attempt(&host, step.as_str(), step.risk(), &attempt_id, Ok(()));
                    self.shared
                        .audit
                        .log_fallback_success(&host, step.as_str(), step.risk(), &attempt_id);
                    if step.disables_verification() {
                        self.shared.audit.log_risk_accepted(
                            &host,
                            step.risk(),
                            &format!("{step} connected with certificate verification disabled"),
                        );
                    }
                    let decision = step.success_decision(&error, &attempt_id);
                    info!(step = %step, risk = %decision.risk, "Fallback succeeded");
                    attempts.push(EscalationAttempt {
                        step,
                        attempt_id,
                        result: AttemptResult::Succeeded,
                    });
                    return Ok(FallbackOutcome {
                        step,
                        decision,
                        error,
                        attempts,
                        recommendations,
                    });
                }
                Err(e) => {
                    let message = e.to_string();
                    debug!(step = %step, "Fallback failed: {}", message);
                    self.shared.audit.log_fallback_attempt(
                        &host,
                        step.as_str(),
                        step.risk(),
                        &attempt_id,
                        Err(&message),
                    );
                    attempts.push(EscalationAttempt {
                        step,
                        attempt_id,
                        result: AttemptResult::Failed(message),
                    });
                }
            }
        }

        warn!(hostname = %host, "All fallback strategies failed");
        self.shared.audit.log_security_decision(
            &host,
            FallbackAction::Deny.as_str(),
            "all fallback strategies failed",
            SecurityRiskLevel::None,
            false,
        );
        Err(EngineError::FallbackExhausted {
            hostname: host,
            attempts: attempts
                .iter()
                .filter(|a| !matches!(a.result, AttemptResult::Skipped(_)))
                .map(ToString::to_string)
                .collect(),
            recommendations,
        })
    }

    fn skip_reason(
        &self,
        step: EscalationStep,
        error: &ClassifiedError,
        policy: &Decision,
        strategy: &Strategy,
        retries_used: u32,
    ) -> Option<String> {
        if !step.applies_to(error.kind) {
            return Some(format!("does not apply to {}", error.kind));
        }
        if !step.disables_verification() {
            return (retries_used >= strategy.max_retries())
                .then(|| "retry budget exhausted".to_string());
        }
        if !policy.action.accepts_certificate() {
            return Some(format!("strategy does not accept {}", error.kind));
        }
        if step == EscalationStep::InsecureMode
            && !self.shared.config.allow_insecure_mode
            && !self.shared.config.overrides.allows(&error.hostname)
        {
            return Some("insecure mode is not enabled".to_string());
        }
        None
    }
}
