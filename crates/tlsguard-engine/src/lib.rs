//! # tlsguard engine
//!
//! Decides what a registry client should do after a TLS certificate failure,
//! and runs the escalating fallback sequence that tries to connect anyway
//! without weakening security further than the active [`Strategy`] permits.
//!
//! - [`FallbackEngine`] - decisions, decision memory, trusted hosts, escalation
//! - [`Strategy`] - per-kind rules, host overrides and mode defaults
//! - [`InsecureModeManager`] - explicit, audited, expiring consent
//! - [`RecommendationEngine`] - remediation advice
//! - [`ConnectionProbe`] - how escalation steps are tried
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tlsguard_core::CertificateFailure;
//! use tlsguard_engine::{EngineConfig, FallbackEngine, Strategy};
//!
//! # async fn run() -> Result<(), tlsguard_engine::EngineError> {
//! let config = EngineConfig::from_env();
//! let engine = FallbackEngine::builder()
//!     .with_audit_logger(Arc::new(config.audit_logger()))
//!     .with_config(config)
//!     .with_strategy(Strategy::development())
//!     .build()?;
//!
//! let failure = CertificateFailure::new("x509: certificate signed by unknown authority");
//! let outcome = engine
//!     .handle_certificate_failure("registry.local:5000", &failure)
//!     .await?;
//! println!("connect with {}", outcome.transport());
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod decision;
pub mod engine;
pub mod error;
pub mod escalation;
pub mod insecure;
pub mod probe;
pub mod prompt;
pub mod recommend;
pub mod strategy;

#[cfg(test)]
mod proptest_tests;

pub use config::{EngineConfig, EnvOverrides};
pub use decision::{Decision, DecisionSource};
pub use engine::{EngineBuilder, FallbackEngine};
pub use error::EngineError;
pub use escalation::{AttemptResult, EscalationAttempt, EscalationStep, FallbackOutcome};
pub use insecure::{ConsentSource, InsecureConfig, InsecureConsent, InsecureModeManager};
pub use probe::{ConnectionProbe, HttpsProbe, ProbeError, ScriptedProbe};
pub use prompt::{
    ConfirmationInput, Console, DecisionPrompter, PromptError, ReadOutcome, ScriptedInput,
    StdinLines, TerminalPrompter,
};
pub use recommend::{DetailedRecommendation, HostProfile, RecommendationEngine, SecurityAssessment};
pub use strategy::{FallbackAction, SecurityMode, Strategy};
