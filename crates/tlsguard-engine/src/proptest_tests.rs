//! Property-based tests for tlsguard-engine.

use std::sync::Arc;

use proptest::prelude::*;
use tlsguard_audit::AuditLogger;
use tlsguard_core::{CertificateErrorKind, CertificateFailure, SecurityRiskLevel};

use crate::decision::{risk_score, Decision, DecisionSource};
use crate::prompt::{Console, ScriptedInput};
use crate::recommend::RecommendationEngine;
use crate::strategy::{FallbackAction, SecurityMode};
use crate::{FallbackEngine, Strategy};

fn kind_strategy() -> impl proptest::strategy::Strategy<Value = CertificateErrorKind> {
    prop::sample::select(CertificateErrorKind::ALL.to_vec())
}

fn action_strategy() -> impl proptest::strategy::Strategy<Value = FallbackAction> {
    prop::sample::select(vec![
        FallbackAction::Deny,
        FallbackAction::Accept,
        FallbackAction::Log,
        FallbackAction::Prompt,
        FallbackAction::Retry,
    ])
}

fn mode_strategy() -> impl proptest::strategy::Strategy<Value = SecurityMode> {
    prop::sample::select(vec![
        SecurityMode::Secure,
        SecurityMode::Permissive,
        SecurityMode::Development,
        SecurityMode::Interactive,
        SecurityMode::Custom,
    ])
}

fn quiet_engine(strategy: Strategy) -> FallbackEngine {
    FallbackEngine::builder()
        .with_strategy(strategy)
        .with_audit_logger(Arc::new(AuditLogger::builder().build()))
        .with_confirmation_input(Arc::new(ScriptedInput::default()))
        .with_console(Console::captured().0)
        .without_prompter()
        .build()
        .unwrap()
}

proptest! {
    #[test]
    fn deny_never_carries_risk(kind in kind_strategy(), action in action_strategy(), prompted: bool) {
        let decision = Decision::for_kind(kind, action, prompted, "p", DecisionSource::Rule);
        if action == FallbackAction::Deny {
            prop_assert_eq!(decision.risk, SecurityRiskLevel::None);
            prop_assert_eq!(decision.risk_score, 0);
        } else {
            prop_assert!(decision.risk_score >= 1);
            prop_assert!(decision.risk_score <= kind.base_risk_score().max(1));
        }
        prop_assert!(decision.risk != SecurityRiskLevel::Critical);
    }

    #[test]
    fn prompting_never_raises_risk(kind in kind_strategy(), action in action_strategy()) {
        prop_assert!(risk_score(kind, action, true) <= risk_score(kind, action, false).max(1));
    }

    #[test]
    fn every_kind_resolves_in_every_mode(mode in mode_strategy(), kind in kind_strategy()) {
        let engine = quiet_engine(Strategy::for_mode(mode));
        let mut error = engine.classify(&CertificateFailure::new("x509: failure"), "registry.example.com");
        error.kind = kind;
        let decision = engine.decide(&error).unwrap();
        prop_assert!(decision.action != FallbackAction::Prompt);
        if decision.action == FallbackAction::Deny {
            prop_assert_eq!(decision.risk, SecurityRiskLevel::None);
            prop_assert!(decision.transport.verify_certificates);
        }
    }

    #[test]
    fn secure_mode_always_denies(kind in kind_strategy(), host in "[a-z]{1,12}\\.[a-z]{2,5}(:[0-9]{2,5})?") {
        let engine = quiet_engine(Strategy::secure());
        let mut error = engine.classify(&CertificateFailure::new("x509: failure"), &host);
        error.kind = kind;
        let decision = engine.decide(&error).unwrap();
        prop_assert_eq!(decision.action, FallbackAction::Deny);
        prop_assert_eq!(decision.risk, SecurityRiskLevel::None);
    }

    #[test]
    fn recommendations_are_unique_and_end_with_audit_advice(
        host in "[a-z]{1,10}(\\.[a-z]{2,5})?(:[0-9]{2,5})?",
        text in ".{0,80}",
    ) {
        let recs = RecommendationEngine::new().recommend(&host, &text);
        let unique: std::collections::HashSet<_> = recs.iter().collect();
        prop_assert_eq!(unique.len(), recs.len());
        prop_assert_eq!(
            recs.last().map(String::as_str),
            Some("Review the security audit log before accepting any certificate bypass")
        );
    }
}
