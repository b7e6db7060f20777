//! Check command implementation.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use tracing::{info, warn};

use tlsguard_core::{CertificateFailure, TransportConfig};
use tlsguard_engine::{
    ConnectionProbe, EngineConfig, EngineError, FallbackEngine, FallbackOutcome, HttpsProbe,
    ProbeError, RecommendationEngine, SecurityMode, Strategy,
};

use super::{print_json, OutputFormat};

/// Arguments for the check command.
#[derive(Args)]
pub struct CheckArgs {
    /// Registry host, optionally with port
    pub host: String,

    /// Security mode used when no strategy file is given
    #[arg(short, long, default_value = "secure")]
    pub mode: SecurityMode,

    /// YAML strategy file
    #[arg(short, long)]
    pub strategy_file: Option<PathBuf>,

    /// Allow escalation to end in insecure mode (still asks for confirmation)
    #[arg(long)]
    pub allow_insecure: bool,

    /// Directory for the security audit log
    #[arg(long)]
    pub audit_dir: Option<PathBuf>,

    /// Seconds to wait for each connection attempt
    #[arg(long, default_value = "10")]
    pub timeout: u64,

    /// Output format (text, json)
    #[arg(short, long, value_enum, default_value = "text")]
    pub format: OutputFormat,
}

/// Runs the check command.
pub async fn execute(args: CheckArgs) -> Result<()> {
    info!(host = %args.host, mode = %args.mode, "Checking registry TLS");

    let strategy = load_strategy(&args)?;
    let mut config = EngineConfig::from_env()
        .with_insecure_mode_allowed(args.allow_insecure)
        .with_probe_timeout(Duration::from_secs(args.timeout));
    if let Some(dir) = &args.audit_dir {
        config = config.with_audit_dir(dir);
    }
    config.validate()?;

    let probe = HttpsProbe::new(config.probe_timeout);
    let failure = match probe.probe(&args.host, &TransportConfig::strict()).await {
        Ok(()) => {
            report_verified(&args);
            return Ok(());
        }
        Err(ProbeError::Connection { message, .. }) => CertificateFailure::new(message),
        Err(e) => return Err(e).context("registry probe failed"),
    };

    let audit = Arc::new(config.audit_logger());
    let engine = FallbackEngine::builder()
        .with_config(config)
        .with_strategy(strategy)
        .with_audit_logger(Arc::clone(&audit))
        .with_probe(Arc::new(probe))
        .build()?;

    let result = engine.handle_certificate_failure(&args.host, &failure).await;
    if let Err(e) = audit.close() {
        warn!("Failed to close audit log: {}", e);
    }

    match result {
        Ok(outcome) => {
            report_outcome(&outcome, args.format)?;
            Ok(())
        }
        Err(EngineError::FallbackExhausted {
            hostname,
            attempts,
            recommendations,
        }) => {
            if args.format == OutputFormat::Json {
                print_json(&serde_json::json!({
                    "hostname": hostname,
                    "connected": false,
                    "attempts": attempts,
                    "recommendations": recommendations,
                }))?;
            } else {
                println!("Could not connect to {hostname} securely.");
                println!();
                for attempt in &attempts {
                    println!("  {attempt}");
                }
                println!();
                println!("Recommendations:");
                print!("{}", RecommendationEngine::format(&recommendations));
            }
            anyhow::bail!("all fallback strategies failed for {hostname}")
        }
        Err(e) => Err(e.into()),
    }
}

fn load_strategy(args: &CheckArgs) -> Result<Strategy> {
    match &args.strategy_file {
        Some(path) => {
            let document = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read strategy file {}", path.display()))?;
            Strategy::from_yaml(&document)
                .with_context(|| format!("invalid strategy file {}", path.display()))
        }
        None => Ok(Strategy::for_mode(args.mode)),
    }
}

fn report_verified(args: &CheckArgs) {
    if args.format == OutputFormat::Json {
        println!(
            "{}",
            serde_json::json!({ "hostname": args.host, "connected": true, "verified": true })
        );
    } else {
        println!("{}: certificate verified", args.host);
    }
}

fn report_outcome(outcome: &FallbackOutcome, format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Json {
        return print_json(outcome);
    }

    println!("{}: connected using {}", outcome.error.hostname, outcome.step);
    println!("  Original error: {}", outcome.error.summary());
    println!("  Transport:      {}", outcome.transport());
    println!("  Risk:           {}", outcome.decision.risk);
    if !outcome.transport().verify_certificates {
        println!();
        println!("WARNING: certificate verification is disabled for this connection.");
    }
    println!();
    println!("Fix the underlying problem:");
    print!("{}", RecommendationEngine::format(&outcome.recommendations));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tlsguard_core::CertificateErrorKind;
    use tlsguard_engine::FallbackAction;

    fn args(strategy_file: Option<PathBuf>) -> CheckArgs {
        CheckArgs {
            host: "registry.example.com".to_string(),
            mode: SecurityMode::Development,
            strategy_file,
            allow_insecure: false,
            audit_dir: None,
            timeout: 10,
            format: OutputFormat::Text,
        }
    }

    #[test]
    fn test_load_strategy_from_mode() {
        let strategy = load_strategy(&args(None)).unwrap();
        assert_eq!(strategy.mode(), SecurityMode::Development);
    }

    #[test]
    fn test_load_strategy_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("strategy.yaml");
        std::fs::write(&path, "mode: permissive\nmax_retries: 2\n").unwrap();
        let strategy = load_strategy(&args(Some(path))).unwrap();
        assert_eq!(strategy.mode(), SecurityMode::Permissive);
        assert_eq!(strategy.max_retries(), 2);
        assert_eq!(
            strategy.action_for(CertificateErrorKind::HostnameMismatch),
            FallbackAction::Log
        );
    }

    #[test]
    fn test_load_strategy_rejects_bad_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("strategy.yaml");
        std::fs::write(&path, "max_retries: 50\n").unwrap();
        assert!(load_strategy(&args(Some(path))).is_err());
        assert!(load_strategy(&args(Some(dir.path().join("missing.yaml")))).is_err());
    }
}
