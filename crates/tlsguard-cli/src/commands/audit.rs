//! Audit command implementation.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use clap::Args;
use serde::Serialize;
use tracing::info;

use tlsguard_audit::{read_records, AuditRecord, SecuritySummary};
use tlsguard_engine::EngineConfig;

use super::{print_json, OutputFormat};

/// Arguments for the audit command.
#[derive(Args)]
pub struct AuditArgs {
    /// Audit log directory (defaults to TLSGUARD_SECURITY_LOG_DIR or the user data dir)
    #[arg(short, long)]
    pub dir: Option<PathBuf>,

    /// Summarize the trailing window of this many hours
    #[arg(long, default_value = "24")]
    pub hours: i64,

    /// Also list the most recent records
    #[arg(short, long, default_value = "0")]
    pub tail: usize,

    /// Output format (text, json)
    #[arg(short, long, value_enum, default_value = "text")]
    pub format: OutputFormat,
}

/// Summary plus the requested tail.
#[derive(Debug, Serialize)]
struct AuditReport {
    summary: SecuritySummary,
    recent: Vec<AuditRecord>,
}

/// Runs the audit command.
pub fn run(args: &AuditArgs) -> Result<()> {
    let dir = args
        .dir
        .clone()
        .unwrap_or_else(|| EngineConfig::from_env().audit_dir);
    info!(dir = %dir.display(), hours = args.hours, "Summarizing audit log");

    let report = build_report(&dir, args.hours, args.tail)?;
    match args.format {
        OutputFormat::Text => print_text(&report),
        OutputFormat::Json => print_json(&report)?,
    }
    Ok(())
}

fn build_report(dir: &Path, hours: i64, tail: usize) -> Result<AuditReport> {
    anyhow::ensure!(hours > 0, "--hours must be positive");
    let records = read_records(dir)
        .with_context(|| format!("failed to read audit log in {}", dir.display()))?;

    let end = Utc::now();
    let summary = SecuritySummary::from_records(&records, end - Duration::hours(hours), end);
    let skip = records.len().saturating_sub(tail);
    let recent = records.into_iter().skip(skip).collect();
    Ok(AuditReport { summary, recent })
}

fn print_text(report: &AuditReport) {
    print!("{}", report.summary);
    if report.recent.is_empty() {
        return;
    }
    println!();
    println!("Recent records:");
    for record in &report.recent {
        println!(
            "  {} {:<8} {:<22} {} {}",
            record.timestamp.format("%Y-%m-%d %H:%M:%S"),
            format!("{:?}", record.severity),
            record.event_type.as_str(),
            record.hostname,
            if record.allowed { "allowed" } else { "" }
        );
    }
}
