//! CLI commands and argument parsing.

pub mod audit;
pub mod check;
pub mod classify;
pub mod recommend;

use clap::{Parser, Subcommand};

/// tlsguard - decide what to do when a registry certificate fails validation
#[derive(Parser)]
#[command(name = "tlsguard")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Command to run.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Classify a certificate error message
    Classify(classify::ClassifyArgs),

    /// Show remediation steps for a certificate error
    Recommend(recommend::RecommendArgs),

    /// Connect to a registry and run fallback escalation on failure
    Check(check::CheckArgs),

    /// Summarize the security audit log
    Audit(audit::AuditArgs),

    /// Print version information
    Version,
}

/// Output format shared by commands.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text
    #[default]
    Text,
    /// Pretty-printed JSON
    Json,
}

/// Prints `value` as pretty JSON.
pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    println!("{json}");
    Ok(())
}
