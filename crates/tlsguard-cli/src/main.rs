//! tlsguard CLI - diagnose and handle registry TLS certificate failures.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

use commands::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so JSON output on stdout stays parseable
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tlsguard=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Classify(args) => commands::classify::run(&args),
        Commands::Recommend(args) => commands::recommend::run(&args),
        Commands::Check(args) => commands::check::execute(args).await,
        Commands::Audit(args) => commands::audit::run(&args),
        Commands::Version => {
            println!("tlsguard {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
