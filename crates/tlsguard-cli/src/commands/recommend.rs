//! Recommend command implementation.

use anyhow::Result;
use clap::Args;
use tracing::info;

use tlsguard_engine::{DetailedRecommendation, RecommendationEngine};

use super::{print_json, OutputFormat};

/// Arguments for the recommend command.
#[derive(Args)]
pub struct RecommendArgs {
    /// Registry host, optionally with port
    pub host: String,

    /// Error message reported by the TLS stack
    #[arg(short, long, default_value = "")]
    pub error: String,

    /// Include impact, time estimate and risk assessment
    #[arg(short, long)]
    pub detailed: bool,

    /// Print diagnostic commands for the host
    #[arg(long)]
    pub diagnose: bool,

    /// Output format (text, json)
    #[arg(short, long, value_enum, default_value = "text")]
    pub format: OutputFormat,
}

/// Runs the recommend command.
pub fn run(args: &RecommendArgs) -> Result<()> {
    info!(host = %args.host, "Building recommendations");
    let engine = RecommendationEngine::new();

    if args.diagnose {
        print!("{}", engine.diagnostics(&args.host));
        return Ok(());
    }

    if args.detailed {
        let detailed = engine.recommend_detailed(&args.host, &args.error);
        return match args.format {
            OutputFormat::Text => {
                print_detailed(&engine, &detailed);
                Ok(())
            }
            OutputFormat::Json => print_json(&detailed),
        };
    }

    let recommendations = engine.recommend(&args.host, &args.error);
    match args.format {
        OutputFormat::Text => {
            println!("Recommendations for {}:", args.host);
            print!("{}", RecommendationEngine::format(&recommendations));
            Ok(())
        }
        OutputFormat::Json => print_json(&recommendations),
    }
}

fn print_detailed(engine: &RecommendationEngine, detailed: &DetailedRecommendation) {
    let assessment = engine.security_assessment(detailed.kind);
    println!("Category:      {}", detailed.category);
    println!("Kind:          {}", detailed.kind);
    println!("Severity:      {}", detailed.severity);
    println!("Registry:      {}", detailed.host_profile);
    println!("Time estimate: {}", detailed.time_estimate);
    println!("Impact:        {}", detailed.impact);
    println!("Risk score:    {}/100", assessment.score);
    println!();
    println!("Solutions:");
    print!("{}", RecommendationEngine::format(&detailed.solutions));
    println!();
    println!("Next steps:");
    print!("{}", RecommendationEngine::format(&detailed.next_steps));
    if !assessment.compliance.is_empty() {
        println!();
        println!("Accepting this certificate may conflict with:");
        for framework in &assessment.compliance {
            println!("  - {framework}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(detailed: bool, diagnose: bool, format: OutputFormat) -> RecommendArgs {
        RecommendArgs {
            host: "kind-registry:5000".to_string(),
            error: "x509: certificate signed by unknown authority".to_string(),
            detailed,
            diagnose,
            format,
        }
    }

    #[test]
    fn test_recommend_variants_run() {
        assert!(run(&args(false, false, OutputFormat::Text)).is_ok());
        assert!(run(&args(false, false, OutputFormat::Json)).is_ok());
        assert!(run(&args(true, false, OutputFormat::Text)).is_ok());
        assert!(run(&args(true, false, OutputFormat::Json)).is_ok());
        assert!(run(&args(false, true, OutputFormat::Text)).is_ok());
    }
}
