//! Classify command implementation.

use anyhow::Result;
use clap::Args;
use tracing::info;

use tlsguard_core::{CertificateFailure, ClassifiedError, ErrorClassifier};

use super::{print_json, OutputFormat};

/// Arguments for the classify command.
#[derive(Args)]
pub struct ClassifyArgs {
    /// Error message reported by the TLS stack
    pub error: String,

    /// Registry host the error was seen on
    #[arg(long, default_value = "registry")]
    pub host: String,

    /// Output format (text, json)
    #[arg(short, long, value_enum, default_value = "text")]
    pub format: OutputFormat,
}

/// Runs the classify command.
pub fn run(args: &ClassifyArgs) -> Result<()> {
    info!(host = %args.host, "Classifying certificate error");
    let classified = classify(args);

    match args.format {
        OutputFormat::Text => print_text(&classified),
        OutputFormat::Json => print_json(&classified)?,
    }
    Ok(())
}

fn classify(args: &ClassifyArgs) -> ClassifiedError {
    ErrorClassifier::new().classify(&CertificateFailure::new(args.error.as_str()), &args.host)
}

fn print_text(classified: &ClassifiedError) {
    println!("Kind:        {}", classified.kind);
    println!("Recoverable: {}", if classified.recoverable { "yes" } else { "no" });
    println!("Base risk:   {}/10", classified.kind.base_risk_score());
    println!();
    println!("{}", classified.detailed_description());
}

#[cfg(test)]
mod tests {
    use super::*;
    use tlsguard_core::CertificateErrorKind;

    #[test]
    fn test_classify_args() {
        let args = ClassifyArgs {
            error: "x509: certificate has expired".to_string(),
            host: "registry.example.com".to_string(),
            format: OutputFormat::Json,
        };
        let classified = classify(&args);
        assert_eq!(classified.kind, CertificateErrorKind::Expired);
        assert_eq!(classified.hostname, "registry.example.com");
        assert!(run(&args).is_ok());
    }
}
