//! Error types for engine operations.

use thiserror::Error;

/// Errors that can occur in the fallback engine.
///
/// Probe failures and confirmation failures are not errors: they are recorded
/// and resolved conservatively. Only configuration problems and a fully
/// exhausted escalation reach the caller.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A hostname was required but empty.
    #[error("Hostname must not be empty")]
    EmptyHostname,

    /// A strategy failed validation.
    #[error("Invalid strategy: {reason}")]
    InvalidStrategy {
        /// Reason the strategy is invalid.
        reason: String,
    },

    /// Engine or confirmation configuration failed validation.
    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        /// Reason the configuration is invalid.
        reason: String,
    },

    /// A strategy document could not be parsed.
    #[error("Failed to parse strategy: {source}")]
    StrategyParse {
        /// Underlying parse error.
        #[source]
        source: serde_yaml::Error,
    },

    /// Every escalation strategy failed or was disallowed.
    #[error("All fallback strategies failed for {hostname} ({} attempted)", attempts.len())]
    FallbackExhausted {
        /// Host being connected to.
        hostname: String,
        /// One line per attempted strategy.
        attempts: Vec<String>,
        /// Remediation steps for the operator.
        recommendations: Vec<String>,
    },

    /// A blocking step could not be run to completion.
    #[error("Decision task failed: {reason}")]
    TaskFailed {
        /// Reason the task failed.
        reason: String,
    },

    /// A core operation failed.
    #[error(transparent)]
    Core(#[from] tlsguard_core::Error),
}

impl EngineError {
    /// Creates an invalid strategy error.
    #[must_use]
    pub fn invalid_strategy(reason: impl Into<String>) -> Self {
        Self::InvalidStrategy {
            reason: reason.into(),
        }
    }

    /// Creates an invalid configuration error.
    #[must_use]
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exhausted_display_counts_attempts() {
        let err = EngineError::FallbackExhausted {
            hostname: "registry.example.com".to_string(),
            attempts: vec!["system_ca: refused".to_string(), "no_sni: refused".to_string()],
            recommendations: Vec::new(),
        };
        assert_eq!(
            err.to_string(),
            "All fallback strategies failed for registry.example.com (2 attempted)"
        );
    }

    #[test]
    fn test_constructors() {
        assert_eq!(
            EngineError::invalid_strategy("empty host").to_string(),
            "Invalid strategy: empty host"
        );
        assert_eq!(
            EngineError::invalid_config("timeout").to_string(),
            "Invalid configuration: timeout"
        );
    }
}
