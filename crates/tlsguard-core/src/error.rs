//! Error types for tlsguard core operations.
//!
//! Classification itself never fails; these errors cover certificate parsing
//! and chain construction, where a caller needs to know what went wrong.

use thiserror::Error;

use crate::kind::CertificateErrorKind;

/// Result type alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in tlsguard core operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A DER-encoded certificate could not be parsed.
    #[error("Failed to parse certificate: {reason}")]
    CertificateParse {
        /// Reason for the parse failure.
        reason: String,
    },

    /// A certificate chain failed validation.
    #[error("Certificate chain validation failed ({kind}): {reason}")]
    ChainValidation {
        /// Error kind the failure corresponds to.
        kind: CertificateErrorKind,
        /// Human-readable reason for the failure.
        reason: String,
    },

    /// A hostname was required but empty.
    #[error("Hostname must not be empty")]
    EmptyHostname,
}

impl Error {
    /// Creates a chain validation error.
    #[must_use]
    pub fn chain(kind: CertificateErrorKind, reason: impl Into<String>) -> Self {
        Self::ChainValidation {
            kind,
            reason: reason.into(),
        }
    }

    /// Returns the certificate error kind this error maps to, if any.
    #[must_use]
    pub const fn kind(&self) -> Option<CertificateErrorKind> {
        match self {
            Self::ChainValidation { kind, .. } => Some(*kind),
            Self::CertificateParse { .. } => Some(CertificateErrorKind::BadCertificate),
            Self::EmptyHostname => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_chain() {
        let err = Error::chain(CertificateErrorKind::Expired, "leaf expired 2 days ago");
        assert_eq!(
            err.to_string(),
            "Certificate chain validation failed (expired): leaf expired 2 days ago"
        );
    }

    #[test]
    fn test_error_kind_mapping() {
        let parse = Error::CertificateParse {
            reason: "truncated".to_string(),
        };
        assert_eq!(parse.kind(), Some(CertificateErrorKind::BadCertificate));
        assert_eq!(Error::EmptyHostname.kind(), None);
    }
}
