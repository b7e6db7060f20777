//! Certificate error kinds and security risk levels.
//!
//! The per-kind base risk scores live here so every component scores risk
//! from the same table.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Closed set of certificate validation failure kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CertificateErrorKind {
    /// The failure could not be attributed to a known kind.
    Unknown,
    /// The certificate's validity window has ended.
    Expired,
    /// The certificate's validity window has not started.
    NotYetValid,
    /// The certificate does not cover the requested hostname.
    HostnameMismatch,
    /// The chain ends in an authority that is not trusted.
    #[serde(rename = "untrusted_ca")]
    UntrustedCA,
    /// The leaf certificate signed itself.
    SelfSigned,
    /// The certificate is malformed or otherwise invalid.
    BadCertificate,
    /// Intermediate certificates are missing.
    ChainIncomplete,
    /// The certificate has been revoked by its issuer.
    Revoked,
    /// The certificate's key usage does not permit this use.
    KeyUsageInvalid,
}

impl CertificateErrorKind {
    /// Every kind, in display order.
    pub const ALL: [Self; 10] = [
        Self::Unknown,
        Self::Expired,
        Self::NotYetValid,
        Self::HostnameMismatch,
        Self::UntrustedCA,
        Self::SelfSigned,
        Self::BadCertificate,
        Self::ChainIncomplete,
        Self::Revoked,
        Self::KeyUsageInvalid,
    ];

    /// Returns the stable identifier used in audit records and config files.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Expired => "expired",
            Self::NotYetValid => "not_yet_valid",
            Self::HostnameMismatch => "hostname_mismatch",
            Self::UntrustedCA => "untrusted_ca",
            Self::SelfSigned => "self_signed",
            Self::BadCertificate => "bad_certificate",
            Self::ChainIncomplete => "chain_incomplete",
            Self::Revoked => "revoked",
            Self::KeyUsageInvalid => "key_usage_invalid",
        }
    }

    /// Whether a fallback strategy can plausibly work around this kind.
    ///
    /// A certificate that is expired, revoked, malformed or used outside its
    /// key usage is broken at the source.
    #[must_use]
    pub const fn is_recoverable(self) -> bool {
        !matches!(
            self,
            Self::Expired | Self::Revoked | Self::BadCertificate | Self::KeyUsageInvalid
        )
    }

    /// Base risk score on a 0-10 scale for accepting a certificate with this
    /// failure.
    #[must_use]
    pub const fn base_risk_score(self) -> u8 {
        match self {
            Self::Revoked => 10,
            Self::Expired => 8,
            Self::BadCertificate => 7,
            Self::UntrustedCA => 6,
            Self::HostnameMismatch | Self::Unknown => 5,
            Self::SelfSigned => 4,
            Self::ChainIncomplete | Self::KeyUsageInvalid => 3,
            Self::NotYetValid => 2,
        }
    }

    /// Canonical human message for this kind.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::Unknown => "Unknown certificate error",
            Self::Expired => "Certificate has expired",
            Self::NotYetValid => "Certificate is not yet valid",
            Self::HostnameMismatch => "Hostname doesn't match certificate",
            Self::UntrustedCA => "Certificate authority is not trusted",
            Self::SelfSigned => "Certificate is self-signed",
            Self::BadCertificate => "Certificate is malformed or invalid",
            Self::ChainIncomplete => "Certificate chain is incomplete",
            Self::Revoked => "Certificate has been revoked",
            Self::KeyUsageInvalid => "Certificate key usage is inappropriate for this operation",
        }
    }

    /// Suggested remediation actions, most direct first.
    #[must_use]
    pub const fn suggested_actions(self) -> [&'static str; 3] {
        match self {
            Self::Unknown => [
                "Check certificate configuration",
                "Verify TLS connection settings",
                "Review server and client configurations",
            ],
            Self::Expired => [
                "Renew the certificate",
                "Update server configuration",
                "Check certificate validity period",
            ],
            Self::NotYetValid => [
                "Check system time synchronization",
                "Wait until certificate becomes valid",
                "Verify certificate validity period",
            ],
            Self::HostnameMismatch => [
                "Use the correct hostname from certificate SAN",
                "Add hostname to certificate Subject Alternative Names",
                "Enable hostname verification bypass for development",
            ],
            Self::UntrustedCA => [
                "Add CA certificate to system trust store",
                "Use a certificate from a trusted CA",
                "Enable untrusted certificate acceptance for development",
            ],
            Self::SelfSigned => [
                "Add certificate to trust store",
                "Use a CA-signed certificate",
                "Enable self-signed certificate acceptance",
            ],
            Self::BadCertificate => [
                "Replace with a valid certificate",
                "Check certificate format and encoding",
                "Verify certificate installation",
            ],
            Self::ChainIncomplete => [
                "Install intermediate certificates",
                "Complete the certificate chain",
                "Verify certificate chain configuration",
            ],
            Self::Revoked => [
                "Replace with a new certificate",
                "Check certificate revocation status",
                "Contact certificate authority",
            ],
            Self::KeyUsageInvalid => [
                "Use a certificate with appropriate key usage",
                "Generate new certificate with correct extensions",
                "Verify certificate purpose and usage",
            ],
        }
    }
}

impl fmt::Display for CertificateErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CertificateErrorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown certificate error kind: {s}"))
    }
}

/// Ordinal security risk scale attached to every decision.
///
/// `Critical` is only ever assigned to full verification bypass.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum SecurityRiskLevel {
    /// No additional exposure.
    #[default]
    None,
    /// Minimal exposure.
    Low,
    /// Moderate exposure.
    Medium,
    /// High exposure.
    High,
    /// Certificate verification is disabled entirely.
    Critical,
}

impl SecurityRiskLevel {
    /// All levels from lowest to highest.
    pub const ALL: [Self; 5] = [
        Self::None,
        Self::Low,
        Self::Medium,
        Self::High,
        Self::Critical,
    ];

    /// Maps a 0-10 risk score onto the ordinal scale.
    ///
    /// Scores never map to `Critical`.
    #[must_use]
    pub const fn from_score(score: u8) -> Self {
        match score {
            0 => Self::None,
            1..=3 => Self::Low,
            4..=6 => Self::Medium,
            _ => Self::High,
        }
    }

    /// Returns the lowercase identifier.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    /// Operator-facing description of what this level means.
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::None => "No additional security risk",
            Self::Low => "Minimal security impact, acceptable for most environments",
            Self::Medium => "Moderate security risk, review before production use",
            Self::High => "High security risk, not recommended for production",
            Self::Critical => "Critical security risk, never use in production",
        }
    }

    /// Whether this level is `High` or above.
    #[must_use]
    pub const fn is_high(self) -> bool {
        matches!(self, Self::High | Self::Critical)
    }
}

impl fmt::Display for SecurityRiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverability() {
        let unrecoverable: Vec<_> = CertificateErrorKind::ALL
            .into_iter()
            .filter(|k| !k.is_recoverable())
            .collect();
        assert_eq!(
            unrecoverable,
            vec![
                CertificateErrorKind::Expired,
                CertificateErrorKind::BadCertificate,
                CertificateErrorKind::Revoked,
                CertificateErrorKind::KeyUsageInvalid,
            ]
        );
    }

    #[test]
    fn test_kind_round_trips_through_str() {
        for kind in CertificateErrorKind::ALL {
            assert_eq!(kind.as_str().parse::<CertificateErrorKind>(), Ok(kind));
        }
        assert!("bogus".parse::<CertificateErrorKind>().is_err());
    }

    #[test]
    fn test_kind_serde_matches_display() {
        let json = serde_json::to_string(&CertificateErrorKind::UntrustedCA).unwrap();
        assert_eq!(json, "\"untrusted_ca\"");
        let json = serde_json::to_string(&CertificateErrorKind::KeyUsageInvalid).unwrap();
        assert_eq!(json, "\"key_usage_invalid\"");
    }

    #[test]
    fn test_score_mapping_never_critical() {
        for score in 0..=u8::MAX {
            assert_ne!(SecurityRiskLevel::from_score(score), SecurityRiskLevel::Critical);
        }
        assert_eq!(SecurityRiskLevel::from_score(0), SecurityRiskLevel::None);
        assert_eq!(SecurityRiskLevel::from_score(3), SecurityRiskLevel::Low);
        assert_eq!(SecurityRiskLevel::from_score(6), SecurityRiskLevel::Medium);
        assert_eq!(SecurityRiskLevel::from_score(7), SecurityRiskLevel::High);
    }

    #[test]
    fn test_risk_ordering() {
        assert!(SecurityRiskLevel::Critical > SecurityRiskLevel::High);
        assert!(SecurityRiskLevel::Low > SecurityRiskLevel::None);
        assert!(SecurityRiskLevel::High.is_high());
        assert!(!SecurityRiskLevel::Medium.is_high());
    }
}
