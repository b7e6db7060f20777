//! Transport configuration handed back to the registry client.
//!
//! The engine never opens connections itself beyond probing; it describes
//! how the caller's TLS transport should be built.

use std::fmt;

use serde::{Deserialize, Serialize};

/// TLS protocol versions a transport may negotiate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TlsVersion {
    /// TLS 1.0
    #[serde(rename = "1.0")]
    Tls10,
    /// TLS 1.1
    #[serde(rename = "1.1")]
    Tls11,
    /// TLS 1.2
    #[serde(rename = "1.2")]
    Tls12,
    /// TLS 1.3
    #[serde(rename = "1.3")]
    Tls13,
}

impl fmt::Display for TlsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Tls10 => "TLS 1.0",
            Self::Tls11 => "TLS 1.1",
            Self::Tls12 => "TLS 1.2",
            Self::Tls13 => "TLS 1.3",
        };
        f.write_str(s)
    }
}

/// Which root certificates the transport trusts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RootSelection {
    /// The client library's default root set.
    #[default]
    Default,
    /// Only the roots installed in the platform trust store.
    PlatformOnly,
}

/// How a TLS transport should be constructed for one connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Whether certificate verification is performed.
    pub verify_certificates: bool,

    /// Root certificates to trust.
    pub roots: RootSelection,

    /// Whether to send the server name indication extension.
    pub server_name_indication: bool,

    /// Lowest TLS version offered.
    pub min_tls_version: TlsVersion,

    /// Highest TLS version offered.
    pub max_tls_version: TlsVersion,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::strict()
    }
}

impl TransportConfig {
    /// Full verification, default roots, SNI on, TLS 1.2 and newer.
    #[must_use]
    pub const fn strict() -> Self {
        Self {
            verify_certificates: true,
            roots: RootSelection::Default,
            server_name_indication: true,
            min_tls_version: TlsVersion::Tls12,
            max_tls_version: TlsVersion::Tls13,
        }
    }

    /// Verification disabled for this connection only.
    #[must_use]
    pub const fn unverified() -> Self {
        Self {
            verify_certificates: false,
            ..Self::strict()
        }
    }

    /// Restricts trust to the platform's installed roots.
    #[must_use]
    pub const fn with_platform_roots(mut self) -> Self {
        self.roots = RootSelection::PlatformOnly;
        self
    }

    /// Omits the server name indication extension.
    #[must_use]
    pub const fn without_sni(mut self) -> Self {
        self.server_name_indication = false;
        self
    }

    /// Lowers the minimum TLS version.
    #[must_use]
    pub const fn with_min_tls_version(mut self, version: TlsVersion) -> Self {
        self.min_tls_version = version;
        self
    }

    /// Whether this configuration still verifies certificates.
    #[must_use]
    pub const fn is_verifying(&self) -> bool {
        self.verify_certificates
    }
}

impl fmt::Display for TransportConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "verify={} roots={:?} sni={} tls={}..={}",
            self.verify_certificates,
            self.roots,
            self.server_name_indication,
            self.min_tls_version,
            self.max_tls_version
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strict_defaults() {
        let config = TransportConfig::default();
        assert!(config.is_verifying());
        assert!(config.server_name_indication);
        assert_eq!(config.min_tls_version, TlsVersion::Tls12);
        assert_eq!(config.roots, RootSelection::Default);
    }

    #[test]
    fn test_retry_variants_keep_verification() {
        let configs = [
            TransportConfig::strict().with_platform_roots(),
            TransportConfig::strict().without_sni(),
            TransportConfig::strict().with_min_tls_version(TlsVersion::Tls10),
        ];
        for config in configs {
            assert!(config.is_verifying(), "{config}");
        }
    }

    #[test]
    fn test_unverified() {
        assert!(!TransportConfig::unverified().is_verifying());
    }
}
