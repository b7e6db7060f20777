//! Parsed X.509 certificate model.
//!
//! The engine reasons about a small, already-parsed view of a certificate.
//! [`Certificate::from_der`] produces that view from DER bytes; callers that
//! already hold parsed data can build it directly.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use x509_parser::prelude::*;

use crate::error::{Error, Result};

/// The fields of an X.509 certificate the engine reasons about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Certificate {
    /// Subject distinguished name, e.g. `CN=registry.example.com`.
    pub subject: String,

    /// Issuer distinguished name.
    pub issuer: String,

    /// Subject common name, if present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub common_name: Option<String>,

    /// DNS subject alternative names.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dns_names: Vec<String>,

    /// IP address subject alternative names.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ip_addresses: Vec<IpAddr>,

    /// Start of the validity window.
    pub not_before: DateTime<Utc>,

    /// End of the validity window.
    pub not_after: DateTime<Utc>,

    /// Whether basic constraints mark this as a CA certificate.
    pub is_ca: bool,

    /// Serial number, colon-separated hex.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial: Option<String>,

    /// SHA-256 fingerprint of the DER encoding, lowercase hex.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
}

impl Certificate {
    /// Creates a certificate view from its essential fields.
    #[must_use]
    pub fn new(
        subject: impl Into<String>,
        issuer: impl Into<String>,
        not_before: DateTime<Utc>,
        not_after: DateTime<Utc>,
    ) -> Self {
        Self {
            subject: subject.into(),
            issuer: issuer.into(),
            common_name: None,
            dns_names: Vec::new(),
            ip_addresses: Vec::new(),
            not_before,
            not_after,
            is_ca: false,
            serial: None,
            fingerprint: None,
        }
    }

    /// Parses a DER-encoded certificate.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CertificateParse`] if the bytes are not a valid
    /// X.509 certificate.
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let (_, x509) = X509Certificate::from_der(der).map_err(|e| Error::CertificateParse {
            reason: e.to_string(),
        })?;

        let not_before = timestamp(x509.validity().not_before.timestamp())?;
        let not_after = timestamp(x509.validity().not_after.timestamp())?;

        let common_name = x509
            .subject()
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .map(str::to_string);

        let mut dns_names = Vec::new();
        let mut ip_addresses = Vec::new();
        if let Ok(Some(san)) = x509.subject_alternative_name() {
            for name in &san.value.general_names {
                match name {
                    GeneralName::DNSName(dns) => dns_names.push((*dns).to_string()),
                    GeneralName::IPAddress(bytes) => {
                        if let Some(ip) = ip_from_bytes(bytes) {
                            ip_addresses.push(ip);
                        }
                    }
                    _ => {}
                }
            }
        }

        let is_ca = x509
            .basic_constraints()
            .ok()
            .flatten()
            .is_some_and(|bc| bc.value.ca);

        Ok(Self {
            subject: x509.subject().to_string(),
            issuer: x509.issuer().to_string(),
            common_name,
            dns_names,
            ip_addresses,
            not_before,
            not_after,
            is_ca,
            serial: Some(x509.raw_serial_as_string()),
            fingerprint: Some(hex::encode(Sha256::digest(der))),
        })
    }

    /// Sets the common name.
    #[must_use]
    pub fn with_common_name(mut self, cn: impl Into<String>) -> Self {
        self.common_name = Some(cn.into());
        self
    }

    /// Adds DNS subject alternative names.
    #[must_use]
    pub fn with_dns_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dns_names.extend(names.into_iter().map(Into::into));
        self
    }

    /// Adds an IP address subject alternative name.
    #[must_use]
    pub fn with_ip_address(mut self, ip: IpAddr) -> Self {
        self.ip_addresses.push(ip);
        self
    }

    /// Marks the certificate as a CA.
    #[must_use]
    pub const fn as_ca(mut self) -> Self {
        self.is_ca = true;
        self
    }

    /// Whether the certificate names itself as issuer.
    #[must_use]
    pub fn is_self_signed(&self) -> bool {
        self.subject == self.issuer
    }

    /// Whether `at` falls after the end of the validity window.
    #[must_use]
    pub fn is_expired_at(&self, at: DateTime<Utc>) -> bool {
        at > self.not_after
    }

    /// Whether the certificate covers `hostname`.
    ///
    /// IP literals are matched against IP SANs. DNS names are matched against
    /// DNS SANs with single-label wildcards; the common name is consulted only
    /// when the certificate carries no DNS SANs.
    #[must_use]
    pub fn matches_hostname(&self, hostname: &str) -> bool {
        let host = host_without_port(hostname)
            .trim_end_matches('.')
            .to_ascii_lowercase();

        if let Ok(ip) = host.parse::<IpAddr>() {
            return self.ip_addresses.contains(&ip);
        }

        if self.dns_names.is_empty() {
            return self
                .common_name
                .as_deref()
                .is_some_and(|cn| dns_name_matches(cn, &host));
        }

        self.dns_names.iter().any(|name| dns_name_matches(name, &host))
    }
}

/// Strips a trailing `:port` (and IPv6 brackets) from a host string.
#[must_use]
pub fn host_without_port(host: &str) -> &str {
    if let Some(rest) = host.strip_prefix('[') {
        return rest.split(']').next().unwrap_or(rest);
    }
    match host.rsplit_once(':') {
        // A second colon means a bare IPv6 literal, not a port.
        Some((name, port)) if !name.contains(':') && port.chars().all(|c| c.is_ascii_digit()) => {
            name
        }
        _ => host,
    }
}

fn dns_name_matches(pattern: &str, host: &str) -> bool {
    let pattern = pattern.trim_end_matches('.').to_ascii_lowercase();
    if let Some(suffix) = pattern.strip_prefix("*.") {
        return host
            .split_once('.')
            .is_some_and(|(label, rest)| !label.is_empty() && rest == suffix);
    }
    pattern == host
}

fn timestamp(secs: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0).ok_or_else(|| Error::CertificateParse {
        reason: format!("validity timestamp {secs} out of range"),
    })
}

fn ip_from_bytes(bytes: &[u8]) -> Option<IpAddr> {
    match bytes.len() {
        4 => <[u8; 4]>::try_from(bytes).ok().map(|b| IpAddr::V4(Ipv4Addr::from(b))),
        16 => <[u8; 16]>::try_from(bytes).ok().map(|b| IpAddr::V6(Ipv6Addr::from(b))),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn leaf() -> Certificate {
        let now = Utc::now();
        Certificate::new(
            "CN=registry.example.com",
            "CN=Example CA",
            now - Duration::hours(1),
            now + Duration::hours(24),
        )
    }

    #[test]
    fn test_from_der_reads_rcgen_certificate() {
        let mut params =
            rcgen::CertificateParams::new(vec!["registry.example.com".to_string()]).unwrap();
        params
            .subject_alt_names
            .push(rcgen::SanType::IpAddress("10.0.0.5".parse().unwrap()));
        params
            .distinguished_name
            .push(rcgen::DnType::CommonName, "registry.example.com");
        let key = rcgen::KeyPair::generate().unwrap();
        let cert = params.self_signed(&key).unwrap();

        let parsed = Certificate::from_der(cert.der()).unwrap();
        assert_eq!(parsed.common_name.as_deref(), Some("registry.example.com"));
        assert!(parsed.dns_names.contains(&"registry.example.com".to_string()));
        assert_eq!(parsed.ip_addresses, vec!["10.0.0.5".parse::<IpAddr>().unwrap()]);
        assert!(parsed.is_self_signed());
        assert_eq!(parsed.fingerprint.as_ref().map(String::len), Some(64));
        assert!(parsed.serial.is_some());
    }

    #[test]
    fn test_from_der_rejects_garbage() {
        let err = Certificate::from_der(b"not a certificate").unwrap_err();
        assert!(matches!(err, Error::CertificateParse { .. }));
    }

    #[test]
    fn test_hostname_exact_and_wildcard() {
        let cert = leaf().with_dns_names(["registry.example.com", "*.mirror.example.com"]);
        assert!(cert.matches_hostname("registry.example.com"));
        assert!(cert.matches_hostname("REGISTRY.example.com:443"));
        assert!(cert.matches_hostname("eu.mirror.example.com"));
        assert!(!cert.matches_hostname("a.b.mirror.example.com"));
        assert!(!cert.matches_hostname("mirror.example.com"));
        assert!(!cert.matches_hostname("other.example.com"));
    }

    #[test]
    fn test_hostname_ip_and_common_name_fallback() {
        let cert = leaf()
            .with_common_name("legacy.example.com")
            .with_ip_address("127.0.0.1".parse().unwrap());
        assert!(cert.matches_hostname("127.0.0.1:5000"));
        assert!(!cert.matches_hostname("127.0.0.2"));
        assert!(cert.matches_hostname("legacy.example.com"));

        let with_san = cert.with_dns_names(["new.example.com"]);
        assert!(!with_san.matches_hostname("legacy.example.com"));
    }

    #[test]
    fn test_host_without_port() {
        assert_eq!(host_without_port("kind-registry:5000"), "kind-registry");
        assert_eq!(host_without_port("registry.example.com"), "registry.example.com");
        assert_eq!(host_without_port("[::1]:5000"), "::1");
        assert_eq!(host_without_port("::1"), "::1");
    }

    #[test]
    fn test_expiry_and_self_signed() {
        let cert = leaf();
        assert!(!cert.is_self_signed());
        assert!(!cert.is_expired_at(Utc::now()));
        assert!(cert.is_expired_at(Utc::now() + Duration::days(2)));
    }
}
