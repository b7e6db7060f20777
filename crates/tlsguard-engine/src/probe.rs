//! Connection probes used by fallback escalation.
//!
//! A probe tries one connection with a given [`TransportConfig`] and reports
//! whether the TLS handshake and a registry round trip succeeded.

use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use tlsguard_core::{CertificateFailure, RootSelection, TlsVersion, TransportConfig};
use tracing::{debug, warn};
use url::Url;

/// Why a probe failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProbeError {
    /// The hostname does not form a valid URL.
    #[error("Invalid registry host '{hostname}': {reason}")]
    InvalidHost {
        /// The hostname.
        hostname: String,
        /// Parse error.
        reason: String,
    },

    /// The HTTP client could not be built for this transport.
    #[error("Failed to build HTTP client: {reason}")]
    ClientBuild {
        /// Reason.
        reason: String,
    },

    /// The connection failed.
    #[error("Connection to {url} failed: {message}")]
    Connection {
        /// URL probed.
        url: String,
        /// Error text, including causes.
        message: String,
    },

    /// The probe did not finish in time.
    #[error("Probe of {url} timed out after {timeout:?}")]
    Timeout {
        /// URL probed.
        url: String,
        /// Bound that was exceeded.
        timeout: Duration,
    },
}

/// Tries a connection with a specific transport.
#[async_trait]
pub trait ConnectionProbe: Send + Sync + Debug {
    /// Connects to `hostname` using `transport`.
    async fn probe(&self, hostname: &str, transport: &TransportConfig) -> Result<(), ProbeError>;
}

const fn reqwest_version(version: TlsVersion) -> reqwest::tls::Version {
    match version {
        TlsVersion::Tls10 => reqwest::tls::Version::TLS_1_0,
        TlsVersion::Tls11 => reqwest::tls::Version::TLS_1_1,
        TlsVersion::Tls12 => reqwest::tls::Version::TLS_1_2,
        TlsVersion::Tls13 => reqwest::tls::Version::TLS_1_3,
    }
}

/// Probes the registry API base (`/v2/`) over HTTPS. Any HTTP response,
/// including 401, counts as success: TLS worked.
#[derive(Debug, Clone)]
pub struct HttpsProbe {
    timeout: Duration,
    path: String,
    user_agent: String,
}

impl Default for HttpsProbe {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

impl HttpsProbe {
    /// Creates a probe with a per-request timeout.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            path: "/v2/".to_string(),
            user_agent: format!("tlsguard/{}", env!("CARGO_PKG_VERSION")),
        }
    }

    /// Probes a different path.
    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// URL probed for `hostname`.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::InvalidHost`] if the URL does not parse.
    pub fn url_for(&self, hostname: &str) -> Result<Url, ProbeError> {
        Url::parse(&format!("https://{}{}", hostname.trim(), self.path)).map_err(|e| {
            ProbeError::InvalidHost {
                hostname: hostname.to_string(),
                reason: e.to_string(),
            }
        })
    }

    fn build_client(&self, transport: &TransportConfig) -> Result<reqwest::Client, ProbeError> {
        let mut builder = reqwest::Client::builder()
            .timeout(self.timeout)
            .user_agent(&self.user_agent)
            .danger_accept_invalid_certs(!transport.verify_certificates)
            .tls_sni(transport.server_name_indication)
            .min_tls_version(reqwest_version(transport.min_tls_version))
            .max_tls_version(reqwest_version(transport.max_tls_version));

        if transport.roots == RootSelection::PlatformOnly {
            let native = rustls_native_certs::load_native_certs();
            for error in &native.errors {
                warn!("Error loading some native root certificates: {}", error);
            }
            builder = builder.tls_built_in_root_certs(false);
            for der in &native.certs {
                match reqwest::Certificate::from_der(der.as_ref()) {
                    Ok(cert) => builder = builder.add_root_certificate(cert),
                    Err(e) => debug!("Skipping unusable platform root: {}", e),
                }
            }
        }

        builder.build().map_err(|e| ProbeError::ClientBuild {
            reason: CertificateFailure::from_error(&e).message,
        })
    }
}

#[async_trait]
impl ConnectionProbe for HttpsProbe {
    async fn probe(&self, hostname: &str, transport: &TransportConfig) -> Result<(), ProbeError> {
        let url = self.url_for(hostname)?;
        let client = self.build_client(transport)?;
        debug!(url = %url, transport = %transport, "Probing registry");

        match client.get(url.clone()).send().await {
            Ok(response) => {
                debug!(url = %url, status = %response.status(), "Probe succeeded");
                Ok(())
            }
            Err(e) if e.is_timeout() => Err(ProbeError::Timeout {
                url: url.to_string(),
                timeout: self.timeout,
            }),
            Err(e) => Err(ProbeError::Connection {
                url: url.to_string(),
                message: CertificateFailure::from_error(&e).message,
            }),
        }
    }
}

/// Probe that succeeds only for listed transports and records every call.
#[derive(Debug, Default)]
pub struct ScriptedProbe {
    accepts: Vec<TransportConfig>,
    calls: Mutex<Vec<(String, TransportConfig)>>,
}

impl ScriptedProbe {
    /// A probe that fails every transport.
    #[must_use]
    pub fn failing() -> Self {
        Self::default()
    }

    /// A probe that succeeds for exactly `transport`.
    #[must_use]
    pub fn accepting(transport: TransportConfig) -> Self {
        Self::failing().or_accepting(transport)
    }

    /// Also succeeds for `transport`.
    #[must_use]
    pub fn or_accepting(mut self, transport: TransportConfig) -> Self {
        self.accepts.push(transport);
        self
    }

    /// Transports probed so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<(String, TransportConfig)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl ConnectionProbe for ScriptedProbe {
    async fn probe(&self, hostname: &str, transport: &TransportConfig) -> Result<(), ProbeError> {
        self.calls
            .lock()
            .push((hostname.to_string(), transport.clone()));
        if self.accepts.contains(transport) {
            Ok(())
        } else {
            Err(ProbeError::Connection {
                url: format!("https://{hostname}/v2/"),
                message: "x509: certificate signed by unknown authority".to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_for() {
        let probe = HttpsProbe::default();
        assert_eq!(
            probe.url_for("registry.local:5000").unwrap().as_str(),
            "https://registry.local:5000/v2/"
        );
        assert!(matches!(
            probe.url_for("bad host"),
            Err(ProbeError::InvalidHost { .. })
        ));
    }

    #[test]
    fn test_build_client_for_each_transport() {
        let probe = HttpsProbe::new(Duration::from_secs(1));
        for transport in [
            TransportConfig::strict(),
            TransportConfig::strict().with_platform_roots(),
            TransportConfig::strict().without_sni(),
            TransportConfig::unverified(),
        ] {
            assert!(probe.build_client(&transport).is_ok(), "{transport}");
        }
    }

    #[tokio::test]
    async fn test_scripted_probe() {
        let probe = ScriptedProbe::accepting(TransportConfig::unverified());
        assert!(probe
            .probe("a.local", &TransportConfig::strict())
            .await
            .is_err());
        assert!(probe
            .probe("a.local", &TransportConfig::unverified())
            .await
            .is_ok());
        assert_eq!(probe.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_unreachable_host_fails() {
        let probe = HttpsProbe::new(Duration::from_secs(2)).with_path("/v2/");
        let result = probe
            .probe("127.0.0.1:1", &TransportConfig::strict())
            .await;
        assert!(matches!(
            result,
            Err(ProbeError::Connection { .. } | ProbeError::Timeout { .. })
        ));
    }
}
