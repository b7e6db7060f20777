//! Certificate chain validation.
//!
//! Re-validates a presented chain independently of the TLS stack: validity
//! windows with clock-skew tolerance, hostname coverage, self-signed leaves,
//! and path building by issuer name against a root store. Signatures are not
//! checked here; the TLS stack already did that.

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::certificate::Certificate;
use crate::clock::{Clock, SystemClock};
use crate::error::{Error, Result};
use crate::kind::CertificateErrorKind;

/// Default tolerance applied to both ends of a validity window.
pub const DEFAULT_CLOCK_SKEW_SECS: i64 = 5 * 60;

/// Certificates expiring within this many days are flagged by [`ChainValidator::info`].
pub const EXPIRY_WARNING_DAYS: i64 = 30;

/// Longest path the builder will follow.
pub const MAX_CHAIN_DEPTH: usize = 10;

/// A set of trusted root certificates.
#[derive(Debug, Clone, Default)]
pub struct RootStore {
    roots: Vec<Certificate>,
}

impl RootStore {
    /// Creates an empty store.
    #[must_use]
    pub const fn new() -> Self {
        Self { roots: Vec::new() }
    }

    /// Creates a store from the given roots.
    #[must_use]
    pub const fn from_certificates(roots: Vec<Certificate>) -> Self {
        Self { roots }
    }

    /// Loads the roots installed in the platform trust store.
    ///
    /// Certificates that fail to load or parse are skipped.
    #[must_use]
    pub fn platform() -> Self {
        let result = rustls_native_certs::load_native_certs();
        for error in &result.errors {
            warn!("Error loading some native root certificates: {}", error);
        }

        let roots: Vec<_> = result
            .certs
            .iter()
            .filter_map(|der| match Certificate::from_der(der.as_ref()) {
                Ok(cert) => Some(cert),
                Err(e) => {
                    debug!("Skipping unparseable platform root: {}", e);
                    None
                }
            })
            .collect();

        debug!(count = roots.len(), "Loaded platform root certificates");
        Self { roots }
    }

    /// Adds a root.
    pub fn add(&mut self, root: Certificate) {
        self.roots.push(root);
    }

    /// Whether `cert` is itself one of the roots.
    #[must_use]
    pub fn is_trusted(&self, cert: &Certificate) -> bool {
        self.roots.iter().any(|root| {
            root == cert || (root.fingerprint.is_some() && root.fingerprint == cert.fingerprint)
        })
    }

    /// Finds a root whose subject is `cert`'s issuer.
    #[must_use]
    pub fn find_issuer(&self, cert: &Certificate) -> Option<&Certificate> {
        self.roots.iter().find(|root| root.subject == cert.issuer)
    }

    /// Number of roots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.roots.len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }
}

/// Summary of a chain for display and recommendation context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainInfo {
    /// Number of certificates.
    pub length: usize,

    /// Latest start of validity across the chain.
    pub not_before: Option<DateTime<Utc>>,

    /// Earliest end of validity across the chain: the chain's effective expiry.
    pub not_after: Option<DateTime<Utc>>,

    /// Subject of the leaf.
    pub leaf_subject: Option<String>,

    /// Subject of the last certificate.
    pub root_subject: Option<String>,

    /// Hard failures and soft warnings found.
    pub issues: Vec<String>,

    /// False when any certificate is outside its validity window.
    pub is_valid: bool,
}

/// A problem found at one position in a chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainProblem {
    /// Position in the chain, 0 being the leaf.
    pub position: usize,

    /// Subject of the certificate at that position.
    pub subject: String,

    /// Kind of failure.
    pub kind: CertificateErrorKind,

    /// Human-readable detail.
    pub reason: String,
}

impl fmt::Display for ChainProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} ({}): {}",
            self.position, self.subject, self.kind, self.reason
        )
    }
}

/// Validates certificate chains.
#[derive(Debug, Clone)]
pub struct ChainValidator {
    clock: Arc<dyn Clock>,
    skew: Duration,
    extra_roots: Vec<Certificate>,
    platform_roots: Arc<OnceCell<RootStore>>,
}

impl Default for ChainValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl ChainValidator {
    /// Creates a validator with the system clock and default skew tolerance.
    #[must_use]
    pub fn new() -> Self {
        Self {
            clock: Arc::new(SystemClock),
            skew: Duration::seconds(DEFAULT_CLOCK_SKEW_SECS),
            extra_roots: Vec::new(),
            platform_roots: Arc::new(OnceCell::new()),
        }
    }

    /// Uses `clock` when no explicit validation time is given.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Sets the clock-skew tolerance.
    #[must_use]
    pub const fn with_clock_skew(mut self, skew: Duration) -> Self {
        self.skew = skew;
        self
    }

    /// Trusts `root` in addition to the platform roots.
    #[must_use]
    pub fn with_trusted_root(mut self, root: Certificate) -> Self {
        self.extra_roots.push(root);
        self
    }

    /// Preloads the platform store instead of reading the system trust store.
    #[must_use]
    pub fn with_platform_roots(self, roots: RootStore) -> Self {
        let cell = OnceCell::new();
        let _ = cell.set(roots);
        Self {
            platform_roots: Arc::new(cell),
            ..self
        }
    }

    fn platform_store(&self) -> &RootStore {
        self.platform_roots.get_or_init(RootStore::platform)
    }

    /// The explicit store, or the platform store plus any extra roots.
    fn roots<'a>(&'a self, explicit: Option<&'a RootStore>) -> Cow<'a, RootStore> {
        if let Some(roots) = explicit {
            return Cow::Borrowed(roots);
        }
        let platform = self.platform_store();
        if self.extra_roots.is_empty() {
            return Cow::Borrowed(platform);
        }
        let mut merged = platform.clone();
        for root in &self.extra_roots {
            merged.add(root.clone());
        }
        Cow::Owned(merged)
    }

    /// Whether `cert` is one of the default trusted roots.
    #[must_use]
    pub fn is_trusted_ca(&self, cert: &Certificate) -> bool {
        self.roots(None).is_trusted(cert)
    }

    /// Validates `leaf` at `time` (now when `None`).
    ///
    /// Falls back to the platform roots when `roots` is `None`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ChainValidation`] naming the first failed check.
    pub fn validate(
        &self,
        leaf: &Certificate,
        roots: Option<&RootStore>,
        intermediates: &[Certificate],
        time: Option<DateTime<Utc>>,
    ) -> Result<Vec<Certificate>> {
        self.check(leaf, roots, intermediates, time, None)
    }

    /// Validates `leaf` and additionally requires it to cover `hostname`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ChainValidation`] naming the first failed check, or
    /// [`Error::EmptyHostname`].
    pub fn validate_with_hostname(
        &self,
        leaf: &Certificate,
        roots: Option<&RootStore>,
        intermediates: &[Certificate],
        time: Option<DateTime<Utc>>,
        hostname: &str,
    ) -> Result<Vec<Certificate>> {
        if hostname.is_empty() {
            return Err(Error::EmptyHostname);
        }
        self.check(leaf, roots, intermediates, time, Some(hostname))
    }

    /// Validates a presented chain, leaf first.
    ///
    /// # Errors
    ///
    /// Rejects an empty chain as a bad certificate; otherwise as
    /// [`ChainValidator::validate_with_hostname`].
    pub fn validate_chain(
        &self,
        chain: &[Certificate],
        roots: Option<&RootStore>,
        hostname: Option<&str>,
    ) -> Result<Vec<Certificate>> {
        let Some((leaf, intermediates)) = chain.split_first() else {
            return Err(Error::chain(
                CertificateErrorKind::BadCertificate,
                "empty certificate chain",
            ));
        };
        self.check(leaf, roots, intermediates, None, hostname.filter(|h| !h.is_empty()))
    }

    fn check(
        &self,
        leaf: &Certificate,
        roots: Option<&RootStore>,
        intermediates: &[Certificate],
        time: Option<DateTime<Utc>>,
        hostname: Option<&str>,
    ) -> Result<Vec<Certificate>> {
        let at = time.unwrap_or_else(|| self.clock.now());

        self.check_window(leaf, at)?;

        if let Some(host) = hostname {
            if !leaf.matches_hostname(host) {
                return Err(Error::chain(
                    CertificateErrorKind::HostnameMismatch,
                    format!("certificate for {} is not valid for {host}", leaf.subject),
                ));
            }
        }

        let roots = self.roots(roots);
        if leaf.is_self_signed() && !roots.is_trusted(leaf) {
            return Err(Error::chain(
                CertificateErrorKind::SelfSigned,
                format!("{} is self-signed and not a trusted root", leaf.subject),
            ));
        }

        let path = Self::build_path(leaf, &roots, intermediates)?;
        for cert in path.iter().skip(1) {
            self.check_window(cert, at)?;
        }
        Ok(path)
    }

    fn check_window(&self, cert: &Certificate, at: DateTime<Utc>) -> Result<()> {
        if cert.not_after + self.skew < at {
            return Err(Error::chain(
                CertificateErrorKind::Expired,
                format!("{} expired at {}", cert.subject, cert.not_after),
            ));
        }
        if cert.not_before - self.skew > at {
            return Err(Error::chain(
                CertificateErrorKind::NotYetValid,
                format!("{} is not valid until {}", cert.subject, cert.not_before),
            ));
        }
        Ok(())
    }

    /// Builds a path from `leaf` to a root by matching issuer to subject.
    ///
    /// Falls back to the platform roots when `roots` is `None`.
    ///
    /// # Errors
    ///
    /// Returns an `UntrustedCA` error when the leaf's issuer is unknown, and
    /// `ChainIncomplete` when the path stops at an intermediate.
    pub fn build_chain(
        &self,
        leaf: &Certificate,
        roots: Option<&RootStore>,
        intermediates: &[Certificate],
    ) -> Result<Vec<Certificate>> {
        Self::build_path(leaf, &self.roots(roots), intermediates)
    }

    fn build_path(
        leaf: &Certificate,
        roots: &RootStore,
        intermediates: &[Certificate],
    ) -> Result<Vec<Certificate>> {
        let mut path = vec![leaf.clone()];

        loop {
            let current = &path[path.len() - 1];

            if roots.is_trusted(current) {
                return Ok(path);
            }
            if let Some(root) = roots.find_issuer(current) {
                let root = root.clone();
                path.push(root);
                return Ok(path);
            }
            if current.is_self_signed() {
                return Err(Error::chain(
                    CertificateErrorKind::UntrustedCA,
                    format!("chain ends at untrusted root {}", current.subject),
                ));
            }
            if path.len() >= MAX_CHAIN_DEPTH {
                return Err(Error::chain(
                    CertificateErrorKind::ChainIncomplete,
                    format!("chain exceeds maximum depth of {MAX_CHAIN_DEPTH}"),
                ));
            }

            let next = intermediates
                .iter()
                .find(|c| c.subject == current.issuer && !path.contains(c))
                .cloned();
            match next {
                Some(next) => path.push(next),
                None if path.len() == 1 => {
                    return Err(Error::chain(
                        CertificateErrorKind::UntrustedCA,
                        format!("issuer {} of {} is not trusted", current.issuer, current.subject),
                    ));
                }
                None => {
                    return Err(Error::chain(
                        CertificateErrorKind::ChainIncomplete,
                        format!("no certificate found for issuer {}", current.issuer),
                    ));
                }
            }
        }
    }

    /// Summarizes a chain at the validator's current time.
    #[must_use]
    pub fn info(&self, chain: &[Certificate]) -> ChainInfo {
        let at = self.clock.now();
        let mut issues = Vec::new();
        let mut is_valid = true;

        if chain.is_empty() {
            issues.push("empty certificate chain".to_string());
            is_valid = false;
        }

        for (i, cert) in chain.iter().enumerate() {
            if cert.is_expired_at(at) {
                issues.push(format!(
                    "certificate {i} ({}) expired at {}",
                    cert.subject, cert.not_after
                ));
                is_valid = false;
            } else if cert.not_before > at {
                issues.push(format!(
                    "certificate {i} ({}) is not valid until {}",
                    cert.subject, cert.not_before
                ));
                is_valid = false;
            } else {
                let days = (cert.not_after - at).num_days();
                if days < EXPIRY_WARNING_DAYS {
                    issues.push(format!(
                        "certificate {i} ({}) expires in {days} days",
                        cert.subject
                    ));
                }
            }
        }

        ChainInfo {
            length: chain.len(),
            not_before: chain.iter().map(|c| c.not_before).max(),
            not_after: chain.iter().map(|c| c.not_after).min(),
            leaf_subject: chain.first().map(|c| c.subject.clone()),
            root_subject: chain.last().map(|c| c.subject.clone()),
            issues,
            is_valid,
        }
    }

    /// Reports every problem in a presented chain, by position.
    #[must_use]
    pub fn analyze_chain(&self, chain: &[Certificate], hostname: Option<&str>) -> Vec<ChainProblem> {
        let at = self.clock.now();
        let mut problems = Vec::new();
        let problem = |position: usize, cert: &Certificate, kind, reason: String| ChainProblem {
            position,
            subject: cert.subject.clone(),
            kind,
            reason,
        };

        for (i, cert) in chain.iter().enumerate() {
            if let Err(Error::ChainValidation { kind, reason }) = self.check_window(cert, at) {
                problems.push(problem(i, cert, kind, reason));
            }
            if i == 0 {
                if let Some(host) = hostname.filter(|h| !h.is_empty()) {
                    if !cert.matches_hostname(host) {
                        problems.push(problem(
                            i,
                            cert,
                            CertificateErrorKind::HostnameMismatch,
                            format!("not valid for {host}"),
                        ));
                    }
                }
            }
            if let Some(parent) = chain.get(i + 1) {
                if cert.issuer != parent.subject {
                    problems.push(problem(
                        i,
                        cert,
                        CertificateErrorKind::ChainIncomplete,
                        format!("issuer {} does not match next subject {}", cert.issuer, parent.subject),
                    ));
                }
            } else if cert.is_self_signed() && i == 0 {
                problems.push(problem(
                    i,
                    cert,
                    CertificateErrorKind::SelfSigned,
                    "leaf certificate is self-signed".to_string(),
                ));
            }
        }
        problems
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn cert(subject: &str, issuer: &str, now: DateTime<Utc>) -> Certificate {
        Certificate::new(subject, issuer, now - Duration::hours(1), now + Duration::days(365))
    }

    fn fixture(now: DateTime<Utc>) -> (Certificate, Certificate, RootStore) {
        let root = cert("CN=Root", "CN=Root", now).as_ca();
        let intermediate = cert("CN=Intermediate", "CN=Root", now).as_ca();
        (intermediate, root.clone(), RootStore::from_certificates(vec![root]))
    }

    fn validator(now: DateTime<Utc>) -> ChainValidator {
        ChainValidator::new()
            .with_clock(Arc::new(ManualClock::new(now)))
            .with_platform_roots(RootStore::new())
    }

    #[test]
    fn test_validity_window_round_trip() {
        let now = Utc::now();
        let (intermediate, _, roots) = fixture(now);
        let mut leaf = Certificate::new(
            "CN=registry.example.com",
            "CN=Intermediate",
            now - Duration::hours(1),
            now + Duration::hours(24),
        );
        let v = validator(now);

        let path = v
            .validate(&leaf, Some(&roots), std::slice::from_ref(&intermediate), Some(now))
            .unwrap();
        assert_eq!(path.len(), 3);

        leaf.not_after = now - Duration::hours(1);
        let err = v
            .validate(&leaf, Some(&roots), &[intermediate], Some(now))
            .unwrap_err();
        assert_eq!(err.kind(), Some(CertificateErrorKind::Expired));
    }

    #[test]
    fn test_clock_skew_tolerance() {
        let now = Utc::now();
        let (_, root, roots) = fixture(now);
        let leaf = Certificate::new(
            "CN=leaf",
            &root.subject,
            now + Duration::minutes(3),
            now + Duration::days(1),
        );
        let v = validator(now);
        assert!(v.validate(&leaf, Some(&roots), &[], None).is_ok());

        let strict = v.clone().with_clock_skew(Duration::zero());
        let err = strict.validate(&leaf, Some(&roots), &[], None).unwrap_err();
        assert_eq!(err.kind(), Some(CertificateErrorKind::NotYetValid));

        let just_expired = Certificate::new(
            "CN=leaf",
            &root.subject,
            now - Duration::days(1),
            now - Duration::minutes(3),
        );
        assert!(v.validate(&just_expired, Some(&roots), &[], None).is_ok());
    }

    #[test]
    fn test_hostname_check() {
        let now = Utc::now();
        let (_, root, roots) = fixture(now);
        let leaf = cert("CN=leaf", &root.subject, now).with_dns_names(["registry.example.com"]);
        let v = validator(now);

        assert!(v
            .validate_with_hostname(&leaf, Some(&roots), &[], None, "registry.example.com")
            .is_ok());
        let err = v
            .validate_with_hostname(&leaf, Some(&roots), &[], None, "other.example.com")
            .unwrap_err();
        assert_eq!(err.kind(), Some(CertificateErrorKind::HostnameMismatch));
        assert_eq!(
            v.validate_with_hostname(&leaf, Some(&roots), &[], None, ""),
            Err(Error::EmptyHostname)
        );
    }

    #[test]
    fn test_self_signed_leaf() {
        let now = Utc::now();
        let leaf = cert("CN=dev", "CN=dev", now);
        let v = validator(now);
        let err = v
            .validate(&leaf, Some(&RootStore::new()), &[], None)
            .unwrap_err();
        assert_eq!(err.kind(), Some(CertificateErrorKind::SelfSigned));

        let trusted = RootStore::from_certificates(vec![leaf.clone()]);
        assert_eq!(v.validate(&leaf, Some(&trusted), &[], None).unwrap().len(), 1);
    }

    #[test]
    fn test_build_chain_failures() {
        let now = Utc::now();
        let (intermediate, _, roots) = fixture(now);
        let v = validator(now);

        let orphan = cert("CN=leaf", "CN=Nobody", now);
        let err = v.build_chain(&orphan, Some(&roots), &[]).unwrap_err();
        assert_eq!(err.kind(), Some(CertificateErrorKind::UntrustedCA));

        let other_root = RootStore::from_certificates(vec![cert("CN=Other", "CN=Other", now)]);
        let leaf = cert("CN=leaf", "CN=Intermediate", now);
        let err = v
            .build_chain(&leaf, Some(&other_root), &[intermediate.clone()])
            .unwrap_err();
        assert_eq!(err.kind(), Some(CertificateErrorKind::ChainIncomplete));

        let path = v.build_chain(&leaf, Some(&roots), &[intermediate]).unwrap();
        assert_eq!(path.last().map(|c| c.subject.as_str()), Some("CN=Root"));

        let dangling = cert("CN=Intermediate", "CN=Missing", now).as_ca();
        let err = v.build_chain(&leaf, Some(&roots), &[dangling]).unwrap_err();
        assert_eq!(err.kind(), Some(CertificateErrorKind::ChainIncomplete));
    }

    #[test]
    fn test_validate_chain_rejects_empty() {
        let v = validator(Utc::now());
        let err = v.validate_chain(&[], None, None).unwrap_err();
        assert_eq!(err.kind(), Some(CertificateErrorKind::BadCertificate));
    }

    #[test]
    fn test_default_roots_fall_back_to_platform_store() {
        let now = Utc::now();
        let (_, root, roots) = fixture(now);
        let v = ChainValidator::new()
            .with_clock(Arc::new(ManualClock::new(now)))
            .with_platform_roots(roots);
        let leaf = cert("CN=leaf", &root.subject, now);

        assert!(v.validate(&leaf, None, &[], None).is_ok());
        assert!(v.is_trusted_ca(&root));
    }

    #[test]
    fn test_extra_roots_apply_alongside_preloaded_platform_store() {
        let now = Utc::now();
        let (_, _, platform) = fixture(now);
        let extra = cert("CN=Extra Root", "CN=Extra Root", now).as_ca();
        let v = ChainValidator::new()
            .with_clock(Arc::new(ManualClock::new(now)))
            .with_platform_roots(platform)
            .with_trusted_root(extra.clone());
        let leaf = cert("CN=leaf", &extra.subject, now);

        assert!(v.is_trusted_ca(&extra));
        assert!(v.validate(&leaf, None, &[], None).is_ok());

        // A clone sharing an initialized platform store still sees new roots
        let other = cert("CN=Other Root", "CN=Other Root", now).as_ca();
        let cloned = v.clone().with_trusted_root(other.clone());
        let other_leaf = cert("CN=other leaf", &other.subject, now);
        assert!(cloned.validate(&other_leaf, None, &[], None).is_ok());
        assert!(v.validate(&other_leaf, None, &[], None).is_err());
    }

    #[test]
    fn test_info_reports_effective_expiry_and_soft_issues() {
        let now = Utc::now();
        let leaf = Certificate::new(
            "CN=leaf",
            "CN=Root",
            now - Duration::days(10),
            now + Duration::days(12),
        );
        let root = cert("CN=Root", "CN=Root", now);
        let info = validator(now).info(&[leaf.clone(), root]);

        assert_eq!(info.length, 2);
        assert_eq!(info.not_after, Some(leaf.not_after));
        assert_eq!(info.leaf_subject.as_deref(), Some("CN=leaf"));
        assert_eq!(info.root_subject.as_deref(), Some("CN=Root"));
        assert!(info.is_valid);
        assert_eq!(info.issues.len(), 1);
        assert!(info.issues[0].contains("expires in"));
    }

    #[test]
    fn test_info_empty_and_expired() {
        let now = Utc::now();
        let v = validator(now);
        assert!(!v.info(&[]).is_valid);

        let expired = Certificate::new("CN=old", "CN=Root", now - Duration::days(400), now - Duration::days(1));
        let info = v.info(&[expired]);
        assert!(!info.is_valid);
        assert!(info.issues[0].contains("expired"));
    }

    #[test]
    fn test_analyze_chain_positions() {
        let now = Utc::now();
        let leaf = cert("CN=leaf", "CN=Intermediate", now).with_dns_names(["a.example.com"]);
        let wrong_parent = cert("CN=Elsewhere", "CN=Root", now);
        let problems = validator(now).analyze_chain(&[leaf, wrong_parent], Some("b.example.com"));

        assert_eq!(problems.len(), 2);
        assert_eq!(problems[0].kind, CertificateErrorKind::HostnameMismatch);
        assert_eq!(problems[1].kind, CertificateErrorKind::ChainIncomplete);
        assert!(problems.iter().all(|p| p.position == 0));
    }
}
