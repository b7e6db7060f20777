//! Error classification.
//!
//! Maps a raw TLS/X.509 failure onto a [`CertificateErrorKind`]. Typed
//! payloads are mapped directly; otherwise the lowercase error text is run
//! through [`PHRASE_RULES`] in order and the first matching rule wins.
//! Classification never fails: anything unrecognized is `Unknown`.

use std::error::Error as StdError;
use std::fmt::Write as _;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::certificate::Certificate;
use crate::clock::{Clock, SystemClock};
use crate::kind::CertificateErrorKind;

/// Reason code carried by a certificate-invalid payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidReason {
    /// The certificate has expired or is not yet valid.
    Expired,
    /// A certificate in the chain is not allowed to sign others.
    NotAuthorizedToSign,
    /// Any other reason.
    Other,
}

/// Typed information some TLS stacks attach to a verification failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailurePayload {
    /// The certificate does not cover the requested hostname.
    HostnameMismatch {
        /// Certificate that was presented.
        certificate: Option<Certificate>,
        /// Hostname that was requested.
        hostname: String,
    },
    /// The chain could not be anchored in a trusted root.
    UnknownAuthority {
        /// Certificate that was presented.
        certificate: Option<Certificate>,
    },
    /// The certificate was rejected for a coded reason.
    CertificateInvalid {
        /// Certificate that was rejected.
        certificate: Option<Certificate>,
        /// Reason code.
        reason: InvalidReason,
    },
}

impl FailurePayload {
    fn certificate(&self) -> Option<&Certificate> {
        match self {
            Self::HostnameMismatch { certificate, .. }
            | Self::UnknownAuthority { certificate }
            | Self::CertificateInvalid { certificate, .. } => certificate.as_ref(),
        }
    }
}

/// A certificate failure as observed by the registry client.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CertificateFailure {
    /// Error text, including any nested causes.
    pub message: String,

    /// Typed payload, when the TLS stack provided one.
    pub payload: Option<FailurePayload>,

    /// Chain the server presented, leaf first.
    pub chain: Vec<Certificate>,
}

impl CertificateFailure {
    /// Creates a failure from error text alone.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            payload: None,
            chain: Vec::new(),
        }
    }

    /// Creates a failure from an error, flattening its source chain into the
    /// message.
    #[must_use]
    pub fn from_error(err: &(dyn StdError + 'static)) -> Self {
        let mut message = err.to_string();
        let mut source = err.source();
        while let Some(cause) = source {
            let text = cause.to_string();
            if !message.contains(&text) {
                let _ = write!(message, ": {text}");
            }
            source = cause.source();
        }
        Self::new(message)
    }

    /// Attaches a typed payload.
    #[must_use]
    pub fn with_payload(mut self, payload: FailurePayload) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Attaches the presented chain, leaf first.
    #[must_use]
    pub fn with_chain(mut self, chain: Vec<Certificate>) -> Self {
        self.chain = chain;
        self
    }

    /// Returns the leaf certificate, from the payload or the chain.
    #[must_use]
    pub fn leaf(&self) -> Option<&Certificate> {
        self.payload
            .as_ref()
            .and_then(FailurePayload::certificate)
            .or_else(|| self.chain.first())
    }
}

impl From<&str> for CertificateFailure {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for CertificateFailure {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

/// A phrase rule: matches when every `all` phrase and at least one `any`
/// phrase occur in the lowercase error text.
#[derive(Debug, Clone, Copy)]
pub struct PhraseRule {
    /// Phrases that must all be present.
    pub all: &'static [&'static str],
    /// Phrases of which one must be present. Empty means no constraint.
    pub any: &'static [&'static str],
    /// Kind assigned on match.
    pub kind: CertificateErrorKind,
}

impl PhraseRule {
    /// Whether the rule matches `text`, which must already be lowercase.
    #[must_use]
    pub fn matches(&self, text: &str) -> bool {
        self.all.iter().all(|p| text.contains(p))
            && (self.any.is_empty() || self.any.iter().any(|p| text.contains(p)))
    }
}

/// Ordered phrase table. Specific phrases come before generic ones: the
/// trailing bare `expired` rule only fires when nothing else matched.
pub const PHRASE_RULES: &[PhraseRule] = &[
    PhraseRule {
        all: &[],
        any: &["certificate has expired", "certificate expired", "expired certificate"],
        kind: CertificateErrorKind::Expired,
    },
    PhraseRule {
        all: &[],
        any: &["not valid yet", "not yet valid", "notvalidyet", "is not valid until"],
        kind: CertificateErrorKind::NotYetValid,
    },
    PhraseRule {
        all: &[],
        any: &["revoked"],
        kind: CertificateErrorKind::Revoked,
    },
    PhraseRule {
        all: &[],
        any: &["key usage", "invalidpurpose", "incompatible usage"],
        kind: CertificateErrorKind::KeyUsageInvalid,
    },
    PhraseRule {
        all: &[],
        any: &["self signed", "self-signed", "selfsigned"],
        kind: CertificateErrorKind::SelfSigned,
    },
    PhraseRule {
        all: &[],
        any: &[
            "unknown authority",
            "unknownissuer",
            "unknown issuer",
            "untrusted root",
            "unable to get local issuer",
        ],
        kind: CertificateErrorKind::UntrustedCA,
    },
    PhraseRule {
        all: &["hostname"],
        any: &["doesn't match", "does not match", "mismatch"],
        kind: CertificateErrorKind::HostnameMismatch,
    },
    PhraseRule {
        all: &[],
        any: &["notvalidforname", "not valid for name", "certificate is valid for"],
        kind: CertificateErrorKind::HostnameMismatch,
    },
    PhraseRule {
        all: &[],
        any: &["certificate chain", "incomplete chain", "unable to get issuer certificate"],
        kind: CertificateErrorKind::ChainIncomplete,
    },
    PhraseRule {
        all: &[],
        any: &["bad certificate", "badencoding", "malformed certificate", "badsignature"],
        kind: CertificateErrorKind::BadCertificate,
    },
    PhraseRule {
        all: &[],
        any: &["expired"],
        kind: CertificateErrorKind::Expired,
    },
];

/// Determines the kind of a failure without building a full record.
#[must_use]
pub fn classify_kind(failure: &CertificateFailure) -> CertificateErrorKind {
    let kind = failure
        .payload
        .as_ref()
        .map_or_else(|| classify_text(&failure.message), payload_kind);

    // A self-issued leaf is the usual reason no authority could be found.
    if kind == CertificateErrorKind::UntrustedCA
        && failure.leaf().is_some_and(Certificate::is_self_signed)
    {
        return CertificateErrorKind::SelfSigned;
    }
    kind
}

/// Runs error text through [`PHRASE_RULES`].
#[must_use]
pub fn classify_text(text: &str) -> CertificateErrorKind {
    let lower = text.to_lowercase();
    PHRASE_RULES
        .iter()
        .find(|rule| rule.matches(&lower))
        .map_or(CertificateErrorKind::Unknown, |rule| rule.kind)
}

const fn payload_kind(payload: &FailurePayload) -> CertificateErrorKind {
    match payload {
        FailurePayload::HostnameMismatch { .. } => CertificateErrorKind::HostnameMismatch,
        FailurePayload::UnknownAuthority { .. } => CertificateErrorKind::UntrustedCA,
        FailurePayload::CertificateInvalid { reason, .. } => match reason {
            InvalidReason::Expired => CertificateErrorKind::Expired,
            InvalidReason::NotAuthorizedToSign => CertificateErrorKind::UntrustedCA,
            InvalidReason::Other => CertificateErrorKind::BadCertificate,
        },
    }
}

/// Pulls a quoted hostname out of mismatch text such as
/// `hostname 'a.example.com' doesn't match` or `not valid for name "a"`.
fn requested_hostname(text: &str) -> Option<String> {
    let lower = text.to_ascii_lowercase();
    for marker in ["hostname ", "name "] {
        let Some(start) = lower.find(marker) else {
            continue;
        };
        let rest = &text[start + marker.len()..];
        let mut chars = rest.chars();
        let quote = chars.next().filter(|c| matches!(c, '\'' | '"'))?;
        let inner: String = chars.take_while(|c| *c != quote).collect();
        if !inner.is_empty() {
            return Some(inner);
        }
    }
    None
}

/// A classified certificate failure. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifiedError {
    /// The single kind assigned to this failure.
    pub kind: CertificateErrorKind,

    /// Original error text.
    pub error_text: String,

    /// Leaf certificate, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate: Option<Certificate>,

    /// Presented chain, leaf first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub chain: Vec<Certificate>,

    /// Host the connection was made to.
    pub hostname: String,

    /// Hostname named in the error text, when it differs in form.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requested_hostname: Option<String>,

    /// When the failure was classified.
    pub timestamp: DateTime<Utc>,

    /// Whether a fallback strategy can plausibly help.
    pub recoverable: bool,

    /// Operator-facing message.
    pub message: String,

    /// Suggested actions, most direct first.
    pub suggested_actions: Vec<String>,
}

impl ClassifiedError {
    /// One-line summary.
    #[must_use]
    pub fn summary(&self) -> String {
        format!("{}: {}", self.kind, self.message)
    }

    /// Multi-line description including suggested actions.
    #[must_use]
    pub fn detailed_description(&self) -> String {
        let mut out = format!("Certificate error: {}\n", self.message);
        let _ = writeln!(out, "Kind: {}", self.kind);
        if !self.hostname.is_empty() {
            let _ = writeln!(out, "Host: {}", self.hostname);
        }
        let _ = writeln!(
            out,
            "Recoverable: {}",
            if self.recoverable { "yes" } else { "no" }
        );
        if let Some(cert) = &self.certificate {
            let _ = writeln!(out, "Subject: {}", cert.subject);
            let _ = writeln!(out, "Issuer: {}", cert.issuer);
            let _ = writeln!(out, "Valid: {} .. {}", cert.not_before, cert.not_after);
        }
        out.push_str("Suggested actions:\n");
        for (i, action) in self.suggested_actions.iter().enumerate() {
            let _ = writeln!(out, "  {}. {action}", i + 1);
        }
        out
    }
}

/// Builds [`ClassifiedError`] records.
#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    clock: Arc<dyn Clock>,
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorClassifier {
    /// Creates a classifier using the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Creates a classifier stamping records with `clock`.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Classifies a failure observed while connecting to `hostname`.
    #[must_use]
    pub fn classify(&self, failure: &CertificateFailure, hostname: &str) -> ClassifiedError {
        let kind = classify_kind(failure);
        let certificate = failure.leaf().cloned();

        let requested_hostname = match &failure.payload {
            Some(FailurePayload::HostnameMismatch { hostname, .. }) => Some(hostname.clone()),
            _ if kind == CertificateErrorKind::HostnameMismatch => {
                requested_hostname(&failure.message)
            }
            _ => None,
        };

        let mut message = match kind {
            CertificateErrorKind::HostnameMismatch => {
                let host = requested_hostname.as_deref().unwrap_or(hostname);
                format!("Hostname '{host}' doesn't match certificate")
            }
            _ => kind.message().to_string(),
        };
        if !hostname.is_empty() && kind != CertificateErrorKind::HostnameMismatch {
            let _ = write!(message, " (hostname: {hostname})");
        }
        if let Some(cert) = &certificate {
            let _ = write!(message, " (subject: {})", cert.subject);
        }

        debug!(hostname = %hostname, kind = %kind, "Classified certificate failure");

        ClassifiedError {
            kind,
            error_text: failure.message.clone(),
            certificate,
            chain: failure.chain.clone(),
            hostname: hostname.to_string(),
            requested_hostname,
            timestamp: self.clock.now(),
            recoverable: kind.is_recoverable(),
            message,
            suggested_actions: kind
                .suggested_actions()
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
        }
    }

    /// Classifies an error value observed while connecting to `hostname`.
    #[must_use]
    pub fn classify_error(
        &self,
        err: &(dyn StdError + 'static),
        hostname: &str,
    ) -> ClassifiedError {
        self.classify(&CertificateFailure::from_error(err), hostname)
    }
}
