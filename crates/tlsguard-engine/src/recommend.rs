//! Remediation advice for certificate failures.
//!
//! Advice comes from three places, merged and deduplicated:
//! - issue patterns matched against the error text (and the classified kind)
//! - a profile of the host: local cluster, public registry, or self-hosted
//! - a closing generic line
//!
//! Security warnings come first, then commands, then general advice.

use std::collections::HashSet;
use std::fmt::{self, Write as _};
use std::net::IpAddr;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tlsguard_core::{classify_text, host_without_port, CertificateErrorKind, SecurityRiskLevel};
use tracing::error;

/// Ordering tier of a recommendation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Tier {
    Warning,
    Command,
    Advice,
}

#[derive(Debug, Clone, Copy)]
struct Line {
    tier: Tier,
    text: &'static str,
}

const fn warning(text: &'static str) -> Line {
    Line {
        tier: Tier::Warning,
        text,
    }
}

const fn command(text: &'static str) -> Line {
    Line {
        tier: Tier::Command,
        text,
    }
}

const fn advice(text: &'static str) -> Line {
    Line {
        tier: Tier::Advice,
        text,
    }
}

/// Categories of issue recognized in error text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCategory {
    /// Issuer not trusted.
    UnknownAuthority,
    /// Outside the validity window.
    Expired,
    /// Name not covered.
    HostnameMismatch,
    /// Self-signed certificate.
    SelfSigned,
    /// Protocol version negotiation.
    TlsVersion,
    /// The host could not be reached at all.
    NetworkUnreachable,
    /// Nothing specific recognized.
    General,
}

impl IssueCategory {
    /// Returns the stable identifier.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::UnknownAuthority => "unknown_authority",
            Self::Expired => "expired",
            Self::HostnameMismatch => "hostname_mismatch",
            Self::SelfSigned => "self_signed",
            Self::TlsVersion => "tls_version",
            Self::NetworkUnreachable => "network_unreachable",
            Self::General => "general",
        }
    }

    const fn time_estimate(self) -> &'static str {
        match self {
            Self::UnknownAuthority => "10-15 minutes",
            Self::Expired => "30-60 minutes (certificate renewal)",
            Self::HostnameMismatch | Self::General => "15-30 minutes",
            Self::SelfSigned => "5-10 minutes",
            Self::TlsVersion => "30+ minutes (server configuration)",
            Self::NetworkUnreachable => "5-15 minutes",
        }
    }

    const fn from_kind(kind: CertificateErrorKind) -> Option<Self> {
        match kind {
            CertificateErrorKind::UntrustedCA | CertificateErrorKind::ChainIncomplete => {
                Some(Self::UnknownAuthority)
            }
            CertificateErrorKind::Expired | CertificateErrorKind::NotYetValid => Some(Self::Expired),
            CertificateErrorKind::HostnameMismatch => Some(Self::HostnameMismatch),
            CertificateErrorKind::SelfSigned => Some(Self::SelfSigned),
            _ => None,
        }
    }
}

impl fmt::Display for IssueCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct IssuePattern {
    category: IssueCategory,
    regex: Regex,
    lines: &'static [Line],
}

const UNKNOWN_AUTHORITY_LINES: &[Line] = &[
    warning("Do not disable certificate verification to work around an untrusted CA in production"),
    command("Inspect the presented chain: openssl s_client -connect {name}:{port} -showcerts </dev/null"),
    command("Add the registry CA to the system trust store: cp ca.crt /usr/local/share/ca-certificates/{host_file}.crt && update-ca-certificates"),
    advice("Ask the registry operator which CA issued its certificate"),
];

const EXPIRED_LINES: &[Line] = &[
    warning("Expired certificates must be renewed; bypassing expiry checks hides real compromise"),
    command("Check the validity window: openssl s_client -connect {name}:{port} </dev/null 2>/dev/null | openssl x509 -noout -dates"),
    command("Check the local clock: timedatectl status"),
    advice("Renew the registry certificate"),
];

const HOSTNAME_LINES: &[Line] = &[
    command("List the names the certificate covers: openssl s_client -connect {name}:{port} </dev/null 2>/dev/null | openssl x509 -noout -ext subjectAltName"),
    advice("Connect using a hostname listed in the certificate's subject alternative names"),
    advice("Reissue the certificate with {name} in its subject alternative names"),
];

const SELF_SIGNED_LINES: &[Line] = &[
    warning("Trust a self-signed certificate only for this registry, never system-wide"),
    command("Export the certificate: openssl s_client -connect {name}:{port} -showcerts </dev/null 2>/dev/null | openssl x509 > {host_file}.crt"),
    command("Trust it for this registry only: mkdir -p /etc/docker/certs.d/{host} && cp {host_file}.crt /etc/docker/certs.d/{host}/ca.crt"),
    advice("Replace the self-signed certificate with one issued by a trusted CA"),
];

const TLS_VERSION_LINES: &[Line] = &[
    warning("Older TLS versions have known weaknesses; upgrade the registry rather than the client"),
    command("Check the versions the registry supports: openssl s_client -connect {name}:{port} -tls1_2 </dev/null"),
    advice("Enable TLS 1.2 or newer on the registry"),
];

const NETWORK_LINES: &[Line] = &[
    command("Check reachability: curl -v https://{host}/v2/"),
    advice("Verify the registry address and port"),
    advice("Check proxy settings (HTTPS_PROXY, NO_PROXY)"),
];

const PATTERN_TABLE: &[(IssueCategory, &str, &[Line])] = &[
    (
        IssueCategory::UnknownAuthority,
        r"(?i)unknown (authority|issuer|ca)|unknownissuer|unable to get local issuer|not trusted",
        UNKNOWN_AUTHORITY_LINES,
    ),
    (
        IssueCategory::Expired,
        r"(?i)expired|not valid after|not yet valid",
        EXPIRED_LINES,
    ),
    (
        IssueCategory::HostnameMismatch,
        r"(?i)hostname|not valid for|notvalidforname|does(n't| not) match",
        HOSTNAME_LINES,
    ),
    (IssueCategory::SelfSigned, r"(?i)self[- ]signed", SELF_SIGNED_LINES),
    (
        IssueCategory::TlsVersion,
        r"(?i)protocol version|tls version|unsupported protocol|handshake failure",
        TLS_VERSION_LINES,
    ),
    (
        IssueCategory::NetworkUnreachable,
        r"(?i)connection refused|no route to host|network is unreachable|timed out|no such host|dns error",
        NETWORK_LINES,
    ),
];

static PATTERNS: Lazy<Vec<IssuePattern>> = Lazy::new(|| {
    PATTERN_TABLE
        .iter()
        .filter_map(|(category, pattern, lines)| match Regex::new(pattern) {
            Ok(regex) => Some(IssuePattern {
                category: *category,
                regex,
                lines: *lines,
            }),
            Err(e) => {
                error!("Invalid recommendation pattern for {}: {}", category, e);
                None
            }
        })
        .collect()
});

/// A public registry with known characteristics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryProfile {
    /// Display name.
    pub name: &'static str,
    /// Host suffixes that identify it.
    pub suffixes: &'static [&'static str],
    /// Registry-specific advice.
    pub advice: &'static str,
}

/// Known public registries.
pub const REGISTRY_PROFILES: &[RegistryProfile] = &[
    RegistryProfile {
        name: "Docker Hub",
        suffixes: &["docker.io"],
        advice: "Check https://www.dockerstatus.com for ongoing incidents",
    },
    RegistryProfile {
        name: "GitHub Container Registry",
        suffixes: &["ghcr.io"],
        advice: "Check https://www.githubstatus.com for ongoing incidents",
    },
    RegistryProfile {
        name: "Google Container Registry",
        suffixes: &["gcr.io", "pkg.dev"],
        advice: "Check https://status.cloud.google.com for ongoing incidents",
    },
    RegistryProfile {
        name: "Quay",
        suffixes: &["quay.io"],
        advice: "Check https://status.quay.io for ongoing incidents",
    },
    RegistryProfile {
        name: "Amazon ECR",
        suffixes: &["amazonaws.com"],
        advice: "Refresh credentials with aws ecr get-login-password and check the region endpoint",
    },
    RegistryProfile {
        name: "Azure Container Registry",
        suffixes: &["azurecr.io"],
        advice: "Run az acr check-health --name <registry> to diagnose connectivity",
    },
];

/// What kind of registry a host appears to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostProfile {
    /// A local or development-cluster registry.
    LocalCluster,
    /// A well-known public registry.
    Public(&'static RegistryProfile),
    /// Anything else.
    SelfHosted,
}

impl HostProfile {
    /// Profiles `hostname`.
    #[must_use]
    pub fn of(hostname: &str) -> Self {
        let host = hostname.trim().to_ascii_lowercase();
        let name = host_without_port(&host);
        let port = host
            .strip_prefix(name)
            .and_then(|rest| rest.strip_prefix(':'))
            .unwrap_or("");

        let is_private_ip = match name.parse::<IpAddr>() {
            Ok(IpAddr::V4(ip)) => ip.is_loopback() || ip.is_private() || ip.is_link_local(),
            Ok(IpAddr::V6(ip)) => ip.is_loopback(),
            Err(_) => false,
        };
        let first_label = name.split('.').next().unwrap_or_default();
        let local = is_private_ip
            || name == "localhost"
            || name == "host.docker.internal"
            || first_label == "kind"
            || first_label.starts_with("kind-")
            || name.ends_with(".local")
            || name.ends_with(".localhost")
            || (matches!(port, "5000" | "5001") && !name.contains('.'));
        if local {
            return Self::LocalCluster;
        }

        REGISTRY_PROFILES
            .iter()
            .find(|p| {
                p.suffixes
                    .iter()
                    .any(|s| name == *s || name.ends_with(&format!(".{s}")))
            })
            .map_or(Self::SelfHosted, Self::Public)
    }

    /// Short label.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::LocalCluster => "local cluster registry",
            Self::Public(profile) => profile.name,
            Self::SelfHosted => "self-hosted registry",
        }
    }
}

const LOCAL_LINES: &[Line] = &[
    command("Extract the cluster CA from a kind node: docker exec kind-control-plane cat /etc/kubernetes/pki/ca.crt > kind-ca.crt"),
    command("Or copy it out of the node: docker cp kind-control-plane:/etc/kubernetes/pki/ca.crt kind-ca.crt"),
    command("Or read it from a cluster secret: kubectl get secret -n kube-system -o jsonpath='{.items[0].data.ca\\.crt}' | base64 -d > cluster-ca.crt"),
    command("Trust the extracted CA for this registry only: mkdir -p /etc/docker/certs.d/{host} && cp kind-ca.crt /etc/docker/certs.d/{host}/ca.crt"),
    advice("Local development registries may be marked insecure in the container runtime, for development only"),
];

const PUBLIC_LINES: &[Line] = &[
    warning("Public registries use publicly trusted certificates; a failure usually means TLS interception or an outdated trust store"),
    command("Update the system CA bundle: apt-get install --reinstall ca-certificates (or your platform's equivalent)"),
    advice("If a corporate proxy intercepts TLS, install the proxy's CA certificate"),
];

const SELF_HOSTED_LINES: &[Line] = &[
    command("Trust the registry CA for this registry only: mkdir -p /etc/docker/certs.d/{host} && cp ca.crt /etc/docker/certs.d/{host}/ca.crt"),
    advice("Obtain the CA certificate from the registry administrator"),
    advice("Consider certificates from a public CA (for example Let's Encrypt) for self-hosted registries"),
];

const CLOSING: Line =
    advice("Review the security audit log before accepting any certificate bypass");

const COMPLIANCE_FRAMEWORKS: &[&str] = &[
    "PCI DSS 4.2.1 (strong cryptography for data in transit)",
    "SOC 2 CC6.7 (transmission of data)",
    "HIPAA 164.312(e)(1) (transmission security)",
    "ISO/IEC 27001 A.8.24 (use of cryptography)",
];

/// Detailed, structured remediation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetailedRecommendation {
    /// Issue category.
    pub category: IssueCategory,
    /// Classified kind.
    pub kind: CertificateErrorKind,
    /// Severity of the underlying failure.
    pub severity: SecurityRiskLevel,
    /// What goes wrong if ignored.
    pub impact: String,
    /// Warnings and commands.
    pub solutions: Vec<String>,
    /// Follow-up advice.
    pub next_steps: Vec<String>,
    /// Rough time to fix.
    pub time_estimate: String,
    /// Host profile label.
    pub host_profile: String,
}

/// Risk assessment for accepting a failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityAssessment {
    /// Classified kind.
    pub kind: CertificateErrorKind,
    /// Risk level of accepting the certificate.
    pub risk: SecurityRiskLevel,
    /// Risk score, 0 to 100.
    pub score: u8,
    /// What goes wrong if accepted.
    pub impact: String,
    /// Ways to reduce the risk.
    pub mitigations: Vec<String>,
    /// Control frameworks that a bypass would likely violate.
    pub compliance: Vec<String>,
}

const fn impact_of(kind: CertificateErrorKind) -> &'static str {
    match kind {
        CertificateErrorKind::UntrustedCA => {
            "The registry's identity cannot be verified; a man-in-the-middle could serve altered images"
        }
        CertificateErrorKind::Expired => {
            "The certificate is no longer maintained and may belong to a compromised or abandoned key"
        }
        CertificateErrorKind::NotYetValid => {
            "The certificate is not active yet; usually a clock problem, occasionally a staging mistake"
        }
        CertificateErrorKind::HostnameMismatch => {
            "The certificate belongs to a different host; traffic may be going to the wrong server"
        }
        CertificateErrorKind::SelfSigned => {
            "Nothing vouches for the certificate; any party can generate an identical-looking one"
        }
        CertificateErrorKind::Revoked => {
            "The issuer has withdrawn the certificate; its key should be treated as compromised"
        }
        CertificateErrorKind::ChainIncomplete => {
            "The server does not send its full chain; clients with different trust stores will fail"
        }
        CertificateErrorKind::KeyUsageInvalid => {
            "The certificate was not issued for TLS server authentication"
        }
        CertificateErrorKind::BadCertificate => {
            "The certificate is malformed and cannot be trusted"
        }
        CertificateErrorKind::Unknown => "The failure could not be classified; treat it as untrusted",
    }
}

/// Produces remediation advice for certificate failures.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecommendationEngine;

struct Analysis {
    kind: CertificateErrorKind,
    categories: Vec<IssueCategory>,
    profile: HostProfile,
    lines: Vec<Line>,
}

fn render(template: &str, hostname: &str) -> String {
    let host = hostname.trim().to_ascii_lowercase();
    let name = host_without_port(&host).to_string();
    let port = host
        .strip_prefix(name.as_str())
        .and_then(|rest| rest.strip_prefix(':'))
        .filter(|p| !p.is_empty())
        .unwrap_or("443")
        .to_string();
    let host_file = host.replace([':', '/'], "_");
    template
        .replace("{host_file}", &host_file)
        .replace("{host}", &host)
        .replace("{name}", &name)
        .replace("{port}", &port)
}

impl RecommendationEngine {
    /// Creates an engine.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn analyze(hostname: &str, error_text: &str) -> Analysis {
        let kind = classify_text(error_text);
        let mut categories: Vec<IssueCategory> = PATTERNS
            .iter()
            .filter(|p| p.regex.is_match(error_text))
            .map(|p| p.category)
            .collect();
        if let Some(category) = IssueCategory::from_kind(kind) {
            if !categories.contains(&category) {
                categories.push(category);
            }
        }

        let mut lines: Vec<Line> = categories
            .iter()
            .filter_map(|c| PATTERNS.iter().find(|p| p.category == *c))
            .flat_map(|p| p.lines.iter().copied())
            .collect();

        let profile = HostProfile::of(hostname);
        match profile {
            HostProfile::LocalCluster => lines.extend_from_slice(LOCAL_LINES),
            HostProfile::Public(registry) => {
                lines.extend_from_slice(PUBLIC_LINES);
                lines.push(advice(registry.advice));
            }
            HostProfile::SelfHosted => lines.extend_from_slice(SELF_HOSTED_LINES),
        }
        lines.push(CLOSING);

        Analysis {
            kind,
            categories,
            profile,
            lines,
        }
    }

    fn finish(hostname: &str, lines: &[Line]) -> Vec<(Tier, String)> {
        let mut seen = HashSet::new();
        let mut out: Vec<(Tier, String)> = lines
            .iter()
            .map(|l| (l.tier, render(l.text, hostname)))
            .filter(|(_, text)| seen.insert(text.clone()))
            .collect();
        out.sort_by_key(|(tier, _)| *tier);
        out
    }

    /// Ordered, deduplicated recommendations for an error seen on `hostname`.
    #[must_use]
    pub fn recommend(&self, hostname: &str, error_text: &str) -> Vec<String> {
        let analysis = Self::analyze(hostname, error_text);
        Self::finish(hostname, &analysis.lines)
            .into_iter()
            .map(|(_, text)| text)
            .collect()
    }

    /// Structured recommendation.
    #[must_use]
    pub fn recommend_detailed(&self, hostname: &str, error_text: &str) -> DetailedRecommendation {
        let analysis = Self::analyze(hostname, error_text);
        let category = analysis
            .categories
            .first()
            .copied()
            .unwrap_or(IssueCategory::General);
        let (solutions, next_steps): (Vec<_>, Vec<_>) = Self::finish(hostname, &analysis.lines)
            .into_iter()
            .partition(|(tier, _)| *tier != Tier::Advice);

        DetailedRecommendation {
            category,
            kind: analysis.kind,
            severity: SecurityRiskLevel::from_score(analysis.kind.base_risk_score()),
            impact: impact_of(analysis.kind).to_string(),
            solutions: solutions.into_iter().map(|(_, t)| t).collect(),
            next_steps: next_steps.into_iter().map(|(_, t)| t).collect(),
            time_estimate: category.time_estimate().to_string(),
            host_profile: analysis.profile.label().to_string(),
        }
    }

    /// The single most direct fix: the first command, else the first line.
    #[must_use]
    pub fn quick_fix(&self, hostname: &str, error_text: &str) -> String {
        let analysis = Self::analyze(hostname, error_text);
        let finished = Self::finish(hostname, &analysis.lines);
        finished
            .iter()
            .find(|(tier, _)| *tier == Tier::Command)
            .or_else(|| finished.first())
            .map(|(_, text)| text.clone())
            .unwrap_or_default()
    }

    /// Diagnostic commands for `hostname`.
    #[must_use]
    pub fn diagnostics(&self, hostname: &str) -> String {
        let profile = HostProfile::of(hostname);
        let mut out = String::new();
        let _ = writeln!(out, "Diagnostics for {hostname} ({})", profile.label());
        for template in [
            "openssl s_client -connect {name}:{port} -servername {name} -showcerts </dev/null",
            "openssl s_client -connect {name}:{port} </dev/null 2>/dev/null | openssl x509 -noout -subject -issuer -dates -ext subjectAltName",
            "curl -v https://{host}/v2/",
        ] {
            let _ = writeln!(out, "  $ {}", render(template, hostname));
        }
        if let HostProfile::Public(registry) = profile {
            let _ = writeln!(out, "  {}", registry.advice);
        }
        out.push_str("Known public registries:\n");
        for registry in REGISTRY_PROFILES {
            let _ = writeln!(out, "  {}: {}", registry.name, registry.suffixes.join(", "));
        }
        out
    }

    /// Risk of accepting a failure of `kind`.
    #[must_use]
    pub fn security_assessment(&self, kind: CertificateErrorKind) -> SecurityAssessment {
        let score = kind.base_risk_score().saturating_mul(10).min(100);
        let compliance = if score >= 50 {
            COMPLIANCE_FRAMEWORKS.iter().map(|s| (*s).to_string()).collect()
        } else {
            Vec::new()
        };
        SecurityAssessment {
            kind,
            risk: SecurityRiskLevel::from_score(kind.base_risk_score()),
            score,
            impact: impact_of(kind).to_string(),
            mitigations: kind
                .suggested_actions()
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
            compliance,
        }
    }

    /// Numbered list for display.
    #[must_use]
    pub fn format(recommendations: &[String]) -> String {
        let mut out = String::new();
        for (i, rec) in recommendations.iter().enumerate() {
            let _ = writeln!(out, "{:>2}. {rec}", i + 1);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_patterns_compile() {
        assert_eq!(PATTERNS.len(), PATTERN_TABLE.len());
    }

    #[test]
    fn test_host_profiles() {
        assert_eq!(HostProfile::of("kind-registry:5000"), HostProfile::LocalCluster);
        assert_eq!(HostProfile::of("localhost"), HostProfile::LocalCluster);
        assert_eq!(HostProfile::of("10.0.0.5:443"), HostProfile::LocalCluster);
        assert_eq!(HostProfile::of("registry:5000"), HostProfile::LocalCluster);
        assert_eq!(HostProfile::of("registry.dev.local"), HostProfile::LocalCluster);
        assert_eq!(HostProfile::of("ghcr.io").label(), "GitHub Container Registry");
        assert_eq!(
            HostProfile::of("123.dkr.ecr.us-east-1.amazonaws.com").label(),
            "Amazon ECR"
        );
        assert_eq!(HostProfile::of("kind-control-plane:30500"), HostProfile::LocalCluster);
        assert_eq!(HostProfile::of("kind.example.com"), HostProfile::LocalCluster);
        assert_eq!(HostProfile::of("kindred.example.com"), HostProfile::SelfHosted);
        assert_eq!(HostProfile::of("kindness-registry.io"), HostProfile::SelfHosted);
        assert_eq!(HostProfile::of("notghcr.io"), HostProfile::SelfHosted);
        assert_eq!(HostProfile::of("registry.corp.example.com"), HostProfile::SelfHosted);
    }

    #[test]
    fn test_local_cluster_recommendations() {
        let recs = RecommendationEngine::new().recommend(
            "kind-registry:5000",
            "x509: certificate signed by unknown authority",
        );
        assert!(recs.iter().any(|r| r.contains("kind-control-plane")));
        assert!(recs.iter().any(|r| r.contains("/etc/docker/certs.d/kind-registry:5000/ca.crt")));
        assert!(recs.iter().any(|r| r.contains("-connect kind-registry:5000")));
    }

    #[test]
    fn test_ordering_and_dedup() {
        let recs = RecommendationEngine::new().recommend(
            "registry.example.com",
            "x509: certificate signed by unknown authority (self-signed)",
        );
        let first_command = recs.iter().position(|r| r.contains(": ")).unwrap();
        assert!(recs[0].contains("Do not disable") || recs[0].contains("self-signed"));
        assert!(first_command >= 2);
        assert_eq!(
            recs.last().map(String::as_str),
            Some("Review the security audit log before accepting any certificate bypass")
        );

        let unique: HashSet<_> = recs.iter().collect();
        assert_eq!(unique.len(), recs.len());
    }

    #[test]
    fn test_public_registry_advice() {
        let recs = RecommendationEngine::new()
            .recommend("ghcr.io", "x509: certificate signed by unknown authority");
        assert!(recs[0].starts_with("Do not disable") || recs[0].starts_with("Public registries"));
        assert!(recs.iter().any(|r| r.contains("githubstatus")));
    }

    #[test]
    fn test_kind_adds_category_when_text_is_terse() {
        let detailed = RecommendationEngine::new()
            .recommend_detailed("registry.example.com", "certificate has expired");
        assert_eq!(detailed.category, IssueCategory::Expired);
        assert_eq!(detailed.kind, CertificateErrorKind::Expired);
        assert_eq!(detailed.severity, SecurityRiskLevel::High);
        assert!(detailed.solutions.iter().any(|s| s.contains("-dates")));
        assert!(detailed.next_steps.iter().any(|s| s.contains("Renew")));
        assert_eq!(detailed.host_profile, "self-hosted registry");
    }

    #[test]
    fn test_network_error_is_general_kind() {
        let detailed = RecommendationEngine::new()
            .recommend_detailed("registry.example.com:8443", "dial tcp: connection refused");
        assert_eq!(detailed.category, IssueCategory::NetworkUnreachable);
        assert!(detailed
            .solutions
            .iter()
            .any(|s| s == "Check reachability: curl -v https://registry.example.com:8443/v2/"));
    }

    #[test]
    fn test_quick_fix_prefers_command() {
        let fix = RecommendationEngine::new()
            .quick_fix("registry.example.com", "certificate is not valid for name");
        assert!(fix.contains("subjectAltName"));
        assert!(fix.contains(":443"));
    }

    #[test]
    fn test_security_assessment() {
        let engine = RecommendationEngine::new();
        let revoked = engine.security_assessment(CertificateErrorKind::Revoked);
        assert_eq!(revoked.score, 100);
        assert_eq!(revoked.risk, SecurityRiskLevel::High);
        assert_eq!(revoked.compliance.len(), COMPLIANCE_FRAMEWORKS.len());

        let not_yet = engine.security_assessment(CertificateErrorKind::NotYetValid);
        assert_eq!(not_yet.score, 20);
        assert!(not_yet.compliance.is_empty());
        assert_eq!(not_yet.mitigations.len(), 3);
    }

    #[test]
    fn test_diagnostics_and_format() {
        let engine = RecommendationEngine::new();
        let diag = engine.diagnostics("quay.io");
        assert!(diag.contains("Diagnostics for quay.io (Quay)"));
        assert!(diag.contains("-servername quay.io"));
        assert!(diag.contains("status.quay.io"));

        let text = RecommendationEngine::format(&["a".to_string(), "b".to_string()]);
        assert_eq!(text, " 1. a\n 2. b\n");
    }
}
