//! Engine configuration and environment overrides.
//!
//! The process environment is read once, into an [`EnvOverrides`] snapshot
//! and an [`EngineConfig`]; nothing else in the engine reads it.

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tlsguard_audit::{
    AuditLogger, EventSeverity, FileBackendConfig, RotatingFileBackend, TracingBackend,
    DEFAULT_TAIL_CAPACITY,
};
use tlsguard_core::host_without_port;

use crate::error::EngineError;
use crate::insecure::InsecureConfig;

/// Disables verification for every host.
pub const SKIP_TLS_VERIFY_VAR: &str = "TLSGUARD_SKIP_TLS_VERIFY";

/// Treats every registry as insecure.
pub const INSECURE_REGISTRIES_VAR: &str = "TLSGUARD_INSECURE_REGISTRIES";

/// Prefix for per-host insecure flags.
pub const INSECURE_HOST_PREFIX: &str = "TLSGUARD_INSECURE_";

/// Overrides the audit log directory.
pub const SECURITY_LOG_DIR_VAR: &str = "TLSGUARD_SECURITY_LOG_DIR";

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Environment variable suffix for a host: uppercase, with `:` `/` `.` `-`
/// replaced by `_`.
#[must_use]
pub fn host_variable_suffix(hostname: &str) -> String {
    hostname
        .trim()
        .to_ascii_uppercase()
        .replace([':', '/', '.', '-'], "_")
}

/// Snapshot of insecure-mode environment overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvOverrides {
    global: Option<&'static str>,
    hosts: BTreeSet<String>,
}

impl EnvOverrides {
    /// Reads the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_vars(std::env::vars())
    }

    /// Builds a snapshot from `(name, value)` pairs.
    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut overrides = Self::default();
        for (name, value) in vars {
            let name = name.as_ref();
            if !is_truthy(value.as_ref()) {
                continue;
            }
            if name == SKIP_TLS_VERIFY_VAR {
                overrides.global = Some(SKIP_TLS_VERIFY_VAR);
            } else if name == INSECURE_REGISTRIES_VAR {
                overrides.global.get_or_insert(INSECURE_REGISTRIES_VAR);
            } else if let Some(suffix) = name.strip_prefix(INSECURE_HOST_PREFIX) {
                if !suffix.is_empty() {
                    overrides.hosts.insert(suffix.to_string());
                }
            }
        }
        overrides
    }

    /// Allows every host.
    #[must_use]
    pub const fn global() -> Self {
        Self {
            global: Some(SKIP_TLS_VERIFY_VAR),
            hosts: BTreeSet::new(),
        }
    }

    /// Allows one more host.
    #[must_use]
    pub fn with_host(mut self, hostname: &str) -> Self {
        self.hosts.insert(host_variable_suffix(hostname));
        self
    }

    /// The variable that allows `hostname`, if any. The exact host is tried
    /// before the host without its port.
    #[must_use]
    pub fn source_for(&self, hostname: &str) -> Option<String> {
        if let Some(var) = self.global {
            return Some(var.to_string());
        }
        [hostname, host_without_port(hostname)]
            .iter()
            .map(|h| host_variable_suffix(h))
            .find(|suffix| self.hosts.contains(suffix))
            .map(|suffix| format!("{INSECURE_HOST_PREFIX}{suffix}"))
    }

    /// Whether `hostname` is allowed.
    #[must_use]
    pub fn allows(&self, hostname: &str) -> bool {
        self.source_for(hostname).is_some()
    }

    /// Whether every host is allowed.
    #[must_use]
    pub const fn is_global(&self) -> bool {
        self.global.is_some()
    }

    /// Per-host variable suffixes.
    #[must_use]
    pub const fn hosts(&self) -> &BTreeSet<String> {
        &self.hosts
    }
}

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Directory for rotating audit files.
    pub audit_dir: PathBuf,

    /// Records below this severity are dropped.
    pub min_audit_severity: EventSeverity,

    /// Records kept in memory for summaries.
    pub audit_tail_capacity: usize,

    /// Identity attached to audit records.
    pub actor: Option<String>,

    /// Whether escalation may end in insecure mode.
    pub allow_insecure_mode: bool,

    /// Bound on a single connection probe.
    pub probe_timeout: Duration,

    /// Insecure-mode confirmation behavior.
    pub insecure: InsecureConfig,

    /// Environment overrides.
    pub overrides: EnvOverrides,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            audit_dir: FileBackendConfig::default_dir(),
            min_audit_severity: EventSeverity::Info,
            audit_tail_capacity: DEFAULT_TAIL_CAPACITY,
            actor: None,
            allow_insecure_mode: false,
            probe_timeout: Duration::from_secs(10),
            insecure: InsecureConfig::default(),
            overrides: EnvOverrides::default(),
        }
    }
}

impl EngineConfig {
    /// Defaults with the process environment applied.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_vars(std::env::vars())
    }

    /// Defaults with `(name, value)` pairs applied.
    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars: HashMap<String, String> = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();

        let mut config = Self {
            overrides: EnvOverrides::from_vars(&vars),
            ..Self::default()
        };
        if let Some(dir) = vars.get(SECURITY_LOG_DIR_VAR).filter(|d| !d.trim().is_empty()) {
            config.audit_dir = PathBuf::from(dir);
        }
        config.actor = vars
            .get("USER")
            .or_else(|| vars.get("USERNAME"))
            .filter(|u| !u.is_empty())
            .cloned();
        config
    }

    /// Sets the audit directory.
    #[must_use]
    pub fn with_audit_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.audit_dir = dir.into();
        self
    }

    /// Allows escalation to end in insecure mode.
    #[must_use]
    pub const fn with_insecure_mode_allowed(mut self, allowed: bool) -> Self {
        self.allow_insecure_mode = allowed;
        self
    }

    /// Sets the probe timeout.
    #[must_use]
    pub const fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Sets the insecure-mode configuration.
    #[must_use]
    pub fn with_insecure_config(mut self, insecure: InsecureConfig) -> Self {
        self.insecure = insecure;
        self
    }

    /// Sets the environment overrides.
    #[must_use]
    pub fn with_overrides(mut self, overrides: EnvOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    /// Checks the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidConfig`] describing the first problem.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.probe_timeout.is_zero() {
            return Err(EngineError::invalid_config("probe timeout must be positive"));
        }
        if self.audit_dir.as_os_str().is_empty() {
            return Err(EngineError::invalid_config("audit directory must not be empty"));
        }
        self.insecure.validate()
    }

    /// Builds the audit logger: rotating files in `audit_dir` plus tracing.
    #[must_use]
    pub fn audit_logger(&self) -> AuditLogger {
        let files = RotatingFileBackend::new(FileBackendConfig::new(&self.audit_dir));
        let mut builder = AuditLogger::builder()
            .with_backend(Arc::new(files))
            .with_backend(Arc::new(TracingBackend::new()))
            .min_severity(self.min_audit_severity)
            .tail_capacity(self.audit_tail_capacity);
        if let Some(actor) = &self.actor {
            builder = builder.actor(actor.clone());
        }
        builder.build()
    }
}
