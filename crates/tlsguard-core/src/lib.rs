//! # tlsguard core
//!
//! Shared types for deciding what to do when a registry's TLS certificate
//! fails validation:
//!
//! - [`CertificateErrorKind`] and [`SecurityRiskLevel`] - the closed error
//!   taxonomy and the ordinal risk scale
//! - [`Certificate`] - parsed view of an X.509 certificate
//! - [`ErrorClassifier`] - maps raw failures onto a kind
//! - [`ChainValidator`] - independent re-validation and path building
//! - [`TransportConfig`] - how the caller should build its TLS transport
//! - [`Clock`] - injectable wall-clock time
//!
//! ## Example
//!
//! ```rust
//! use tlsguard_core::{CertificateErrorKind, ErrorClassifier};
//!
//! let classifier = ErrorClassifier::new();
//! let classified = classifier.classify(
//!     &"x509: certificate signed by unknown authority".into(),
//!     "registry.example.com",
//! );
//! assert_eq!(classified.kind, CertificateErrorKind::UntrustedCA);
//! assert!(classified.recoverable);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod certificate;
pub mod chain;
pub mod classifier;
pub mod clock;
pub mod error;
pub mod kind;
pub mod transport;


pub use certificate::{host_without_port, Certificate};
pub use chain::{ChainInfo, ChainProblem, ChainValidator, RootStore};
pub use classifier::{
    classify_kind, classify_text, CertificateFailure, ClassifiedError, ErrorClassifier,
    FailurePayload, InvalidReason,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{Error, Result};
pub use kind::{CertificateErrorKind, SecurityRiskLevel};
pub use transport::{RootSelection, TlsVersion, TransportConfig};
