//! Error types for the enrollment agent

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Main error type for the enrollment agent
#[derive(Error, Debug)]
pub enum EnrollError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Transient network error: {0}")]
    TransientNetwork(String),

    #[error("Authentication error: {0}")]
    AuthError(String),

    #[error("Certificate error: {0}")]
    Certificate(#[from] CertificateError),

    #[error("Cleanup error ({system}): {message}")]
    CleanupError { system: String, message: String },

    #[error("Cleanup query error ({system}): {message}")]
    CleanupQueryError { system: String, message: String },

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Phase {phase} failed: {message}")]
    PhaseFailed { phase: String, message: String },

    /// Opaque failure reported by a remote collaborator, classified by its text.
    #[error("{0}")]
    Remote(String),

    #[error("{operation} failed after {attempts} attempt(s) (retryable: {retryable}): {source}")]
    RetryExhausted {
        operation: String,
        attempts: u32,
        retryable: bool,
        #[source]
        source: Box<EnrollError>,
    },
}

/// Certificate lifecycle failures. All of them are fatal to the workflow.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CertificateError {
    #[error("secret not found: {0}")]
    SecretNotFound(String),

    #[error("decode error: {0}")]
    DecodeError(String),

    #[error("expired (notAfter {not_after})")]
    Expired { not_after: DateTime<Utc> },

    #[error("not yet valid (notBefore {not_before})")]
    NotYetValid { not_before: DateTime<Utc> },

    #[error("no private key")]
    NoPrivateKey,
}

/// Closed set of error kinds consumed by the retry and cleanup layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    TransientNetwork,
    Authentication,
    Certificate,
    Cleanup,
    CleanupQuery,
    Storage,
    Phase,
    Remote,
}

impl EnrollError {
    /// Classify this error into its taxonomy kind.
    ///
    /// An exhausted retry of a retryable failure is a transient network error
    /// that became fatal; otherwise the wrapped error keeps its own kind.
    pub fn kind(&self) -> ErrorKind {
        match self {
            EnrollError::IoError(_) | EnrollError::JsonError(_) | EnrollError::StorageError(_) => {
                ErrorKind::Storage
            }
            EnrollError::ConfigError(_) => ErrorKind::Configuration,
            EnrollError::TransientNetwork(_) => ErrorKind::TransientNetwork,
            EnrollError::AuthError(_) => ErrorKind::Authentication,
            EnrollError::Certificate(_) => ErrorKind::Certificate,
            EnrollError::CleanupError { .. } => ErrorKind::Cleanup,
            EnrollError::CleanupQueryError { .. } => ErrorKind::CleanupQuery,
            EnrollError::PhaseFailed { .. } => ErrorKind::Phase,
            EnrollError::Remote(_) => ErrorKind::Remote,
            EnrollError::RetryExhausted {
                retryable, source, ..
            } => {
                if *retryable {
                    ErrorKind::TransientNetwork
                } else {
                    source.kind()
                }
            }
        }
    }

    /// Whether the error must halt the workflow.
    pub fn is_fatal(&self) -> bool {
        self.kind() != ErrorKind::Cleanup
    }

    /// The innermost error, looking through retry annotations.
    pub fn root(&self) -> &EnrollError {
        match self {
            EnrollError::RetryExhausted { source, .. } => source.root(),
            other => other,
        }
    }

    /// Number of attempts recorded by the retry executor, if any.
    pub fn attempts(&self) -> Option<u32> {
        match self {
            EnrollError::RetryExhausted { attempts, .. } => Some(*attempts),
            _ => None,
        }
    }

    /// The certificate failure carried by this error, if any.
    pub fn certificate_error(&self) -> Option<&CertificateError> {
        match self.root() {
            EnrollError::Certificate(e) => Some(e),
            _ => None,
        }
    }
}
