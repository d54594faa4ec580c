//! Error types for registry access.

use std::path::PathBuf;

use onmetal_oci::Digest;
use thiserror::Error;

/// Errors from registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("not found in registry: {0}")]
    NotFound(String),

    #[error("authentication required for {0}")]
    AuthRequired(String),

    #[error("access denied to {0}")]
    Denied(String),

    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: Digest, actual: Digest },

    #[error("unexpected status {status} for {resource}")]
    UnexpectedStatus { status: u16, resource: String },

    #[error("invalid registry response for {resource}: {reason}")]
    InvalidResponse { resource: String, reason: String },

    #[error("token request to {realm} failed: {reason}")]
    Token { realm: String, reason: String },
}

impl RegistryError {
    pub(crate) fn invalid_response(resource: impl Into<String>, reason: impl ToString) -> Self {
        Self::InvalidResponse {
            resource: resource.into(),
            reason: reason.to_string(),
        }
    }

    /// Returns true if the registry reported the resource as missing.
    pub fn is_not_found(&self) -> bool {
        matches!(self, RegistryError::NotFound(_))
    }
}

/// A credential file that could not be used.
#[derive(Debug, Error)]
pub enum CredentialLoadError {
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid auth entry for {host} in {}: {reason}", .path.display())]
    InvalidEntry {
        path: PathBuf,
        host: String,
        reason: String,
    },
}
