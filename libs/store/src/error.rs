//! Error types for store operations.

use std::io;
use std::path::PathBuf;

use onmetal_oci::{Digest, ManifestError};
use thiserror::Error;

/// Errors from store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable at {}: {reason}", .path.display())]
    Unavailable { path: PathBuf, reason: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("ambiguous {query}: matches {}", display_digests(.candidates))]
    AmbiguousMatch {
        query: String,
        candidates: Vec<Digest>,
    },

    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: Digest, actual: Digest },

    #[error("invalid index key '{key}' for descriptor {digest}")]
    InvalidKey { key: String, digest: Digest },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("manifest error: {0}")]
    Manifest(#[from] ManifestError),
}

impl StoreError {
    pub(crate) fn unavailable(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Unavailable {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Returns true if nothing matched the query.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

fn display_digests(digests: &[Digest]) -> String {
    digests
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
