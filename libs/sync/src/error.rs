//! Error types for resolution and sync.

use onmetal_oci::{Digest, ManifestError};
use onmetal_registry::RegistryError;
use onmetal_store::StoreError;
use thiserror::Error;

/// Errors from reference resolution.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("unresolvable reference '{0}'")]
    UnresolvableReference(String),

    #[error("ambiguous reference '{input}': matches {}", display_digests(.candidates))]
    AmbiguousReference {
        input: String,
        candidates: Vec<Digest>,
    },

    #[error(transparent)]
    Store(StoreError),
}

/// Errors from pull and push.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("incomplete local content for {digest}: missing {}", display_digests(.missing))]
    IncompleteLocalContent { digest: Digest, missing: Vec<Digest> },

    #[error("'{0}' does not name a remote repository")]
    RemoteReferenceRequired(String),

    #[error("transfer cancelled")]
    Cancelled,

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("manifest error: {0}")]
    Manifest(#[from] ManifestError),
}

/// Errors building a [`Config`](crate::Config).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no home directory; set {0} to choose a store path")]
    NoStorePath(&'static str),

    #[error("invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },
}

fn display_digests(digests: &[Digest]) -> String {
    digests
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
