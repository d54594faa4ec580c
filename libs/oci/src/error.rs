//! Error types for digest, reference and manifest parsing.

use thiserror::Error;

/// Errors that can occur when parsing a digest.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DigestError {
    /// The digest string is empty.
    #[error("digest cannot be empty")]
    Empty,

    /// The digest is missing the `algorithm:` separator.
    #[error("digest '{0}' is missing the ':' separator")]
    MissingSeparator(String),

    /// The algorithm is not one this store can verify.
    #[error("unsupported digest algorithm '{0}'")]
    UnsupportedAlgorithm(String),

    /// The encoded part has the wrong length for its algorithm.
    #[error("invalid {algorithm} digest length: expected {expected}, got {actual}")]
    InvalidLength {
        algorithm: &'static str,
        expected: usize,
        actual: usize,
    },

    /// The encoded part is not lowercase hex.
    #[error("invalid digest encoding '{0}': expected lowercase hex")]
    InvalidEncoding(String),
}

/// Errors that can occur when parsing a container reference.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReferenceError {
    /// The reference string is empty.
    #[error("reference cannot be empty")]
    Empty,

    /// The registry domain is malformed.
    #[error("invalid registry domain '{0}'")]
    InvalidDomain(String),

    /// A repository path component is malformed.
    #[error("invalid repository path '{0}'")]
    InvalidPath(String),

    /// The tag is malformed.
    #[error("invalid tag '{0}'")]
    InvalidTag(String),

    /// The embedded digest is malformed.
    #[error("invalid digest in reference '{reference}': {source}")]
    InvalidDigest {
        reference: String,
        #[source]
        source: DigestError,
    },

    /// The full name exceeds the 255 character limit.
    #[error("repository name '{name}' is longer than {max} characters")]
    NameTooLong { name: String, max: usize },
}

/// Errors that can occur when decoding manifests and indexes.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported manifest media type '{0}'")]
    UnsupportedMediaType(String),

    #[error("manifest has no {0} layer")]
    MissingLayer(&'static str),

    #[error("manifest has more than one {0} layer")]
    DuplicateLayer(&'static str),

    #[error("manifest config has media type '{0}', expected an onmetal image config")]
    NotAnOnmetalImage(String),
}

impl DigestError {
    /// Returns true if the algorithm part was readable but unsupported.
    pub fn is_unsupported_algorithm(&self) -> bool {
        matches!(self, DigestError::UnsupportedAlgorithm(_))
    }
}
