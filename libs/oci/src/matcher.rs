//! Descriptor matchers used to search an index.

use std::fmt;

use crate::descriptor::Descriptor;
use crate::digest::{Algorithm, Digest};

/// A predicate over descriptors.
pub trait DescriptorMatcher: Send + Sync {
    fn matches(&self, descriptor: &Descriptor) -> bool;

    /// Human readable form used in error messages.
    fn describe(&self) -> String;
}

/// The matchers the index can be searched with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Matcher {
    /// The encoded digest (without `algorithm:`) starts with the prefix.
    ///
    /// A prefix that itself starts with a known `algorithm:` only matches
    /// digests of that algorithm.
    EncodedDigestPrefix(String),
    /// Exact digest.
    Digest(Digest),
    /// Exact media type.
    MediaType(String),
    /// Every inner matcher matches.
    All(Vec<Matcher>),
}

impl Matcher {
    pub fn encoded_digest_prefix(prefix: impl Into<String>) -> Self {
        Self::EncodedDigestPrefix(prefix.into())
    }

    pub fn media_type(media_type: impl Into<String>) -> Self {
        Self::MediaType(media_type.into())
    }
}

impl DescriptorMatcher for Matcher {
    fn matches(&self, descriptor: &Descriptor) -> bool {
        match self {
            Self::EncodedDigestPrefix(prefix) => prefix_matches(prefix, &descriptor.digest),
            Self::Digest(digest) => descriptor.digest == *digest,
            Self::MediaType(media_type) => descriptor.media_type == *media_type,
            Self::All(matchers) => matchers.iter().all(|m| m.matches(descriptor)),
        }
    }

    fn describe(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EncodedDigestPrefix(prefix) => write!(f, "digest prefix '{prefix}'"),
            Self::Digest(digest) => write!(f, "digest {digest}"),
            Self::MediaType(media_type) => write!(f, "media type {media_type}"),
            Self::All(matchers) => {
                let parts: Vec<String> = matchers.iter().map(ToString::to_string).collect();
                f.write_str(&parts.join(" and "))
            }
        }
    }
}

fn prefix_matches(prefix: &str, digest: &Digest) -> bool {
    if let Some((algorithm, rest)) = prefix.split_once(':') {
        if let Some(algorithm) = Algorithm::parse(algorithm) {
            return algorithm == digest.algorithm() && digest.encoded().starts_with(rest);
        }
    }
    digest.encoded().starts_with(prefix)
}
