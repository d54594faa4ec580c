//! Resolution of user-supplied references.
//!
//! A user string is either a container reference (`name[:tag][@digest]`) or
//! a digest prefix. Reference syntax wins, except for tokens that are
//! syntactically digests: a bare lowercase hex string (`ab12`) or an
//! `algorithm:hex` pair (`sha256:ab12`). Those are always searched in the
//! index, otherwise `ab12` would read as `docker.io/library/ab12:latest`.

use onmetal_oci::{Algorithm, Descriptor, Matcher, Reference};
use onmetal_store::{Indexer, StoreError};
use tracing::debug;

use crate::error::ResolveError;

/// What a user string resolved to.
#[derive(Debug, Clone)]
pub enum Resolved {
    /// A well-formed reference. Nothing was looked up.
    Reference(Reference),
    /// The single indexed descriptor matching a digest prefix.
    Local(Descriptor),
}

/// Resolve a user string to a reference or a canonical digest string.
///
/// References are returned unchanged without consulting the index.
pub fn resolve(indexer: &Indexer, input: &str) -> Result<String, ResolveError> {
    match resolve_target(indexer, input)? {
        Resolved::Reference(_) => Ok(input.to_string()),
        Resolved::Local(descriptor) => Ok(descriptor.digest.to_string()),
    }
}

/// Like [`resolve`], but keep the parsed reference or matched descriptor.
pub fn resolve_target(indexer: &Indexer, input: &str) -> Result<Resolved, ResolveError> {
    let input_trimmed = input.trim();
    if input_trimmed.is_empty() {
        return Err(ResolveError::UnresolvableReference(input.to_string()));
    }

    if !is_digest_token(input_trimmed) {
        if let Ok(reference) = Reference::parse(input_trimmed) {
            return Ok(Resolved::Reference(reference));
        }
    }

    debug!(input = %input, "Resolving digest prefix");
    indexer
        .find(&Matcher::encoded_digest_prefix(input_trimmed))
        .map(Resolved::Local)
        .map_err(|e| lookup_error(input, e))
}

/// Resolve a user string to a descriptor in the local index.
///
/// Digest prefixes are searched; references are looked up by tag, both as
/// given and normalized (`alpine` is indexed as `docker.io/library/alpine:latest`).
pub fn resolve_descriptor(indexer: &Indexer, input: &str) -> Result<Descriptor, ResolveError> {
    let reference = match resolve_target(indexer, input)? {
        Resolved::Local(descriptor) => return Ok(descriptor),
        Resolved::Reference(reference) => reference,
    };

    if let Some(digest) = reference.digest() {
        return indexer
            .find(&Matcher::Digest(digest.clone()))
            .map_err(|e| lookup_error(input, e));
    }

    match indexer.resolve(input.trim()) {
        Err(e) if e.is_not_found() => {}
        result => return result.map_err(|e| lookup_error(input, e)),
    }

    let name = reference
        .index_name()
        .ok_or_else(|| ResolveError::UnresolvableReference(input.to_string()))?;
    indexer.resolve(&name).map_err(|e| lookup_error(input, e))
}

fn is_digest_token(input: &str) -> bool {
    let encoded = match input.split_once(':') {
        Some((algorithm, encoded)) if Algorithm::parse(algorithm).is_some() => encoded,
        Some(_) => return false,
        None => input,
    };
    !encoded.is_empty() && encoded.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

fn lookup_error(input: &str, err: StoreError) -> ResolveError {
    match err {
        StoreError::NotFound(_) => ResolveError::UnresolvableReference(input.to_string()),
        StoreError::AmbiguousMatch { candidates, .. } => ResolveError::AmbiguousReference {
            input: input.to_string(),
            candidates,
        },
        err => ResolveError::Store(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_tokens() {
        assert!(is_digest_token("ab12"));
        assert!(is_digest_token("sha256:ab12"));
        assert!(is_digest_token("sha512:0"));
        assert!(!is_digest_token("sha256:"));
        assert!(!is_digest_token("AB12"));
        assert!(!is_digest_token("alpine"));
        assert!(!is_digest_token("cafe:latest"));
        assert!(!is_digest_token("ghcr.io/onmetal/image"));
        assert!(!is_digest_token("md5:ab12"));
    }
}
