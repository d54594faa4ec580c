//! Container image references.
//!
//! Grammar:
//!
//! ```text
//! reference  := name [ ":" tag ] [ "@" digest ]
//! name       := [ domain "/" ] component ( "/" component )*
//! domain     := host [ ":" port ]
//! component  := [a-z0-9]+ ( ( "." | "_" | "__" | "-"+ ) [a-z0-9]+ )*
//! tag        := [A-Za-z0-9_] [A-Za-z0-9_.-]{0,127}
//! ```
//!
//! Parsed references are normalized: a name without a domain lives on
//! `docker.io`, and single-component Docker Hub names get the `library/`
//! prefix.

use std::fmt;
use std::str::FromStr;

use crate::digest::Digest;
use crate::error::ReferenceError;

/// Domain assumed when a reference has none.
pub const DEFAULT_DOMAIN: &str = "docker.io";
/// Tag assumed when a reference has neither tag nor digest.
pub const DEFAULT_TAG: &str = "latest";

const LEGACY_DEFAULT_DOMAIN: &str = "index.docker.io";
const DOCKER_HUB_ENDPOINT: &str = "registry-1.docker.io";
const OFFICIAL_REPO_PREFIX: &str = "library/";
const NAME_TOTAL_LENGTH_MAX: usize = 255;
const TAG_LENGTH_MAX: usize = 128;

/// A parsed, normalized container reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Reference {
    domain: String,
    path: String,
    tag: Option<String>,
    digest: Option<Digest>,
}

impl Reference {
    /// Parses and normalizes a reference.
    pub fn parse(s: &str) -> Result<Self, ReferenceError> {
        if s.is_empty() {
            return Err(ReferenceError::Empty);
        }

        let (rest, digest) = match s.split_once('@') {
            Some((name, digest)) => {
                let digest =
                    Digest::parse(digest).map_err(|source| ReferenceError::InvalidDigest {
                        reference: s.to_string(),
                        source,
                    })?;
                (name, Some(digest))
            }
            None => (s, None),
        };

        let (name, tag) = match rest.rfind(':') {
            Some(i) if !rest[i + 1..].contains('/') => (&rest[..i], Some(&rest[i + 1..])),
            _ => (rest, None),
        };

        if let Some(tag) = tag {
            if !is_tag(tag) {
                return Err(ReferenceError::InvalidTag(tag.to_string()));
            }
        }

        let (domain, path) = split_domain(name);
        if !is_domain(&domain) {
            return Err(ReferenceError::InvalidDomain(domain));
        }
        if !path.split('/').all(is_path_component) {
            return Err(ReferenceError::InvalidPath(path));
        }

        let full_name = format!("{domain}/{path}");
        if full_name.len() > NAME_TOTAL_LENGTH_MAX {
            return Err(ReferenceError::NameTooLong {
                name: full_name,
                max: NAME_TOTAL_LENGTH_MAX,
            });
        }

        Ok(Self {
            domain,
            path,
            tag: tag.map(str::to_string),
            digest,
        })
    }

    /// Registry domain, e.g. `ghcr.io` or `localhost:5000`.
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Repository path within the registry, e.g. `library/alpine`.
    pub fn repository(&self) -> &str {
        &self.path
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    pub fn digest(&self) -> Option<&Digest> {
        self.digest.as_ref()
    }

    /// Fully qualified name without tag or digest.
    pub fn name(&self) -> String {
        format!("{}/{}", self.domain, self.path)
    }

    /// Short form as typed by users (`alpine` instead of `docker.io/library/alpine`).
    pub fn familiar_name(&self) -> String {
        if self.domain == DEFAULT_DOMAIN {
            self.path
                .strip_prefix(OFFICIAL_REPO_PREFIX)
                .unwrap_or(&self.path)
                .to_string()
        } else {
            self.name()
        }
    }

    /// Host to contact for this reference's registry.
    pub fn registry_host(&self) -> &str {
        if self.domain == DEFAULT_DOMAIN {
            DOCKER_HUB_ENDPOINT
        } else {
            &self.domain
        }
    }

    /// The manifest reference sent to the registry: the digest if pinned,
    /// otherwise the tag (defaulting to `latest`).
    pub fn target(&self) -> String {
        match (&self.digest, &self.tag) {
            (Some(digest), _) => digest.to_string(),
            (None, Some(tag)) => tag.clone(),
            (None, None) => DEFAULT_TAG.to_string(),
        }
    }

    /// Name under which this reference is recorded in a local index.
    ///
    /// A digest-pinned reference without a tag has no index name.
    pub fn index_name(&self) -> Option<String> {
        match (&self.tag, &self.digest) {
            (Some(tag), _) => Some(format!("{}:{tag}", self.name())),
            (None, None) => Some(format!("{}:{DEFAULT_TAG}", self.name())),
            (None, Some(_)) => None,
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.domain, self.path)?;
        if let Some(tag) = &self.tag {
            write!(f, ":{tag}")?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{digest}")?;
        }
        Ok(())
    }
}

impl FromStr for Reference {
    type Err = ReferenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn split_domain(name: &str) -> (String, String) {
    let (domain, remainder) = match name.split_once('/') {
        Some((first, rest)) if looks_like_domain(first) => (first, rest),
        _ => (DEFAULT_DOMAIN, name),
    };

    let domain = if domain == LEGACY_DEFAULT_DOMAIN {
        DEFAULT_DOMAIN
    } else {
        domain
    };

    let path = if domain == DEFAULT_DOMAIN && !remainder.contains('/') {
        format!("{OFFICIAL_REPO_PREFIX}{remainder}")
    } else {
        remainder.to_string()
    };

    (domain.to_string(), path)
}

/// The first component is a domain if it has a `.` or `:`, is `localhost`,
/// or contains uppercase letters (which repository paths never do).
fn looks_like_domain(first: &str) -> bool {
    first.contains(['.', ':'])
        || first == "localhost"
        || first.bytes().any(|b| b.is_ascii_uppercase())
}

fn is_domain(domain: &str) -> bool {
    if let Some(rest) = domain.strip_prefix('[') {
        let Some((ipv6, after)) = rest.split_once(']') else {
            return false;
        };
        let valid_ipv6 =
            !ipv6.is_empty() && ipv6.bytes().all(|b| b.is_ascii_hexdigit() || b == b':');
        return valid_ipv6 && (after.is_empty() || after.strip_prefix(':').is_some_and(is_port));
    }

    let (host, port) = match domain.split_once(':') {
        Some((host, port)) => (host, Some(port)),
        None => (domain, None),
    };

    port.map_or(true, is_port) && host.split('.').all(is_domain_component)
}

fn is_port(port: &str) -> bool {
    !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit())
}

fn is_domain_component(c: &str) -> bool {
    let bytes = c.as_bytes();
    match (bytes.first(), bytes.last()) {
        (Some(first), Some(last)) => {
            first.is_ascii_alphanumeric()
                && last.is_ascii_alphanumeric()
                && bytes.iter().all(|b| b.is_ascii_alphanumeric() || *b == b'-')
        }
        _ => false,
    }
}

fn is_path_component(c: &str) -> bool {
    let is_alnum = |b: u8| b.is_ascii_lowercase() || b.is_ascii_digit();
    let bytes = c.as_bytes();
    let mut i = 0;

    loop {
        let start = i;
        while i < bytes.len() && is_alnum(bytes[i]) {
            i += 1;
        }
        if i == start {
            return false;
        }
        if i == bytes.len() {
            return true;
        }

        let sep_start = i;
        while i < bytes.len() && !is_alnum(bytes[i]) {
            i += 1;
        }
        let sep = &c[sep_start..i];
        let valid_sep = matches!(sep, "." | "_" | "__") || sep.bytes().all(|b| b == b'-');
        if !valid_sep || i == bytes.len() {
            return false;
        }
    }
}

fn is_tag(tag: &str) -> bool {
    let word = |b: u8| b.is_ascii_alphanumeric() || b == b'_';
    let bytes = tag.as_bytes();
    match bytes.first() {
        Some(first) if word(*first) => {
            bytes.len() <= TAG_LENGTH_MAX
                && bytes[1..].iter().all(|b| word(*b) || *b == b'.' || *b == b'-')
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIGEST: &str = "sha256:a3ed95caeb02ffe68cdd9fd84406680ae93d633cb16422d00e8a7c22955b46d4";

    #[test]
    fn test_parse_simple() {
        let r = Reference::parse("alpine:latest").unwrap();
        assert_eq!(r.domain(), "docker.io");
        assert_eq!(r.repository(), "library/alpine");
        assert_eq!(r.tag(), Some("latest"));
        assert_eq!(r.registry_host(), "registry-1.docker.io");
        assert_eq!(r.familiar_name(), "alpine");
    }

    #[test]
    fn test_parse_no_tag() {
        let r = Reference::parse("alpine").unwrap();
        assert_eq!(r.tag(), None);
        assert_eq!(r.target(), "latest");
        assert_eq!(
            r.index_name().as_deref(),
            Some("docker.io/library/alpine:latest")
        );
    }

    #[test]
    fn test_parse_user_repo() {
        let r = Reference::parse("myuser/myapp:v1").unwrap();
        assert_eq!(r.domain(), "docker.io");
        assert_eq!(r.repository(), "myuser/myapp");
        assert_eq!(r.to_string(), "docker.io/myuser/myapp:v1");
    }

    #[test]
    fn test_parse_custom_registry() {
        let r = Reference::parse("ghcr.io/onmetal/image:v2").unwrap();
        assert_eq!(r.domain(), "ghcr.io");
        assert_eq!(r.repository(), "onmetal/image");
        assert_eq!(r.registry_host(), "ghcr.io");
        assert_eq!(r.familiar_name(), "ghcr.io/onmetal/image");
    }

    #[test]
    fn test_parse_digest() {
        let r = Reference::parse(&format!("ghcr.io/org/app@{DIGEST}")).unwrap();
        assert_eq!(r.digest().map(ToString::to_string).as_deref(), Some(DIGEST));
        assert_eq!(r.target(), DIGEST);
        assert_eq!(r.index_name(), None);

        let r = Reference::parse(&format!("ghcr.io/org/app:v1@{DIGEST}")).unwrap();
        assert_eq!(r.tag(), Some("v1"));
        assert_eq!(r.target(), DIGEST);
        assert_eq!(r.index_name().as_deref(), Some("ghcr.io/org/app:v1"));
    }

    #[test]
    fn test_parse_localhost_and_ports() {
        let r = Reference::parse("localhost:5000/myapp:test").unwrap();
        assert_eq!(r.domain(), "localhost:5000");
        assert_eq!(r.repository(), "myapp");
        assert_eq!(r.tag(), Some("test"));

        let r = Reference::parse("127.0.0.1:8080/a/b").unwrap();
        assert_eq!(r.domain(), "127.0.0.1:8080");
        assert_eq!(r.tag(), None);

        let r = Reference::parse("[::1]:5000/img:dev").unwrap();
        assert_eq!(r.domain(), "[::1]:5000");
    }

    #[test]
    fn test_legacy_docker_domain() {
        let r = Reference::parse("index.docker.io/alpine").unwrap();
        assert_eq!(r.name(), "docker.io/library/alpine");
    }

    #[test]
    fn test_separators() {
        assert!(Reference::parse("a/b__c/d-e/f.g/h---i").is_ok());
        assert!(Reference::parse("a/b___c").is_err());
        assert!(Reference::parse("a/-b").is_err());
        assert!(Reference::parse("a/b.").is_err());
        assert!(Reference::parse("a//b").is_err());
    }

    #[test]
    fn test_rejects_malformed() {
        assert_eq!(Reference::parse(""), Err(ReferenceError::Empty));
        assert!(matches!(
            Reference::parse("Alpine"),
            Err(ReferenceError::InvalidPath(_))
        ));
        assert!(matches!(
            Reference::parse("alpine:-bad"),
            Err(ReferenceError::InvalidTag(_))
        ));
        assert!(matches!(
            Reference::parse("alpine@sha256:short"),
            Err(ReferenceError::InvalidDigest { .. })
        ));
        assert!(matches!(
            Reference::parse("example.com:port/img"),
            Err(ReferenceError::InvalidDomain(_))
        ));
        assert!(Reference::parse("foo:bar:baz").is_err());

        let long_tag = format!("alpine:{}", "t".repeat(129));
        assert!(Reference::parse(&long_tag).is_err());

        let long_name = format!("example.com/{}", "a".repeat(250));
        assert!(matches!(
            Reference::parse(&long_name),
            Err(ReferenceError::NameTooLong { .. })
        ));
    }

    #[test]
    fn test_display_roundtrip() {
        let input = format!("ghcr.io/org/app:v1@{DIGEST}");
        let r = Reference::parse(&input).unwrap();
        assert_eq!(r.to_string(), input);
        assert_eq!(Reference::parse(&r.to_string()).unwrap(), r);
    }
}
