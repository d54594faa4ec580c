//! Content digests.
//!
//! A digest has the canonical form `{algorithm}:{encoded}`, for example
//! `sha256:a3ed95caeb02ffe68cdd9fd84406680ae93d633cb16422d00e8a7c22955b46d4`.
//! Parsing is strict: only algorithms the store can verify are accepted and the
//! encoded part must be lowercase hex of the algorithm's exact length.

use std::fmt;
use std::str::FromStr;

use sha2::{Digest as _, Sha256, Sha512};

use crate::error::DigestError;

/// Hash algorithm of a digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Algorithm {
    Sha256,
    Sha512,
}

impl Algorithm {
    /// The canonical algorithm identifier.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Sha512 => "sha512",
        }
    }

    /// Length of the hex-encoded hash.
    #[must_use]
    pub const fn encoded_len(&self) -> usize {
        match self {
            Self::Sha256 => 64,
            Self::Sha512 => 128,
        }
    }

    /// Looks up an algorithm by its identifier.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sha256" => Some(Self::Sha256),
            "sha512" => Some(Self::Sha512),
            _ => None,
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated content digest.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Digest {
    algorithm: Algorithm,
    encoded: String,
}

impl Digest {
    /// Parses a digest from its canonical string form.
    pub fn parse(s: &str) -> Result<Self, DigestError> {
        if s.is_empty() {
            return Err(DigestError::Empty);
        }

        let Some((algorithm, encoded)) = s.split_once(':') else {
            return Err(DigestError::MissingSeparator(s.to_string()));
        };

        let algorithm = Algorithm::parse(algorithm)
            .ok_or_else(|| DigestError::UnsupportedAlgorithm(algorithm.to_string()))?;

        Self::from_parts(algorithm, encoded)
    }

    /// Builds a digest from an algorithm and its hex-encoded hash.
    pub fn from_parts(algorithm: Algorithm, encoded: &str) -> Result<Self, DigestError> {
        if encoded.len() != algorithm.encoded_len() {
            return Err(DigestError::InvalidLength {
                algorithm: algorithm.as_str(),
                expected: algorithm.encoded_len(),
                actual: encoded.len(),
            });
        }

        if !is_lower_hex(encoded) {
            return Err(DigestError::InvalidEncoding(encoded.to_string()));
        }

        Ok(Self {
            algorithm,
            encoded: encoded.to_string(),
        })
    }

    /// Computes the digest of in-memory content.
    #[must_use]
    pub fn compute(algorithm: Algorithm, data: &[u8]) -> Self {
        let mut digester = Digester::new(algorithm);
        digester.update(data);
        digester.finalize()
    }

    /// Computes the sha256 digest of in-memory content.
    #[must_use]
    pub fn sha256(data: &[u8]) -> Self {
        Self::compute(Algorithm::Sha256, data)
    }

    /// Returns the algorithm.
    #[must_use]
    pub const fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Returns the hex-encoded hash without the algorithm prefix.
    #[must_use]
    pub fn encoded(&self) -> &str {
        &self.encoded
    }

    /// Returns a digester for this digest's algorithm.
    #[must_use]
    pub fn digester(&self) -> Digester {
        Digester::new(self.algorithm)
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.encoded)
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({self})")
    }
}

impl FromStr for Digest {
    type Err = DigestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl serde::Serialize for Digest {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for Digest {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Incremental digest computation over streamed content.
pub struct Digester {
    algorithm: Algorithm,
    state: DigesterState,
}

enum DigesterState {
    Sha256(Sha256),
    Sha512(Sha512),
}

impl Digester {
    #[must_use]
    pub fn new(algorithm: Algorithm) -> Self {
        let state = match algorithm {
            Algorithm::Sha256 => DigesterState::Sha256(Sha256::new()),
            Algorithm::Sha512 => DigesterState::Sha512(Sha512::new()),
        };
        Self { algorithm, state }
    }

    pub fn update(&mut self, data: &[u8]) {
        match &mut self.state {
            DigesterState::Sha256(h) => h.update(data),
            DigesterState::Sha512(h) => h.update(data),
        }
    }

    #[must_use]
    pub fn finalize(self) -> Digest {
        let encoded = match self.state {
            DigesterState::Sha256(h) => hex::encode(h.finalize()),
            DigesterState::Sha512(h) => hex::encode(h.finalize()),
        };
        Digest {
            algorithm: self.algorithm,
            encoded,
        }
    }
}

pub(crate) fn is_lower_hex(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}
