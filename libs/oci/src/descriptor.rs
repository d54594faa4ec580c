//! Content descriptors.

use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::digest::Digest;
use crate::media_type;

/// Content descriptor.
///
/// Equality and hashing consider only the digest: two descriptors with the
/// same digest refer to the same bytes regardless of their other fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    /// Media type of the referenced content.
    pub media_type: String,
    /// Digest of the content.
    pub digest: Digest,
    /// Size in bytes.
    pub size: u64,
    /// Optional annotations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
}

impl Descriptor {
    pub fn new(media_type: impl Into<String>, digest: Digest, size: u64) -> Self {
        Self {
            media_type: media_type.into(),
            digest,
            size,
            annotations: None,
        }
    }

    /// Describes in-memory content using a sha256 digest.
    pub fn for_content(media_type: impl Into<String>, data: &[u8]) -> Self {
        Self::new(media_type, Digest::sha256(data), data.len() as u64)
    }

    /// Returns the value of an annotation, if set.
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations
            .as_ref()
            .and_then(|a| a.get(key))
            .map(String::as_str)
    }

    /// Returns a copy with the given annotation set.
    #[must_use]
    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value.into());
        self
    }

    /// Classifies the content by its media type.
    pub fn kind(&self) -> ArtifactKind {
        ArtifactKind::from_media_type(&self.media_type)
    }
}

impl PartialEq for Descriptor {
    fn eq(&self, other: &Self) -> bool {
        self.digest == other.digest
    }
}

impl Eq for Descriptor {}

impl Hash for Descriptor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.digest.hash(state);
    }
}

/// Kind of artifact a descriptor points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    Config,
    RootFsLayer,
    InitRamFsLayer,
    KernelLayer,
    Manifest,
    Index,
    Other,
}

impl ArtifactKind {
    pub fn from_media_type(media_type: &str) -> Self {
        match media_type {
            media_type::CONFIG => Self::Config,
            media_type::ROOTFS_LAYER => Self::RootFsLayer,
            media_type::INITRAMFS_LAYER => Self::InitRamFsLayer,
            media_type::KERNEL_LAYER => Self::KernelLayer,
            m if media_type::is_manifest(m) => Self::Manifest,
            m if media_type::is_index(m) => Self::Index,
            _ => Self::Other,
        }
    }

    /// Short label used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Config => "config",
            Self::RootFsLayer => "rootfs",
            Self::InitRamFsLayer => "initramfs",
            Self::KernelLayer => "kernel",
            Self::Manifest => "manifest",
            Self::Index => "index",
            Self::Other => "blob",
        }
    }

    /// Transfer key prefix for this kind (`config-`, `layer-`, ...).
    pub fn key_prefix(&self) -> &'static str {
        match self {
            Self::Config => "config-",
            Self::RootFsLayer | Self::InitRamFsLayer | Self::KernelLayer => "layer-",
            Self::Manifest => "manifest-",
            Self::Index => "index-",
            Self::Other => "",
        }
    }

    /// Returns true if the content links to other descriptors.
    pub fn is_manifest_like(&self) -> bool {
        matches!(self, Self::Manifest | Self::Index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_is_digest() {
        let a = Descriptor::for_content(media_type::ROOTFS_LAYER, b"rootfs");
        let mut b = a.clone();
        b.media_type = media_type::KERNEL_LAYER.to_string();
        b = b.with_annotation("k", "v");

        assert_eq!(a, b);
        assert_ne!(a, Descriptor::for_content(media_type::ROOTFS_LAYER, b"other"));
    }

    #[test]
    fn test_json_shape() {
        let desc = Descriptor::for_content(media_type::CONFIG, b"{}");
        let json = serde_json::to_value(&desc).unwrap();

        assert_eq!(json["mediaType"], media_type::CONFIG);
        assert_eq!(json["size"], 2);
        assert!(json.get("annotations").is_none());

        let back: Descriptor = serde_json::from_value(json).unwrap();
        assert_eq!(back.size, 2);
        assert_eq!(back.digest, desc.digest);
    }

    #[test]
    fn test_kind_and_prefix() {
        assert_eq!(
            ArtifactKind::from_media_type(media_type::INITRAMFS_LAYER),
            ArtifactKind::InitRamFsLayer
        );
        assert_eq!(ArtifactKind::KernelLayer.key_prefix(), "layer-");
        assert_eq!(ArtifactKind::Config.key_prefix(), "config-");
        assert_eq!(
            ArtifactKind::from_media_type(media_type::DOCKER_MANIFEST_LIST),
            ArtifactKind::Index
        );
        assert_eq!(ArtifactKind::from_media_type("text/plain"), ArtifactKind::Other);
    }
}
