//! Image manifests and indexes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::descriptor::{ArtifactKind, Descriptor};
use crate::error::ManifestError;
use crate::media_type;

/// OCI image manifest.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    /// Schema version.
    pub schema_version: u32,
    /// Media type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    /// Config descriptor.
    pub config: Descriptor,
    /// Layer descriptors.
    pub layers: Vec<Descriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
}

impl Manifest {
    /// Creates an OCI manifest from a config and its layers.
    pub fn new(config: Descriptor, layers: Vec<Descriptor>) -> Self {
        Self {
            schema_version: 2,
            media_type: Some(media_type::OCI_MANIFEST.to_string()),
            config,
            layers,
            annotations: None,
        }
    }
}

/// OCI image index (or docker manifest list).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageIndex {
    pub schema_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    pub manifests: Vec<Descriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
}

impl ImageIndex {
    pub fn new(manifests: Vec<Descriptor>) -> Self {
        Self {
            schema_version: 2,
            media_type: Some(media_type::OCI_INDEX.to_string()),
            manifests,
            annotations: None,
        }
    }
}

/// Decoded manifest-like content.
#[derive(Debug, Clone)]
pub enum Content {
    Manifest(Manifest),
    Index(ImageIndex),
}

impl Content {
    /// Decodes manifest bytes according to the descriptor's media type.
    ///
    /// Unlisted media types are rejected rather than guessed from the body.
    pub fn parse(media_type: &str, data: &[u8]) -> Result<Self, ManifestError> {
        if media_type::is_manifest(media_type) {
            Ok(Self::Manifest(serde_json::from_slice(data)?))
        } else if media_type::is_index(media_type) {
            Ok(Self::Index(serde_json::from_slice(data)?))
        } else {
            Err(ManifestError::UnsupportedMediaType(media_type.to_string()))
        }
    }

    /// Descriptors this content links to, config first.
    pub fn children(&self) -> Vec<&Descriptor> {
        match self {
            Self::Manifest(m) => std::iter::once(&m.config).chain(m.layers.iter()).collect(),
            Self::Index(i) => i.manifests.iter().collect(),
        }
    }
}

/// An onmetal image: one config blob and its rootfs, initramfs and kernel layers.
#[derive(Debug, Clone)]
pub struct OnmetalImage {
    pub config: Descriptor,
    pub rootfs: Descriptor,
    pub initramfs: Descriptor,
    pub kernel: Descriptor,
}

impl OnmetalImage {
    /// Locates the onmetal layers of a manifest.
    pub fn from_manifest(manifest: &Manifest) -> Result<Self, ManifestError> {
        if manifest.config.kind() != ArtifactKind::Config {
            return Err(ManifestError::NotAnOnmetalImage(
                manifest.config.media_type.clone(),
            ));
        }

        Ok(Self {
            config: manifest.config.clone(),
            rootfs: single_layer(manifest, ArtifactKind::RootFsLayer)?,
            initramfs: single_layer(manifest, ArtifactKind::InitRamFsLayer)?,
            kernel: single_layer(manifest, ArtifactKind::KernelLayer)?,
        })
    }

    /// Builds the manifest describing this image.
    pub fn to_manifest(&self) -> Manifest {
        Manifest::new(
            self.config.clone(),
            vec![
                self.rootfs.clone(),
                self.initramfs.clone(),
                self.kernel.clone(),
            ],
        )
    }
}

fn single_layer(manifest: &Manifest, kind: ArtifactKind) -> Result<Descriptor, ManifestError> {
    let mut found = manifest.layers.iter().filter(|l| l.kind() == kind);
    let layer = found.next().ok_or(ManifestError::MissingLayer(kind.as_str()))?;
    if found.next().is_some() {
        return Err(ManifestError::DuplicateLayer(kind.as_str()));
    }
    Ok(layer.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn onmetal_manifest() -> Manifest {
        Manifest::new(
            Descriptor::for_content(media_type::CONFIG, b"{}"),
            vec![
                Descriptor::for_content(media_type::ROOTFS_LAYER, b"rootfs"),
                Descriptor::for_content(media_type::INITRAMFS_LAYER, b"initramfs"),
                Descriptor::for_content(media_type::KERNEL_LAYER, b"kernel"),
            ],
        )
    }

    #[test]
    fn test_content_children_config_first() {
        let manifest = onmetal_manifest();
        let bytes = serde_json::to_vec(&manifest).unwrap();
        let content = Content::parse(media_type::OCI_MANIFEST, &bytes).unwrap();

        let children = content.children();
        assert_eq!(children.len(), 4);
        assert_eq!(children[0].media_type, media_type::CONFIG);
    }

    #[test]
    fn test_content_rejects_unknown_media_type() {
        let err = Content::parse("application/octet-stream", b"{}").unwrap_err();
        assert!(matches!(err, ManifestError::UnsupportedMediaType(_)));
    }

    #[test]
    fn test_index_children() {
        let child = Descriptor::for_content(media_type::OCI_MANIFEST, b"m");
        let index = ImageIndex::new(vec![child.clone()]);
        let bytes = serde_json::to_vec(&index).unwrap();

        let content = Content::parse(media_type::OCI_INDEX, &bytes).unwrap();
        assert_eq!(content.children(), vec![&child]);
    }

    #[test]
    fn test_onmetal_image_layers() {
        let manifest = onmetal_manifest();
        let image = OnmetalImage::from_manifest(&manifest).unwrap();
        assert_eq!(image.kernel.media_type, media_type::KERNEL_LAYER);
        assert_eq!(image.to_manifest().layers.len(), 3);
    }

    #[test]
    fn test_onmetal_image_requires_each_layer() {
        let mut manifest = onmetal_manifest();
        manifest.layers.pop();
        assert!(matches!(
            OnmetalImage::from_manifest(&manifest),
            Err(ManifestError::MissingLayer("kernel"))
        ));

        let mut manifest = onmetal_manifest();
        manifest.layers.push(manifest.layers[0].clone());
        assert!(matches!(
            OnmetalImage::from_manifest(&manifest),
            Err(ManifestError::DuplicateLayer("rootfs"))
        ));
    }
}
