//! Onmetal image fixtures.

use bytes::Bytes;
use onmetal_oci::{media_type, Descriptor, ImageIndex, OnmetalImage};

/// An onmetal image with generated content.
#[derive(Debug, Clone)]
pub struct ImageFixture {
    /// Config and layers, config first.
    pub blobs: Vec<(Descriptor, Bytes)>,
    pub manifest: Descriptor,
    pub manifest_bytes: Bytes,
}

impl ImageFixture {
    /// Build an image whose content is derived from `seed`.
    ///
    /// Different seeds give disjoint blobs.
    pub fn onmetal(seed: &str) -> Self {
        let config = blob(
            media_type::CONFIG,
            serde_json::json!({ "commandLine": format!("root=/dev/vda1 seed={seed}") })
                .to_string()
                .into_bytes(),
        );
        let rootfs = blob(media_type::ROOTFS_LAYER, format!("rootfs of {seed}").repeat(64).into_bytes());
        let initramfs = blob(media_type::INITRAMFS_LAYER, format!("initramfs of {seed}").into_bytes());
        let kernel = blob(media_type::KERNEL_LAYER, format!("vmlinuz of {seed}").into_bytes());

        let image = OnmetalImage {
            config: config.0.clone(),
            rootfs: rootfs.0.clone(),
            initramfs: initramfs.0.clone(),
            kernel: kernel.0.clone(),
        };
        let manifest_bytes = Bytes::from(to_json(&image.to_manifest()));
        let manifest = Descriptor::for_content(media_type::OCI_MANIFEST, &manifest_bytes);

        Self {
            blobs: vec![config, rootfs, initramfs, kernel],
            manifest,
            manifest_bytes,
        }
    }

    /// Config and layer descriptors.
    pub fn blob_descriptors(&self) -> Vec<&Descriptor> {
        self.blobs.iter().map(|(d, _)| d).collect()
    }
}

/// An OCI index over several images.
#[derive(Debug, Clone)]
pub struct IndexFixture {
    pub images: Vec<ImageFixture>,
    pub index: Descriptor,
    pub index_bytes: Bytes,
}

impl IndexFixture {
    pub fn new(images: Vec<ImageFixture>) -> Self {
        let index = ImageIndex::new(images.iter().map(|i| i.manifest.clone()).collect());
        let index_bytes = Bytes::from(to_json(&index));
        let descriptor = Descriptor::for_content(media_type::OCI_INDEX, &index_bytes);

        Self {
            images,
            index: descriptor,
            index_bytes,
        }
    }
}

fn blob(media_type: &str, data: Vec<u8>) -> (Descriptor, Bytes) {
    (Descriptor::for_content(media_type, &data), Bytes::from(data))
}

fn to_json<T: serde::Serialize>(value: &T) -> Vec<u8> {
    // Manifest types serialize infallibly: string keys, no non-finite floats.
    serde_json::to_vec(value).unwrap_or_default()
}
