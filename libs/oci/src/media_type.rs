//! Media types understood by the store and the sync layer.

/// Onmetal image config blob.
pub const CONFIG: &str = "application/vnd.onmetal.image.config.v1alpha1+json";
/// Onmetal root filesystem layer.
pub const ROOTFS_LAYER: &str = "application/vnd.onmetal.image.rootfs.v1alpha1.rootfs";
/// Onmetal initramfs layer.
pub const INITRAMFS_LAYER: &str = "application/vnd.onmetal.image.initramfs.v1alpha1.initramfs";
/// Onmetal kernel layer.
pub const KERNEL_LAYER: &str = "application/vnd.onmetal.image.vmlinuz.v1alpha1.vmlinuz";

pub const OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
pub const OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";
pub const DOCKER_MANIFEST: &str = "application/vnd.docker.distribution.manifest.v2+json";
pub const DOCKER_MANIFEST_LIST: &str = "application/vnd.docker.distribution.manifest.list.v2+json";

/// Manifest media types accepted when fetching from a registry.
pub const ACCEPTED_MANIFESTS: &[&str] = &[OCI_MANIFEST, OCI_INDEX, DOCKER_MANIFEST, DOCKER_MANIFEST_LIST];

/// Returns true for single-image manifest media types.
pub fn is_manifest(media_type: &str) -> bool {
    media_type == OCI_MANIFEST || media_type == DOCKER_MANIFEST
}

/// Returns true for multi-manifest index media types.
pub fn is_index(media_type: &str) -> bool {
    media_type == OCI_INDEX || media_type == DOCKER_MANIFEST_LIST
}
