//! Remote registry interface.

use async_trait::async_trait;
use bytes::Bytes;
use onmetal_oci::{BlobStream, Descriptor, Digest, Reference};

use crate::error::RegistryError;

/// Operations against a remote OCI distribution registry.
///
/// The reference names the registry host and repository; its tag or digest
/// is only used by [`Registry::resolve`].
#[async_trait]
pub trait Registry: Send + Sync {
    /// Resolve a reference to the descriptor of its root manifest or index.
    async fn resolve(&self, reference: &Reference) -> Result<Descriptor, RegistryError>;

    /// Fetch a manifest or index. The returned bytes match the descriptor
    /// digest.
    async fn fetch_manifest(
        &self,
        reference: &Reference,
        descriptor: &Descriptor,
    ) -> Result<Bytes, RegistryError>;

    /// Stream a blob. Verification is up to the consumer.
    async fn fetch_blob(
        &self,
        reference: &Reference,
        descriptor: &Descriptor,
    ) -> Result<BlobStream, RegistryError>;

    /// Check if the repository already has a blob.
    async fn blob_exists(
        &self,
        reference: &Reference,
        digest: &Digest,
    ) -> Result<bool, RegistryError>;

    /// Upload a blob.
    async fn push_blob(
        &self,
        reference: &Reference,
        descriptor: &Descriptor,
        content: BlobStream,
    ) -> Result<(), RegistryError>;

    /// Upload a manifest under a tag or its digest.
    async fn push_manifest(
        &self,
        reference: &Reference,
        target: &str,
        descriptor: &Descriptor,
        content: Bytes,
    ) -> Result<(), RegistryError>;
}
