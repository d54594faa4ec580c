//! Pulling images into the local store.

use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use onmetal_oci::{Content, Descriptor, Reference};
use onmetal_registry::Registry;
use tracing::{debug, info, warn};

use crate::context::SyncContext;
use crate::error::SyncError;
use crate::observer::{Direction, Stage};
use crate::resolve::{self, Resolved};
use crate::Syncer;

impl Syncer {
    /// Pull a reference into the store and index it.
    ///
    /// Blobs already in the store are not fetched again, so a pull that was
    /// interrupted can be repeated and only transfers what is missing. The
    /// index entry is written after the whole graph is committed.
    pub async fn pull(
        &self,
        input: &str,
        registry: &dyn Registry,
        ctx: &SyncContext,
    ) -> Result<Descriptor, SyncError> {
        let reference = match resolve::resolve_target(self.store.indexer(), input)? {
            Resolved::Reference(reference) => reference,
            Resolved::Local(_) => return Err(SyncError::RemoteReferenceRequired(input.to_string())),
        };

        ctx.run(self.pull_reference(&reference, registry, ctx)).await
    }

    async fn pull_reference(
        &self,
        reference: &Reference,
        registry: &dyn Registry,
        ctx: &SyncContext,
    ) -> Result<Descriptor, SyncError> {
        let root = registry.resolve(reference).await?;
        debug!(reference = %reference, digest = %root.digest, "Resolved remote reference");

        self.pull_node(reference, &root, registry, ctx).await?;

        let key = reference
            .index_name()
            .unwrap_or_else(|| root.digest.to_string());
        self.store.indexer().put(&key, &root)?;

        info!(reference = %reference, digest = %root.digest, "Image pulled");
        Ok(root)
    }

    fn pull_node<'a>(
        &'a self,
        reference: &'a Reference,
        descriptor: &'a Descriptor,
        registry: &'a dyn Registry,
        ctx: &'a SyncContext,
    ) -> BoxFuture<'a, Result<(), SyncError>> {
        async move {
            if !descriptor.kind().is_manifest_like() {
                return self.pull_blob(reference, descriptor, registry, ctx).await;
            }

            let present = self.store.has_blob(&descriptor.digest).await?;
            let data = if present {
                self.store.read_blob(&descriptor.digest).await?
            } else {
                ctx.emit(Direction::Pull, Stage::Started, descriptor);
                registry.fetch_manifest(reference, descriptor).await?
            };

            let content = Content::parse(&descriptor.media_type, &data)?;
            for child in content.children() {
                self.pull_node(reference, child, registry, ctx).await?;
            }

            if present {
                ctx.emit(Direction::Pull, Stage::Skipped, descriptor);
            } else {
                self.commit_manifest(descriptor, data, ctx).await?;
            }
            Ok(())
        }
        .boxed()
    }

    async fn commit_manifest(
        &self,
        descriptor: &Descriptor,
        data: Bytes,
        ctx: &SyncContext,
    ) -> Result<(), SyncError> {
        let _transfer = self.lock_transfer(&descriptor.digest).await;

        let bytes = self.store.put_blob_bytes(&descriptor.digest, data).await?;
        ctx.emit(Direction::Pull, Stage::Completed { bytes }, descriptor);
        Ok(())
    }

    async fn pull_blob(
        &self,
        reference: &Reference,
        descriptor: &Descriptor,
        registry: &dyn Registry,
        ctx: &SyncContext,
    ) -> Result<(), SyncError> {
        if self.store.has_blob(&descriptor.digest).await? {
            ctx.emit(Direction::Pull, Stage::Skipped, descriptor);
            return Ok(());
        }

        // Concurrent pulls of the same blob wait for the first one
        let _transfer = self.lock_transfer(&descriptor.digest).await;

        if self.store.has_blob(&descriptor.digest).await? {
            ctx.emit(Direction::Pull, Stage::Skipped, descriptor);
            return Ok(());
        }

        ctx.emit(Direction::Pull, Stage::Started, descriptor);
        let content = registry.fetch_blob(reference, descriptor).await?;
        let bytes = self.store.put_blob(&descriptor.digest, content).await?;

        if bytes != descriptor.size {
            warn!(
                digest = %descriptor.digest,
                expected = descriptor.size,
                actual = bytes,
                "Blob size differs from descriptor"
            );
        }
        ctx.emit(Direction::Pull, Stage::Completed { bytes }, descriptor);
        Ok(())
    }
}
