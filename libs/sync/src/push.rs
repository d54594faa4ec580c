//! Pushing images from the local store.

use std::collections::HashSet;

use bytes::Bytes;
use onmetal_oci::{Content, Descriptor, Digest, Matcher, Reference, DEFAULT_TAG};
use onmetal_registry::Registry;
use tracing::{debug, info};

use crate::context::SyncContext;
use crate::error::SyncError;
use crate::observer::{Direction, Stage};
use crate::resolve::{self, Resolved};
use crate::Syncer;

/// Everything a push uploads, read from the store up front.
struct PushPlan {
    blobs: Vec<Descriptor>,
    /// Manifests with their content, children before parents.
    manifests: Vec<(Descriptor, Bytes)>,
}

enum Visit {
    Enter(Descriptor),
    /// All children of the manifest have been visited.
    Exit(Descriptor, Bytes),
}

impl Syncer {
    /// Push a locally indexed image to the repository it names.
    ///
    /// `input` must be a reference; its tag (or digest) picks the local image
    /// and the remote tag.
    pub async fn push(
        &self,
        input: &str,
        registry: &dyn Registry,
        ctx: &SyncContext,
    ) -> Result<Descriptor, SyncError> {
        let target = match resolve::resolve_target(self.store.indexer(), input)? {
            Resolved::Reference(reference) => reference,
            Resolved::Local(_) => return Err(SyncError::RemoteReferenceRequired(input.to_string())),
        };
        let root = resolve::resolve_descriptor(self.store.indexer(), input)?;

        self.push_digest(&root.digest, &target, registry, ctx).await
    }

    /// Push the image with the given root digest to `target`.
    ///
    /// Fails with [`SyncError::IncompleteLocalContent`] before any upload if
    /// a blob of the image is missing locally. Blobs the registry already has
    /// are not uploaded. Each manifest is uploaded after everything it
    /// references, so the root goes last.
    pub async fn push_digest(
        &self,
        digest: &Digest,
        target: &Reference,
        registry: &dyn Registry,
        ctx: &SyncContext,
    ) -> Result<Descriptor, SyncError> {
        let root = self
            .store
            .indexer()
            .find(&Matcher::Digest(digest.clone()))?;
        let plan = self.plan_push(&root).await?;

        ctx.run(self.upload(&root, plan, target, registry, ctx)).await?;

        info!(reference = %target, digest = %root.digest, "Image pushed");
        Ok(root)
    }

    async fn plan_push(&self, root: &Descriptor) -> Result<PushPlan, SyncError> {
        let mut plan = PushPlan {
            blobs: Vec::new(),
            manifests: Vec::new(),
        };
        let mut missing = Vec::new();
        let mut seen = HashSet::new();
        let mut pending = vec![Visit::Enter(root.clone())];

        // Depth-first; a manifest is planned once all of its children are.
        while let Some(visit) = pending.pop() {
            let descriptor = match visit {
                Visit::Exit(descriptor, data) => {
                    plan.manifests.push((descriptor, data));
                    continue;
                }
                Visit::Enter(descriptor) => descriptor,
            };
            if !seen.insert(descriptor.digest.clone()) {
                continue;
            }
            if !self.store.has_blob(&descriptor.digest).await? {
                missing.push(descriptor.digest.clone());
                continue;
            }

            if descriptor.kind().is_manifest_like() {
                let data = self.store.read_blob(&descriptor.digest).await?;
                let content = Content::parse(&descriptor.media_type, &data)?;
                let children: Vec<Visit> = content
                    .children()
                    .into_iter()
                    .rev()
                    .cloned()
                    .map(Visit::Enter)
                    .collect();
                pending.push(Visit::Exit(descriptor, data));
                pending.extend(children);
            } else {
                plan.blobs.push(descriptor);
            }
        }

        if !missing.is_empty() {
            missing.sort();
            return Err(SyncError::IncompleteLocalContent {
                digest: root.digest.clone(),
                missing,
            });
        }

        Ok(plan)
    }

    async fn upload(
        &self,
        root: &Descriptor,
        plan: PushPlan,
        target: &Reference,
        registry: &dyn Registry,
        ctx: &SyncContext,
    ) -> Result<(), SyncError> {
        for blob in &plan.blobs {
            if registry.blob_exists(target, &blob.digest).await? {
                ctx.emit(Direction::Push, Stage::Skipped, blob);
                continue;
            }

            ctx.emit(Direction::Push, Stage::Started, blob);
            let content = self.store.blob(&blob.digest).await?;
            registry.push_blob(target, blob, content).await?;
            ctx.emit(Direction::Push, Stage::Completed { bytes: blob.size }, blob);
        }

        for (manifest, data) in plan.manifests {
            let tag = if manifest.digest == root.digest {
                root_target(target, root)
            } else {
                manifest.digest.to_string()
            };

            debug!(target = %tag, digest = %manifest.digest, "Uploading manifest");
            ctx.emit(Direction::Push, Stage::Started, &manifest);
            let bytes = data.len() as u64;
            registry.push_manifest(target, &tag, &manifest, data).await?;
            ctx.emit(Direction::Push, Stage::Completed { bytes }, &manifest);
        }

        Ok(())
    }
}

/// Remote name of the root manifest: the tag, else the digest for
/// digest-pinned targets, else `latest`.
fn root_target(target: &Reference, root: &Descriptor) -> String {
    match (target.tag(), target.digest()) {
        (Some(tag), _) => tag.to_string(),
        (None, Some(_)) => root.digest.to_string(),
        (None, None) => DEFAULT_TAG.to_string(),
    }
}
