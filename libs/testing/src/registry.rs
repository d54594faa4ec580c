//! In-memory registry.

use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{stream, StreamExt, TryStreamExt};
use onmetal_oci::{BlobStream, Descriptor, Digest, Reference, DEFAULT_TAG};
use onmetal_registry::{Registry, RegistryError};

use crate::fixtures::{ImageFixture, IndexFixture};

#[derive(Default)]
struct State {
    blobs: HashMap<Digest, Bytes>,
    manifests: HashMap<Digest, (Descriptor, Bytes)>,
    /// `(repository name, tag)` to manifest digest.
    tags: HashMap<(String, String), Digest>,
    fetches: HashMap<Digest, usize>,
    failing: HashSet<Digest>,
    stalling: HashSet<Digest>,
    uploads: Vec<Digest>,
    manifest_pushes: Vec<(String, Digest)>,
}

impl State {
    fn insert_image(&mut self, image: &ImageFixture) {
        for (descriptor, data) in &image.blobs {
            self.blobs.insert(descriptor.digest.clone(), data.clone());
        }
        self.manifests.insert(
            image.manifest.digest.clone(),
            (image.manifest.clone(), image.manifest_bytes.clone()),
        );
    }
}

/// A registry kept in memory.
///
/// Content is shared by all repositories; tags are per repository. Every
/// manifest and blob fetch is counted.
#[derive(Default)]
pub struct FakeRegistry {
    state: Mutex<State>,
}

impl FakeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Serve an image under `reference`'s repository and tag.
    pub fn add_image(&self, reference: &str, image: &ImageFixture) -> Result<(), RegistryError> {
        let reference = parse(reference)?;
        let mut state = self.state();
        state.insert_image(image);
        state.tags.insert(tag_key(&reference), image.manifest.digest.clone());
        Ok(())
    }

    /// Serve an index and all its images under `reference`.
    pub fn add_index(&self, reference: &str, index: &IndexFixture) -> Result<(), RegistryError> {
        let reference = parse(reference)?;
        let mut state = self.state();
        for image in &index.images {
            state.insert_image(image);
        }
        state.manifests.insert(
            index.index.digest.clone(),
            (index.index.clone(), index.index_bytes.clone()),
        );
        state.tags.insert(tag_key(&reference), index.index.digest.clone());
        Ok(())
    }

    /// Remove a blob, as if the registry lost it.
    pub fn remove_blob(&self, digest: &Digest) {
        self.state().blobs.remove(digest);
    }

    /// Make fetches of a blob fail halfway through the transfer.
    pub fn fail_blob(&self, digest: &Digest) {
        self.state().failing.insert(digest.clone());
    }

    /// Make fetches of a blob send half the data and then hang.
    pub fn stall_blob(&self, digest: &Digest) {
        self.state().stalling.insert(digest.clone());
    }

    pub fn clear_failures(&self) {
        let mut state = self.state();
        state.failing.clear();
        state.stalling.clear();
    }

    /// Number of fetches of a blob or manifest.
    pub fn fetch_count(&self, digest: &Digest) -> usize {
        self.state().fetches.get(digest).copied().unwrap_or(0)
    }

    /// Number of fetches over all content.
    pub fn total_fetches(&self) -> usize {
        self.state().fetches.values().sum()
    }

    pub fn has_blob(&self, digest: &Digest) -> bool {
        self.state().blobs.contains_key(digest)
    }

    /// Uploaded blob digests in upload order.
    pub fn uploaded_blobs(&self) -> Vec<Digest> {
        self.state().uploads.clone()
    }

    /// Pushed manifests as `(tag or digest, manifest digest)`.
    pub fn pushed_manifests(&self) -> Vec<(String, Digest)> {
        self.state().manifest_pushes.clone()
    }

    fn count_fetch(&self, digest: &Digest) {
        *self.state().fetches.entry(digest.clone()).or_default() += 1;
    }
}

#[async_trait]
impl Registry for FakeRegistry {
    async fn resolve(&self, reference: &Reference) -> Result<Descriptor, RegistryError> {
        let state = self.state();
        let digest = match reference.digest() {
            Some(digest) => digest.clone(),
            None => state
                .tags
                .get(&tag_key(reference))
                .cloned()
                .ok_or_else(|| RegistryError::NotFound(reference.to_string()))?,
        };

        state
            .manifests
            .get(&digest)
            .map(|(descriptor, _)| descriptor.clone())
            .ok_or_else(|| RegistryError::NotFound(reference.to_string()))
    }

    async fn fetch_manifest(
        &self,
        _reference: &Reference,
        descriptor: &Descriptor,
    ) -> Result<Bytes, RegistryError> {
        self.count_fetch(&descriptor.digest);
        let data = self
            .state()
            .manifests
            .get(&descriptor.digest)
            .map(|(_, data)| data.clone())
            .ok_or_else(|| RegistryError::NotFound(descriptor.digest.to_string()))?;

        let actual = Digest::compute(descriptor.digest.algorithm(), &data);
        if actual != descriptor.digest {
            return Err(RegistryError::DigestMismatch {
                expected: descriptor.digest.clone(),
                actual,
            });
        }
        Ok(data)
    }

    async fn fetch_blob(
        &self,
        _reference: &Reference,
        descriptor: &Descriptor,
    ) -> Result<BlobStream, RegistryError> {
        self.count_fetch(&descriptor.digest);
        let state = self.state();
        let data = state
            .blobs
            .get(&descriptor.digest)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(descriptor.digest.to_string()))?;

        if state.stalling.contains(&descriptor.digest) {
            let first: io::Result<Bytes> = Ok(data.slice(..data.len() / 2));
            return Ok(Box::pin(stream::iter([first]).chain(stream::pending())));
        }

        let chunks: Vec<io::Result<Bytes>> = if state.failing.contains(&descriptor.digest) {
            vec![
                Ok(data.slice(..data.len() / 2)),
                Err(io::Error::new(io::ErrorKind::ConnectionReset, "connection reset")),
            ]
        } else {
            vec![Ok(data)]
        };
        Ok(Box::pin(stream::iter(chunks)))
    }

    async fn blob_exists(
        &self,
        _reference: &Reference,
        digest: &Digest,
    ) -> Result<bool, RegistryError> {
        Ok(self.state().blobs.contains_key(digest))
    }

    async fn push_blob(
        &self,
        _reference: &Reference,
        descriptor: &Descriptor,
        content: BlobStream,
    ) -> Result<(), RegistryError> {
        let chunks: Vec<Bytes> = content
            .try_collect()
            .await
            .map_err(|e| RegistryError::InvalidResponse {
                resource: descriptor.digest.to_string(),
                reason: e.to_string(),
            })?;
        let data = Bytes::from(chunks.concat());

        let actual = Digest::compute(descriptor.digest.algorithm(), &data);
        if actual != descriptor.digest {
            return Err(RegistryError::DigestMismatch {
                expected: descriptor.digest.clone(),
                actual,
            });
        }

        let mut state = self.state();
        state.blobs.insert(descriptor.digest.clone(), data);
        state.uploads.push(descriptor.digest.clone());
        Ok(())
    }

    async fn push_manifest(
        &self,
        reference: &Reference,
        target: &str,
        descriptor: &Descriptor,
        content: Bytes,
    ) -> Result<(), RegistryError> {
        let mut state = self.state();
        state.manifests.insert(
            descriptor.digest.clone(),
            (descriptor.clone(), content),
        );
        if Digest::parse(target).is_err() {
            state.tags.insert(
                (reference.name(), target.to_string()),
                descriptor.digest.clone(),
            );
        }
        state
            .manifest_pushes
            .push((target.to_string(), descriptor.digest.clone()));
        Ok(())
    }
}

fn parse(reference: &str) -> Result<Reference, RegistryError> {
    Reference::parse(reference).map_err(|e| RegistryError::NotFound(format!("{reference}: {e}")))
}

fn tag_key(reference: &Reference) -> (String, String) {
    let tag = reference.tag().unwrap_or(DEFAULT_TAG);
    (reference.name(), tag.to_string())
}
