//! Local content-addressable store.

use std::collections::{BTreeSet, HashSet};
use std::io;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use futures_util::{stream, Stream, StreamExt};
use onmetal_oci::{Algorithm, BlobStream, Content, Digest};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::index::Indexer;
use crate::layout::Layout;

/// Chunk size for streamed blob reads.
const READ_CHUNK_SIZE: usize = 64 * 1024;

/// Outcome of a garbage collection run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct GcReport {
    /// Blobs deleted, in digest order.
    pub removed: Vec<Digest>,
    /// Bytes freed.
    pub freed_bytes: u64,
    /// Leftover ingest files removed.
    pub removed_partials: usize,
}

/// Content-addressable blob store with a tag and digest index.
///
/// Blobs are immutable once committed. A blob becomes visible under its digest
/// only after its bytes were received in full and hashed to that digest.
pub struct Store {
    layout: Layout,
    indexer: Indexer,
}

impl Store {
    /// Open or create a store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let layout = Layout::new(path.as_ref());
        layout.init()?;

        let indexer = Indexer::new(&layout);
        debug!(path = %layout.root().display(), "Opened store");

        Ok(Self { layout, indexer })
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn indexer(&self) -> &Indexer {
        &self.indexer
    }

    /// Check if a blob is committed.
    pub async fn has_blob(&self, digest: &Digest) -> Result<bool, StoreError> {
        Ok(tokio::fs::try_exists(self.layout.blob_path(digest)).await?)
    }

    /// Size of a committed blob.
    pub async fn blob_size(&self, digest: &Digest) -> Result<u64, StoreError> {
        let path = self.layout.blob_path(digest);
        let meta = tokio::fs::metadata(&path)
            .await
            .map_err(|e| not_found_or_io(e, digest))?;
        Ok(meta.len())
    }

    /// Stream a committed blob.
    pub async fn blob(&self, digest: &Digest) -> Result<BlobStream, StoreError> {
        let file = tokio::fs::File::open(self.layout.blob_path(digest))
            .await
            .map_err(|e| not_found_or_io(e, digest))?;
        Ok(Box::pin(stream::try_unfold(file, read_chunk)))
    }

    /// Read a whole blob into memory. Meant for manifests and configs.
    pub async fn read_blob(&self, digest: &Digest) -> Result<Bytes, StoreError> {
        let data = tokio::fs::read(self.layout.blob_path(digest))
            .await
            .map_err(|e| not_found_or_io(e, digest))?;
        Ok(Bytes::from(data))
    }

    /// Stream content into the store under its claimed digest.
    ///
    /// The bytes land in `ingest/` first and are renamed into place only when
    /// their digest matches. On mismatch, error, or if the returned future is
    /// dropped, the partial file is removed and nothing is visible under the
    /// digest. Returns the number of bytes received.
    pub async fn put_blob<S>(&self, digest: &Digest, mut content: S) -> Result<u64, StoreError>
    where
        S: Stream<Item = io::Result<Bytes>> + Unpin,
    {
        let ingest = IngestFile::new(&self.layout);
        let mut file = tokio::fs::File::create(&ingest.path).await?;
        let mut digester = digest.digester();
        let mut size = 0u64;

        while let Some(chunk) = content.next().await {
            let chunk = chunk?;
            digester.update(&chunk);
            file.write_all(&chunk).await?;
            size += chunk.len() as u64;
        }

        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        let actual = digester.finalize();
        if actual != *digest {
            warn!(expected = %digest, actual = %actual, "Rejected blob with mismatched digest");
            return Err(StoreError::DigestMismatch {
                expected: digest.clone(),
                actual,
            });
        }

        let dest = self.layout.blob_path(digest);
        if tokio::fs::try_exists(&dest).await? {
            debug!(digest = %digest, "Blob already present");
            return Ok(size);
        }

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::rename(&ingest.path, &dest).await?;
        ingest.committed();

        debug!(digest = %digest, size, "Blob committed");
        Ok(size)
    }

    /// Store in-memory content under its claimed digest.
    pub async fn put_blob_bytes(
        &self,
        digest: &Digest,
        data: impl Into<Bytes>,
    ) -> Result<u64, StoreError> {
        let chunk: io::Result<Bytes> = Ok(data.into());
        self.put_blob(digest, stream::iter([chunk])).await
    }

    /// Delete a committed blob. Returns false if it was not present.
    pub async fn delete_blob(&self, digest: &Digest) -> Result<bool, StoreError> {
        match tokio::fs::remove_file(self.layout.blob_path(digest)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete every blob not reachable from an index entry, and every file
    /// left in `ingest/`.
    ///
    /// Reachability follows manifests and indexes down to their blobs. Blobs
    /// of a pull that has not yet updated the index count as unreachable and
    /// its ingest files are removed, so this must not run alongside pulls
    /// into the same store.
    pub async fn gc(&self) -> Result<GcReport, StoreError> {
        let reachable = self.reachable().await?;

        let mut report = GcReport {
            removed_partials: self.sweep_ingest().await?,
            ..GcReport::default()
        };
        let mut stored = BTreeSet::new();
        for algorithm in [Algorithm::Sha256, Algorithm::Sha512] {
            let dir = self.layout.blobs_dir().join(algorithm.as_str());
            collect_blobs(&dir, algorithm, &mut stored).await?;
        }

        for digest in stored {
            if reachable.contains(&digest) {
                continue;
            }
            let size = self.blob_size(&digest).await.unwrap_or(0);
            if self.delete_blob(&digest).await? {
                report.freed_bytes += size;
                report.removed.push(digest);
            }
        }

        info!(
            removed = report.removed.len(),
            freed_bytes = report.freed_bytes,
            removed_partials = report.removed_partials,
            "Garbage collection finished"
        );
        Ok(report)
    }

    /// Remove partial files of interrupted writes.
    async fn sweep_ingest(&self) -> Result<usize, StoreError> {
        let mut entries = match tokio::fs::read_dir(self.layout.ingest_dir()).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            match tokio::fs::remove_file(entry.path()).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        if removed > 0 {
            debug!(removed, "Removed leftover ingest files");
        }
        Ok(removed)
    }

    async fn reachable(&self) -> Result<HashSet<Digest>, StoreError> {
        let mut seen = HashSet::new();
        let mut pending: Vec<_> = self
            .indexer
            .list()?
            .into_iter()
            .map(|e| e.descriptor)
            .collect();

        while let Some(desc) = pending.pop() {
            if !seen.insert(desc.digest.clone()) {
                continue;
            }
            if !desc.kind().is_manifest_like() {
                continue;
            }
            match self.read_blob(&desc.digest).await {
                Ok(data) => {
                    let content = Content::parse(&desc.media_type, &data)?;
                    pending.extend(content.children().into_iter().cloned());
                }
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }

        Ok(seen)
    }
}

async fn read_chunk(
    mut file: tokio::fs::File,
) -> io::Result<Option<(Bytes, tokio::fs::File)>> {
    let mut buf = vec![0u8; READ_CHUNK_SIZE];
    let n = file.read(&mut buf).await?;
    if n == 0 {
        return Ok(None);
    }
    buf.truncate(n);
    Ok(Some((Bytes::from(buf), file)))
}

async fn collect_blobs(
    dir: &Path,
    algorithm: Algorithm,
    out: &mut BTreeSet<Digest>,
) -> Result<(), StoreError> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };

    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        match name.to_str().map(|n| Digest::from_parts(algorithm, n)) {
            Some(Ok(digest)) => {
                out.insert(digest);
            }
            _ => debug!(path = %entry.path().display(), "Ignoring unexpected file in blobs"),
        }
    }
    Ok(())
}

fn not_found_or_io(e: io::Error, digest: &Digest) -> StoreError {
    if e.kind() == io::ErrorKind::NotFound {
        StoreError::NotFound(format!("blob {digest}"))
    } else {
        StoreError::Io(e)
    }
}

/// Temporary ingest file, removed on drop unless committed.
struct IngestFile {
    path: PathBuf,
    committed: bool,
}

impl IngestFile {
    fn new(layout: &Layout) -> Self {
        let path = layout
            .ingest_dir()
            .join(format!("{}.partial", uuid::Uuid::new_v4()));
        Self {
            path,
            committed: false,
        }
    }

    fn committed(mut self) {
        self.committed = true;
    }
}

impl Drop for IngestFile {
    fn drop(&mut self) {
        if !self.committed {
            std::fs::remove_file(&self.path).ok();
        }
    }
}
