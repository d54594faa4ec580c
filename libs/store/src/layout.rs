//! On-disk OCI image layout.
//!
//! ```text
//! <root>/
//! ├── oci-layout              {"imageLayoutVersion":"1.0.0"}
//! ├── index.json              tag and digest entries
//! ├── index.lock              advisory lock for index writers
//! ├── blobs/<alg>/<encoded>   committed content
//! └── ingest/                 in-flight writes, never read
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use onmetal_oci::Digest;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::StoreError;

const LAYOUT_FILE: &str = "oci-layout";
const LAYOUT_VERSION: &str = "1.0.0";
const INDEX_FILE: &str = "index.json";
const LOCK_FILE: &str = "index.lock";
const BLOBS_DIR: &str = "blobs";
const INGEST_DIR: &str = "ingest";

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LayoutMarker {
    image_layout_version: String,
}

/// Paths of a store's on-disk layout.
#[derive(Debug, Clone)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn index_path(&self) -> PathBuf {
        self.root.join(INDEX_FILE)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.root.join(LOCK_FILE)
    }

    pub fn blobs_dir(&self) -> PathBuf {
        self.root.join(BLOBS_DIR)
    }

    pub fn ingest_dir(&self) -> PathBuf {
        self.root.join(INGEST_DIR)
    }

    /// Get the path of a committed blob.
    pub fn blob_path(&self, digest: &Digest) -> PathBuf {
        self.blobs_dir()
            .join(digest.algorithm().as_str())
            .join(digest.encoded())
    }

    /// Create the layout if missing and validate an existing one.
    pub(crate) fn init(&self) -> Result<(), StoreError> {
        match fs::metadata(&self.root) {
            Ok(meta) if !meta.is_dir() => {
                return Err(StoreError::unavailable(&self.root, "not a directory"));
            }
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                fs::create_dir_all(&self.root)
                    .map_err(|e| StoreError::unavailable(&self.root, e))?;
                debug!(path = %self.root.display(), "Created store directory");
            }
            Err(e) => return Err(StoreError::unavailable(&self.root, e)),
        }

        for dir in [self.blobs_dir(), self.ingest_dir()] {
            fs::create_dir_all(&dir).map_err(|e| StoreError::unavailable(&dir, e))?;
        }

        self.check_marker()
    }

    fn check_marker(&self) -> Result<(), StoreError> {
        let path = self.root.join(LAYOUT_FILE);

        match fs::read(&path) {
            Ok(contents) => {
                let marker: LayoutMarker = serde_json::from_slice(&contents)
                    .map_err(|e| StoreError::unavailable(&path, e))?;
                if marker.image_layout_version != LAYOUT_VERSION {
                    return Err(StoreError::unavailable(
                        &path,
                        format!(
                            "unsupported image layout version {}",
                            marker.image_layout_version
                        ),
                    ));
                }
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                let marker = LayoutMarker {
                    image_layout_version: LAYOUT_VERSION.to_string(),
                };
                let contents = serde_json::to_vec(&marker)?;
                // Concurrent openers must never observe a half-written marker.
                let tmp = self
                    .root
                    .join(format!("{LAYOUT_FILE}.{}.tmp", uuid::Uuid::new_v4()));
                fs::write(&tmp, contents)
                    .and_then(|()| fs::rename(&tmp, &path))
                    .map_err(|e| {
                        fs::remove_file(&tmp).ok();
                        StoreError::unavailable(&path, e)
                    })
            }
            Err(e) => Err(StoreError::unavailable(&path, e)),
        }
    }
}
