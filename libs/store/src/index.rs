//! Tag and digest index of a store.
//!
//! The index is the layout's `index.json`. Each entry is a descriptor; tagged
//! entries carry their name in the `org.opencontainers.image.ref.name`
//! annotation.
//!
//! Readers load the file without locking: writers replace it with a
//! write-to-temp + rename, so a reader always sees a complete index. Writers
//! serialize through an in-process mutex and an exclusive `flock` on
//! `index.lock`, which keeps read-modify-write cycles from losing updates
//! across processes sharing the layout.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Mutex;

use onmetal_oci::{media_type, Descriptor, DescriptorMatcher, Digest, ANNOTATION_REF_NAME};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::StoreError;
use crate::layout::Layout;
use crate::lock::IndexLock;

/// Persisted `index.json` format.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IndexFile {
    schema_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    media_type: Option<String>,
    #[serde(default)]
    manifests: Vec<Descriptor>,
}

impl Default for IndexFile {
    fn default() -> Self {
        Self {
            schema_version: 2,
            media_type: Some(media_type::OCI_INDEX.to_string()),
            manifests: Vec::new(),
        }
    }
}

/// An index entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    /// Tag of the entry; `None` for digest-only entries.
    pub name: Option<String>,
    /// Indexed descriptor, without the name annotation.
    pub descriptor: Descriptor,
}

impl IndexEntry {
    fn from_stored(mut descriptor: Descriptor) -> Self {
        let name = descriptor
            .annotations
            .as_mut()
            .and_then(|a| a.remove(ANNOTATION_REF_NAME));
        if descriptor.annotations.as_ref().is_some_and(BTreeMap::is_empty) {
            descriptor.annotations = None;
        }
        Self { name, descriptor }
    }

    fn to_stored(&self) -> Descriptor {
        match &self.name {
            Some(name) => self
                .descriptor
                .clone()
                .with_annotation(ANNOTATION_REF_NAME, name.clone()),
            None => self.descriptor.clone(),
        }
    }
}

/// Searchable index of tags and digests.
pub struct Indexer {
    path: PathBuf,
    lock_path: PathBuf,
    /// Serializes writers within this process.
    write_lock: Mutex<()>,
}

impl Indexer {
    pub(crate) fn new(layout: &Layout) -> Self {
        Self {
            path: layout.index_path(),
            lock_path: layout.lock_path(),
            write_lock: Mutex::new(()),
        }
    }

    /// List all entries, tagged entries first in name order.
    pub fn list(&self) -> Result<Vec<IndexEntry>, StoreError> {
        let mut entries = self.load()?;
        entries.sort_by(|a, b| match (&a.name, &b.name) {
            (Some(x), Some(y)) => x.cmp(y),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => a.descriptor.digest.cmp(&b.descriptor.digest),
        });
        Ok(entries)
    }

    /// Find every distinct descriptor matching, ordered by digest.
    pub fn find_all(&self, matcher: &dyn DescriptorMatcher) -> Result<Vec<Descriptor>, StoreError> {
        let mut by_digest: BTreeMap<Digest, Descriptor> = BTreeMap::new();
        for entry in self.load()? {
            if matcher.matches(&entry.descriptor) {
                by_digest
                    .entry(entry.descriptor.digest.clone())
                    .or_insert(entry.descriptor);
            }
        }
        Ok(by_digest.into_values().collect())
    }

    /// Find the single descriptor matching.
    ///
    /// Entries sharing a digest count once. More than one distinct digest is
    /// an [`StoreError::AmbiguousMatch`] listing every candidate.
    pub fn find(&self, matcher: &dyn DescriptorMatcher) -> Result<Descriptor, StoreError> {
        let mut found = self.find_all(matcher)?;
        match found.len() {
            0 => Err(StoreError::NotFound(matcher.describe())),
            1 => Ok(found.remove(0)),
            _ => Err(StoreError::AmbiguousMatch {
                query: matcher.describe(),
                candidates: found.into_iter().map(|d| d.digest).collect(),
            }),
        }
    }

    /// Resolve a tag to its descriptor.
    pub fn resolve(&self, name: &str) -> Result<Descriptor, StoreError> {
        self.load()?
            .into_iter()
            .find(|e| e.name.as_deref() == Some(name))
            .map(|e| e.descriptor)
            .ok_or_else(|| StoreError::NotFound(format!("tag '{name}'")))
    }

    /// Record a descriptor under a tag or under its own digest.
    ///
    /// Tagging replaces any previous mapping of the tag. Putting a digest that
    /// is already indexed (tagged or not) changes nothing.
    pub fn put(&self, key: &str, descriptor: &Descriptor) -> Result<(), StoreError> {
        let descriptor = strip_ref_name(descriptor);

        if let Ok(digest) = Digest::parse(key) {
            if digest != descriptor.digest {
                return Err(StoreError::InvalidKey {
                    key: key.to_string(),
                    digest: descriptor.digest,
                });
            }

            return self.update(|entries| {
                if !entries.iter().any(|e| e.descriptor.digest == digest) {
                    debug!(digest = %digest, "Indexed digest");
                    entries.push(IndexEntry {
                        name: None,
                        descriptor,
                    });
                }
                Ok(())
            });
        }

        if key.trim().is_empty() {
            return Err(StoreError::InvalidKey {
                key: key.to_string(),
                digest: descriptor.digest,
            });
        }

        self.update(|entries| {
            entries.retain(|e| match &e.name {
                Some(name) => name != key,
                None => e.descriptor.digest != descriptor.digest,
            });
            info!(tag = %key, digest = %descriptor.digest, "Tagged");
            entries.push(IndexEntry {
                name: Some(key.to_string()),
                descriptor,
            });
            Ok(())
        })
    }

    /// Remove a tag, returning the descriptor it pointed at.
    pub fn untag(&self, name: &str) -> Result<Descriptor, StoreError> {
        self.update(|entries| {
            let pos = entries
                .iter()
                .position(|e| e.name.as_deref() == Some(name))
                .ok_or_else(|| StoreError::NotFound(format!("tag '{name}'")))?;
            let removed = entries.remove(pos);
            info!(tag = %name, digest = %removed.descriptor.digest, "Untagged");
            Ok(removed.descriptor)
        })
    }

    /// Remove every entry for a digest, returning how many were dropped.
    pub fn remove(&self, digest: &Digest) -> Result<usize, StoreError> {
        self.update(|entries| {
            let before = entries.len();
            entries.retain(|e| e.descriptor.digest != *digest);
            Ok(before - entries.len())
        })
    }

    fn load(&self) -> Result<Vec<IndexEntry>, StoreError> {
        let contents = match fs::read(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let file: IndexFile = serde_json::from_slice(&contents)?;
        Ok(file
            .manifests
            .into_iter()
            .map(IndexEntry::from_stored)
            .collect())
    }

    /// Run a read-modify-write cycle under both writer locks.
    pub(crate) fn update<T>(
        &self,
        apply: impl FnOnce(&mut Vec<IndexEntry>) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let _lock = IndexLock::acquire(&self.lock_path)?;

        let mut entries = self.load()?;
        let result = apply(&mut entries)?;
        self.save(&entries)?;
        Ok(result)
    }

    fn save(&self, entries: &[IndexEntry]) -> Result<(), StoreError> {
        let file = IndexFile {
            manifests: entries.iter().map(IndexEntry::to_stored).collect(),
            ..IndexFile::default()
        };
        let contents = serde_json::to_vec_pretty(&file)?;

        let temp_path = self
            .path
            .with_extension(format!("json.{}.tmp", uuid::Uuid::new_v4()));
        let write = || -> io::Result<()> {
            let mut temp = fs::File::create(&temp_path)?;
            temp.write_all(&contents)?;
            temp.sync_all()?;
            fs::rename(&temp_path, &self.path)
        };

        write().map_err(|e| {
            fs::remove_file(&temp_path).ok();
            StoreError::Io(e)
        })
    }
}

fn strip_ref_name(descriptor: &Descriptor) -> Descriptor {
    IndexEntry::from_stored(descriptor.clone()).descriptor
}

#[cfg(test)]
mod tests {
    use super::*;
    use onmetal_oci::Matcher;

    fn setup() -> (tempfile::TempDir, Indexer) {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::new(dir.path());
        layout.init().unwrap();
        let indexer = Indexer::new(&layout);
        (dir, indexer)
    }

    fn manifest(data: &[u8]) -> Descriptor {
        Descriptor::for_content(media_type::OCI_MANIFEST, data)
    }

    #[test]
    fn test_empty_index() {
        let (_dir, indexer) = setup();
        assert!(indexer.list().unwrap().is_empty());
        assert!(indexer.resolve("a:b").unwrap_err().is_not_found());
    }

    #[test]
    fn test_retag_overwrites() {
        let (_dir, indexer) = setup();
        let first = manifest(b"one");
        let second = manifest(b"two");

        indexer.put("ghcr.io/onmetal/image:v1", &first).unwrap();
        indexer.put("ghcr.io/onmetal/image:v1", &second).unwrap();

        assert_eq!(indexer.resolve("ghcr.io/onmetal/image:v1").unwrap(), second);
        assert_eq!(indexer.list().unwrap().len(), 1);
    }

    #[test]
    fn test_digest_put_is_idempotent() {
        let (_dir, indexer) = setup();
        let desc = manifest(b"one");
        let key = desc.digest.to_string();

        indexer.put(&key, &desc).unwrap();
        indexer.put(&key, &desc).unwrap();
        assert_eq!(indexer.list().unwrap().len(), 1);

        // Tagging absorbs the untagged entry; a later digest put is a no-op.
        indexer.put("img:v1", &desc).unwrap();
        indexer.put(&key, &desc).unwrap();
        let entries = indexer.list().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name.as_deref(), Some("img:v1"));
    }

    #[test]
    fn test_put_rejects_foreign_digest_key() {
        let (_dir, indexer) = setup();
        let desc = manifest(b"one");
        let other = Digest::sha256(b"other").to_string();

        let err = indexer.put(&other, &desc).unwrap_err();
        assert!(matches!(err, StoreError::InvalidKey { .. }));
        assert!(matches!(
            indexer.put("  ", &desc),
            Err(StoreError::InvalidKey { .. })
        ));
    }

    #[test]
    fn test_find_dedupes_by_digest() {
        let (_dir, indexer) = setup();
        let desc = manifest(b"one");
        indexer.put("img:v1", &desc).unwrap();
        indexer.put("img:latest", &desc).unwrap();

        let prefix = &desc.digest.encoded()[..8];
        let found = indexer.find(&Matcher::encoded_digest_prefix(prefix)).unwrap();
        assert_eq!(found, desc);
    }

    #[test]
    fn test_find_not_found_and_ambiguous() {
        let (_dir, indexer) = setup();
        let a = manifest(b"one");
        let b = manifest(b"two");
        indexer.put(&a.digest.to_string(), &a).unwrap();
        indexer.put(&b.digest.to_string(), &b).unwrap();

        let none = indexer
            .find(&Matcher::media_type(media_type::OCI_INDEX))
            .unwrap_err();
        assert!(none.is_not_found());

        match indexer.find(&Matcher::encoded_digest_prefix("")) {
            Err(StoreError::AmbiguousMatch { candidates, .. }) => {
                let mut expected = vec![a.digest.clone(), b.digest.clone()];
                expected.sort();
                assert_eq!(candidates, expected);
            }
            other => panic!("expected ambiguous match, got {other:?}"),
        }
    }

    #[test]
    fn test_untag_and_remove() {
        let (_dir, indexer) = setup();
        let desc = manifest(b"one");
        indexer.put("img:v1", &desc).unwrap();
        indexer.put("img:v2", &desc).unwrap();

        assert_eq!(indexer.untag("img:v1").unwrap(), desc);
        assert!(indexer.untag("img:v1").unwrap_err().is_not_found());
        assert_eq!(indexer.remove(&desc.digest).unwrap(), 1);
        assert!(indexer.list().unwrap().is_empty());
    }

    #[test]
    fn test_ref_name_annotation_on_disk() {
        let (dir, indexer) = setup();
        let desc = manifest(b"one").with_annotation("org.example", "kept");
        indexer.put("img:v1", &desc).unwrap();

        let raw: serde_json::Value =
            serde_json::from_slice(&fs::read(dir.path().join("index.json")).unwrap()).unwrap();
        let annotations = &raw["manifests"][0]["annotations"];
        assert_eq!(annotations[ANNOTATION_REF_NAME], "img:v1");
        assert_eq!(annotations["org.example"], "kept");

        let entry = &indexer.list().unwrap()[0];
        assert_eq!(entry.descriptor.annotation(ANNOTATION_REF_NAME), None);
        assert_eq!(entry.descriptor.annotation("org.example"), Some("kept"));
    }
}
