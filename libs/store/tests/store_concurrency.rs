//! Integration tests for the local store.
//!
//! These tests exercise prefix lookup, concurrent writers, and several store
//! instances sharing one layout.

use std::sync::Arc;

use onmetal_oci::{media_type, Descriptor, Digest, Matcher};
use onmetal_store::{Store, StoreError};
use proptest::prelude::*;
use tempfile::TempDir;

fn manifest_descriptor(data: &[u8]) -> Descriptor {
    Descriptor::for_content(media_type::OCI_MANIFEST, data)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn test_prefix_find_ambiguous_iff_both_match(
        a in proptest::collection::vec(any::<u8>(), 1..32),
        b in proptest::collection::vec(any::<u8>(), 1..32),
        prefix_len in 0usize..4,
        from_first in any::<bool>(),
    ) {
        prop_assume!(a != b);

        let temp_dir = TempDir::new().unwrap();
        let store = Store::open(temp_dir.path()).unwrap();

        let d1 = manifest_descriptor(&a);
        let d2 = manifest_descriptor(&b);
        store.indexer().put(&d1.digest.to_string(), &d1).unwrap();
        store.indexer().put(&d2.digest.to_string(), &d2).unwrap();

        let source = if from_first { &d1 } else { &d2 };
        let prefix = &source.digest.encoded()[..prefix_len];
        let first = d1.digest.encoded().starts_with(prefix);
        let second = d2.digest.encoded().starts_with(prefix);

        let result = store.indexer().find(&Matcher::encoded_digest_prefix(prefix));
        match (first, second) {
            (true, true) => {
                let is_ambiguous = matches!(
                    result,
                    Err(StoreError::AmbiguousMatch { ref candidates, .. }) if candidates.len() == 2
                );
                prop_assert!(is_ambiguous);
            }
            (true, false) => prop_assert_eq!(result.unwrap().digest, d1.digest.clone()),
            (false, true) => prop_assert_eq!(result.unwrap().digest, d2.digest.clone()),
            (false, false) => unreachable!("prefix is taken from one of the digests"),
        }
    }
}

#[tokio::test]
async fn test_concurrent_identical_puts() {
    let temp_dir = TempDir::new().unwrap();
    let store = Arc::new(Store::open(temp_dir.path()).unwrap());

    let data = vec![7u8; 256 * 1024];
    let digest = Digest::sha256(&data);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let store = store.clone();
        let data = data.clone();
        let digest = digest.clone();
        handles.push(tokio::spawn(async move {
            store.put_blob_bytes(&digest, data).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(store.read_blob(&digest).await.unwrap().len(), data.len());
    let ingest = std::fs::read_dir(store.layout().ingest_dir()).unwrap();
    assert_eq!(ingest.count(), 0);
}

#[tokio::test]
async fn test_concurrent_tag_writes_are_not_lost() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().to_path_buf();

    // Separate instances only share the on-disk lock.
    let mut handles = Vec::new();
    for i in 0..16 {
        let path = path.clone();
        handles.push(tokio::task::spawn_blocking(move || {
            let store = Store::open(&path).unwrap();
            let desc = manifest_descriptor(format!("manifest-{i}").as_bytes());
            store.indexer().put(&format!("img:v{i}"), &desc).unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let store = Store::open(&path).unwrap();
    let entries = store.indexer().list().unwrap();
    assert_eq!(entries.len(), 16);
    for i in 0..16 {
        let desc = store.indexer().resolve(&format!("img:v{i}")).unwrap();
        assert_eq!(desc.digest, manifest_descriptor(format!("manifest-{i}").as_bytes()).digest);
    }
}

#[tokio::test]
async fn test_instances_share_layout() {
    let temp_dir = TempDir::new().unwrap();
    let writer = Store::open(temp_dir.path()).unwrap();
    let reader = Store::open(temp_dir.path()).unwrap();

    let data = br#"{"schemaVersion":2}"#;
    let desc = manifest_descriptor(data);
    writer.put_blob_bytes(&desc.digest, &data[..]).await.unwrap();
    writer.indexer().put("machine:latest", &desc).unwrap();

    assert!(reader.has_blob(&desc.digest).await.unwrap());
    assert_eq!(reader.indexer().resolve("machine:latest").unwrap(), desc);

    writer.indexer().untag("machine:latest").unwrap();
    assert!(reader.indexer().resolve("machine:latest").unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_gc_keeps_tagged_and_removes_untagged() {
    let temp_dir = TempDir::new().unwrap();
    let store = Store::open(temp_dir.path()).unwrap();

    let kept = b"kept".to_vec();
    let dropped = b"dropped".to_vec();
    let kept_desc = Descriptor::for_content(media_type::KERNEL_LAYER, &kept);
    let dropped_desc = Descriptor::for_content(media_type::KERNEL_LAYER, &dropped);

    store.put_blob_bytes(&kept_desc.digest, kept).await.unwrap();
    store.put_blob_bytes(&dropped_desc.digest, dropped).await.unwrap();
    store.indexer().put("kernel:v1", &kept_desc).unwrap();
    store.indexer().put(&dropped_desc.digest.to_string(), &dropped_desc).unwrap();

    assert_eq!(store.indexer().remove(&dropped_desc.digest).unwrap(), 1);
    let report = store.gc().await.unwrap();

    assert_eq!(report.removed, vec![dropped_desc.digest.clone()]);
    assert!(store.has_blob(&kept_desc.digest).await.unwrap());
}
