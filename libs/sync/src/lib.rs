//! Reference resolution and registry sync for the onmetal image store.
//!
//! - [`resolve`](resolve::resolve) turns user input (`name:tag`, digest
//!   prefixes) into a reference or a full digest
//! - [`Syncer::pull`] fetches an image graph into the [`Store`]
//! - [`Syncer::push`] uploads a stored image to a registry
//!
//! Pull and push take a [`SyncContext`] for cancellation and transfer
//! diagnostics. Nothing is retried automatically; a failed pull can be
//! repeated and skips blobs already committed.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};

use onmetal_oci::Digest;
use onmetal_store::Store;
use tokio::sync::{Mutex, OwnedMutexGuard};

mod config;
mod context;
mod error;
mod observer;
mod pull;
mod push;

pub mod resolve;

pub use config::{
    default_store_path, open_store, registry_client, Config, DOCKER_CONFIG_PATHS_ENV,
    PLAIN_HTTP_REGISTRIES_ENV, REGISTRY_TIMEOUT_ENV, STORE_PATH_ENV,
};
pub use context::SyncContext;
pub use error::{ConfigError, ResolveError, SyncError};
pub use observer::{Direction, Stage, TracingObserver, TransferEvent, TransferObserver};
pub use resolve::{resolve, resolve_descriptor, Resolved};

type TransferLocks = StdMutex<HashMap<Digest, Arc<Mutex<()>>>>;

/// Moves images between a [`Store`] and registries.
pub struct Syncer {
    store: Arc<Store>,
    /// Per-digest locks so concurrent pulls fetch each blob once. An entry
    /// lives only while a transfer of its digest holds or waits for it.
    transfer_locks: TransferLocks,
}

impl Syncer {
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            store,
            transfer_locks: StdMutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Wait until this task is the only one transferring `digest`.
    async fn lock_transfer(&self, digest: &Digest) -> TransferGuard<'_> {
        let lock = lock_map(&self.transfer_locks)
            .entry(digest.clone())
            .or_default()
            .clone();
        let guard = lock.lock_owned().await;

        TransferGuard {
            locks: &self.transfer_locks,
            digest: digest.clone(),
            guard,
        }
    }

    #[cfg(test)]
    fn transfer_lock_count(&self) -> usize {
        lock_map(&self.transfer_locks).len()
    }
}

fn lock_map(locks: &TransferLocks) -> MutexGuard<'_, HashMap<Digest, Arc<Mutex<()>>>> {
    locks.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Held for the duration of one transfer.
struct TransferGuard<'a> {
    locks: &'a TransferLocks,
    digest: Digest,
    guard: OwnedMutexGuard<()>,
}

impl Drop for TransferGuard<'_> {
    fn drop(&mut self) {
        let mut locks = lock_map(self.locks);
        // The map and this guard are the only holders: nobody is waiting.
        if Arc::strong_count(OwnedMutexGuard::mutex(&self.guard)) == 2 {
            locks.remove(&self.digest);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn syncer() -> (tempfile::TempDir, Arc<Syncer>) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("store")).unwrap();
        (dir, Arc::new(Syncer::new(Arc::new(store))))
    }

    #[tokio::test]
    async fn test_transfer_lock_released_after_use() {
        let (_dir, syncer) = syncer();

        for seed in ["config", "rootfs", "kernel"] {
            let guard = syncer.lock_transfer(&Digest::sha256(seed.as_bytes())).await;
            assert_eq!(syncer.transfer_lock_count(), 1);
            drop(guard);
        }
        assert_eq!(syncer.transfer_lock_count(), 0);
    }

    #[tokio::test]
    async fn test_transfer_lock_kept_while_waiting() {
        let (_dir, syncer) = syncer();
        let digest = Digest::sha256(b"rootfs");

        let first = syncer.lock_transfer(&digest).await;
        let waiter = {
            let syncer = syncer.clone();
            let digest = digest.clone();
            tokio::spawn(async move {
                let _second = syncer.lock_transfer(&digest).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        drop(first);
        assert_eq!(syncer.transfer_lock_count(), 1);

        waiter.await.unwrap();
        assert_eq!(syncer.transfer_lock_count(), 0);
    }
}
