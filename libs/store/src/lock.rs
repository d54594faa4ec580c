//! Advisory lock serializing index writers across processes.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;

/// Exclusive lock on the store's `index.lock` file, released on drop.
pub(crate) struct IndexLock {
    file: File,
}

impl IndexLock {
    /// Blocks until the lock is held.
    pub(crate) fn acquire(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        lock_exclusive(&file)?;
        Ok(Self { file })
    }
}

impl Drop for IndexLock {
    fn drop(&mut self) {
        unlock(&self.file);
    }
}

#[cfg(unix)]
fn lock_exclusive(file: &File) -> io::Result<()> {
    use rustix::fs::{flock, FlockOperation};
    use std::os::unix::io::AsFd;

    loop {
        match flock(file.as_fd(), FlockOperation::LockExclusive) {
            Ok(()) => return Ok(()),
            Err(rustix::io::Errno::INTR) => continue,
            Err(e) => return Err(io::Error::from_raw_os_error(e.raw_os_error())),
        }
    }
}

#[cfg(unix)]
fn unlock(file: &File) {
    use rustix::fs::{flock, FlockOperation};
    use std::os::unix::io::AsFd;

    // Closing the descriptor releases the lock as well.
    if let Err(e) = flock(file.as_fd(), FlockOperation::Unlock) {
        tracing::warn!(error = %e, "Failed to release index lock");
    }
}

// Without flock only the in-process writer mutex applies.
#[cfg(not(unix))]
fn lock_exclusive(_file: &File) -> io::Result<()> {
    Ok(())
}

#[cfg(not(unix))]
fn unlock(_file: &File) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_reacquire_after_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.lock");

        let lock = IndexLock::acquire(&path).unwrap();
        drop(lock);
        let _again = IndexLock::acquire(&path).unwrap();
        assert!(path.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_second_holder_waits_for_release() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::Arc;
        use std::time::Duration;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.lock");
        let acquired = Arc::new(AtomicBool::new(false));

        let first = IndexLock::acquire(&path).unwrap();
        let waiter = {
            let path = path.clone();
            let acquired = acquired.clone();
            std::thread::spawn(move || {
                let _second = IndexLock::acquire(&path).unwrap();
                acquired.store(true, Ordering::SeqCst);
            })
        };

        std::thread::sleep(Duration::from_millis(100));
        assert!(!acquired.load(Ordering::SeqCst));

        drop(first);
        waiter.join().unwrap();
        assert!(acquired.load(Ordering::SeqCst));
    }
}
