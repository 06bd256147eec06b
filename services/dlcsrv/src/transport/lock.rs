//! Cross-process bus lock
//!
//! One serial bus is shared with external maintenance tools, so sessions
//! take an OS advisory lock (`flock`) on a well-known file and hold it for
//! the whole session. Acquisition blocks until the current holder releases,
//! which is why it runs on the blocking pool.

use std::fs::{File, OpenOptions};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{DlcSrvError, Result};

/// Held advisory lock, released on drop
pub struct BusLock {
    file: File,
    path: PathBuf,
}

impl BusLock {
    /// Block until the exclusive lock on `path` is ours
    pub async fn acquire(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let lock_path = path.clone();
        let file = tokio::task::spawn_blocking(move || -> Result<File> {
            let file = OpenOptions::new()
                .create(true)
                .truncate(false)
                .write(true)
                .open(&lock_path)?;
            let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX) };
            if rc != 0 {
                return Err(DlcSrvError::lock(format!(
                    "flock on {} failed: {}",
                    lock_path.display(),
                    std::io::Error::last_os_error()
                )));
            }
            Ok(file)
        })
        .await
        .map_err(|e| DlcSrvError::lock(format!("lock task failed: {e}")))??;

        debug!("bus lock acquired on {}", path.display());
        Ok(Self { file, path })
    }
}

impl Drop for BusLock {
    fn drop(&mut self) {
        let rc = unsafe { libc::flock(self.file.as_raw_fd(), libc::LOCK_UN) };
        if rc != 0 {
            debug!(
                "unlock of {} failed: {}",
                self.path.display(),
                std::io::Error::last_os_error()
            );
        } else {
            debug!("bus lock released on {}", self.path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lock_acquire_and_reacquire() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bus.lock");

        let lock = BusLock::acquire(&path).await.unwrap();
        drop(lock);

        // released lock can be taken again immediately
        let lock = BusLock::acquire(&path).await.unwrap();
        drop(lock);
    }

    #[tokio::test]
    async fn test_lock_blocks_second_holder() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bus.lock");

        let first = BusLock::acquire(&path).await.unwrap();

        let contender = {
            let path = path.clone();
            tokio::spawn(async move { BusLock::acquire(&path).await })
        };

        // the contender must still be waiting while we hold the lock
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!contender.is_finished());

        drop(first);
        let second = contender.await.unwrap();
        assert!(second.is_ok());
    }
}
