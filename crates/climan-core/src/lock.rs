use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use climan_backend::ClimanError;
use fs2::FileExt;

/// Exclusive advisory lock on a file, held until dropped.
#[derive(Debug)]
pub struct FileLock {
    file: File,
    path: PathBuf,
}

impl FileLock {
    /// Block until the lock at `path` is ours, creating the file if needed.
    ///
    /// # Errors
    /// Returns an IO error when the lock file cannot be opened or locked.
    pub fn acquire(path: &Path) -> Result<Self, ClimanError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ClimanError::io_at("failed to create lock directory", parent, &e))?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)
            .map_err(|e| ClimanError::io_at("failed to open lock file", path, &e))?;

        match file.try_lock_exclusive() {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                log::debug!("Waiting for lock {}", path.display());
                file.lock_exclusive()
                    .map_err(|e| ClimanError::io_at("failed to acquire lock", path, &e))?;
            }
            Err(e) => return Err(ClimanError::io_at("failed to acquire lock", path, &e)),
        }

        // Owner pid is informational only.
        let _ = file
            .set_len(0)
            .and_then(|()| file.seek(SeekFrom::Start(0)).map(|_| ()))
            .and_then(|()| writeln!(file, "{}", std::process::id()));

        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Async wrapper that waits for the lock on the blocking pool.
    ///
    /// # Errors
    /// Same as [`FileLock::acquire`].
    pub async fn acquire_async(path: PathBuf) -> Result<Self, ClimanError> {
        blocking("lock", move || Self::acquire(&path)).await
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Run filesystem work on the blocking pool.
pub(crate) async fn blocking<T, F>(task: &'static str, work: F) -> Result<T, ClimanError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, ClimanError> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| ClimanError::IoError {
            kind: std::io::ErrorKind::Other,
            message: format!("{task} task failed: {e}"),
        })?
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use fs2::FileExt;

    use super::FileLock;

    #[test]
    fn lock_is_exclusive_until_dropped() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let path = temp.path().join("nested").join(".20.11.0.lock");

        let guard = FileLock::acquire(&path).expect("first lock should succeed");
        assert_eq!(guard.path(), path);

        let other = std::fs::File::open(&path).expect("lock file should exist");
        assert!(other.try_lock_exclusive().is_err());

        drop(guard);
        other
            .try_lock_exclusive()
            .expect("lock should be free after drop");
    }

    #[tokio::test]
    async fn async_acquire_waits_for_holder() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let path = temp.path().join("registry.lock");

        let guard = FileLock::acquire(&path).expect("first lock should succeed");
        let released = Arc::new(AtomicBool::new(false));

        let waiter = {
            let released = released.clone();
            let path = path.clone();
            tokio::spawn(async move {
                let _lock = FileLock::acquire_async(path)
                    .await
                    .expect("second lock should succeed");
                released.load(Ordering::SeqCst)
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        released.store(true, Ordering::SeqCst);
        drop(guard);

        assert!(waiter.await.expect("waiter should join"));
    }
}
