//! Cross-process advisory lock for the state file
//!
//! Separate `ekssm` invocations (e.g. `session stop` racing `session start`)
//! each rewrite the whole state file. The store holds this lock around every
//! load-mutate-save cycle so those rewrites cannot interleave.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::error::{EkssmError, Result};

/// Delay between non-blocking lock attempts
const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// Held exclusive lock; released when dropped (closing the descriptor)
#[derive(Debug)]
pub struct FileLock {
    _file: File,
    path: PathBuf,
}

impl FileLock {
    /// Acquire an exclusive lock on `path`, creating the file if needed.
    ///
    /// Fails with `EkssmError::Lock` if another process holds the lock for
    /// longer than `timeout`. Waiting sleeps the calling thread, so async
    /// callers should run this on the blocking pool.
    pub fn acquire(path: &Path, timeout: Duration) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| EkssmError::write(parent, e))?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| EkssmError::write(path, e))?;

        let deadline = Instant::now() + timeout;
        loop {
            if try_flock_exclusive(&file)? {
                tracing::trace!("Acquired state lock {:?}", path);
                return Ok(Self {
                    _file: file,
                    path: path.to_path_buf(),
                });
            }
            if Instant::now() >= deadline {
                return Err(EkssmError::Lock {
                    path: path.to_path_buf(),
                    timeout,
                });
            }
            std::thread::sleep(LOCK_RETRY_INTERVAL);
        }
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        tracing::trace!("Released state lock {:?}", self.path);
    }
}

/// Try to acquire an exclusive flock on a file (non-blocking).
///
/// Returns `Ok(true)` if the lock was acquired, `Ok(false)` if another open
/// file description holds it.
fn try_flock_exclusive(file: &File) -> io::Result<bool> {
    #[cfg(unix)]
    {
        use std::os::unix::io::AsRawFd;
        // SAFETY: the descriptor is owned by `file` and stays open for the call.
        let result = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if result == 0 {
            return Ok(true);
        }
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::WouldBlock || err.raw_os_error() == Some(libc::EWOULDBLOCK)
        {
            return Ok(false);
        }
        Err(err)
    }
    #[cfg(not(unix))]
    {
        let _ = file;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_acquire_creates_lock_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("state.lock");
        let _lock = FileLock::acquire(&path, Duration::from_millis(100)).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_release_on_drop() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.lock");
        {
            let _lock = FileLock::acquire(&path, Duration::from_millis(100)).unwrap();
        }
        assert!(FileLock::acquire(&path, Duration::from_millis(100)).is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn test_contended_lock_times_out() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.lock");
        let _held = FileLock::acquire(&path, Duration::from_millis(100)).unwrap();

        // A second open file description contends even within one process.
        let err = FileLock::acquire(&path, Duration::from_millis(150)).unwrap_err();
        assert!(matches!(err, EkssmError::Lock { .. }));
    }
}
