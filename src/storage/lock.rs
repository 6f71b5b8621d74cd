//! Rebuild locks.
//!
//! [`MemoryLock`] serializes rebuilds within one process. [`FileLock`]
//! extends that to every process sharing a filesystem: the lock is an
//! exclusively created file, and a lock file older than `stale_after` is
//! treated as abandoned by a crashed holder and broken.

use super::IndexLock;
use crate::core::error::{IndexError, IndexResult};
use parking_lot::{Condvar, Mutex};
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

/// Default time to wait for a held lock.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// In-process rebuild lock with a bounded wait.
#[derive(Debug)]
pub struct MemoryLock {
    held: Mutex<bool>,
    released: Condvar,
    timeout: Duration,
}

impl MemoryLock {
    /// Create an unheld lock that waits up to `timeout` in `acquire`.
    pub fn new(timeout: Duration) -> Self {
        Self {
            held: Mutex::new(false),
            released: Condvar::new(),
            timeout,
        }
    }

    /// Check if the lock is currently held.
    pub fn is_held(&self) -> bool {
        *self.held.lock()
    }
}

impl Default for MemoryLock {
    fn default() -> Self {
        Self::new(DEFAULT_LOCK_TIMEOUT)
    }
}

impl IndexLock for MemoryLock {
    fn acquire(&self) -> IndexResult<bool> {
        let deadline = Instant::now() + self.timeout;
        let mut held = self.held.lock();
        while *held {
            if self.released.wait_until(&mut held, deadline).timed_out() && *held {
                return Ok(false);
            }
        }
        *held = true;
        Ok(true)
    }

    fn release(&self) -> IndexResult<()> {
        *self.held.lock() = false;
        self.released.notify_one();
        Ok(())
    }
}

/// Cross-process rebuild lock based on an exclusively created file.
#[derive(Debug, Clone)]
pub struct FileLock {
    path: PathBuf,
    timeout: Duration,
    stale_after: Duration,
    poll_interval: Duration,
}

impl FileLock {
    /// Create a lock at `path`.
    pub fn new(path: impl Into<PathBuf>, timeout: Duration, stale_after: Duration) -> Self {
        Self {
            path: path.into(),
            timeout,
            stale_after,
            poll_interval: Duration::from_millis(50),
        }
    }

    /// Override how often a held lock is re-checked.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Lock file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn try_create(&self) -> std::io::Result<bool> {
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
        {
            Ok(mut file) => {
                writeln!(file, "{}", std::process::id())?;
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn is_stale(&self) -> bool {
        std::fs::metadata(&self.path)
            .and_then(|meta| meta.modified())
            .ok()
            .and_then(|modified| SystemTime::now().duration_since(modified).ok())
            .map(|age| age > self.stale_after)
            .unwrap_or(false)
    }
}

impl IndexLock for FileLock {
    fn acquire(&self) -> IndexResult<bool> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let deadline = Instant::now() + self.timeout;
        loop {
            if self.try_create()? {
                return Ok(true);
            }
            if self.is_stale() {
                tracing::warn!(
                    path = %self.path.display(),
                    stale_after_ms = self.stale_after.as_millis() as u64,
                    "breaking stale index lock"
                );
                match std::fs::remove_file(&self.path) {
                    Ok(()) => continue,
                    Err(e) if e.kind() == ErrorKind::NotFound => continue,
                    Err(e) => {
                        return Err(IndexError::Lock {
                            message: format!("failed to break stale lock: {}", e),
                        })
                    }
                }
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            std::thread::sleep(self.poll_interval);
        }
    }

    fn release(&self) -> IndexResult<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
