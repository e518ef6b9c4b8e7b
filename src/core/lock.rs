//! Exclusive file locks acquired by polling.
//!
//! Jobs that share an output file serialize on a `<name>.lock` file in
//! the work directory. A held lock is a transient condition, so acquiring
//! goes through the [`RetryExecutor`] with the poll interval as its delay.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use fs2::FileExt;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use super::retry::{Attempt, RetryError, RetryExecutor, RetryPolicy};

/// Extension appended to the locked resource name
pub const LOCK_FILE_EXTENSION: &str = ".lock";

/// How long to wait for a lock
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockSettings {
    /// Give up after roughly this many seconds (default: 60)
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,

    /// Interval between acquisition attempts in milliseconds (default: 5000)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_timeout_seconds() -> u64 {
    60
}
fn default_poll_interval_ms() -> u64 {
    5000
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            timeout_seconds: default_timeout_seconds(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl LockSettings {
    /// Translate the timeout into a bounded retry policy
    ///
    /// One initial attempt plus `ceil(timeout / interval)` retries.
    pub fn retry_policy(&self) -> Result<RetryPolicy, LockError> {
        if self.timeout_seconds == 0 {
            return Err(LockError::InvalidSettings(
                "timeout_seconds must be greater than 0".to_string(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(LockError::InvalidSettings(
                "poll_interval_ms must be greater than 0".to_string(),
            ));
        }

        let timeout_ms = self.timeout_seconds.saturating_mul(1000);
        let retries = timeout_ms.div_ceil(self.poll_interval_ms);
        let max_attempts = u32::try_from(retries.saturating_add(1)).unwrap_or(u32::MAX);

        RetryPolicy::new(max_attempts, Duration::from_millis(self.poll_interval_ms))
            .map_err(|e| LockError::InvalidSettings(e.to_string()))
    }
}

/// Lock acquisition failures
#[derive(Debug, Error)]
pub enum LockError {
    #[error("Invalid lock settings: {0}")]
    InvalidSettings(String),

    #[error("Lock {} still held after {attempts} attempts", path.display())]
    Contended { path: PathBuf, attempts: u32 },

    #[error("Lock file error: {0}")]
    Io(#[from] io::Error),
}

/// A held exclusive lock; released on [`release`](Self::release) or drop
#[derive(Debug)]
pub struct FileLock {
    path: PathBuf,
    file: File,
}

impl FileLock {
    /// Lock file path for a resource name inside `dir`
    pub fn path_for(dir: &Path, name: &str) -> PathBuf {
        dir.join(format!("{}{}", name, LOCK_FILE_EXTENSION))
    }

    /// Make one acquisition attempt
    ///
    /// Contention is retryable; anything else (missing directory,
    /// permissions) is fatal.
    pub fn try_acquire(path: &Path) -> Attempt<FileLock, io::Error> {
        let file = match OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
        {
            Ok(file) => file,
            Err(e) => return Attempt::Fatal(e),
        };

        match file.try_lock_exclusive() {
            Ok(()) => Attempt::Success(FileLock {
                path: path.to_path_buf(),
                file,
            }),
            Err(e) if is_contended(&e) => Attempt::Retryable(e),
            Err(e) => Attempt::Fatal(e),
        }
    }

    /// Acquire the lock, blocking between attempts
    pub fn acquire(path: &Path, settings: &LockSettings) -> Result<FileLock, LockError> {
        let executor = RetryExecutor::new(settings.retry_policy()?)
            .map_err(|e| LockError::InvalidSettings(e.to_string()))?;

        debug!(path = %path.display(), "Acquiring file lock");
        let lock = executor
            .run(|| Self::try_acquire(path))
            .map_err(|e| lock_error(path, e))?;
        info!(path = %path.display(), "File lock acquired");
        Ok(lock)
    }

    /// Acquire the lock without blocking the runtime between attempts
    pub async fn acquire_async(path: &Path, settings: &LockSettings) -> Result<FileLock, LockError> {
        let executor = RetryExecutor::new(settings.retry_policy()?)
            .map_err(|e| LockError::InvalidSettings(e.to_string()))?;

        debug!(path = %path.display(), "Acquiring file lock");
        let lock = executor
            .run_async(move || async move { Self::try_acquire(path) })
            .await
            .map_err(|e| lock_error(path, e))?;
        info!(path = %path.display(), "File lock acquired");
        Ok(lock)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release the lock explicitly
    pub fn release(self) -> Result<(), LockError> {
        self.file.unlock()?;
        info!(path = %self.path.display(), "File lock released");
        Ok(())
    }
}

fn is_contended(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::WouldBlock
        || e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

fn lock_error(path: &Path, e: RetryError<io::Error>) -> LockError {
    match e {
        RetryError::Exhausted { attempts, .. } => LockError::Contended {
            path: path.to_path_buf(),
            attempts,
        },
        RetryError::Fatal { error, .. } => LockError::Io(error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_retry_policy_from_settings() {
        let settings = LockSettings {
            timeout_seconds: 12,
            poll_interval_ms: 5000,
        };
        let policy = settings.retry_policy().unwrap();
        // ceil(12000 / 5000) = 3 retries after the first attempt
        assert_eq!(policy.max_attempts, 4);
        assert_eq!(policy.delay(), Duration::from_secs(5));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let settings = LockSettings {
            timeout_seconds: 0,
            ..Default::default()
        };
        assert!(matches!(
            settings.retry_policy(),
            Err(LockError::InvalidSettings(_))
        ));
    }

    #[test]
    fn test_path_for() {
        let path = FileLock::path_for(Path::new("/tmp/work"), "daily_report.csv");
        assert_eq!(path, PathBuf::from("/tmp/work/daily_report.csv.lock"));
    }

    #[test]
    fn test_missing_directory_is_fatal() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("missing").join("x.lock");
        assert!(matches!(FileLock::try_acquire(&path), Attempt::Fatal(_)));
    }
}
