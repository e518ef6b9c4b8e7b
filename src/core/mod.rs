//! Core execution helpers.
//!
//! This module contains:
//! - Retry: bounded retry with caller-classified outcomes
//! - Lock: exclusive file locks acquired through the retry executor

pub mod lock;
pub mod retry;

// Re-export commonly used types
pub use lock::{FileLock, LockError, LockSettings};
pub use retry::{
    Attempt, RetryConfigError, RetryError, RetryExecutor, RetryPolicy, Sleeper, ThreadSleeper,
};
