//! Bounded retry with a fixed delay.
//!
//! The executor never decides on its own whether a failure is worth
//! retrying. Each attempt reports one of three outcomes:
//! - `Success`: return the value, no further attempts
//! - `Retryable`: consume an attempt, sleep, try again
//! - `Fatal`: surface immediately, remaining attempts are skipped
//!
//! Call sites that only see a raw response (an HTTP status, a lock
//! result) pass a classifier to [`RetryExecutor::run_classified`].

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// Outcome of a single attempt
#[derive(Debug, Clone, PartialEq)]
pub enum Attempt<T, E> {
    /// The operation produced its result
    Success(T),

    /// Transient failure; worth another try
    Retryable(E),

    /// Permanent failure; stop now
    Fatal(E),
}

impl<T, E> Attempt<T, E> {
    /// Classify a `Result` treating every error as transient
    pub fn retry_on_err(result: Result<T, E>) -> Self {
        match result {
            Ok(value) => Attempt::Success(value),
            Err(e) => Attempt::Retryable(e),
        }
    }

    /// Classify a `Result` treating every error as permanent
    pub fn fatal_on_err(result: Result<T, E>) -> Self {
        match result {
            Ok(value) => Attempt::Success(value),
            Err(e) => Attempt::Fatal(e),
        }
    }
}

/// Retry bound and delay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Fixed delay between attempts in milliseconds (default: 2000)
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_delay_ms() -> u64 {
    2000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            delay_ms: default_delay_ms(),
        }
    }
}

impl RetryPolicy {
    /// Build a validated policy
    ///
    /// `delay` must be a whole number of milliseconds that fits in `u64`.
    pub fn new(max_attempts: u32, delay: Duration) -> Result<Self, RetryConfigError> {
        let delay_ms = u64::try_from(delay.as_millis())
            .ok()
            .filter(|_| delay.subsec_nanos() % 1_000_000 == 0)
            .ok_or(RetryConfigError::InexactDelay(delay))?;
        let policy = Self {
            max_attempts,
            delay_ms,
        };
        policy.validate()?;
        Ok(policy)
    }

    /// Reject policies that can never make an attempt
    pub fn validate(&self) -> Result<(), RetryConfigError> {
        if self.max_attempts == 0 {
            return Err(RetryConfigError::ZeroAttempts);
        }
        Ok(())
    }

    /// Delay slept after a retryable failure
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    /// Whether another attempt may follow attempt `attempt` (1-indexed)
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// Invalid retry policy
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RetryConfigError {
    #[error("Retry policy must allow at least one attempt (max_attempts = 0)")]
    ZeroAttempts,

    #[error("Retry delay {0:?} is not a whole number of milliseconds")]
    InexactDelay(Duration),
}

/// Failure surfaced by the executor
///
/// The wrapped error is the one the operation produced, untouched.
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// Every attempt failed with a retryable error
    #[error("Failed after {attempts} attempts: {last_error}")]
    Exhausted {
        attempts: u32,
        #[source]
        last_error: E,
    },

    /// An attempt failed with a fatal error
    #[error("Fatal failure on attempt {attempt}: {error}")]
    Fatal {
        attempt: u32,
        #[source]
        error: E,
    },
}

impl<E> RetryError<E> {
    /// Number of attempts made before giving up
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Exhausted { attempts, .. } => *attempts,
            RetryError::Fatal { attempt, .. } => *attempt,
        }
    }

    /// Whether the executor stopped because of a fatal classification
    pub fn is_fatal(&self) -> bool {
        matches!(self, RetryError::Fatal { .. })
    }

    /// Borrow the underlying failure
    pub fn inner(&self) -> &E {
        match self {
            RetryError::Exhausted { last_error, .. } => last_error,
            RetryError::Fatal { error, .. } => error,
        }
    }

    /// Take the underlying failure, unmodified
    pub fn into_inner(self) -> E {
        match self {
            RetryError::Exhausted { last_error, .. } => last_error,
            RetryError::Fatal { error, .. } => error,
        }
    }
}

/// Blocking wait between attempts
pub trait Sleeper {
    fn sleep(&self, delay: Duration);
}

impl<S: Sleeper + ?Sized> Sleeper for &S {
    fn sleep(&self, delay: Duration) {
        (**self).sleep(delay)
    }
}

/// Sleeps the calling thread
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, delay: Duration) {
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
    }
}

/// Runs an operation under a [`RetryPolicy`]
#[derive(Debug, Clone)]
pub struct RetryExecutor<S = ThreadSleeper> {
    policy: RetryPolicy,
    sleeper: S,
}

impl RetryExecutor<ThreadSleeper> {
    /// Create an executor that sleeps the calling thread
    pub fn new(policy: RetryPolicy) -> Result<Self, RetryConfigError> {
        Self::with_sleeper(policy, ThreadSleeper)
    }
}

impl<S: Sleeper> RetryExecutor<S> {
    /// Create an executor with a custom sleeper
    pub fn with_sleeper(policy: RetryPolicy, sleeper: S) -> Result<Self, RetryConfigError> {
        policy.validate()?;
        Ok(Self { policy, sleeper })
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `op` until it succeeds, fails fatally, or runs out of attempts
    pub fn run<T, E, F>(&self, mut op: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Attempt<T, E>,
        E: Display,
    {
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            match op() {
                Attempt::Success(value) => {
                    if attempt > 1 {
                        debug!(attempt, "Operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Attempt::Fatal(error) => {
                    warn!(attempt, error = %error, "Operation failed fatally");
                    return Err(RetryError::Fatal { attempt, error });
                }
                Attempt::Retryable(error) => {
                    if !self.policy.should_retry(attempt) {
                        warn!(
                            attempt,
                            max_attempts = self.policy.max_attempts,
                            error = %error,
                            "Operation failed, no attempts left"
                        );
                        return Err(RetryError::Exhausted {
                            attempts: attempt,
                            last_error: error,
                        });
                    }

                    let delay = self.policy.delay();
                    warn!(
                        attempt,
                        max_attempts = self.policy.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Operation failed, retrying"
                    );
                    self.sleeper.sleep(delay);
                }
            }
        }
    }

    /// Run a raw operation and let `classify` decide each outcome
    pub fn run_classified<R, T, E, F, C>(&self, mut op: F, classify: C) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> R,
        C: Fn(R) -> Attempt<T, E>,
        E: Display,
    {
        self.run(|| classify(op()))
    }

    /// Run a fallible operation, retrying every error
    pub fn run_result<T, E, F>(&self, mut op: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Result<T, E>,
        E: Display,
    {
        self.run(|| Attempt::retry_on_err(op()))
    }

    /// Async twin of [`run`](Self::run); waits with `tokio::time::sleep`
    pub async fn run_async<T, E, F, Fut>(&self, mut op: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Attempt<T, E>>,
        E: Display,
    {
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            match op().await {
                Attempt::Success(value) => {
                    if attempt > 1 {
                        debug!(attempt, "Operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Attempt::Fatal(error) => {
                    warn!(attempt, error = %error, "Operation failed fatally");
                    return Err(RetryError::Fatal { attempt, error });
                }
                Attempt::Retryable(error) => {
                    if !self.policy.should_retry(attempt) {
                        warn!(
                            attempt,
                            max_attempts = self.policy.max_attempts,
                            error = %error,
                            "Operation failed, no attempts left"
                        );
                        return Err(RetryError::Exhausted {
                            attempts: attempt,
                            last_error: error,
                        });
                    }

                    let delay = self.policy.delay();
                    warn!(
                        attempt,
                        max_attempts = self.policy.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Operation failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
