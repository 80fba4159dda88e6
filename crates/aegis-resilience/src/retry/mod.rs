//! Connection-aware retry policy.
//!
//! A failed call is often the fault of one connection, so retrying on the
//! same connection tends to reproduce the failure. The executor reports the
//! connection of every transiently failed attempt back to its
//! [`ConnectionSource`] and borrows a fresh one for the next attempt.

mod context;

pub use context::{ConnectionSource, RetryContext};

use crate::{classify, Failure};
use aegis_core::{CacheError, StoreError};
use futures::future::BoxFuture;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Outcome of an operation the executor gave up on.
#[derive(Debug, Error)]
pub enum RetryError<E: fmt::Display + fmt::Debug> {
    /// Every allowed attempt failed transiently.
    #[error("gave up after {attempts} attempt(s): {last}")]
    Exhausted { attempts: u32, last: E },

    /// An attempt failed with a non-retryable error.
    #[error("non-retryable failure: {0}")]
    Fatal(E),

    /// A single-shot attempt failed transiently and was not retried.
    #[error("transient failure, not retried: {0}")]
    Transient(E),

    /// The caller cancelled the operation.
    #[error("operation cancelled")]
    Cancelled,
}

impl From<RetryError<StoreError>> for CacheError {
    fn from(err: RetryError<StoreError>) -> Self {
        match err {
            RetryError::Exhausted { attempts, last } => Self::RetriesExhausted {
                attempts,
                source: last,
            },
            RetryError::Fatal(e) => Self::Store(e),
            RetryError::Transient(e) => Self::Unavailable(e),
            RetryError::Cancelled => Self::Cancelled,
        }
    }
}

/// Retry policy configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one.
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    pub base_delay: Duration,
    /// Ceiling for any single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mode {
    Retry,
    Once,
}

impl RetryPolicy {
    /// Creates a policy from its three parameters.
    pub const fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
        }
    }

    /// Delay to wait after attempt number `attempt` failed:
    /// `min(base * 2^(attempt-1), max_delay)`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let factor = 2_u32.saturating_pow(attempt - 1);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Runs `op` on borrowed connections until it succeeds, fails fatally,
    /// is cancelled, or `max_attempts` transient failures have happened.
    ///
    /// Cancellation is checked before borrowing, right after borrowing, and
    /// raced against the call and the backoff sleep. It is never retried.
    pub async fn execute<S, T, F>(
        &self,
        source: &S,
        operation: &'static str,
        cancel: &CancellationToken,
        op: F,
    ) -> Result<T, RetryError<S::Error>>
    where
        S: ConnectionSource,
        T: Send,
        F: for<'c> FnMut(&'c mut S::Connection) -> BoxFuture<'c, Result<T, S::Error>> + Send,
    {
        self.run(Mode::Retry, source, operation, cancel, op).await
    }

    /// Runs `op` exactly once on a freshly borrowed connection.
    ///
    /// A transient failure still reports the connection as broken, but is
    /// surfaced immediately as [`RetryError::Transient`].
    pub async fn execute_once<S, T, F>(
        &self,
        source: &S,
        operation: &'static str,
        cancel: &CancellationToken,
        op: F,
    ) -> Result<T, RetryError<S::Error>>
    where
        S: ConnectionSource,
        T: Send,
        F: for<'c> FnMut(&'c mut S::Connection) -> BoxFuture<'c, Result<T, S::Error>> + Send,
    {
        self.run(Mode::Once, source, operation, cancel, op).await
    }

    async fn run<S, T, F>(
        &self,
        mode: Mode,
        source: &S,
        operation: &'static str,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<T, RetryError<S::Error>>
    where
        S: ConnectionSource,
        T: Send,
        F: for<'c> FnMut(&'c mut S::Connection) -> BoxFuture<'c, Result<T, S::Error>> + Send,
    {
        let max_attempts = match mode {
            Mode::Retry => self.max_attempts.max(1),
            Mode::Once => 1,
        };
        let mut ctx = RetryContext::new(operation);

        loop {
            let attempt = ctx.begin_attempt();

            if cancel.is_cancelled() {
                return Err(RetryError::Cancelled);
            }

            let borrowed = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                borrowed = source.borrow() => borrowed,
            };

            let error = match borrowed {
                Ok(connection) => {
                    // Borrowing may have waited on a busy pool.
                    if cancel.is_cancelled() {
                        return Err(RetryError::Cancelled);
                    }

                    let connection = ctx.attach(connection);
                    debug!(
                        operation,
                        attempt,
                        connection_id = source.connection_id(connection),
                        "Store attempt"
                    );

                    let outcome = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => None,
                        result = op(connection) => Some(result),
                    };

                    match outcome {
                        None => return Err(RetryError::Cancelled),
                        Some(Ok(value)) => return Ok(value),
                        Some(Err(e)) => e,
                    }
                }
                Err(e) => e,
            };

            let error = match classify(error) {
                Failure::Fatal(e) => {
                    error!(operation, attempt, error = %e, "Non-retryable store failure");
                    return Err(RetryError::Fatal(e));
                }
                Failure::Transient(e) => e,
            };

            let connection_id = ctx.take_connection().map(|connection| {
                let id = source.connection_id(&connection);
                source.report_failed(connection, &error);
                id
            });

            if attempt >= max_attempts {
                return Err(match mode {
                    Mode::Once => {
                        warn!(operation, connection_id, error = %error, "Transient store failure on fail-fast operation");
                        RetryError::Transient(error)
                    }
                    Mode::Retry => {
                        error!(operation, attempts = attempt, error = %error, "Store retries exhausted");
                        RetryError::Exhausted {
                            attempts: attempt,
                            last: error,
                        }
                    }
                });
            }

            let delay = self.delay_for_attempt(attempt);
            warn!(
                operation,
                attempt,
                connection_id,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %error,
                "Transient store failure, retrying"
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                () = tokio::time::sleep(delay) => {}
            }
        }
    }
}
