// ============================================================================
// Retry Policy
// ============================================================================
//
// Bounded re-attempts with a constant delay. Only failures accepted by the
// retry predicate are retried; anything else propagates on the spot.
//
// NOTE: the whole body is re-run on every attempt, writes included. Bodies
// that are not idempotent can apply their writes twice.
//
// ============================================================================

use crate::connection::config::duration_secs;
use crate::core::{DbError, Result};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Configuration for retry behavior on transient failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total number of invocations of the body, the first one included.
    pub max_attempts: u32,
    /// Constant pause between attempts.
    #[serde(rename = "retry_delay_seconds", with = "duration_secs")]
    pub delay: Duration,
    /// Also retry [`DbError::Connection`] failures.
    pub retry_connection_errors: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(1),
            retry_connection_errors: false,
        }
    }
}

type Predicate<'p> = &'p (dyn Fn(&DbError) -> bool + Send + Sync);

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
            ..Self::default()
        }
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO)
    }

    pub fn retry_connection_errors(mut self, enabled: bool) -> Self {
        self.retry_connection_errors = enabled;
        self
    }

    /// Default retry predicate: transient failures, plus connection failures
    /// when enabled.
    pub fn is_retryable(&self, err: &DbError) -> bool {
        err.is_transient() || (self.retry_connection_errors && err.is_connection())
    }

    /// Attempt tracker using [`is_retryable`](Self::is_retryable).
    pub fn attempts(&self) -> RetryState<'_> {
        RetryState {
            policy: self,
            retryable: None,
            attempt: 1,
        }
    }

    /// Attempt tracker using a caller-supplied predicate.
    pub fn attempts_with<'p>(&'p self, retryable: Predicate<'p>) -> RetryState<'p> {
        RetryState {
            policy: self,
            retryable: Some(retryable),
            attempt: 1,
        }
    }

    /// [`with_retry`] with this policy's default predicate.
    pub async fn run<T, F, Fut>(&self, body: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        drive(self.attempts(), body).await
    }
}

/// Attempt counter for one retried operation.
///
/// Lets a caller drive the policy from its own loop when the body borrows
/// state (such as a connection) that a closure could not hand out per
/// attempt:
///
/// ```ignore
/// let mut attempts = policy.attempts();
/// let rows = loop {
///     match conn.execute(sql, params).await {
///         Ok(rows) => break rows,
///         Err(err) => attempts.on_failure(err).await?,
///     }
/// };
/// ```
pub struct RetryState<'p> {
    policy: &'p RetryPolicy,
    retryable: Option<Predicate<'p>>,
    attempt: u32,
}

impl RetryState<'_> {
    /// 1-based number of the attempt currently running.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Settle a failed attempt.
    ///
    /// Returns `Ok(())` after sleeping the policy delay when another attempt
    /// should run, or gives the error back when it is not retryable or the
    /// attempts are used up.
    pub async fn on_failure(&mut self, err: DbError) -> Result<()> {
        let retryable = match self.retryable {
            Some(predicate) => predicate(&err),
            None => self.policy.is_retryable(&err),
        };

        if !retryable {
            debug!(attempt = self.attempt, error = %err, "failure is not retryable");
            return Err(err);
        }

        let max_attempts = self.policy.max_attempts.max(1);
        if self.attempt >= max_attempts {
            warn!(attempts = self.attempt, error = %err, "giving up after final attempt");
            return Err(err);
        }

        warn!(
            attempt = self.attempt,
            max_attempts,
            error = %err,
            delay = ?self.policy.delay,
            "retrying after failure"
        );
        tokio::time::sleep(self.policy.delay).await;
        self.attempt += 1;
        Ok(())
    }
}

async fn drive<T, F, Fut>(mut state: RetryState<'_>, mut body: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    loop {
        match body().await {
            Ok(value) => return Ok(value),
            Err(err) => state.on_failure(err).await?,
        }
    }
}

/// Invoke `body` until it succeeds, fails with an error `retryable` rejects,
/// or `policy.max_attempts` invocations have been made.
///
/// The delay is an async sleep, so other tasks on the runtime keep running
/// while this operation waits.
pub async fn with_retry<T, F, Fut, P>(policy: &RetryPolicy, retryable: P, body: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    P: Fn(&DbError) -> bool + Send + Sync,
{
    drive(policy.attempts_with(&retryable), body).await
}
