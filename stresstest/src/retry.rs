//! Bounded retries with a fixed delay.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How often an operation is attempted, and how long to wait in between.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one. Zero is treated as one.
    pub max_attempts: u32,
    /// Pause after every failed attempt except the last one.
    #[serde(with = "humantime_serde")]
    pub delay: Duration,
}

impl RetryPolicy {
    /// Creates a policy with the given number of attempts and delay.
    pub const fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    /// A policy that never retries.
    pub const fn once() -> Self {
        Self::new(1, Duration::ZERO)
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

impl Default for RetryPolicy {
    /// Ten attempts, one second apart.
    fn default() -> Self {
        Self::new(10, Duration::from_secs(1))
    }
}

/// Runs `op` until it succeeds or the policy is exhausted, returning the last error.
///
/// `op` receives the 1-based attempt number. Every failure is logged along with `operation` and
/// `target`.
pub async fn retry<T, E, F, Fut>(
    policy: RetryPolicy,
    operation: &str,
    target: &str,
    mut op: F,
) -> Result<T, E>
where
    E: fmt::Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let attempts = policy.attempts();
    let mut attempt = 1;

    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(error) if attempt < attempts => {
                tracing::warn!(operation, target, attempt, %error, "attempt failed, retrying");
                tokio::time::sleep(policy.delay).await;
                attempt += 1;
            }
            Err(error) => {
                tracing::warn!(operation, target, attempt, %error, "giving up");
                return Err(error);
            }
        }
    }
}
