//! Bounded retry with exponential backoff.
//!
//! Used for the startup cache connection only; runtime operations are never
//! retried.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::warn;

use wasmrun_common::CacheConfig;

/// Number of attempts and the delay schedule between them.
///
/// The delay after failed attempt `n` (1-based) is
/// `initial_delay * 2^(n-1)`. A delay follows every failed attempt,
/// including the last one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    attempts: u32,
    initial_delay: Duration,
}

impl RetryPolicy {
    /// Create a policy. At least one attempt is always made.
    pub fn new(attempts: u32, initial_delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            initial_delay,
        }
    }

    /// Total attempts.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// The delay after each failed attempt, in order.
    pub fn delays(&self) -> impl Iterator<Item = Duration> + use<> {
        let initial = self.initial_delay;
        (0..self.attempts).map(move |n| initial.saturating_mul(1u32 << n.min(31)))
    }

    /// Run `operation` until it succeeds or the attempts are used up.
    ///
    /// `operation` receives the 1-based attempt number. The last error is
    /// returned once every attempt has failed.
    pub async fn retry<T, E, F, Fut>(&self, what: &str, mut operation: F) -> Result<T, E>
    where
        E: Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 1;
        let mut delays = self.delays();

        loop {
            let error = match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            let delay = delays.next().unwrap_or(self.initial_delay);
            warn!(
                what,
                attempt,
                max_attempts = self.attempts,
                delay_ms = delay.as_millis(),
                error = %error,
                "Attempt failed"
            );
            tokio::time::sleep(delay).await;

            if attempt >= self.attempts {
                return Err(error);
            }
            attempt += 1;
        }
    }
}

impl Default for RetryPolicy {
    /// Five attempts, delays 1s, 2s, 4s, 8s, 16s.
    fn default() -> Self {
        Self::new(5, Duration::from_secs(1))
    }
}

impl From<&CacheConfig> for RetryPolicy {
    fn from(config: &CacheConfig) -> Self {
        Self::new(config.connect_attempts, config.connect_backoff())
    }
}
