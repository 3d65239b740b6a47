use crate::error::Result;
use rand::Rng;
use std::time::Duration;
use tracing::debug;

/// Bounded exponential backoff for transient storage failures.
///
/// Only errors reporting [`is_transient`](crate::BlobmuxError::is_transient)
/// are retried; anything else is returned on the first occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Upper bound of the random delay added to every backoff step.
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
            jitter: Duration::from_millis(50),
        }
    }
}

impl RetryPolicy {
    /// A single attempt, no retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay before retry number `retry` (0-based), without jitter.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Run `op`, retrying transient failures.
    pub fn run<T, F>(&self, op_name: &str, key: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Result<T>,
    {
        let mut rng = rand::thread_rng();
        let mut attempt = 1;

        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    let jitter_ms = self.jitter.as_millis() as u64;
                    let jitter = if jitter_ms > 0 {
                        Duration::from_millis(rng.gen_range(0..jitter_ms))
                    } else {
                        Duration::ZERO
                    };
                    let sleep_time = self.backoff(attempt - 1) + jitter;
                    debug!(
                        "{} {} failed (attempt {}/{}), retrying in {:?}: {}",
                        op_name, key, attempt, self.max_attempts, sleep_time, e
                    );
                    std::thread::sleep(sleep_time);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
