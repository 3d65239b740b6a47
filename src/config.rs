use crate::lock::LockConfig;
use crate::retry::RetryPolicy;

/// Tunables shared by coordinators and workers of a multiplexer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MuxConfig {
    /// Settings of the lock guarding each read session's control object.
    pub lock: LockConfig,
    /// Backoff for transient failures on element and control reads/writes.
    pub retry: RetryPolicy,
}

impl MuxConfig {
    pub fn with_lock(mut self, lock: LockConfig) -> Self {
        self.lock = lock;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_defaults_favor_short_polls_and_long_ttl() {
        let config = MuxConfig::default();
        assert!(config.lock.poll_interval <= Duration::from_millis(250));
        assert!(config.lock.ttl >= Duration::from_secs(60));
        assert!(config.lock.ttl > config.lock.poll_interval * 100);
        assert!(config.retry.max_attempts > 1);
    }
}
