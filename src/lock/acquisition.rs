use super::guard::LockGuard;
use super::record::{expiry, LockRecord};
use crate::error::{BlobmuxError, Result};
use crate::retry::RetryPolicy;
use crate::store::{ObjectStore, WriteMode};
use chrono::{DateTime, Utc};
use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockConfig {
    /// How long a record stays live without being released.
    pub ttl: Duration,
    /// Give up acquiring after this long.
    pub acquire_timeout: Duration,
    /// Wait between attempts while another holder is live.
    pub poll_interval: Duration,
    /// Upper bound of the random delay added to each poll.
    pub poll_jitter: Duration,
    /// Backoff for transient storage errors while acquiring.
    pub retry: RetryPolicy,
    /// Backoff for transient storage errors while releasing.
    pub release_retry: RetryPolicy,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(120),
            acquire_timeout: Duration::from_secs(300),
            poll_interval: Duration::from_millis(100),
            poll_jitter: Duration::from_millis(50),
            retry: RetryPolicy::default(),
            release_retry: RetryPolicy::default(),
        }
    }
}

impl LockConfig {
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_acquire_timeout(mut self, acquire_timeout: Duration) -> Self {
        self.acquire_timeout = acquire_timeout;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_poll_jitter(mut self, poll_jitter: Duration) -> Self {
        self.poll_jitter = poll_jitter;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_release_retry(mut self, release_retry: RetryPolicy) -> Self {
        self.release_retry = release_retry;
        self
    }
}

/// Proof of a successful acquisition, consumed by [`LockManager::release`].
#[derive(Debug)]
pub struct LockHandle {
    key: String,
    holder_id: String,
    version: Option<String>,
    acquired_at: DateTime<Utc>,
    ttl: Duration,
}

impl LockHandle {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn holder_id(&self) -> &str {
        &self.holder_id
    }

    /// Version token the backend returned when the record was created.
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn acquired_at(&self) -> DateTime<Utc> {
        self.acquired_at
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        expiry(self.acquired_at, self.ttl)
    }

    /// Past its ttl, the record may already have been taken over.
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at()
    }
}

/// What the lock record looked like after a failed create.
enum Existing {
    /// Released between our create and our read.
    Vanished,
    Live { holder_id: String, expires_at: DateTime<Utc> },
    Stale { holder_id: String, version: Option<String> },
}

/// Acquires and releases named locks in an object store.
pub struct LockManager {
    store: Arc<dyn ObjectStore>,
    config: LockConfig,
    holder_prefix: String,
    sequence: AtomicU64,
}

impl LockManager {
    pub fn new(store: Arc<dyn ObjectStore>, config: LockConfig) -> Self {
        let nonce = uuid::Uuid::new_v4().simple().to_string();
        Self {
            store,
            config,
            holder_prefix: format!("{}-{}", std::process::id(), &nonce[..12]),
            sequence: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    fn next_holder_id(&self) -> String {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        format!("{}-{}", self.holder_prefix, seq)
    }

    /// Acquire `key` with this manager's configuration.
    pub fn acquire(&self, key: &str) -> Result<LockHandle> {
        self.acquire_with(key, &self.config)
    }

    /// Acquire `key`, waiting up to `config.acquire_timeout` for a live holder
    /// to release it or for its record to expire.
    pub fn acquire_with(&self, key: &str, config: &LockConfig) -> Result<LockHandle> {
        let holder_id = self.next_holder_id();
        debug!(
            "Acquiring lock: {} (holder: {}, ttl: {:?}, timeout: {:?})",
            key, holder_id, config.ttl, config.acquire_timeout
        );

        let start = Instant::now();
        let mut rng = rand::thread_rng();

        loop {
            let record = LockRecord::new(holder_id.as_str(), config.ttl);
            let body = record.encode(key)?;
            let created = config.retry.run("create lock", key, || {
                self.store.write(key, &body, WriteMode::CreateNew)
            });

            match created {
                Ok(version) => {
                    debug!("Lock acquired: {} (holder: {})", key, holder_id);
                    return Ok(LockHandle {
                        key: key.to_string(),
                        holder_id,
                        version,
                        acquired_at: record.acquired_at,
                        ttl: config.ttl,
                    });
                }
                Err(BlobmuxError::AlreadyExists(_)) => {}
                Err(e) => return Err(e),
            }

            let contended = match self.inspect(key, config)? {
                Existing::Vanished => false,
                Existing::Stale { holder_id: stale, version } => {
                    self.take_over(key, &stale, version.as_deref(), config)?;
                    false
                }
                Existing::Live {
                    holder_id: current,
                    expires_at,
                } => {
                    debug!(
                        "Lock {} held by {} until {} (requested by {})",
                        key, current, expires_at, holder_id
                    );
                    true
                }
            };

            let waited = start.elapsed();
            if waited >= config.acquire_timeout {
                return Err(BlobmuxError::LockAcquire {
                    key: key.to_string(),
                    waited,
                });
            }

            if contended {
                let jitter_ms = config.poll_jitter.as_millis() as u64;
                let jitter = if jitter_ms > 0 {
                    Duration::from_millis(rng.gen_range(0..jitter_ms))
                } else {
                    Duration::ZERO
                };
                let remaining = config.acquire_timeout - waited;
                std::thread::sleep((config.poll_interval + jitter).min(remaining));
            }
        }
    }

    fn inspect(&self, key: &str, config: &LockConfig) -> Result<Existing> {
        // Stat before reading: the version we may later delete must never be
        // newer than the body we judged stale.
        let stat = match config.retry.run("stat lock", key, || self.store.stat(key)) {
            Ok(stat) => stat,
            Err(BlobmuxError::NotFound(_)) => return Ok(Existing::Vanished),
            Err(e) => return Err(e),
        };
        let body = match config.retry.run("read lock", key, || self.store.read(key)) {
            Ok(body) => body,
            Err(BlobmuxError::NotFound(_)) => return Ok(Existing::Vanished),
            Err(e) => return Err(e),
        };

        let now = Utc::now();
        match LockRecord::decode(key, &body) {
            Ok(record) if record.is_expired(now) => Ok(Existing::Stale {
                holder_id: record.holder_id,
                version: stat.version,
            }),
            Ok(record) => Ok(Existing::Live {
                expires_at: record.expires_at(),
                holder_id: record.holder_id,
            }),
            Err(e) => {
                // Unreadable records age out from their modification time.
                let expires_at = expiry(stat.modified_at, config.ttl);
                warn!("Unreadable lock record {}: {}", key, e);
                if now > expires_at {
                    Ok(Existing::Stale {
                        holder_id: "<unreadable>".to_string(),
                        version: stat.version,
                    })
                } else {
                    Ok(Existing::Live {
                        holder_id: "<unreadable>".to_string(),
                        expires_at,
                    })
                }
            }
        }
    }

    fn take_over(
        &self,
        key: &str,
        stale_holder: &str,
        version: Option<&str>,
        config: &LockConfig,
    ) -> Result<()> {
        let deleted = config.retry.run("delete stale lock", key, || match version {
            Some(version) => self.store.delete_if_version(key, version),
            None => self.store.delete(key),
        });

        match deleted {
            Ok(()) => {
                info!("Removed expired lock {} (was held by {})", key, stale_holder);
                Ok(())
            }
            // Someone else got there first.
            Err(BlobmuxError::VersionMismatch { .. }) | Err(BlobmuxError::NotFound(_)) => {
                debug!("Lost takeover race on {}", key);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Release a lock after confirming the record is still ours.
    ///
    /// Fails with `LockRelease` and leaves the record alone if it is missing,
    /// owned by another holder, or was rewritten since acquisition.
    pub fn release(&self, handle: LockHandle) -> Result<()> {
        let key = handle.key.as_str();
        let policy = &self.config.release_retry;
        debug!("Releasing lock: {} (holder: {})", key, handle.holder_id);

        let stat = match policy.run("stat lock", key, || self.store.stat(key)) {
            Ok(stat) => stat,
            Err(BlobmuxError::NotFound(_)) => {
                return Err(BlobmuxError::lock_release(key, "lock record is missing"))
            }
            Err(e) => return Err(e),
        };
        let body = match policy.run("read lock", key, || self.store.read(key)) {
            Ok(body) => body,
            Err(BlobmuxError::NotFound(_)) => {
                return Err(BlobmuxError::lock_release(key, "lock record is missing"))
            }
            Err(e) => return Err(e),
        };
        let record = LockRecord::decode(key, &body)
            .map_err(|_| BlobmuxError::lock_release(key, "lock record is unreadable"))?;

        if record.holder_id != handle.holder_id {
            return Err(BlobmuxError::lock_release(
                key,
                format!("lock is now held by {}", record.holder_id),
            ));
        }
        if let Some(expected) = handle.version.as_deref() {
            if stat.version.as_deref() != Some(expected) {
                return Err(BlobmuxError::lock_release(
                    key,
                    "lock record was rewritten since acquisition",
                ));
            }
        }
        if record.is_expired(Utc::now()) {
            warn!(
                "Lock {} held by {} outlived its ttl of {:?}",
                key,
                handle.holder_id,
                record.ttl()
            );
        }

        let deleted = policy.run("delete lock", key, || match stat.version.as_deref() {
            Some(version) => self.store.delete_if_version(key, version),
            None => self.store.delete(key),
        });
        match deleted {
            Ok(()) => {
                debug!("Lock released: {}", key);
                Ok(())
            }
            Err(BlobmuxError::VersionMismatch { .. }) | Err(BlobmuxError::NotFound(_)) => Err(
                BlobmuxError::lock_release(key, "lock record changed during release"),
            ),
            Err(e) => Err(e),
        }
    }

    /// Acquire `key` and return a guard that releases it when dropped.
    pub fn lock(&self, key: &str) -> Result<LockGuard<'_>> {
        let handle = self.acquire(key)?;
        Ok(LockGuard::new(self, handle))
    }

    /// Run `f` while holding `key`, releasing on every exit path.
    ///
    /// If both `f` and the release fail, the error from `f` is returned and
    /// the release failure is logged.
    pub fn with_lock<T, F>(&self, key: &str, f: F) -> Result<T>
    where
        F: FnOnce(&LockHandle) -> Result<T>,
    {
        let guard = self.lock(key)?;
        let outcome = f(guard.handle());
        let released = guard.release();

        match (outcome, released) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(release_err)) => {
                warn!(
                    "Failed to release {} after error '{}': {}",
                    key, e, release_err
                );
                Err(e)
            }
        }
    }
}
