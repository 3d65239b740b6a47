use crate::error::{BlobmuxError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Body of a lock marker object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    pub holder_id: String,
    pub acquired_at: DateTime<Utc>,
    pub ttl_ms: u64,
}

impl LockRecord {
    pub fn new(holder_id: impl Into<String>, ttl: Duration) -> Self {
        Self {
            holder_id: holder_id.into(),
            acquired_at: Utc::now(),
            ttl_ms: ttl.as_millis().min(u64::MAX as u128) as u64,
        }
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        expiry(self.acquired_at, self.ttl())
    }

    /// A record is dead once `now` is past `acquired_at + ttl`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at()
    }

    pub fn encode(&self, key: &str) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| BlobmuxError::corrupt(key, e))
    }

    pub fn decode(key: &str, data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data).map_err(|e| BlobmuxError::corrupt(key, e))
    }
}

/// `start + ttl`, saturating at the latest representable instant.
pub(crate) fn expiry(start: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| start.checked_add_signed(ttl))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
