use crate::error::{BlobmuxError, Result};
use crate::lock::LockRecord;
use crate::store::ObjectStore;
use chrono::Utc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Default)]
pub struct CleanLockConfig {
    /// Report what would be removed without deleting anything.
    pub dry_run: bool,
}

/// Remove expired lock records below `prefix`.
///
/// Returns the keys that were removed (or would be, in a dry run). Records
/// that cannot be read or parsed are skipped; their owners' ttl still applies
/// at the next acquisition.
pub fn clean_stale_locks(
    store: &dyn ObjectStore,
    prefix: &str,
    config: &CleanLockConfig,
) -> Result<Vec<String>> {
    let mut cleaned = Vec::new();

    for key in store.list(prefix)? {
        if !is_lock_key(&key) {
            continue;
        }
        match is_orphaned(store, &key) {
            Ok(Some(version)) => {
                if config.dry_run {
                    debug!("Would remove lock: {}", key);
                    cleaned.push(key);
                    continue;
                }
                let removed = match version {
                    Some(version) => store.delete_if_version(&key, &version),
                    None => store.delete(&key),
                };
                match removed {
                    Ok(()) => {
                        debug!("Removed expired lock: {}", key);
                        cleaned.push(key);
                    }
                    Err(BlobmuxError::NotFound(_)) | Err(BlobmuxError::VersionMismatch { .. }) => {
                        // Released or taken over since we looked
                        debug!("Lock changed while cleaning, skipping: {}", key);
                    }
                    Err(e) => {
                        warn!("Failed to remove lock {}: {}", key, e);
                    }
                }
            }
            Ok(None) => {
                debug!("Lock in use, skipping: {}", key);
            }
            Err(e) => {
                warn!("Error checking lock {}: {}", key, e);
            }
        }
    }

    Ok(cleaned)
}

fn is_lock_key(key: &str) -> bool {
    let name = key.rsplit('/').next().unwrap_or(key);
    name == "lock" || name.ends_with(".lock")
}

/// `Some(version)` when the record at `key` is expired.
fn is_orphaned(store: &dyn ObjectStore, key: &str) -> Result<Option<Option<String>>> {
    let stat = store.stat(key)?;
    let record = LockRecord::decode(key, &store.read(key)?)?;
    if record.is_expired(Utc::now()) {
        Ok(Some(stat.version))
    } else {
        Ok(None)
    }
}
