use super::{dir_prefix, key_segments, ObjectStat, ObjectStore, WriteMode};
use crate::error::{BlobmuxError, Result};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

#[derive(Debug, Clone)]
struct MemoryObject {
    content: Vec<u8>,
    generation: u64,
    modified_at: DateTime<Utc>,
}

/// In-process object store.
///
/// Every operation is atomic and linearizable, and version tokens are
/// generation numbers, so conditional deletes are exact. Useful for tests and
/// for coordinating threads of a single process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: Mutex<HashMap<String, MemoryObject>>,
    generation: AtomicU64,
    pending_failures: AtomicU32,
    operations: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` operations fail with a transient error.
    pub fn fail_next(&self, count: u32) {
        self.pending_failures.store(count, Ordering::SeqCst);
    }

    /// Number of operations attempted so far, including injected failures.
    pub fn operation_count(&self) -> u64 {
        self.operations.load(Ordering::SeqCst)
    }

    fn objects(&self) -> MutexGuard<'_, HashMap<String, MemoryObject>> {
        self.objects.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn begin(&self, op: &str, key: &str) -> Result<()> {
        self.inject(op, key)?;
        key_segments(key)?;
        Ok(())
    }

    fn inject(&self, op: &str, key: &str) -> Result<()> {
        self.operations.fetch_add(1, Ordering::SeqCst);
        let injected = self
            .pending_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            debug!("Injected transient failure: {} {}", op, key);
            return Err(BlobmuxError::transient(key, format!("injected failure during {}", op)));
        }
        Ok(())
    }
}

impl ObjectStore for MemoryStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    fn exists(&self, key: &str) -> Result<bool> {
        self.begin("exists", key)?;
        Ok(self.objects().contains_key(key))
    }

    fn read(&self, key: &str) -> Result<Vec<u8>> {
        self.begin("read", key)?;
        self.objects()
            .get(key)
            .map(|obj| obj.content.clone())
            .ok_or_else(|| BlobmuxError::NotFound(key.to_string()))
    }

    fn write(&self, key: &str, data: &[u8], mode: WriteMode) -> Result<Option<String>> {
        self.begin("write", key)?;
        let mut objects = self.objects();
        if mode == WriteMode::CreateNew && objects.contains_key(key) {
            return Err(BlobmuxError::AlreadyExists(key.to_string()));
        }
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        objects.insert(
            key.to_string(),
            MemoryObject {
                content: data.to_vec(),
                generation,
                modified_at: Utc::now(),
            },
        );
        Ok(Some(generation.to_string()))
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.begin("delete", key)?;
        self.objects().remove(key);
        Ok(())
    }

    fn stat(&self, key: &str) -> Result<ObjectStat> {
        self.begin("stat", key)?;
        self.objects()
            .get(key)
            .map(|obj| ObjectStat {
                modified_at: obj.modified_at,
                version: Some(obj.generation.to_string()),
                size: obj.content.len() as u64,
            })
            .ok_or_else(|| BlobmuxError::NotFound(key.to_string()))
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        // An empty prefix lists the whole store
        self.inject("list", prefix)?;
        let trimmed = prefix.trim_end_matches('/');
        if !trimmed.is_empty() {
            key_segments(trimmed)?;
        }
        let prefix = dir_prefix(trimmed);
        let mut keys: Vec<String> = self
            .objects()
            .keys()
            .filter(|key| key.starts_with(&prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }

    fn delete_if_version(&self, key: &str, version: &str) -> Result<()> {
        self.begin("delete_if_version", key)?;
        let mut objects = self.objects();
        match objects.get(key) {
            None => Err(BlobmuxError::NotFound(key.to_string())),
            Some(obj) if obj.generation.to_string() != version => {
                Err(BlobmuxError::VersionMismatch {
                    key: key.to_string(),
                    expected: version.to_string(),
                })
            }
            Some(_) => {
                objects.remove(key);
                Ok(())
            }
        }
    }
}
