//! The storage primitive every coordination protocol in this crate is built on.
//!
//! A backend exposes single-key operations only. The one atomic guarantee the
//! lock protocol relies on is [`WriteMode::CreateNew`]: a create that fails
//! with [`BlobmuxError::AlreadyExists`] when the key is already present.

mod local;
mod memory;

pub use local::LocalStore;
pub use memory::MemoryStore;

use crate::error::{BlobmuxError, Result};
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Replace whatever is stored at the key.
    Overwrite,
    /// Fail with `AlreadyExists` if the key is present.
    CreateNew,
}

/// Metadata of a stored object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectStat {
    pub modified_at: DateTime<Utc>,
    /// Backend-specific token that changes whenever the object is rewritten.
    pub version: Option<String>,
    pub size: u64,
}

/// Single-key object storage.
///
/// Calls block until the backend answers. Implementations must be usable from
/// many threads at once; no ordering is assumed across different keys.
pub trait ObjectStore: Send + Sync {
    /// Backend identifier, e.g. "memory" or "local".
    fn backend_name(&self) -> &'static str;

    fn exists(&self, key: &str) -> Result<bool>;

    /// Read the full content, failing `NotFound` if absent.
    fn read(&self, key: &str) -> Result<Vec<u8>>;

    /// Store `data` at `key` and return the new version token, if any.
    ///
    /// Readers never observe a partially written object.
    fn write(&self, key: &str, data: &[u8], mode: WriteMode) -> Result<Option<String>>;

    /// Delete `key`. Deleting an absent key succeeds.
    fn delete(&self, key: &str) -> Result<()>;

    fn stat(&self, key: &str) -> Result<ObjectStat>;

    /// All keys strictly below `prefix`, sorted.
    fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Delete `key` only if its current version is `version`.
    ///
    /// The default checks with `stat` and then deletes, which leaves a short
    /// window in which a concurrent rewrite can be removed. Backends with a
    /// native conditional delete should override it.
    fn delete_if_version(&self, key: &str, version: &str) -> Result<()> {
        let stat = self.stat(key)?;
        if stat.version.as_deref() != Some(version) {
            return Err(BlobmuxError::VersionMismatch {
                key: key.to_string(),
                expected: version.to_string(),
            });
        }
        self.delete(key)
    }
}

/// Join path-like key segments with `/`, ignoring stray separators.
pub fn join_key(base: &str, name: &str) -> String {
    let base = base.trim_end_matches('/');
    let name = name.trim_start_matches('/');
    if base.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", base, name)
    }
}

/// Split a key into its segments, rejecting anything that is not a plain
/// relative path.
pub fn key_segments(key: &str) -> Result<Vec<&str>> {
    let invalid = |message: &str| BlobmuxError::InvalidKey {
        key: key.to_string(),
        message: message.to_string(),
    };

    if key.is_empty() {
        return Err(invalid("empty key"));
    }
    if key.starts_with('/') {
        return Err(invalid("keys are relative and must not start with '/'"));
    }
    if key.contains('\\') || key.contains('\0') {
        return Err(invalid("keys must not contain '\\' or NUL"));
    }

    let segments: Vec<&str> = key.split('/').collect();
    for segment in &segments {
        match *segment {
            "" => return Err(invalid("empty path segment")),
            "." | ".." => return Err(invalid("'.' and '..' segments are not allowed")),
            _ => {}
        }
    }
    Ok(segments)
}

/// Normalize a listing prefix to end with exactly one `/`.
pub(crate) fn dir_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim_end_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{}/", trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_key() {
        assert_eq!(join_key("jobs/run1", "control"), "jobs/run1/control");
        assert_eq!(join_key("jobs/run1/", "/control"), "jobs/run1/control");
        assert_eq!(join_key("", "control"), "control");
    }

    #[test]
    fn test_key_segments_rejects_traversal() {
        assert!(key_segments("a/../b").is_err());
        assert!(key_segments("/abs").is_err());
        assert!(key_segments("a//b").is_err());
        assert!(key_segments("").is_err());
        assert_eq!(key_segments("a/b/c").unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_dir_prefix() {
        assert_eq!(dir_prefix("a/b"), "a/b/");
        assert_eq!(dir_prefix("a/b///"), "a/b/");
        assert_eq!(dir_prefix(""), "");
    }
}
