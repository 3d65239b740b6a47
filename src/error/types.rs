use std::io;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BlobmuxError {
    #[error("Transient storage failure on {key}: {message}")]
    Transient { key: String, message: String },

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Object already exists: {0}")]
    AlreadyExists(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Storage operation on {key} failed: {source}")]
    Storage { key: String, source: io::Error },

    #[error("Version of {key} no longer matches {expected}")]
    VersionMismatch { key: String, expected: String },

    #[error("Failed to acquire lock on {key}: timeout after {waited:?}")]
    LockAcquire { key: String, waited: Duration },

    #[error("Failed to release lock on {key}: {reason}")]
    LockRelease { key: String, reason: String },

    #[error("Corrupt object {key}: {message}")]
    Corrupt { key: String, message: String },

    #[error("Invalid key '{key}': {message}")]
    InvalidKey { key: String, message: String },

    #[error("Invalid read session id '{0}'")]
    InvalidSession(String),

    #[error("Cannot create a multiplexer from an empty sequence")]
    EmptySequence,

    #[error("Invalid duration format '{input}': {message}")]
    InvalidDuration { input: String, message: String },

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("{0}")]
    Other(String),
}

impl BlobmuxError {
    /// Whether the failure is worth retrying locally.
    pub fn is_transient(&self) -> bool {
        match self {
            BlobmuxError::Transient { .. } => true,
            BlobmuxError::Io(e) => is_transient_io(e.kind()),
            _ => false,
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            BlobmuxError::LockAcquire { .. } | BlobmuxError::LockRelease { .. } => 2,
            _ => 1,
        }
    }

    pub fn transient(key: impl Into<String>, message: impl Into<String>) -> Self {
        BlobmuxError::Transient {
            key: key.into(),
            message: message.into(),
        }
    }

    pub fn corrupt(key: impl Into<String>, message: impl ToString) -> Self {
        BlobmuxError::Corrupt {
            key: key.into(),
            message: message.to_string(),
        }
    }

    pub fn lock_release(key: impl Into<String>, reason: impl Into<String>) -> Self {
        BlobmuxError::LockRelease {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Classify an I/O error raised while operating on `key`.
    pub fn from_io(key: &str, e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::NotFound => BlobmuxError::NotFound(key.to_string()),
            io::ErrorKind::AlreadyExists => BlobmuxError::AlreadyExists(key.to_string()),
            io::ErrorKind::PermissionDenied => BlobmuxError::PermissionDenied(key.to_string()),
            kind if is_transient_io(kind) => BlobmuxError::Transient {
                key: key.to_string(),
                message: e.to_string(),
            },
            _ => BlobmuxError::Storage {
                key: key.to_string(),
                source: e,
            },
        }
    }
}

fn is_transient_io(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::Interrupted | io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
    )
}

pub type Result<T> = std::result::Result<T, BlobmuxError>;
