//! Advisory locks and a shared work queue on top of plain object stores.
//!
//! Everything here is built from single-key operations of an
//! [`ObjectStore`]: create-if-absent, read, overwrite, delete. [`LockManager`]
//! turns create-if-absent into an expiring mutual-exclusion marker, and
//! [`Multiplexer`] uses it to let many workers drain a fixed sequence with
//! each element delivered at most once.

pub mod config;
pub mod error;
pub mod housekeep;
pub mod lock;
pub mod mux;
pub mod retry;
pub mod store;
pub mod utils;

pub use config::MuxConfig;
pub use error::{BlobmuxError, Result};
pub use lock::{LockConfig, LockGuard, LockHandle, LockManager, LockRecord};
pub use mux::{ControlState, Consumer, Multiplexer, MuxOptions, SessionId};
pub use retry::RetryPolicy;
pub use store::{LocalStore, MemoryStore, ObjectStat, ObjectStore, WriteMode};
