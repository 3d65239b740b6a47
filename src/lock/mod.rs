//! Advisory locks held as marker objects in an [`ObjectStore`](crate::ObjectStore).
//!
//! A lock is a small JSON record created with a create-if-absent write. A
//! record older than its ttl is dead and may be taken over by anyone.
//! Locks only exclude callers that follow this protocol.

mod acquisition;
mod guard;
mod record;

pub use acquisition::{LockConfig, LockHandle, LockManager};
pub use guard::LockGuard;
pub use record::LockRecord;
