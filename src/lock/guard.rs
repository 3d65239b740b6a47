use super::acquisition::{LockHandle, LockManager};
use crate::error::Result;
use tracing::warn;

/// Scoped ownership of a lock.
///
/// Call [`release`](LockGuard::release) to observe release failures. A guard
/// dropped without it (early return, panic) still releases, logging any
/// failure instead of raising it.
pub struct LockGuard<'a> {
    manager: &'a LockManager,
    handle: Option<LockHandle>,
}

impl<'a> LockGuard<'a> {
    pub(crate) fn new(manager: &'a LockManager, handle: LockHandle) -> Self {
        Self {
            manager,
            handle: Some(handle),
        }
    }

    pub fn handle(&self) -> &LockHandle {
        match self.handle.as_ref() {
            Some(handle) => handle,
            // Only `release` and `drop` take the handle, and both consume self.
            None => unreachable!("lock guard used after release"),
        }
    }

    pub fn release(mut self) -> Result<()> {
        match self.handle.take() {
            Some(handle) => self.manager.release(handle),
            None => Ok(()),
        }
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let key = handle.key().to_string();
            if let Err(e) = self.manager.release(handle) {
                warn!("Failed to release lock {} (non-fatal): {}", key, e);
            }
        }
    }
}
