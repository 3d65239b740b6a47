use super::session::{elements_key, ControlState, SessionId, SessionKeys};
use crate::config::MuxConfig;
use crate::error::{BlobmuxError, Result};
use crate::lock::LockManager;
use crate::retry::RetryPolicy;
use crate::store::{ObjectStore, WriteMode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::debug;

pub(crate) fn read_elements(
    store: &dyn ObjectStore,
    location: &str,
    retry: &RetryPolicy,
) -> Result<Vec<Value>> {
    let key = elements_key(location);
    let body = retry.run("read elements", &key, || store.read(&key))?;
    serde_json::from_slice(&body).map_err(|e| BlobmuxError::corrupt(&key, e))
}

pub(crate) fn read_control(
    store: &dyn ObjectStore,
    key: &str,
    retry: &RetryPolicy,
) -> Result<ControlState> {
    let body = retry.run("read control", key, || store.read(key))?;
    ControlState::decode(key, &body)
}

/// Claim the element under the cursor. Must run while holding the session lock.
fn claim_next(
    store: &dyn ObjectStore,
    control_key: &str,
    worker_id: &str,
    retry: &RetryPolicy,
) -> Result<Option<u64>> {
    let state = read_control(store, control_key, retry)?;
    if state.cursor == state.total {
        return Ok(None);
    }

    let next = state.advance(worker_id).encode(control_key)?;
    retry.run("write control", control_key, || {
        store.write(control_key, &next, WriteMode::Overwrite)
    })?;
    Ok(Some(state.cursor))
}

fn default_worker_id() -> String {
    let thread = std::thread::current();
    format!(
        "{} {}",
        std::process::id(),
        thread.name().unwrap_or("unnamed")
    )
}

/// Worker-side view of a read session.
///
/// Each call to [`next_element`](Consumer::next_element) claims the element
/// under the session cursor and advances it, holding the session lock only
/// for that read-modify-write. Elements come out in increasing index order and
/// no index is handed to more than one call across all workers of the
/// session.
///
/// Delivery is at-most-once: the cursor is committed before the element is
/// returned, so a worker that dies between the two loses that element for
/// this session. Nothing is rolled back when a worker simply stops pulling.
///
/// The elements are read once, on the first claim, and kept for the life of
/// the consumer. A location recreated with `overwrite` reuses the primary
/// session name, so attach a fresh consumer after replacing a sequence.
///
/// Also usable as an `Iterator<Item = Result<T>>` that ends at the end of the
/// sequence.
pub struct Consumer<T> {
    store: Arc<dyn ObjectStore>,
    locks: LockManager,
    retry: RetryPolicy,
    session: SessionId,
    keys: SessionKeys,
    worker_id: String,
    elements: Option<Vec<Value>>,
    exhausted: bool,
    _element: PhantomData<fn() -> T>,
}

impl<T> Consumer<T> {
    pub fn attach(store: Arc<dyn ObjectStore>, session: &SessionId, config: &MuxConfig) -> Self {
        Self {
            locks: LockManager::new(store.clone(), config.lock.clone()),
            store,
            retry: config.retry.clone(),
            keys: session.keys(),
            session: session.clone(),
            worker_id: default_worker_id(),
            elements: None,
            exhausted: false,
            _element: PhantomData,
        }
    }

    /// Name recorded in the control object next to each claim.
    pub fn with_worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = worker_id.into();
        self
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn session(&self) -> &SessionId {
        &self.session
    }

    pub fn stat(&self) -> Result<ControlState> {
        read_control(self.store.as_ref(), &self.keys.control, &self.retry)
    }

    pub fn done(&self) -> Result<bool> {
        Ok(self.stat()?.finished)
    }
}

impl<T: DeserializeOwned> Consumer<T> {
    /// Claim the next element, or `None` once the session is exhausted.
    pub fn next_element(&mut self) -> Result<Option<T>> {
        if self.exhausted {
            return Ok(None);
        }

        // The elements object is write-once, so one read per consumer suffices.
        if self.elements.is_none() {
            self.elements = Some(read_elements(
                self.store.as_ref(),
                self.session.location(),
                &self.retry,
            )?);
        }

        let store = self.store.as_ref();
        let control_key = self.keys.control.as_str();
        let worker_id = self.worker_id.as_str();
        let retry = &self.retry;
        let claimed = self.locks.with_lock(&self.keys.lock, |_| {
            claim_next(store, control_key, worker_id, retry)
        })?;

        let Some(index) = claimed else {
            debug!("Session {} exhausted for {}", self.session.session(), self.worker_id);
            self.exhausted = true;
            return Ok(None);
        };

        let elements_key = elements_key(self.session.location());
        let value = self
            .elements
            .as_ref()
            .and_then(|values| values.get(index as usize))
            .ok_or_else(|| {
                BlobmuxError::corrupt(&elements_key, format!("no element at index {}", index))
            })?;
        debug!("{} claimed element {}", self.worker_id, index);
        serde_json::from_value(value.clone())
            .map(Some)
            .map_err(|e| BlobmuxError::corrupt(&elements_key, e))
    }
}

impl<T: DeserializeOwned> Iterator for Consumer<T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_element().transpose()
    }
}
