//! Work distribution over a write-once sequence.
//!
//! A coordinator stores a fixed list of elements once with
//! [`Multiplexer::new`] and hands out [`SessionId`]s. Any number of workers,
//! in any process or machine that can reach the same store, attach a
//! [`Consumer`] to a session and pull elements until the sequence is
//! exhausted. Each element of a session goes to at most one worker.
//!
//! Layout under `location`:
//!
//! ```text
//! <location>/elements                    write-once JSON array
//! <location>/control                     cursor of the primary session
//! <location>/lock                        lock guarding that cursor
//! <location>/sessions/<name>/control     cursor of an extra session
//! <location>/sessions/<name>/lock
//! ```

mod consumer;
mod session;

pub use consumer::Consumer;
pub use session::{ControlState, SessionId, PRIMARY_SESSION};

use crate::config::MuxConfig;
use crate::error::{BlobmuxError, Result};
use crate::lock::LockManager;
use crate::retry::RetryPolicy;
use crate::store::{key_segments, ObjectStore, WriteMode};
use serde::Serialize;
use session::{elements_key, SessionKeys};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default)]
pub struct MuxOptions {
    /// Replace whatever is stored at the location instead of failing.
    pub overwrite: bool,
    pub config: MuxConfig,
}

impl MuxOptions {
    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn with_config(mut self, config: MuxConfig) -> Self {
        self.config = config;
        self
    }
}

/// Coordinator-side handle of a stored sequence.
pub struct Multiplexer {
    store: Arc<dyn ObjectStore>,
    location: String,
    config: MuxConfig,
    locks: LockManager,
}

impl std::fmt::Debug for Multiplexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Multiplexer")
            .field("location", &self.location)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Multiplexer {
    fn attach(store: Arc<dyn ObjectStore>, location: &str, config: MuxConfig) -> Self {
        let locks = LockManager::new(store.clone(), config.lock.clone());
        Self {
            store,
            location: location.trim_end_matches('/').to_string(),
            config,
            locks,
        }
    }

    /// Store `elements` at `location` and open the primary read session.
    ///
    /// Fails with `AlreadyExists` if the location already holds a sequence,
    /// unless `options.overwrite` is set, and with `EmptySequence` if there is
    /// nothing to distribute.
    pub fn new<T, I>(
        store: Arc<dyn ObjectStore>,
        elements: I,
        location: &str,
        options: &MuxOptions,
    ) -> Result<Self>
    where
        T: Serialize,
        I: IntoIterator<Item = T>,
    {
        let mux = Self::attach(store, location, options.config.clone());
        key_segments(&mux.location)?;

        let elements_key = elements_key(&mux.location);
        let values = elements
            .into_iter()
            .map(serde_json::to_value)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| BlobmuxError::corrupt(&elements_key, e))?;
        if values.is_empty() {
            return Err(BlobmuxError::EmptySequence);
        }
        let total = values.len() as u64;
        let body =
            serde_json::to_vec(&values).map_err(|e| BlobmuxError::corrupt(&elements_key, e))?;

        if options.overwrite {
            let removed =
                Self::destroy_location(mux.store.as_ref(), &mux.location, &mux.config.retry)?;
            if removed > 0 {
                debug!("Overwriting {} objects at {}", removed, mux.location);
            }
        }

        mux.config.retry.run("write elements", &elements_key, || {
            mux.store.write(&elements_key, &body, WriteMode::CreateNew)
        })?;

        let keys = SessionKeys::for_session(&mux.location, PRIMARY_SESSION);
        let initialized = mux.locks.with_lock(&keys.lock, |_| {
            let control = ControlState::new(total).encode(&keys.control)?;
            mux.config.retry.run("write control", &keys.control, || {
                mux.store.write(&keys.control, &control, WriteMode::Overwrite)
            })?;
            Ok(())
        });
        if let Err(e) = initialized {
            // Elements without a control object would block the location for good
            let removed = mux.config.retry.run("delete elements", &elements_key, || {
                mux.store.delete(&elements_key)
            });
            if let Err(cleanup) = removed {
                warn!(
                    "Failed to remove {} after failed create: {}",
                    elements_key, cleanup
                );
            }
            return Err(e);
        }

        info!(
            "Created multiplexer at {} with {} elements ({} backend)",
            mux.location,
            total,
            mux.store.backend_name()
        );
        Ok(mux)
    }

    /// Re-attach to a sequence stored earlier.
    pub fn open(store: Arc<dyn ObjectStore>, location: &str, config: MuxConfig) -> Result<Self> {
        let mux = Self::attach(store, location, config);
        key_segments(&mux.location)?;
        let elements_key = elements_key(&mux.location);
        let exists = mux
            .config
            .retry
            .run("check elements", &elements_key, || mux.store.exists(&elements_key))?;
        if !exists {
            return Err(BlobmuxError::NotFound(elements_key));
        }
        Ok(mux)
    }

    /// Attach to the multiplexer a session belongs to.
    pub fn from_session(
        store: Arc<dyn ObjectStore>,
        session: &SessionId,
        config: MuxConfig,
    ) -> Result<Self> {
        Self::open(store, session.location(), config)
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn config(&self) -> &MuxConfig {
        &self.config
    }

    /// The read session initialized by [`new`](Multiplexer::new).
    pub fn session_id(&self) -> SessionId {
        SessionId::new(&self.location, PRIMARY_SESSION)
    }

    /// Start an independent read session over the same elements.
    ///
    /// Workers holding the returned id split the elements between them,
    /// regardless of any other session's progress.
    pub fn create_read_session(&self) -> Result<SessionId> {
        let total = self.len()? as u64;
        let nonce = uuid::Uuid::new_v4().simple().to_string();
        let name = format!(
            "{}-{}",
            chrono::Utc::now().format("%Y%m%dT%H%M%S%3fZ"),
            &nonce[..8]
        );
        let session = SessionId::new(&self.location, &name);
        let keys = session.keys();

        let control = ControlState::new(total).encode(&keys.control)?;
        self.config.retry.run("write control", &keys.control, || {
            self.store.write(&keys.control, &control, WriteMode::CreateNew)
        })?;

        debug!("Created read session {} at {}", name, self.location);
        Ok(session)
    }

    /// Number of stored elements.
    pub fn len(&self) -> Result<usize> {
        Ok(consumer::read_elements(self.store.as_ref(), &self.location, &self.config.retry)?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Current cursor state of `session`.
    pub fn stat(&self, session: &SessionId) -> Result<ControlState> {
        if session.location() != self.location {
            return Err(BlobmuxError::InvalidSession(session.to_string()));
        }
        consumer::read_control(self.store.as_ref(), &session.keys().control, &self.config.retry)
    }

    /// Whether every element of `session` has been handed out.
    pub fn done(&self, session: &SessionId) -> Result<bool> {
        Ok(self.stat(session)?.finished)
    }

    /// Consumer of `session` sharing this handle's store and configuration.
    pub fn consumer<T>(&self, session: &SessionId) -> Consumer<T> {
        Consumer::attach(self.store.clone(), session, &self.config)
    }

    /// Delete the elements and every session's state.
    pub fn destroy(self) -> Result<usize> {
        Self::destroy_location(self.store.as_ref(), &self.location, &self.config.retry)
    }

    /// Delete everything stored under `location`, returning the number of
    /// objects removed. Later operations on it fail with `NotFound`.
    ///
    /// `location` must be a valid key; an empty location would name the
    /// whole store and is rejected with `InvalidKey`.
    pub fn destroy_location(
        store: &dyn ObjectStore,
        location: &str,
        retry: &RetryPolicy,
    ) -> Result<usize> {
        let location = location.trim_end_matches('/');
        key_segments(location)?;

        let keys = retry.run("list location", location, || store.list(location))?;
        for key in &keys {
            retry.run("delete", key, || store.delete(key))?;
        }
        if !keys.is_empty() {
            info!("Destroyed multiplexer at {} ({} objects)", location, keys.len());
        }
        Ok(keys.len())
    }
}
