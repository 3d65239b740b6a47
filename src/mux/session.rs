use crate::error::{BlobmuxError, Result};
use crate::store::{join_key, key_segments};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Name of the read session created together with the elements.
pub const PRIMARY_SESSION: &str = "primary";

const ELEMENTS: &str = "elements";
const CONTROL: &str = "control";
const LOCK: &str = "lock";
const SESSIONS: &str = "sessions";

pub(crate) fn elements_key(location: &str) -> String {
    join_key(location, ELEMENTS)
}

/// Keys of one read session's mutable state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SessionKeys {
    pub control: String,
    pub lock: String,
}

impl SessionKeys {
    pub fn for_session(location: &str, session: &str) -> Self {
        let base = if session == PRIMARY_SESSION {
            location.to_string()
        } else {
            join_key(&join_key(location, SESSIONS), session)
        };
        Self {
            control: join_key(&base, CONTROL),
            lock: join_key(&base, LOCK),
        }
    }
}

/// Opaque token naming one read session of a multiplexer.
///
/// It carries the storage location, so a worker needs nothing else to join.
/// The textual form is URL-safe and free of whitespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId {
    location: String,
    session: String,
}

impl SessionId {
    pub(crate) fn new(location: &str, session: &str) -> Self {
        Self {
            location: location.to_string(),
            session: session.to_string(),
        }
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn session(&self) -> &str {
        &self.session
    }

    pub(crate) fn keys(&self) -> SessionKeys {
        SessionKeys::for_session(&self.location, &self.session)
    }

    fn validate(self, raw: &str) -> Result<Self> {
        let invalid = || BlobmuxError::InvalidSession(raw.to_string());
        key_segments(&self.location).map_err(|_| invalid())?;
        if key_segments(&self.session).map_err(|_| invalid())?.len() != 1 {
            return Err(invalid());
        }
        Ok(self)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let json = serde_json::to_vec(self).map_err(|_| fmt::Error)?;
        f.write_str(&URL_SAFE_NO_PAD.encode(json))
    }
}

impl FromStr for SessionId {
    type Err = BlobmuxError;

    fn from_str(s: &str) -> Result<Self> {
        let raw = s.trim();
        let json = URL_SAFE_NO_PAD
            .decode(raw)
            .map_err(|_| BlobmuxError::InvalidSession(raw.to_string()))?;
        let id: SessionId = serde_json::from_slice(&json)
            .map_err(|_| BlobmuxError::InvalidSession(raw.to_string()))?;
        id.validate(raw)
    }
}

/// Mutable cursor state of one read session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlState {
    /// Index of the next element to hand out.
    pub cursor: u64,
    pub total: u64,
    pub finished: bool,
    /// Worker that claimed the most recent element.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl ControlState {
    pub fn new(total: u64) -> Self {
        Self {
            cursor: 0,
            total,
            finished: total == 0,
            worker_id: None,
            updated_at: Utc::now(),
        }
    }

    pub fn remaining(&self) -> u64 {
        self.total.saturating_sub(self.cursor)
    }

    /// State after handing out the element at `cursor`.
    pub(crate) fn advance(&self, worker_id: &str) -> Self {
        let cursor = (self.cursor + 1).min(self.total);
        Self {
            cursor,
            total: self.total,
            finished: cursor == self.total,
            worker_id: Some(worker_id.to_string()),
            updated_at: Utc::now(),
        }
    }

    pub(crate) fn validate(&self, key: &str) -> Result<()> {
        if self.cursor > self.total {
            return Err(BlobmuxError::corrupt(
                key,
                format!("cursor {} is past total {}", self.cursor, self.total),
            ));
        }
        if self.finished != (self.cursor == self.total) {
            return Err(BlobmuxError::corrupt(
                key,
                format!(
                    "finished={} disagrees with cursor {} of {}",
                    self.finished, self.cursor, self.total
                ),
            ));
        }
        Ok(())
    }

    pub(crate) fn encode(&self, key: &str) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| BlobmuxError::corrupt(key, e))
    }

    pub(crate) fn decode(key: &str, data: &[u8]) -> Result<Self> {
        let state: Self = serde_json::from_slice(data).map_err(|e| BlobmuxError::corrupt(key, e))?;
        state.validate(key)?;
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_round_trips_through_text() {
        let id = SessionId::new("jobs/run-7", "20261016T091500123Z-1a2b3c4d");
        let text = id.to_string();
        assert!(!text.contains(char::is_whitespace));
        assert!(!text.contains('/'));
        assert_eq!(text.parse::<SessionId>().unwrap(), id);
    }

    #[test]
    fn test_session_id_rejects_garbage() {
        assert!(matches!(
            "not a session".parse::<SessionId>(),
            Err(BlobmuxError::InvalidSession(_))
        ));
        let sneaky = URL_SAFE_NO_PAD.encode(br#"{"location":"a","session":"../b"}"#);
        assert!(sneaky.parse::<SessionId>().is_err());
    }

    #[test]
    fn test_session_keys_layout() {
        let primary = SessionKeys::for_session("jobs/run", PRIMARY_SESSION);
        assert_eq!(primary.control, "jobs/run/control");
        assert_eq!(primary.lock, "jobs/run/lock");

        let extra = SessionKeys::for_session("jobs/run", "s1");
        assert_eq!(extra.control, "jobs/run/sessions/s1/control");
        assert_eq!(extra.lock, "jobs/run/sessions/s1/lock");
    }

    #[test]
    fn test_advance_sets_finished_at_end() {
        let state = ControlState::new(2);
        let one = state.advance("w");
        assert_eq!((one.cursor, one.finished), (1, false));
        let two = one.advance("w");
        assert_eq!((two.cursor, two.finished), (2, true));
        assert_eq!(two.worker_id.as_deref(), Some("w"));
    }

    #[test]
    fn test_decode_rejects_broken_invariants() {
        let mut state = ControlState::new(3);
        state.cursor = 4;
        let body = serde_json::to_vec(&state).unwrap();
        assert!(matches!(
            ControlState::decode("c", &body),
            Err(BlobmuxError::Corrupt { .. })
        ));

        let mut state = ControlState::new(3);
        state.finished = true;
        let body = serde_json::to_vec(&state).unwrap();
        assert!(ControlState::decode("c", &body).is_err());
    }
}
