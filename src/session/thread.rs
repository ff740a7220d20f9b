//! Conversation thread and session storage.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::llm::{Message, Role};

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// No completed user/assistant pair yet.
    Empty,
    /// At least one completed pair.
    Active,
}

/// A single conversation.
///
/// History is append-only: messages can be added but never removed or
/// reordered. Starting over means building a new `Session`.
#[derive(Debug, Clone)]
pub struct Session {
    id: String,
    history: Vec<Message>,
    created_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    /// Create an empty session with a random ID.
    #[must_use]
    pub fn new() -> Self {
        Self::with_id(Uuid::new_v4().to_string())
    }

    /// Create an empty session with the given ID.
    #[must_use]
    pub fn with_id(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            history: Vec::new(),
            created_at: now,
            last_activity: now,
        }
    }

    /// Get the session ID.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Messages in conversation order.
    #[must_use]
    pub fn history(&self) -> &[Message] {
        &self.history
    }

    /// Number of messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.history.len()
    }

    /// True when no message was ever added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// `Active` once an assistant turn has been recorded.
    ///
    /// A failed first turn leaves a lone user message and the session stays
    /// `Empty`.
    #[must_use]
    pub fn state(&self) -> SessionState {
        if self.history.iter().any(|m| m.role() == Role::Assistant) {
            SessionState::Active
        } else {
            SessionState::Empty
        }
    }

    /// Session creation time.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Time of the last appended message.
    #[must_use]
    pub fn last_activity(&self) -> DateTime<Utc> {
        self.last_activity
    }

    pub(crate) fn push(&mut self, message: Message) {
        self.history.push(message);
        self.last_activity = Utc::now();
    }

    /// Check if the session has been idle longer than `timeout`.
    #[must_use]
    pub fn is_expired_with_timeout(&self, timeout: Duration) -> bool {
        match (Utc::now() - self.last_activity).to_std() {
            Ok(idle) => idle > timeout,
            // Negative duration means clock skew.
            Err(_) => false,
        }
    }
}

/// Shared handle to a session. Holding the lock is holding the turn.
pub type SessionHandle = Arc<Mutex<Session>>;

/// Thread-safe store for the sessions of all connected browsers.
#[derive(Debug, Clone)]
pub struct SessionStore {
    inner: Arc<SessionStoreInner>,
}

#[derive(Debug)]
struct SessionStoreInner {
    sessions: RwLock<HashMap<String, SessionHandle>>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    /// Create a new session store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SessionStoreInner {
                sessions: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Create a new session and return its ID and handle.
    #[must_use]
    pub fn create(&self) -> (String, SessionHandle) {
        let id = Uuid::new_v4().to_string();
        let handle = self.create_with_id(&id);
        (id, handle)
    }

    /// Create a new session with a specific ID, replacing any existing one.
    #[must_use]
    pub fn create_with_id(&self, id: &str) -> SessionHandle {
        let handle = Arc::new(Mutex::new(Session::with_id(id)));
        self.inner
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.to_string(), Arc::clone(&handle));
        tracing::debug!(name: "session.created", session_id = %id, "Session created");
        handle
    }

    /// Get a session by ID.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<SessionHandle> {
        self.inner
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// Get a session by ID, creating it if it doesn't exist.
    #[must_use]
    pub fn get_or_create(&self, id: &str) -> SessionHandle {
        if let Some(handle) = self.get(id) {
            return handle;
        }

        let mut guard = self
            .inner
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            guard
                .entry(id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(Session::with_id(id)))),
        )
    }

    /// Start a new chat: drop `previous` (if given) and create a fresh session.
    #[must_use]
    pub fn replace(&self, previous: Option<&str>) -> (String, SessionHandle) {
        if let Some(old) = previous
            && self.remove(old).is_some()
        {
            tracing::debug!(session_id = %old, "Session discarded for new chat");
        }
        self.create()
    }

    /// Remove a session by ID.
    pub fn remove(&self, id: &str) -> Option<SessionHandle> {
        self.inner
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
    }

    /// Get the number of stored sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Check if there are no sessions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove sessions that have been inactive longer than the timeout.
    ///
    /// Sessions with a turn in flight are locked and therefore kept.
    /// Returns the number of sessions removed.
    pub fn cleanup_expired_with_timeout(&self, timeout: Duration) -> usize {
        let mut guard = self
            .inner
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = guard.len();
        guard.retain(|id, handle| {
            let expired = handle
                .try_lock()
                .is_ok_and(|session| session.is_expired_with_timeout(timeout));
            if expired {
                tracing::info!(name: "session.expired", session_id = %id, "Session expired");
            }
            !expired
        });
        before - guard.len()
    }

    /// List all session IDs.
    #[must_use]
    pub fn list_ids(&self) -> Vec<String> {
        self.inner
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }
}
