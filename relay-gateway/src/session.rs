//! In-memory session store.
//!
//! Sessions live in a capacity-bounded LRU map owned by the server. Each
//! session's history sits behind its own async lock, held by a request for
//! its whole exchange so that requests against one session apply in
//! arrival order.

use crate::provider::Message;
use lru::LruCache;
use relay_common::config::SessionConfig;
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Shared handle to one session's history.
pub type SessionHandle = Arc<AsyncMutex<Vec<Message>>>;

/// What a reset removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cleared {
    Session(String),
    All,
}

impl fmt::Display for Cleared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Session(id) => f.write_str(id),
            Self::All => f.write_str("all"),
        }
    }
}

/// Exclusive access to one session's history.
pub struct SessionGuard {
    session_id: String,
    messages: OwnedMutexGuard<Vec<Message>>,
}

impl SessionGuard {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Overwrite the stored history. Callers pass an already-trimmed list.
    pub fn replace(&mut self, messages: Vec<Message>) {
        *self.messages = messages;
    }
}

/// Server-owned session store.
pub struct SessionStore {
    sessions: Mutex<LruCache<String, SessionHandle>>,
    seed: Option<Message>,
}

impl SessionStore {
    /// Create a store holding at most `capacity` sessions (minimum 1).
    ///
    /// New sessions start with `system_prompt` as a leading system message
    /// when one is given.
    pub fn new(capacity: usize, system_prompt: Option<String>) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            sessions: Mutex::new(LruCache::new(capacity)),
            seed: system_prompt.map(Message::system),
        }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(config.max_sessions, config.system_prompt.clone())
    }

    // The map lock is never held across an await or a panic-prone call, so a
    // poisoned lock still guards a consistent map.
    fn sessions(&self) -> MutexGuard<'_, LruCache<String, SessionHandle>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// History a freshly created session starts with.
    pub fn initial_history(&self) -> Vec<Message> {
        self.seed.iter().cloned().collect()
    }

    /// Return the session for `session_id`, creating it if needed.
    ///
    /// Marks the session most recently used. At capacity, the least
    /// recently used session is evicted to make room.
    pub fn get_or_create(&self, session_id: &str) -> SessionHandle {
        let mut sessions = self.sessions();
        if let Some(handle) = sessions.get(session_id) {
            return Arc::clone(handle);
        }

        let handle = Arc::new(AsyncMutex::new(self.initial_history()));
        if let Some((evicted, _)) = sessions.push(session_id.to_string(), Arc::clone(&handle)) {
            tracing::debug!(session_id = %evicted, "Evicted least recently used session");
        }
        tracing::debug!(session_id, live = sessions.len(), "Created session");
        handle
    }

    /// Lock a session for the duration of an exchange, creating it if needed.
    pub async fn lock(&self, session_id: &str) -> SessionGuard {
        let handle = self.get_or_create(session_id);
        SessionGuard {
            session_id: session_id.to_string(),
            messages: handle.lock_owned().await,
        }
    }

    /// Overwrite a session's stored history.
    pub async fn replace(&self, session_id: &str, messages: Vec<Message>) {
        self.lock(session_id).await.replace(messages);
    }

    /// Remove one session, or all of them when `session_id` is `None`.
    ///
    /// An in-flight exchange on a removed session finishes against its
    /// detached history, so the reset wins.
    pub fn clear(&self, session_id: Option<&str>) -> Cleared {
        let mut sessions = self.sessions();
        match session_id {
            Some(id) => {
                sessions.pop(id);
                Cleared::Session(id.to_string())
            }
            None => {
                sessions.clear();
                Cleared::All
            }
        }
    }

    /// Copy of a session's history, without creating it or touching recency.
    pub async fn snapshot(&self, session_id: &str) -> Option<Vec<Message>> {
        let handle = self.sessions().peek(session_id).cloned()?;
        let messages = handle.lock().await;
        Some(messages.clone())
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
