use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::models::message::Message;
use crate::models::role::Role;

pub type SessionId = String;

/// Ordered, append-only log of the messages exchanged in one chat session
#[derive(Debug, Clone, Default, PartialEq)]
pub struct History {
    messages: Vec<Message>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_user<S: Into<String>>(&mut self, text: S) {
        self.messages.push(Message::user().with_text(text));
    }

    pub fn push_assistant<S: Into<String>>(&mut self, text: S) {
        self.messages.push(Message::assistant().with_text(text));
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn roles(&self) -> Vec<Role> {
        self.messages.iter().map(|message| message.role).collect()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// A session's history, locked for the duration of a turn
pub type SessionHandle = Arc<Mutex<History>>;

/// In-memory histories keyed by session.
///
/// Each session has its own lock, so turns of different sessions never wait on
/// each other while turns of the same session run one at a time.
#[derive(Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<SessionId, SessionHandle>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a session with an empty history
    pub fn create(&self) -> SessionId {
        let id = Uuid::new_v4().to_string();
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.clone(), SessionHandle::default());
        id
    }

    pub fn get(&self, id: &str) -> Option<SessionHandle> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// Look up a session, creating an empty one under that id when it is unknown.
    ///
    /// Entries made here stay until `remove` is called, so callers taking ids from
    /// untrusted input grow the store with every new id.
    pub fn get_or_create(&self, id: &str) -> SessionHandle {
        if let Some(handle) = self.get(id) {
            return handle;
        }

        let mut sessions = self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        sessions
            .entry(id.to_string())
            .or_insert_with(|| {
                tracing::warn!(session = %id, "no history for session, starting an empty one");
                SessionHandle::default()
            })
            .clone()
    }

    /// End a session, dropping its history. Returns whether it existed.
    pub fn remove(&self, id: &str) -> bool {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
            .is_some()
    }

    /// A copy of the session's current history
    pub async fn history(&self, id: &str) -> Option<History> {
        let handle = self.get(id)?;
        let history = handle.lock().await;
        Some(history.clone())
    }

    pub fn len(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
