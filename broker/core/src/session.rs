//! Session Management
//!
//! Conversation sessions between users and a chat model. A session is an
//! ordered list of [`ChatTurn`]s; the whole list is sent to the backend on
//! every chat call so the model sees the conversation so far.
//!
//! # Lifetime
//!
//! Sessions are created on first reference and live until the process exits.
//! A reset clears the history but keeps the id. Each session keeps at most
//! `max_turns` turns (0 = unlimited); the oldest turns are pruned first.
//!
//! # Concurrency
//!
//! [`SessionStore`] shards sessions in a `DashMap`, and each session sits
//! behind its own async mutex. A chat call holds that mutex for its whole
//! turn, so two calls on one session cannot interleave while calls on
//! different sessions proceed independently.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::backend::ChatMessage;

/// Session identifier
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    /// Generate a new unique session ID
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Use `candidate` when it is non-empty, otherwise generate a fresh id
    #[must_use]
    pub fn from_optional(candidate: Option<&str>) -> Self {
        match candidate.map(str::trim) {
            Some(id) if !id.is_empty() => Self(id.to_string()),
            _ => Self::generate(),
        }
    }

    /// Borrow the id as a string
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Who authored a turn
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    /// User input
    User,
    /// Model reply
    Assistant,
}

/// One message in a conversation
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatTurn {
    /// Who sent this turn
    pub role: TurnRole,
    /// Turn text
    pub text: String,
    /// Image sent with this turn, stored on local disk
    pub attached_image_path: Option<PathBuf>,
    /// When the turn was recorded
    pub timestamp: DateTime<Utc>,
}

impl ChatTurn {
    /// Create a user turn
    pub fn user(text: impl Into<String>, image: Option<PathBuf>) -> Self {
        Self {
            role: TurnRole::User,
            text: text.into(),
            attached_image_path: image,
            timestamp: Utc::now(),
        }
    }

    /// Create an assistant turn
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Assistant,
            text: text.into(),
            attached_image_path: None,
            timestamp: Utc::now(),
        }
    }

    /// Convert to the message shape the backend expects
    #[must_use]
    pub fn to_message(&self) -> ChatMessage {
        let message = match self.role {
            TurnRole::User => ChatMessage::user(self.text.clone()),
            TurnRole::Assistant => ChatMessage::assistant(self.text.clone()),
        };
        match self.attached_image_path {
            Some(ref path) => message.with_image(path.clone()),
            None => message,
        }
    }
}

/// A conversation session
#[derive(Clone, Debug)]
pub struct Session {
    /// Unique session ID
    pub id: SessionId,
    /// When the session was created
    pub created_at: DateTime<Utc>,
    turns: Vec<ChatTurn>,
    /// Maximum number of turns to keep (0 = unlimited)
    max_turns: usize,
}

impl Session {
    /// Create an empty session
    #[must_use]
    pub fn new(id: SessionId, max_turns: usize) -> Self {
        Self {
            id,
            created_at: Utc::now(),
            turns: Vec::new(),
            max_turns,
        }
    }

    /// Append a turn, pruning the oldest turns beyond the cap
    pub fn append(&mut self, turn: ChatTurn) {
        self.turns.push(turn);
        self.prune_if_needed();
    }

    /// All turns, oldest first
    #[must_use]
    pub fn turns(&self) -> &[ChatTurn] {
        &self.turns
    }

    /// Number of turns held
    #[must_use]
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    /// Whether the session has no turns
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// History as backend messages, followed by `next` if given
    #[must_use]
    pub fn build_messages(&self, next: Option<&ChatTurn>) -> Vec<ChatMessage> {
        self.turns
            .iter()
            .chain(next)
            .map(ChatTurn::to_message)
            .collect()
    }

    /// Clear message history (keeps the id)
    pub fn clear_history(&mut self) {
        self.turns.clear();
    }

    fn prune_if_needed(&mut self) {
        if self.max_turns == 0 || self.turns.len() <= self.max_turns {
            return;
        }

        let to_remove = self.turns.len() - self.max_turns;
        self.turns.drain(..to_remove);

        tracing::debug!(
            session = %self.id,
            removed = to_remove,
            remaining = self.turns.len(),
            "Pruned session turns"
        );
    }
}

/// Shared handle to one session
pub type SessionHandle = Arc<Mutex<Session>>;

/// Map from session id to conversation history
pub struct SessionStore {
    sessions: DashMap<SessionId, SessionHandle>,
    max_turns: usize,
}

impl SessionStore {
    /// Create an empty store; every session keeps at most `max_turns` turns
    #[must_use]
    pub fn new(max_turns: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            max_turns,
        }
    }

    /// Existing session for `id`, or a new empty one
    ///
    /// A missing or empty `id` gets a freshly generated one; the returned
    /// [`SessionId`] is the id actually used.
    pub fn get_or_create(&self, id: Option<&str>) -> (SessionId, SessionHandle) {
        let id = SessionId::from_optional(id);
        let handle = self
            .sessions
            .entry(id.clone())
            .or_insert_with(|| {
                tracing::debug!(session = %id, "Creating session");
                Arc::new(Mutex::new(Session::new(id.clone(), self.max_turns)))
            })
            .clone();
        (id, handle)
    }

    /// Existing session for `id`
    #[must_use]
    pub fn get(&self, id: &str) -> Option<SessionHandle> {
        self.sessions
            .get(&SessionId(id.to_string()))
            .map(|entry| entry.value().clone())
    }

    /// Append one turn to the session, creating it if needed
    pub async fn append(&self, id: &str, turn: ChatTurn) {
        let (_, handle) = self.get_or_create(Some(id));
        handle.lock().await.append(turn);
    }

    /// Copy of the session's turns, if it exists
    pub async fn history(&self, id: &str) -> Option<Vec<ChatTurn>> {
        let handle = self.get(id)?;
        let session = handle.lock().await;
        Some(session.turns().to_vec())
    }

    /// Clear the session's history; `false` if no such session exists
    pub async fn reset(&self, id: &str) -> bool {
        let Some(handle) = self.get(id) else {
            return false;
        };
        handle.lock().await.clear_history();
        tracing::info!(session = id, "Chat history reset");
        true
    }

    /// Number of sessions held
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no sessions exist
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MessageRole;

    #[test]
    fn test_session_id_from_optional() {
        assert_eq!(SessionId::from_optional(Some("s1")).as_str(), "s1");

        let generated = SessionId::from_optional(Some("  "));
        assert!(!generated.as_str().trim().is_empty());
        assert_ne!(SessionId::from_optional(None), SessionId::from_optional(None));
    }

    #[test]
    fn test_append_keeps_order() {
        let mut session = Session::new(SessionId::generate(), 0);
        session.append(ChatTurn::user("first", None));
        session.append(ChatTurn::assistant("second"));
        session.append(ChatTurn::user("third", None));

        let texts: Vec<_> = session.turns().iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_session_prunes_oldest_turns() {
        let mut session = Session::new(SessionId::generate(), 3);
        for i in 1..=5 {
            session.append(ChatTurn::user(format!("Message {i}"), None));
        }

        assert_eq!(session.len(), 3);
        let texts: Vec<_> = session.turns().iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["Message 3", "Message 4", "Message 5"]);
    }

    #[test]
    fn test_build_messages_appends_next_turn() {
        let mut session = Session::new(SessionId::generate(), 0);
        session.append(ChatTurn::user("hi", None));
        session.append(ChatTurn::assistant("hello"));

        let next = ChatTurn::user("what is this", Some(PathBuf::from("uploads/x.jpg")));
        let messages = session.build_messages(Some(&next));

        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1].role, MessageRole::Assistant);
        assert_eq!(messages[2].images, vec![PathBuf::from("uploads/x.jpg")]);
        // building does not mutate history
        assert_eq!(session.len(), 2);
    }

    #[tokio::test]
    async fn test_store_get_or_create_reuses_session() {
        let store = SessionStore::new(0);
        let (id, first) = store.get_or_create(Some("abc"));
        first.lock().await.append(ChatTurn::user("hi", None));

        let (same_id, second) = store.get_or_create(Some("abc"));
        assert_eq!(id, same_id);
        assert_eq!(second.lock().await.len(), 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_store_generates_id_when_missing() {
        let store = SessionStore::new(0);
        let (id, _) = store.get_or_create(None);
        assert!(store.get(id.as_str()).is_some());
    }

    #[tokio::test]
    async fn test_reset_existing_and_unknown() {
        let store = SessionStore::new(0);
        store.append("s1", ChatTurn::user("hi", None)).await;

        assert!(store.reset("s1").await);
        assert_eq!(store.history("s1").await, Some(Vec::new()));

        assert!(!store.reset("missing").await);
        assert!(store.get("missing").is_none());
    }
}
