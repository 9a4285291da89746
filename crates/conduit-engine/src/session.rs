use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::debug;

use conduit_core::ids::SessionId;
use conduit_core::messages::{ChatMessage, Role};

/// One session's message history.
pub type SessionHandle = Arc<RwLock<Vec<ChatMessage>>>;

/// In-process conversation history, one ordered log per session.
///
/// Sessions are created on first reference and never evicted.
#[derive(Default)]
pub struct SessionStore {
    sessions: DashMap<SessionId, SessionHandle>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(&self, session_id: &SessionId) -> SessionHandle {
        self.sessions
            .entry(session_id.clone())
            .or_insert_with(|| {
                debug!(session_id = %session_id, "session created");
                Arc::new(RwLock::new(Vec::new()))
            })
            .clone()
    }

    pub fn append(&self, session_id: &SessionId, message: ChatMessage) {
        self.get_or_create(session_id).write().push(message);
    }

    /// Append several messages as one contiguous run.
    pub fn extend(&self, session_id: &SessionId, messages: impl IntoIterator<Item = ChatMessage>) {
        self.get_or_create(session_id).write().extend(messages);
    }

    /// The last `n` messages, oldest first.
    pub fn tail(&self, session_id: &SessionId, n: usize) -> Vec<ChatMessage> {
        if n == 0 {
            return Vec::new();
        }
        let handle = self.get_or_create(session_id);
        let history = handle.read();
        let start = history.len().saturating_sub(n);
        history[start..].to_vec()
    }

    pub fn history(&self, session_id: &SessionId) -> Vec<ChatMessage> {
        self.get_or_create(session_id).read().clone()
    }

    /// Content of the most recent user message, or an empty string.
    pub fn last_user_message(&self, session_id: &SessionId) -> String {
        let handle = self.get_or_create(session_id);
        let history = handle.read();
        history
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.clone())
            .unwrap_or_default()
    }

    pub fn len(&self, session_id: &SessionId) -> usize {
        self.sessions
            .get(session_id)
            .map(|h| h.read().len())
            .unwrap_or(0)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sid(s: &str) -> SessionId {
        SessionId::from_raw(s)
    }

    #[test]
    fn tail_edges() {
        let store = SessionStore::new();
        let s = sid("s1");
        for i in 0..3 {
            store.append(&s, ChatMessage::user(format!("m{i}")));
        }

        assert!(store.tail(&s, 0).is_empty());
        let two: Vec<_> = store.tail(&s, 2).into_iter().map(|m| m.content).collect();
        assert_eq!(two, vec!["m1", "m2"]);
        assert_eq!(store.tail(&s, 10).len(), 3);
    }

    #[test]
    fn last_user_message_skips_assistant() {
        let store = SessionStore::new();
        let s = sid("s1");
        assert_eq!(store.last_user_message(&s), "");

        store.extend(
            &s,
            [ChatMessage::user("question"), ChatMessage::assistant("answer")],
        );
        assert_eq!(store.last_user_message(&s), "question");
    }

    #[test]
    fn sessions_are_independent() {
        let store = SessionStore::new();
        store.append(&sid("a"), ChatMessage::user("only in a"));
        assert_eq!(store.len(&sid("a")), 1);
        assert_eq!(store.len(&sid("b")), 0);
        assert!(store.history(&sid("b")).is_empty());
        assert_eq!(store.session_count(), 2);
    }
}
