//! In-memory conversation history.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use mvr_core::{ConversationConfig, ConversationStore, ConversationTurn};

#[derive(Default)]
struct Session {
    turns: VecDeque<ConversationTurn>,
    last_active: u64,
}

#[derive(Default)]
struct Sessions {
    by_id: HashMap<String, Session>,
    clock: u64,
}

/// Conversation store holding at most `max_turns` turns per session and at
/// most `max_sessions` sessions.
///
/// Appending past the turn cap drops the oldest turn; opening a session past
/// the session cap evicts the least recently active one. History is lost on
/// restart.
pub struct InMemoryConversationStore {
    max_turns: usize,
    max_sessions: usize,
    sessions: Mutex<Sessions>,
}

impl InMemoryConversationStore {
    /// Create a store with the given caps.
    pub fn new(config: &ConversationConfig) -> Self {
        Self {
            max_turns: config.max_turns,
            max_sessions: config.max_sessions.max(1),
            sessions: Mutex::new(Sessions::default()),
        }
    }

    /// Number of sessions with history.
    pub fn session_count(&self) -> usize {
        self.sessions().by_id.len()
    }

    /// Forget a session.
    pub fn clear(&self, session_id: &str) {
        self.sessions().by_id.remove(session_id);
    }

    fn sessions(&self) -> MutexGuard<'_, Sessions> {
        // A panic mid-append leaves at worst one turn missing
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ConversationStore for InMemoryConversationStore {
    fn history(&self, session_id: &str) -> Vec<ConversationTurn> {
        self.sessions()
            .by_id
            .get(session_id)
            .map(|session| session.turns.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn append(&self, session_id: &str, turn: ConversationTurn) {
        if self.max_turns == 0 {
            return;
        }

        let mut sessions = self.sessions();
        sessions.clock += 1;
        let now = sessions.clock;

        if !sessions.by_id.contains_key(session_id) && sessions.by_id.len() >= self.max_sessions {
            let oldest = sessions
                .by_id
                .iter()
                .min_by_key(|(_, session)| session.last_active)
                .map(|(id, _)| id.clone());
            if let Some(oldest) = oldest {
                sessions.by_id.remove(&oldest);
            }
        }

        let session = sessions.by_id.entry(session_id.to_string()).or_default();
        session.last_active = now;
        session.turns.push_back(turn);
        while session.turns.len() > self.max_turns {
            session.turns.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(max_turns: usize, max_sessions: usize) -> InMemoryConversationStore {
        InMemoryConversationStore::new(&ConversationConfig {
            max_turns,
            max_sessions,
        })
    }

    #[test]
    fn test_unknown_session_is_empty() {
        let store = store(5, 10);
        assert!(store.history("nobody").is_empty());
    }

    #[test]
    fn test_history_is_bounded() {
        let store = store(3, 10);
        for i in 0..5 {
            store.append("s1", ConversationTurn::user(format!("turn {}", i)));
        }

        let history = store.history("s1");
        let contents: Vec<&str> = history.iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, vec!["turn 2", "turn 3", "turn 4"]);
    }

    #[test]
    fn test_sessions_are_isolated() {
        let store = store(10, 10);
        store.append("s1", ConversationTurn::user("hello"));
        store.append("s2", ConversationTurn::assistant("hi"));

        assert_eq!(store.history("s1").len(), 1);
        assert_eq!(store.history("s2")[0].content, "hi");
        assert_eq!(store.session_count(), 2);

        store.clear("s1");
        assert!(store.history("s1").is_empty());
        assert_eq!(store.session_count(), 1);
    }

    #[test]
    fn test_least_recent_session_is_evicted() {
        let store = store(10, 2);
        store.append("s1", ConversationTurn::user("first"));
        store.append("s2", ConversationTurn::user("second"));
        // s1 becomes the most recently active session
        store.append("s1", ConversationTurn::user("again"));
        store.append("s3", ConversationTurn::user("third"));

        assert_eq!(store.session_count(), 2);
        assert!(store.history("s2").is_empty());
        assert_eq!(store.history("s1").len(), 2);
        assert_eq!(store.history("s3")[0].content, "third");
    }

    #[test]
    fn test_zero_cap_keeps_nothing() {
        let store = store(0, 10);
        store.append("s1", ConversationTurn::user("hello"));
        assert!(store.history("s1").is_empty());
        assert_eq!(store.session_count(), 0);
    }
}
