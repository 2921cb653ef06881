//! Conversation history persisted next to the document index.

use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::{params, Connection};
use tracing::warn;

use mvr_core::{
    ConversationConfig, ConversationRole, ConversationStore, ConversationTurn, Result,
    RetrievalError,
};

use crate::sqlite::SqliteIndex;

/// Conversation store backed by the index database.
///
/// Sessions survive restarts, so a CLI invoked once per query still sees the
/// session's earlier turns. Retention matches the in-memory store: at most
/// `max_turns` turns per session and `max_sessions` sessions, evicting the
/// session with the oldest latest turn.
pub struct SqliteConversationStore {
    conn: Arc<Mutex<Connection>>,
    max_turns: usize,
    max_sessions: usize,
}

impl SqliteConversationStore {
    /// Create a store sharing the index connection.
    pub fn new(index: &SqliteIndex, config: &ConversationConfig) -> Self {
        Self {
            conn: index.connection(),
            max_turns: config.max_turns,
            max_sessions: config.max_sessions.max(1),
        }
    }

    /// Number of sessions with history.
    pub fn session_count(&self) -> Result<usize> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT COUNT(DISTINCT session_id) FROM conversation_turns",
                [],
                |row| row.get::<_, i64>(0),
            )
            .map(|count| count as usize)
            .map_err(|e| RetrievalError::database(e.to_string()))
        })
    }

    /// Turns for a session, oldest first.
    pub fn load(&self, session_id: &str) -> Result<Vec<ConversationTurn>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT role, content FROM conversation_turns
                     WHERE session_id = ?1 ORDER BY id",
                )
                .map_err(|e| RetrievalError::database(e.to_string()))?;

            let rows = stmt
                .query_map(params![session_id], |row| {
                    let role: String = row.get(0)?;
                    Ok(ConversationTurn {
                        role: parse_role(&role),
                        content: row.get(1)?,
                    })
                })
                .map_err(|e| RetrievalError::database(e.to_string()))?;

            rows.collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| RetrievalError::database(e.to_string()))
        })
    }

    /// Append a turn and apply retention in one transaction.
    pub fn save(&self, session_id: &str, turn: &ConversationTurn) -> Result<()> {
        if self.max_turns == 0 {
            return Ok(());
        }

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);

        let mut conn = self
            .conn
            .lock()
            .map_err(|e| RetrievalError::database(e.to_string()))?;
        let tx = conn
            .transaction()
            .map_err(|e| RetrievalError::database(e.to_string()))?;

        tx.execute(
            "INSERT INTO conversation_turns (session_id, role, content, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![session_id, turn.role.to_string(), turn.content, now],
        )
        .map_err(|e| RetrievalError::database(e.to_string()))?;

        tx.execute(
            "DELETE FROM conversation_turns
             WHERE session_id = ?1 AND id NOT IN (
                 SELECT id FROM conversation_turns WHERE session_id = ?1
                 ORDER BY id DESC LIMIT ?2
             )",
            params![session_id, self.max_turns as i64],
        )
        .map_err(|e| RetrievalError::database(e.to_string()))?;

        tx.execute(
            "DELETE FROM conversation_turns
             WHERE session_id NOT IN (
                 SELECT session_id FROM conversation_turns
                 GROUP BY session_id ORDER BY MAX(id) DESC LIMIT ?1
             )",
            params![self.max_sessions as i64],
        )
        .map_err(|e| RetrievalError::database(e.to_string()))?;

        tx.commit()
            .map_err(|e| RetrievalError::database(e.to_string()))
    }

    fn with_conn<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Connection) -> Result<R>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| RetrievalError::database(e.to_string()))?;
        f(&conn)
    }
}

impl ConversationStore for SqliteConversationStore {
    fn history(&self, session_id: &str) -> Vec<ConversationTurn> {
        self.load(session_id).unwrap_or_else(|e| {
            warn!("Failed to load history for session {}: {}", session_id, e);
            Vec::new()
        })
    }

    fn append(&self, session_id: &str, turn: ConversationTurn) {
        if let Err(e) = self.save(session_id, &turn) {
            warn!("Failed to record turn for session {}: {}", session_id, e);
        }
    }
}

fn parse_role(role: &str) -> ConversationRole {
    match role {
        "assistant" => ConversationRole::Assistant,
        "system" => ConversationRole::System,
        _ => ConversationRole::User,
    }
}
