//! mvr-index - SQLite document index with FTS5 keyword search
//!
//! This crate provides the `DocumentIndex` implementation used by the CLI and
//! service: documents with JSON metadata, BM25 ranking and metadata filters
//! evaluated inside SQLite. Conversation history lives in the same database.

mod conversation;
mod schema;
mod sqlite;

pub use conversation::SqliteConversationStore;
pub use sqlite::SqliteIndex;
