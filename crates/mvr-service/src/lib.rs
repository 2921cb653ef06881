//! mvr-service - Service facade
//!
//! This crate wires the SQLite index, the retrieval pipeline, an optional
//! Ollama-backed query-intelligence pass and a bounded conversation store
//! into a single service whose operations return tool-style results for
//! assistants and command-line front ends.
//!
//! # Tools
//!
//! - `mvr_search` - Multi-strategy search with fusion and reranking
//! - `mvr_ingest` - Add documents to the index
//! - `mvr_quality_metrics` - Strategy coverage and consensus for a query
//! - `mvr_strategies` - Base or query-adjusted strategy weights
//! - `mvr_stats` - Index statistics

mod conversation;
mod server;

pub use conversation::InMemoryConversationStore;
pub use server::{
    IngestParams, MetricsParams, RetrievalService, SearchParams, ServerInfo, StrategiesParams,
    ToolInfo, ToolResult,
};
