//! Core traits defining the collaborators of the retrieval core.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{ConversationTurn, Document, MetadataFilter, QueryIntelligence};

/// Document index collaborator.
///
/// Implementations must tolerate `filter = None` and unknown filter keys. An
/// empty result is "no match", never an error.
#[async_trait]
pub trait DocumentIndex: Send + Sync {
    /// Return up to `top_k` documents ranked by index-local relevance.
    async fn search(
        &self,
        query: &str,
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<Document>>;
}

/// Pairwise relevance model (e.g. a cross-encoder).
///
/// Scoring is CPU-bound and synchronous. An error fails the whole batch.
pub trait RelevanceModel: Send + Sync {
    /// Score each content against the query, one score per content, in order.
    fn score_batch(&self, query: &str, contents: &[&str]) -> Result<Vec<f32>>;

    /// Model identifier for diagnostics.
    fn name(&self) -> &str;
}

/// Higher-level query understanding (LLM-assisted language and intent detection).
#[async_trait]
pub trait QueryIntelligenceProvider: Send + Sync {
    /// Analyze a query in the context of recent conversation.
    async fn analyze(
        &self,
        query: &str,
        history: &[ConversationTurn],
    ) -> Result<QueryIntelligence>;
}

/// Text generation collaborator: send prompt text, receive generated text.
///
/// Fails with `RetrievalError::Provider` on quota, network or timeout errors.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String>;
}

/// Conversation history keyed by session.
pub trait ConversationStore: Send + Sync {
    /// History for a session, oldest first. Unknown sessions have no history.
    fn history(&self, session_id: &str) -> Vec<ConversationTurn>;

    /// Append a turn, applying the store's retention policy.
    fn append(&self, session_id: &str, turn: ConversationTurn);
}
