//! Tool-style service over the retrieval pipeline.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use mvr_core::{
    ConversationStore, ConversationTurn, MvrConfig, NewDocument, QueryIntelligenceProvider,
    Result, RetrievalError,
};
use mvr_index::{SqliteConversationStore, SqliteIndex};
use mvr_query::{LlmQueryAnalyzer, MultiStrategyRetriever, OllamaGenerator};

use crate::conversation::InMemoryConversationStore;

/// Characters of document content shown per result.
const PREVIEW_CHARS: usize = 300;

/// Retrieval service state.
pub struct RetrievalService {
    /// Document index.
    index: Arc<SqliteIndex>,

    /// Retrieval pipeline over the index.
    retriever: MultiStrategyRetriever<SqliteIndex>,

    /// Per-session history fed to query intelligence.
    conversations: Arc<dyn ConversationStore>,
}

/// Search request parameters.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct SearchParams {
    /// The search query.
    pub query: String,

    /// Maximum number of results (default from configuration).
    #[serde(default)]
    pub max_results: Option<usize>,

    /// Override whether fused candidates are reranked.
    #[serde(default)]
    pub rerank: Option<bool>,

    /// Conversation session the query belongs to.
    #[serde(default)]
    pub session_id: Option<String>,
}

/// Quality metrics request parameters.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct MetricsParams {
    /// The query to evaluate.
    pub query: String,

    /// Maximum number of results (default from configuration).
    #[serde(default)]
    pub max_results: Option<usize>,
}

/// Ingest request parameters.
#[derive(Debug, Deserialize, Serialize)]
pub struct IngestParams {
    /// Documents to index.
    pub documents: Vec<NewDocument>,
}

/// Strategy listing parameters.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct StrategiesParams {
    /// Show weights as adjusted for this query instead of the base weights.
    #[serde(default)]
    pub query: Option<String>,
}

/// Tool result.
#[derive(Debug, Serialize)]
pub struct ToolResult {
    /// Whether the operation was successful.
    pub success: bool,

    /// Human-readable result.
    pub message: String,

    /// Structured payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ToolResult {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: None,
        }
    }

    pub fn success_with(message: impl Into<String>, data: impl Serialize) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: serde_json::to_value(data).ok(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
        }
    }

    /// Failure carrying the error's stable code.
    pub fn from_error(context: &str, error: &RetrievalError) -> Self {
        Self {
            success: false,
            message: format!("{}: {}", context, error),
            data: Some(json!({ "error_code": error.error_code() })),
        }
    }
}

impl RetrievalService {
    /// Create a service over the index at the given path.
    pub fn new(db_path: impl Into<PathBuf>, config: MvrConfig) -> Result<Self> {
        let db_path = db_path.into();
        info!("Initializing retrieval service with index at {:?}", db_path);

        let index = Arc::new(SqliteIndex::open(&db_path)?);
        let conversations = Arc::new(SqliteConversationStore::new(&index, &config.conversation));
        Self::build(index, config, conversations)
    }

    /// Create a service over an in-memory index.
    pub fn new_memory(config: MvrConfig) -> Result<Self> {
        info!("Initializing retrieval service with in-memory index");

        let index = Arc::new(SqliteIndex::open_memory()?);
        let conversations = Arc::new(InMemoryConversationStore::new(&config.conversation));
        Self::build(index, config, conversations)
    }

    fn build(
        index: Arc<SqliteIndex>,
        config: MvrConfig,
        conversations: Arc<dyn ConversationStore>,
    ) -> Result<Self> {
        config.validate()?;

        let mut retriever = MultiStrategyRetriever::from_config(index.clone(), &config)?;
        if config.intelligence.enabled {
            if let Some(generator) = OllamaGenerator::from_config(&config.intelligence)? {
                info!("Query intelligence via Ollama model {}", generator.model());
                let analyzer = LlmQueryAnalyzer::new(Arc::new(generator), &config.intelligence)?;
                retriever = retriever.with_intelligence(Arc::new(analyzer));
            }
        }

        Ok(Self {
            index,
            retriever,
            conversations,
        })
    }

    /// Attach a query-intelligence provider.
    pub fn with_intelligence(mut self, provider: Arc<dyn QueryIntelligenceProvider>) -> Self {
        self.retriever = self.retriever.with_intelligence(provider);
        self
    }

    /// Replace the conversation store.
    pub fn with_conversation_store(mut self, store: Arc<dyn ConversationStore>) -> Self {
        self.conversations = store;
        self
    }

    /// The retrieval pipeline.
    pub fn retriever(&self) -> &MultiStrategyRetriever<SqliteIndex> {
        &self.retriever
    }

    /// Get the server info.
    pub fn info() -> ServerInfo {
        ServerInfo {
            name: "mvr".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            description: "Multi-strategy retrieval with rank fusion and reranking".to_string(),
        }
    }

    /// List available tools.
    pub fn tools() -> Vec<ToolInfo> {
        vec![
            ToolInfo {
                name: "mvr_search".to_string(),
                description: "Search the index with every retrieval strategy and fuse the results"
                    .to_string(),
            },
            ToolInfo {
                name: "mvr_ingest".to_string(),
                description: "Add documents to the index".to_string(),
            },
            ToolInfo {
                name: "mvr_quality_metrics".to_string(),
                description: "Report strategy coverage and consensus for a query".to_string(),
            },
            ToolInfo {
                name: "mvr_strategies".to_string(),
                description: "List retrieval strategies and their weights".to_string(),
            },
            ToolInfo {
                name: "mvr_stats".to_string(),
                description: "Get statistics about the index".to_string(),
            },
        ]
    }

    /// Search the index.
    pub async fn search(&self, params: SearchParams) -> ToolResult {
        info!("Searching for: {:?}", params.query);

        if params.query.trim().is_empty() {
            return ToolResult::from_error(
                "Search failed",
                &RetrievalError::invalid_argument("query must not be empty"),
            );
        }

        let mut options = self.retriever.default_options();
        if let Some(max_results) = params.max_results {
            options.max_results = max_results;
        }
        if let Some(rerank) = params.rerank {
            options.rerank = rerank;
        }

        if params.session_id.is_some() && !self.retriever.has_intelligence() {
            warn!(
                "No query intelligence configured (intelligence.model); \
                 session history is recorded but not used"
            );
        }

        let history = params
            .session_id
            .as_deref()
            .map(|session| self.conversations.history(session))
            .unwrap_or_default();

        let response = self
            .retriever
            .retrieve_with(&params.query, options, &history)
            .await;

        if let Some(session) = params.session_id.as_deref() {
            self.conversations
                .append(session, ConversationTurn::user(params.query.as_str()));
        }

        let mut output = format!("Found {} results:\n\n", response.documents.len());
        if response.context.optimized_query != response.context.original_query {
            output = format!(
                "Searched as {:?}. {}",
                response.context.optimized_query, output
            );
        }

        for (rank, result) in response.documents.iter().enumerate() {
            let strategies: Vec<&str> = result
                .fusion
                .strategy_scores
                .keys()
                .map(String::as_str)
                .collect();
            output.push_str(&format!(
                "---\n[{}] {} (score: {:.3}, confidence: {:.2})\nStrategies: {}\n",
                rank + 1,
                result.document.id,
                result.score,
                result.fusion.confidence,
                strategies.join(", ")
            ));
            output.push_str(&format!("```\n{}\n```\n\n", preview(&result.document.content)));
        }

        ToolResult::success_with(output, &response)
    }

    /// Run a query and report quality metrics over its results.
    pub async fn quality_metrics(&self, params: MetricsParams) -> ToolResult {
        let max_results = params
            .max_results
            .unwrap_or(self.retriever.default_options().max_results);
        let response = self.retriever.retrieve(&params.query, max_results, &[]).await;
        let metrics = self
            .retriever
            .quality_metrics(&params.query, &response.documents);

        let output = format!(
            "Quality metrics for {:?}:\n\n\
             - Results: {}\n\
             - Average confidence: {:.2}\n\
             - Strategy coverage: {:.0}% ({} of {})\n\
             - Strategies used: {}\n\
             - Reranking applied: {}\n",
            params.query,
            metrics.result_count,
            metrics.average_confidence,
            metrics.strategy_coverage * 100.0,
            metrics.strategies_used.len(),
            metrics.total_strategies_available,
            metrics.strategies_used.join(", "),
            metrics.reranking_applied
        );

        ToolResult::success_with(output, &metrics)
    }

    /// Add documents to the index.
    pub async fn ingest(&self, params: IngestParams) -> ToolResult {
        info!("Ingesting {} documents", params.documents.len());

        if let Some(position) = params
            .documents
            .iter()
            .position(|doc| doc.content.trim().is_empty())
        {
            return ToolResult::from_error(
                "Ingest failed",
                &RetrievalError::invalid_argument(format!(
                    "document {} has empty content",
                    position
                )),
            );
        }

        let total = params.documents.len();
        let index = Arc::clone(&self.index);
        let inserted = tokio::task::spawn_blocking(move || index.insert_documents(&params.documents))
            .await
            .map_err(|e| RetrievalError::internal(format!("Ingest task failed: {}", e)))
            .and_then(|result| result);

        match inserted {
            Ok(inserted) => ToolResult::success_with(
                format!(
                    "Ingested {} of {} documents ({} duplicates skipped).",
                    inserted,
                    total,
                    total - inserted
                ),
                json!({ "inserted": inserted, "skipped": total - inserted }),
            ),
            Err(e) => ToolResult::from_error("Ingest failed", &e),
        }
    }

    /// List strategies with base weights, or weights adjusted for a query.
    pub fn strategies(&self, params: StrategiesParams) -> ToolResult {
        let registry = self.retriever.registry();
        let (strategies, heading) = match params.query.as_deref() {
            Some(query) => {
                let intent = self.retriever.analyzer().analyze(query);
                (
                    registry.adjust(&intent),
                    format!("Strategy weights adjusted for {:?}:", query),
                )
            }
            None => (
                registry.strategies().to_vec(),
                "Base strategy weights:".to_string(),
            ),
        };

        let mut output = format!("{}\n\n", heading);
        for strategy in &strategies {
            let transform = strategy
                .transform
                .map(|t| t.to_string())
                .unwrap_or_else(|| "none".to_string());
            output.push_str(&format!(
                "- {} ({}): {:.3}, transform {}{}\n",
                strategy.name,
                strategy.role,
                strategy.weight,
                transform,
                if strategy.enabled { "" } else { " [disabled]" }
            ));
        }

        ToolResult::success_with(output, &strategies)
    }

    /// Get statistics.
    pub async fn stats(&self) -> ToolResult {
        match self.index.stats() {
            Ok(stats) => {
                let mut output = String::from("Index statistics:\n\n");
                output.push_str(&format!("- Documents: {}\n", stats.documents));
                output.push_str(&format!(
                    "- Storage: {:.2} MB\n",
                    stats.storage_bytes as f64 / 1024.0 / 1024.0
                ));
                output.push_str(&format!(
                    "- Strategies: {}\n",
                    self.retriever.registry().len()
                ));
                output.push_str(&format!(
                    "- Reranker: {}\n",
                    self.retriever.reranker_name().unwrap_or("none")
                ));

                ToolResult::success_with(output, &stats)
            }
            Err(e) => ToolResult::from_error("Failed to get stats", &e),
        }
    }
}

fn preview(content: &str) -> String {
    let mut chars = content.chars();
    let head: String = chars.by_ref().take(PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{}...", head)
    } else {
        head
    }
}

/// Server info.
#[derive(Debug, Serialize)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
    pub description: String,
}

/// Tool info.
#[derive(Debug, Serialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
}
