//! Configuration types for the retrieval system.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::error::{Result, RetrievalError};
use crate::types::{MetadataFilter, QueryTransform, RetrievalStrategy, StrategyRole};

/// Main configuration for the retrieval system.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MvrConfig {
    /// Document index configuration.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Pipeline configuration.
    #[serde(default)]
    pub search: SearchConfig,

    /// Strategy registry, in execution order.
    #[serde(default = "default_strategies")]
    pub strategies: Vec<RetrievalStrategy>,

    /// Intent-driven weight multipliers.
    #[serde(default)]
    pub boosts: BoostConfig,

    /// Structural query analysis vocabulary.
    #[serde(default)]
    pub analysis: AnalysisConfig,

    /// Query transform vocabulary.
    #[serde(default)]
    pub transform: TransformConfig,

    /// Reranker configuration.
    #[serde(default)]
    pub rerank: RerankConfig,

    /// Query-intelligence configuration.
    #[serde(default)]
    pub intelligence: IntelligenceConfig,

    /// Conversation history retention.
    #[serde(default)]
    pub conversation: ConversationConfig,
}

/// Document index configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite index file.
    #[serde(default = "default_database_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

/// Pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// RRF damping constant k.
    #[serde(default = "default_rrf_k")]
    pub rrf_k: f32,

    /// Results requested from each strategy before fusion.
    #[serde(default = "default_per_strategy_top_k")]
    pub per_strategy_top_k: usize,

    /// Default number of final results.
    #[serde(default = "default_max_results")]
    pub default_max_results: usize,

    /// Per-strategy search timeout in milliseconds.
    #[serde(default = "default_search_timeout_ms")]
    pub search_timeout_ms: u64,

    /// Rerank fused candidates.
    #[serde(default = "default_true")]
    pub rerank_enabled: bool,

    /// Rerank the top `factor * max_results` fused candidates.
    #[serde(default = "default_rerank_candidate_factor")]
    pub rerank_candidate_factor: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            rrf_k: 60.0,
            per_strategy_top_k: 10,
            default_max_results: 5,
            search_timeout_ms: 5000,
            rerank_enabled: true,
            rerank_candidate_factor: 2,
        }
    }
}

/// Multipliers applied by the structural weight adjuster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoostConfig {
    /// Exact-match strategy when a product code is detected.
    #[serde(default = "default_product_code_boost")]
    pub product_code: f32,

    /// Technical-spec strategy when technical vocabulary is present.
    #[serde(default = "default_technical_boost")]
    pub technical: f32,

    /// Q/A strategy when the query is phrased as a question.
    #[serde(default = "default_question_boost")]
    pub question: f32,
}

impl Default for BoostConfig {
    fn default() -> Self {
        Self {
            product_code: 1.5,
            technical: 1.3,
            question: 1.4,
        }
    }
}

/// Vocabulary for the structural query analyzer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Brand prefixes a product code must start with.
    #[serde(default = "default_product_prefixes")]
    pub product_prefixes: Vec<String>,

    /// Technical vocabulary (substring match).
    #[serde(default = "default_technical_terms")]
    pub technical_terms: Vec<String>,

    /// Interrogative words that mark a question.
    #[serde(default = "default_interrogatives")]
    pub interrogatives: Vec<String>,

    /// Comparison markers (word-prefix match).
    #[serde(default = "default_comparison_terms")]
    pub comparison_terms: Vec<String>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            product_prefixes: default_product_prefixes(),
            technical_terms: default_technical_terms(),
            interrogatives: default_interrogatives(),
            comparison_terms: default_comparison_terms(),
        }
    }
}

/// A synonym-expansion rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryExpansion {
    /// Term that triggers the rule (substring of the lowercased query).
    pub term: String,

    /// Text appended when the rule fires.
    pub expansion: String,
}

impl QueryExpansion {
    fn new(term: &str, expansion: &str) -> Self {
        Self {
            term: term.to_string(),
            expansion: expansion.to_string(),
        }
    }
}

/// Vocabulary for query transforms.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformConfig {
    /// Words whose presence means the query is already technical.
    #[serde(default = "default_technical_markers")]
    pub technical_markers: Vec<String>,

    /// Suffix appended by the technical-focused transform.
    #[serde(default = "default_technical_suffix")]
    pub technical_suffix: String,

    /// Words stripped by the content-optimization transform.
    #[serde(default = "default_stop_words")]
    pub stop_words: Vec<String>,

    /// Synonym expansions, applied in order.
    #[serde(default = "default_expansions")]
    pub expansions: Vec<QueryExpansion>,

    /// Generic domain terms appended when a product code is present.
    #[serde(default = "default_generic_terms")]
    pub generic_terms: String,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            technical_markers: default_technical_markers(),
            technical_suffix: default_technical_suffix(),
            stop_words: default_stop_words(),
            expansions: default_expansions(),
            generic_terms: default_generic_terms(),
        }
    }
}

/// Reranker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankConfig {
    /// Blend coefficient for the original score.
    #[serde(default = "default_semantic_weight")]
    pub semantic_weight: f32,

    /// Blend coefficient for the relevance score.
    #[serde(default = "default_rerank_weight")]
    pub rerank_weight: f32,

    /// Path to a cross-encoder ONNX model. Heuristic scoring when unset.
    #[serde(default)]
    pub model_path: Option<PathBuf>,

    /// Path to the cross-encoder's tokenizer.json.
    #[serde(default)]
    pub tokenizer_path: Option<PathBuf>,

    /// Maximum tokens per (query, content) pair.
    #[serde(default = "default_max_length")]
    pub max_length: usize,

    /// Threads for CPU inference.
    #[serde(default = "default_num_threads")]
    pub num_threads: usize,

    /// Feed `token_type_ids` to the model (BERT-style cross-encoders).
    #[serde(default = "default_true")]
    pub use_token_type_ids: bool,

    /// Metadata field holding the content classification.
    #[serde(default = "default_content_type_field")]
    pub content_type_field: String,

    /// Metadata field holding the product identifier.
    #[serde(default = "default_product_field")]
    pub product_field: String,
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            semantic_weight: 0.7,
            rerank_weight: 0.3,
            model_path: None,
            tokenizer_path: None,
            max_length: 512,
            num_threads: 4,
            use_token_type_ids: true,
            content_type_field: default_content_type_field(),
            product_field: default_product_field(),
        }
    }
}

/// Query-intelligence configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntelligenceConfig {
    /// Consult the intelligence collaborator when one is wired in.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Below this confidence a clarification is suggested.
    #[serde(default = "default_clarification_threshold")]
    pub clarification_threshold: f32,

    /// Conversation turns included in the intent prompt.
    #[serde(default = "default_history_turns")]
    pub history_turns: usize,

    /// Ollama chat model backing query intelligence (none = structural only).
    #[serde(default)]
    pub model: Option<String>,

    /// Ollama server base URL.
    #[serde(default = "default_ollama_url")]
    pub base_url: String,

    /// Per-request timeout for the generator in milliseconds.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for IntelligenceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            clarification_threshold: 0.6,
            history_turns: 3,
            model: None,
            base_url: default_ollama_url(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

/// Conversation history retention.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationConfig {
    /// Turns kept per session; older turns are dropped.
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,

    /// Sessions kept; the least recently active session is evicted first.
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            max_sessions: default_max_sessions(),
        }
    }
}

// Default value functions

fn default_true() -> bool {
    true
}

fn default_rrf_k() -> f32 {
    60.0
}

fn default_per_strategy_top_k() -> usize {
    10
}

fn default_max_results() -> usize {
    5
}

fn default_search_timeout_ms() -> u64 {
    5000
}

fn default_rerank_candidate_factor() -> usize {
    2
}

fn default_product_code_boost() -> f32 {
    1.5
}

fn default_technical_boost() -> f32 {
    1.3
}

fn default_question_boost() -> f32 {
    1.4
}

fn default_semantic_weight() -> f32 {
    0.7
}

fn default_rerank_weight() -> f32 {
    0.3
}

fn default_max_length() -> usize {
    512
}

fn default_num_threads() -> usize {
    4
}

fn default_content_type_field() -> String {
    "content_type".to_string()
}

fn default_product_field() -> String {
    "model".to_string()
}

fn default_clarification_threshold() -> f32 {
    0.6
}

fn default_history_turns() -> usize {
    3
}

fn default_max_turns() -> usize {
    20
}

fn default_max_sessions() -> usize {
    1000
}

fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn default_product_prefixes() -> Vec<String> {
    strings(&["k"])
}

fn default_technical_terms() -> Vec<String> {
    strings(&[
        "spec",
        "power",
        "frequency",
        "dimension",
        "weight",
        "technical",
        "parameters",
    ])
}

fn default_interrogatives() -> Vec<String> {
    strings(&["what", "how", "where", "when", "why", "which"])
}

fn default_comparison_terms() -> Vec<String> {
    strings(&["vs", "versus", "compare", "difference", "better"])
}

fn default_technical_markers() -> Vec<String> {
    strings(&["specifications", "specs", "technical", "parameters"])
}

fn default_technical_suffix() -> String {
    "specifications technical details".to_string()
}

fn default_stop_words() -> Vec<String> {
    strings(&[
        "what", "how", "where", "when", "why", "which", "is", "are", "can", "does",
    ])
}

fn default_expansions() -> Vec<QueryExpansion> {
    vec![
        QueryExpansion::new("power", "power watt output"),
        QueryExpansion::new("size", "dimensions weight physical"),
        QueryExpansion::new("connect", "connectivity input output interface"),
        QueryExpansion::new("install", "installation mounting setup configuration"),
        QueryExpansion::new("spec", "specifications technical details"),
        QueryExpansion::new("app", "applications use cases installations"),
    ]
}

fn default_generic_terms() -> String {
    "K-Array audio speaker amplifier".to_string()
}

/// The built-in six-strategy registry.
pub fn default_strategies() -> Vec<RetrievalStrategy> {
    vec![
        RetrievalStrategy::new("exact_product_match", StrategyRole::ExactMatch, 0.25)
            .with_filter(
                MetadataFilter::new()
                    .with("content_type", vec!["technical_specs", "searchable_text"]),
            )
            .with_transform(QueryTransform::ProductFocused),
        RetrievalStrategy::new("qa_pairs", StrategyRole::QaPairs, 0.20)
            .with_filter(MetadataFilter::new().with("content_type", vec!["question", "answer"]))
            .with_transform(QueryTransform::QuestionFormat),
        RetrievalStrategy::new("technical_specs", StrategyRole::TechnicalSpecs, 0.18)
            .with_filter(MetadataFilter::new().with("content_type", "technical_specs"))
            .with_transform(QueryTransform::TechnicalFocused),
        RetrievalStrategy::new("semantic_chunks", StrategyRole::SemanticChunks, 0.15)
            .with_filter(MetadataFilter::new().with("content_type", "semantic_chunk"))
            .with_transform(QueryTransform::SemanticExpansion),
        RetrievalStrategy::new("searchable_content", StrategyRole::SearchableContent, 0.12)
            .with_filter(MetadataFilter::new().with("content_type", "searchable_text"))
            .with_transform(QueryTransform::ContentOptimization),
        RetrievalStrategy::new("hybrid_search", StrategyRole::Broad, 0.10)
            .with_transform(QueryTransform::QueryExpansion),
    ]
}

fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mvr")
        .join("index.db")
}

impl MvrConfig {
    /// Create the default configuration.
    pub fn new() -> Self {
        Self {
            strategies: default_strategies(),
            ..Default::default()
        }
    }

    /// Load configuration from file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| RetrievalError::config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from default paths.
    pub fn load_default() -> Result<Self> {
        // Try user config first
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("mvr").join("config.toml");
            if user_config.exists() {
                return Self::load(&user_config);
            }
        }

        // Try local config
        let local_config = PathBuf::from("mvr.toml");
        if local_config.exists() {
            return Self::load(&local_config);
        }

        Ok(Self::new())
    }

    /// Check invariants serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.search.rrf_k <= 0.0 {
            return Err(RetrievalError::config("search.rrf_k must be positive"));
        }
        if self.search.per_strategy_top_k == 0 {
            return Err(RetrievalError::config(
                "search.per_strategy_top_k must be at least 1",
            ));
        }

        let mut names = HashSet::new();
        for strategy in &self.strategies {
            if !(0.0..=1.0).contains(&strategy.weight) {
                return Err(RetrievalError::config(format!(
                    "strategy '{}' weight {} is outside [0, 1]",
                    strategy.name, strategy.weight
                )));
            }
            if !names.insert(strategy.name.as_str()) {
                return Err(RetrievalError::config(format!(
                    "duplicate strategy name '{}'",
                    strategy.name
                )));
            }
        }

        for (name, factor) in [
            ("product_code", self.boosts.product_code),
            ("technical", self.boosts.technical),
            ("question", self.boosts.question),
        ] {
            if factor < 0.0 {
                return Err(RetrievalError::config(format!(
                    "boosts.{} must not be negative",
                    name
                )));
            }
        }

        if self.conversation.max_sessions == 0 {
            return Err(RetrievalError::config(
                "conversation.max_sessions must be at least 1",
            ));
        }
        if matches!(&self.intelligence.model, Some(model) if model.trim().is_empty()) {
            return Err(RetrievalError::config(
                "intelligence.model must not be blank",
            ));
        }

        Ok(())
    }
}
