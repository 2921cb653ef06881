//! mvr-query - Multi-strategy retrieval
//!
//! This crate runs several differently-filtered, differently-phrased searches
//! against one document index and merges them with weighted Reciprocal Rank
//! Fusion (RRF), optionally reranking the head of the fused list.
//!
//! # Features
//!
//! - Structural query analysis (product codes, technical vocabulary, questions)
//! - Per-strategy query transforms
//! - Intent-driven strategy weighting with renormalization
//! - LLM-assisted query intelligence (Ollama) with structural fallback
//! - Concurrent strategy execution with per-strategy timeouts
//! - Quality metrics over result sets
//!
//! # Example
//!
//! ```rust,ignore
//! use mvr_query::MultiStrategyRetriever;
//! use std::sync::Arc;
//!
//! let retriever = MultiStrategyRetriever::from_config(Arc::new(index), &config)?;
//! let response = retriever.retrieve("KA02I power specs", 5, &[]).await;
//! ```

mod engine;
mod fusion;
mod intelligence;
mod intent;
mod metrics;
mod ollama;
mod strategy;
mod transform;

pub use engine::{MultiStrategyRetriever, RetrieveOptions};
pub use fusion::{reciprocal_rank_fusion, StrategyRun, DEFAULT_RRF_K};
pub use intelligence::{
    clarification_question, fallback_language, optimize_query, should_ask_clarification,
    LanguageDetection, LlmQueryAnalyzer,
};
pub use intent::QueryAnalyzer;
pub use metrics::quality_metrics;
pub use ollama::OllamaGenerator;
pub use strategy::{renormalize, StrategyRegistry};
pub use transform::QueryTransformer;
