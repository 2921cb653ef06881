//! mvr-rerank - Pairwise relevance reranking
//!
//! This crate refines a fused candidate list by scoring each (query, content)
//! pair and blending that score with the incoming fusion score.
//!
//! # Features
//!
//! - ONNX Runtime cross-encoder with sigmoid-normalized logits
//! - Deterministic keyword heuristic when no model is configured
//! - Pass-through ordering whenever the relevance model fails
//! - Rank-change tracking and before/after diagnostics

mod heuristic;
mod onnx;
mod reranker;

pub use heuristic::HeuristicRelevance;
pub use onnx::OnnxCrossEncoder;
pub use reranker::{
    classify_query_type, QueryType, RerankDiagnostics, Reranker, HEURISTIC_MODEL_NAME,
};

// Re-export the RelevanceModel trait for convenience
pub use mvr_core::RelevanceModel;
