//! Blended reranking of fused candidates.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use mvr_core::{Document, RelevanceModel, RerankConfig, RerankResult, Result, RetrievalError};

use crate::heuristic::HeuristicRelevance;
use crate::onnx::OnnxCrossEncoder;

/// Name reported when the heuristic scorer is active.
pub const HEURISTIC_MODEL_NAME: &str = "heuristic";

/// Coarse query category used in rerank diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    Technical,
    Comparison,
    Application,
    General,
}

impl std::fmt::Display for QueryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Technical => "technical",
            Self::Comparison => "comparison",
            Self::Application => "application",
            Self::General => "general",
        };
        write!(f, "{}", s)
    }
}

const TECHNICAL_KEYWORDS: [&str; 6] = [
    "specs",
    "specifications",
    "power",
    "frequency",
    "dimensions",
    "weight",
];
const COMPARISON_KEYWORDS: [&str; 4] = ["vs", "versus", "compare", "difference"];
const APPLICATION_KEYWORDS: [&str; 5] = ["application", "use", "install", "setup", "how to"];

/// Classify a query by substring match, technical first.
pub fn classify_query_type(query: &str) -> QueryType {
    let query = query.to_lowercase();
    let has_any = |keywords: &[&str]| keywords.iter().any(|k| query.contains(k));

    if has_any(&TECHNICAL_KEYWORDS) {
        QueryType::Technical
    } else if has_any(&COMPARISON_KEYWORDS) {
        QueryType::Comparison
    } else if has_any(&APPLICATION_KEYWORDS) {
        QueryType::Application
    } else {
        QueryType::General
    }
}

/// Before/after comparison of a rerank pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RerankDiagnostics {
    pub original_avg_score: f32,
    pub reranked_avg_score: f32,
    pub score_improvement: f32,

    /// Results that moved two or more positions.
    pub significant_rank_changes: usize,
    pub query_type: QueryType,
    pub model_used: String,
}

enum Scorer {
    Model(Arc<dyn RelevanceModel>),
    Heuristic(HeuristicRelevance),
}

/// Reranker blending the incoming score with a pairwise relevance score.
///
/// `final = semantic_weight * original + rerank_weight * relevance`. The two
/// weights are independent coefficients and need not sum to one.
pub struct Reranker {
    scorer: Scorer,
    semantic_weight: f32,
    rerank_weight: f32,
}

impl Reranker {
    /// Reranker using the keyword heuristic.
    pub fn heuristic(config: &RerankConfig) -> Self {
        Self {
            scorer: Scorer::Heuristic(HeuristicRelevance::from_config(config)),
            semantic_weight: config.semantic_weight,
            rerank_weight: config.rerank_weight,
        }
    }

    /// Reranker using a relevance model.
    pub fn with_model(model: Arc<dyn RelevanceModel>, config: &RerankConfig) -> Self {
        Self {
            scorer: Scorer::Model(model),
            semantic_weight: config.semantic_weight,
            rerank_weight: config.rerank_weight,
        }
    }

    /// Load the configured cross-encoder, falling back to the heuristic when
    /// none is configured or it fails to load.
    pub fn from_config(config: &RerankConfig) -> Self {
        match (&config.model_path, &config.tokenizer_path) {
            (Some(model_path), Some(tokenizer_path)) => {
                match OnnxCrossEncoder::new(model_path, tokenizer_path, config) {
                    Ok(model) => Self::with_model(Arc::new(model), config),
                    Err(e) => {
                        warn!("Cross-encoder unavailable, using heuristic: {}", e);
                        Self::heuristic(config)
                    }
                }
            }
            (Some(_), None) | (None, Some(_)) => {
                warn!("Cross-encoder needs both model_path and tokenizer_path, using heuristic");
                Self::heuristic(config)
            }
            (None, None) => Self::heuristic(config),
        }
    }

    /// Name of the active relevance scorer.
    pub fn model_name(&self) -> &str {
        match &self.scorer {
            Scorer::Model(model) => model.name(),
            Scorer::Heuristic(_) => HEURISTIC_MODEL_NAME,
        }
    }

    fn relevance_scores(&self, query: &str, documents: &[Document]) -> Result<Vec<f32>> {
        match &self.scorer {
            Scorer::Heuristic(heuristic) => Ok(heuristic.score_batch(query, documents)),
            Scorer::Model(model) => {
                let contents: Vec<&str> = documents.iter().map(|d| d.content.as_str()).collect();
                let scores = model.score_batch(query, &contents)?;
                if scores.len() != documents.len() {
                    return Err(RetrievalError::relevance(format!(
                        "Model returned {} scores for {} documents",
                        scores.len(),
                        documents.len()
                    )));
                }
                Ok(scores)
            }
        }
    }

    /// Rerank, surfacing relevance-model failures.
    ///
    /// `rank_change` is the input position minus the output position.
    pub fn try_rerank(
        &self,
        query: &str,
        documents: &[Document],
        top_k: Option<usize>,
    ) -> Result<Vec<RerankResult>> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }

        let scores = self.relevance_scores(query, documents)?;

        let mut ranked: Vec<(usize, RerankResult)> = documents
            .iter()
            .zip(scores)
            .enumerate()
            .map(|(index, (doc, rerank_score))| {
                let final_score =
                    self.semantic_weight * doc.score + self.rerank_weight * rerank_score;
                (
                    index,
                    RerankResult {
                        document: doc.clone(),
                        original_score: doc.score,
                        rerank_score,
                        final_score,
                        rank_change: 0,
                    },
                )
            })
            .collect();

        ranked.sort_by(|a, b| {
            b.1.final_score
                .partial_cmp(&a.1.final_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut results: Vec<RerankResult> = ranked
            .into_iter()
            .enumerate()
            .map(|(new_rank, (original_rank, mut result))| {
                result.rank_change = original_rank as i64 - new_rank as i64;
                result
            })
            .collect();

        if let Some(k) = top_k {
            results.truncate(k);
        }

        info!(
            "Reranked {} documents with {}, returning top {}",
            documents.len(),
            self.model_name(),
            results.len()
        );

        Ok(results)
    }

    /// Rerank, degrading to pass-through on failure.
    ///
    /// Pass-through keeps every input in its original order with a zero
    /// relevance score, the original score as final score and no rank change.
    pub fn rerank(
        &self,
        query: &str,
        documents: &[Document],
        top_k: Option<usize>,
    ) -> Vec<RerankResult> {
        match self.try_rerank(query, documents, top_k) {
            Ok(results) => results,
            Err(e) => {
                warn!("Reranking failed, keeping original order: {}", e);
                pass_through(documents)
            }
        }
    }

    /// Compare scores before and after a rerank pass.
    ///
    /// Returns `None` when either side is empty.
    pub fn diagnostics(
        &self,
        query: &str,
        original: &[Document],
        reranked: &[RerankResult],
    ) -> Option<RerankDiagnostics> {
        if original.is_empty() || reranked.is_empty() {
            return None;
        }

        let original_avg_score =
            original.iter().map(|d| d.score).sum::<f32>() / original.len() as f32;
        let reranked_avg_score =
            reranked.iter().map(|r| r.final_score).sum::<f32>() / reranked.len() as f32;
        let significant_rank_changes = reranked
            .iter()
            .filter(|r| r.rank_change.abs() >= 2)
            .count();

        debug!(
            "Rerank diagnostics: avg {:.4} -> {:.4}, {} significant moves",
            original_avg_score, reranked_avg_score, significant_rank_changes
        );

        Some(RerankDiagnostics {
            original_avg_score,
            reranked_avg_score,
            score_improvement: reranked_avg_score - original_avg_score,
            significant_rank_changes,
            query_type: classify_query_type(query),
            model_used: self.model_name().to_string(),
        })
    }
}

fn pass_through(documents: &[Document]) -> Vec<RerankResult> {
    documents
        .iter()
        .map(|doc| RerankResult {
            document: doc.clone(),
            original_score: doc.score,
            rerank_score: 0.0,
            final_score: doc.score,
            rank_change: 0,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingModel;

    impl RelevanceModel for FailingModel {
        fn score_batch(&self, _query: &str, _contents: &[&str]) -> Result<Vec<f32>> {
            Err(RetrievalError::relevance("model not loaded"))
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    /// Scores each content by its length, so longer text ranks higher.
    struct LengthModel;

    impl RelevanceModel for LengthModel {
        fn score_batch(&self, _query: &str, contents: &[&str]) -> Result<Vec<f32>> {
            Ok(contents.iter().map(|c| c.len() as f32).collect())
        }

        fn name(&self) -> &str {
            "length"
        }
    }

    struct ShortModel;

    impl RelevanceModel for ShortModel {
        fn score_batch(&self, _query: &str, _contents: &[&str]) -> Result<Vec<f32>> {
            Ok(vec![1.0])
        }

        fn name(&self) -> &str {
            "short"
        }
    }

    fn docs() -> Vec<Document> {
        vec![
            Document::new("a", "x", 0.9),
            Document::new("b", "xxxxxxxxxxxx", 0.5),
            Document::new("c", "xxxxxx", 0.1),
        ]
    }

    #[test]
    fn test_empty_input() {
        let reranker = Reranker::heuristic(&RerankConfig::default());
        assert!(reranker.rerank("q", &[], Some(3)).is_empty());
    }

    #[test]
    fn test_pass_through_on_failure() {
        let reranker = Reranker::with_model(Arc::new(FailingModel), &RerankConfig::default());
        let input = docs();
        let results = reranker.rerank("q", &input, Some(1));

        // All inputs, original order, neutral metadata
        assert_eq!(results.len(), 3);
        for (result, doc) in results.iter().zip(&input) {
            assert_eq!(result.document.id, doc.id);
            assert_eq!(result.rank_change, 0);
            assert_eq!(result.rerank_score, 0.0);
            assert_eq!(result.final_score, doc.score);
        }
        assert!(reranker.try_rerank("q", &input, None).is_err());
    }

    #[test]
    fn test_score_count_mismatch_passes_through() {
        let reranker = Reranker::with_model(Arc::new(ShortModel), &RerankConfig::default());
        let results = reranker.rerank("q", &docs(), None);
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| r.rank_change == 0));
    }

    #[test]
    fn test_blend_sort_and_rank_change() {
        let reranker = Reranker::with_model(Arc::new(LengthModel), &RerankConfig::default());
        let results = reranker.rerank("q", &docs(), None);

        // a: 0.63 + 0.3 = 0.93, b: 0.35 + 3.6 = 3.95, c: 0.07 + 1.8 = 1.87
        let ids: Vec<&str> = results.iter().map(|r| r.document.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c", "a"]);
        assert_eq!(results[0].rank_change, 1);
        assert_eq!(results[1].rank_change, 1);
        assert_eq!(results[2].rank_change, -2);
        assert!((results[0].final_score - 3.95).abs() < 1e-4);

        for pair in results.windows(2) {
            assert!(pair[0].final_score >= pair[1].final_score);
        }
    }

    #[test]
    fn test_top_k_truncates() {
        let reranker = Reranker::with_model(Arc::new(LengthModel), &RerankConfig::default());
        let results = reranker.rerank("q", &docs(), Some(2));
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].document.id, "b");
    }

    #[test]
    fn test_heuristic_reranker_prefers_matching_content() {
        let reranker = Reranker::heuristic(&RerankConfig::default());
        let input = vec![
            Document::new("off", "mounting bracket", 0.02),
            Document::new("on", "KA02I output power 150 W", 0.02)
                .with_metadata("content_type", "technical_specs"),
        ];
        let results = reranker.rerank("ka02i power", &input, None);
        assert_eq!(results[0].document.id, "on");
        assert_eq!(reranker.model_name(), HEURISTIC_MODEL_NAME);
    }

    #[test]
    fn test_from_config_without_model_uses_heuristic() {
        let mut config = RerankConfig::default();
        config.model_path = Some("/nonexistent/model.onnx".into());
        assert_eq!(Reranker::from_config(&config).model_name(), HEURISTIC_MODEL_NAME);
        assert_eq!(
            Reranker::from_config(&RerankConfig::default()).model_name(),
            HEURISTIC_MODEL_NAME
        );
    }

    #[test]
    fn test_classify_query_type() {
        assert_eq!(classify_query_type("KA02I power"), QueryType::Technical);
        assert_eq!(classify_query_type("Kobra versus Python"), QueryType::Comparison);
        assert_eq!(classify_query_type("how to install"), QueryType::Application);
        assert_eq!(classify_query_type("tell me about Kayman"), QueryType::General);
    }

    #[test]
    fn test_diagnostics() {
        let reranker = Reranker::with_model(Arc::new(LengthModel), &RerankConfig::default());
        let input = docs();
        let results = reranker.rerank("compare", &input, None);
        let diagnostics = reranker.diagnostics("compare", &input, &results).unwrap();

        assert_eq!(diagnostics.significant_rank_changes, 1);
        assert_eq!(diagnostics.query_type, QueryType::Comparison);
        assert_eq!(diagnostics.model_used, "length");
        assert!(diagnostics.score_improvement > 0.0);
        assert!(reranker.diagnostics("q", &[], &results).is_none());
    }
}
