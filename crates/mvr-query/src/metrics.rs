//! Coverage and consensus diagnostics over a result set.

use std::collections::BTreeSet;

use mvr_core::{AnnotatedDocument, QualityMetrics, QueryIntent};

/// Compute quality metrics for a set of returned documents.
///
/// `total_strategies` is the number of registered strategies, enabled or not.
/// An empty result set yields zeroed metrics.
pub fn quality_metrics(
    query_intent: QueryIntent,
    results: &[AnnotatedDocument],
    total_strategies: usize,
) -> QualityMetrics {
    let strategies_used: BTreeSet<&str> = results
        .iter()
        .flat_map(|r| r.fusion.strategy_scores.keys().map(String::as_str))
        .collect();

    let average_confidence = if results.is_empty() {
        0.0
    } else {
        results.iter().map(|r| r.fusion.confidence).sum::<f32>() / results.len() as f32
    };

    let strategy_coverage = if total_strategies == 0 {
        0.0
    } else {
        strategies_used.len() as f32 / total_strategies as f32
    };

    QualityMetrics {
        average_confidence,
        strategy_coverage,
        strategies_used: strategies_used.into_iter().map(String::from).collect(),
        result_count: results.len(),
        total_strategies_available: total_strategies,
        reranking_applied: results.iter().any(|r| r.rerank.is_some()),
        query_intent,
    }
}
