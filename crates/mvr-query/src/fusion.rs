//! Reciprocal Rank Fusion (RRF) for combining strategy results.

use std::collections::{BTreeMap, HashMap};

use mvr_core::{Document, FusedResult, StrategyTag};

/// RRF constant (commonly 60).
/// Higher values flatten the gap between top and lower ranks.
pub const DEFAULT_RRF_K: f32 = 60.0;

/// Ranked documents returned by one strategy for one query.
#[derive(Debug, Clone)]
pub struct StrategyRun {
    /// Strategy name, adjusted weight and transformed query.
    pub tag: StrategyTag,

    /// Documents in the order the index ranked them.
    pub documents: Vec<Document>,
}

/// Fuse per-strategy result lists using weighted Reciprocal Rank Fusion.
///
/// Contribution = weight * 1 / (k + rank + 1), rank zero-based. Raw index
/// scores are ignored. A document listed twice by one strategy counts once,
/// at its best rank. The payload kept is the first one seen.
///
/// # Arguments
/// * `runs` - Strategy results, in strategy execution order
/// * `enabled_strategies` - Denominator for `confidence`
/// * `k` - RRF damping constant
///
/// # Returns
/// Fused results sorted by combined score descending; ties keep first-seen order
pub fn reciprocal_rank_fusion(
    runs: &[StrategyRun],
    enabled_strategies: usize,
    k: f32,
) -> Vec<FusedResult> {
    let mut fused: Vec<FusedResult> = Vec::new();
    let mut positions: HashMap<&str, usize> = HashMap::new();

    for run in runs {
        let strategy = run.tag.strategy.as_str();

        for (rank, doc) in run.documents.iter().enumerate() {
            let contribution = run.tag.weight * (1.0 / (k + rank as f32 + 1.0));

            let index = *positions.entry(doc.id.as_str()).or_insert_with(|| {
                fused.push(FusedResult {
                    document: doc.clone(),
                    source: run.tag.clone(),
                    combined_score: 0.0,
                    strategy_scores: BTreeMap::new(),
                    strategy_ranks: BTreeMap::new(),
                    confidence: 0.0,
                });
                fused.len() - 1
            });

            let entry = &mut fused[index];
            if entry.strategy_scores.contains_key(strategy) {
                continue;
            }
            entry.strategy_scores.insert(strategy.to_string(), contribution);
            entry.strategy_ranks.insert(strategy.to_string(), rank + 1);
        }
    }

    let denominator = enabled_strategies.max(1) as f32;
    for result in &mut fused {
        result.combined_score = result.strategy_scores.values().sum();
        result.confidence = (result.num_strategies() as f32 / denominator).min(1.0);
    }

    fused.sort_by(|a, b| {
        b.combined_score
            .partial_cmp(&a.combined_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    fused
}
