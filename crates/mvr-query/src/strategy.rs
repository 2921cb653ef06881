//! Strategy registry and per-query weight adjustment.

use tracing::debug;

use mvr_core::{
    BoostConfig, IntentLabel, MvrConfig, QueryComplexity, QueryIntelligence, QueryIntent,
    RetrievalStrategy, StrategyRole,
};

use StrategyRole::{Broad, ExactMatch, QaPairs, SearchableContent, SemanticChunks, TechnicalSpecs};

/// Slack allowed above 1.0 before renormalizing, absorbing f32 rounding.
const WEIGHT_EPSILON: f32 = 1e-6;

/// Intent-label multipliers: (label, roles, factor).
const INTENT_BOOSTS: [(IntentLabel, &[StrategyRole], f32); 6] = [
    (IntentLabel::TechnicalSpecsOnly, &[TechnicalSpecs, ExactMatch], 2.0),
    (IntentLabel::TechnicalSpecsOnly, &[QaPairs], 1.5),
    (IntentLabel::TechnicalSpecsOnly, &[SearchableContent], 0.3),
    (IntentLabel::ApplicationsOnly, &[QaPairs, SemanticChunks], 1.8),
    (IntentLabel::ApplicationsOnly, &[TechnicalSpecs], 0.2),
    (IntentLabel::ProductComparison, &[ExactMatch, TechnicalSpecs], 1.6),
];
const COMPARISON_BROAD_BOOST: f32 = 1.3;
const PRODUCTS_MENTIONED_BOOST: f32 = 1.5;
const SIMPLE_QUERY_BOOST: f32 = 1.3;
const COMPLEX_QUERY_BOOST: f32 = 1.4;

/// The base strategy set. Never mutated after construction; every
/// adjustment returns a fresh copy.
#[derive(Debug, Clone)]
pub struct StrategyRegistry {
    strategies: Vec<RetrievalStrategy>,
    boosts: BoostConfig,
}

impl StrategyRegistry {
    /// Create a registry.
    pub fn new(strategies: Vec<RetrievalStrategy>, boosts: BoostConfig) -> Self {
        Self { strategies, boosts }
    }

    /// Create a registry from configuration.
    pub fn from_config(config: &MvrConfig) -> Self {
        Self::new(config.strategies.clone(), config.boosts.clone())
    }

    /// Base strategies, in execution order.
    pub fn strategies(&self) -> &[RetrievalStrategy] {
        &self.strategies
    }

    /// Number of registered strategies, enabled or not.
    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    /// Whether no strategies are registered.
    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    /// Boost strategies according to structural intent, then renormalize.
    pub fn adjust(&self, intent: &QueryIntent) -> Vec<RetrievalStrategy> {
        let mut adjusted = self.strategies.clone();

        if intent.has_product_code {
            scale(&mut adjusted, &[ExactMatch], self.boosts.product_code);
        }
        if intent.is_technical {
            scale(&mut adjusted, &[TechnicalSpecs], self.boosts.technical);
        }
        if intent.is_question {
            scale(&mut adjusted, &[QaPairs], self.boosts.question);
        }

        renormalize(&mut adjusted);
        debug!("Structural weights: {}", describe(&adjusted));
        adjusted
    }

    /// Boost strategies according to an intelligence descriptor, then
    /// renormalize. Replaces the structural boosts entirely.
    pub fn adjust_with_intelligence(
        &self,
        intelligence: &QueryIntelligence,
    ) -> Vec<RetrievalStrategy> {
        let mut adjusted = self.strategies.clone();

        for (label, roles, factor) in INTENT_BOOSTS {
            if intelligence.intent == label {
                scale(&mut adjusted, roles, factor);
            }
        }
        if intelligence.intent == IntentLabel::ProductComparison {
            scale(&mut adjusted, &[Broad], COMPARISON_BROAD_BOOST);
        }

        if !intelligence.products_mentioned.is_empty() {
            scale(&mut adjusted, &[ExactMatch], PRODUCTS_MENTIONED_BOOST);
        }

        match intelligence.complexity {
            QueryComplexity::Simple => {
                scale(&mut adjusted, &[ExactMatch, QaPairs], SIMPLE_QUERY_BOOST)
            }
            QueryComplexity::Complex => scale(&mut adjusted, &[Broad], COMPLEX_QUERY_BOOST),
            QueryComplexity::Moderate | QueryComplexity::Ambiguous => {}
        }

        renormalize(&mut adjusted);
        debug!("Intelligence weights: {}", describe(&adjusted));
        adjusted
    }
}

fn scale(strategies: &mut [RetrievalStrategy], roles: &[StrategyRole], factor: f32) {
    for strategy in strategies.iter_mut().filter(|s| roles.contains(&s.role)) {
        strategy.weight *= factor;
    }
}

/// Divide every enabled weight by the enabled total when it exceeds 1.0.
///
/// Disabled strategies are excluded from both the sum and the division.
pub fn renormalize(strategies: &mut [RetrievalStrategy]) {
    let total: f32 = strategies
        .iter()
        .filter(|s| s.enabled)
        .map(|s| s.weight)
        .sum();

    if total > 1.0 + WEIGHT_EPSILON {
        for strategy in strategies.iter_mut().filter(|s| s.enabled) {
            strategy.weight /= total;
        }
    }
}

fn describe(strategies: &[RetrievalStrategy]) -> String {
    strategies
        .iter()
        .filter(|s| s.enabled)
        .map(|s| format!("{}={:.3}", s.name, s.weight))
        .collect::<Vec<_>>()
        .join(", ")
}
