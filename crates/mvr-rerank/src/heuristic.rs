//! Deterministic relevance scoring used when no cross-encoder is configured.

use mvr_core::{Document, RerankConfig};

const BASE_SCORE: f32 = 0.5;
const KEYWORD_BONUS: f32 = 0.1;
const PRODUCT_BONUS: f32 = 0.2;

/// Content-classification bonuses, checked in order; the first match wins.
const CONTENT_TYPE_BONUSES: [(&str, f32); 3] = [
    ("technical_specs", 0.2),
    ("searchable_text", 0.15),
    ("answer", 0.1),
];

/// Keyword-overlap relevance heuristic.
///
/// Scores start at 0.5 and collect bonuses for query words found in the
/// content, for the document's content classification and for overlap with
/// the product-identifier field. The result is capped at 1.0.
#[derive(Debug, Clone)]
pub struct HeuristicRelevance {
    content_type_field: String,
    product_field: String,
}

impl HeuristicRelevance {
    /// Create a heuristic reading the given metadata fields.
    pub fn new(content_type_field: impl Into<String>, product_field: impl Into<String>) -> Self {
        Self {
            content_type_field: content_type_field.into(),
            product_field: product_field.into(),
        }
    }

    /// Create a heuristic from rerank configuration.
    pub fn from_config(config: &RerankConfig) -> Self {
        Self::new(&config.content_type_field, &config.product_field)
    }

    /// Score a single document against the query.
    pub fn score(&self, query: &str, document: &Document) -> f32 {
        let query = query.to_lowercase();
        let words: Vec<&str> = query.split_whitespace().collect();
        let content = document.content.to_lowercase();

        let mut score = BASE_SCORE;

        for word in &words {
            if content.contains(word) {
                score += KEYWORD_BONUS;
            }
        }

        if let Some(content_type) = document.meta(&self.content_type_field) {
            if let Some((_, bonus)) = CONTENT_TYPE_BONUSES
                .iter()
                .find(|(needle, _)| content_type.contains_text(needle))
            {
                score += bonus;
            }
        }

        let product = document
            .meta(&self.product_field)
            .map(|value| value.joined().to_lowercase())
            .unwrap_or_default();
        if words.iter().any(|word| product.contains(word)) {
            score += PRODUCT_BONUS;
        }

        score.min(1.0)
    }

    /// Score a batch of documents, one score per document, in order.
    pub fn score_batch(&self, query: &str, documents: &[Document]) -> Vec<f32> {
        documents.iter().map(|doc| self.score(query, doc)).collect()
    }
}

impl Default for HeuristicRelevance {
    fn default() -> Self {
        Self::from_config(&RerankConfig::default())
    }
}
