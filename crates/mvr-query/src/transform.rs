//! Query rewrites applied per strategy before searching.

use regex::Regex;

use mvr_core::{
    AnalysisConfig, QueryExpansion, QueryTransform, Result, RetrievalError, TransformConfig,
};

use crate::intent::{bare_token, product_code_pattern};

/// Deterministic query rewrites.
///
/// Every transform is total: when no rule applies the query comes back
/// unchanged.
#[derive(Debug, Clone)]
pub struct QueryTransformer {
    product_pattern: Regex,
    stop_words: Regex,
    interrogatives: Vec<String>,
    technical_markers: Vec<String>,
    technical_suffix: String,
    expansions: Vec<QueryExpansion>,
    generic_terms: String,
}

impl QueryTransformer {
    /// Create a transformer from its vocabulary.
    pub fn new(analysis: &AnalysisConfig, transform: &TransformConfig) -> Result<Self> {
        let stop_words = transform
            .stop_words
            .iter()
            .map(|w| regex::escape(w))
            .collect::<Vec<_>>()
            .join("|");
        let stop_words = Regex::new(&format!(r"(?i)\b(?:{})\b", stop_words))
            .map_err(|e| RetrievalError::config(format!("Invalid stop word list: {}", e)))?;

        Ok(Self {
            product_pattern: product_code_pattern(&analysis.product_prefixes)?,
            stop_words,
            interrogatives: analysis
                .interrogatives
                .iter()
                .map(|w| w.to_lowercase())
                .collect(),
            technical_markers: transform
                .technical_markers
                .iter()
                .map(|w| w.to_lowercase())
                .collect(),
            technical_suffix: transform.technical_suffix.clone(),
            expansions: transform
                .expansions
                .iter()
                .map(|rule| QueryExpansion {
                    term: rule.term.to_lowercase(),
                    expansion: rule.expansion.clone(),
                })
                .collect(),
            generic_terms: transform.generic_terms.clone(),
        })
    }

    /// Apply one transform.
    pub fn apply(&self, transform: QueryTransform, query: &str) -> String {
        match transform {
            QueryTransform::ProductFocused => self.product_focused(query),
            QueryTransform::QuestionFormat => self.question_format(query),
            QueryTransform::TechnicalFocused => self.technical_focused(query),
            QueryTransform::SemanticExpansion => self.semantic_expansion(query),
            QueryTransform::ContentOptimization => self.content_optimization(query),
            QueryTransform::QueryExpansion => self.query_expansion(query),
        }
    }

    /// Prepend the first product code, uppercased.
    pub fn product_focused(&self, query: &str) -> String {
        let lowered = query.to_lowercase();
        match self.product_pattern.find(&lowered) {
            Some(m) => format!("{} {}", m.as_str().to_uppercase(), query),
            None => query.to_string(),
        }
    }

    /// Phrase the query as a question. Idempotent.
    pub fn question_format(&self, query: &str) -> String {
        let trimmed = query.trim();
        if trimmed.is_empty() || trimmed.ends_with('?') {
            return query.to_string();
        }

        let starts_with_interrogative = trimmed
            .split_whitespace()
            .next()
            .map(|first| {
                let first = bare_token(first).to_lowercase();
                self.interrogatives.iter().any(|w| *w == first)
            })
            .unwrap_or(false);

        if starts_with_interrogative {
            format!("{}?", trimmed)
        } else {
            format!("What {}?", trimmed)
        }
    }

    /// Append technical vocabulary unless some is already present.
    pub fn technical_focused(&self, query: &str) -> String {
        let lowered = query.to_lowercase();
        if self
            .technical_markers
            .iter()
            .any(|marker| lowered.contains(marker.as_str()))
        {
            query.to_string()
        } else {
            format!("{} {}", query, self.technical_suffix)
        }
    }

    /// Append the expansion of every rule whose term occurs in the query.
    pub fn semantic_expansion(&self, query: &str) -> String {
        let lowered = query.to_lowercase();
        let mut expanded = query.to_string();
        for rule in &self.expansions {
            if lowered.contains(rule.term.as_str()) {
                expanded.push(' ');
                expanded.push_str(&rule.expansion);
            }
        }
        expanded
    }

    /// Drop interrogatives and auxiliaries, collapsing whitespace.
    ///
    /// A query made only of stop words is returned unchanged.
    pub fn content_optimization(&self, query: &str) -> String {
        let stripped = self.stop_words.replace_all(query, "");
        let optimized = stripped.split_whitespace().collect::<Vec<_>>().join(" ");
        if optimized.is_empty() {
            query.to_string()
        } else {
            optimized
        }
    }

    /// Append generic domain terms when a product code is present.
    pub fn query_expansion(&self, query: &str) -> String {
        if self.product_pattern.is_match(&query.to_lowercase()) {
            format!("{} {}", query, self.generic_terms)
        } else {
            query.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transformer() -> QueryTransformer {
        QueryTransformer::new(&AnalysisConfig::default(), &TransformConfig::default()).unwrap()
    }

    #[test]
    fn test_product_focused() {
        let t = transformer();
        assert_eq!(t.product_focused("power of the ka02i"), "KA02I power of the ka02i");
        assert_eq!(t.product_focused("line array"), "line array");
    }

    #[test]
    fn test_question_format() {
        let t = transformer();
        assert_eq!(t.question_format("KA02I power"), "What KA02I power?");
        assert_eq!(t.question_format("how do I mount it"), "how do I mount it?");
        assert_eq!(t.question_format("Is it waterproof?"), "Is it waterproof?");
    }

    #[test]
    fn test_question_format_is_idempotent() {
        let t = transformer();
        for query in ["KA02I power", "where is it used", "What?", "  spaced out  ", ""] {
            let once = t.question_format(query);
            assert_eq!(t.question_format(&once), once);
            assert!(!once.ends_with("??"));
        }
    }

    #[test]
    fn test_technical_focused() {
        let t = transformer();
        assert_eq!(
            t.technical_focused("KA02I power"),
            "KA02I power specifications technical details"
        );
        assert_eq!(t.technical_focused("KA02I Specs"), "KA02I Specs");
    }

    #[test]
    fn test_semantic_expansion_in_rule_order() {
        let t = transformer();
        assert_eq!(
            t.semantic_expansion("power and size"),
            "power and size power watt output dimensions weight physical"
        );
        assert_eq!(t.semantic_expansion("kobra"), "kobra");
    }

    #[test]
    fn test_content_optimization() {
        let t = transformer();
        assert_eq!(
            t.content_optimization("What is the power of the KA02I"),
            "the power of the KA02I"
        );
        assert_eq!(t.content_optimization("Which IS"), "Which IS");
        // Word boundaries: "this" keeps its "is"
        assert_eq!(t.content_optimization("how this works"), "this works");
    }

    #[test]
    fn test_query_expansion() {
        let t = transformer();
        assert_eq!(
            t.query_expansion("KA02I"),
            "KA02I K-Array audio speaker amplifier"
        );
        assert_eq!(t.query_expansion("amplifier"), "amplifier");
    }

    #[test]
    fn test_apply_dispatch() {
        let t = transformer();
        assert_eq!(
            t.apply(QueryTransform::QuestionFormat, "KA02I power"),
            t.question_format("KA02I power")
        );
    }
}
