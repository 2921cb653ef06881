//! Structural query analysis.

use regex::Regex;

use mvr_core::{AnalysisConfig, QueryIntent, Result, RetrievalError};

/// Build the product-code pattern: a brand prefix, optional letters, at least
/// one digit, then any alphanumeric tail. Matched against lowercased text.
pub(crate) fn product_code_pattern(prefixes: &[String]) -> Result<Regex> {
    let alternation = prefixes
        .iter()
        .map(|p| regex::escape(&p.to_lowercase()))
        .collect::<Vec<_>>()
        .join("|");

    Regex::new(&format!(r"\b(?:{})[a-z]*\d+[a-z0-9]*\b", alternation))
        .map_err(|e| RetrievalError::config(format!("Invalid product prefix pattern: {}", e)))
}

/// Strip leading and trailing punctuation from a token.
pub(crate) fn bare_token(token: &str) -> &str {
    token.trim_matches(|c: char| !c.is_alphanumeric())
}

/// Classifies the surface structure of a query.
///
/// Total and side-effect free: every query yields a `QueryIntent`.
#[derive(Debug, Clone)]
pub struct QueryAnalyzer {
    product_pattern: Regex,
    technical_terms: Vec<String>,
    interrogatives: Vec<String>,
    comparison_terms: Vec<String>,
}

impl QueryAnalyzer {
    /// Create an analyzer from its vocabulary.
    pub fn new(config: &AnalysisConfig) -> Result<Self> {
        Ok(Self {
            product_pattern: product_code_pattern(&config.product_prefixes)?,
            technical_terms: lowercase_all(&config.technical_terms),
            interrogatives: lowercase_all(&config.interrogatives),
            comparison_terms: lowercase_all(&config.comparison_terms),
        })
    }

    /// Product codes in order of appearance, lowercased.
    pub fn find_products(&self, query: &str) -> Vec<String> {
        let lowered = query.to_lowercase();
        self.product_pattern
            .find_iter(&lowered)
            .map(|m| m.as_str().to_string())
            .collect()
    }

    /// Analyze a query.
    pub fn analyze(&self, query: &str) -> QueryIntent {
        let lowered = query.to_lowercase();
        let tokens: Vec<&str> = lowered.split_whitespace().collect();
        let products = self.find_products(query);

        let is_technical = self
            .technical_terms
            .iter()
            .any(|term| lowered.contains(term.as_str()));

        let is_question = tokens
            .first()
            .map(|first| self.interrogatives.iter().any(|w| w == bare_token(first)))
            .unwrap_or(false);

        let is_comparison = tokens.iter().any(|token| {
            self.comparison_terms
                .iter()
                .any(|term| token.starts_with(term.as_str()))
        });

        QueryIntent {
            has_product_code: !products.is_empty(),
            is_technical,
            is_question,
            is_comparison,
            products,
            complexity: tokens.len(),
        }
    }
}

fn lowercase_all(items: &[String]) -> Vec<String> {
    items.iter().map(|s| s.to_lowercase()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analyzer() -> QueryAnalyzer {
        QueryAnalyzer::new(&AnalysisConfig::default()).unwrap()
    }

    #[test]
    fn test_product_code_detection() {
        let intent = analyzer().analyze("KA02I power specs");

        assert!(intent.has_product_code);
        assert_eq!(intent.products, vec!["ka02i".to_string()]);
        assert!(intent.is_technical);
        assert!(!intent.is_question);
        assert_eq!(intent.complexity, 3);
    }

    #[test]
    fn test_multiple_products_in_order() {
        let intent = analyzer().analyze("Compare KP52 vs KA04 and Kobra");

        assert_eq!(intent.products, vec!["kp52".to_string(), "ka04".to_string()]);
        assert!(intent.is_comparison);
    }

    #[test]
    fn test_prefix_must_start_the_code() {
        // No digit, or not rooted at a known prefix
        let intent = analyzer().analyze("Kommander amplifier X100");
        assert!(!intent.has_product_code);
        assert!(intent.products.is_empty());
    }

    #[test]
    fn test_question_detection_uses_first_word() {
        let analyzer = analyzer();
        assert!(analyzer.analyze("What is the KA02I?").is_question);
        assert!(analyzer.analyze("  how, exactly, does it mount").is_question);
        assert!(!analyzer.analyze("tell me what it weighs").is_question);
    }

    #[test]
    fn test_comparison_word_prefix() {
        let analyzer = analyzer();
        assert!(analyzer.analyze("KA02I vs. KA04").is_comparison);
        assert!(analyzer.analyze("which is better").is_comparison);
        assert!(!analyzer.analyze("the best amplifier").is_comparison);
    }

    #[test]
    fn test_empty_query() {
        let intent = analyzer().analyze("");
        assert_eq!(intent, QueryIntent::default());
    }

    #[test]
    fn test_custom_prefixes_are_escaped() {
        let config = AnalysisConfig {
            product_prefixes: vec!["k".to_string(), "x.".to_string()],
            ..AnalysisConfig::default()
        };
        let analyzer = QueryAnalyzer::new(&config).unwrap();

        assert_eq!(analyzer.find_products("xy12 kx9"), vec!["kx9".to_string()]);
    }
}
