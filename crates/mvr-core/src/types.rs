//! Core domain types for multi-strategy retrieval.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A metadata value: either a single string or a list of strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Text(String),
    List(Vec<String>),
}

impl MetadataValue {
    /// Iterate over the string values held by this entry.
    pub fn values(&self) -> Vec<&str> {
        match self {
            Self::Text(s) => vec![s.as_str()],
            Self::List(items) => items.iter().map(String::as_str).collect(),
        }
    }

    /// Check whether any value contains `needle` as a substring.
    pub fn contains_text(&self, needle: &str) -> bool {
        self.values().iter().any(|v| v.contains(needle))
    }

    /// Join all values into one space-separated string.
    pub fn joined(&self) -> String {
        self.values().join(" ")
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Vec<&str>> for MetadataValue {
    fn from(values: Vec<&str>) -> Self {
        Self::List(values.into_iter().map(String::from).collect())
    }
}

/// Document metadata (category, product line, content classification, ...).
pub type Metadata = BTreeMap<String, MetadataValue>;

/// A metadata-equality constraint passed verbatim to the document index.
///
/// Each key must match: a `Text` value requires equality, a `List` value
/// requires membership. List-valued document metadata matches when any of its
/// elements does.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetadataFilter(BTreeMap<String, MetadataValue>);

impl MetadataFilter {
    /// Create an empty filter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a constraint.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Whether the filter has no constraints.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over the constraints.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &MetadataValue)> {
        self.0.iter()
    }
}

/// An opaque unit of retrievable content returned by the document index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Identifier, unique within the index.
    pub id: String,

    /// Text body.
    pub content: String,

    /// Strategy-local relevance score. Not comparable across strategies.
    #[serde(default)]
    pub score: f32,

    /// Metadata fields. Never mutated after retrieval.
    #[serde(default)]
    pub metadata: Metadata,
}

impl Document {
    /// Create a new document with no metadata.
    pub fn new(id: impl Into<String>, content: impl Into<String>, score: f32) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            score,
            metadata: Metadata::new(),
        }
    }

    /// Attach a metadata field.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Look up a metadata field.
    pub fn meta(&self, key: &str) -> Option<&MetadataValue> {
        self.metadata.get(key)
    }
}

/// A document to be written into an index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewDocument {
    /// Optional identifier; one is assigned when missing.
    #[serde(default)]
    pub id: Option<String>,

    /// Text body.
    pub content: String,

    /// Metadata fields.
    #[serde(default)]
    pub metadata: Metadata,
}

/// Statistics about a document index.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexStats {
    /// Number of documents.
    pub documents: u64,

    /// Storage size in bytes.
    pub storage_bytes: u64,
}

/// What kind of content a strategy targets. Weight boosts address roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyRole {
    ExactMatch,
    QaPairs,
    TechnicalSpecs,
    SemanticChunks,
    SearchableContent,
    Broad,
}

impl std::fmt::Display for StrategyRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::ExactMatch => "exact_match",
            Self::QaPairs => "qa_pairs",
            Self::TechnicalSpecs => "technical_specs",
            Self::SemanticChunks => "semantic_chunks",
            Self::SearchableContent => "searchable_content",
            Self::Broad => "broad",
        };
        write!(f, "{}", s)
    }
}

/// A query rewrite applied before a strategy hits the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryTransform {
    ProductFocused,
    QuestionFormat,
    TechnicalFocused,
    SemanticExpansion,
    ContentOptimization,
    QueryExpansion,
}

impl std::fmt::Display for QueryTransform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::ProductFocused => "product_focused",
            Self::QuestionFormat => "question_format",
            Self::TechnicalFocused => "technical_focused",
            Self::SemanticExpansion => "semantic_expansion",
            Self::ContentOptimization => "content_optimization",
            Self::QueryExpansion => "query_expansion",
        };
        write!(f, "{}", s)
    }
}

/// A named retrieval pathway: filter + transform + weight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalStrategy {
    /// Unique identifier.
    pub name: String,

    /// Content the strategy targets.
    pub role: StrategyRole,

    /// Relative influence in fusion, in [0, 1].
    pub weight: f32,

    /// Metadata constraint passed to the index.
    #[serde(default)]
    pub filter: Option<MetadataFilter>,

    /// Query rewrite applied before searching.
    #[serde(default)]
    pub transform: Option<QueryTransform>,

    /// Disabled strategies are never executed and do not count for confidence.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl RetrievalStrategy {
    /// Create an enabled strategy with no filter or transform.
    pub fn new(name: impl Into<String>, role: StrategyRole, weight: f32) -> Self {
        Self {
            name: name.into(),
            role,
            weight,
            filter: None,
            transform: None,
            enabled: true,
        }
    }

    /// Set the metadata filter.
    pub fn with_filter(mut self, filter: MetadataFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Set the query transform.
    pub fn with_transform(mut self, transform: QueryTransform) -> Self {
        self.transform = Some(transform);
        self
    }

    /// Enable or disable the strategy.
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// Structural features of a query, produced fresh per query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryIntent {
    pub has_product_code: bool,
    pub is_technical: bool,
    pub is_question: bool,
    pub is_comparison: bool,

    /// Detected product codes, lowercased, in order of appearance.
    pub products: Vec<String>,

    /// Word count of the query.
    pub complexity: usize,
}

/// Intent label assigned by the query-intelligence collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentLabel {
    TechnicalSpecsOnly,
    ApplicationsOnly,
    ProductComparison,
    InstallationGuidance,
    Troubleshooting,
    GeneralInfo,
    PurchaseDecision,
    CompatibilityCheck,
}

impl IntentLabel {
    /// Parse a label, accepting the snake_case wire form.
    pub fn parse(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().as_str() {
            "technical_specs_only" => Some(Self::TechnicalSpecsOnly),
            "applications_only" => Some(Self::ApplicationsOnly),
            "product_comparison" => Some(Self::ProductComparison),
            "installation_guidance" => Some(Self::InstallationGuidance),
            "troubleshooting" => Some(Self::Troubleshooting),
            "general_info" => Some(Self::GeneralInfo),
            "purchase_decision" => Some(Self::PurchaseDecision),
            "compatibility_check" => Some(Self::CompatibilityCheck),
            _ => None,
        }
    }
}

impl std::fmt::Display for IntentLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::TechnicalSpecsOnly => "technical_specs_only",
            Self::ApplicationsOnly => "applications_only",
            Self::ProductComparison => "product_comparison",
            Self::InstallationGuidance => "installation_guidance",
            Self::Troubleshooting => "troubleshooting",
            Self::GeneralInfo => "general_info",
            Self::PurchaseDecision => "purchase_decision",
            Self::CompatibilityCheck => "compatibility_check",
        };
        write!(f, "{}", s)
    }
}

/// Complexity assessment from the query-intelligence collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryComplexity {
    Simple,
    Moderate,
    Complex,
    Ambiguous,
}

impl QueryComplexity {
    /// Parse a complexity level.
    pub fn parse(level: &str) -> Option<Self> {
        match level.trim().to_lowercase().as_str() {
            "simple" => Some(Self::Simple),
            "moderate" => Some(Self::Moderate),
            "complex" => Some(Self::Complex),
            "ambiguous" => Some(Self::Ambiguous),
            _ => None,
        }
    }
}

/// LLM-assisted understanding of a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryIntelligence {
    pub original_query: String,
    pub language: String,
    pub translated_query: Option<String>,
    pub optimized_query: String,
    pub intent: IntentLabel,
    pub complexity: QueryComplexity,
    pub products_mentioned: Vec<String>,
    pub technical_focus: Vec<String>,
    pub application_focus: Vec<String>,
    pub exclusions: Vec<String>,
    pub confidence: f32,
    pub suggested_followup: Option<String>,
    pub reasoning: String,
}

/// Speaker of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationRole {
    User,
    Assistant,
    System,
}

impl std::fmt::Display for ConversationRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        };
        write!(f, "{}", s)
    }
}

/// One turn of conversation history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: ConversationRole,
    pub content: String,
}

impl ConversationTurn {
    /// A user turn.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ConversationRole::User,
            content: content.into(),
        }
    }

    /// An assistant turn.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ConversationRole::Assistant,
            content: content.into(),
        }
    }
}

/// Which analysis drove weight adjustment for a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum QueryAnalysis {
    /// Only the structural analyzer ran (or the collaborator failed).
    Structural,
    /// The query-intelligence collaborator succeeded and took precedence.
    Intelligent { intelligence: QueryIntelligence },
}

/// Per-query context, identical in shape whichever analysis path ran.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryContext {
    /// Query as received.
    pub original_query: String,

    /// Query handed to the strategies.
    pub optimized_query: String,

    /// Structural features of the optimized query. Always computed.
    pub intent: QueryIntent,

    /// Analysis used for weight adjustment.
    pub analysis: QueryAnalysis,
}

impl QueryContext {
    /// The collaborator's analysis, if it succeeded.
    pub fn intelligence(&self) -> Option<&QueryIntelligence> {
        match &self.analysis {
            QueryAnalysis::Intelligent { intelligence } => Some(intelligence),
            QueryAnalysis::Structural => None,
        }
    }
}

/// Provenance attached to a document by the strategy that surfaced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyTag {
    /// Strategy name.
    pub strategy: String,

    /// Adjusted weight used for this query.
    pub weight: f32,

    /// Query text after the strategy's transform.
    pub transformed_query: String,
}

/// Output of reciprocal rank fusion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusedResult {
    /// Payload from the first strategy that supplied the document.
    pub document: Document,

    /// Tag of the first strategy that supplied the document.
    pub source: StrategyTag,

    /// Sum of per-strategy RRF contributions.
    pub combined_score: f32,

    /// Strategy name to RRF contribution.
    pub strategy_scores: BTreeMap<String, f32>,

    /// Strategy name to 1-based rank within that strategy's list.
    pub strategy_ranks: BTreeMap<String, usize>,

    /// Fraction of enabled strategies that surfaced this document.
    pub confidence: f32,
}

impl FusedResult {
    /// Number of strategies that contributed.
    pub fn num_strategies(&self) -> usize {
        self.strategy_scores.len()
    }
}

/// Output of the reranker for one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RerankResult {
    pub document: Document,
    pub original_score: f32,
    pub rerank_score: f32,
    pub final_score: f32,

    /// Original rank minus new rank; positive means moved up.
    pub rank_change: i64,
}

/// Fusion metadata carried onto a returned document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusionProvenance {
    pub combined_score: f32,
    pub strategy_scores: BTreeMap<String, f32>,
    pub strategy_ranks: BTreeMap<String, usize>,
    pub confidence: f32,
    pub num_strategies: usize,
}

impl From<&FusedResult> for FusionProvenance {
    fn from(result: &FusedResult) -> Self {
        Self {
            combined_score: result.combined_score,
            strategy_scores: result.strategy_scores.clone(),
            strategy_ranks: result.strategy_ranks.clone(),
            confidence: result.confidence,
            num_strategies: result.num_strategies(),
        }
    }
}

/// Rerank metadata carried onto a returned document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RerankProvenance {
    pub original_score: f32,
    pub rerank_score: f32,
    pub rank_change: i64,
}

/// A final result: document plus fusion and rerank provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotatedDocument {
    pub document: Document,

    /// Final score: the rerank blend when reranked, else the fused score.
    pub score: f32,

    /// Strategy that first supplied the document.
    pub source: StrategyTag,

    pub fusion: FusionProvenance,

    /// Present only when the reranker scored this document.
    pub rerank: Option<RerankProvenance>,
}

/// Result of a `retrieve` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResponse {
    /// Final ranked documents. Empty is a valid "no matches" outcome.
    pub documents: Vec<AnnotatedDocument>,

    /// How the query was understood.
    pub context: QueryContext,
}

impl RetrievalResponse {
    /// The query-intelligence descriptor, if the collaborator succeeded.
    pub fn intelligence(&self) -> Option<&QueryIntelligence> {
        self.context.intelligence()
    }

    /// Whether no documents matched.
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

/// Coverage/consensus diagnostics over a result set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityMetrics {
    pub average_confidence: f32,

    /// Distinct strategies represented in the results / strategies registered.
    pub strategy_coverage: f32,

    /// Sorted names of strategies represented in the results.
    pub strategies_used: Vec<String>,

    pub result_count: usize,
    pub total_strategies_available: usize,
    pub reranking_applied: bool,
    pub query_intent: QueryIntent,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_value_untagged_serde() {
        let text: MetadataValue = serde_json::from_str("\"technical_specs\"").unwrap();
        assert_eq!(text, MetadataValue::Text("technical_specs".to_string()));

        let list: MetadataValue = serde_json::from_str("[\"question\", \"answer\"]").unwrap();
        assert_eq!(list.values(), vec!["question", "answer"]);
    }

    #[test]
    fn test_intent_label_parse() {
        assert_eq!(
            IntentLabel::parse("Technical_Specs_Only"),
            Some(IntentLabel::TechnicalSpecsOnly)
        );
        assert_eq!(IntentLabel::parse("nonsense"), None);
        assert_eq!(IntentLabel::ProductComparison.to_string(), "product_comparison");
    }

    #[test]
    fn test_query_context_intelligence_accessor() {
        let context = QueryContext {
            original_query: "q".to_string(),
            optimized_query: "q".to_string(),
            intent: QueryIntent::default(),
            analysis: QueryAnalysis::Structural,
        };
        assert!(context.intelligence().is_none());
    }
}
