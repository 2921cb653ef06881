//! LLM-assisted query understanding.
//!
//! Two prompts per query: language detection (with translation to English)
//! and intent analysis. A failed language prompt degrades to a keyword
//! heuristic; a failed intent prompt fails the whole analysis so the
//! retriever falls back to structural analysis.

use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, info, warn};

use mvr_core::{
    ConversationTurn, IntelligenceConfig, IntentLabel, QueryComplexity, QueryIntelligence,
    QueryIntelligenceProvider, Result, RetrievalError, TextGenerator,
};

/// Characters of each history turn included in the intent prompt.
const HISTORY_TURN_CHARS: usize = 100;

/// Confidence assumed when the model omits one.
const DEFAULT_CONFIDENCE: f32 = 0.7;

#[derive(Debug, Deserialize)]
struct LanguageReply {
    #[serde(default)]
    detected_language: Option<String>,
    #[serde(default)]
    translation_needed: bool,
    #[serde(default)]
    english_translation: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct IntentReply {
    #[serde(default)]
    intent: Option<String>,
    #[serde(default)]
    complexity: Option<String>,
    #[serde(default)]
    products: Vec<String>,
    #[serde(default)]
    technical_focus: Vec<String>,
    #[serde(default)]
    application_focus: Vec<String>,
    #[serde(default)]
    exclusions: Vec<String>,
    #[serde(default)]
    confidence: Option<f32>,
    #[serde(default)]
    suggested_followup: Option<String>,
    #[serde(default)]
    reasoning: Option<String>,
}

/// Detected language and optional English translation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LanguageDetection {
    pub language: String,
    pub translated_query: Option<String>,
}

/// Query-intelligence provider backed by a text generator.
pub struct LlmQueryAnalyzer {
    generator: Arc<dyn TextGenerator>,
    history_turns: usize,
    json_object: Regex,
}

impl LlmQueryAnalyzer {
    /// Create an analyzer over a text generator.
    pub fn new(generator: Arc<dyn TextGenerator>, config: &IntelligenceConfig) -> Result<Self> {
        let json_object = Regex::new(r"(?s)\{.*\}")
            .map_err(|e| RetrievalError::internal(format!("Invalid JSON pattern: {}", e)))?;

        Ok(Self {
            generator,
            history_turns: config.history_turns,
            json_object,
        })
    }

    /// Parse the outermost `{...}` span of a model reply.
    fn parse_reply<T: serde::de::DeserializeOwned>(&self, reply: &str) -> Result<T> {
        let json = self
            .json_object
            .find(reply)
            .ok_or_else(|| RetrievalError::provider("No JSON object in model reply"))?;
        Ok(serde_json::from_str(json.as_str())?)
    }

    /// Detect the query language, translating to English when needed.
    pub async fn detect_language(&self, query: &str) -> LanguageDetection {
        let reply = match self.generator.generate(&language_prompt(query)).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!("Language detection failed, using heuristic: {}", e);
                return fallback_language(query);
            }
        };

        match self.parse_reply::<LanguageReply>(&reply) {
            Ok(parsed) => LanguageDetection {
                language: parsed
                    .detected_language
                    .unwrap_or_else(|| "english".to_string()),
                translated_query: parsed
                    .english_translation
                    .filter(|t| parsed.translation_needed && !t.trim().is_empty()),
            },
            Err(e) => {
                warn!("Unparseable language reply, using heuristic: {}", e);
                fallback_language(query)
            }
        }
    }

    fn history_context(&self, history: &[ConversationTurn]) -> String {
        if history.is_empty() || self.history_turns == 0 {
            return String::new();
        }

        let start = history.len().saturating_sub(self.history_turns);
        let mut context = String::from("Previous conversation context:\n");
        for turn in &history[start..] {
            let snippet: String = turn.content.chars().take(HISTORY_TURN_CHARS).collect();
            context.push_str(&format!("- {}: {}...\n", turn.role, snippet));
        }
        context.push('\n');
        context
    }

    async fn analyze_intent(
        &self,
        query: &str,
        history: &[ConversationTurn],
    ) -> Result<IntentReply> {
        let prompt = intent_prompt(query, &self.history_context(history));
        let reply = self.generator.generate(&prompt).await?;
        self.parse_reply(&reply)
    }
}

#[async_trait]
impl QueryIntelligenceProvider for LlmQueryAnalyzer {
    async fn analyze(
        &self,
        query: &str,
        history: &[ConversationTurn],
    ) -> Result<QueryIntelligence> {
        let detection = self.detect_language(query).await;
        let analysis_query = detection
            .translated_query
            .clone()
            .unwrap_or_else(|| query.to_string());

        let reply = self
            .analyze_intent(&analysis_query, history)
            .await
            .map_err(|e| RetrievalError::provider(format!("Intent analysis failed: {}", e)))?;

        let intent = reply
            .intent
            .as_deref()
            .and_then(IntentLabel::parse)
            .unwrap_or(IntentLabel::GeneralInfo);
        let complexity = reply
            .complexity
            .as_deref()
            .and_then(QueryComplexity::parse)
            .unwrap_or(QueryComplexity::Moderate);
        let optimized_query = optimize_query(&analysis_query, intent, &reply.products);

        let intelligence = QueryIntelligence {
            original_query: query.to_string(),
            language: detection.language,
            translated_query: detection.translated_query,
            optimized_query,
            intent,
            complexity,
            products_mentioned: reply.products,
            technical_focus: reply.technical_focus,
            application_focus: reply.application_focus,
            exclusions: reply.exclusions,
            confidence: reply.confidence.unwrap_or(DEFAULT_CONFIDENCE).clamp(0.0, 1.0),
            suggested_followup: reply.suggested_followup.filter(|s| !s.trim().is_empty()),
            reasoning: reply
                .reasoning
                .unwrap_or_else(|| "LLM analysis completed".to_string()),
        };

        info!(
            "Query analysis complete: intent={}, complexity={:?}, confidence={:.2}",
            intelligence.intent, intelligence.complexity, intelligence.confidence
        );
        debug!("Optimized query: {:?}", intelligence.optimized_query);

        Ok(intelligence)
    }
}

/// Retrieval phrasing for an analyzed query.
///
/// Appends the first two terms for the intent (when it has any) and
/// prepends the first product mentioned.
pub fn optimize_query(base: &str, intent: IntentLabel, products: &[String]) -> String {
    let terms: &[&str] = match intent {
        IntentLabel::TechnicalSpecsOnly => &["specifications", "technical details"],
        IntentLabel::ApplicationsOnly => &["applications", "use cases"],
        IntentLabel::ProductComparison => &["comparison", "differences"],
        IntentLabel::InstallationGuidance => &["installation", "setup"],
        _ => &[],
    };

    let mut optimized = base.to_string();
    if !terms.is_empty() {
        optimized = format!("{} {}", optimized, terms.join(" "));
    }
    if let Some(product) = products.first() {
        optimized = format!("{} {}", product, optimized);
    }
    optimized.trim().to_string()
}

/// Whether the user should be asked to clarify before answering.
pub fn should_ask_clarification(intelligence: &QueryIntelligence, threshold: f32) -> bool {
    intelligence.complexity == QueryComplexity::Ambiguous
        || intelligence.confidence < threshold
        || (intelligence.intent == IntentLabel::GeneralInfo
            && intelligence.products_mentioned.is_empty()
            && intelligence.technical_focus.is_empty()
            && intelligence.application_focus.is_empty())
}

/// A clarifying question: the model's suggestion, else one chosen by what
/// is missing.
pub fn clarification_question(intelligence: &QueryIntelligence) -> String {
    if let Some(followup) = &intelligence.suggested_followup {
        return followup.clone();
    }
    if intelligence.products_mentioned.is_empty() {
        return "Which K-Array product or series are you interested in?".to_string();
    }
    if intelligence.intent == IntentLabel::GeneralInfo {
        return "Are you looking for technical specifications or application use cases?"
            .to_string();
    }
    "Could you be more specific about what you are looking for?".to_string()
}

/// Keyword heuristic used when language detection is unavailable.
pub fn fallback_language(query: &str) -> LanguageDetection {
    let lowered = query.to_lowercase();
    let words: Vec<&str> = lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();
    let has_word = |markers: &[&str]| markers.iter().any(|m| words.contains(m));

    let language = if lowered.contains('¿') || lowered.contains('¡') || has_word(&["cuál", "cómo"]) {
        "spanish"
    } else if has_word(&["è", "che", "potenza", "della"]) {
        "italian"
    } else if has_word(&["est", "du", "quelle", "puissance"]) {
        "french"
    } else {
        "english"
    };

    LanguageDetection {
        language: language.to_string(),
        translated_query: None,
    }
}

fn language_prompt(query: &str) -> String {
    format!(
        "Analyze this query and detect its language. If it is not English, translate it to English.\n\n\
         Query: \"{query}\"\n\n\
         Respond with JSON only:\n\
         {{\"detected_language\": \"english/italian/spanish/french/german/portuguese/other\", \
         \"confidence\": 0.0-1.0, \"translation_needed\": true/false, \
         \"english_translation\": \"translation, or null if already English\"}}\n\n\
         Rules:\n\
         - Keep product names unchanged (KA02I, Kommander, ...)\n\
         - Keep technical terms in English\n\
         - Preserve the intent and specificity of the query"
    )
}

fn intent_prompt(query: &str, context: &str) -> String {
    format!(
        "You are an expert in professional audio equipment. Analyze this query.\n\n\
         {context}Current query: \"{query}\"\n\n\
         Respond with JSON only, with these fields:\n\
         - \"intent\": one of technical_specs_only, applications_only, product_comparison, \
         installation_guidance, troubleshooting, general_info, purchase_decision, compatibility_check\n\
         - \"complexity\": one of simple, moderate, complex, ambiguous\n\
         - \"products\": product names mentioned\n\
         - \"technical_focus\": technical aspects the user cares about\n\
         - \"application_focus\": application contexts mentioned\n\
         - \"exclusions\": what the user explicitly does not want\n\
         - \"confidence\": float 0.0-1.0\n\
         - \"suggested_followup\": a clarifying question if the query is ambiguous\n\
         - \"reasoning\": a brief explanation"
    )
}
