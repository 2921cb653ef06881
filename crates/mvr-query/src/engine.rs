//! Multi-strategy retrieval orchestrator.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use mvr_core::{
    AnnotatedDocument, ConversationTurn, Document, DocumentIndex, FusedResult, FusionProvenance,
    IntelligenceConfig, MvrConfig, QualityMetrics, QueryAnalysis, QueryContext,
    QueryIntelligence, QueryIntelligenceProvider, RerankProvenance, Result, RetrievalError,
    RetrievalResponse, RetrievalStrategy, SearchConfig, StrategyTag,
};
use mvr_rerank::Reranker;

use crate::fusion::{reciprocal_rank_fusion, StrategyRun};
use crate::intelligence::{clarification_question, should_ask_clarification};
use crate::intent::QueryAnalyzer;
use crate::metrics::quality_metrics;
use crate::strategy::StrategyRegistry;
use crate::transform::QueryTransformer;

/// Per-call retrieval options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrieveOptions {
    /// Maximum number of documents to return.
    pub max_results: usize,

    /// Rerank fused candidates when a reranker is configured.
    pub rerank: bool,
}

/// Runs every enabled strategy against a document index, fuses the ranked
/// lists and optionally reranks the head of the fused list.
///
/// `retrieve` never fails: strategy errors and timeouts drop that strategy,
/// a failed intelligence pass falls back to structural analysis and a failed
/// rerank falls back to fused order.
pub struct MultiStrategyRetriever<I: DocumentIndex + 'static> {
    index: Arc<I>,
    registry: StrategyRegistry,
    analyzer: QueryAnalyzer,
    transformer: QueryTransformer,
    intelligence: Option<Arc<dyn QueryIntelligenceProvider>>,
    reranker: Option<Arc<Reranker>>,
    search: SearchConfig,
    intelligence_config: IntelligenceConfig,
}

impl<I: DocumentIndex + 'static> MultiStrategyRetriever<I> {
    /// Create a retriever without a reranker or intelligence provider.
    pub fn new(index: Arc<I>, config: &MvrConfig) -> Result<Self> {
        Ok(Self {
            index,
            registry: StrategyRegistry::from_config(config),
            analyzer: QueryAnalyzer::new(&config.analysis)?,
            transformer: QueryTransformer::new(&config.analysis, &config.transform)?,
            intelligence: None,
            reranker: None,
            search: config.search.clone(),
            intelligence_config: config.intelligence.clone(),
        })
    }

    /// Create a retriever with the configured reranker.
    pub fn from_config(index: Arc<I>, config: &MvrConfig) -> Result<Self> {
        let retriever = Self::new(index, config)?;
        Ok(retriever.with_reranker(Reranker::from_config(&config.rerank)))
    }

    /// Attach a query-intelligence provider.
    pub fn with_intelligence(mut self, provider: Arc<dyn QueryIntelligenceProvider>) -> Self {
        self.intelligence = Some(provider);
        self
    }

    /// Attach a reranker.
    pub fn with_reranker(mut self, reranker: Reranker) -> Self {
        self.reranker = Some(Arc::new(reranker));
        self
    }

    /// The strategy registry.
    pub fn registry(&self) -> &StrategyRegistry {
        &self.registry
    }

    /// The structural analyzer.
    pub fn analyzer(&self) -> &QueryAnalyzer {
        &self.analyzer
    }

    /// Whether a query-intelligence provider is attached and enabled.
    pub fn has_intelligence(&self) -> bool {
        self.intelligence_config.enabled && self.intelligence.is_some()
    }

    /// Name of the active relevance scorer, if reranking is available.
    pub fn reranker_name(&self) -> Option<&str> {
        self.reranker.as_deref().map(Reranker::model_name)
    }

    /// Default options from configuration.
    pub fn default_options(&self) -> RetrieveOptions {
        RetrieveOptions {
            max_results: self.search.default_max_results,
            rerank: self.search.rerank_enabled,
        }
    }

    /// Retrieve up to `max_results` documents for a query.
    pub async fn retrieve(
        &self,
        query: &str,
        max_results: usize,
        history: &[ConversationTurn],
    ) -> RetrievalResponse {
        let options = RetrieveOptions {
            max_results,
            ..self.default_options()
        };
        self.retrieve_with(query, options, history).await
    }

    /// Retrieve with explicit options.
    pub async fn retrieve_with(
        &self,
        query: &str,
        options: RetrieveOptions,
        history: &[ConversationTurn],
    ) -> RetrievalResponse {
        let start = Instant::now();
        info!("Retrieving for: {:?}", query);

        let intelligence = self.analyze_intelligence(query, history).await;
        let optimized_query = intelligence
            .as_ref()
            .map(|i| i.optimized_query.trim())
            .filter(|q| !q.is_empty())
            .unwrap_or(query)
            .to_string();

        let intent = self.analyzer.analyze(&optimized_query);
        debug!("Query intent: {:?}", intent);

        let strategies = match &intelligence {
            Some(intelligence) => self.registry.adjust_with_intelligence(intelligence),
            None => self.registry.adjust(&intent),
        };
        let enabled = strategies.iter().filter(|s| s.enabled).count();

        let runs = self.execute_strategies(&optimized_query, &strategies).await;
        let fused = reciprocal_rank_fusion(&runs, enabled, self.search.rrf_k);
        debug!(
            "Fused {} strategy runs into {} candidates",
            runs.len(),
            fused.len()
        );

        let documents = self.finalize(query, &fused, options).await;

        info!(
            "Retrieval completed in {}ms, returned {} documents",
            start.elapsed().as_millis(),
            documents.len()
        );

        let analysis = match intelligence {
            Some(intelligence) => QueryAnalysis::Intelligent { intelligence },
            None => QueryAnalysis::Structural,
        };

        RetrievalResponse {
            documents,
            context: QueryContext {
                original_query: query.to_string(),
                optimized_query,
                intent,
                analysis,
            },
        }
    }

    /// Coverage and consensus diagnostics for results of `query`.
    pub fn quality_metrics(&self, query: &str, results: &[AnnotatedDocument]) -> QualityMetrics {
        quality_metrics(self.analyzer.analyze(query), results, self.registry.len())
    }

    async fn analyze_intelligence(
        &self,
        query: &str,
        history: &[ConversationTurn],
    ) -> Option<QueryIntelligence> {
        if !self.intelligence_config.enabled {
            return None;
        }
        let provider = self.intelligence.as_ref()?;

        match provider.analyze(query, history).await {
            Ok(intelligence) => {
                if should_ask_clarification(
                    &intelligence,
                    self.intelligence_config.clarification_threshold,
                ) {
                    info!(
                        "Clarification suggested: {}",
                        clarification_question(&intelligence)
                    );
                }
                Some(intelligence)
            }
            Err(e) => {
                warn!("Query intelligence failed, using structural analysis: {}", e);
                None
            }
        }
    }

    /// Search every enabled strategy concurrently.
    ///
    /// Runs come back in strategy order. Failed or timed-out strategies are
    /// logged and left out.
    async fn execute_strategies(
        &self,
        query: &str,
        strategies: &[RetrievalStrategy],
    ) -> Vec<StrategyRun> {
        let millis = self.search.search_timeout_ms;
        let timeout = Duration::from_millis(millis);
        let top_k = self.search.per_strategy_top_k;

        let mut tasks = JoinSet::new();
        for (position, strategy) in strategies.iter().filter(|s| s.enabled).enumerate() {
            let transformed_query = match strategy.transform {
                Some(transform) => self.transformer.apply(transform, query),
                None => query.to_string(),
            };
            let tag = StrategyTag {
                strategy: strategy.name.clone(),
                weight: strategy.weight,
                transformed_query,
            };
            let filter = strategy.filter.clone();
            let index = Arc::clone(&self.index);

            tasks.spawn(async move {
                let searched = tokio::time::timeout(
                    timeout,
                    index.search(&tag.transformed_query, top_k, filter.as_ref()),
                )
                .await;

                let outcome = match searched {
                    Ok(Ok(documents)) => Ok(StrategyRun { tag, documents }),
                    Ok(Err(e)) => Err(RetrievalError::strategy(&tag.strategy, e.to_string())),
                    Err(_) => Err(RetrievalError::timeout(
                        format!("strategy '{}'", tag.strategy),
                        millis,
                    )),
                };
                (position, outcome)
            });
        }

        let mut runs: Vec<(usize, StrategyRun)> = Vec::with_capacity(tasks.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((position, Ok(run))) => {
                    debug!(
                        "Strategy '{}' returned {} documents",
                        run.tag.strategy,
                        run.documents.len()
                    );
                    runs.push((position, run));
                }
                Ok((_, Err(e))) => warn!("{}", e),
                Err(e) => warn!("Strategy task aborted: {}", e),
            }
        }

        runs.sort_by_key(|(position, _)| *position);
        runs.into_iter().map(|(_, run)| run).collect()
    }

    /// Rerank the head of the fused list, or take it as is.
    ///
    /// Relevance scoring is synchronous and may run a model, so it happens on
    /// the blocking pool.
    async fn finalize(
        &self,
        query: &str,
        fused: &[FusedResult],
        options: RetrieveOptions,
    ) -> Vec<AnnotatedDocument> {
        if fused.is_empty() || options.max_results == 0 {
            return Vec::new();
        }

        let reranker = match &self.reranker {
            Some(reranker) if options.rerank => Arc::clone(reranker),
            _ => return take_fused(fused, options.max_results),
        };

        // The reranker blends against fusion confidence, which lives in [0, 1]
        let pool = options
            .max_results
            .saturating_mul(self.search.rerank_candidate_factor.max(1));
        let candidates: Vec<Document> = fused
            .iter()
            .take(pool)
            .map(|result| {
                let mut document = result.document.clone();
                document.score = result.confidence;
                document
            })
            .collect();

        let owned_query = query.to_string();
        let top_k = options.max_results;
        let scored = tokio::task::spawn_blocking(move || {
            let reranked = reranker.try_rerank(&owned_query, &candidates, Some(top_k))?;
            if let Some(diagnostics) = reranker.diagnostics(&owned_query, &candidates, &reranked) {
                debug!(
                    "Rerank ({}) on {} query: {} significant moves",
                    diagnostics.model_used,
                    diagnostics.query_type,
                    diagnostics.significant_rank_changes
                );
            }
            Ok::<_, RetrievalError>(reranked)
        })
        .await
        .map_err(|e| RetrievalError::internal(format!("Rerank task failed: {}", e)))
        .and_then(|result| result);

        let reranked = match scored {
            Ok(reranked) => reranked,
            Err(e) => {
                warn!("Reranking failed, keeping fused order: {}", e);
                return take_fused(fused, options.max_results);
            }
        };

        let by_id: HashMap<&str, &FusedResult> = fused
            .iter()
            .map(|result| (result.document.id.as_str(), result))
            .collect();

        reranked
            .into_iter()
            .filter_map(|result| {
                let source = by_id.get(result.document.id.as_str())?;
                Some(AnnotatedDocument {
                    document: source.document.clone(),
                    score: result.final_score,
                    source: source.source.clone(),
                    fusion: FusionProvenance::from(*source),
                    rerank: Some(RerankProvenance {
                        original_score: result.original_score,
                        rerank_score: result.rerank_score,
                        rank_change: result.rank_change,
                    }),
                })
            })
            .collect()
    }
}

fn take_fused(fused: &[FusedResult], max_results: usize) -> Vec<AnnotatedDocument> {
    fused
        .iter()
        .take(max_results)
        .map(|result| AnnotatedDocument {
            document: result.document.clone(),
            score: result.combined_score,
            source: result.source.clone(),
            fusion: FusionProvenance::from(result),
            rerank: None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use mvr_core::{
        IntentLabel, MetadataFilter, QueryComplexity, RelevanceModel, StrategyRole,
    };
    use std::sync::Mutex;

    /// Index keyed by the `content_type` filter value ("*" when unfiltered).
    #[derive(Default)]
    struct MockIndex {
        lists: HashMap<String, Vec<&'static str>>,
        failing: Vec<String>,
        slow: Vec<String>,
        queries: Mutex<Vec<String>>,
    }

    impl MockIndex {
        fn with_list(mut self, key: &str, ids: Vec<&'static str>) -> Self {
            self.lists.insert(key.to_string(), ids);
            self
        }

        fn failing(mut self, key: &str) -> Self {
            self.failing.push(key.to_string());
            self
        }

        fn slow(mut self, key: &str) -> Self {
            self.slow.push(key.to_string());
            self
        }
    }

    #[async_trait]
    impl DocumentIndex for MockIndex {
        async fn search(
            &self,
            query: &str,
            top_k: usize,
            filter: Option<&MetadataFilter>,
        ) -> Result<Vec<Document>> {
            self.queries.lock().unwrap().push(query.to_string());
            let key = filter
                .and_then(|f| f.iter().next().map(|(_, v)| v.joined()))
                .unwrap_or_else(|| "*".to_string());

            if self.failing.contains(&key) {
                return Err(RetrievalError::index("backend unavailable"));
            }
            if self.slow.contains(&key) {
                tokio::time::sleep(Duration::from_secs(5)).await;
            }

            Ok(self
                .lists
                .get(&key)
                .map(|ids| {
                    ids.iter()
                        .take(top_k)
                        .map(|id| Document::new(*id, format!("content of {}", id), 1.0))
                        .collect()
                })
                .unwrap_or_default())
        }
    }

    struct FixedIntelligence(QueryIntelligence);

    #[async_trait]
    impl QueryIntelligenceProvider for FixedIntelligence {
        async fn analyze(
            &self,
            _query: &str,
            _history: &[ConversationTurn],
        ) -> Result<QueryIntelligence> {
            Ok(self.0.clone())
        }
    }

    struct FailingIntelligence;

    #[async_trait]
    impl QueryIntelligenceProvider for FailingIntelligence {
        async fn analyze(
            &self,
            _query: &str,
            _history: &[ConversationTurn],
        ) -> Result<QueryIntelligence> {
            Err(RetrievalError::provider("quota exceeded"))
        }
    }

    struct FailingModel;

    impl RelevanceModel for FailingModel {
        fn score_batch(&self, _query: &str, _contents: &[&str]) -> Result<Vec<f32>> {
            Err(RetrievalError::relevance("model not loaded"))
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    fn strategy(name: &str, weight: f32) -> RetrievalStrategy {
        RetrievalStrategy::new(name, StrategyRole::SemanticChunks, weight)
            .with_filter(MetadataFilter::new().with("content_type", name))
    }

    fn config(strategies: Vec<RetrievalStrategy>) -> MvrConfig {
        let mut config = MvrConfig::new();
        config.strategies = strategies;
        config.search.search_timeout_ms = 100;
        config
    }

    fn consensus_index() -> MockIndex {
        MockIndex::default()
            .with_list("a", vec!["doc1", "doc2", "doc3"])
            .with_list("b", vec!["doc2", "doc1", "doc4"])
    }

    fn retriever(index: MockIndex, strategies: Vec<RetrievalStrategy>) -> MultiStrategyRetriever<MockIndex> {
        MultiStrategyRetriever::new(Arc::new(index), &config(strategies)).unwrap()
    }

    fn no_rerank(max_results: usize) -> RetrieveOptions {
        RetrieveOptions {
            max_results,
            rerank: false,
        }
    }

    #[tokio::test]
    async fn test_consensus_scenario() {
        let retriever = retriever(consensus_index(), vec![strategy("a", 0.5), strategy("b", 0.5)]);
        let response = retriever.retrieve_with("doc", no_rerank(4), &[]).await;

        assert_eq!(response.documents.len(), 4);
        let expected = 0.5 / 61.0 + 0.5 / 62.0;
        assert!((response.documents[0].score - expected).abs() < 1e-7);
        // doc1 and doc2 tie exactly at equal weights; the stable sort keeps
        // doc1 (first seen) ahead, so only the score is asserted for doc2
        assert_eq!(response.documents[0].document.id, "doc1");

        let doc2 = response
            .documents
            .iter()
            .find(|d| d.document.id == "doc2")
            .unwrap();
        assert_eq!(doc2.fusion.strategy_scores.len(), 2);
        assert_eq!(doc2.fusion.num_strategies, 2);
        assert!((doc2.score - expected).abs() < 1e-7);
        assert!(doc2.rerank.is_none());

        for pair in response.documents.windows(2) {
            assert!(pair[0].fusion.combined_score >= pair[1].fusion.combined_score);
        }
    }

    #[tokio::test]
    async fn test_empty_index_returns_empty() {
        let retriever = MultiStrategyRetriever::from_config(
            Arc::new(MockIndex::default()),
            &MvrConfig::new(),
        )
        .unwrap();
        let response = retriever.retrieve("KA02I power specs", 5, &[]).await;

        assert!(response.is_empty());
        assert!(response.context.intent.has_product_code);
        assert!(response.intelligence().is_none());
    }

    #[tokio::test]
    async fn test_failing_strategy_is_excluded() {
        let index = consensus_index().failing("b");
        let retriever = retriever(index, vec![strategy("a", 0.5), strategy("b", 0.5)]);
        let response = retriever.retrieve_with("doc", no_rerank(5), &[]).await;

        let ids: Vec<&str> = response.documents.iter().map(|d| d.document.id.as_str()).collect();
        assert_eq!(ids, vec!["doc1", "doc2", "doc3"]);
        for doc in &response.documents {
            assert_eq!(doc.source.strategy, "a");
            // Confidence still divides by both enabled strategies
            assert!((doc.fusion.confidence - 0.5).abs() < 1e-6);
        }
    }

    #[tokio::test]
    async fn test_all_strategies_failing_returns_empty() {
        let index = consensus_index().failing("a").failing("b");
        let retriever = retriever(index, vec![strategy("a", 0.5), strategy("b", 0.5)])
            .with_reranker(Reranker::heuristic(&Default::default()));
        let response = retriever.retrieve("doc", 5, &[]).await;

        assert!(response.is_empty());
        assert_eq!(response.context.analysis, QueryAnalysis::Structural);
        assert_eq!(response.context.optimized_query, "doc");
    }

    #[tokio::test]
    async fn test_huge_max_results_does_not_overflow() {
        let retriever = retriever(consensus_index(), vec![strategy("a", 0.5), strategy("b", 0.5)])
            .with_reranker(Reranker::heuristic(&Default::default()));
        let response = retriever.retrieve("KA02I power", usize::MAX, &[]).await;

        assert_eq!(response.documents.len(), 4);
        assert!(response.documents.iter().all(|d| d.rerank.is_some()));
    }

    #[tokio::test]
    async fn test_timed_out_strategy_is_excluded() {
        let index = consensus_index().slow("a");
        let retriever = retriever(index, vec![strategy("a", 0.5), strategy("b", 0.5)]);
        let response = retriever.retrieve_with("doc", no_rerank(5), &[]).await;

        let ids: Vec<&str> = response.documents.iter().map(|d| d.document.id.as_str()).collect();
        assert_eq!(ids, vec!["doc2", "doc1", "doc4"]);
    }

    #[tokio::test]
    async fn test_disabled_strategy_is_not_searched() {
        let retriever = retriever(
            consensus_index(),
            vec![strategy("a", 0.5), strategy("b", 0.5).enabled(false)],
        );
        let response = retriever.retrieve_with("doc", no_rerank(5), &[]).await;

        assert_eq!(response.documents.len(), 3);
        assert!((response.documents[0].fusion.confidence - 1.0).abs() < 1e-6);
        assert_eq!(retriever.index.queries.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_rerank_attaches_provenance() {
        let retriever = retriever(consensus_index(), vec![strategy("a", 0.5), strategy("b", 0.5)])
            .with_reranker(Reranker::heuristic(&Default::default()));
        let response = retriever.retrieve("doc4", 2, &[]).await;

        assert_eq!(response.documents.len(), 2);
        for doc in &response.documents {
            let rerank = doc.rerank.as_ref().unwrap();
            assert!((rerank.original_score - doc.fusion.confidence).abs() < 1e-6);
            assert!(doc.fusion.num_strategies >= 1);
        }
        // Full-consensus documents outrank doc4 despite its keyword match
        let mut top: Vec<&str> = response.documents.iter().map(|d| d.document.id.as_str()).collect();
        top.sort();
        assert_eq!(top, vec!["doc1", "doc2"]);
        assert!(retriever.quality_metrics("doc4", &response.documents).reranking_applied);
    }

    #[tokio::test]
    async fn test_rerank_failure_keeps_fused_order() {
        let reranker = Reranker::with_model(Arc::new(FailingModel), &Default::default());
        let retriever = retriever(consensus_index(), vec![strategy("a", 0.5), strategy("b", 0.5)])
            .with_reranker(reranker);
        let response = retriever.retrieve("doc", 3, &[]).await;

        assert_eq!(response.documents.len(), 3);
        assert!(response.documents.iter().all(|d| d.rerank.is_none()));
        for pair in response.documents.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    fn intelligence(optimized_query: &str) -> QueryIntelligence {
        QueryIntelligence {
            original_query: "che potenza ha il KA02I".to_string(),
            language: "italian".to_string(),
            translated_query: Some("what power does the KA02I have".to_string()),
            optimized_query: optimized_query.to_string(),
            intent: IntentLabel::TechnicalSpecsOnly,
            complexity: QueryComplexity::Simple,
            products_mentioned: vec!["KA02I".to_string()],
            technical_focus: vec!["power".to_string()],
            application_focus: Vec::new(),
            exclusions: Vec::new(),
            confidence: 0.9,
            suggested_followup: None,
            reasoning: "specs".to_string(),
        }
    }

    #[tokio::test]
    async fn test_intelligence_drives_query() {
        let provider = Arc::new(FixedIntelligence(intelligence("KA02I power specifications")));
        let retriever = retriever(consensus_index(), vec![strategy("a", 0.5)])
            .with_intelligence(provider);
        let response = retriever
            .retrieve_with("che potenza ha il KA02I", no_rerank(5), &[])
            .await;

        assert!(retriever.has_intelligence());
        assert_eq!(response.context.optimized_query, "KA02I power specifications");
        assert!(response.context.intent.has_product_code);
        assert!(response.intelligence().is_some());
        assert_eq!(
            retriever.index.queries.lock().unwrap().as_slice(),
            ["KA02I power specifications"]
        );
    }

    #[tokio::test]
    async fn test_intelligence_failure_falls_back() {
        let retriever = retriever(consensus_index(), vec![strategy("a", 0.5), strategy("b", 0.5)])
            .with_intelligence(Arc::new(FailingIntelligence));
        let response = retriever.retrieve_with("doc", no_rerank(5), &[]).await;

        assert_eq!(response.context.analysis, QueryAnalysis::Structural);
        assert_eq!(response.context.optimized_query, "doc");
        assert_eq!(response.documents.len(), 4);
    }

    #[tokio::test]
    async fn test_blank_optimized_query_uses_original() {
        let provider = Arc::new(FixedIntelligence(intelligence("   ")));
        let retriever = retriever(consensus_index(), vec![strategy("a", 0.5)])
            .with_intelligence(provider);
        let response = retriever.retrieve_with("doc", no_rerank(5), &[]).await;

        assert_eq!(response.context.optimized_query, "doc");
    }

    #[tokio::test]
    async fn test_zero_max_results() {
        let retriever = retriever(consensus_index(), vec![strategy("a", 0.5)]);
        let response = retriever.retrieve_with("doc", no_rerank(0), &[]).await;
        assert!(response.is_empty());
    }

    #[tokio::test]
    async fn test_transforms_applied_per_strategy() {
        let strategies = vec![
            RetrievalStrategy::new("broad", StrategyRole::Broad, 0.5)
                .with_transform(mvr_core::QueryTransform::QuestionFormat),
        ];
        let index = MockIndex::default().with_list("*", vec!["doc1"]);
        let retriever = retriever(index, strategies);
        let response = retriever.retrieve_with("KA02I power", no_rerank(5), &[]).await;

        assert_eq!(response.documents[0].source.transformed_query, "What KA02I power?");
        assert_eq!(
            retriever.index.queries.lock().unwrap().as_slice(),
            ["What KA02I power?"]
        );
    }
}
