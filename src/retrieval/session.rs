//! Retrieval sessions: build graph and index once, answer many queries.

use std::sync::Arc;
use std::time::Instant;

use chrono::Local;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::intent::{QueryIntent, RetrievalStrategy, SourceWeights};
use super::merge::merge_results;
use crate::analysis::embeddings::{provider_from_settings, EmbeddingProvider};
use crate::analysis::models::{SearchResult, VectorDocument};
use crate::analysis::vector_index::{IndexStats, VectorIndex};
use crate::config::Config;
use crate::corpus::{
    load_corpus, ConversationStore, Corpus, CorpusStats, DateWindow, EventStore, JsonDirStore,
    NormalizeReport,
};
use crate::error::Result;
use crate::graph::builder::{BuildReport, GraphBuilder};
use crate::graph::cascade::{GraphQueryEngine, StageRecord};
use crate::graph::insights::GraphInsights;
use crate::graph::keywords::SynonymTable;
use crate::graph::model::{GraphStats, KnowledgeGraph};
use crate::metrics;

/// Diagnostics collected while preparing a session.
#[derive(Debug, Clone, Serialize)]
pub struct PrepareReport {
    pub user_id: String,
    /// Present when the corpus came from a store
    pub normalize: Option<NormalizeReport>,
    pub graph: BuildReport,
    pub index: IndexStats,
}

/// How a query was answered.
#[derive(Debug, Clone, Serialize)]
pub struct ContextSummary {
    pub query: String,
    pub intent: QueryIntent,
    /// Strategy actually used
    pub strategy: RetrievalStrategy,
    pub weights: SourceWeights,
    pub vector_count: usize,
    pub graph_count: usize,
    pub trace: Vec<StageRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RetrievalOutcome {
    pub results: Vec<SearchResult>,
    pub summary: ContextSummary,
}

/// Corpus statistics, graph counts and build diagnostics of one session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    pub corpus: CorpusStats,
    pub graph: GraphStats,
    pub session: PrepareReport,
}

/// Graph and vector index for one user's corpus.
///
/// Owned by a single caller; read-only once prepared.
pub struct RetrievalSession {
    corpus: Corpus,
    graph: KnowledgeGraph,
    index: VectorIndex,
    strategy: RetrievalStrategy,
    report: PrepareReport,
}

impl RetrievalSession {
    /// Build the graph, then the vector index. Never fails: a missing provider
    /// or a provider error leaves only the graph path.
    pub async fn prepare(
        corpus: Corpus,
        provider: Option<Arc<dyn EmbeddingProvider>>,
        builder: &GraphBuilder,
    ) -> Self {
        let (graph, build_report) = builder.build(&corpus);
        let index = VectorIndex::build(VectorDocument::from_corpus(&corpus), provider).await;

        info!(
            user_id = %corpus.user_id,
            events = corpus.events.len(),
            conversations = corpus.conversations.len(),
            nodes = graph.node_count(),
            vectors = index.len(),
            "Retrieval session prepared"
        );

        let report = PrepareReport {
            user_id: corpus.user_id.clone(),
            normalize: None,
            graph: build_report,
            index: index.stats(),
        };

        Self {
            corpus,
            graph,
            index,
            strategy: RetrievalStrategy::default(),
            report,
        }
    }

    /// Default strategy for [`retrieve`](Self::retrieve).
    pub fn with_strategy(mut self, strategy: RetrievalStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn strategy(&self) -> RetrievalStrategy {
        self.strategy
    }

    pub fn corpus(&self) -> &Corpus {
        &self.corpus
    }

    pub fn graph(&self) -> &KnowledgeGraph {
        &self.graph
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    pub fn report(&self) -> &PrepareReport {
        &self.report
    }

    pub fn corpus_stats(&self) -> CorpusStats {
        CorpusStats::compute(&self.corpus)
    }

    pub fn insights(&self) -> GraphInsights {
        GraphInsights::compute(&self.graph)
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            corpus: self.corpus_stats(),
            graph: self.graph.stats(),
            session: self.report.clone(),
        }
    }

    /// Ranked results using the session's strategy.
    pub async fn retrieve(&self, query: &str, top_k: usize) -> Vec<SearchResult> {
        self.retrieve_with(query, top_k, self.strategy).await.results
    }

    pub async fn retrieve_with(
        &self,
        query: &str,
        top_k: usize,
        strategy: RetrievalStrategy,
    ) -> RetrievalOutcome {
        let started = Instant::now();

        // Hybrid without a vector path behaves like graph-only.
        let strategy = match strategy {
            RetrievalStrategy::Hybrid if !self.index.is_enabled() => RetrievalStrategy::GraphOnly,
            other => other,
        };
        let intent = QueryIntent::classify(query);
        let weights = strategy.weights_for(intent);

        let vector_results = if strategy.uses_vector() {
            self.index.search(query, top_k, None).await
        } else {
            Vec::new()
        };

        let (graph_results, trace) = if strategy.uses_graph() {
            let outcome = GraphQueryEngine::new(&self.graph).search(query, top_k);
            (outcome.results, outcome.trace)
        } else {
            (Vec::new(), Vec::new())
        };

        let vector_count = vector_results.len();
        let graph_count = graph_results.len();
        let results = merge_results(vector_results, graph_results, weights, top_k);

        metrics::record_retrieval(strategy.as_str(), started.elapsed(), results.is_empty());
        debug!(
            %intent,
            %strategy,
            vector_count,
            graph_count,
            returned = results.len(),
            "Query answered"
        );

        RetrievalOutcome {
            results,
            summary: ContextSummary {
                query: query.to_string(),
                intent,
                strategy,
                weights,
                vector_count,
                graph_count,
                trace,
            },
        }
    }
}

/// Opens retrieval sessions over a pair of corpus stores.
pub struct HybridRetriever {
    events: Arc<dyn EventStore>,
    conversations: Arc<dyn ConversationStore>,
    provider: Option<Arc<dyn EmbeddingProvider>>,
    builder: GraphBuilder,
    strategy: RetrievalStrategy,
    last_week_only: bool,
}

impl HybridRetriever {
    pub fn new(
        events: Arc<dyn EventStore>,
        conversations: Arc<dyn ConversationStore>,
        provider: Option<Arc<dyn EmbeddingProvider>>,
        builder: GraphBuilder,
    ) -> Self {
        Self {
            events,
            conversations,
            provider,
            builder,
            strategy: RetrievalStrategy::default(),
            last_week_only: false,
        }
    }

    /// File-backed retriever. A provider that cannot be built is logged and
    /// the vector path disabled.
    pub fn from_config(config: &Config) -> Result<Self> {
        let store = Arc::new(JsonDirStore::new(&config.data_dir));

        let provider = match provider_from_settings(&config.embedding) {
            Ok(provider) => provider,
            Err(e) => {
                warn!("Embedding provider unavailable, vector path disabled: {}", e);
                metrics::record_embedding_failure(config.embedding.backend.as_str());
                None
            }
        };

        let synonyms = match &config.synonyms_path {
            Some(path) => SynonymTable::load(path)?,
            None => SynonymTable::default(),
        };

        let mut retriever = Self::new(store.clone(), store, provider, GraphBuilder::new(synonyms));
        retriever.strategy = config.strategy;
        retriever.last_week_only = config.last_week_only;
        Ok(retriever)
    }

    pub fn with_strategy(mut self, strategy: RetrievalStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Restrict sessions to the previous calendar week.
    pub fn last_week_only(mut self, enabled: bool) -> Self {
        self.last_week_only = enabled;
        self
    }

    /// Load the user's corpus and prepare a fresh session for it.
    ///
    /// Fails with [`Error::Storage`](crate::Error::Storage) when the data root is
    /// missing and [`Error::InvalidArgument`](crate::Error::InvalidArgument) for a
    /// user id that is not a plain directory name. Bad files and records are skipped.
    pub async fn open_session(&self, user_id: &str) -> Result<RetrievalSession> {
        let window = self
            .last_week_only
            .then(|| DateWindow::previous_week(Local::now().date_naive()));
        self.open_session_in(user_id, window).await
    }

    pub async fn open_session_in(
        &self,
        user_id: &str,
        window: Option<DateWindow>,
    ) -> Result<RetrievalSession> {
        let (corpus, normalize) = load_corpus(
            self.events.as_ref(),
            self.conversations.as_ref(),
            user_id,
            window,
        )?;

        let mut session = RetrievalSession::prepare(corpus, self.provider.clone(), &self.builder)
            .await
            .with_strategy(self.strategy);
        session.report.normalize = Some(normalize);
        Ok(session)
    }
}
