//! In-memory vector index over corpus documents

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::embeddings::{cosine_similarity, EmbeddingProvider};
use super::models::{EntityKind, SearchResult, VectorDocument};
use crate::graph::cascade::sort_results;
use crate::graph::keywords::tokenize;
use crate::metrics;

struct IndexedDocument {
    document: VectorDocument,
    embedding: Vec<f32>,
}

/// Nearest-neighbour index for one retrieval session.
///
/// A failed or missing embedding provider leaves the index disabled; every
/// search then returns no results.
pub struct VectorIndex {
    provider: Option<Arc<dyn EmbeddingProvider>>,
    entries: Vec<IndexedDocument>,
    dimension: usize,
}

impl VectorIndex {
    /// Index that never returns results.
    pub fn disabled() -> Self {
        Self {
            provider: None,
            entries: Vec::new(),
            dimension: 0,
        }
    }

    /// Embed every document. Never fails: provider errors disable the index.
    pub async fn build(
        documents: Vec<VectorDocument>,
        provider: Option<Arc<dyn EmbeddingProvider>>,
    ) -> Self {
        let Some(provider) = provider else {
            debug!("No embedding provider, vector path disabled");
            return Self::disabled();
        };

        if documents.is_empty() {
            return Self {
                dimension: provider.dimension(),
                provider: Some(provider),
                entries: Vec::new(),
            };
        }

        let texts: Vec<String> = documents.iter().map(|d| d.text.clone()).collect();
        let embeddings = match provider.embed_batch(&texts).await {
            Ok(embeddings) if embeddings.len() == documents.len() => embeddings,
            Ok(embeddings) => {
                warn!(
                    provider = provider.name(),
                    expected = documents.len(),
                    got = embeddings.len(),
                    "Embedding count mismatch, vector path disabled"
                );
                metrics::record_embedding_failure(provider.name());
                return Self::disabled();
            }
            Err(e) => {
                warn!(provider = provider.name(), "Embedding failed, vector path disabled: {}", e);
                metrics::record_embedding_failure(provider.name());
                return Self::disabled();
            }
        };

        let entries: Vec<IndexedDocument> = documents
            .into_iter()
            .zip(embeddings)
            .filter(|(_, embedding)| !embedding.is_empty())
            .map(|(document, embedding)| IndexedDocument {
                document,
                embedding,
            })
            .collect();

        let dimension = entries
            .first()
            .map(|e| e.embedding.len())
            .unwrap_or_else(|| provider.dimension());

        info!(
            provider = provider.name(),
            documents = entries.len(),
            dimension,
            "Vector index built"
        );

        Self {
            provider: Some(provider),
            entries,
            dimension,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.provider.is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> IndexStats {
        IndexStats {
            enabled: self.is_enabled(),
            provider: self.provider.as_ref().map(|p| p.name().to_string()),
            documents: self.entries.len(),
            dimension: self.dimension,
        }
    }

    /// Up to `k` nearest documents with relevance in [0, 1], best first.
    pub async fn search(
        &self,
        query: &str,
        k: usize,
        filter: Option<SearchFilter>,
    ) -> Vec<SearchResult> {
        let Some(provider) = &self.provider else {
            return Vec::new();
        };
        if k == 0 || self.entries.is_empty() || query.trim().is_empty() {
            return Vec::new();
        }

        let query_embedding = match provider.embed(query).await {
            Ok(embedding) if !embedding.is_empty() => embedding,
            Ok(_) => return Vec::new(),
            Err(e) => {
                warn!(provider = provider.name(), "Query embedding failed: {}", e);
                metrics::record_embedding_failure(provider.name());
                return Vec::new();
            }
        };

        let filter = filter.unwrap_or_default();
        let query_tokens = tokenize(query);

        let mut results: Vec<SearchResult> = self
            .entries
            .iter()
            .filter(|entry| filter.kind.map_or(true, |kind| entry.document.entity.kind == kind))
            .map(|entry| {
                let similarity = cosine_similarity(&query_embedding, &entry.embedding);
                let score = f64::from(similarity).clamp(0.0, 1.0);
                let mut result = entry.document.to_result(score);
                result.matched_keywords = entry
                    .document
                    .keywords
                    .iter()
                    .filter(|kw| query_tokens.contains(kw))
                    .cloned()
                    .collect();
                result
            })
            .filter(|result| result.score > filter.min_score.unwrap_or(0.0))
            .collect();

        sort_results(&mut results);
        results.truncate(k);

        debug!("Vector search returned {} results", results.len());
        results
    }
}

/// Filter for vector search
#[derive(Debug, Clone, Copy, Default)]
pub struct SearchFilter {
    pub kind: Option<EntityKind>,
    /// Results must score strictly above this
    pub min_score: Option<f64>,
}

impl SearchFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kind(mut self, kind: EntityKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn min_score(mut self, min_score: f64) -> Self {
        self.min_score = Some(min_score);
        self
    }
}

/// Index statistics
#[derive(Debug, Clone, serde::Serialize)]
pub struct IndexStats {
    pub enabled: bool,
    pub provider: Option<String>,
    pub documents: usize,
    pub dimension: usize,
}
