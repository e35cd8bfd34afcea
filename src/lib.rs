//! Reflect RAG: hybrid context retrieval for a reflective journaling assistant
//!
//! This library provides tools to:
//! - Normalize calendar events and conversation turns into a per-user corpus
//! - Embed the corpus and search it by vector similarity
//! - Build a typed knowledge graph and query it with a fallback cascade
//! - Merge both result lists into one intent-weighted ranking
//! - Compute corpus statistics and graph insights

pub mod analysis;
pub mod config;
pub mod corpus;
pub mod error;
pub mod graph;
pub mod metrics;
pub mod retrieval;

// Re-export common types
pub use analysis::{EmbeddingProvider, ResultSource, SearchResult, VectorIndex};
pub use config::Config;
pub use corpus::{Corpus, ConversationTurn, EmotionScore, Event};
pub use error::{Error, Result};
pub use graph::{GraphBuilder, GraphQueryEngine, KnowledgeGraph, SynonymTable};
pub use retrieval::{
    HybridRetriever, QueryIntent, RetrievalOutcome, RetrievalSession, RetrievalStrategy,
};
