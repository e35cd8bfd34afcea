//! Vector retrieval path
//!
//! Provides:
//! - Pluggable embedding providers (OpenAI, Ollama, local hashing)
//! - In-memory vector index over events and conversation turns
//! - Result model shared with the graph path and the hybrid merge

pub mod embeddings;
pub mod models;
pub mod vector_index;

pub use embeddings::{
    provider_from_settings, EmbeddingBackend, EmbeddingProvider, LocalEmbeddings,
    OllamaEmbeddings, OpenAIEmbeddings,
};
pub use models::{EntityKind, EntityRef, ResultSource, SearchResult, VectorDocument};
pub use vector_index::{IndexStats, SearchFilter, VectorIndex};
