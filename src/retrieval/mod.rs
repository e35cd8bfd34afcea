//! Hybrid retrieval: intent weighting, result merge and per-user sessions.

pub mod intent;
pub mod merge;
pub mod session;

pub use intent::{QueryIntent, RetrievalStrategy, SourceWeights};
pub use merge::{merge_results, DUAL_SOURCE_BONUS};
pub use session::{
    ContextSummary, HybridRetriever, PrepareReport, RetrievalOutcome, RetrievalSession,
    SessionStats,
};
