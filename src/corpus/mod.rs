//! Per-user corpus: canonical entities, normalization, stores and statistics.

pub mod models;
pub mod normalizer;
pub mod stats;
pub mod store;

pub use models::{
    ConversationTurn, Corpus, EmotionAnnotation, EmotionScore, Event, EventRef,
    DEFAULT_EVENT_TYPE,
};
pub use normalizer::{normalize_conversation, normalize_corpus, normalize_event, NormalizeReport};
pub use stats::{CorpusStats, TimeSlot};
pub use store::{load_corpus, ConversationStore, DateWindow, EventStore, JsonDirStore, MemoryStore};
