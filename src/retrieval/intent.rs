//! Rule-based query intent and source weighting.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::error::{Error, Result};
use crate::graph::keywords::{tokenize, EMOTION_TERMS, RELATION_TERMS, TIME_TERMS, TYPE_TERMS};

/// What the query is mostly asking about. Checked in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryIntent {
    Emotion,
    Relationship,
    Time,
    Type,
    General,
}

impl QueryIntent {
    pub fn classify(query: &str) -> Self {
        let tokens = tokenize(query);
        let has = |lexicon: &[&str]| tokens.iter().any(|t| lexicon.contains(&t.as_str()));

        if has(EMOTION_TERMS) {
            QueryIntent::Emotion
        } else if has(RELATION_TERMS) {
            QueryIntent::Relationship
        } else if has(TIME_TERMS) {
            QueryIntent::Time
        } else if has(TYPE_TERMS) {
            QueryIntent::Type
        } else {
            QueryIntent::General
        }
    }

    pub fn weights(&self) -> SourceWeights {
        match self {
            QueryIntent::Emotion => SourceWeights::new(0.3, 0.7),
            QueryIntent::Relationship => SourceWeights::new(0.2, 0.8),
            QueryIntent::Time => SourceWeights::new(0.6, 0.4),
            QueryIntent::Type | QueryIntent::General => SourceWeights::default(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QueryIntent::Emotion => "emotion",
            QueryIntent::Relationship => "relationship",
            QueryIntent::Time => "time",
            QueryIntent::Type => "type",
            QueryIntent::General => "general",
        }
    }
}

impl fmt::Display for QueryIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Multipliers applied to each source's scores before merging.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SourceWeights {
    pub vector: f64,
    pub graph: f64,
}

impl SourceWeights {
    pub const fn new(vector: f64, graph: f64) -> Self {
        Self { vector, graph }
    }
}

impl Default for SourceWeights {
    fn default() -> Self {
        Self::new(0.5, 0.5)
    }
}

/// Which retrieval paths a query uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalStrategy {
    VectorOnly,
    GraphOnly,
    #[default]
    Hybrid,
}

impl RetrievalStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetrievalStrategy::VectorOnly => "vector",
            RetrievalStrategy::GraphOnly => "graph",
            RetrievalStrategy::Hybrid => "hybrid",
        }
    }

    pub fn uses_vector(&self) -> bool {
        !matches!(self, RetrievalStrategy::GraphOnly)
    }

    pub fn uses_graph(&self) -> bool {
        !matches!(self, RetrievalStrategy::VectorOnly)
    }

    /// Intent weights for hybrid retrieval; a single source gets full weight.
    pub fn weights_for(&self, intent: QueryIntent) -> SourceWeights {
        match self {
            RetrievalStrategy::VectorOnly => SourceWeights::new(1.0, 0.0),
            RetrievalStrategy::GraphOnly => SourceWeights::new(0.0, 1.0),
            RetrievalStrategy::Hybrid => intent.weights(),
        }
    }
}

impl fmt::Display for RetrievalStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RetrievalStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "vector" | "vector_only" | "vectoronly" => Ok(RetrievalStrategy::VectorOnly),
            "graph" | "graph_only" | "graphonly" => Ok(RetrievalStrategy::GraphOnly),
            "hybrid" => Ok(RetrievalStrategy::Hybrid),
            other => Err(Error::InvalidArgument(format!(
                "Unknown retrieval strategy: {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emotion_terms_win_over_other_lexicons() {
        assert_eq!(QueryIntent::classify("things that felt good"), QueryIntent::Emotion);
        assert_eq!(
            QueryIntent::classify("how did I feel in the morning"),
            QueryIntent::Emotion
        );
    }

    #[test]
    fn relationship_and_time_intents() {
        assert_eq!(
            QueryIntent::classify("pattern between meetings and dinners"),
            QueryIntent::Relationship
        );
        assert_eq!(QueryIntent::classify("when do I go running"), QueryIntent::Time);
        assert_eq!(QueryIntent::classify("which activities"), QueryIntent::Type);
        assert_eq!(QueryIntent::classify("piano lessons"), QueryIntent::General);
    }

    #[test]
    fn emotion_only_query_prefers_graph() {
        let weights = QueryIntent::classify("happy joyful").weights();
        assert!(weights.graph > weights.vector);
        assert_eq!(weights, SourceWeights::new(0.3, 0.7));
    }

    #[test]
    fn intent_weights_table() {
        assert_eq!(QueryIntent::Relationship.weights(), SourceWeights::new(0.2, 0.8));
        assert_eq!(QueryIntent::Time.weights(), SourceWeights::new(0.6, 0.4));
        assert_eq!(QueryIntent::General.weights(), SourceWeights::new(0.5, 0.5));
    }

    #[test]
    fn single_source_strategies_use_full_weight() {
        let intent = QueryIntent::Emotion;
        assert_eq!(
            RetrievalStrategy::VectorOnly.weights_for(intent),
            SourceWeights::new(1.0, 0.0)
        );
        assert_eq!(
            RetrievalStrategy::GraphOnly.weights_for(intent),
            SourceWeights::new(0.0, 1.0)
        );
        assert_eq!(RetrievalStrategy::Hybrid.weights_for(intent), intent.weights());
    }

    #[test]
    fn strategy_parses_aliases() {
        assert_eq!("graph".parse::<RetrievalStrategy>().unwrap(), RetrievalStrategy::GraphOnly);
        assert_eq!(
            "Vector-Only".parse::<RetrievalStrategy>().unwrap(),
            RetrievalStrategy::VectorOnly
        );
        assert_eq!("hybrid".parse::<RetrievalStrategy>().unwrap(), RetrievalStrategy::Hybrid);
        assert!("random".parse::<RetrievalStrategy>().is_err());
    }
}
