//! Hybrid merge of vector and graph results.

use std::collections::HashMap;

use crate::analysis::models::{ResultSource, SearchResult};
use crate::graph::cascade::sort_results;

use super::intent::SourceWeights;

/// Added to an entity found by both sources.
pub const DUAL_SOURCE_BONUS: f64 = 0.1;

struct Merged {
    result: SearchResult,
    vector: Option<f64>,
    graph: Option<f64>,
}

impl Merged {
    fn new(result: SearchResult) -> Self {
        let (source, score) = (result.source, result.score);
        let mut merged = Self {
            result,
            vector: None,
            graph: None,
        };
        merged.record(source, score);
        merged
    }

    fn record(&mut self, source: ResultSource, score: f64) {
        let slot = match source {
            ResultSource::Vector => &mut self.vector,
            ResultSource::Graph => &mut self.graph,
        };
        *slot = Some(slot.map_or(score, |s| s.max(score)));
    }

    /// Union keywords and fill metadata the first result lacked.
    fn absorb(&mut self, other: SearchResult) {
        self.record(other.source, other.score);

        let target = &mut self.result;
        for keyword in other.matched_keywords {
            if !target.matched_keywords.contains(&keyword) {
                target.matched_keywords.push(keyword);
            }
        }
        if target.emotion_label.is_none() {
            target.emotion_label = other.emotion_label;
        }
        if target.emotion_score.is_none() {
            target.emotion_score = other.emotion_score;
        }
        let entity = &mut target.entity;
        if entity.start.is_none() {
            entity.start = other.entity.start;
        }
        if entity.event_type.is_none() {
            entity.event_type = other.entity.event_type;
        }
        if entity.excerpt.is_none() {
            entity.excerpt = other.entity.excerpt;
        }
    }

    fn finish(mut self, weights: SourceWeights) -> SearchResult {
        let vector = self.vector.map(|s| s * weights.vector);
        let graph = self.graph.map(|s| s * weights.graph);

        let (score, source, corroborated) = match (vector, graph) {
            (Some(v), Some(g)) if v > g => (v + DUAL_SOURCE_BONUS, ResultSource::Vector, true),
            (Some(_), Some(g)) => (g + DUAL_SOURCE_BONUS, ResultSource::Graph, true),
            (Some(v), None) => (v, ResultSource::Vector, false),
            (None, Some(g)) => (g, ResultSource::Graph, false),
            (None, None) => (0.0, self.result.source, false),
        };

        self.result.score = score;
        self.result.source = source;
        self.result.corroborated = corroborated;
        self.result
    }
}

/// Deduplicate by entity identity, weight each source, reward corroboration,
/// sort and cut to `top_k`. Either input may be empty.
pub fn merge_results(
    vector: Vec<SearchResult>,
    graph: Vec<SearchResult>,
    weights: SourceWeights,
    top_k: usize,
) -> Vec<SearchResult> {
    let mut order: Vec<Merged> = Vec::with_capacity(vector.len() + graph.len());
    let mut positions: HashMap<String, usize> = HashMap::new();

    for result in vector.into_iter().chain(graph) {
        let identity = result.identity();
        match positions.get(&identity) {
            Some(&idx) => order[idx].absorb(result),
            None => {
                positions.insert(identity, order.len());
                order.push(Merged::new(result));
            }
        }
    }

    let mut merged: Vec<SearchResult> = order.into_iter().map(|m| m.finish(weights)).collect();
    sort_results(&mut merged);
    merged.truncate(top_k);
    merged
}
