//! Aggregate insights over a built knowledge graph.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, FixedOffset};
use serde::Serialize;

use super::model::{EdgeKind, GraphStats, KnowledgeGraph, NodeId};
use crate::corpus::stats::ScoredTitle;
use crate::corpus::{Event, TimeSlot};

const TOP_KEYWORDS: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeywordPair {
    pub first: String,
    pub second: String,
    /// Events tagged with both keywords
    pub shared_events: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EventPatterns {
    /// Event titles per type tag
    pub by_type: BTreeMap<String, Vec<String>>,
    /// Emotion score per scored event, in graph order
    pub emotion_by_event: Vec<ScoredTitle>,
    pub keyword_pairs: Vec<KeywordPair>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmotionPoint {
    pub start: DateTime<FixedOffset>,
    pub title: String,
    pub score: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BehaviorInsights {
    /// Keywords ranked by normalized degree inside the keyword subgraph
    pub central_keywords: Vec<(String, f64)>,
    pub emotion_distribution: BTreeMap<u8, usize>,
    pub time_slot_distribution: BTreeMap<TimeSlot, usize>,
    /// Scored events in chronological order
    pub emotion_trend: Vec<EmotionPoint>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Correlations {
    pub emotion_by_type: BTreeMap<String, f64>,
    pub emotion_by_time_slot: BTreeMap<TimeSlot, f64>,
    /// Titles of events scored 4 or 5
    pub positive_events: Vec<String>,
    /// Titles of events scored 1 or 2
    pub negative_events: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GraphInsights {
    pub stats: GraphStats,
    pub patterns: EventPatterns,
    pub behavior: BehaviorInsights,
    pub correlations: Correlations,
}

impl GraphInsights {
    pub fn compute(graph: &KnowledgeGraph) -> Self {
        let events: Vec<(NodeId, &Event)> = graph
            .event_nodes()
            .map(|(id, node)| (id, &node.event))
            .collect();

        Self {
            stats: graph.stats(),
            patterns: event_patterns(graph, &events),
            behavior: behavior_insights(graph, &events),
            correlations: correlations(&events),
        }
    }
}

fn event_patterns(graph: &KnowledgeGraph, events: &[(NodeId, &Event)]) -> EventPatterns {
    let mut patterns = EventPatterns::default();

    for (_, event) in events {
        patterns
            .by_type
            .entry(event.event_type.clone())
            .or_default()
            .push(event.title.clone());
        if let Some(score) = event.emotion {
            patterns.emotion_by_event.push(ScoredTitle {
                title: event.title.clone(),
                score: score.value(),
            });
        }
    }

    let mut pair_counts: BTreeMap<(String, String), usize> = BTreeMap::new();
    for (id, _) in events {
        let keywords: BTreeSet<&str> = graph
            .outgoing(*id)
            .filter(|edge| edge.kind == EdgeKind::HasKeyword)
            .filter_map(|edge| graph.node(edge.to).and_then(|n| n.as_keyword()))
            .collect();
        let keywords: Vec<&str> = keywords.into_iter().collect();
        for (i, first) in keywords.iter().enumerate() {
            for second in &keywords[i + 1..] {
                *pair_counts
                    .entry((first.to_string(), second.to_string()))
                    .or_default() += 1;
            }
        }
    }

    let mut pairs: Vec<KeywordPair> = pair_counts
        .into_iter()
        .map(|((first, second), shared_events)| KeywordPair {
            first,
            second,
            shared_events,
        })
        .collect();
    pairs.sort_by(|a, b| b.shared_events.cmp(&a.shared_events));
    patterns.keyword_pairs = pairs;

    patterns
}

fn behavior_insights(graph: &KnowledgeGraph, events: &[(NodeId, &Event)]) -> BehaviorInsights {
    let mut insights = BehaviorInsights {
        central_keywords: keyword_centrality(graph, TOP_KEYWORDS),
        ..Default::default()
    };

    for (_, event) in events {
        *insights
            .time_slot_distribution
            .entry(TimeSlot::of(&event.start))
            .or_default() += 1;
        if let Some(score) = event.emotion {
            *insights
                .emotion_distribution
                .entry(score.value())
                .or_default() += 1;
            insights.emotion_trend.push(EmotionPoint {
                start: event.start,
                title: event.title.clone(),
                score: score.value(),
            });
        }
    }
    insights.emotion_trend.sort_by_key(|point| point.start);

    insights
}

/// Degree centrality restricted to keyword-keyword edges, normalized by `n - 1`.
fn keyword_centrality(graph: &KnowledgeGraph, limit: usize) -> Vec<(String, f64)> {
    let keywords: HashMap<NodeId, &str> = graph.keyword_nodes().collect();
    if keywords.len() < 2 {
        return Vec::new();
    }

    let mut neighbours: HashMap<NodeId, BTreeSet<NodeId>> = HashMap::new();
    for edge in graph.edges() {
        if keywords.contains_key(&edge.from) && keywords.contains_key(&edge.to) {
            neighbours.entry(edge.from).or_default().insert(edge.to);
            neighbours.entry(edge.to).or_default().insert(edge.from);
        }
    }

    let scale = (keywords.len() - 1) as f64;
    let mut ranked: Vec<(String, f64)> = neighbours
        .into_iter()
        .filter_map(|(id, adjacent)| {
            keywords
                .get(&id)
                .map(|value| (value.to_string(), adjacent.len() as f64 / scale))
        })
        .collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.truncate(limit);
    ranked
}

fn correlations(events: &[(NodeId, &Event)]) -> Correlations {
    let mut by_type: BTreeMap<String, (u32, u32)> = BTreeMap::new();
    let mut by_slot: BTreeMap<TimeSlot, (u32, u32)> = BTreeMap::new();
    let mut result = Correlations::default();

    for (_, event) in events {
        let Some(score) = event.emotion else {
            continue;
        };
        let value = score.value() as u32;

        let entry = by_type.entry(event.event_type.clone()).or_default();
        entry.0 += value;
        entry.1 += 1;

        let entry = by_slot.entry(TimeSlot::of(&event.start)).or_default();
        entry.0 += value;
        entry.1 += 1;

        if score.is_positive() {
            result.positive_events.push(event.title.clone());
        } else if score.is_negative() {
            result.negative_events.push(event.title.clone());
        }
    }

    result.emotion_by_type = by_type
        .into_iter()
        .map(|(kind, (sum, count))| (kind, sum as f64 / count as f64))
        .collect();
    result.emotion_by_time_slot = by_slot
        .into_iter()
        .map(|(slot, (sum, count))| (slot, sum as f64 / count as f64))
        .collect();
    result
}
