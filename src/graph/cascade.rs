//! Graph query cascade.
//!
//! Stages run in a fixed order, each gated on what the previous stages found:
//!
//! 1. `ExactMatch`: keyword nodes equal to a query token, plus their synonyms
//! 2. `PartialMatch`: substring matches, only when fewer than 2 keywords matched
//! 3. `EventViaKeyword`: events pointing at a matched keyword, scored by edge weight
//! 4. `DirectTextMatch`: token hits in event text, only with fewer than 5 candidates
//! 5. `EmotionIntent`: emotion-tagged events, only for emotion-lexicon queries
//! 6. `CentralityFallback`: PageRank + recency, only when nothing matched
//!
//! The cascade stops once it holds `top_k` event candidates.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};

use serde::Serialize;
use tracing::debug;

use super::keywords::{polarity, tokenize, Polarity, EMOTION_TERMS};
use super::model::{EdgeKind, EventNode, KnowledgeGraph, NodeId, NodeKey, NodeKind};
use crate::analysis::models::{EntityRef, ResultSource, SearchResult};
use crate::metrics;

/// Fewer exact keyword hits than this enables partial matching.
pub const PARTIAL_MATCH_THRESHOLD: usize = 2;
/// Fewer event candidates than this enables direct text matching.
pub const DIRECT_TEXT_THRESHOLD: usize = 5;
pub const DIRECT_TEXT_WEIGHT: f64 = 0.8;
pub const EMOTION_BASE: f64 = 0.5;
pub const EMOTION_INTENSITY_WEIGHT: f64 = 0.3;
pub const POLARITY_WEIGHT: f64 = 0.3;
/// Upper bound of fallback scores.
pub const FALLBACK_TIER: f64 = 0.3;
pub const FALLBACK_CENTRALITY_SHARE: f64 = 0.7;
pub const PAGERANK_DAMPING: f64 = 0.85;
pub const PAGERANK_ITERATIONS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CascadeStage {
    ExactMatch,
    PartialMatch,
    EventViaKeyword,
    DirectTextMatch,
    EmotionIntent,
    CentralityFallback,
}

impl CascadeStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            CascadeStage::ExactMatch => "exact_match",
            CascadeStage::PartialMatch => "partial_match",
            CascadeStage::EventViaKeyword => "event_via_keyword",
            CascadeStage::DirectTextMatch => "direct_text_match",
            CascadeStage::EmotionIntent => "emotion_intent",
            CascadeStage::CentralityFallback => "centrality_fallback",
        }
    }
}

/// What a stage did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum StageStatus {
    /// Stage ran; `found` counts keyword nodes for stages 1-2, events otherwise.
    Ran { found: usize },
    /// Gate condition not met.
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StageRecord {
    pub stage: CascadeStage,
    #[serde(flatten)]
    pub status: StageStatus,
}

/// Results of one cascade run together with its stage trace.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CascadeOutcome {
    pub results: Vec<SearchResult>,
    pub trace: Vec<StageRecord>,
}

impl CascadeOutcome {
    pub fn ran(&self, stage: CascadeStage) -> bool {
        self.trace
            .iter()
            .any(|r| r.stage == stage && matches!(r.status, StageStatus::Ran { .. }))
    }
}

#[derive(Debug, Default)]
struct Candidate {
    score: f64,
    keywords: Vec<String>,
}

impl Candidate {
    fn add_keyword(&mut self, keyword: &str) {
        if !self.keywords.iter().any(|k| k == keyword) {
            self.keywords.push(keyword.to_string());
        }
    }
}

/// Cascade state for one query.
struct CascadeRun<'g> {
    graph: &'g KnowledgeGraph,
    tokens: Vec<String>,
    top_k: usize,
    keywords: Vec<NodeId>,
    candidates: BTreeMap<NodeId, Candidate>,
    trace: Vec<StageRecord>,
}

impl<'g> CascadeRun<'g> {
    fn record(&mut self, stage: CascadeStage, status: StageStatus) {
        debug!(stage = stage.as_str(), ?status, "Cascade stage");
        if matches!(status, StageStatus::Ran { .. }) {
            metrics::record_cascade_stage(stage.as_str());
        }
        self.trace.push(StageRecord { stage, status });
    }

    fn satisfied(&self) -> bool {
        self.candidates.len() >= self.top_k
    }

    fn push_keyword(&mut self, id: NodeId, seen: &mut HashSet<NodeId>) -> bool {
        if seen.insert(id) {
            self.keywords.push(id);
            true
        } else {
            false
        }
    }

    fn exact_match(&mut self) {
        let mut seen = HashSet::new();
        let mut direct = Vec::new();
        for token in &self.tokens {
            if let Some(id) = self.graph.lookup(&NodeKey::Keyword(token.clone())) {
                direct.push(id);
            }
        }
        for id in direct {
            self.push_keyword(id, &mut seen);
            let synonyms: Vec<NodeId> = self
                .graph
                .outgoing(id)
                .filter(|e| e.kind == EdgeKind::IsSynonym)
                .map(|e| e.to)
                .chain(
                    self.graph
                        .incoming(id)
                        .filter(|e| e.kind == EdgeKind::IsSynonym)
                        .map(|e| e.from),
                )
                .collect();
            for synonym in synonyms {
                self.push_keyword(synonym, &mut seen);
            }
        }
        let found = self.keywords.len();
        self.record(CascadeStage::ExactMatch, StageStatus::Ran { found });
    }

    fn partial_match(&mut self) {
        if self.keywords.len() >= PARTIAL_MATCH_THRESHOLD {
            self.record(CascadeStage::PartialMatch, StageStatus::Skipped);
            return;
        }
        let mut seen: HashSet<NodeId> = self.keywords.iter().copied().collect();
        let before = self.keywords.len();
        let hits: Vec<NodeId> = self
            .graph
            .keyword_nodes()
            .filter(|(_, value)| self.tokens.iter().any(|token| substring_match(value, token)))
            .map(|(id, _)| id)
            .collect();
        for id in hits {
            self.push_keyword(id, &mut seen);
        }
        let found = self.keywords.len() - before;
        self.record(CascadeStage::PartialMatch, StageStatus::Ran { found });
    }

    fn event_via_keyword(&mut self) {
        let graph = self.graph;
        for &keyword_id in &self.keywords {
            let Some(value) = graph.node(keyword_id).and_then(NodeKind::as_keyword) else {
                continue;
            };
            for edge in graph.incoming(keyword_id) {
                if graph.node(edge.from).and_then(NodeKind::as_event).is_none() {
                    continue;
                }
                let candidate = self.candidates.entry(edge.from).or_default();
                candidate.score += edge.weight;
                candidate.add_keyword(value);
            }
        }
        let found = self.candidates.len();
        self.record(CascadeStage::EventViaKeyword, StageStatus::Ran { found });
    }

    fn direct_text_match(&mut self) {
        if self.candidates.len() >= DIRECT_TEXT_THRESHOLD {
            self.record(CascadeStage::DirectTextMatch, StageStatus::Skipped);
            return;
        }
        let graph = self.graph;
        let mut hits = 0;
        for (id, event) in graph.event_nodes() {
            let matched: Vec<&String> = self
                .tokens
                .iter()
                .filter(|token| event.search_text.contains(token.as_str()))
                .collect();
            if matched.is_empty() {
                continue;
            }
            hits += 1;
            let candidate = self.candidates.entry(id).or_default();
            candidate.score += DIRECT_TEXT_WEIGHT * matched.len() as f64;
            for token in matched {
                candidate.add_keyword(token);
            }
        }
        self.record(CascadeStage::DirectTextMatch, StageStatus::Ran { found: hits });
    }

    fn emotion_intent(&mut self) {
        if !self.tokens.iter().any(|t| EMOTION_TERMS.contains(&t.as_str())) {
            self.record(CascadeStage::EmotionIntent, StageStatus::Skipped);
            return;
        }
        let graph = self.graph;
        let polarity = polarity(&self.tokens);
        let user_edges: HashMap<(NodeId, EdgeKind), f64> = graph
            .nodes()
            .filter(|(_, node)| matches!(node, NodeKind::User { .. }))
            .flat_map(|(id, _)| graph.outgoing(id))
            .filter(|e| matches!(e.kind, EdgeKind::Enjoys | EdgeKind::Dislikes))
            .map(|e| ((e.to, e.kind), e.weight))
            .collect();

        let mut hits = 0;
        for (emotion_id, node) in graph.nodes() {
            let Some(score) = node.as_emotion() else {
                continue;
            };
            for edge in graph.incoming(emotion_id) {
                if edge.kind != EdgeKind::HasEmotion {
                    continue;
                }
                let mut boost =
                    EMOTION_BASE + score.intensity() as f64 * EMOTION_INTENSITY_WEIGHT;
                let aligned = match polarity {
                    Some(Polarity::Positive) => user_edges.get(&(edge.from, EdgeKind::Enjoys)),
                    Some(Polarity::Negative) => user_edges.get(&(edge.from, EdgeKind::Dislikes)),
                    _ => None,
                };
                if let Some(weight) = aligned {
                    boost += weight * POLARITY_WEIGHT;
                }
                hits += 1;
                self.candidates.entry(edge.from).or_default().score += boost;
            }
        }
        self.record(CascadeStage::EmotionIntent, StageStatus::Ran { found: hits });
    }

    fn centrality_fallback(&mut self) {
        if !self.candidates.is_empty() {
            self.record(CascadeStage::CentralityFallback, StageStatus::Skipped);
            return;
        }
        let graph = self.graph;
        let events: Vec<(NodeId, &EventNode)> = graph.event_nodes().collect();
        if events.is_empty() {
            self.record(CascadeStage::CentralityFallback, StageStatus::Ran { found: 0 });
            return;
        }

        let rank = graph.pagerank(PAGERANK_DAMPING, PAGERANK_ITERATIONS);
        let max_rank = events
            .iter()
            .map(|(id, _)| rank[id.0])
            .fold(0.0_f64, f64::max);
        let starts: Vec<i64> = events.iter().map(|(_, e)| e.event.start.timestamp()).collect();
        let (oldest, newest) = starts
            .iter()
            .fold((i64::MAX, i64::MIN), |(lo, hi), &s| (lo.min(s), hi.max(s)));

        for ((id, _), start) in events.iter().zip(&starts) {
            let centrality = if max_rank > 0.0 {
                rank[id.0] / max_rank
            } else {
                0.0
            };
            let recency = if newest > oldest {
                (start - oldest) as f64 / (newest - oldest) as f64
            } else {
                1.0
            };
            let blended = FALLBACK_CENTRALITY_SHARE * centrality
                + (1.0 - FALLBACK_CENTRALITY_SHARE) * recency;
            self.candidates.entry(*id).or_default().score = FALLBACK_TIER * blended;
        }
        let found = self.candidates.len();
        self.record(CascadeStage::CentralityFallback, StageStatus::Ran { found });
    }

    fn skip_rest(&mut self, from: &[CascadeStage]) {
        for &stage in from {
            self.record(stage, StageStatus::Skipped);
        }
    }

    fn into_outcome(self) -> CascadeOutcome {
        let graph = self.graph;
        let mut results: Vec<SearchResult> = self
            .candidates
            .into_iter()
            .filter_map(|(id, candidate)| {
                let event = graph.node(id).and_then(NodeKind::as_event)?;
                Some(to_result(&event.event, candidate))
            })
            .collect();
        sort_results(&mut results);
        results.truncate(self.top_k);
        CascadeOutcome {
            results,
            trace: self.trace,
        }
    }
}

fn to_result(event: &crate::corpus::Event, candidate: Candidate) -> SearchResult {
    let mut result = SearchResult::new(
        EntityRef::from_event(event),
        candidate.score,
        ResultSource::Graph,
    );
    result.matched_keywords = candidate.keywords;
    result.emotion_label = event.emotion_label().map(str::to_string);
    result.emotion_score = event.emotion.map(|s| s.value());
    result
}

/// Case-insensitive containment in either direction; inputs are already lowercase
/// tokens of at least two characters.
fn substring_match(keyword: &str, token: &str) -> bool {
    keyword.contains(token) || token.contains(keyword)
}

/// Score descending, later start first, then identity for a total order.
pub fn sort_results(results: &mut [SearchResult]) {
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| b.entity.start.cmp(&a.entity.start))
            .then_with(|| a.identity().cmp(&b.identity()))
    });
}

/// Read-only query engine over a built graph.
#[derive(Debug, Clone, Copy)]
pub struct GraphQueryEngine<'g> {
    graph: &'g KnowledgeGraph,
}

impl<'g> GraphQueryEngine<'g> {
    pub fn new(graph: &'g KnowledgeGraph) -> Self {
        Self { graph }
    }

    /// Run the cascade. Never fails; an empty graph yields no results.
    pub fn search(&self, query: &str, top_k: usize) -> CascadeOutcome {
        if top_k == 0 {
            return CascadeOutcome::default();
        }
        let mut run = CascadeRun {
            graph: self.graph,
            tokens: tokenize(query),
            top_k,
            keywords: Vec::new(),
            candidates: BTreeMap::new(),
            trace: Vec::new(),
        };

        run.exact_match();
        run.partial_match();
        run.event_via_keyword();
        if run.satisfied() {
            run.skip_rest(&[
                CascadeStage::DirectTextMatch,
                CascadeStage::EmotionIntent,
                CascadeStage::CentralityFallback,
            ]);
            return run.into_outcome();
        }
        run.direct_text_match();
        if run.satisfied() {
            run.skip_rest(&[CascadeStage::EmotionIntent, CascadeStage::CentralityFallback]);
            return run.into_outcome();
        }
        run.emotion_intent();
        run.centrality_fallback();
        run.into_outcome()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::{normalize_event, Corpus};
    use crate::graph::builder::GraphBuilder;
    use serde_json::json;

    fn worked_example() -> KnowledgeGraph {
        let mut corpus = Corpus::new("user-1");
        for (id, title, hour, kind, emotion) in [
            ("e1", "Team Meeting", "10", "Work", 2),
            ("e2", "Morning Run", "07", "Health", 5),
            ("e3", "Dinner with Friends", "19", "Social", 4),
        ] {
            corpus.events.push(
                normalize_event(&json!({
                    "id": id,
                    "title": title,
                    "start": format!("2025-02-18T{hour}:00:00+09:00"),
                    "type": kind,
                    "emotion_score": emotion
                }))
                .unwrap(),
            );
        }
        GraphBuilder::default().build(&corpus).0
    }

    fn ids(outcome: &CascadeOutcome) -> Vec<&str> {
        outcome.results.iter().map(|r| r.entity.id.as_str()).collect()
    }

    #[test]
    fn exact_keyword_match_scores_events() {
        let graph = worked_example();
        let outcome = GraphQueryEngine::new(&graph).search("meeting", 1);
        assert_eq!(ids(&outcome), vec!["e1"]);
        assert_eq!(outcome.results[0].matched_keywords, vec!["meeting"]);
        assert_eq!(outcome.results[0].source, ResultSource::Graph);
        assert!(outcome.ran(CascadeStage::ExactMatch));
        assert!(!outcome.ran(CascadeStage::DirectTextMatch));
    }

    #[test]
    fn synonyms_expand_exact_match() {
        let graph = worked_example();
        // "conference" exists only as a synonym node of "meeting"
        let outcome = GraphQueryEngine::new(&graph).search("conference", 3);
        assert_eq!(ids(&outcome)[0], "e1");
    }

    #[test]
    fn partial_match_finds_substrings() {
        let graph = worked_example();
        let outcome = GraphQueryEngine::new(&graph).search("dinners", 3);
        assert!(outcome.ran(CascadeStage::PartialMatch));
        assert_eq!(ids(&outcome)[0], "e3");
    }

    #[test]
    fn emotion_query_prefers_positive_events() {
        let graph = worked_example();
        let outcome = GraphQueryEngine::new(&graph).search("things that felt good", 3);
        assert!(outcome.ran(CascadeStage::EmotionIntent));
        assert!(!outcome.ran(CascadeStage::CentralityFallback));

        let order = ids(&outcome);
        assert_eq!(order, vec!["e2", "e3", "e1"]);

        let run = &outcome.results[0];
        // 0.5 + 2 * 0.3 + ENJOYS(1.0) * 0.3
        assert!((run.score - 1.4).abs() < 1e-9);
        assert_eq!(run.emotion_label.as_deref(), Some("very positive"));
    }

    #[test]
    fn emotion_base_boost_is_symmetric_without_polarity() {
        let graph = worked_example();
        let outcome = GraphQueryEngine::new(&graph).search("how did I feel", 3);
        let score = |id: &str| {
            outcome
                .results
                .iter()
                .find(|r| r.entity.id == id)
                .map(|r| r.score)
                .unwrap()
        };
        assert!((score("e1") - 0.8).abs() < 1e-9);
        assert!((score("e3") - 0.8).abs() < 1e-9);
        assert!((score("e2") - 1.1).abs() < 1e-9);
    }

    #[test]
    fn direct_text_match_adds_lower_weight() {
        let graph = worked_example();
        // "friend" is not a keyword but is contained in "friends"; partial
        // matching already finds it, direct text matching adds 0.8 on top.
        let outcome = GraphQueryEngine::new(&graph).search("friend", 3);
        let dinner = &outcome.results[0];
        assert_eq!(dinner.entity.id, "e3");
        assert!((dinner.score - 1.8).abs() < 1e-9);
    }

    #[test]
    fn unmatched_query_falls_back_to_centrality() {
        let graph = worked_example();
        let outcome = GraphQueryEngine::new(&graph).search("zzz qqq", 2);
        assert!(outcome.ran(CascadeStage::CentralityFallback));
        assert_eq!(outcome.results.len(), 2);
        assert!(outcome
            .results
            .iter()
            .all(|r| r.score > 0.0 && r.score <= FALLBACK_TIER));
    }

    #[test]
    fn empty_graph_returns_nothing() {
        let graph = GraphBuilder::default().build(&Corpus::new("nobody")).0;
        let outcome = GraphQueryEngine::new(&graph).search("anything at all", 5);
        assert!(outcome.results.is_empty());

        let blank = KnowledgeGraph::new();
        assert!(GraphQueryEngine::new(&blank).search("x", 3).results.is_empty());
    }

    #[test]
    fn zero_top_k_is_empty() {
        let graph = worked_example();
        assert!(GraphQueryEngine::new(&graph).search("meeting", 0).results.is_empty());
    }

    #[test]
    fn substring_match_works_both_ways() {
        assert!(substring_match("meeting", "meet"));
        assert!(substring_match("run", "running"));
        assert!(substring_match("요가수업", "요가"));
        assert!(substring_match("회의", "회의준비"));
        assert!(!substring_match("meeting", "run"));
    }

    fn korean_graph() -> KnowledgeGraph {
        let mut corpus = Corpus::new("user-ko");
        for raw in [
            json!({"id": "yoga", "title": "요가수업", "start": "2025-02-10T07:00:00+09:00"}),
            json!({"id": "prep", "title": "회의준비", "start": "2025-02-18T09:00:00+09:00"}),
            json!({"id": "stretch", "title": "Morning Stretch", "start": "2025-02-12T07:00:00+09:00",
                   "location": "요가원 강남"}),
        ] {
            corpus.events.push(normalize_event(&raw).unwrap());
        }
        GraphBuilder::default().build(&corpus).0
    }

    #[test]
    fn two_syllable_token_matches_compound_keyword() {
        let graph = korean_graph();
        let outcome = GraphQueryEngine::new(&graph).search("요가", 2);

        assert!(outcome.ran(CascadeStage::PartialMatch));
        assert!(!outcome.ran(CascadeStage::CentralityFallback));
        assert_eq!(ids(&outcome), vec!["yoga", "stretch"]);
        // keyword edge 1.0 + direct title hit 0.8
        assert!((outcome.results[0].score - 1.8).abs() < 1e-9);
        assert!(outcome.results.iter().all(|r| r.score > FALLBACK_TIER));
    }

    #[test]
    fn two_syllable_token_matches_event_text() {
        let graph = korean_graph();
        let outcome = GraphQueryEngine::new(&graph).search("회의", 3);

        assert_eq!(ids(&outcome)[0], "prep");
        assert!(outcome.results[0].matched_keywords.contains(&"회의준비".to_string()));
        assert!(outcome.results[0].matched_keywords.contains(&"회의".to_string()));

        // "강남" only appears in the extra location text, never as a keyword
        let stretch = GraphQueryEngine::new(&graph).search("강남", 3);
        assert!(stretch.ran(CascadeStage::DirectTextMatch));
        assert_eq!(ids(&stretch), vec!["stretch"]);
        assert!((stretch.results[0].score - DIRECT_TEXT_WEIGHT).abs() < 1e-9);
    }
}
