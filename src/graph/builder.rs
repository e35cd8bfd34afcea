//! Knowledge graph construction.
//!
//! Every entity is turned into one [`GraphPatch`]. A patch that fails
//! validation is dropped as a whole, so the graph stays at its state before
//! that entity, and the failure is recorded in the [`BuildReport`].

use serde::Serialize;
use tracing::{debug, warn};

use super::keywords::{conversation_keywords, event_keywords, SynonymTable};
use super::model::{
    ConversationNode, EdgeKind, EventNode, GraphPatch, KnowledgeGraph, NodeKey, NodeKind,
};
use crate::corpus::{ConversationTurn, Corpus, Event};

pub const HAS_EVENT_WEIGHT: f64 = 1.0;
pub const HAS_KEYWORD_WEIGHT: f64 = 1.0;
pub const HAS_EMOTION_WEIGHT: f64 = 1.0;
pub const ON_DATE_WEIGHT: f64 = 1.0;
pub const HAS_CHAT_WEIGHT: f64 = 1.0;
pub const ABOUT_EVENT_WEIGHT: f64 = 1.5;
pub const MENTIONS_KEYWORD_WEIGHT: f64 = 1.0;
pub const SYNONYM_WEIGHT: f64 = 1.0;
pub const CO_OCCURRENCE_INITIAL: f64 = 1.0;
pub const CO_OCCURRENCE_STEP: f64 = 0.5;

/// Diagnostics of one graph build.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BuildReport {
    pub events: usize,
    pub conversations: usize,
    pub nodes: usize,
    pub edges: usize,
    /// Entities whose patch was rejected, with the reason
    pub failed_steps: Vec<String>,
}

impl BuildReport {
    pub fn is_clean(&self) -> bool {
        self.failed_steps.is_empty()
    }
}

/// Builds a [`KnowledgeGraph`] from a normalized corpus.
#[derive(Debug, Clone, Default)]
pub struct GraphBuilder {
    synonyms: SynonymTable,
}

impl GraphBuilder {
    pub fn new(synonyms: SynonymTable) -> Self {
        Self { synonyms }
    }

    pub fn synonyms(&self) -> &SynonymTable {
        &self.synonyms
    }

    /// Deterministic for a given corpus and synonym table.
    pub fn build(&self, corpus: &Corpus) -> (KnowledgeGraph, BuildReport) {
        let mut graph = KnowledgeGraph::new();
        let mut report = BuildReport::default();
        let user = NodeKey::User(corpus.user_id.clone());

        let mut root = GraphPatch::new();
        root.upsert_node(NodeKind::User {
            id: corpus.user_id.clone(),
        });
        self.commit(&mut graph, root, "user", &mut report);

        for event in &corpus.events {
            let patch = self.event_patch(&user, event);
            if self.commit(&mut graph, patch, &format!("event {}", event.id), &mut report) {
                report.events += 1;
            }
        }

        for turn in &corpus.conversations {
            let target = corpus
                .linked_event(turn)
                .map(|event| NodeKey::Event(event.id.clone()))
                .filter(|key| graph.lookup(key).is_some());
            let patch = self.conversation_patch(&user, turn, target);
            if self.commit(
                &mut graph,
                patch,
                &format!("conversation {}", turn.id),
                &mut report,
            ) {
                report.conversations += 1;
            }
        }

        report.nodes = graph.node_count();
        report.edges = graph.edge_count();
        debug!(
            user_id = %corpus.user_id,
            nodes = report.nodes,
            edges = report.edges,
            failed = report.failed_steps.len(),
            "Knowledge graph built"
        );
        (graph, report)
    }

    fn commit(
        &self,
        graph: &mut KnowledgeGraph,
        patch: GraphPatch,
        step: &str,
        report: &mut BuildReport,
    ) -> bool {
        match graph.apply(patch) {
            Ok(()) => true,
            Err(err) => {
                warn!(step, "Graph patch rejected: {}", err);
                report.failed_steps.push(format!("{step}: {err}"));
                false
            }
        }
    }

    fn event_patch(&self, user: &NodeKey, event: &Event) -> GraphPatch {
        let mut patch = GraphPatch::new();
        let event_key = patch.upsert_node(NodeKind::Event(EventNode::new(event.clone())));
        patch.set_edge(user.clone(), event_key.clone(), EdgeKind::HasEvent, HAS_EVENT_WEIGHT);

        for keyword in event_keywords(event) {
            let keyword_key = patch.upsert_node(NodeKind::Keyword {
                value: keyword.clone(),
            });
            patch.set_edge(
                event_key.clone(),
                keyword_key.clone(),
                EdgeKind::HasKeyword,
                HAS_KEYWORD_WEIGHT,
            );

            for synonym in self.synonyms.related(&keyword) {
                let synonym_key = patch.upsert_node(NodeKind::Keyword {
                    value: synonym.to_string(),
                });
                patch.set_edge(
                    keyword_key.clone(),
                    synonym_key,
                    EdgeKind::IsSynonym,
                    SYNONYM_WEIGHT,
                );
            }
        }

        if let Some(score) = event.emotion {
            let emotion_key = patch.upsert_node(NodeKind::Emotion { score });
            patch.set_edge(
                event_key.clone(),
                emotion_key,
                EdgeKind::HasEmotion,
                HAS_EMOTION_WEIGHT,
            );

            let s = score.value() as f64;
            if score.is_positive() {
                patch.set_edge(user.clone(), event_key.clone(), EdgeKind::Enjoys, s / 5.0);
            } else if score.is_negative() {
                patch.set_edge(
                    user.clone(),
                    event_key.clone(),
                    EdgeKind::Dislikes,
                    (6.0 - s) / 5.0,
                );
            }
        }

        let date_key = patch.upsert_node(NodeKind::Date { date: event.date() });
        patch.set_edge(event_key, date_key, EdgeKind::OnDate, ON_DATE_WEIGHT);
        patch
    }

    fn conversation_patch(
        &self,
        user: &NodeKey,
        turn: &ConversationTurn,
        target: Option<NodeKey>,
    ) -> GraphPatch {
        let keywords = conversation_keywords(turn);
        let mut patch = GraphPatch::new();
        let conversation_key = patch.upsert_node(NodeKind::Conversation(ConversationNode {
            turn: turn.clone(),
            keywords: keywords.clone(),
        }));
        patch.set_edge(
            user.clone(),
            conversation_key.clone(),
            EdgeKind::HasChat,
            HAS_CHAT_WEIGHT,
        );

        if let Some(event_key) = target {
            patch.set_edge(
                conversation_key.clone(),
                event_key,
                EdgeKind::AboutEvent,
                ABOUT_EVENT_WEIGHT,
            );
        }

        for keyword in &keywords {
            let keyword_key = patch.upsert_node(NodeKind::Keyword {
                value: keyword.clone(),
            });
            patch.set_edge(
                conversation_key.clone(),
                keyword_key,
                EdgeKind::MentionsKeyword,
                MENTIONS_KEYWORD_WEIGHT,
            );
        }

        // One undirected co-occurrence edge per pair, stored in canonical order.
        for (i, first) in keywords.iter().enumerate() {
            for second in &keywords[i + 1..] {
                let (a, b) = ordered(first, second);
                patch.bump_edge(
                    NodeKey::Keyword(a.to_string()),
                    NodeKey::Keyword(b.to_string()),
                    EdgeKind::CoOccursWith,
                    CO_OCCURRENCE_INITIAL,
                    CO_OCCURRENCE_STEP,
                );
            }
        }
        patch
    }
}

fn ordered<'a>(a: &'a str, b: &'a str) -> (&'a str, &'a str) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}
