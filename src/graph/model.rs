//! Typed knowledge graph.
//!
//! Nodes are tagged variants with their own payloads and are unique per
//! [`NodeKey`]. Edges are unique per `(from, to, kind)` and carry a positive,
//! finite weight. All mutation goes through [`GraphPatch`], which is validated
//! as a whole before any of it is applied.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use chrono::NaiveDate;
use serde::Serialize;

use crate::corpus::{ConversationTurn, EmotionScore, Event};
use crate::error::{Error, Result};

/// Dense node handle, valid for the graph that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct NodeId(pub usize);

/// Natural identity of a node: (type, natural key).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum NodeKey {
    User(String),
    Event(String),
    Keyword(String),
    Emotion(u8),
    Date(NaiveDate),
    Conversation(String),
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKey::User(id) => write!(f, "user:{id}"),
            NodeKey::Event(id) => write!(f, "event:{id}"),
            NodeKey::Keyword(value) => write!(f, "keyword:{value}"),
            NodeKey::Emotion(score) => write!(f, "emotion:{score}"),
            NodeKey::Date(date) => write!(f, "date:{date}"),
            NodeKey::Conversation(id) => write!(f, "conversation:{id}"),
        }
    }
}

/// Event payload: the normalized event plus its precomputed search text.
#[derive(Debug, Clone, PartialEq)]
pub struct EventNode {
    pub event: Event,
    /// Lowercased title, type and other string fields
    pub search_text: String,
}

impl EventNode {
    pub fn new(event: Event) -> Self {
        let mut parts = vec![event.title.clone(), event.event_type.clone()];
        parts.extend(event.extra.values().cloned());
        let search_text = parts.join(" ").to_lowercase();
        Self { event, search_text }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConversationNode {
    pub turn: ConversationTurn,
    /// Keywords mentioned by this turn, in extraction order
    pub keywords: Vec<String>,
}

/// Graph vertex with a typed payload per variant.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    User { id: String },
    Event(EventNode),
    Keyword { value: String },
    Emotion { score: EmotionScore },
    Date { date: NaiveDate },
    Conversation(ConversationNode),
}

impl NodeKind {
    pub fn key(&self) -> NodeKey {
        match self {
            NodeKind::User { id } => NodeKey::User(id.clone()),
            NodeKind::Event(node) => NodeKey::Event(node.event.id.clone()),
            NodeKind::Keyword { value } => NodeKey::Keyword(value.clone()),
            NodeKind::Emotion { score } => NodeKey::Emotion(score.value()),
            NodeKind::Date { date } => NodeKey::Date(*date),
            NodeKind::Conversation(node) => NodeKey::Conversation(node.turn.id.clone()),
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            NodeKind::User { .. } => "user",
            NodeKind::Event(_) => "event",
            NodeKind::Keyword { .. } => "keyword",
            NodeKind::Emotion { .. } => "emotion",
            NodeKind::Date { .. } => "date",
            NodeKind::Conversation(_) => "conversation",
        }
    }

    pub fn as_event(&self) -> Option<&EventNode> {
        match self {
            NodeKind::Event(node) => Some(node),
            _ => None,
        }
    }

    pub fn as_keyword(&self) -> Option<&str> {
        match self {
            NodeKind::Keyword { value } => Some(value),
            _ => None,
        }
    }

    pub fn as_emotion(&self) -> Option<EmotionScore> {
        match self {
            NodeKind::Emotion { score } => Some(*score),
            _ => None,
        }
    }
}

/// Typed relation between two nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum EdgeKind {
    /// User -> Event
    HasEvent,
    /// Event -> Keyword
    HasKeyword,
    /// Event -> Emotion
    HasEmotion,
    /// Event -> Date
    OnDate,
    /// User -> Conversation
    HasChat,
    /// Conversation -> Event
    AboutEvent,
    /// Conversation -> Keyword
    MentionsKeyword,
    /// Keyword -> Keyword
    CoOccursWith,
    /// User -> Event
    Enjoys,
    /// User -> Event
    Dislikes,
    /// Keyword -> Keyword
    IsSynonym,
}

impl EdgeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeKind::HasEvent => "HAS_EVENT",
            EdgeKind::HasKeyword => "HAS_KEYWORD",
            EdgeKind::HasEmotion => "HAS_EMOTION",
            EdgeKind::OnDate => "ON_DATE",
            EdgeKind::HasChat => "HAS_CHAT",
            EdgeKind::AboutEvent => "ABOUT_EVENT",
            EdgeKind::MentionsKeyword => "MENTIONS_KEYWORD",
            EdgeKind::CoOccursWith => "CO_OCCURS_WITH",
            EdgeKind::Enjoys => "ENJOYS",
            EdgeKind::Dislikes => "DISLIKES",
            EdgeKind::IsSynonym => "IS_SYNONYM",
        }
    }
}

impl fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Edge {
    pub from: NodeId,
    pub to: NodeId,
    pub kind: EdgeKind,
    pub weight: f64,
}

/// One buffered graph mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum PatchOp {
    /// Insert the node, or replace the payload of the node with the same key.
    UpsertNode(NodeKind),
    /// Create the edge or overwrite its weight.
    SetEdge {
        from: NodeKey,
        to: NodeKey,
        kind: EdgeKind,
        weight: f64,
    },
    /// Create the edge with `initial`, or add `step` to its current weight.
    BumpEdge {
        from: NodeKey,
        to: NodeKey,
        kind: EdgeKind,
        initial: f64,
        step: f64,
    },
}

/// All-or-nothing batch of graph mutations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GraphPatch {
    ops: Vec<PatchOp>,
}

impl GraphPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert_node(&mut self, node: NodeKind) -> NodeKey {
        let key = node.key();
        self.ops.push(PatchOp::UpsertNode(node));
        key
    }

    pub fn set_edge(&mut self, from: NodeKey, to: NodeKey, kind: EdgeKind, weight: f64) {
        self.ops.push(PatchOp::SetEdge {
            from,
            to,
            kind,
            weight,
        });
    }

    pub fn bump_edge(&mut self, from: NodeKey, to: NodeKey, kind: EdgeKind, initial: f64, step: f64) {
        self.ops.push(PatchOp::BumpEdge {
            from,
            to,
            kind,
            initial,
            step,
        });
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Node/edge counts, in total and per kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GraphStats {
    pub nodes: usize,
    pub edges: usize,
    pub nodes_by_kind: BTreeMap<&'static str, usize>,
    pub edges_by_kind: BTreeMap<&'static str, usize>,
}

/// Directed multi-relation graph owned by a single retrieval session.
#[derive(Debug, Clone, Default)]
pub struct KnowledgeGraph {
    nodes: Vec<NodeKind>,
    index: HashMap<NodeKey, NodeId>,
    edges: Vec<Edge>,
    edge_index: HashMap<(NodeId, NodeId, EdgeKind), usize>,
    outgoing: Vec<Vec<usize>>,
    incoming: Vec<Vec<usize>>,
}

impl KnowledgeGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> Option<&NodeKind> {
        self.nodes.get(id.0)
    }

    pub fn lookup(&self, key: &NodeKey) -> Option<NodeId> {
        self.index.get(key).copied()
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &NodeKind)> {
        self.nodes.iter().enumerate().map(|(i, n)| (NodeId(i), n))
    }

    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.iter()
    }

    pub fn edge(&self, from: NodeId, to: NodeId, kind: EdgeKind) -> Option<&Edge> {
        self.edge_index
            .get(&(from, to, kind))
            .map(|&idx| &self.edges[idx])
    }

    /// Look an edge up by node keys.
    pub fn edge_between(&self, from: &NodeKey, to: &NodeKey, kind: EdgeKind) -> Option<&Edge> {
        self.edge(self.lookup(from)?, self.lookup(to)?, kind)
    }

    pub fn outgoing(&self, id: NodeId) -> impl Iterator<Item = &Edge> {
        self.outgoing
            .get(id.0)
            .into_iter()
            .flatten()
            .map(|&idx| &self.edges[idx])
    }

    pub fn incoming(&self, id: NodeId) -> impl Iterator<Item = &Edge> {
        self.incoming
            .get(id.0)
            .into_iter()
            .flatten()
            .map(|&idx| &self.edges[idx])
    }

    pub fn degree(&self, id: NodeId) -> usize {
        self.outgoing.get(id.0).map_or(0, Vec::len) + self.incoming.get(id.0).map_or(0, Vec::len)
    }

    pub fn event_nodes(&self) -> impl Iterator<Item = (NodeId, &EventNode)> {
        self.nodes()
            .filter_map(|(id, node)| node.as_event().map(|event| (id, event)))
    }

    pub fn keyword_nodes(&self) -> impl Iterator<Item = (NodeId, &str)> {
        self.nodes()
            .filter_map(|(id, node)| node.as_keyword().map(|value| (id, value)))
    }

    pub fn stats(&self) -> GraphStats {
        let mut stats = GraphStats {
            nodes: self.node_count(),
            edges: self.edge_count(),
            ..Default::default()
        };
        for node in &self.nodes {
            *stats.nodes_by_kind.entry(node.kind_name()).or_default() += 1;
        }
        for edge in &self.edges {
            *stats.edges_by_kind.entry(edge.kind.as_str()).or_default() += 1;
        }
        stats
    }

    /// Validate and apply a patch. On error the graph is left untouched.
    pub fn apply(&mut self, patch: GraphPatch) -> Result<()> {
        self.validate(&patch)?;

        for op in patch.ops {
            match op {
                PatchOp::UpsertNode(node) => {
                    self.upsert_node(node);
                }
                PatchOp::SetEdge {
                    from,
                    to,
                    kind,
                    weight,
                } => {
                    let (from, to) = self.resolve_pair(&from, &to)?;
                    match self.edge_index.get(&(from, to, kind)) {
                        Some(&idx) => self.edges[idx].weight = weight,
                        None => self.push_edge(from, to, kind, weight),
                    }
                }
                PatchOp::BumpEdge {
                    from,
                    to,
                    kind,
                    initial,
                    step,
                } => {
                    let (from, to) = self.resolve_pair(&from, &to)?;
                    match self.edge_index.get(&(from, to, kind)) {
                        Some(&idx) => self.edges[idx].weight += step,
                        None => self.push_edge(from, to, kind, initial),
                    }
                }
            }
        }
        Ok(())
    }

    fn validate(&self, patch: &GraphPatch) -> Result<()> {
        let mut pending: HashSet<NodeKey> = HashSet::new();
        let known = |key: &NodeKey, pending: &HashSet<NodeKey>| {
            self.index.contains_key(key) || pending.contains(key)
        };

        for op in &patch.ops {
            match op {
                PatchOp::UpsertNode(node) => {
                    pending.insert(node.key());
                }
                PatchOp::SetEdge {
                    from,
                    to,
                    kind,
                    weight,
                } => {
                    check_edge(from, to, *kind, &[*weight])?;
                    for key in [from, to] {
                        if !known(key, &pending) {
                            return Err(missing_endpoint(key, *kind));
                        }
                    }
                }
                PatchOp::BumpEdge {
                    from,
                    to,
                    kind,
                    initial,
                    step,
                } => {
                    check_edge(from, to, *kind, &[*initial, *step])?;
                    for key in [from, to] {
                        if !known(key, &pending) {
                            return Err(missing_endpoint(key, *kind));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn upsert_node(&mut self, node: NodeKind) -> NodeId {
        let key = node.key();
        if let Some(&id) = self.index.get(&key) {
            self.nodes[id.0] = node;
            return id;
        }
        let id = NodeId(self.nodes.len());
        self.nodes.push(node);
        self.outgoing.push(Vec::new());
        self.incoming.push(Vec::new());
        self.index.insert(key, id);
        id
    }

    fn resolve_pair(&self, from: &NodeKey, to: &NodeKey) -> Result<(NodeId, NodeId)> {
        let resolve = |key: &NodeKey| {
            self.lookup(key)
                .ok_or_else(|| Error::GraphConstruction(format!("unknown node {key}")))
        };
        Ok((resolve(from)?, resolve(to)?))
    }

    fn push_edge(&mut self, from: NodeId, to: NodeId, kind: EdgeKind, weight: f64) {
        let idx = self.edges.len();
        self.edges.push(Edge {
            from,
            to,
            kind,
            weight,
        });
        self.edge_index.insert((from, to, kind), idx);
        self.outgoing[from.0].push(idx);
        self.incoming[to.0].push(idx);
    }

    /// Weighted PageRank over the whole graph. Mass of nodes without outgoing
    /// edges is spread uniformly. Returns one score per node, summing to 1.
    pub fn pagerank(&self, damping: f64, max_iterations: usize) -> Vec<f64> {
        let n = self.nodes.len();
        if n == 0 {
            return Vec::new();
        }
        let uniform = 1.0 / n as f64;
        let out_weight: Vec<f64> = (0..n)
            .map(|i| self.outgoing[i].iter().map(|&e| self.edges[e].weight).sum())
            .collect();

        let mut rank = vec![uniform; n];
        for _ in 0..max_iterations {
            let dangling: f64 = (0..n)
                .filter(|&i| out_weight[i] <= 0.0)
                .map(|i| rank[i])
                .sum();
            let base = (1.0 - damping) * uniform + damping * dangling * uniform;
            let mut next = vec![base; n];
            for edge in &self.edges {
                let from = edge.from.0;
                next[edge.to.0] += damping * rank[from] * edge.weight / out_weight[from];
            }

            let delta: f64 = next.iter().zip(&rank).map(|(a, b)| (a - b).abs()).sum();
            rank = next;
            if delta < 1e-10 {
                break;
            }
        }
        rank
    }
}

fn check_edge(from: &NodeKey, to: &NodeKey, kind: EdgeKind, weights: &[f64]) -> Result<()> {
    if from == to {
        return Err(Error::GraphConstruction(format!(
            "self-loop {kind} on {from}"
        )));
    }
    if let Some(bad) = weights.iter().find(|w| !w.is_finite() || **w <= 0.0) {
        return Err(Error::GraphConstruction(format!(
            "invalid weight {bad} for {kind} {from} -> {to}"
        )));
    }
    Ok(())
}

fn missing_endpoint(key: &NodeKey, kind: EdgeKind) -> Error {
    Error::GraphConstruction(format!("{kind} edge references unknown node {key}"))
}
