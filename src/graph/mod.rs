//! Knowledge graph path: typed graph, builder, cascade query engine and insights.

pub mod builder;
pub mod cascade;
pub mod insights;
pub mod keywords;
pub mod model;

pub use builder::{BuildReport, GraphBuilder};
pub use cascade::{CascadeOutcome, CascadeStage, GraphQueryEngine, StageRecord, StageStatus};
pub use insights::GraphInsights;
pub use keywords::SynonymTable;
pub use model::{
    Edge, EdgeKind, EventNode, GraphPatch, GraphStats, KnowledgeGraph, NodeId, NodeKey, NodeKind,
};
