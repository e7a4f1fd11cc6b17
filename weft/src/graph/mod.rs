//! Graph data model and the store capability trait.
//!
//! The graph store is the source of truth for the per-project knowledge base:
//! source-derived entities (files, functions, classes), coordination state
//! (claims), observational memory (episodes, learnings), and append-only
//! rebuild anchors (transactions). Rows are temporal: a live row has
//! `valid_to = None`, and superseding a row closes the previous one instead of
//! overwriting it.
//!
//! Production deployments plug in a real driver; [`MemoryGraphStore`] is the
//! in-process implementation used by tests and store-less deployments.

mod memory;
pub mod resolve;
pub mod temporal;

pub use memory::MemoryGraphStore;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Current wall-clock time as epoch milliseconds, the timestamp unit used
/// throughout the graph model.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Node kinds stored in the graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeType {
    File,
    Function,
    Class,
    Import,
    Community,
    Episode,
    Claim,
    GraphTx,
    Learning,
    Task,
    Feature,
}

impl NodeType {
    /// Parses the wire form (`"FILE"`, `"FUNCTION"`, ...).
    pub fn parse(s: &str) -> Option<NodeType> {
        serde_json::from_value(Value::String(s.to_string())).ok()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::File => "FILE",
            NodeType::Function => "FUNCTION",
            NodeType::Class => "CLASS",
            NodeType::Import => "IMPORT",
            NodeType::Community => "COMMUNITY",
            NodeType::Episode => "EPISODE",
            NodeType::Claim => "CLAIM",
            NodeType::GraphTx => "GRAPH_TX",
            NodeType::Learning => "LEARNING",
            NodeType::Task => "TASK",
            NodeType::Feature => "FEATURE",
        }
    }
}

/// Relationship kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelType {
    Contains,
    Imports,
    References,
    Calls,
    Tests,
    ImplementedBy,
    Targets,
    Involves,
    AppliesTo,
}

/// A temporal graph node. At most one live row (`valid_to == None`) exists per
/// `(project_id, id)`; superseded rows keep their history with `valid_to` set.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphNode {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    pub project_id: String,
    pub valid_from: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_to: Option<i64>,
    #[serde(default)]
    pub properties: BTreeMap<String, Value>,
}

impl GraphNode {
    pub fn new(id: impl Into<String>, node_type: NodeType, project_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type,
            project_id: project_id.into(),
            valid_from: now_ms(),
            valid_to: None,
            properties: BTreeMap::new(),
        }
    }

    pub fn with_property(mut self, key: &str, value: Value) -> Self {
        self.properties.insert(key.to_string(), value);
        self
    }

    pub fn is_live(&self) -> bool {
        self.valid_to.is_none()
    }

    /// String property accessor; absent or non-string yields None.
    pub fn prop_str(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(|v| v.as_str())
    }

    /// Display name: `name` property, falling back to `path`, then the id.
    pub fn display_name(&self) -> &str {
        self.prop_str("name")
            .or_else(|| self.prop_str("path"))
            .unwrap_or(&self.id)
    }
}

/// A directed relationship between two nodes.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphRelationship {
    pub id: String,
    pub from: String,
    pub to: String,
    #[serde(rename = "type")]
    pub rel_type: RelType,
    pub project_id: String,
    #[serde(default)]
    pub properties: BTreeMap<String, Value>,
}

impl GraphRelationship {
    pub fn new(
        from: impl Into<String>,
        to: impl Into<String>,
        rel_type: RelType,
        project_id: impl Into<String>,
    ) -> Self {
        let from = from.into();
        let to = to.into();
        Self {
            id: format!("rel-{}", uuid::Uuid::new_v4().simple()),
            from,
            to,
            rel_type,
            project_id: project_id.into(),
            properties: BTreeMap::new(),
        }
    }
}

/// Rebuild flavor, recorded on every transaction anchor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RebuildKind {
    FullRebuild,
    IncrementalRebuild,
}

impl RebuildKind {
    /// Short mode string (`"full"` / `"incremental"`), used on the wire and
    /// in health reporting.
    pub fn mode(&self) -> &'static str {
        match self {
            RebuildKind::FullRebuild => "full",
            RebuildKind::IncrementalRebuild => "incremental",
        }
    }
}

/// Append-only rebuild anchor. Totally ordered per project by `timestamp`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphTx {
    pub id: String,
    pub project_id: String,
    #[serde(rename = "type")]
    pub tx_type: RebuildKind,
    pub mode: String,
    pub timestamp: i64,
    pub source_dir: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_commit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
}

/// What an exclusive claim reserves.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClaimType {
    Task,
    File,
    Symbol,
}

/// Exclusive, time-bounded reservation by an agent on a target artifact.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claim {
    pub id: String,
    pub project_id: String,
    pub agent_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub target_id: String,
    pub claim_type: ClaimType,
    pub intent: String,
    pub valid_from: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_to: Option<i64>,
}

impl Claim {
    pub fn is_live(&self) -> bool {
        self.valid_to.is_none()
    }
}

/// Result of an atomic claim attempt. On conflict nothing is persisted.
#[derive(Clone, Debug)]
pub enum ClaimOutcome {
    Created,
    Conflict(Vec<Claim>),
}

/// Episode kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EpisodeType {
    Observation,
    Decision,
    Edit,
    TestResult,
    Error,
    Reflection,
}

impl EpisodeType {
    pub fn parse(s: &str) -> Option<EpisodeType> {
        serde_json::from_value(Value::String(s.to_string())).ok()
    }
}

/// Outcome attached to DECISION / TEST_RESULT episodes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Failure,
    Partial,
}

impl Outcome {
    pub fn parse(s: &str) -> Option<Outcome> {
        serde_json::from_value(Value::String(s.to_string())).ok()
    }
}

/// A typed, timestamped record of agent activity.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Episode {
    pub id: String,
    pub project_id: String,
    #[serde(rename = "type")]
    pub episode_type: EpisodeType,
    pub content: String,
    #[serde(default)]
    pub entities: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Outcome>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
    #[serde(default)]
    pub sensitive: bool,
    pub agent_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub timestamp: i64,
}

/// Filter for episode recall. Empty fields do not constrain.
#[derive(Clone, Debug, Default)]
pub struct EpisodeFilter {
    pub agent_id: Option<String>,
    pub task_id: Option<String>,
    pub types: Vec<EpisodeType>,
    pub entities: Vec<String>,
    pub since: Option<i64>,
}

impl EpisodeFilter {
    pub fn matches(&self, ep: &Episode) -> bool {
        if let Some(agent) = &self.agent_id {
            if &ep.agent_id != agent {
                return false;
            }
        }
        if let Some(task) = &self.task_id {
            if ep.task_id.as_deref() != Some(task.as_str()) {
                return false;
            }
        }
        if !self.types.is_empty() && !self.types.contains(&ep.episode_type) {
            return false;
        }
        if !self.entities.is_empty() && !self.entities.iter().any(|e| ep.entities.contains(e)) {
            return false;
        }
        if let Some(since) = self.since {
            if ep.timestamp < since {
                return false;
            }
        }
        true
    }
}

/// A distilled lesson produced by reflection, attached to graph nodes via
/// APPLIES_TO.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Learning {
    pub id: String,
    pub project_id: String,
    pub content: String,
    pub confidence: f64,
    pub applies_to: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_reflection: Option<String>,
    pub timestamp: i64,
}

/// Store-level aggregate counts used by health reporting.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphCounts {
    pub nodes: usize,
    pub relationships: usize,
    pub files: usize,
    pub functions: usize,
    pub classes: usize,
}

/// Property a since-anchor lookup matches a transaction by.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TxAnchorField {
    Id,
    GitCommit,
    AgentId,
}

/// Errors surfaced by graph store implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("backend error: {0}")]
    Backend(String),
    #[error("unsupported operation: {0}")]
    Unsupported(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("embedding error: {0}")]
    Embedding(String),
}

/// Capability interface of the graph store driver.
///
/// Implementations must keep the single-live-row invariant per
/// `(project_id, id)` and make [`GraphStore::try_claim`] atomic per
/// `(project_id, target_id)`.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Inserts a node, closing any live row with the same id first.
    async fn upsert_node(&self, node: GraphNode) -> Result<(), StoreError>;

    /// Closes the live row for `id`, if one exists. Returns whether a row
    /// was closed.
    async fn close_node(&self, project_id: &str, id: &str, at: i64) -> Result<bool, StoreError>;

    /// Live row for `id`, if any.
    async fn live_node(&self, project_id: &str, id: &str) -> Result<Option<GraphNode>, StoreError>;

    /// All live rows of the given types (all types when empty).
    async fn live_nodes(
        &self,
        project_id: &str,
        types: &[NodeType],
    ) -> Result<Vec<GraphNode>, StoreError>;

    async fn upsert_relationship(&self, rel: GraphRelationship) -> Result<(), StoreError>;

    /// Relationships of one type, optionally constrained by endpoint.
    async fn relationships(
        &self,
        project_id: &str,
        rel_type: RelType,
        from: Option<&str>,
        to: Option<&str>,
    ) -> Result<Vec<GraphRelationship>, StoreError>;

    /// Appends a rebuild anchor. Append-only.
    async fn append_tx(&self, tx: GraphTx) -> Result<(), StoreError>;

    /// Transactions with `timestamp >= since`, oldest first.
    async fn txs_since(&self, project_id: &str, since: i64) -> Result<Vec<GraphTx>, StoreError>;

    /// First transaction whose `field` equals `value`.
    async fn find_tx(
        &self,
        project_id: &str,
        field: TxAnchorField,
        value: &str,
    ) -> Result<Option<GraphTx>, StoreError>;

    /// Rows with `valid_from >= since`, newest first, capped at `limit`.
    async fn added_since(
        &self,
        project_id: &str,
        since: i64,
        types: &[NodeType],
        limit: usize,
    ) -> Result<Vec<GraphNode>, StoreError>;

    /// Rows with `valid_to >= since`, newest first, capped at `limit`.
    async fn removed_since(
        &self,
        project_id: &str,
        since: i64,
        types: &[NodeType],
        limit: usize,
    ) -> Result<Vec<GraphNode>, StoreError>;

    /// Live COMMUNITY rows whose summary contains `keyword` or whose label is
    /// in `labels`, ordered by member count descending.
    async fn communities(
        &self,
        project_id: &str,
        keyword: Option<&str>,
        labels: &[String],
        limit: usize,
    ) -> Result<Vec<GraphNode>, StoreError>;

    /// Top live COMMUNITY rows by member count.
    async fn top_communities(
        &self,
        project_id: &str,
        limit: usize,
    ) -> Result<Vec<GraphNode>, StoreError>;

    async fn counts(&self, project_id: &str) -> Result<GraphCounts, StoreError>;

    /// Pass-through query in the driver's query language. In-process stores
    /// report [`StoreError::Unsupported`].
    async fn raw_query(&self, query: &str, params: Value) -> Result<Vec<Value>, StoreError>;

    /// Ensures the store-side lexical (BM25) index over symbol names exists.
    async fn ensure_lexical_index(&self, project_id: &str) -> Result<(), StoreError>;

    /// Atomically creates `claim` unless another agent holds a live claim on
    /// the same target. On conflict nothing is written.
    async fn try_claim(&self, claim: Claim) -> Result<ClaimOutcome, StoreError>;

    /// Live claims for a project, optionally narrowed to one target.
    async fn live_claims(
        &self,
        project_id: &str,
        target_id: Option<&str>,
    ) -> Result<Vec<Claim>, StoreError>;

    /// All claims held by one agent (live only).
    async fn claims_by_agent(
        &self,
        project_id: &str,
        agent_id: &str,
    ) -> Result<Vec<Claim>, StoreError>;

    /// Closes a claim (`valid_to = at`). Returns whether a live claim was
    /// closed.
    async fn close_claim(
        &self,
        project_id: &str,
        claim_id: &str,
        at: i64,
    ) -> Result<bool, StoreError>;

    async fn put_episode(&self, episode: Episode) -> Result<(), StoreError>;

    /// Episodes matching `filter`, newest first.
    async fn episodes(
        &self,
        project_id: &str,
        filter: &EpisodeFilter,
    ) -> Result<Vec<Episode>, StoreError>;

    async fn put_learning(&self, learning: Learning) -> Result<(), StoreError>;

    /// Learnings whose `applies_to` intersects `node_ids`, by confidence
    /// descending.
    async fn learnings_for(
        &self,
        project_id: &str,
        node_ids: &[String],
        limit: usize,
    ) -> Result<Vec<Learning>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Node and episode type wire forms round-trip through serde.
    #[test]
    fn type_wire_forms() {
        assert_eq!(NodeType::parse("GRAPH_TX"), Some(NodeType::GraphTx));
        assert_eq!(NodeType::GraphTx.as_str(), "GRAPH_TX");
        assert_eq!(EpisodeType::parse("TEST_RESULT"), Some(EpisodeType::TestResult));
        assert_eq!(Outcome::parse("partial"), Some(Outcome::Partial));
        assert!(NodeType::parse("NOPE").is_none());
    }

    /// Rebuild kinds expose their short mode strings.
    #[test]
    fn rebuild_kind_modes() {
        assert_eq!(RebuildKind::FullRebuild.mode(), "full");
        assert_eq!(RebuildKind::IncrementalRebuild.mode(), "incremental");
    }

    /// Episode filters constrain only on populated fields.
    #[test]
    fn episode_filter_matching() {
        let ep = Episode {
            id: "e1".into(),
            project_id: "p".into(),
            episode_type: EpisodeType::Edit,
            content: "edited".into(),
            entities: vec!["fn:a".into()],
            task_id: Some("t1".into()),
            outcome: None,
            metadata: BTreeMap::new(),
            sensitive: false,
            agent_id: "a1".into(),
            session_id: None,
            timestamp: 100,
        };
        assert!(EpisodeFilter::default().matches(&ep));
        assert!(EpisodeFilter {
            agent_id: Some("a1".into()),
            types: vec![EpisodeType::Edit],
            entities: vec!["fn:a".into()],
            since: Some(50),
            ..Default::default()
        }
        .matches(&ep));
        assert!(!EpisodeFilter {
            since: Some(200),
            ..Default::default()
        }
        .matches(&ep));
        assert!(!EpisodeFilter {
            agent_id: Some("a2".into()),
            ..Default::default()
        }
        .matches(&ep));
    }
}
