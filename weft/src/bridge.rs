//! The bridge: every external collaborator behind an explicit capability
//! interface, so tool handlers are testable with in-memory fakes.
//!
//! Stores and engines are optional; handlers answer `*_UNAVAILABLE` when a
//! capability is absent instead of failing at construction time.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::coordination::CoordinationEngine;
use crate::embedding::EmbeddingManager;
use crate::episode::EpisodeEngine;
use crate::graph::{GraphStore, RebuildKind};
use crate::rebuild::RebuildOrchestrator;
use crate::session::SessionManager;
use env_config::Policy;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine unavailable: {0}")]
    Unavailable(String),
    #[error("engine failed: {0}")]
    Failed(String),
}

/// Request handed to the external build engine.
#[derive(Clone, Debug)]
pub struct BuildRequest {
    pub project_id: String,
    pub workspace_root: PathBuf,
    pub source_dir: PathBuf,
    pub kind: RebuildKind,
    /// Empty for full rebuilds.
    pub changed_files: Vec<String>,
    /// Directory components the engine must skip.
    pub exclude: Vec<String>,
}

/// What a build produced, for logging and health.
#[derive(Clone, Copy, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildOutcome {
    pub nodes_built: usize,
    pub relationships_built: usize,
}

/// External engine that derives graph nodes from a source tree.
#[async_trait]
pub trait BuildEngine: Send + Sync {
    async fn build(&self, request: BuildRequest) -> Result<BuildOutcome, EngineError>;

    /// Recomputes COMMUNITY nodes for the project. Returns how many exist.
    async fn detect_communities(&self, project_id: &str) -> Result<usize, EngineError>;
}

/// External local retrieval over vectors + lexical index.
#[async_trait]
pub trait HybridRetriever: Send + Sync {
    /// Rows are retriever-shaped JSON; temporal filtering happens on top.
    async fn retrieve(
        &self,
        project_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<Value>, EngineError>;
}

/// One PPR-ranked node.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RankedNode {
    pub id: String,
    pub score: f64,
}

/// External personalized-PageRank routine.
#[async_trait]
pub trait PprEngine: Send + Sync {
    async fn personalized_pagerank(
        &self,
        project_id: &str,
        seed_ids: &[String],
        max_results: usize,
    ) -> Result<Vec<RankedNode>, EngineError>;
}

/// External test-selection engine.
#[async_trait]
pub trait TestEngine: Send + Sync {
    async fn select_tests(&self, project_id: &str, files: &[String]) -> Result<Value, EngineError>;
    async fn categorize_tests(&self, project_id: &str) -> Result<Value, EngineError>;
    async fn run_tests(&self, project_id: &str, selector: Value) -> Result<Value, EngineError>;
    async fn suggest_tests(&self, project_id: &str, target: &str) -> Result<Value, EngineError>;
}

/// External architecture-validation engine.
#[async_trait]
pub trait ArchEngine: Send + Sync {
    async fn validate(&self, project_id: &str) -> Result<Value, EngineError>;
    async fn suggest(&self, project_id: &str) -> Result<Value, EngineError>;
}

/// External documentation indexer/search.
#[async_trait]
pub trait DocsEngine: Send + Sync {
    async fn index(&self, project_id: &str, paths: &[String]) -> Result<usize, EngineError>;
    async fn search(
        &self,
        project_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<Value>, EngineError>;
}

/// External reference-repo scanner.
#[async_trait]
pub trait RefScanner: Send + Sync {
    async fn known_repos(&self) -> Result<Vec<String>, EngineError>;
    async fn query(&self, repo: &str, query: &str) -> Result<Value, EngineError>;
}

/// External summarizer endpoint (optional; reflection falls back to
/// truncation when absent).
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, text: &str) -> Result<String, EngineError>;
}

/// Everything a tool handler may touch. Constructed once at startup and
/// shared as `Arc<Bridge>`.
pub struct Bridge {
    pub graph: Option<Arc<dyn GraphStore>>,
    pub embeddings: Arc<EmbeddingManager>,
    pub builder: Option<Arc<dyn BuildEngine>>,
    pub retriever: Option<Arc<dyn HybridRetriever>>,
    pub ppr: Option<Arc<dyn PprEngine>>,
    pub tests: Option<Arc<dyn TestEngine>>,
    pub arch: Option<Arc<dyn ArchEngine>>,
    pub docs: Option<Arc<dyn DocsEngine>>,
    pub refs: Option<Arc<dyn RefScanner>>,
    pub summarizer: Option<Arc<dyn Summarizer>>,
    pub sessions: Arc<SessionManager>,
    pub rebuilds: Arc<RebuildOrchestrator>,
    pub coordination: Arc<CoordinationEngine>,
    pub episodes: Arc<EpisodeEngine>,
    pub policy: Policy,
}

impl Bridge {
    /// The graph store, when connected.
    pub fn graph(&self) -> Option<Arc<dyn GraphStore>> {
        self.graph.clone()
    }
}
