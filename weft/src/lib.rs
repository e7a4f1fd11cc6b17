//! # Weft
//!
//! A multi-tenant code-intelligence tool server core. Agents call a fixed
//! catalog of tools over a session-oriented dispatch pipeline; each tool
//! reads or mutates a per-project knowledge base spanning a graph store, a
//! vector store, and a persisted log of episodes and claims.
//!
//! ## Main modules
//!
//! - [`dispatch`]: [`Dispatcher`], [`Tool`], [`ToolRegistry`], the alias
//!   catalog ([`dispatch::normalize`]).
//! - [`envelope`]: the uniform success/error wire envelope and error codes.
//! - [`graph`]: data model, [`GraphStore`] capability trait,
//!   [`MemoryGraphStore`], temporal rewriting and since-anchors, element
//!   resolution.
//! - [`embedding`]: [`Embedder`], [`VectorStore`], readiness management.
//! - [`session`]: per-session project bindings.
//! - [`watcher`]: debounced per-session filesystem watching.
//! - [`rebuild`]: background rebuild orchestration and the error ledger.
//! - [`coordination`]: the claim protocol.
//! - [`episode`]: episode memory and reflection.
//! - [`retrieval`]: natural-language query routing.
//! - [`context_pack`]: budgeted context assembly.
//! - [`health`], [`diff`]: reporting.
//! - [`tools`]: the catalog handlers; [`bridge`]: the capability seam they
//!   run against.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use weft::{Weft, WeftBuilder};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let weft: Weft = WeftBuilder::new(env_config::Policy::default()).build();
//! let envelope = weft
//!     .call_tool(Some("session-1"), "tools_list", serde_json::json!({}))
//!     .await
//!     .expect("dispatch");
//! println!("{}", envelope.to_wire());
//! # }
//! ```

pub mod bridge;
pub mod context_pack;
pub mod coordination;
pub mod diff;
pub mod dispatch;
pub mod embedding;
pub mod envelope;
pub mod episode;
pub mod graph;
pub mod health;
pub mod rebuild;
pub mod retrieval;
pub mod session;
pub mod tools;
pub mod watcher;

use std::sync::Arc;

pub use bridge::Bridge;
pub use dispatch::{Dispatcher, Tool, ToolError, ToolRegistry};
pub use envelope::{codes, Envelope};
pub use graph::{GraphStore, MemoryGraphStore};
pub use session::{ProjectContext, SessionManager};

use bridge::{
    ArchEngine, BuildEngine, DocsEngine, HybridRetriever, PprEngine, RefScanner, Summarizer,
    TestEngine,
};
use embedding::{Embedder, EmbeddingManager, HashEmbedder, HttpEmbedder, MemoryVectorStore, VectorStore};
use env_config::Policy;

const HTTP_EMBEDDER_MODEL: &str = "weft-embed";
const HTTP_EMBEDDER_DIMENSION: usize = 384;

/// One assembled server: the bridge plus its dispatcher.
pub struct Weft {
    pub bridge: Arc<Bridge>,
    pub dispatcher: Arc<Dispatcher>,
}

impl Weft {
    /// Dispatches one tool call under a logical session.
    pub async fn call_tool(
        &self,
        session_id: Option<&str>,
        tool_name: &str,
        args: serde_json::Value,
    ) -> Result<Envelope, ToolError> {
        self.dispatcher.call_tool(session_id, tool_name, args).await
    }

    /// Tears down one session: watcher stopped, binding removed.
    pub fn cleanup_session(&self, session_id: &str) {
        self.bridge.sessions.cleanup_session(session_id);
    }

    /// Tears down every session (process shutdown).
    pub fn cleanup_all(&self) {
        self.bridge.sessions.cleanup_all();
    }
}

/// Assembles a [`Weft`] from a policy and optional external collaborators.
///
/// Anything not provided falls back to the in-process implementation (memory
/// graph/vector stores, hash embedder) or to absent (engines answer
/// `*_UNAVAILABLE`).
pub struct WeftBuilder {
    policy: Policy,
    graph: Option<Arc<dyn GraphStore>>,
    vectors: Option<Arc<dyn VectorStore>>,
    embedder: Option<Arc<dyn Embedder>>,
    builder: Option<Arc<dyn BuildEngine>>,
    retriever: Option<Arc<dyn HybridRetriever>>,
    ppr: Option<Arc<dyn PprEngine>>,
    tests: Option<Arc<dyn TestEngine>>,
    arch: Option<Arc<dyn ArchEngine>>,
    docs: Option<Arc<dyn DocsEngine>>,
    refs: Option<Arc<dyn RefScanner>>,
    summarizer: Option<Arc<dyn Summarizer>>,
}

impl WeftBuilder {
    pub fn new(policy: Policy) -> Self {
        Self {
            policy,
            graph: None,
            vectors: None,
            embedder: None,
            builder: None,
            retriever: None,
            ppr: None,
            tests: None,
            arch: None,
            docs: None,
            refs: None,
            summarizer: None,
        }
    }

    pub fn graph(mut self, graph: Arc<dyn GraphStore>) -> Self {
        self.graph = Some(graph);
        self
    }

    pub fn vectors(mut self, vectors: Arc<dyn VectorStore>) -> Self {
        self.vectors = Some(vectors);
        self
    }

    pub fn embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn build_engine(mut self, builder: Arc<dyn BuildEngine>) -> Self {
        self.builder = Some(builder);
        self
    }

    pub fn retriever(mut self, retriever: Arc<dyn HybridRetriever>) -> Self {
        self.retriever = Some(retriever);
        self
    }

    pub fn ppr(mut self, ppr: Arc<dyn PprEngine>) -> Self {
        self.ppr = Some(ppr);
        self
    }

    pub fn tests_engine(mut self, tests: Arc<dyn TestEngine>) -> Self {
        self.tests = Some(tests);
        self
    }

    pub fn arch_engine(mut self, arch: Arc<dyn ArchEngine>) -> Self {
        self.arch = Some(arch);
        self
    }

    pub fn docs_engine(mut self, docs: Arc<dyn DocsEngine>) -> Self {
        self.docs = Some(docs);
        self
    }

    pub fn ref_scanner(mut self, refs: Arc<dyn RefScanner>) -> Self {
        self.refs = Some(refs);
        self
    }

    pub fn summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    /// Uses the in-memory graph store (tests, store-less deployments).
    pub fn memory_graph(self) -> Self {
        let store: Arc<dyn GraphStore> = Arc::new(MemoryGraphStore::new());
        self.graph(store)
    }

    pub fn build(self) -> Weft {
        let policy = self.policy;

        let embedder: Arc<dyn Embedder> = match self.embedder {
            Some(embedder) => embedder,
            None => match &policy.embedding_endpoint {
                Some(endpoint) => Arc::new(HttpEmbedder::new(
                    endpoint.clone(),
                    HTTP_EMBEDDER_MODEL,
                    HTTP_EMBEDDER_DIMENSION,
                )),
                None => Arc::new(HashEmbedder::default()),
            },
        };
        let vectors: Arc<dyn VectorStore> = self
            .vectors
            .unwrap_or_else(|| Arc::new(MemoryVectorStore::new()));
        let embeddings = Arc::new(EmbeddingManager::new(embedder, vectors));

        let episodes = Arc::new(episode::EpisodeEngine::new(
            self.graph.clone(),
            embeddings.clone(),
            self.summarizer.clone(),
            policy.default_agent_id.clone(),
        ));
        let coordination = Arc::new(coordination::CoordinationEngine::new(
            self.graph.clone(),
            episodes.clone(),
        ));
        let rebuilds = Arc::new(rebuild::RebuildOrchestrator::new(
            self.graph.clone(),
            self.builder.clone(),
            embeddings.clone(),
            coordination.clone(),
            policy.effective_ignore_patterns(),
        ));

        let watchers = Arc::new(watcher::WatcherSupervisor::new());
        let default_context = ProjectContext::new(
            policy.workspace_fallback_root.clone(),
            policy.workspace_fallback_root.join("src"),
            "default",
        );
        let sessions = Arc::new(SessionManager::new(default_context, watchers));

        let bridge = Arc::new(Bridge {
            graph: self.graph,
            embeddings,
            builder: self.builder,
            retriever: self.retriever,
            ppr: self.ppr,
            tests: self.tests,
            arch: self.arch,
            docs: self.docs,
            refs: self.refs,
            summarizer: self.summarizer,
            sessions,
            rebuilds,
            coordination,
            episodes,
            policy,
        });
        let dispatcher = Arc::new(Dispatcher::new(tools::build_registry(bridge.clone())));
        Weft { bridge, dispatcher }
    }
}
