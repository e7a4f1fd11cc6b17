//! Natural-language query routing: local hybrid retrieval, global community
//! summaries, or both, with optional as-of temporal filtering.

use std::sync::Arc;

use serde_json::{json, Value};
use thiserror::Error;

use crate::bridge::{EngineError, HybridRetriever};
use crate::graph::{GraphStore, StoreError};

/// Vocabulary used to derive community label hints from query tokens.
const LABEL_VOCABULARY: &[&str] = &[
    "module", "service", "api", "storage", "parser", "auth", "ui", "cli", "test", "infra", "core",
    "config", "network", "cache",
];

const GLOBAL_COMMUNITY_LIMIT: usize = 8;

/// Query routing mode. Unknown strings coerce to `Local`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetrievalMode {
    Local,
    Global,
    Hybrid,
}

impl RetrievalMode {
    pub fn parse(s: Option<&str>) -> RetrievalMode {
        match s.map(|s| s.to_ascii_lowercase()).as_deref() {
            Some("global") => RetrievalMode::Global,
            Some("hybrid") => RetrievalMode::Hybrid,
            _ => RetrievalMode::Local,
        }
    }
}

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("retriever unavailable")]
    RetrieverUnavailable,
    #[error("graph store unavailable")]
    GraphUnavailable,
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Keeps rows whose validity window contains `as_of`. Rows without temporal
/// fields pass through.
pub fn filter_rows_as_of(rows: Vec<Value>, as_of: i64) -> Vec<Value> {
    rows.into_iter()
        .filter(|row| {
            let valid_from = row.get("validFrom").and_then(Value::as_i64);
            let valid_to = row.get("validTo").and_then(Value::as_i64);
            match valid_from {
                Some(from) => from <= as_of && valid_to.map_or(true, |to| to > as_of),
                None => true,
            }
        })
        .collect()
}

/// First query token of length ≥ 4, lowercased. Drives community summary
/// scoping.
fn keyword_hint(query: &str) -> Option<String> {
    query
        .split(|c: char| !c.is_alphanumeric())
        .find(|t| t.len() >= 4)
        .map(|t| t.to_lowercase())
}

/// Query tokens that appear in the label vocabulary.
fn label_hints(query: &str) -> Vec<String> {
    query
        .split(|c: char| !c.is_alphanumeric())
        .map(|t| t.to_lowercase())
        .filter(|t| LABEL_VOCABULARY.contains(&t.as_str()))
        .collect()
}

/// Routes natural-language queries per [`RetrievalMode`].
pub struct RetrievalDispatcher {
    graph: Option<Arc<dyn GraphStore>>,
    retriever: Option<Arc<dyn HybridRetriever>>,
}

impl RetrievalDispatcher {
    pub fn new(
        graph: Option<Arc<dyn GraphStore>>,
        retriever: Option<Arc<dyn HybridRetriever>>,
    ) -> Self {
        Self { graph, retriever }
    }

    /// Local retrieval with optional temporal filtering.
    pub async fn local(
        &self,
        project_id: &str,
        query: &str,
        limit: usize,
        as_of: Option<i64>,
    ) -> Result<Vec<Value>, RetrievalError> {
        let retriever = self
            .retriever
            .as_ref()
            .ok_or(RetrievalError::RetrieverUnavailable)?;
        let rows = retriever.retrieve(project_id, query, limit).await?;
        Ok(match as_of {
            Some(ts) => filter_rows_as_of(rows, ts),
            None => rows,
        })
    }

    /// Global community rows scoped by keyword/label hints, falling back to
    /// the top communities when the scoped query is empty.
    pub async fn global(&self, project_id: &str, query: &str) -> Result<Vec<Value>, RetrievalError> {
        let graph = self.graph.as_ref().ok_or(RetrievalError::GraphUnavailable)?;
        let keyword = keyword_hint(query);
        let labels = label_hints(query);

        let mut communities = graph
            .communities(
                project_id,
                keyword.as_deref(),
                &labels,
                GLOBAL_COMMUNITY_LIMIT,
            )
            .await?;
        if communities.is_empty() {
            communities = graph
                .top_communities(project_id, GLOBAL_COMMUNITY_LIMIT)
                .await?;
        }
        Ok(communities
            .into_iter()
            .map(|node| {
                json!({
                    "id": node.id,
                    "label": node.prop_str("label"),
                    "summary": node.prop_str("summary"),
                    "memberCount": node.properties.get("memberCount").cloned().unwrap_or(Value::Null),
                })
            })
            .collect())
    }

    /// Dispatches per mode. Hybrid produces a two-section result.
    pub async fn dispatch(
        &self,
        project_id: &str,
        query: &str,
        mode: RetrievalMode,
        limit: usize,
        as_of: Option<i64>,
    ) -> Result<Value, RetrievalError> {
        match mode {
            RetrievalMode::Local => {
                let results = self.local(project_id, query, limit, as_of).await?;
                Ok(json!(results))
            }
            RetrievalMode::Global => {
                let communities = self.global(project_id, query).await?;
                Ok(json!(communities))
            }
            RetrievalMode::Hybrid => {
                let communities = self.global(project_id, query).await?;
                let results = self.local(project_id, query, limit, as_of).await?;
                Ok(json!([
                    { "section": "global", "communities": communities },
                    { "section": "local", "results": results },
                ]))
            }
        }
    }
}
