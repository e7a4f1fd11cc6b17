//! Rebuild orchestration.
//!
//! Two entry points share one skeleton: the explicit rebuild tool (which
//! queues a background build and returns immediately) and the watcher batch
//! path (incremental, awaited in the watcher task). Each records a
//! transaction anchor before the build engine runs, then walks the
//! post-build hook chain: claim GC, embedding refresh/dirty, community
//! detection (full only), lexical index ensure. Hook failures land in the
//! per-project error ledger and never propagate to callers.
//!
//! At most one build is active per project. The explicit path rejects
//! overlapping requests as busy; the watcher path waits its turn.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use serde_json::json;
use tokio::sync::Mutex;

use crate::bridge::{BuildEngine, BuildRequest};
use crate::coordination::CoordinationEngine;
use crate::embedding::EmbeddingManager;
use crate::graph::{now_ms, GraphStore, GraphTx, RebuildKind, StoreError};
use crate::session::ProjectContext;
use crate::watcher::{BatchHandler, ChangeBatch};

/// Max entries retained per project in the error ledger.
const LEDGER_CAP: usize = 10;

/// One recorded background failure.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildErrorEntry {
    pub timestamp: i64,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

/// Bounded per-project ring of recent background build failures. Oldest
/// entries evict first.
#[derive(Default)]
pub struct BuildErrorLedger {
    entries: DashMap<String, VecDeque<BuildErrorEntry>>,
}

impl BuildErrorLedger {
    pub fn record(&self, project_id: &str, error: impl Into<String>, context: Option<String>) {
        let mut ring = self.entries.entry(project_id.to_string()).or_default();
        if ring.len() == LEDGER_CAP {
            ring.pop_front();
        }
        ring.push_back(BuildErrorEntry {
            timestamp: now_ms(),
            error: error.into(),
            context,
        });
    }

    pub fn recent(&self, project_id: &str) -> Vec<BuildErrorEntry> {
        self.entries
            .get(project_id)
            .map(|ring| ring.iter().cloned().collect())
            .unwrap_or_default()
    }
}

/// Result of asking for a rebuild.
#[derive(Clone, Debug)]
pub enum QueueOutcome {
    /// Build started in the background; the anchor id is already persisted.
    Queued { tx_id: String },
    /// Another build for this project is still running.
    Busy,
}

/// Snapshot of the last completed rebuild, for health.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LastRebuild {
    pub mode: String,
    pub timestamp: i64,
    pub tx_id: String,
}

/// Drives builds and post-build hooks. See the module docs for the state
/// machine.
pub struct RebuildOrchestrator {
    graph: Option<Arc<dyn GraphStore>>,
    builder: Option<Arc<dyn BuildEngine>>,
    embeddings: Arc<EmbeddingManager>,
    coordination: Arc<CoordinationEngine>,
    ledger: BuildErrorLedger,
    exclude: Vec<String>,
    gates: DashMap<String, Arc<Mutex<()>>>,
    last_rebuild: DashMap<String, LastRebuild>,
    cached_node_count: DashMap<String, usize>,
}

impl RebuildOrchestrator {
    pub fn new(
        graph: Option<Arc<dyn GraphStore>>,
        builder: Option<Arc<dyn BuildEngine>>,
        embeddings: Arc<EmbeddingManager>,
        coordination: Arc<CoordinationEngine>,
        exclude: Vec<String>,
    ) -> Self {
        Self {
            graph,
            builder,
            embeddings,
            coordination,
            ledger: BuildErrorLedger::default(),
            exclude,
            gates: DashMap::new(),
            last_rebuild: DashMap::new(),
            cached_node_count: DashMap::new(),
        }
    }

    fn gate(&self, project_id: &str) -> Arc<Mutex<()>> {
        self.gates
            .entry(project_id.to_string())
            .or_default()
            .clone()
    }

    fn new_tx_id() -> String {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        format!("tx-{}-{}", now_ms(), &suffix[..12])
    }

    /// Records the transaction anchor. Persistence is skipped when the graph
    /// store is disconnected; the build still runs.
    async fn record_tx(
        &self,
        ctx: &ProjectContext,
        kind: RebuildKind,
        agent_id: Option<&str>,
        git_commit: Option<&str>,
    ) -> Result<String, StoreError> {
        let tx_id = Self::new_tx_id();
        if let Some(graph) = &self.graph {
            graph
                .append_tx(GraphTx {
                    id: tx_id.clone(),
                    project_id: ctx.project_id.clone(),
                    tx_type: kind,
                    mode: kind.mode().to_string(),
                    timestamp: now_ms(),
                    source_dir: ctx.source_dir.to_string_lossy().into_owned(),
                    git_commit: git_commit.map(String::from),
                    agent_id: agent_id.map(String::from),
                })
                .await?;
        }
        Ok(tx_id)
    }

    /// Explicit entry point: records the anchor, then fires the build in the
    /// background and returns. A project with an active build answers
    /// [`QueueOutcome::Busy`]; the anchor is not written in that case.
    pub async fn queue_rebuild(
        self: &Arc<Self>,
        ctx: ProjectContext,
        kind: RebuildKind,
        changed_files: Vec<String>,
        agent_id: Option<String>,
        git_commit: Option<String>,
    ) -> Result<QueueOutcome, StoreError> {
        let gate = self.gate(&ctx.project_id);
        let Ok(guard) = gate.try_lock_owned() else {
            return Ok(QueueOutcome::Busy);
        };

        let tx_id = self
            .record_tx(&ctx, kind, agent_id.as_deref(), git_commit.as_deref())
            .await?;

        let this = self.clone();
        let queued_tx = tx_id.clone();
        tokio::spawn(async move {
            let _guard = guard;
            this.run_build(&ctx, kind, changed_files, queued_tx).await;
        });
        Ok(QueueOutcome::Queued { tx_id })
    }

    /// Watcher entry point: waits for the project gate, then runs an
    /// incremental build to completion.
    async fn rebuild_for_batch(&self, batch: ChangeBatch) {
        let ctx = ProjectContext::new(
            batch.workspace_root,
            batch.source_dir,
            batch.project_id.clone(),
        );
        let gate = self.gate(&ctx.project_id);
        let _guard = gate.lock().await;

        let kind = RebuildKind::IncrementalRebuild;
        let tx_id = match self.record_tx(&ctx, kind, None, None).await {
            Ok(id) => id,
            Err(e) => {
                self.ledger.record(
                    &ctx.project_id,
                    format!("transaction record failed: {}", e),
                    Some("watcher batch".to_string()),
                );
                return;
            }
        };
        self.run_build(&ctx, kind, batch.changed_files, tx_id).await;
    }

    /// Runs the build engine and the post-build hook chain. All failures
    /// land in the ledger; the chain continues past failed hooks.
    async fn run_build(
        &self,
        ctx: &ProjectContext,
        kind: RebuildKind,
        changed_files: Vec<String>,
        tx_id: String,
    ) {
        let project = ctx.project_id.as_str();
        let Some(builder) = &self.builder else {
            self.ledger
                .record(project, "build engine unavailable", Some(tx_id));
            return;
        };

        let request = BuildRequest {
            project_id: project.to_string(),
            workspace_root: ctx.workspace_root.clone(),
            source_dir: ctx.source_dir.clone(),
            kind,
            changed_files,
            exclude: self.exclude.clone(),
        };
        if let Err(e) = builder.build(request).await {
            tracing::warn!(project, error = %e, "background build failed");
            self.ledger
                .record(project, format!("build failed: {}", e), Some(tx_id));
            return;
        }

        // Hook 1: close claims whose targets no longer exist.
        if self.graph.is_some() {
            if let Err(e) = self.coordination.invalidate_stale_claims(project).await {
                self.ledger
                    .record(project, format!("stale claim GC failed: {}", e), None);
            }
        }

        // Hook 2: embeddings. Incremental marks dirty; full regenerates and
        // then refreshes communities.
        match kind {
            RebuildKind::IncrementalRebuild => self.embeddings.mark_dirty(project),
            RebuildKind::FullRebuild => {
                if let Some(graph) = &self.graph {
                    if let Err(e) = self.embeddings.generate_all(graph.as_ref(), project).await {
                        self.ledger.record(
                            project,
                            format!("embedding generation failed: {}", e),
                            None,
                        );
                    }
                }
                if let Err(e) = builder.detect_communities(project).await {
                    self.ledger
                        .record(project, format!("community detection failed: {}", e), None);
                }
            }
        }

        // Hook 3: lexical index.
        if let Some(graph) = &self.graph {
            if let Err(e) = graph.ensure_lexical_index(project).await {
                self.ledger
                    .record(project, format!("lexical index ensure failed: {}", e), None);
            }
            match graph.counts(project).await {
                Ok(counts) => {
                    self.cached_node_count.insert(project.to_string(), counts.nodes);
                }
                Err(e) => tracing::warn!(project, error = %e, "post-build count refresh failed"),
            }
        }

        self.last_rebuild.insert(
            project.to_string(),
            LastRebuild {
                mode: kind.mode().to_string(),
                timestamp: now_ms(),
                tx_id,
            },
        );
        tracing::info!(project, mode = kind.mode(), "rebuild complete");
    }

    /// Whether a build is currently active for the project.
    pub fn is_busy(&self, project_id: &str) -> bool {
        self.gate(project_id).try_lock().is_err()
    }

    pub fn last_rebuild(&self, project_id: &str) -> Option<LastRebuild> {
        self.last_rebuild.get(project_id).map(|r| r.clone())
    }

    pub fn recent_errors(&self, project_id: &str) -> Vec<BuildErrorEntry> {
        self.ledger.recent(project_id)
    }

    pub fn record_error(&self, project_id: &str, error: impl Into<String>, context: Option<String>) {
        self.ledger.record(project_id, error, context);
    }

    /// Node count cached at the end of the last rebuild; `None` before the
    /// first build.
    pub fn cached_node_count(&self, project_id: &str) -> Option<usize> {
        self.cached_node_count.get(project_id).map(|c| *c)
    }

    /// Health fragment summarizing rebuild state.
    pub fn describe(&self, project_id: &str) -> serde_json::Value {
        json!({
            "lastGraphRebuildMode": self.last_rebuild(project_id).map(|r| r.mode),
            "lastGraphRebuild": self.last_rebuild(project_id),
            "rebuildActive": self.is_busy(project_id),
            "recentBuildErrors": self.recent_errors(project_id),
        })
    }
}

#[async_trait]
impl BatchHandler for RebuildOrchestrator {
    async fn handle(&self, batch: ChangeBatch) {
        self.rebuild_for_batch(batch).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// The ledger caps at ten entries per project, evicting oldest first.
    #[test]
    fn ledger_caps_and_evicts_fifo() {
        let ledger = BuildErrorLedger::default();
        for i in 0..15 {
            ledger.record("p", format!("err-{}", i), None);
        }
        let entries = ledger.recent("p");
        assert_eq!(entries.len(), 10);
        assert_eq!(entries[0].error, "err-5");
        assert_eq!(entries[9].error, "err-14");
        assert!(ledger.recent("other").is_empty());
    }

    /// Generated transaction ids carry the tx- prefix and a random suffix.
    #[test]
    fn tx_ids_are_prefixed_and_unique() {
        let a = RebuildOrchestrator::new_tx_id();
        let b = RebuildOrchestrator::new_tx_id();
        assert!(a.starts_with("tx-"));
        assert_ne!(a, b);
    }
}
