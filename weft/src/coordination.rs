//! Agent coordination: exclusive claims over artifacts.
//!
//! The store's `try_claim` is the linearization point; this engine shapes
//! requests and results, computes fleet views, garbage-collects stale claims
//! after rebuilds, and runs the task-completion hook.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;

use crate::episode::{EpisodeEngine, EpisodeInput};
use crate::graph::{
    now_ms, Claim, ClaimOutcome, ClaimType, EpisodeFilter, GraphStore, NodeType, StoreError,
};

/// Claims older than this count as stale in the fleet overview.
const STALE_AGE_MS: i64 = 24 * 60 * 60 * 1000;

#[derive(Debug, Error)]
pub enum CoordinationError {
    #[error("invalid claim input: {0}")]
    InvalidInput(String),
    #[error("graph store unavailable")]
    Unavailable,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Validated claim request.
#[derive(Clone, Debug)]
pub struct ClaimRequest {
    pub project_id: String,
    pub agent_id: String,
    pub session_id: Option<String>,
    pub target_id: String,
    pub claim_type: ClaimType,
    pub intent: String,
}

/// Wire status of a claim attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClaimStatus {
    Created,
    Conflict,
}

/// One blocking claim, as reported to the rejected caller.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictInfo {
    pub claim_id: String,
    pub agent_id: String,
    pub target_id: String,
    pub intent: String,
    pub valid_from: i64,
}

impl From<Claim> for ConflictInfo {
    fn from(claim: Claim) -> Self {
        Self {
            claim_id: claim.id,
            agent_id: claim.agent_id,
            target_id: claim.target_id,
            intent: claim.intent,
            valid_from: claim.valid_from,
        }
    }
}

/// Result of a claim attempt. `claim_id` is set only on creation; conflicts
/// list the claims that blocked the attempt.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimResult {
    pub status: ClaimStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claim_id: Option<String>,
    pub conflicts: Vec<ConflictInfo>,
}

pub struct CoordinationEngine {
    graph: Option<Arc<dyn GraphStore>>,
    episodes: Arc<EpisodeEngine>,
}

impl CoordinationEngine {
    pub fn new(graph: Option<Arc<dyn GraphStore>>, episodes: Arc<EpisodeEngine>) -> Self {
        Self { graph, episodes }
    }

    fn graph(&self) -> Result<&Arc<dyn GraphStore>, CoordinationError> {
        self.graph.as_ref().ok_or(CoordinationError::Unavailable)
    }

    /// Attempts an exclusive claim. A live claim by another agent on the
    /// same target yields CONFLICT and persists nothing.
    pub async fn claim(&self, request: ClaimRequest) -> Result<ClaimResult, CoordinationError> {
        if request.target_id.trim().is_empty() {
            return Err(CoordinationError::InvalidInput(
                "targetId is required".to_string(),
            ));
        }
        if request.intent.trim().is_empty() {
            return Err(CoordinationError::InvalidInput(
                "intent is required".to_string(),
            ));
        }
        let graph = self.graph()?;

        let claim = Claim {
            id: format!("claim-{}", uuid::Uuid::new_v4().simple()),
            project_id: request.project_id,
            agent_id: request.agent_id,
            session_id: request.session_id,
            target_id: request.target_id,
            claim_type: request.claim_type,
            intent: request.intent,
            valid_from: now_ms(),
            valid_to: None,
        };
        let claim_id = claim.id.clone();
        match graph.try_claim(claim).await? {
            ClaimOutcome::Created => Ok(ClaimResult {
                status: ClaimStatus::Created,
                claim_id: Some(claim_id),
                conflicts: Vec::new(),
            }),
            ClaimOutcome::Conflict(conflicts) => Ok(ClaimResult {
                status: ClaimStatus::Conflict,
                claim_id: None,
                conflicts: conflicts.into_iter().map(ConflictInfo::from).collect(),
            }),
        }
    }

    /// Releases a claim. Returns whether a live claim was closed.
    pub async fn release(
        &self,
        project_id: &str,
        claim_id: &str,
    ) -> Result<bool, CoordinationError> {
        if claim_id.trim().is_empty() {
            return Err(CoordinationError::InvalidInput(
                "claimId is required".to_string(),
            ));
        }
        let graph = self.graph()?;
        Ok(graph.close_claim(project_id, claim_id, now_ms()).await?)
    }

    /// Per-agent view: active claims, recent episodes, current task.
    pub async fn status(
        &self,
        project_id: &str,
        agent_id: &str,
    ) -> Result<Value, CoordinationError> {
        let graph = self.graph()?;
        let claims = graph.claims_by_agent(project_id, agent_id).await?;
        let episodes = graph
            .episodes(
                project_id,
                &EpisodeFilter {
                    agent_id: Some(agent_id.to_string()),
                    ..Default::default()
                },
            )
            .await?
            .into_iter()
            .take(10)
            .collect::<Vec<_>>();

        let current_task = self.current_task(graph.as_ref(), project_id, agent_id).await?;

        Ok(json!({
            "agentId": agent_id,
            "activeClaims": claims,
            "recentEpisodes": episodes,
            "currentTask": current_task,
        }))
    }

    async fn current_task(
        &self,
        graph: &dyn GraphStore,
        project_id: &str,
        agent_id: &str,
    ) -> Result<Option<Value>, CoordinationError> {
        let tasks = graph.live_nodes(project_id, &[NodeType::Task]).await?;
        Ok(tasks
            .into_iter()
            .find(|t| {
                t.prop_str("assignee") == Some(agent_id)
                    && t.prop_str("status") == Some("in-progress")
            })
            .map(|t| json!({ "id": t.id, "title": t.prop_str("title"), "status": "in-progress" })))
    }

    /// Fleet view: all live claims, stale claims, contested targets, and a
    /// one-line summary.
    pub async fn overview(&self, project_id: &str) -> Result<Value, CoordinationError> {
        let graph = self.graph()?;
        let claims = graph.live_claims(project_id, None).await?;
        let now = now_ms();

        let mut stale: Vec<&Claim> = Vec::new();
        for claim in &claims {
            let aged = now - claim.valid_from > STALE_AGE_MS;
            let dangling = graph.live_node(project_id, &claim.target_id).await?.is_none();
            if aged || dangling {
                stale.push(claim);
            }
        }

        let mut by_target: BTreeMap<&str, Vec<&Claim>> = BTreeMap::new();
        for claim in &claims {
            by_target.entry(&claim.target_id).or_default().push(claim);
        }
        let conflicts: Vec<Value> = by_target
            .iter()
            .filter(|(_, held)| held.len() > 1)
            .map(|(target, held)| {
                json!({
                    "targetId": target,
                    "claims": held,
                })
            })
            .collect();

        let summary = format!(
            "{} active claims, {} stale, {} contested targets",
            claims.len(),
            stale.len(),
            conflicts.len()
        );
        Ok(json!({
            "mode": "overview",
            "activeClaims": claims,
            "staleClaims": stale,
            "conflicts": conflicts,
            "summary": summary,
        }))
    }

    /// Post-rebuild GC: closes claims whose target no longer resolves to a
    /// live node. Resolution runs against the store as it stands after the
    /// build, never against intermediate states.
    pub async fn invalidate_stale_claims(
        &self,
        project_id: &str,
    ) -> Result<usize, CoordinationError> {
        let graph = self.graph()?;
        let now = now_ms();
        let mut closed = 0usize;
        for claim in graph.live_claims(project_id, None).await? {
            if graph.live_node(project_id, &claim.target_id).await?.is_none()
                && graph.close_claim(project_id, &claim.id, now).await?
            {
                closed += 1;
                tracing::debug!(
                    project = project_id,
                    claim = %claim.id,
                    target = %claim.target_id,
                    "closed stale claim"
                );
            }
        }
        Ok(closed)
    }

    /// Task-completion hook: closes the assignee's claims on the task,
    /// reflects over the task's episodes, and records the completion as a
    /// DECISION episode.
    pub async fn complete_task(
        &self,
        project_id: &str,
        task_id: &str,
        agent_id: &str,
        notes: Option<&str>,
    ) -> Result<Value, CoordinationError> {
        let graph = self.graph()?;
        let now = now_ms();

        let mut released = 0usize;
        for claim in graph.claims_by_agent(project_id, agent_id).await? {
            if claim.target_id == task_id && graph.close_claim(project_id, &claim.id, now).await? {
                released += 1;
            }
        }

        let reflection = self
            .episodes
            .reflect(project_id, Some(task_id), Some(agent_id))
            .await
            .ok();

        let rationale = match notes {
            Some(notes) => format!("task {} completed: {}", task_id, notes),
            None => format!("task {} marked completed", task_id),
        };
        let mut metadata = BTreeMap::new();
        metadata.insert("rationale".to_string(), json!(rationale));
        let decision_id = self
            .episodes
            .add(EpisodeInput {
                project_id: project_id.to_string(),
                episode_type: Some("DECISION".to_string()),
                content: format!("completed task {}", task_id),
                task_id: Some(task_id.to_string()),
                outcome: Some("success".to_string()),
                metadata,
                agent_id: Some(agent_id.to_string()),
                ..Default::default()
            })
            .await
            .map_err(|e| CoordinationError::InvalidInput(e.to_string()))?;

        Ok(json!({
            "claimsReleased": released,
            "reflection": reflection,
            "decisionEpisodeId": decision_id,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{EmbeddingManager, HashEmbedder, MemoryVectorStore};
    use crate::graph::{GraphNode, MemoryGraphStore};

    fn engine() -> (CoordinationEngine, Arc<MemoryGraphStore>) {
        let store = Arc::new(MemoryGraphStore::new());
        let graph: Arc<dyn GraphStore> = store.clone();
        let episodes = Arc::new(EpisodeEngine::new(
            Some(graph.clone()),
            Arc::new(EmbeddingManager::new(
                Arc::new(HashEmbedder::default()),
                Arc::new(MemoryVectorStore::new()),
            )),
            None,
            "agent-default".to_string(),
        ));
        (CoordinationEngine::new(Some(graph), episodes), store)
    }

    fn request(agent: &str, target: &str) -> ClaimRequest {
        ClaimRequest {
            project_id: "p".to_string(),
            agent_id: agent.to_string(),
            session_id: None,
            target_id: target.to_string(),
            claim_type: ClaimType::Task,
            intent: "work".to_string(),
        }
    }

    /// First claim creates; a second agent conflicts and nothing new persists.
    #[tokio::test]
    async fn claim_then_conflict() {
        let (engine, store) = engine();
        let first = engine.claim(request("a1", "task:1")).await.unwrap();
        assert_eq!(first.status, ClaimStatus::Created);
        let c1 = first.claim_id.clone().unwrap();

        let second = engine.claim(request("a2", "task:1")).await.unwrap();
        assert_eq!(second.status, ClaimStatus::Conflict);
        assert!(second.claim_id.is_none());
        assert_eq!(second.conflicts.len(), 1);
        assert_eq!(second.conflicts[0].claim_id, c1);

        assert_eq!(store.live_claims("p", None).await.unwrap().len(), 1);
    }

    /// Missing target or intent is invalid input.
    #[tokio::test]
    async fn claim_validates_input() {
        let (engine, _) = engine();
        let mut bad = request("a1", "");
        let err = engine.claim(bad.clone()).await.unwrap_err();
        assert!(matches!(err, CoordinationError::InvalidInput(_)));
        bad.target_id = "t".to_string();
        bad.intent = " ".to_string();
        let err = engine.claim(bad).await.unwrap_err();
        assert!(matches!(err, CoordinationError::InvalidInput(_)));
    }

    /// Release closes the claim; the target becomes claimable again.
    #[tokio::test]
    async fn release_frees_target() {
        let (engine, _) = engine();
        let first = engine.claim(request("a1", "task:1")).await.unwrap();
        assert!(engine
            .release("p", first.claim_id.as_deref().unwrap())
            .await
            .unwrap());

        let second = engine.claim(request("a2", "task:1")).await.unwrap();
        assert_eq!(second.status, ClaimStatus::Created);
    }

    /// Stale GC closes claims on vanished targets, keeps resolving ones.
    #[tokio::test]
    async fn stale_invalidation_checks_target_liveness() {
        let (engine, store) = engine();
        store
            .upsert_node(GraphNode::new("fn:alive", NodeType::Function, "p"))
            .await
            .unwrap();
        engine.claim(request("a1", "fn:alive")).await.unwrap();
        engine.claim(request("a2", "fn:gone")).await.unwrap();

        let closed = engine.invalidate_stale_claims("p").await.unwrap();
        assert_eq!(closed, 1);
        let live = store.live_claims("p", None).await.unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].target_id, "fn:alive");
    }

    /// Completing a task releases the agent's claim on it and records a
    /// DECISION with a rationale.
    #[tokio::test]
    async fn complete_task_hook() {
        let (engine, store) = engine();
        engine.claim(request("a1", "task:9")).await.unwrap();
        // An episode on the task so reflection has material.
        engine
            .episodes
            .add(EpisodeInput {
                project_id: "p".to_string(),
                episode_type: Some("OBSERVATION".to_string()),
                content: "working the task".to_string(),
                task_id: Some("task:9".to_string()),
                agent_id: Some("a1".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();

        let result = engine
            .complete_task("p", "task:9", "a1", Some("shipped"))
            .await
            .unwrap();
        assert_eq!(result["claimsReleased"], json!(1));
        assert!(store.live_claims("p", None).await.unwrap().is_empty());

        let decisions = store
            .episodes(
                "p",
                &EpisodeFilter {
                    types: vec![crate::graph::EpisodeType::Decision],
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(decisions.len(), 1);
        assert!(decisions[0].metadata["rationale"]
            .as_str()
            .unwrap()
            .contains("shipped"));
    }
}
