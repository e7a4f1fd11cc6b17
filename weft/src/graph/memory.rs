//! In-memory graph store.
//!
//! DashMap-backed, keyed by project. Keeps full row history so temporal
//! queries (added/removed windows, as-of filtering) behave like the production
//! driver. Used by tests and by deployments running without a graph database.

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use serde_json::Value;

use super::{
    Claim, ClaimOutcome, Episode, EpisodeFilter, GraphCounts, GraphNode, GraphRelationship,
    GraphStore, GraphTx, Learning, NodeType, RelType, StoreError, TxAnchorField,
};

/// Pure in-memory [`GraphStore`]. All data is lost when the store is dropped.
///
/// Claim attempts serialize on the project's claim vector, which makes
/// [`GraphStore::try_claim`] linearizable per `(project, target)` without a
/// global lock.
#[derive(Default)]
pub struct MemoryGraphStore {
    nodes: DashMap<String, Vec<GraphNode>>,
    rels: DashMap<String, Vec<GraphRelationship>>,
    txs: DashMap<String, Vec<GraphTx>>,
    claims: DashMap<String, Vec<Claim>>,
    episodes: DashMap<String, Vec<Episode>>,
    learnings: DashMap<String, Vec<Learning>>,
    lexical_indexed: DashSet<String>,
}

impl MemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the lexical index has been ensured for `project_id`.
    pub fn lexical_index_ready(&self, project_id: &str) -> bool {
        self.lexical_indexed.contains(project_id)
    }

    fn type_matches(node: &GraphNode, types: &[NodeType]) -> bool {
        types.is_empty() || types.contains(&node.node_type)
    }
}

#[async_trait]
impl GraphStore for MemoryGraphStore {
    async fn upsert_node(&self, node: GraphNode) -> Result<(), StoreError> {
        let mut rows = self.nodes.entry(node.project_id.clone()).or_default();
        // Close the previous live row for this id before inserting.
        for row in rows.iter_mut() {
            if row.id == node.id && row.is_live() {
                row.valid_to = Some(node.valid_from);
            }
        }
        rows.push(node);
        Ok(())
    }

    async fn close_node(&self, project_id: &str, id: &str, at: i64) -> Result<bool, StoreError> {
        let Some(mut rows) = self.nodes.get_mut(project_id) else {
            return Ok(false);
        };
        let mut closed = false;
        for row in rows.iter_mut() {
            if row.id == id && row.is_live() {
                row.valid_to = Some(at);
                closed = true;
            }
        }
        Ok(closed)
    }

    async fn live_node(
        &self,
        project_id: &str,
        id: &str,
    ) -> Result<Option<GraphNode>, StoreError> {
        Ok(self.nodes.get(project_id).and_then(|rows| {
            rows.iter()
                .find(|row| row.id == id && row.is_live())
                .cloned()
        }))
    }

    async fn live_nodes(
        &self,
        project_id: &str,
        types: &[NodeType],
    ) -> Result<Vec<GraphNode>, StoreError> {
        Ok(self
            .nodes
            .get(project_id)
            .map(|rows| {
                rows.iter()
                    .filter(|row| row.is_live() && Self::type_matches(row, types))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn upsert_relationship(&self, rel: GraphRelationship) -> Result<(), StoreError> {
        self.rels.entry(rel.project_id.clone()).or_default().push(rel);
        Ok(())
    }

    async fn relationships(
        &self,
        project_id: &str,
        rel_type: RelType,
        from: Option<&str>,
        to: Option<&str>,
    ) -> Result<Vec<GraphRelationship>, StoreError> {
        Ok(self
            .rels
            .get(project_id)
            .map(|rels| {
                rels.iter()
                    .filter(|r| r.rel_type == rel_type)
                    .filter(|r| from.map_or(true, |f| r.from == f))
                    .filter(|r| to.map_or(true, |t| r.to == t))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn append_tx(&self, tx: GraphTx) -> Result<(), StoreError> {
        self.txs.entry(tx.project_id.clone()).or_default().push(tx);
        Ok(())
    }

    async fn txs_since(&self, project_id: &str, since: i64) -> Result<Vec<GraphTx>, StoreError> {
        let mut txs: Vec<GraphTx> = self
            .txs
            .get(project_id)
            .map(|txs| {
                txs.iter()
                    .filter(|tx| tx.timestamp >= since)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        txs.sort_by_key(|tx| tx.timestamp);
        Ok(txs)
    }

    async fn find_tx(
        &self,
        project_id: &str,
        field: TxAnchorField,
        value: &str,
    ) -> Result<Option<GraphTx>, StoreError> {
        Ok(self.txs.get(project_id).and_then(|txs| {
            txs.iter()
                .find(|tx| match field {
                    TxAnchorField::Id => tx.id == value,
                    TxAnchorField::GitCommit => tx.git_commit.as_deref() == Some(value),
                    TxAnchorField::AgentId => tx.agent_id.as_deref() == Some(value),
                })
                .cloned()
        }))
    }

    async fn added_since(
        &self,
        project_id: &str,
        since: i64,
        types: &[NodeType],
        limit: usize,
    ) -> Result<Vec<GraphNode>, StoreError> {
        let mut rows: Vec<GraphNode> = self
            .nodes
            .get(project_id)
            .map(|rows| {
                rows.iter()
                    .filter(|row| row.valid_from >= since && Self::type_matches(row, types))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        rows.sort_by(|a, b| b.valid_from.cmp(&a.valid_from));
        rows.truncate(limit);
        Ok(rows)
    }

    async fn removed_since(
        &self,
        project_id: &str,
        since: i64,
        types: &[NodeType],
        limit: usize,
    ) -> Result<Vec<GraphNode>, StoreError> {
        let mut rows: Vec<GraphNode> = self
            .nodes
            .get(project_id)
            .map(|rows| {
                rows.iter()
                    .filter(|row| {
                        row.valid_to.map_or(false, |t| t >= since)
                            && Self::type_matches(row, types)
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        rows.sort_by(|a, b| b.valid_to.cmp(&a.valid_to));
        rows.truncate(limit);
        Ok(rows)
    }

    async fn communities(
        &self,
        project_id: &str,
        keyword: Option<&str>,
        labels: &[String],
        limit: usize,
    ) -> Result<Vec<GraphNode>, StoreError> {
        let keyword = keyword.map(|k| k.to_lowercase());
        let mut rows: Vec<GraphNode> = self
            .live_nodes(project_id, &[NodeType::Community])
            .await?
            .into_iter()
            .filter(|node| {
                let summary_hit = keyword.as_deref().map_or(false, |k| {
                    node.prop_str("summary")
                        .map_or(false, |s| s.to_lowercase().contains(k))
                });
                let label_hit = node
                    .prop_str("label")
                    .map_or(false, |l| labels.iter().any(|hint| hint == l));
                summary_hit || label_hit
            })
            .collect();
        rows.sort_by_key(|node| {
            std::cmp::Reverse(
                node.properties
                    .get("memberCount")
                    .and_then(|v| v.as_i64())
                    .unwrap_or(0),
            )
        });
        rows.truncate(limit);
        Ok(rows)
    }

    async fn top_communities(
        &self,
        project_id: &str,
        limit: usize,
    ) -> Result<Vec<GraphNode>, StoreError> {
        let mut rows = self.live_nodes(project_id, &[NodeType::Community]).await?;
        rows.sort_by_key(|node| {
            std::cmp::Reverse(
                node.properties
                    .get("memberCount")
                    .and_then(|v| v.as_i64())
                    .unwrap_or(0),
            )
        });
        rows.truncate(limit);
        Ok(rows)
    }

    async fn counts(&self, project_id: &str) -> Result<GraphCounts, StoreError> {
        let live = self.live_nodes(project_id, &[]).await?;
        let relationships = self.rels.get(project_id).map(|r| r.len()).unwrap_or(0);
        let count_of = |t: NodeType| live.iter().filter(|n| n.node_type == t).count();
        Ok(GraphCounts {
            nodes: live.len(),
            relationships,
            files: count_of(NodeType::File),
            functions: count_of(NodeType::Function),
            classes: count_of(NodeType::Class),
        })
    }

    async fn raw_query(&self, _query: &str, _params: Value) -> Result<Vec<Value>, StoreError> {
        Err(StoreError::Unsupported(
            "the in-memory store has no query language; use natural-language queries".to_string(),
        ))
    }

    async fn ensure_lexical_index(&self, project_id: &str) -> Result<(), StoreError> {
        self.lexical_indexed.insert(project_id.to_string());
        Ok(())
    }

    async fn try_claim(&self, claim: Claim) -> Result<ClaimOutcome, StoreError> {
        let mut claims = self.claims.entry(claim.project_id.clone()).or_default();
        let conflicts: Vec<Claim> = claims
            .iter()
            .filter(|c| c.is_live() && c.target_id == claim.target_id && c.agent_id != claim.agent_id)
            .cloned()
            .collect();
        if !conflicts.is_empty() {
            return Ok(ClaimOutcome::Conflict(conflicts));
        }
        claims.push(claim);
        Ok(ClaimOutcome::Created)
    }

    async fn live_claims(
        &self,
        project_id: &str,
        target_id: Option<&str>,
    ) -> Result<Vec<Claim>, StoreError> {
        Ok(self
            .claims
            .get(project_id)
            .map(|claims| {
                claims
                    .iter()
                    .filter(|c| c.is_live())
                    .filter(|c| target_id.map_or(true, |t| c.target_id == t))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn claims_by_agent(
        &self,
        project_id: &str,
        agent_id: &str,
    ) -> Result<Vec<Claim>, StoreError> {
        Ok(self
            .claims
            .get(project_id)
            .map(|claims| {
                claims
                    .iter()
                    .filter(|c| c.is_live() && c.agent_id == agent_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn close_claim(
        &self,
        project_id: &str,
        claim_id: &str,
        at: i64,
    ) -> Result<bool, StoreError> {
        let Some(mut claims) = self.claims.get_mut(project_id) else {
            return Ok(false);
        };
        let mut closed = false;
        for claim in claims.iter_mut() {
            if claim.id == claim_id && claim.is_live() {
                claim.valid_to = Some(at);
                closed = true;
            }
        }
        Ok(closed)
    }

    async fn put_episode(&self, episode: Episode) -> Result<(), StoreError> {
        self.episodes
            .entry(episode.project_id.clone())
            .or_default()
            .push(episode);
        Ok(())
    }

    async fn episodes(
        &self,
        project_id: &str,
        filter: &EpisodeFilter,
    ) -> Result<Vec<Episode>, StoreError> {
        let mut eps: Vec<Episode> = self
            .episodes
            .get(project_id)
            .map(|eps| eps.iter().filter(|ep| filter.matches(ep)).cloned().collect())
            .unwrap_or_default();
        eps.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(eps)
    }

    async fn put_learning(&self, learning: Learning) -> Result<(), StoreError> {
        self.learnings
            .entry(learning.project_id.clone())
            .or_default()
            .push(learning);
        Ok(())
    }

    async fn learnings_for(
        &self,
        project_id: &str,
        node_ids: &[String],
        limit: usize,
    ) -> Result<Vec<Learning>, StoreError> {
        let mut hits: Vec<Learning> = self
            .learnings
            .get(project_id)
            .map(|ls| {
                ls.iter()
                    .filter(|l| l.applies_to.iter().any(|id| node_ids.contains(id)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        hits.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(limit);
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::ClaimType;

    fn node(id: &str, t: NodeType, project: &str, at: i64) -> GraphNode {
        let mut n = GraphNode::new(id, t, project);
        n.valid_from = at;
        n
    }

    /// Upserting the same id closes the previous live row: one live row per id.
    #[tokio::test]
    async fn upsert_keeps_single_live_row() {
        let store = MemoryGraphStore::new();
        store
            .upsert_node(node("fn:a", NodeType::Function, "p", 100))
            .await
            .unwrap();
        store
            .upsert_node(node("fn:a", NodeType::Function, "p", 200))
            .await
            .unwrap();

        let live = store.live_nodes("p", &[NodeType::Function]).await.unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].valid_from, 200);

        // Closed row shows up in the removed window.
        let removed = store
            .removed_since("p", 150, &[NodeType::Function], 10)
            .await
            .unwrap();
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].valid_to, Some(200));
    }

    /// A second agent claiming the same live target conflicts without a write.
    #[tokio::test]
    async fn try_claim_conflicts_without_partial_write() {
        let store = MemoryGraphStore::new();
        let claim = |id: &str, agent: &str| Claim {
            id: id.into(),
            project_id: "p".into(),
            agent_id: agent.into(),
            session_id: None,
            target_id: "task:1".into(),
            claim_type: ClaimType::Task,
            intent: "work".into(),
            valid_from: 1,
            valid_to: None,
        };
        assert!(matches!(
            store.try_claim(claim("c1", "a1")).await.unwrap(),
            ClaimOutcome::Created
        ));
        match store.try_claim(claim("c2", "a2")).await.unwrap() {
            ClaimOutcome::Conflict(existing) => {
                assert_eq!(existing.len(), 1);
                assert_eq!(existing[0].id, "c1");
            }
            ClaimOutcome::Created => panic!("expected conflict"),
        }
        // Only the first claim is persisted.
        assert_eq!(store.live_claims("p", None).await.unwrap().len(), 1);
    }

    /// Same agent re-claiming its own target does not conflict.
    #[tokio::test]
    async fn try_claim_same_agent_is_not_a_conflict() {
        let store = MemoryGraphStore::new();
        let claim = |id: &str| Claim {
            id: id.into(),
            project_id: "p".into(),
            agent_id: "a1".into(),
            session_id: None,
            target_id: "src/x.rs".into(),
            claim_type: ClaimType::File,
            intent: "edit".into(),
            valid_from: 1,
            valid_to: None,
        };
        assert!(matches!(
            store.try_claim(claim("c1")).await.unwrap(),
            ClaimOutcome::Created
        ));
        assert!(matches!(
            store.try_claim(claim("c2")).await.unwrap(),
            ClaimOutcome::Created
        ));
    }

    /// Communities rank by member count; keyword scoping filters by summary.
    #[tokio::test]
    async fn communities_rank_and_filter() {
        let store = MemoryGraphStore::new();
        for (id, count, summary) in [
            ("comm:1", 10, "parsing and lexing"),
            ("comm:2", 50, "storage engine internals"),
            ("comm:3", 30, "http handlers"),
        ] {
            store
                .upsert_node(
                    GraphNode::new(id, NodeType::Community, "p")
                        .with_property("memberCount", serde_json::json!(count))
                        .with_property("summary", serde_json::json!(summary))
                        .with_property("label", serde_json::json!("module")),
                )
                .await
                .unwrap();
        }
        let top = store.top_communities("p", 2).await.unwrap();
        assert_eq!(top[0].id, "comm:2");
        assert_eq!(top[1].id, "comm:3");

        let scoped = store
            .communities("p", Some("storage"), &[], 10)
            .await
            .unwrap();
        assert_eq!(scoped.len(), 1);
        assert_eq!(scoped[0].id, "comm:2");
    }
}
