//! Diff-since: added/removed/modified symbol sets relative to a resolved
//! anchor.

use serde::Serialize;
use serde_json::{json, Value};

use crate::graph::temporal::ResolvedAnchor;
use crate::graph::{GraphNode, GraphStore, NodeType, StoreError};

const WINDOW_LIMIT: usize = 500;

/// Types diff_since accepts.
pub const DIFFABLE_TYPES: &[NodeType] = &[NodeType::File, NodeType::Function, NodeType::Class];

/// Diff report. `added`/`removed` are disjoint: ids seen in both windows are
/// reported once, under `modified`.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffReport {
    pub added: Vec<Value>,
    pub removed: Vec<Value>,
    pub modified: Vec<String>,
    pub tx_ids: Vec<String>,
    pub summary: String,
}

fn row(node: &GraphNode) -> Value {
    json!({
        "id": node.id,
        "type": node.node_type,
        "name": node.display_name(),
        "validFrom": node.valid_from,
        "validTo": node.valid_to,
    })
}

/// Computes the report for `types` (all diffable types when empty).
pub async fn diff_since(
    graph: &dyn GraphStore,
    project_id: &str,
    anchor: &ResolvedAnchor,
    types: &[NodeType],
) -> Result<DiffReport, StoreError> {
    let types: Vec<NodeType> = if types.is_empty() {
        DIFFABLE_TYPES.to_vec()
    } else {
        types.to_vec()
    };

    let added_rows = graph
        .added_since(project_id, anchor.since_ts, &types, WINDOW_LIMIT)
        .await?;
    let removed_rows = graph
        .removed_since(project_id, anchor.since_ts, &types, WINDOW_LIMIT)
        .await?;

    let added_ids: std::collections::BTreeSet<&str> =
        added_rows.iter().map(|n| n.id.as_str()).collect();
    let mut modified: Vec<String> = removed_rows
        .iter()
        .filter(|n| added_ids.contains(n.id.as_str()))
        .map(|n| n.id.clone())
        .collect();
    modified.dedup();

    let added: Vec<Value> = added_rows
        .iter()
        .filter(|n| !modified.contains(&n.id))
        .map(row)
        .collect();
    let removed: Vec<Value> = removed_rows
        .iter()
        .filter(|n| !modified.contains(&n.id))
        .map(row)
        .collect();

    let tx_ids: Vec<String> = graph
        .txs_since(project_id, anchor.since_ts)
        .await?
        .into_iter()
        .map(|tx| tx.id)
        .collect();

    let summary = format!(
        "{} added, {} removed, {} modified since {}.",
        added.len(),
        removed.len(),
        modified.len(),
        anchor.anchor_value
    );

    Ok(DiffReport {
        added,
        removed,
        modified,
        tx_ids,
        summary,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::temporal::AnchorMode;
    use crate::graph::{GraphTx, MemoryGraphStore, RebuildKind};

    fn node_at(id: &str, t: NodeType, from: i64) -> GraphNode {
        let mut n = GraphNode::new(id, t, "p");
        n.valid_from = from;
        n
    }

    /// Added/removed/modified partition correctly and the summary string is
    /// exact.
    #[tokio::test]
    async fn partitions_and_summary() {
        let store = MemoryGraphStore::new();
        let anchor_ts = 1000i64;

        // X: added after the anchor.
        store
            .upsert_node(node_at("fn:x", NodeType::Function, 1500))
            .await
            .unwrap();
        // Y: existed before, re-upserted after (modified).
        store
            .upsert_node(node_at("fn:y", NodeType::Function, 500))
            .await
            .unwrap();
        store
            .upsert_node(node_at("fn:y", NodeType::Function, 1600))
            .await
            .unwrap();
        // Z: existed before, removed after.
        store
            .upsert_node(node_at("fn:z", NodeType::Function, 400))
            .await
            .unwrap();
        store.close_node("p", "fn:z", 1700).await.unwrap();

        store
            .append_tx(GraphTx {
                id: "tx-1".into(),
                project_id: "p".into(),
                tx_type: RebuildKind::IncrementalRebuild,
                mode: "incremental".into(),
                timestamp: 1400,
                source_dir: "/tmp/src".into(),
                git_commit: None,
                agent_id: None,
            })
            .await
            .unwrap();

        let anchor = ResolvedAnchor {
            since_ts: anchor_ts,
            mode: AnchorMode::Timestamp,
            anchor_value: "1000".to_string(),
        };
        let report = diff_since(&store, "p", &anchor, &[]).await.unwrap();

        assert_eq!(report.added.len(), 1);
        assert_eq!(report.added[0]["id"], serde_json::json!("fn:x"));
        assert_eq!(report.removed.len(), 1);
        assert_eq!(report.removed[0]["id"], serde_json::json!("fn:z"));
        assert_eq!(report.modified, vec!["fn:y".to_string()]);
        assert_eq!(report.tx_ids, vec!["tx-1".to_string()]);
        assert_eq!(report.summary, "1 added, 1 removed, 1 modified since 1000.");
    }

    /// Type filters restrict the windows.
    #[tokio::test]
    async fn type_filter_applies() {
        let store = MemoryGraphStore::new();
        store
            .upsert_node(node_at("fn:a", NodeType::Function, 2000))
            .await
            .unwrap();
        store
            .upsert_node(node_at("file:b", NodeType::File, 2000))
            .await
            .unwrap();

        let anchor = ResolvedAnchor {
            since_ts: 1000,
            mode: AnchorMode::Timestamp,
            anchor_value: "1000".to_string(),
        };
        let report = diff_since(&store, "p", &anchor, &[NodeType::File])
            .await
            .unwrap();
        assert_eq!(report.added.len(), 1);
        assert_eq!(report.added[0]["id"], serde_json::json!("file:b"));
    }
}
