//! Health and drift reporting: store counts, process-local state, and the
//! divergence signal between the cached node count and the store's.

use serde_json::{json, Value};

use crate::bridge::Bridge;
use crate::graph::StoreError;
use crate::session::ProjectContext;

/// Assembles the per-project health report for a session.
///
/// `status` is `ok`, `drift_detected` (cached count diverges from the store),
/// or `graph_disconnected`. The drift signal is advisory: the cache refreshes
/// only on rebuild, so out-of-process store mutations read as drift until the
/// next build.
pub async fn health_report(
    bridge: &Bridge,
    ctx: &ProjectContext,
    session_key: &str,
) -> Result<Value, StoreError> {
    let project = ctx.project_id.as_str();

    let (graph_counts, status, recommendations) = match bridge.graph() {
        None => (
            Value::Null,
            "graph_disconnected",
            vec!["connect a graph store to enable queries".to_string()],
        ),
        Some(graph) => {
            let counts = graph.counts(project).await?;
            let cached = bridge.rebuilds.cached_node_count(project);
            let mut recommendations = Vec::new();
            let status = match cached {
                Some(cached) if cached != counts.nodes => {
                    recommendations
                        .push("graph drifted since last rebuild; run graph_rebuild".to_string());
                    "drift_detected"
                }
                _ => "ok",
            };
            if !bridge.embeddings.is_ready(project) {
                recommendations.push(
                    "embeddings are stale; run a full graph_rebuild to regenerate".to_string(),
                );
            }
            (serde_json::to_value(counts).unwrap_or(Value::Null), status, recommendations)
        }
    };

    let vector_counts = match bridge.embeddings.vectors().counts(project).await {
        Ok(counts) => {
            let total: usize = counts.values().sum();
            json!({ "collections": counts, "total": total })
        }
        Err(e) => json!({ "error": e.to_string() }),
    };

    let watcher = bridge.sessions.watchers().status(session_key);

    let mut data = json!({
        "projectId": project,
        "workspaceRoot": ctx.workspace_root.to_string_lossy(),
        "sourceDir": ctx.source_dir.to_string_lossy(),
        "status": status,
        "graph": graph_counts,
        "vectors": vector_counts,
        "embeddingsReady": bridge.embeddings.is_ready(project),
        "watcher": watcher,
        "sessions": bridge.sessions.session_count(),
        "recommendations": recommendations,
    });
    if let Value::Object(ref mut map) = data {
        if let Value::Object(rebuild) = bridge.rebuilds.describe(project) {
            map.extend(rebuild);
        }
    }
    Ok(data)
}
