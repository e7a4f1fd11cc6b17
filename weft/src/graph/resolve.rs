//! Element resolution: a textual reference (id, name, or path) to the unique
//! live graph node it denotes.

use thiserror::Error;

use super::{GraphNode, GraphStore, NodeType, StoreError};

/// Types an element reference can resolve to.
const ELEMENT_TYPES: &[NodeType] = &[NodeType::Function, NodeType::Class, NodeType::File];

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("element not found: {0}")]
    NotFound(String),
    #[error("ambiguous reference '{reference}': {candidates:?}")]
    Ambiguous {
        reference: String,
        candidates: Vec<String>,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Resolves `reference` against live FUNCTION/CLASS/FILE nodes.
///
/// Tried in order: exact id, exact `name` property, exact `path` property,
/// then suffix match on path and containment match on name. Each tier must
/// produce exactly one hit; multiple hits in the deciding tier is an
/// ambiguity, not a silent first-match.
pub async fn resolve_element(
    store: &dyn GraphStore,
    project_id: &str,
    reference: &str,
) -> Result<GraphNode, ResolveError> {
    let reference = reference.trim();
    if reference.is_empty() {
        return Err(ResolveError::NotFound("empty reference".to_string()));
    }

    if let Some(node) = store.live_node(project_id, reference).await? {
        return Ok(node);
    }

    let candidates = store.live_nodes(project_id, ELEMENT_TYPES).await?;

    let tiers: [Box<dyn Fn(&GraphNode) -> bool + '_>; 4] = [
        Box::new(|n| n.prop_str("name") == Some(reference)),
        Box::new(|n| n.prop_str("path") == Some(reference)),
        Box::new(|n| n.prop_str("path").map_or(false, |p| p.ends_with(reference))),
        Box::new(|n| n.prop_str("name").map_or(false, |name| name.contains(reference))),
    ];

    for tier in tiers.iter() {
        let hits: Vec<&GraphNode> = candidates.iter().filter(|n| tier(n)).collect();
        match hits.len() {
            0 => continue,
            1 => return Ok(hits[0].clone()),
            _ => {
                return Err(ResolveError::Ambiguous {
                    reference: reference.to_string(),
                    candidates: hits.iter().take(5).map(|n| n.id.clone()).collect(),
                })
            }
        }
    }

    Err(ResolveError::NotFound(reference.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::MemoryGraphStore;
    use serde_json::json;

    async fn seeded() -> MemoryGraphStore {
        let store = MemoryGraphStore::new();
        for (id, t, name, path) in [
            ("fn:parse", NodeType::Function, "parse", "src/parser.rs"),
            ("fn:parse_args", NodeType::Function, "parse_args", "src/cli.rs"),
            ("file:parser", NodeType::File, "parser.rs", "src/parser.rs"),
        ] {
            store
                .upsert_node(
                    GraphNode::new(id, t, "p")
                        .with_property("name", json!(name))
                        .with_property("path", json!(path)),
                )
                .await
                .unwrap();
        }
        store
    }

    /// Exact id wins before any property tier.
    #[tokio::test]
    async fn resolves_exact_id_first() {
        let store = seeded().await;
        let node = resolve_element(&store, "p", "fn:parse").await.unwrap();
        assert_eq!(node.id, "fn:parse");
    }

    /// Exact name resolves uniquely even when a looser tier would be ambiguous.
    #[tokio::test]
    async fn resolves_exact_name() {
        let store = seeded().await;
        let node = resolve_element(&store, "p", "parse_args").await.unwrap();
        assert_eq!(node.id, "fn:parse_args");
    }

    /// A path shared by two nodes is ambiguous, not first-match.
    #[tokio::test]
    async fn shared_path_is_ambiguous() {
        let store = seeded().await;
        let err = resolve_element(&store, "p", "src/parser.rs")
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::Ambiguous { .. }));
    }

    /// Unknown references are NotFound.
    #[tokio::test]
    async fn unknown_reference_not_found() {
        let store = seeded().await;
        let err = resolve_element(&store, "p", "does_not_exist_anywhere")
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::NotFound(_)));
    }
}
