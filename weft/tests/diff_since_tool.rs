//! diff_since through the dispatch pipeline: anchors, type validation, and
//! the literal summary shape.

mod common;

use serde_json::json;
use weft::graph::{GraphNode, GraphStore, GraphTx, NodeType, RebuildKind};

async fn seed(store: &weft::MemoryGraphStore) {
    let node = |id: &str, from: i64| {
        let mut n = GraphNode::new(id, NodeType::Function, "default");
        n.valid_from = from;
        n
    };
    // Added after the anchor.
    store.upsert_node(node("fn:new", 2000)).await.unwrap();
    // Modified: existed before, re-upserted after.
    store.upsert_node(node("fn:changed", 500)).await.unwrap();
    store.upsert_node(node("fn:changed", 2100)).await.unwrap();
    // Removed after the anchor.
    store.upsert_node(node("fn:old", 400)).await.unwrap();
    store.close_node("default", "fn:old", 2200).await.unwrap();

    store
        .append_tx(GraphTx {
            id: "tx-anchor".to_string(),
            project_id: "default".to_string(),
            tx_type: RebuildKind::FullRebuild,
            mode: "full".to_string(),
            timestamp: 1000,
            source_dir: "/tmp/src".to_string(),
            git_commit: None,
            agent_id: None,
        })
        .await
        .unwrap();
    store
        .append_tx(GraphTx {
            id: "tx-later".to_string(),
            project_id: "default".to_string(),
            tx_type: RebuildKind::IncrementalRebuild,
            mode: "incremental".to_string(),
            timestamp: 2050,
            source_dir: "/tmp/src".to_string(),
            git_commit: None,
            agent_id: None,
        })
        .await
        .unwrap();
}

/// Scenario: one added, one removed, one modified since a numeric anchor,
/// with the exact summary string and the tx ids in the window.
#[tokio::test]
async fn diff_since_partitions_and_summarizes() {
    let (weft, store) = common::weft_with_memory_graph();
    seed(&store).await;

    let envelope = weft
        .call_tool(None, "diff_since", json!({"since": "1000"}))
        .await
        .unwrap();
    assert!(envelope.is_ok());
    let data = envelope.data().unwrap().clone();

    assert_eq!(data["added"].as_array().unwrap().len(), 1);
    assert_eq!(data["added"][0]["id"], json!("fn:new"));
    assert_eq!(data["removed"].as_array().unwrap().len(), 1);
    assert_eq!(data["removed"][0]["id"], json!("fn:old"));
    assert_eq!(data["modified"], json!(["fn:changed"]));
    assert_eq!(data["txIds"], json!(["tx-anchor", "tx-later"]));
    assert_eq!(
        data["summary"],
        json!("1 added, 1 removed, 1 modified since 1000.")
    );

    // Every reported row respects the anchor bound.
    for row in data["added"].as_array().unwrap() {
        assert!(row["validFrom"].as_i64().unwrap() >= 1000);
    }
    for row in data["removed"].as_array().unwrap() {
        assert!(row["validTo"].as_i64().unwrap() >= 1000);
    }
}

/// A transaction-id anchor resolves through the ladder.
#[tokio::test]
async fn diff_since_resolves_tx_anchor() {
    let (weft, store) = common::weft_with_memory_graph();
    seed(&store).await;

    let envelope = weft
        .call_tool(None, "diff_since", json!({"since": "tx-anchor"}))
        .await
        .unwrap();
    let data = envelope.data().unwrap();
    assert_eq!(data["anchor"]["mode"], json!("transaction"));
    assert_eq!(data["anchor"]["sinceTs"], json!(1000));
}

/// Input validation codes: missing anchor, bad types, unresolvable anchor.
#[tokio::test]
async fn diff_since_error_codes() {
    let (weft, store) = common::weft_with_memory_graph();
    seed(&store).await;

    let missing = weft.call_tool(None, "diff_since", json!({})).await.unwrap();
    assert_eq!(missing.error_code(), Some("DIFF_SINCE_INVALID_INPUT"));

    let bad_types = weft
        .call_tool(
            None,
            "diff_since",
            json!({"since": "1000", "types": ["COMMUNITY"]}),
        )
        .await
        .unwrap();
    assert_eq!(bad_types.error_code(), Some("DIFF_SINCE_INVALID_TYPES"));

    let no_anchor = weft
        .call_tool(None, "diff_since", json!({"since": "tx-unknown-xyz"}))
        .await
        .unwrap();
    assert_eq!(no_anchor.error_code(), Some("DIFF_SINCE_ANCHOR_NOT_FOUND"));
}
