//! context_pack through the dispatch pipeline: seeds, materialized symbols,
//! memory enrichment, blockers, and budget trimming.

mod common;

use serde_json::json;
use weft::graph::{GraphNode, GraphRelationship, GraphStore, NodeType, RelType};

async fn seed_project(store: &weft::MemoryGraphStore, workspace: &std::path::Path) {
    std::fs::create_dir_all(workspace.join("src")).unwrap();
    std::fs::write(
        workspace.join("src/lexer.rs"),
        "pub fn lex(input: &str) -> Vec<Token> {\n    // tokenize input\n    Vec::new()\n}\n",
    )
    .unwrap();

    store
        .upsert_node(
            GraphNode::new("file:lexer", NodeType::File, "default")
                .with_property("name", json!("lexer.rs"))
                .with_property("path", json!("src/lexer.rs")),
        )
        .await
        .unwrap();
    store
        .upsert_node(
            GraphNode::new("fn:lex", NodeType::Function, "default")
                .with_property("name", json!("lex"))
                .with_property("path", json!("src/lexer.rs"))
                .with_property("startLine", json!(1))
                .with_property("endLine", json!(4)),
        )
        .await
        .unwrap();
    store
        .upsert_node(
            GraphNode::new("fn:parse", NodeType::Function, "default")
                .with_property("name", json!("parse")),
        )
        .await
        .unwrap();
    store
        .upsert_relationship(GraphRelationship::new(
            "file:lexer",
            "fn:lex",
            RelType::Contains,
            "default",
        ))
        .await
        .unwrap();
    store
        .upsert_relationship(GraphRelationship::new(
            "fn:parse",
            "fn:lex",
            RelType::Calls,
            "default",
        ))
        .await
        .unwrap();
}

/// Seeds match the task text; the pack materializes symbols with snippets
/// and call edges, lists another agent's claim as a blocker, and estimates
/// tokens.
#[tokio::test]
async fn pack_assembles_symbols_memory_and_blockers() {
    let (weft, store) = common::weft_with_memory_graph();
    let workspace = tempfile::tempdir().unwrap();
    seed_project(&store, workspace.path()).await;

    weft.call_tool(
        Some("S"),
        "graph_set_workspace",
        json!({
            "workspaceRoot": workspace.path().to_string_lossy(),
            "projectId": "default",
        }),
    )
    .await
    .unwrap();

    // A decision touching the lexer, and a rival claim on it.
    weft.call_tool(
        Some("S"),
        "episode_add",
        json!({
            "type": "DECISION",
            "content": "lexer stays table-driven",
            "outcome": "success",
            "metadata": {"rationale": "simpler recovery"},
            "entities": ["fn:lex"],
            "agentId": "other-agent",
        }),
    )
    .await
    .unwrap();
    weft.call_tool(
        Some("S"),
        "agent_claim",
        json!({"targetId": "fn:lex", "intent": "refactor", "agentId": "other-agent"}),
    )
    .await
    .unwrap();

    let envelope = weft
        .call_tool(
            Some("S"),
            "context_pack",
            json!({"task": "improve the lexer error recovery", "agentId": "me"}),
        )
        .await
        .unwrap();
    assert!(envelope.is_ok(), "{:?}", envelope);
    let data = envelope.data().unwrap().clone();

    let seeds = data["seeds"].as_array().unwrap();
    assert!(seeds.iter().any(|s| s == "fn:lex"));

    let symbols = data["coreSymbols"].as_array().unwrap();
    assert!(!symbols.is_empty() && symbols.len() <= 8);
    let lex = symbols.iter().find(|s| s["id"] == json!("fn:lex")).unwrap();
    assert_eq!(lex["path"], json!("src/lexer.rs"));
    assert!(lex["snippet"].as_str().unwrap().contains("fn lex"));
    assert_eq!(lex["callers"], json!(["fn:parse"]));

    assert_eq!(data["decisions"].as_array().unwrap().len(), 1);
    let blockers = data["blockers"].as_array().unwrap();
    assert_eq!(blockers.len(), 1);
    assert_eq!(blockers[0]["agentId"], json!("other-agent"));

    assert!(data["tokenEstimate"].as_u64().unwrap() > 0);
}

/// A tiny budget trims the pack instead of failing; the floor keeps at
/// least one symbol.
#[tokio::test]
async fn pack_trims_to_budget() {
    let (weft, store) = common::weft_with_memory_graph();
    let workspace = tempfile::tempdir().unwrap();
    seed_project(&store, workspace.path()).await;

    let envelope = weft
        .call_tool(
            None,
            "context_pack",
            json!({
                "task": "improve the lexer error recovery",
                "tokenBudget": 10,
                "workspaceRoot": workspace.path().to_string_lossy(),
            }),
        )
        .await
        .unwrap();
    assert!(envelope.is_ok());
    let data = envelope.data().unwrap();
    assert_eq!(data["coreSymbols"].as_array().unwrap().len(), 1);
}

/// A missing task description is invalid input.
#[tokio::test]
async fn pack_requires_task() {
    let (weft, _store) = common::weft_with_memory_graph();
    let envelope = weft.call_tool(None, "context_pack", json!({})).await.unwrap();
    assert_eq!(envelope.error_code(), Some("CONTEXT_PACK_INVALID_INPUT"));
}
