//! Session isolation: each session observes exactly the workspace it bound.

mod common;

use serde_json::json;

/// Two sessions bind different workspaces; graph_health answers each with
/// its own binding, and an unbound session sees the default.
#[tokio::test]
async fn sessions_observe_their_own_workspace() {
    let (weft, _store) = common::weft_with_memory_graph();

    let root_a = tempfile::tempdir().unwrap();
    let root_b = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(root_a.path().join("src")).unwrap();
    std::fs::create_dir_all(root_b.path().join("src")).unwrap();

    let bind_a = weft
        .call_tool(
            Some("A"),
            "graph_set_workspace",
            json!({
                "workspaceRoot": root_a.path().to_string_lossy(),
                "sourceDir": "src",
                "projectId": "pa",
            }),
        )
        .await
        .unwrap();
    assert!(bind_a.is_ok(), "bind A failed: {:?}", bind_a);

    let bind_b = weft
        .call_tool(
            Some("B"),
            "graph_set_workspace",
            json!({
                "workspaceRoot": root_b.path().to_string_lossy(),
                "sourceDir": "src",
                "projectId": "pb",
            }),
        )
        .await
        .unwrap();
    assert!(bind_b.is_ok());

    let health_a = weft.call_tool(Some("A"), "graph_health", json!({})).await.unwrap();
    let data_a = health_a.data().unwrap();
    assert_eq!(data_a["projectId"], json!("pa"));
    assert_eq!(
        data_a["workspaceRoot"],
        json!(root_a.path().to_string_lossy())
    );

    let health_b = weft.call_tool(Some("B"), "graph_health", json!({})).await.unwrap();
    let data_b = health_b.data().unwrap();
    assert_eq!(data_b["projectId"], json!("pb"));
    assert_eq!(
        data_b["workspaceRoot"],
        json!(root_b.path().to_string_lossy())
    );

    // A session that never bound anything observes the process default.
    let health_c = weft.call_tool(Some("C"), "graph_health", json!({})).await.unwrap();
    assert_eq!(health_c.data().unwrap()["projectId"], json!("default"));
}

/// Cleanup removes the binding: the session falls back to the default.
#[tokio::test]
async fn cleanup_unbinds_the_session() {
    let (weft, _store) = common::weft_with_memory_graph();
    let root = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(root.path().join("src")).unwrap();

    weft.call_tool(
        Some("S"),
        "graph_set_workspace",
        json!({
            "workspaceRoot": root.path().to_string_lossy(),
            "projectId": "ps",
        }),
    )
    .await
    .unwrap();
    assert_eq!(
        weft.call_tool(Some("S"), "graph_health", json!({}))
            .await
            .unwrap()
            .data()
            .unwrap()["projectId"],
        json!("ps")
    );

    weft.cleanup_session("S");
    assert_eq!(
        weft.call_tool(Some("S"), "graph_health", json!({}))
            .await
            .unwrap()
            .data()
            .unwrap()["projectId"],
        json!("default")
    );
}

/// Missing workspace and missing source dir answer their distinct codes.
#[tokio::test]
async fn workspace_validation_errors() {
    let (weft, _store) = common::weft_with_memory_graph();

    let missing = weft
        .call_tool(
            Some("S"),
            "graph_set_workspace",
            json!({"workspaceRoot": "/definitely/not/here"}),
        )
        .await
        .unwrap();
    assert_eq!(missing.error_code(), Some("WORKSPACE_NOT_FOUND"));

    let root = tempfile::tempdir().unwrap();
    let no_src = weft
        .call_tool(
            Some("S"),
            "graph_set_workspace",
            json!({"workspaceRoot": root.path().to_string_lossy(), "sourceDir": "nope"}),
        )
        .await
        .unwrap();
    assert_eq!(no_src.error_code(), Some("SOURCE_DIR_NOT_FOUND"));
}
