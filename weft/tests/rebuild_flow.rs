//! Rebuild orchestration end to end: queued rebuilds, the watcher batch
//! path, post-build hooks, and single-flighting.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use weft::bridge::{BuildEngine, BuildOutcome, BuildRequest, EngineError};
use weft::graph::{GraphNode, GraphStore, NodeType, RebuildKind};
use weft::watcher::{BatchHandler, ChangeBatch};
use weft::{MemoryGraphStore, WeftBuilder};

/// Scenario: a watcher batch drives an incremental rebuild — a GRAPH_TX with
/// mode incremental and the batch's sourceDir, a build-engine call with the
/// same changedFiles, embedding readiness flipped to false, and health
/// reporting lastGraphRebuildMode == "incremental".
#[tokio::test]
async fn watcher_batch_drives_incremental_rebuild() {
    let store = Arc::new(MemoryGraphStore::new());
    let (engine, _done) = common::RecordingBuildEngine::new();
    let weft = WeftBuilder::new(common::quiet_policy())
        .graph(store.clone())
        .build_engine(engine.clone())
        .build();

    // Seed one entity and generate embeddings so readiness starts true.
    store
        .upsert_node(
            GraphNode::new("fn:a", NodeType::Function, "pw")
                .with_property("name", json!("a")),
        )
        .await
        .unwrap();
    weft.bridge
        .embeddings
        .generate_all(store.as_ref(), "pw")
        .await
        .unwrap();
    assert!(weft.bridge.embeddings.is_ready("pw"));

    let batch = ChangeBatch {
        project_id: "pw".to_string(),
        workspace_root: "/tmp/w".into(),
        source_dir: "/tmp/w/src".into(),
        changed_files: vec!["src/a.ts".to_string(), "src/b.ts".to_string()],
    };
    weft.bridge.rebuilds.handle(batch).await;

    // (a) transaction anchor with incremental mode and the batch source dir.
    let txs = store.txs_since("pw", 0).await.unwrap();
    assert_eq!(txs.len(), 1);
    assert_eq!(txs[0].mode, "incremental");
    assert_eq!(txs[0].tx_type, RebuildKind::IncrementalRebuild);
    assert_eq!(txs[0].source_dir, "/tmp/w/src");

    // (b) the build engine saw the same changed files.
    let requests = engine.requests.lock().await;
    assert_eq!(requests.len(), 1);
    assert_eq!(
        requests[0].changed_files,
        vec!["src/a.ts".to_string(), "src/b.ts".to_string()]
    );
    assert_eq!(requests[0].kind, RebuildKind::IncrementalRebuild);
    drop(requests);

    // (c) incremental marks embeddings dirty.
    assert!(!weft.bridge.embeddings.is_ready("pw"));

    // (d) health reports the rebuild mode.
    let health = weft
        .call_tool(None, "graph_health", json!({"projectId": "pw"}))
        .await
        .unwrap();
    assert_eq!(
        health.data().unwrap()["lastGraphRebuildMode"],
        json!("incremental")
    );
}

/// Explicit graph_rebuild answers QUEUED immediately and records the anchor
/// before the build engine runs; a full rebuild regenerates embeddings.
#[tokio::test]
async fn explicit_rebuild_queues_and_regenerates() {
    let store = Arc::new(MemoryGraphStore::new());
    let (engine, mut done) = common::RecordingBuildEngine::new();
    let weft = WeftBuilder::new(common::quiet_policy())
        .graph(store.clone())
        .build_engine(engine.clone())
        .build();

    let root = tempfile::tempdir().unwrap();
    store
        .upsert_node(
            GraphNode::new("fn:a", NodeType::Function, "pq")
                .with_property("name", json!("a")),
        )
        .await
        .unwrap();

    let queued = weft
        .call_tool(
            None,
            "graph_rebuild",
            json!({
                "workspaceRoot": root.path().to_string_lossy(),
                "projectId": "pq",
            }),
        )
        .await
        .unwrap();
    let data = queued.data().unwrap().clone();
    assert_eq!(data["status"], json!("QUEUED"));
    let tx_id = data["txId"].as_str().unwrap().to_string();
    assert!(tx_id.starts_with("tx-"));

    // The anchor is visible even before the background build completes.
    assert!(store
        .find_tx("pq", weft::graph::TxAnchorField::Id, &tx_id)
        .await
        .unwrap()
        .is_some());

    tokio::time::timeout(Duration::from_secs(5), done.recv())
        .await
        .expect("build ran");
    // Wait for post-build hooks to settle.
    for _ in 0..50 {
        if weft.bridge.embeddings.is_ready("pq") {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(weft.bridge.embeddings.is_ready("pq"));
    assert!(store.lexical_index_ready("pq"));
}

/// A second rebuild while one is active answers BUSY and writes no anchor.
#[tokio::test]
async fn concurrent_rebuild_is_busy() {
    struct StallingEngine {
        release: tokio::sync::Mutex<Option<tokio::sync::oneshot::Receiver<()>>>,
    }

    #[async_trait::async_trait]
    impl BuildEngine for StallingEngine {
        async fn build(&self, _request: BuildRequest) -> Result<BuildOutcome, EngineError> {
            if let Some(rx) = self.release.lock().await.take() {
                let _ = rx.await;
            }
            Ok(BuildOutcome::default())
        }

        async fn detect_communities(&self, _project_id: &str) -> Result<usize, EngineError> {
            Ok(0)
        }
    }

    let store = Arc::new(MemoryGraphStore::new());
    let (release_tx, release_rx) = tokio::sync::oneshot::channel();
    let weft = WeftBuilder::new(common::quiet_policy())
        .graph(store.clone())
        .build_engine(Arc::new(StallingEngine {
            release: tokio::sync::Mutex::new(Some(release_rx)),
        }))
        .build();

    let root = tempfile::tempdir().unwrap();
    let args = json!({
        "workspaceRoot": root.path().to_string_lossy(),
        "projectId": "pb",
    });

    let first = weft.call_tool(None, "graph_rebuild", args.clone()).await.unwrap();
    assert_eq!(first.data().unwrap()["status"], json!("QUEUED"));

    let second = weft.call_tool(None, "graph_rebuild", args).await.unwrap();
    assert_eq!(second.data().unwrap()["status"], json!("BUSY"));

    // Only the first attempt recorded an anchor.
    assert_eq!(store.txs_since("pb", 0).await.unwrap().len(), 1);
    let _ = release_tx.send(());
}

/// A sandboxed workspace path is rejected when the fallback policy is off.
#[tokio::test]
async fn sandboxed_workspace_rejected() {
    let (weft, _store) = common::weft_with_memory_graph();
    let rejected = weft
        .call_tool(
            None,
            "graph_rebuild",
            json!({"workspaceRoot": "/not/mounted/here"}),
        )
        .await
        .unwrap();
    assert_eq!(rejected.error_code(), Some("WORKSPACE_PATH_SANDBOXED"));
}

/// Build failures land in the bounded ledger and surface through health.
#[tokio::test]
async fn build_failures_reach_the_ledger() {
    struct FailingEngine;

    #[async_trait::async_trait]
    impl BuildEngine for FailingEngine {
        async fn build(&self, _request: BuildRequest) -> Result<BuildOutcome, EngineError> {
            Err(EngineError::Failed("parser crashed".to_string()))
        }

        async fn detect_communities(&self, _project_id: &str) -> Result<usize, EngineError> {
            Ok(0)
        }
    }

    let store = Arc::new(MemoryGraphStore::new());
    let weft = WeftBuilder::new(common::quiet_policy())
        .graph(store.clone())
        .build_engine(Arc::new(FailingEngine))
        .build();

    weft.bridge
        .rebuilds
        .handle(ChangeBatch {
            project_id: "pf".to_string(),
            workspace_root: "/tmp/w".into(),
            source_dir: "/tmp/w/src".into(),
            changed_files: vec!["src/a.ts".to_string()],
        })
        .await;

    let errors = weft.bridge.rebuilds.recent_errors("pf");
    assert_eq!(errors.len(), 1);
    assert!(errors[0].error.contains("parser crashed"));

    let health = weft
        .call_tool(None, "graph_health", json!({"projectId": "pf"}))
        .await
        .unwrap();
    let recent = health.data().unwrap()["recentBuildErrors"].as_array().unwrap().clone();
    assert_eq!(recent.len(), 1);
}
