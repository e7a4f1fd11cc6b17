//! Shared fixtures: a weft core over in-memory stores, with a recording
//! build engine.

#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use weft::bridge::{BuildEngine, BuildOutcome, BuildRequest, EngineError};
use weft::{MemoryGraphStore, Weft, WeftBuilder};

/// Policy for tests: no watcher, no HTTP endpoints.
pub fn quiet_policy() -> env_config::Policy {
    env_config::Policy {
        watcher_enabled: false,
        ..env_config::Policy::default()
    }
}

/// Build engine that records every request and reports when it ran.
pub struct RecordingBuildEngine {
    pub requests: tokio::sync::Mutex<Vec<BuildRequest>>,
    pub done_tx: tokio::sync::mpsc::UnboundedSender<()>,
}

impl RecordingBuildEngine {
    pub fn new() -> (Arc<Self>, tokio::sync::mpsc::UnboundedReceiver<()>) {
        let (done_tx, done_rx) = tokio::sync::mpsc::unbounded_channel();
        (
            Arc::new(Self {
                requests: tokio::sync::Mutex::new(Vec::new()),
                done_tx,
            }),
            done_rx,
        )
    }
}

#[async_trait]
impl BuildEngine for RecordingBuildEngine {
    async fn build(&self, request: BuildRequest) -> Result<BuildOutcome, EngineError> {
        self.requests.lock().await.push(request);
        let _ = self.done_tx.send(());
        Ok(BuildOutcome::default())
    }

    async fn detect_communities(&self, _project_id: &str) -> Result<usize, EngineError> {
        Ok(0)
    }
}

/// A weft core over a fresh in-memory graph store. Returns the store too so
/// tests can seed and inspect it directly.
pub fn weft_with_memory_graph() -> (Weft, Arc<MemoryGraphStore>) {
    let store = Arc::new(MemoryGraphStore::new());
    let weft = WeftBuilder::new(quiet_policy())
        .graph(store.clone())
        .build();
    (weft, store)
}
