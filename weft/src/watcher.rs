//! Per-session filesystem watching.
//!
//! One watcher per session key. Raw notify events are filtered against the
//! ignore patterns and coalesced by a debounce task; after `debounce_ms` of
//! quiescence the accumulated paths are handed to the [`BatchHandler`] as one
//! batch. The handler is awaited before the next batch can fire, so
//! per-session rebuilds serialize on the session.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

/// Parameters for one session watcher.
#[derive(Clone, Debug)]
pub struct WatcherSpec {
    pub workspace_root: PathBuf,
    pub source_dir: PathBuf,
    pub project_id: String,
    pub debounce_ms: u64,
    pub ignore_patterns: Vec<String>,
}

/// One debounced batch of filesystem changes.
#[derive(Clone, Debug)]
pub struct ChangeBatch {
    pub project_id: String,
    pub workspace_root: PathBuf,
    pub source_dir: PathBuf,
    pub changed_files: Vec<String>,
}

/// Receives debounced batches. Implemented by the rebuild orchestrator.
#[async_trait]
pub trait BatchHandler: Send + Sync {
    async fn handle(&self, batch: ChangeBatch);
}

/// Watcher lifecycle phase, as reported by health.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WatcherPhase {
    NotStarted,
    Idle,
    Coalescing,
    Rebuilding,
}

/// Point-in-time watcher state.
#[derive(Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WatcherStatus {
    pub phase: WatcherPhase,
    pub pending_changes: usize,
}

impl WatcherStatus {
    pub fn not_started() -> Self {
        Self {
            phase: WatcherPhase::NotStarted,
            pending_changes: 0,
        }
    }
}

#[derive(Debug, Error)]
pub enum WatcherError {
    #[error("filesystem watch error: {0}")]
    Notify(#[from] notify::Error),
}

struct Shared {
    status: Mutex<WatcherStatus>,
}

impl Shared {
    fn set(&self, phase: WatcherPhase, pending: usize) {
        if let Ok(mut status) = self.status.lock() {
            status.phase = phase;
            status.pending_changes = pending;
        }
    }
}

/// Handle to one running watcher. Dropping the handle (or calling
/// [`WatcherHandle::stop`]) tears down the notify watcher and the debounce
/// task.
pub struct WatcherHandle {
    shared: Arc<Shared>,
    stop_tx: Option<oneshot::Sender<()>>,
    // Kept alive for the watcher's lifetime; dropping unregisters the watch.
    _watcher: RecommendedWatcher,
}

impl WatcherHandle {
    pub fn status(&self) -> WatcherStatus {
        self.shared
            .status
            .lock()
            .map(|s| *s)
            .unwrap_or_else(|_| WatcherStatus::not_started())
    }

    fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for WatcherHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// True when any path component matches an ignore pattern.
fn is_ignored(path: &Path, patterns: &[String]) -> bool {
    path.components().any(|c| {
        let component = c.as_os_str().to_string_lossy();
        patterns.iter().any(|p| component == p.as_str())
    })
}

/// Owns every session watcher. At most one watcher per session key; starting
/// a new one stops the previous one first.
#[derive(Default)]
pub struct WatcherSupervisor {
    watchers: DashMap<String, WatcherHandle>,
}

impl WatcherSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a watcher for `session_key`, replacing any existing one.
    pub fn start(
        &self,
        session_key: &str,
        spec: WatcherSpec,
        handler: Arc<dyn BatchHandler>,
    ) -> Result<(), WatcherError> {
        // Replace-first keeps the one-watcher-per-session invariant even if
        // the new watcher fails to construct below.
        self.stop(session_key);

        let shared = Arc::new(Shared {
            status: Mutex::new(WatcherStatus {
                phase: WatcherPhase::Idle,
                pending_changes: 0,
            }),
        });

        let (event_tx, event_rx) = mpsc::unbounded_channel::<PathBuf>();
        let ignore = spec.ignore_patterns.clone();
        let mut watcher = RecommendedWatcher::new(
            move |res: Result<notify::Event, notify::Error>| {
                let Ok(event) = res else { return };
                if !matches!(
                    event.kind,
                    notify::EventKind::Create(_)
                        | notify::EventKind::Modify(_)
                        | notify::EventKind::Remove(_)
                ) {
                    return;
                }
                for path in event.paths {
                    if !is_ignored(&path, &ignore) {
                        let _ = event_tx.send(path);
                    }
                }
            },
            notify::Config::default(),
        )?;
        watcher.watch(&spec.source_dir, RecursiveMode::Recursive)?;

        let (stop_tx, stop_rx) = oneshot::channel();
        tokio::spawn(debounce_loop(spec, shared.clone(), event_rx, stop_rx, handler));

        self.watchers.insert(
            session_key.to_string(),
            WatcherHandle {
                shared,
                stop_tx: Some(stop_tx),
                _watcher: watcher,
            },
        );
        Ok(())
    }

    /// Stops the session's watcher. Returns whether one was running.
    pub fn stop(&self, session_key: &str) -> bool {
        match self.watchers.remove(session_key) {
            Some((_, mut handle)) => {
                handle.stop();
                true
            }
            None => false,
        }
    }

    /// Stops every watcher, best-effort.
    pub fn stop_all(&self) {
        let keys: Vec<String> = self.watchers.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            self.stop(&key);
        }
    }

    pub fn status(&self, session_key: &str) -> WatcherStatus {
        self.watchers
            .get(session_key)
            .map(|h| h.status())
            .unwrap_or_else(WatcherStatus::not_started)
    }

    pub fn is_running(&self, session_key: &str) -> bool {
        self.watchers.contains_key(session_key)
    }
}

async fn debounce_loop(
    spec: WatcherSpec,
    shared: Arc<Shared>,
    mut event_rx: mpsc::UnboundedReceiver<PathBuf>,
    mut stop_rx: oneshot::Receiver<()>,
    handler: Arc<dyn BatchHandler>,
) {
    let debounce = Duration::from_millis(spec.debounce_ms.max(1));
    let mut pending: BTreeSet<String> = BTreeSet::new();
    let mut deadline: Option<Instant> = None;

    loop {
        let quiescent_at = deadline.unwrap_or_else(Instant::now);
        tokio::select! {
            _ = &mut stop_rx => break,
            received = event_rx.recv() => {
                match received {
                    Some(path) => {
                        pending.insert(path.to_string_lossy().into_owned());
                        deadline = Some(Instant::now() + debounce);
                        shared.set(WatcherPhase::Coalescing, pending.len());
                    }
                    None => break,
                }
            }
            _ = tokio::time::sleep_until(quiescent_at), if deadline.is_some() => {
                deadline = None;
                let changed_files: Vec<String> = std::mem::take(&mut pending).into_iter().collect();
                if changed_files.is_empty() {
                    shared.set(WatcherPhase::Idle, 0);
                    continue;
                }
                tracing::debug!(
                    project = %spec.project_id,
                    files = changed_files.len(),
                    "watcher batch fired"
                );
                shared.set(WatcherPhase::Rebuilding, changed_files.len());
                handler
                    .handle(ChangeBatch {
                        project_id: spec.project_id.clone(),
                        workspace_root: spec.workspace_root.clone(),
                        source_dir: spec.source_dir.clone(),
                        changed_files,
                    })
                    .await;
                shared.set(WatcherPhase::Idle, 0);
            }
        }
    }
    shared.set(WatcherPhase::NotStarted, 0);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::Mutex as AsyncMutex;

    struct Collector {
        batches: AsyncMutex<Vec<ChangeBatch>>,
        notify_tx: mpsc::UnboundedSender<()>,
    }

    #[async_trait]
    impl BatchHandler for Collector {
        async fn handle(&self, batch: ChangeBatch) {
            self.batches.lock().await.push(batch);
            let _ = self.notify_tx.send(());
        }
    }

    fn spec(dir: &Path) -> WatcherSpec {
        WatcherSpec {
            workspace_root: dir.to_path_buf(),
            source_dir: dir.to_path_buf(),
            project_id: "pw".to_string(),
            debounce_ms: 50,
            ignore_patterns: vec!["node_modules".to_string(), ".git".to_string()],
        }
    }

    /// Ignore patterns match whole path components.
    #[test]
    fn ignored_components() {
        let patterns = vec!["node_modules".to_string(), ".git".to_string()];
        assert!(is_ignored(
            Path::new("/w/node_modules/x/index.js"),
            &patterns
        ));
        assert!(is_ignored(Path::new("/w/.git/HEAD"), &patterns));
        assert!(!is_ignored(Path::new("/w/src/node_modules.rs"), &patterns));
    }

    /// Rapid writes coalesce into a single batch containing both files.
    #[tokio::test]
    async fn coalesces_changes_into_one_batch() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = WatcherSupervisor::new();
        let (notify_tx, mut notify_rx) = mpsc::unbounded_channel();
        let collector = Arc::new(Collector {
            batches: AsyncMutex::new(Vec::new()),
            notify_tx,
        });
        supervisor
            .start("s1", spec(dir.path()), collector.clone())
            .unwrap();

        // Give the watcher a moment to register before writing.
        tokio::time::sleep(Duration::from_millis(100)).await;
        std::fs::write(dir.path().join("a.rs"), "a").unwrap();
        std::fs::write(dir.path().join("b.rs"), "b").unwrap();

        tokio::time::timeout(Duration::from_secs(5), notify_rx.recv())
            .await
            .expect("batch within deadline");

        let batches = collector.batches.lock().await;
        assert!(!batches.is_empty());
        let all: Vec<&str> = batches
            .iter()
            .flat_map(|b| b.changed_files.iter().map(String::as_str))
            .collect();
        assert!(all.iter().any(|f| f.ends_with("a.rs")));
        assert!(all.iter().any(|f| f.ends_with("b.rs")));
        assert_eq!(batches[0].project_id, "pw");

        drop(batches);
        supervisor.stop_all();
    }

    /// Starting a second watcher under the same key replaces the first.
    #[tokio::test]
    async fn restart_replaces_previous_watcher() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = WatcherSupervisor::new();
        let (notify_tx, _notify_rx) = mpsc::unbounded_channel();
        let collector = Arc::new(Collector {
            batches: AsyncMutex::new(Vec::new()),
            notify_tx,
        });

        supervisor
            .start("s1", spec(dir.path()), collector.clone())
            .unwrap();
        supervisor.start("s1", spec(dir.path()), collector).unwrap();
        assert!(supervisor.is_running("s1"));
        assert_eq!(supervisor.watchers.len(), 1);

        assert!(supervisor.stop("s1"));
        assert!(!supervisor.is_running("s1"));
        assert_eq!(
            supervisor.status("s1").phase,
            WatcherPhase::NotStarted
        );
    }
}
