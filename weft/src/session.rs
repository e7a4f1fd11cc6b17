//! Per-session project bindings.
//!
//! Every tool call runs against a [`ProjectContext`]: the session's bound
//! context when one exists, the process-wide default otherwise. The session
//! manager also owns the per-session watchers so that tearing a session down
//! reliably stops its watcher.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use dashmap::DashMap;
use serde_json::json;

use crate::watcher::WatcherSupervisor;

/// Key under which sessionless callers share state.
pub const DEFAULT_SESSION_KEY: &str = "__default__";

/// The project a call operates on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProjectContext {
    pub workspace_root: PathBuf,
    pub source_dir: PathBuf,
    pub project_id: String,
}

impl ProjectContext {
    pub fn new(
        workspace_root: impl Into<PathBuf>,
        source_dir: impl Into<PathBuf>,
        project_id: impl Into<String>,
    ) -> Self {
        Self {
            workspace_root: workspace_root.into(),
            source_dir: source_dir.into(),
            project_id: project_id.into(),
        }
    }

    /// Resolves a source dir that may be relative to the workspace root.
    pub fn resolve_source_dir(workspace_root: &Path, source_dir: &str) -> PathBuf {
        let p = Path::new(source_dir);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            workspace_root.join(p)
        }
    }

    /// Whether the source dir lies under the workspace root.
    pub fn source_under_workspace(&self) -> bool {
        self.source_dir.starts_with(&self.workspace_root)
    }

    /// Wire-facing snapshot.
    pub fn describe(&self) -> serde_json::Value {
        json!({
            "projectId": self.project_id,
            "workspaceRoot": self.workspace_root.to_string_lossy(),
            "sourceDir": self.source_dir.to_string_lossy(),
        })
    }
}

/// Maps session ids to project contexts and owns per-session watchers.
pub struct SessionManager {
    bindings: DashMap<String, ProjectContext>,
    default_context: RwLock<ProjectContext>,
    watchers: Arc<WatcherSupervisor>,
}

impl SessionManager {
    pub fn new(default_context: ProjectContext, watchers: Arc<WatcherSupervisor>) -> Self {
        Self {
            bindings: DashMap::new(),
            default_context: RwLock::new(default_context),
            watchers,
        }
    }

    pub fn watchers(&self) -> Arc<WatcherSupervisor> {
        self.watchers.clone()
    }

    /// Normalizes an optional session id to a map key.
    pub fn session_key(session_id: Option<&str>) -> &str {
        match session_id {
            Some(s) if !s.is_empty() => s,
            _ => DEFAULT_SESSION_KEY,
        }
    }

    /// The context a call under `session_id` observes: the session's binding,
    /// or the process-wide default for unbound/absent sessions.
    pub fn active_context(&self, session_id: Option<&str>) -> ProjectContext {
        let key = Self::session_key(session_id);
        if key != DEFAULT_SESSION_KEY {
            if let Some(ctx) = self.bindings.get(key) {
                return ctx.clone();
            }
        }
        self.default_context
            .read()
            .map(|c| c.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    /// Binds `ctx` to the session, or updates the process-wide default when
    /// no session id is present.
    pub fn set_active_context(&self, session_id: Option<&str>, ctx: ProjectContext) {
        let key = Self::session_key(session_id);
        if key == DEFAULT_SESSION_KEY {
            if let Ok(mut default) = self.default_context.write() {
                *default = ctx;
            }
        } else {
            self.bindings.insert(key.to_string(), ctx);
        }
    }

    /// Stops the session's watcher and removes its binding. A watcher that
    /// fails to stop is logged and does not keep the binding alive.
    pub fn cleanup_session(&self, session_id: &str) {
        let stopped = self.watchers.stop(session_id);
        if stopped {
            tracing::debug!(session = session_id, "stopped session watcher");
        }
        self.bindings.remove(session_id);
    }

    /// Tears down every session: all watchers stopped best-effort, both maps
    /// cleared.
    pub fn cleanup_all(&self) {
        self.watchers.stop_all();
        self.bindings.clear();
    }

    /// Number of live bindings (health reporting).
    pub fn session_count(&self) -> usize {
        self.bindings.len()
    }
}
