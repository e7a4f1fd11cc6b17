//! The fixed tool catalog.
//!
//! One small struct per tool, each holding the shared [`Bridge`]. Handlers
//! validate already-normalized args, delegate to the engines, and shape
//! envelopes; none of them touch the wire format directly.

mod coordination_tools;
mod docs_tools;
mod episode_tools;
mod graph_tools;
mod progress_tools;
mod semantic_tools;
mod test_tools;

use std::sync::Arc;

use serde_json::Value;

use crate::bridge::Bridge;
use crate::dispatch::{CallContext, ToolRegistry};
use crate::envelope::{codes, Envelope};
use crate::graph::GraphStore;
use crate::session::{ProjectContext, SessionManager};

/// Builds the full registry over one bridge.
pub fn build_registry(bridge: Arc<Bridge>) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    graph_tools::register(&mut registry, bridge.clone());
    semantic_tools::register(&mut registry, bridge.clone());
    test_tools::register(&mut registry, bridge.clone());
    progress_tools::register(&mut registry, bridge.clone());
    episode_tools::register(&mut registry, bridge.clone());
    coordination_tools::register(&mut registry, bridge.clone());
    docs_tools::register(&mut registry, bridge.clone());

    // tools_list snapshots the catalog, including itself.
    let mut specs = registry.specs();
    let list_tool = graph_tools::ToolsListTool::new(Vec::new());
    specs.push(list_tool.self_spec());
    specs.sort_by(|a, b| a.name.cmp(&b.name));
    registry.register(Arc::new(graph_tools::ToolsListTool::new(specs)));
    registry
}

// ---------------------------------------------------------------------------
// Shared argument helpers
// ---------------------------------------------------------------------------

pub(crate) fn str_arg<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key).and_then(Value::as_str).map(str::trim).filter(|s| !s.is_empty())
}

pub(crate) fn str_list(args: &Value, key: &str) -> Vec<String> {
    args.get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

pub(crate) fn usize_arg(args: &Value, key: &str, default: usize) -> usize {
    args.get(key)
        .and_then(Value::as_u64)
        .map(|n| n as usize)
        .unwrap_or(default)
}

pub(crate) fn bool_arg(args: &Value, key: &str, default: bool) -> bool {
    args.get(key).and_then(Value::as_bool).unwrap_or(default)
}

/// The agent id of a call: explicit argument, else the configured default.
pub(crate) fn agent_arg(bridge: &Bridge, args: &Value) -> String {
    str_arg(args, "agentId")
        .map(String::from)
        .unwrap_or_else(|| bridge.policy.default_agent_id.clone())
}

/// Resolves the project context a call operates on: the session binding,
/// overridden by any explicit workspaceRoot/sourceDir/projectId arguments.
pub(crate) fn resolve_context(bridge: &Bridge, args: &Value, ctx: &CallContext) -> ProjectContext {
    let mut resolved = bridge.sessions.active_context(ctx.session());
    if let Some(root) = str_arg(args, "workspaceRoot") {
        resolved.workspace_root = root.into();
    }
    if let Some(source) = str_arg(args, "sourceDir") {
        resolved.source_dir =
            ProjectContext::resolve_source_dir(&resolved.workspace_root, source);
    }
    if let Some(project) = str_arg(args, "projectId") {
        resolved.project_id = project.to_string();
    }
    resolved
}

/// Session key used for watcher and health lookups.
pub(crate) fn session_key(ctx: &CallContext) -> String {
    SessionManager::session_key(ctx.session()).to_string()
}

/// The graph store, or the standard unavailable envelope.
pub(crate) fn require_graph(bridge: &Bridge) -> Result<Arc<dyn GraphStore>, Envelope> {
    bridge.graph().ok_or_else(|| {
        Envelope::err(codes::GRAPH_STORE_UNAVAILABLE, "graph store is not connected")
            .with_hint("configure a graph store and restart")
    })
}
