//! Graph and retrieval tools: workspace binding, rebuilds, queries, health,
//! diffs, pattern lookup, explanation, contract validation, and the catalog
//! listing.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::bridge::Bridge;
use crate::dispatch::{normalize, CallContext, Tool, ToolCategory, ToolError, ToolRegistry, ToolSpec};
use crate::envelope::{codes, Envelope};
use crate::graph::resolve::{resolve_element, ResolveError};
use crate::graph::temporal::{self, apply_as_of, resolve_since_anchor};
use crate::graph::{NodeType, RebuildKind, RelType, StoreError};
use crate::rebuild::QueueOutcome;
use crate::retrieval::{RetrievalDispatcher, RetrievalMode};
use crate::session::ProjectContext;
use crate::watcher::WatcherSpec;

use super::{
    agent_arg, require_graph, resolve_context, session_key, str_arg, str_list, usize_arg,
};

pub(super) fn register(registry: &mut ToolRegistry, bridge: Arc<Bridge>) {
    registry.register(Arc::new(SetWorkspaceTool { bridge: bridge.clone() }));
    registry.register(Arc::new(RebuildTool { bridge: bridge.clone() }));
    registry.register(Arc::new(QueryTool { bridge: bridge.clone() }));
    registry.register(Arc::new(HealthTool { bridge: bridge.clone() }));
    registry.register(Arc::new(DiffSinceTool { bridge: bridge.clone() }));
    registry.register(Arc::new(FindPatternTool { bridge: bridge.clone() }));
    registry.register(Arc::new(CodeExplainTool { bridge: bridge.clone() }));
    registry.register(Arc::new(ContractValidateTool { bridge }));
}

fn object_schema(properties: Value, required: &[&str]) -> Value {
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

// ---------------------------------------------------------------------------
// graph_set_workspace
// ---------------------------------------------------------------------------

pub struct SetWorkspaceTool {
    bridge: Arc<Bridge>,
}

#[async_trait]
impl Tool for SetWorkspaceTool {
    fn name(&self) -> &'static str {
        "graph_set_workspace"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            category: ToolCategory::Graph,
            description: Some(
                "Bind the session to a workspace and start its file watcher.".to_string(),
            ),
            input_schema: object_schema(
                json!({
                    "workspaceRoot": {"type": "string"},
                    "sourceDir": {"type": "string", "default": "src"},
                    "projectId": {"type": "string"},
                }),
                &["workspaceRoot"],
            ),
        }
    }

    async fn run(&self, args: Value, ctx: &CallContext) -> Result<Envelope, ToolError> {
        let Some(root) = str_arg(&args, "workspaceRoot") else {
            return Ok(Envelope::err(
                codes::WORKSPACE_NOT_FOUND,
                "workspaceRoot is required",
            )
            .with_hint("pass workspaceRoot (alias workspacePath)"));
        };
        let root_path = std::path::PathBuf::from(root);
        if !root_path.is_dir() {
            return Ok(Envelope::err(
                codes::WORKSPACE_NOT_FOUND,
                format!("workspace not found: {}", root),
            ));
        }

        let source = str_arg(&args, "sourceDir").unwrap_or("src");
        let source_dir = ProjectContext::resolve_source_dir(&root_path, source);
        if !source_dir.is_dir() {
            return Ok(Envelope::err(
                codes::SOURCE_DIR_NOT_FOUND,
                format!("source dir not found: {}", source_dir.display()),
            ));
        }
        // The source dir must live under the workspace unless policy allows
        // escaping it.
        if !source_dir.starts_with(&root_path) && !self.bridge.policy.allow_path_fallback {
            return Ok(Envelope::err(
                codes::WORKSPACE_PATH_SANDBOXED,
                format!(
                    "source dir {} is outside the workspace root",
                    source_dir.display()
                ),
            )
            .with_hint("use a source dir under the workspace or enable the path fallback policy"));
        }

        let project_id = str_arg(&args, "projectId")
            .map(String::from)
            .or_else(|| {
                root_path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
            })
            .unwrap_or_else(|| "default".to_string());

        let context = ProjectContext::new(root_path.clone(), source_dir.clone(), project_id.clone());
        self.bridge.sessions.set_active_context(ctx.session(), context.clone());

        let mut watcher_started = false;
        if self.bridge.policy.watcher_enabled {
            let spec = WatcherSpec {
                workspace_root: root_path,
                source_dir,
                project_id: project_id.clone(),
                debounce_ms: self.bridge.policy.watcher_debounce_ms,
                ignore_patterns: self.bridge.policy.effective_ignore_patterns(),
            };
            match self.bridge.sessions.watchers().start(
                &session_key(ctx),
                spec,
                self.bridge.rebuilds.clone(),
            ) {
                Ok(()) => watcher_started = true,
                Err(e) => {
                    tracing::warn!(project = %project_id, error = %e, "watcher start failed");
                }
            }
        }

        let mut data = context.describe();
        data["watcherStarted"] = json!(watcher_started);
        Ok(Envelope::ok_with_summary(
            data,
            format!("workspace bound to project {}", project_id),
        ))
    }
}

// ---------------------------------------------------------------------------
// graph_rebuild
// ---------------------------------------------------------------------------

pub struct RebuildTool {
    bridge: Arc<Bridge>,
}

#[async_trait]
impl Tool for RebuildTool {
    fn name(&self) -> &'static str {
        "graph_rebuild"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            category: ToolCategory::Graph,
            description: Some(
                "Queue a background rebuild of the project graph.".to_string(),
            ),
            input_schema: object_schema(
                json!({
                    "workspaceRoot": {"type": "string"},
                    "sourceDir": {"type": "string"},
                    "projectId": {"type": "string"},
                    "mode": {"type": "string", "enum": ["full", "incremental"], "default": "full"},
                    "changedFiles": {"type": "array", "items": {"type": "string"}},
                    "gitCommit": {"type": "string"},
                }),
                &[],
            ),
        }
    }

    async fn run(&self, args: Value, ctx: &CallContext) -> Result<Envelope, ToolError> {
        let mut context = resolve_context(&self.bridge, &args, ctx);
        if !context.workspace_root.is_dir() {
            if self.bridge.policy.allow_path_fallback {
                let fallback = self.bridge.policy.workspace_fallback_root.clone();
                tracing::debug!(
                    requested = %context.workspace_root.display(),
                    fallback = %fallback.display(),
                    "workspace path fallback applied"
                );
                context.workspace_root = fallback;
            } else {
                return Ok(Envelope::err(
                    codes::WORKSPACE_PATH_SANDBOXED,
                    format!(
                        "workspace path {} is not visible to this runtime",
                        context.workspace_root.display()
                    ),
                )
                .with_hint("mount the workspace or enable the path fallback policy"));
            }
        }

        let kind = match str_arg(&args, "mode") {
            Some("incremental") => RebuildKind::IncrementalRebuild,
            _ => RebuildKind::FullRebuild,
        };
        let changed_files = str_list(&args, "changedFiles");
        let agent_id = agent_arg(&self.bridge, &args);
        let git_commit = str_arg(&args, "gitCommit").map(String::from);

        let project_id = context.project_id.clone();
        let outcome = self
            .bridge
            .rebuilds
            .queue_rebuild(context, kind, changed_files, Some(agent_id), git_commit)
            .await?;
        Ok(match outcome {
            QueueOutcome::Queued { tx_id } => Envelope::ok_with_summary(
                json!({
                    "status": "QUEUED",
                    "txId": tx_id,
                    "mode": kind.mode(),
                    "projectId": project_id,
                }),
                format!("{} rebuild queued", kind.mode()),
            ),
            QueueOutcome::Busy => Envelope::ok_with_summary(
                json!({ "status": "BUSY", "projectId": project_id }),
                "a rebuild is already running for this project; retry later",
            ),
        })
    }
}

// ---------------------------------------------------------------------------
// graph_query
// ---------------------------------------------------------------------------

pub struct QueryTool {
    bridge: Arc<Bridge>,
}

fn as_of_arg(args: &Value) -> Option<i64> {
    match args.get("asOf") {
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::String(s)) => temporal::parse_timestamp(s),
        _ => None,
    }
}

#[async_trait]
impl Tool for QueryTool {
    fn name(&self) -> &'static str {
        "graph_query"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            category: ToolCategory::Graph,
            description: Some(
                "Query the knowledge base: natural language (local/global/hybrid) or raw graph query."
                    .to_string(),
            ),
            input_schema: object_schema(
                json!({
                    "query": {"type": "string"},
                    "language": {"type": "string", "enum": ["natural", "cypher"], "default": "natural"},
                    "mode": {"type": "string", "enum": ["local", "global", "hybrid"], "default": "local"},
                    "limit": {"type": "integer", "default": 10},
                    "asOf": {"type": ["string", "integer"]},
                }),
                &["query"],
            ),
        }
    }

    async fn run(&self, args: Value, ctx: &CallContext) -> Result<Envelope, ToolError> {
        let Some(query) = str_arg(&args, "query") else {
            return Ok(Envelope::err(codes::GRAPH_QUERY_FAILED, "query is required"));
        };
        let context = resolve_context(&self.bridge, &args, ctx);
        let as_of = as_of_arg(&args);

        match str_arg(&args, "language").unwrap_or("natural") {
            "cypher" => self.run_cypher(query, as_of, args.get("asOf").is_some()).await,
            _ => {
                let mode = RetrievalMode::parse(str_arg(&args, "mode"));
                let limit = usize_arg(&args, "limit", 10);
                let dispatcher =
                    RetrievalDispatcher::new(self.bridge.graph(), self.bridge.retriever.clone());
                match dispatcher
                    .dispatch(&context.project_id, query, mode, limit, as_of)
                    .await
                {
                    Ok(results) => Ok(Envelope::ok(json!({ "results": results }))),
                    Err(crate::retrieval::RetrievalError::RetrieverUnavailable) => {
                        Ok(Envelope::err(
                            codes::RETRIEVER_UNAVAILABLE,
                            "local retrieval engine is not configured",
                        ))
                    }
                    Err(crate::retrieval::RetrievalError::GraphUnavailable) => Ok(Envelope::err(
                        codes::GRAPH_STORE_UNAVAILABLE,
                        "graph store is not connected",
                    )),
                    Err(e) => Ok(Envelope::err(codes::GRAPH_QUERY_FAILED, e.to_string())),
                }
            }
        }
    }
}

impl QueryTool {
    async fn run_cypher(
        &self,
        query: &str,
        as_of: Option<i64>,
        as_of_requested: bool,
    ) -> Result<Envelope, ToolError> {
        let graph = match require_graph(&self.bridge) {
            Ok(g) => g,
            Err(envelope) => return Ok(envelope),
        };

        let (text, params) = if as_of_requested {
            let Some(ts) = as_of else {
                return Ok(Envelope::err(
                    codes::GRAPH_QUERY_FAILED,
                    "asOf could not be parsed as a point in time",
                ));
            };
            let rewritten = apply_as_of(query);
            if rewritten == query {
                // Nothing to anchor the predicates to: as-of semantics
                // cannot be applied to this query shape.
                return Ok(Envelope::err(
                    codes::GRAPH_QUERY_ASOF_UNSUPPORTED_FOR_CYPHER,
                    "asOf requires labeled pattern variables to rewrite",
                ));
            }
            (rewritten, json!({ "asOfTs": ts }))
        } else {
            (query.to_string(), json!({}))
        };

        match graph.raw_query(&text, params).await {
            Ok(rows) => Ok(Envelope::ok(json!({ "rows": rows, "query": text }))),
            Err(StoreError::Unsupported(reason)) => {
                Ok(Envelope::err(codes::GRAPH_QUERY_FAILED, reason))
            }
            Err(e) => Ok(Envelope::err(codes::GRAPH_QUERY_EXCEPTION, e.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// graph_health
// ---------------------------------------------------------------------------

pub struct HealthTool {
    bridge: Arc<Bridge>,
}

#[async_trait]
impl Tool for HealthTool {
    fn name(&self) -> &'static str {
        "graph_health"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            category: ToolCategory::Graph,
            description: Some("Store counts, watcher state, drift, and recent build errors.".to_string()),
            input_schema: object_schema(json!({ "projectId": {"type": "string"} }), &[]),
        }
    }

    async fn run(&self, args: Value, ctx: &CallContext) -> Result<Envelope, ToolError> {
        let context = resolve_context(&self.bridge, &args, ctx);
        let data = crate::health::health_report(&self.bridge, &context, &session_key(ctx)).await?;
        let status = data["status"].as_str().unwrap_or("ok").to_string();
        Ok(Envelope::ok_with_summary(
            data,
            format!("project {}: {}", context.project_id, status),
        ))
    }
}

// ---------------------------------------------------------------------------
// diff_since
// ---------------------------------------------------------------------------

pub struct DiffSinceTool {
    bridge: Arc<Bridge>,
}

#[async_trait]
impl Tool for DiffSinceTool {
    fn name(&self) -> &'static str {
        "diff_since"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            category: ToolCategory::Graph,
            description: Some(
                "Added/removed/modified symbols since an anchor (tx id, timestamp, commit, or agent)."
                    .to_string(),
            ),
            input_schema: object_schema(
                json!({
                    "since": {"type": "string"},
                    "types": {"type": "array", "items": {"type": "string", "enum": ["FILE", "FUNCTION", "CLASS"]}},
                }),
                &["since"],
            ),
        }
    }

    async fn run(&self, args: Value, ctx: &CallContext) -> Result<Envelope, ToolError> {
        let Some(since) = str_arg(&args, "since") else {
            return Ok(Envelope::err(
                codes::DIFF_SINCE_INVALID_INPUT,
                "since is required",
            )
            .with_hint("pass a tx id, timestamp, git commit, or agent id"));
        };

        let mut types: Vec<NodeType> = Vec::new();
        for raw in str_list(&args, "types") {
            match NodeType::parse(&raw) {
                Some(t) if crate::diff::DIFFABLE_TYPES.contains(&t) => types.push(t),
                _ => {
                    return Ok(Envelope::err(
                        codes::DIFF_SINCE_INVALID_TYPES,
                        format!("unsupported diff type: {}", raw),
                    )
                    .with_hint("types must be among FILE, FUNCTION, CLASS"));
                }
            }
        }

        let graph = match require_graph(&self.bridge) {
            Ok(g) => g,
            Err(envelope) => return Ok(envelope),
        };
        let context = resolve_context(&self.bridge, &args, ctx);

        let Some(anchor) = resolve_since_anchor(graph.as_ref(), &context.project_id, since).await?
        else {
            return Ok(Envelope::err(
                codes::DIFF_SINCE_ANCHOR_NOT_FOUND,
                format!("anchor not resolvable: {}", since),
            ));
        };

        let report = crate::diff::diff_since(graph.as_ref(), &context.project_id, &anchor, &types)
            .await?;
        let summary = report.summary.clone();
        let mut data = serde_json::to_value(report)
            .map_err(|e| ToolError::Internal(e.to_string()))?;
        data["anchor"] = serde_json::to_value(&anchor).unwrap_or(Value::Null);
        Ok(Envelope::ok_with_summary(data, summary))
    }
}

// ---------------------------------------------------------------------------
// find_pattern
// ---------------------------------------------------------------------------

pub struct FindPatternTool {
    bridge: Arc<Bridge>,
}

#[async_trait]
impl Tool for FindPatternTool {
    fn name(&self) -> &'static str {
        "find_pattern"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            category: ToolCategory::Graph,
            description: Some("Find symbols whose name or path contains a pattern.".to_string()),
            input_schema: object_schema(
                json!({
                    "pattern": {"type": "string"},
                    "types": {"type": "array", "items": {"type": "string"}},
                    "limit": {"type": "integer", "default": 20},
                }),
                &["pattern"],
            ),
        }
    }

    async fn run(&self, args: Value, ctx: &CallContext) -> Result<Envelope, ToolError> {
        let Some(pattern) = str_arg(&args, "pattern") else {
            return Ok(Envelope::err(
                codes::FIND_PATTERN_INVALID_INPUT,
                "pattern is required",
            ));
        };
        let graph = match require_graph(&self.bridge) {
            Ok(g) => g,
            Err(envelope) => return Ok(envelope),
        };
        let context = resolve_context(&self.bridge, &args, ctx);
        let limit = usize_arg(&args, "limit", 20);

        let types: Vec<NodeType> = str_list(&args, "types")
            .iter()
            .filter_map(|t| NodeType::parse(t))
            .collect();
        let scan_types = if types.is_empty() {
            vec![NodeType::Function, NodeType::Class, NodeType::File]
        } else {
            types
        };

        let needle = pattern.to_lowercase();
        let mut matches: Vec<Value> = Vec::new();
        for node in graph.live_nodes(&context.project_id, &scan_types).await? {
            let name_hit = node
                .prop_str("name")
                .map_or(false, |n| n.to_lowercase().contains(&needle));
            let path_hit = node
                .prop_str("path")
                .map_or(false, |p| p.to_lowercase().contains(&needle));
            if name_hit || path_hit || node.id.to_lowercase().contains(&needle) {
                matches.push(json!({
                    "id": node.id,
                    "type": node.node_type,
                    "name": node.display_name(),
                    "path": node.prop_str("path"),
                }));
                if matches.len() == limit {
                    break;
                }
            }
        }
        let count = matches.len();
        Ok(Envelope::ok_with_summary(
            json!({ "matches": matches }),
            format!("{} match(es) for '{}'", count, pattern),
        ))
    }
}

// ---------------------------------------------------------------------------
// code_explain
// ---------------------------------------------------------------------------

pub struct CodeExplainTool {
    bridge: Arc<Bridge>,
}

#[async_trait]
impl Tool for CodeExplainTool {
    fn name(&self) -> &'static str {
        "code_explain"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            category: ToolCategory::Graph,
            description: Some(
                "Explain one element: its node, container, and call neighborhood.".to_string(),
            ),
            input_schema: object_schema(json!({ "element": {"type": "string"} }), &["element"]),
        }
    }

    async fn run(&self, args: Value, ctx: &CallContext) -> Result<Envelope, ToolError> {
        let Some(reference) = str_arg(&args, "element").or_else(|| str_arg(&args, "id")) else {
            return Ok(Envelope::err(
                codes::ELEMENT_NOT_FOUND,
                "element reference is required",
            ));
        };
        let graph = match require_graph(&self.bridge) {
            Ok(g) => g,
            Err(envelope) => return Ok(envelope),
        };
        let context = resolve_context(&self.bridge, &args, ctx);

        let node = match resolve_element(graph.as_ref(), &context.project_id, reference).await {
            Ok(node) => node,
            Err(ResolveError::Ambiguous { candidates, .. }) => {
                return Ok(Envelope::err(
                    codes::ELEMENT_NOT_FOUND,
                    format!("reference '{}' is ambiguous", reference),
                )
                .with_hint(format!("candidates: {}", candidates.join(", "))));
            }
            Err(ResolveError::NotFound(_)) => {
                return Ok(Envelope::err(
                    codes::ELEMENT_NOT_FOUND,
                    format!("no element matches '{}'", reference),
                ));
            }
            Err(ResolveError::Store(e)) => return Err(e.into()),
        };

        let project = context.project_id.as_str();
        let callers: Vec<String> = graph
            .relationships(project, RelType::Calls, None, Some(&node.id))
            .await?
            .into_iter()
            .map(|r| r.from)
            .collect();
        let callees: Vec<String> = graph
            .relationships(project, RelType::Calls, Some(&node.id), None)
            .await?
            .into_iter()
            .map(|r| r.to)
            .collect();
        let container = graph
            .relationships(project, RelType::Contains, None, Some(&node.id))
            .await?
            .into_iter()
            .next()
            .map(|r| r.from);

        let name = node.display_name().to_string();
        let kind = node.node_type;
        Ok(Envelope::ok_with_summary(
            json!({
                "element": node,
                "container": container,
                "callers": callers,
                "callees": callees,
            }),
            format!(
                "{} ({}): {} caller(s), {} callee(s)",
                name,
                kind.as_str(),
                callers.len(),
                callees.len()
            ),
        ))
    }
}

// ---------------------------------------------------------------------------
// contract_validate
// ---------------------------------------------------------------------------

pub struct ContractValidateTool {
    bridge: Arc<Bridge>,
}

#[async_trait]
impl Tool for ContractValidateTool {
    fn name(&self) -> &'static str {
        "contract_validate"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            category: ToolCategory::Graph,
            description: Some(
                "Pre-flight a tool call: returns normalized args and the warnings a live call would emit."
                    .to_string(),
            ),
            input_schema: object_schema(
                json!({
                    "tool": {"type": "string"},
                    "arguments": {"type": "object"},
                }),
                &["tool"],
            ),
        }
    }

    async fn run(&self, args: Value, _ctx: &CallContext) -> Result<Envelope, ToolError> {
        let Some(tool) = str_arg(&args, "tool") else {
            return Ok(Envelope::err(
                codes::CONTRACT_VALIDATE_INVALID_INPUT,
                "tool is required",
            ));
        };
        let arguments = args.get("arguments").cloned().unwrap_or_else(|| json!({}));
        if !arguments.is_object() {
            return Ok(Envelope::err(
                codes::CONTRACT_VALIDATE_INVALID_INPUT,
                "arguments must be an object",
            ));
        }
        // The bridge holds no registry; unknown names are still useful to
        // validate, so only the alias catalog is consulted here.
        let _ = &self.bridge;
        let (normalized, warnings) = normalize::normalize(tool, arguments);
        Ok(Envelope::ok(json!({
            "tool": tool,
            "normalized": normalized,
            "warnings": warnings,
        })))
    }
}

// ---------------------------------------------------------------------------
// tools_list
// ---------------------------------------------------------------------------

/// Lists the catalog. Holds a startup snapshot of every spec (the catalog is
/// fixed after boot).
pub struct ToolsListTool {
    specs: Vec<ToolSpec>,
}

impl ToolsListTool {
    pub fn new(specs: Vec<ToolSpec>) -> Self {
        Self { specs }
    }

    pub fn self_spec(&self) -> ToolSpec {
        self.spec()
    }
}

#[async_trait]
impl Tool for ToolsListTool {
    fn name(&self) -> &'static str {
        "tools_list"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            category: ToolCategory::Graph,
            description: Some("List every tool with its category and schema.".to_string()),
            input_schema: object_schema(json!({}), &[]),
        }
    }

    async fn run(&self, _args: Value, _ctx: &CallContext) -> Result<Envelope, ToolError> {
        Ok(Envelope::ok_with_summary(
            json!({ "tools": self.specs }),
            format!("{} tools", self.specs.len()),
        ))
    }
}
