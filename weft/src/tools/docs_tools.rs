//! Documentation and project-setup tools.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::bridge::Bridge;
use crate::dispatch::{CallContext, Tool, ToolCategory, ToolError, ToolRegistry, ToolSpec};
use crate::envelope::{codes, Envelope};
use crate::graph::RebuildKind;
use crate::rebuild::QueueOutcome;
use crate::session::ProjectContext;

use super::{agent_arg, resolve_context, str_arg, str_list, usize_arg};

const COPILOT_INSTRUCTIONS_DIR: &str = ".github";
const COPILOT_INSTRUCTIONS_FILE: &str = "copilot-instructions.md";

pub(super) fn register(registry: &mut ToolRegistry, bridge: Arc<Bridge>) {
    registry.register(Arc::new(IndexDocsTool { bridge: bridge.clone() }));
    registry.register(Arc::new(SearchDocsTool { bridge: bridge.clone() }));
    registry.register(Arc::new(RefQueryTool { bridge: bridge.clone() }));
    registry.register(Arc::new(InitProjectSetupTool { bridge: bridge.clone() }));
    registry.register(Arc::new(SetupCopilotInstructionsTool { bridge }));
}

fn object_schema(properties: Value, required: &[&str]) -> Value {
    json!({ "type": "object", "properties": properties, "required": required })
}

fn docs_unavailable() -> Envelope {
    Envelope::err(
        codes::DOCS_ENGINE_UNAVAILABLE,
        "documentation engine is not configured",
    )
}

// ---------------------------------------------------------------------------
// index_docs / search_docs
// ---------------------------------------------------------------------------

pub struct IndexDocsTool {
    bridge: Arc<Bridge>,
}

#[async_trait]
impl Tool for IndexDocsTool {
    fn name(&self) -> &'static str {
        "index_docs"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            category: ToolCategory::Docs,
            description: Some("Index documentation files for search.".to_string()),
            input_schema: object_schema(
                json!({"paths": {"type": "array", "items": {"type": "string"}}}),
                &[],
            ),
        }
    }

    async fn run(&self, args: Value, ctx: &CallContext) -> Result<Envelope, ToolError> {
        let Some(docs) = self.bridge.docs.clone() else {
            return Ok(docs_unavailable());
        };
        let context = resolve_context(&self.bridge, &args, ctx);
        let paths = str_list(&args, "paths");
        match docs.index(&context.project_id, &paths).await {
            Ok(indexed) => Ok(Envelope::ok_with_summary(
                json!({ "indexed": indexed }),
                format!("{} document(s) indexed", indexed),
            )),
            Err(e) => Ok(Envelope::err(codes::GRAPH_QUERY_FAILED, e.to_string())),
        }
    }
}

pub struct SearchDocsTool {
    bridge: Arc<Bridge>,
}

#[async_trait]
impl Tool for SearchDocsTool {
    fn name(&self) -> &'static str {
        "search_docs"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            category: ToolCategory::Docs,
            description: Some("Search previously indexed documentation.".to_string()),
            input_schema: object_schema(
                json!({
                    "query": {"type": "string"},
                    "limit": {"type": "integer", "default": 10},
                }),
                &["query"],
            ),
        }
    }

    async fn run(&self, args: Value, ctx: &CallContext) -> Result<Envelope, ToolError> {
        let Some(query) = str_arg(&args, "query") else {
            return Ok(Envelope::err(codes::GRAPH_QUERY_FAILED, "query is required"));
        };
        let Some(docs) = self.bridge.docs.clone() else {
            return Ok(docs_unavailable());
        };
        let context = resolve_context(&self.bridge, &args, ctx);
        let limit = usize_arg(&args, "limit", 10);
        match docs.search(&context.project_id, query, limit).await {
            Ok(hits) => {
                let count = hits.len();
                Ok(Envelope::ok_with_summary(
                    json!({ "hits": hits }),
                    format!("{} hit(s)", count),
                ))
            }
            Err(e) => Ok(Envelope::err(codes::GRAPH_QUERY_FAILED, e.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// ref_query
// ---------------------------------------------------------------------------

pub struct RefQueryTool {
    bridge: Arc<Bridge>,
}

#[async_trait]
impl Tool for RefQueryTool {
    fn name(&self) -> &'static str {
        "ref_query"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            category: ToolCategory::Docs,
            description: Some("Query a configured reference repository.".to_string()),
            input_schema: object_schema(
                json!({
                    "repo": {"type": "string"},
                    "query": {"type": "string"},
                }),
                &["repo", "query"],
            ),
        }
    }

    async fn run(&self, args: Value, _ctx: &CallContext) -> Result<Envelope, ToolError> {
        let Some(refs) = self.bridge.refs.clone() else {
            return Ok(Envelope::err(
                codes::REF_REPO_MISSING,
                "no reference repositories are configured",
            ));
        };
        let Some(repo) = str_arg(&args, "repo") else {
            return Ok(Envelope::err(codes::REF_REPO_MISSING, "repo is required"));
        };
        let query = str_arg(&args, "query").unwrap_or_default();

        let known = refs
            .known_repos()
            .await
            .map_err(|e| ToolError::Internal(e.to_string()))?;
        if !known.iter().any(|r| r == repo) {
            return Ok(Envelope::err(
                codes::REF_REPO_NOT_FOUND,
                format!("unknown reference repo: {}", repo),
            )
            .with_hint(format!("known repos: {}", known.join(", "))));
        }
        match refs.query(repo, query).await {
            Ok(result) => Ok(Envelope::ok(result)),
            Err(e) => Ok(Envelope::err(codes::GRAPH_QUERY_FAILED, e.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// init_project_setup
// ---------------------------------------------------------------------------

pub struct InitProjectSetupTool {
    bridge: Arc<Bridge>,
}

#[async_trait]
impl Tool for InitProjectSetupTool {
    fn name(&self) -> &'static str {
        "init_project_setup"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            category: ToolCategory::Docs,
            description: Some(
                "Seed a project: bind the session workspace and queue a full rebuild.".to_string(),
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
                codes::INIT_MISSING_WORKSPACE,
                "workspaceRoot is required",
            ));
        };
        let root_path = std::path::PathBuf::from(root);
        if !root_path.is_dir() {
            return Ok(Envelope::err(
                codes::WORKSPACE_NOT_FOUND,
                format!("workspace not found: {}", root),
            ));
        }
        let source_dir = ProjectContext::resolve_source_dir(
            &root_path,
            str_arg(&args, "sourceDir").unwrap_or("src"),
        );
        if !source_dir.is_dir() {
            return Ok(Envelope::err(
                codes::SOURCE_DIR_NOT_FOUND,
                format!("source dir not found: {}", source_dir.display()),
            ));
        }
        let project_id = str_arg(&args, "projectId")
            .map(String::from)
            .or_else(|| root_path.file_name().map(|n| n.to_string_lossy().into_owned()))
            .unwrap_or_else(|| "default".to_string());

        let context = ProjectContext::new(root_path, source_dir, project_id.clone());
        self.bridge
            .sessions
            .set_active_context(ctx.session(), context.clone());

        let agent_id = agent_arg(&self.bridge, &args);
        let outcome = self
            .bridge
            .rebuilds
            .queue_rebuild(
                context,
                RebuildKind::FullRebuild,
                Vec::new(),
                Some(agent_id),
                None,
            )
            .await?;
        let rebuild = match outcome {
            QueueOutcome::Queued { tx_id } => json!({ "status": "QUEUED", "txId": tx_id }),
            QueueOutcome::Busy => json!({ "status": "BUSY" }),
        };

        Ok(Envelope::ok_with_summary(
            json!({
                "projectId": project_id,
                "workspaceBound": true,
                "rebuild": rebuild,
            }),
            format!("project {} initialized", project_id),
        ))
    }
}

// ---------------------------------------------------------------------------
// setup_copilot_instructions
// ---------------------------------------------------------------------------

pub struct SetupCopilotInstructionsTool {
    bridge: Arc<Bridge>,
}

#[async_trait]
impl Tool for SetupCopilotInstructionsTool {
    fn name(&self) -> &'static str {
        "setup_copilot_instructions"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            category: ToolCategory::Docs,
            description: Some(
                "Write agent instructions for this server into the workspace.".to_string(),
            ),
            input_schema: object_schema(json!({ "workspaceRoot": {"type": "string"} }), &[]),
        }
    }

    async fn run(&self, args: Value, ctx: &CallContext) -> Result<Envelope, ToolError> {
        let context = resolve_context(&self.bridge, &args, ctx);
        if !context.workspace_root.is_dir() {
            return Ok(Envelope::err(
                codes::COPILOT_INSTR_TARGET_NOT_FOUND,
                format!(
                    "workspace not found: {}",
                    context.workspace_root.display()
                ),
            ));
        }

        let dir = context.workspace_root.join(COPILOT_INSTRUCTIONS_DIR);
        if let Err(e) = tokio::fs::create_dir_all(&dir).await {
            return Ok(Envelope::err(
                codes::COPILOT_INSTR_TARGET_NOT_FOUND,
                format!("cannot create {}: {}", dir.display(), e),
            ));
        }
        let path = dir.join(COPILOT_INSTRUCTIONS_FILE);
        let content = instructions_content(&context.project_id);
        if let Err(e) = tokio::fs::write(&path, content).await {
            return Ok(Envelope::err(
                codes::COPILOT_INSTR_TARGET_NOT_FOUND,
                format!("cannot write {}: {}", path.display(), e),
            ));
        }

        let mut data = json!({ "path": path.to_string_lossy() });
        crate::envelope::relativize_paths(&mut data, &context.workspace_root.to_string_lossy());
        Ok(Envelope::ok_with_summary(data, "instructions written"))
    }
}

fn instructions_content(project_id: &str) -> String {
    format!(
        "# Working with the {project} knowledge base\n\
         \n\
         This workspace is indexed by a code-intelligence server. Before editing:\n\
         \n\
         - `graph_query` / `semantic_search` to find relevant code.\n\
         - `context_pack` with your task description for a budgeted briefing.\n\
         - `agent_claim` the files or tasks you are about to change; release when done.\n\
         - Record decisions with `episode_add` (type DECISION, with a rationale).\n\
         - `graph_rebuild` after large changes; `graph_health` if results look stale.\n",
        project = project_id
    )
}
