//! Progress tools: task and feature tracking over TASK/FEATURE nodes.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::bridge::Bridge;
use crate::dispatch::{CallContext, Tool, ToolCategory, ToolError, ToolRegistry, ToolSpec};
use crate::envelope::{codes, Envelope};
use crate::graph::{now_ms, EpisodeFilter, EpisodeType, GraphNode, NodeType, RelType};

use super::{require_graph, resolve_context, str_arg, usize_arg};

pub(super) fn register(registry: &mut ToolRegistry, bridge: Arc<Bridge>) {
    registry.register(Arc::new(ProgressQueryTool { bridge: bridge.clone() }));
    registry.register(Arc::new(TaskUpdateTool { bridge: bridge.clone() }));
    registry.register(Arc::new(FeatureStatusTool { bridge: bridge.clone() }));
    registry.register(Arc::new(BlockingIssuesTool { bridge }));
}

fn object_schema(properties: Value, required: &[&str]) -> Value {
    json!({ "type": "object", "properties": properties, "required": required })
}

fn describe_task(node: &GraphNode) -> Value {
    json!({
        "id": node.id,
        "type": node.node_type,
        "title": node.prop_str("title"),
        "status": node.prop_str("status"),
        "assignee": node.prop_str("assignee"),
    })
}

// ---------------------------------------------------------------------------
// progress_query
// ---------------------------------------------------------------------------

pub struct ProgressQueryTool {
    bridge: Arc<Bridge>,
}

#[async_trait]
impl Tool for ProgressQueryTool {
    fn name(&self) -> &'static str {
        "progress_query"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            category: ToolCategory::Progress,
            description: Some("List tasks and features, optionally by status or type.".to_string()),
            input_schema: object_schema(
                json!({
                    "type": {"type": "string", "enum": ["task", "feature"]},
                    "status": {"type": "string"},
                    "query": {"type": "string"},
                    "limit": {"type": "integer", "default": 25},
                }),
                &[],
            ),
        }
    }

    async fn run(&self, args: Value, ctx: &CallContext) -> Result<Envelope, ToolError> {
        let graph = match require_graph(&self.bridge) {
            Ok(g) => g,
            Err(envelope) => return Ok(envelope),
        };
        let context = resolve_context(&self.bridge, &args, ctx);
        let limit = usize_arg(&args, "limit", 25);

        let types: Vec<NodeType> = match str_arg(&args, "type") {
            Some("task") => vec![NodeType::Task],
            Some("feature") => vec![NodeType::Feature],
            _ => vec![NodeType::Task, NodeType::Feature],
        };
        let status = str_arg(&args, "status");
        let query = str_arg(&args, "query").map(str::to_lowercase);

        let items: Vec<Value> = graph
            .live_nodes(&context.project_id, &types)
            .await?
            .into_iter()
            .filter(|node| status.map_or(true, |s| node.prop_str("status") == Some(s)))
            .filter(|node| {
                query.as_deref().map_or(true, |q| {
                    node.prop_str("title")
                        .map_or(false, |t| t.to_lowercase().contains(q))
                        || node.id.to_lowercase().contains(q)
                })
            })
            .take(limit)
            .map(|node| describe_task(&node))
            .collect();
        let count = items.len();
        Ok(Envelope::ok_with_summary(
            json!({ "items": items }),
            format!("{} item(s)", count),
        ))
    }
}

// ---------------------------------------------------------------------------
// task_update
// ---------------------------------------------------------------------------

pub struct TaskUpdateTool {
    bridge: Arc<Bridge>,
}

#[async_trait]
impl Tool for TaskUpdateTool {
    fn name(&self) -> &'static str {
        "task_update"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            category: ToolCategory::Progress,
            description: Some(
                "Update a task's status; completion releases claims and records a decision."
                    .to_string(),
            ),
            input_schema: object_schema(
                json!({
                    "taskId": {"type": "string"},
                    "status": {"type": "string", "enum": ["pending", "in-progress", "completed", "blocked"]},
                    "notes": {"type": "string"},
                    "agentId": {"type": "string"},
                }),
                &["taskId", "status"],
            ),
        }
    }

    async fn run(&self, args: Value, ctx: &CallContext) -> Result<Envelope, ToolError> {
        let Some(task_id) = str_arg(&args, "taskId") else {
            return Ok(Envelope::err(
                codes::TASK_UPDATE_INVALID_INPUT,
                "taskId is required",
            ));
        };
        let Some(status) = str_arg(&args, "status") else {
            return Ok(Envelope::err(
                codes::TASK_UPDATE_INVALID_INPUT,
                "status is required",
            ));
        };
        let graph = match require_graph(&self.bridge) {
            Ok(g) => g,
            Err(envelope) => return Ok(envelope),
        };
        let context = resolve_context(&self.bridge, &args, ctx);
        let project = context.project_id.as_str();

        let Some(task) = graph.live_node(project, task_id).await? else {
            return Ok(Envelope::err(
                codes::TASK_NOT_FOUND,
                format!("no live task: {}", task_id),
            ));
        };
        if task.node_type != NodeType::Task {
            return Ok(Envelope::err(
                codes::TASK_NOT_FOUND,
                format!("{} is not a task node", task_id),
            ));
        }

        let previous_status = task.prop_str("status").unwrap_or("pending").to_string();
        let mut updated = task.clone();
        updated.valid_from = now_ms();
        updated.valid_to = None;
        updated
            .properties
            .insert("status".to_string(), json!(status));
        if let Some(notes) = str_arg(&args, "notes") {
            updated.properties.insert("notes".to_string(), json!(notes));
        }
        graph.upsert_node(updated).await?;

        let agent_id = str_arg(&args, "agentId")
            .map(String::from)
            .or_else(|| task.prop_str("assignee").map(String::from))
            .unwrap_or_else(|| self.bridge.policy.default_agent_id.clone());

        let mut completion = Value::Null;
        if status == "completed" && previous_status != "completed" {
            match self
                .bridge
                .coordination
                .complete_task(project, task_id, &agent_id, str_arg(&args, "notes"))
                .await
            {
                Ok(result) => completion = result,
                Err(e) => {
                    // The status change already landed; the hook is advisory.
                    tracing::warn!(task = task_id, error = %e, "task completion hook failed");
                }
            }
        }

        Ok(Envelope::ok_with_summary(
            json!({
                "taskId": task_id,
                "previousStatus": previous_status,
                "status": status,
                "completion": completion,
            }),
            format!("task {} -> {}", task_id, status),
        ))
    }
}

// ---------------------------------------------------------------------------
// feature_status
// ---------------------------------------------------------------------------

pub struct FeatureStatusTool {
    bridge: Arc<Bridge>,
}

#[async_trait]
impl Tool for FeatureStatusTool {
    fn name(&self) -> &'static str {
        "feature_status"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            category: ToolCategory::Progress,
            description: Some(
                "Features with a rollup of their targeted tasks' statuses.".to_string(),
            ),
            input_schema: object_schema(json!({}), &[]),
        }
    }

    async fn run(&self, args: Value, ctx: &CallContext) -> Result<Envelope, ToolError> {
        let graph = match require_graph(&self.bridge) {
            Ok(g) => g,
            Err(envelope) => return Ok(envelope),
        };
        let context = resolve_context(&self.bridge, &args, ctx);
        let project = context.project_id.as_str();

        let mut features: Vec<Value> = Vec::new();
        for feature in graph.live_nodes(project, &[NodeType::Feature]).await? {
            let mut rollup: BTreeMap<String, usize> = BTreeMap::new();
            for rel in graph
                .relationships(project, RelType::Targets, None, Some(&feature.id))
                .await?
            {
                if let Some(task) = graph.live_node(project, &rel.from).await? {
                    let status = task.prop_str("status").unwrap_or("pending").to_string();
                    *rollup.entry(status).or_insert(0) += 1;
                }
            }
            features.push(json!({
                "id": feature.id,
                "title": feature.prop_str("title"),
                "status": feature.prop_str("status"),
                "tasks": rollup,
            }));
        }
        let count = features.len();
        Ok(Envelope::ok_with_summary(
            json!({ "features": features }),
            format!("{} feature(s)", count),
        ))
    }
}

// ---------------------------------------------------------------------------
// blocking_issues
// ---------------------------------------------------------------------------

pub struct BlockingIssuesTool {
    bridge: Arc<Bridge>,
}

#[async_trait]
impl Tool for BlockingIssuesTool {
    fn name(&self) -> &'static str {
        "blocking_issues"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            category: ToolCategory::Progress,
            description: Some(
                "What's in the way: blocked tasks, contested claims, recent errors.".to_string(),
            ),
            input_schema: object_schema(json!({ "agentId": {"type": "string"} }), &[]),
        }
    }

    async fn run(&self, args: Value, ctx: &CallContext) -> Result<Envelope, ToolError> {
        let graph = match require_graph(&self.bridge) {
            Ok(g) => g,
            Err(envelope) => return Ok(envelope),
        };
        let context = resolve_context(&self.bridge, &args, ctx);
        let project = context.project_id.as_str();

        let blocked_tasks: Vec<Value> = graph
            .live_nodes(project, &[NodeType::Task])
            .await?
            .iter()
            .filter(|t| t.prop_str("status") == Some("blocked"))
            .map(describe_task)
            .collect();

        let overview = self
            .bridge
            .coordination
            .overview(project)
            .await
            .map_err(|e| ToolError::Internal(e.to_string()))?;

        let recent_errors: Vec<Value> = graph
            .episodes(
                project,
                &EpisodeFilter {
                    types: vec![EpisodeType::Error],
                    ..Default::default()
                },
            )
            .await?
            .into_iter()
            .take(10)
            .map(|ep| json!({ "id": ep.id, "content": ep.content, "timestamp": ep.timestamp }))
            .collect();

        let blocked = blocked_tasks.len();
        Ok(Envelope::ok_with_summary(
            json!({
                "blockedTasks": blocked_tasks,
                "staleClaims": overview["staleClaims"],
                "contested": overview["conflicts"],
                "recentErrors": recent_errors,
            }),
            format!("{} blocked task(s)", blocked),
        ))
    }
}
