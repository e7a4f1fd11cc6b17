//! Episode tools: add, recall, decision query, reflect.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::bridge::Bridge;
use crate::dispatch::{CallContext, Tool, ToolCategory, ToolError, ToolRegistry, ToolSpec};
use crate::envelope::{codes, Envelope};
use crate::episode::{EpisodeError, EpisodeInput, RecallQuery};
use crate::graph::temporal;
use crate::graph::EpisodeType;

use super::{agent_arg, bool_arg, resolve_context, str_arg, str_list, usize_arg};

pub(super) fn register(registry: &mut ToolRegistry, bridge: Arc<Bridge>) {
    registry.register(Arc::new(EpisodeAddTool { bridge: bridge.clone() }));
    registry.register(Arc::new(EpisodeRecallTool { bridge: bridge.clone() }));
    registry.register(Arc::new(DecisionQueryTool { bridge: bridge.clone() }));
    registry.register(Arc::new(ReflectTool { bridge }));
}

fn object_schema(properties: Value, required: &[&str]) -> Value {
    json!({ "type": "object", "properties": properties, "required": required })
}

/// Maps engine errors to the right code for the calling tool.
fn episode_error(e: EpisodeError, invalid_input_code: &str, invalid_meta_code: &str) -> Envelope {
    match e {
        EpisodeError::InvalidInput(reason) => Envelope::err(invalid_input_code, reason),
        EpisodeError::InvalidMetadata(reason) => Envelope::err(invalid_meta_code, reason),
        EpisodeError::Unavailable => Envelope::err(
            codes::GRAPH_STORE_UNAVAILABLE,
            "graph store is not connected",
        ),
        EpisodeError::Store(e) => Envelope::err(codes::GRAPH_QUERY_EXCEPTION, e.to_string()),
    }
}

fn metadata_arg(args: &Value) -> BTreeMap<String, Value> {
    args.get("metadata")
        .and_then(Value::as_object)
        .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        .unwrap_or_default()
}

fn recall_query_from_args(bridge: &Bridge, args: &Value, ctx: &CallContext) -> RecallQuery {
    let context = resolve_context(bridge, args, ctx);
    RecallQuery {
        project_id: context.project_id,
        query: str_arg(args, "query").map(String::from),
        agent_id: str_arg(args, "agentId").map(String::from),
        task_id: str_arg(args, "taskId").map(String::from),
        types: str_list(args, "types")
            .iter()
            .filter_map(|t| EpisodeType::parse(t))
            .collect(),
        entities: str_list(args, "entities"),
        since: str_arg(args, "since").and_then(temporal::parse_timestamp),
        limit: Some(usize_arg(args, "limit", 10)),
    }
}

// ---------------------------------------------------------------------------
// episode_add
// ---------------------------------------------------------------------------

pub struct EpisodeAddTool {
    bridge: Arc<Bridge>,
}

#[async_trait]
impl Tool for EpisodeAddTool {
    fn name(&self) -> &'static str {
        "episode_add"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            category: ToolCategory::Episodes,
            description: Some("Record one typed episode of agent activity.".to_string()),
            input_schema: object_schema(
                json!({
                    "type": {"type": "string", "enum": ["OBSERVATION", "DECISION", "EDIT", "TEST_RESULT", "ERROR", "REFLECTION"]},
                    "content": {"type": "string"},
                    "entities": {"type": "array", "items": {"type": "string"}},
                    "taskId": {"type": "string"},
                    "outcome": {"type": "string", "enum": ["success", "failure", "partial"]},
                    "metadata": {"type": "object"},
                    "sensitive": {"type": "boolean", "default": false},
                    "agentId": {"type": "string"},
                }),
                &["type", "content"],
            ),
        }
    }

    async fn run(&self, args: Value, ctx: &CallContext) -> Result<Envelope, ToolError> {
        let context = resolve_context(&self.bridge, &args, ctx);
        let input = EpisodeInput {
            project_id: context.project_id,
            episode_type: str_arg(&args, "type").map(String::from),
            content: str_arg(&args, "content").unwrap_or_default().to_string(),
            entities: str_list(&args, "entities"),
            task_id: str_arg(&args, "taskId").map(String::from),
            outcome: str_arg(&args, "outcome").map(String::from),
            metadata: metadata_arg(&args),
            sensitive: bool_arg(&args, "sensitive", false),
            agent_id: Some(agent_arg(&self.bridge, &args)),
            session_id: ctx.session_id.clone(),
        };

        match self.bridge.episodes.add(input).await {
            Ok(id) => Ok(Envelope::ok_with_summary(
                json!({ "episodeId": id }),
                "episode recorded",
            )),
            Err(e) => Ok(episode_error(
                e,
                codes::EPISODE_ADD_INVALID_INPUT,
                codes::EPISODE_ADD_INVALID_METADATA,
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// episode_recall
// ---------------------------------------------------------------------------

pub struct EpisodeRecallTool {
    bridge: Arc<Bridge>,
}

#[async_trait]
impl Tool for EpisodeRecallTool {
    fn name(&self) -> &'static str {
        "episode_recall"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            category: ToolCategory::Episodes,
            description: Some(
                "Recall episodes ranked by relevance and recency.".to_string(),
            ),
            input_schema: object_schema(
                json!({
                    "query": {"type": "string"},
                    "agentId": {"type": "string"},
                    "taskId": {"type": "string"},
                    "types": {"type": "array", "items": {"type": "string"}},
                    "entities": {"type": "array", "items": {"type": "string"}},
                    "since": {"type": "string"},
                    "limit": {"type": "integer", "default": 10},
                }),
                &[],
            ),
        }
    }

    async fn run(&self, args: Value, ctx: &CallContext) -> Result<Envelope, ToolError> {
        // Unknown type strings are a caller error, not a silent empty filter.
        for raw in str_list(&args, "types") {
            if EpisodeType::parse(&raw).is_none() {
                return Ok(Envelope::err(
                    codes::EPISODE_RECALL_INVALID_INPUT,
                    format!("unknown episode type: {}", raw),
                ));
            }
        }
        let query = recall_query_from_args(&self.bridge, &args, ctx);
        match self.bridge.episodes.recall(query).await {
            Ok(hits) => {
                let count = hits.len();
                Ok(Envelope::ok_with_summary(
                    json!({ "episodes": hits }),
                    format!("{} episode(s)", count),
                ))
            }
            Err(e) => Ok(episode_error(
                e,
                codes::EPISODE_RECALL_INVALID_INPUT,
                codes::EPISODE_RECALL_INVALID_INPUT,
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// decision_query
// ---------------------------------------------------------------------------

pub struct DecisionQueryTool {
    bridge: Arc<Bridge>,
}

#[async_trait]
impl Tool for DecisionQueryTool {
    fn name(&self) -> &'static str {
        "decision_query"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            category: ToolCategory::Episodes,
            description: Some("Recall restricted to DECISION episodes.".to_string()),
            input_schema: object_schema(
                json!({
                    "query": {"type": "string"},
                    "agentId": {"type": "string"},
                    "taskId": {"type": "string"},
                    "entities": {"type": "array", "items": {"type": "string"}},
                    "since": {"type": "string"},
                    "limit": {"type": "integer", "default": 10},
                }),
                &[],
            ),
        }
    }

    async fn run(&self, args: Value, ctx: &CallContext) -> Result<Envelope, ToolError> {
        let query = recall_query_from_args(&self.bridge, &args, ctx);
        match self.bridge.episodes.decision_query(query).await {
            Ok(hits) => {
                let count = hits.len();
                Ok(Envelope::ok_with_summary(
                    json!({ "decisions": hits }),
                    format!("{} decision(s)", count),
                ))
            }
            Err(e) => Ok(episode_error(
                e,
                codes::DECISION_QUERY_INVALID_INPUT,
                codes::DECISION_QUERY_INVALID_INPUT,
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// reflect
// ---------------------------------------------------------------------------

pub struct ReflectTool {
    bridge: Arc<Bridge>,
}

#[async_trait]
impl Tool for ReflectTool {
    fn name(&self) -> &'static str {
        "reflect"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            category: ToolCategory::Episodes,
            description: Some(
                "Summarize recent episodes into a reflection and learnings.".to_string(),
            ),
            input_schema: object_schema(
                json!({
                    "taskId": {"type": "string"},
                    "agentId": {"type": "string"},
                }),
                &[],
            ),
        }
    }

    async fn run(&self, args: Value, ctx: &CallContext) -> Result<Envelope, ToolError> {
        let context = resolve_context(&self.bridge, &args, ctx);
        let task_id = str_arg(&args, "taskId");
        let agent_id = str_arg(&args, "agentId");
        if task_id.is_none() && agent_id.is_none() {
            return Ok(Envelope::err(
                codes::REFLECT_INVALID_INPUT,
                "taskId or agentId is required",
            ));
        }
        match self
            .bridge
            .episodes
            .reflect(&context.project_id, task_id, agent_id)
            .await
        {
            Ok(outcome) => Ok(Envelope::ok_with_summary(
                serde_json::to_value(&outcome).map_err(|e| ToolError::Internal(e.to_string()))?,
                format!("{} learning(s) created", outcome.learnings_created),
            )),
            Err(e) => Ok(episode_error(
                e,
                codes::REFLECT_INVALID_INPUT,
                codes::REFLECT_INVALID_INPUT,
            )),
        }
    }
}
