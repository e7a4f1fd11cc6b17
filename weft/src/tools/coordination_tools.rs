//! Coordination tools: claims, fleet status, and context packs.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::bridge::Bridge;
use crate::context_pack::{ContextPackAssembler, ContextPackError, ContextPackRequest};
use crate::coordination::{ClaimRequest, CoordinationError};
use crate::dispatch::{CallContext, Tool, ToolCategory, ToolError, ToolRegistry, ToolSpec};
use crate::envelope::{codes, Envelope};
use crate::graph::ClaimType;

use super::{agent_arg, bool_arg, resolve_context, str_arg, usize_arg};

pub(super) fn register(registry: &mut ToolRegistry, bridge: Arc<Bridge>) {
    registry.register(Arc::new(AgentClaimTool { bridge: bridge.clone() }));
    registry.register(Arc::new(AgentReleaseTool { bridge: bridge.clone() }));
    registry.register(Arc::new(AgentStatusTool { bridge: bridge.clone() }));
    registry.register(Arc::new(CoordinationOverviewTool { bridge: bridge.clone() }));
    registry.register(Arc::new(ContextPackTool { bridge }));
}

fn object_schema(properties: Value, required: &[&str]) -> Value {
    json!({ "type": "object", "properties": properties, "required": required })
}

fn coordination_error(e: CoordinationError, invalid_input_code: &str) -> Envelope {
    match e {
        CoordinationError::InvalidInput(reason) => Envelope::err(invalid_input_code, reason),
        CoordinationError::Unavailable => Envelope::err(
            codes::GRAPH_STORE_UNAVAILABLE,
            "graph store is not connected",
        ),
        CoordinationError::Store(e) => Envelope::err(codes::GRAPH_QUERY_EXCEPTION, e.to_string()),
    }
}

// ---------------------------------------------------------------------------
// agent_claim
// ---------------------------------------------------------------------------

pub struct AgentClaimTool {
    bridge: Arc<Bridge>,
}

#[async_trait]
impl Tool for AgentClaimTool {
    fn name(&self) -> &'static str {
        "agent_claim"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            category: ToolCategory::Coordination,
            description: Some(
                "Reserve exclusive work on a target; conflicts are reported, never overwritten."
                    .to_string(),
            ),
            input_schema: object_schema(
                json!({
                    "targetId": {"type": "string"},
                    "intent": {"type": "string"},
                    "claimType": {"type": "string", "enum": ["task", "file", "symbol"], "default": "task"},
                    "agentId": {"type": "string"},
                }),
                &["targetId", "intent"],
            ),
        }
    }

    async fn run(&self, args: Value, ctx: &CallContext) -> Result<Envelope, ToolError> {
        let (Some(target_id), Some(intent)) =
            (str_arg(&args, "targetId"), str_arg(&args, "intent"))
        else {
            return Ok(Envelope::err(
                codes::AGENT_CLAIM_INVALID_INPUT,
                "targetId and intent are required",
            ));
        };
        let context = resolve_context(&self.bridge, &args, ctx);
        let claim_type = match str_arg(&args, "claimType") {
            Some("file") => ClaimType::File,
            Some("symbol") => ClaimType::Symbol,
            _ => ClaimType::Task,
        };

        let request = ClaimRequest {
            project_id: context.project_id,
            agent_id: agent_arg(&self.bridge, &args),
            session_id: ctx.session_id.clone(),
            target_id: target_id.to_string(),
            claim_type,
            intent: intent.to_string(),
        };
        match self.bridge.coordination.claim(request).await {
            Ok(result) => {
                let summary = match result.status {
                    crate::coordination::ClaimStatus::Created => {
                        format!("claimed {}", target_id)
                    }
                    crate::coordination::ClaimStatus::Conflict => {
                        format!("{} is already claimed", target_id)
                    }
                };
                Ok(Envelope::ok_with_summary(
                    serde_json::to_value(&result)
                        .map_err(|e| ToolError::Internal(e.to_string()))?,
                    summary,
                ))
            }
            Err(e) => Ok(coordination_error(e, codes::AGENT_CLAIM_INVALID_INPUT)),
        }
    }
}

// ---------------------------------------------------------------------------
// agent_release
// ---------------------------------------------------------------------------

pub struct AgentReleaseTool {
    bridge: Arc<Bridge>,
}

#[async_trait]
impl Tool for AgentReleaseTool {
    fn name(&self) -> &'static str {
        "agent_release"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            category: ToolCategory::Coordination,
            description: Some("Release a claim by id.".to_string()),
            input_schema: object_schema(json!({ "claimId": {"type": "string"} }), &["claimId"]),
        }
    }

    async fn run(&self, args: Value, ctx: &CallContext) -> Result<Envelope, ToolError> {
        let Some(claim_id) = str_arg(&args, "claimId") else {
            return Ok(Envelope::err(
                codes::AGENT_RELEASE_INVALID_INPUT,
                "claimId is required",
            ));
        };
        let context = resolve_context(&self.bridge, &args, ctx);
        match self
            .bridge
            .coordination
            .release(&context.project_id, claim_id)
            .await
        {
            Ok(released) => Ok(Envelope::ok_with_summary(
                json!({ "claimId": claim_id, "released": released }),
                if released {
                    "claim released"
                } else {
                    "no live claim with that id"
                },
            )),
            Err(e) => Ok(coordination_error(e, codes::AGENT_RELEASE_INVALID_INPUT)),
        }
    }
}

// ---------------------------------------------------------------------------
// agent_status / coordination_overview
// ---------------------------------------------------------------------------

pub struct AgentStatusTool {
    bridge: Arc<Bridge>,
}

#[async_trait]
impl Tool for AgentStatusTool {
    fn name(&self) -> &'static str {
        "agent_status"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            category: ToolCategory::Coordination,
            description: Some(
                "One agent's claims, episodes, and task; without agentId, the fleet overview."
                    .to_string(),
            ),
            input_schema: object_schema(json!({ "agentId": {"type": "string"} }), &[]),
        }
    }

    async fn run(&self, args: Value, ctx: &CallContext) -> Result<Envelope, ToolError> {
        let context = resolve_context(&self.bridge, &args, ctx);
        let result = match str_arg(&args, "agentId") {
            Some(agent_id) => {
                self.bridge
                    .coordination
                    .status(&context.project_id, agent_id)
                    .await
            }
            // No agent id is not an error: answer the overview.
            None => self.bridge.coordination.overview(&context.project_id).await,
        };
        match result {
            Ok(data) => Ok(Envelope::ok(data)),
            Err(e) => Ok(coordination_error(e, codes::AGENT_CLAIM_INVALID_INPUT)),
        }
    }
}

pub struct CoordinationOverviewTool {
    bridge: Arc<Bridge>,
}

#[async_trait]
impl Tool for CoordinationOverviewTool {
    fn name(&self) -> &'static str {
        "coordination_overview"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            category: ToolCategory::Coordination,
            description: Some("Fleet view: active, stale, and contested claims.".to_string()),
            input_schema: object_schema(json!({}), &[]),
        }
    }

    async fn run(&self, args: Value, ctx: &CallContext) -> Result<Envelope, ToolError> {
        let context = resolve_context(&self.bridge, &args, ctx);
        match self.bridge.coordination.overview(&context.project_id).await {
            Ok(data) => {
                let summary = data["summary"].as_str().unwrap_or("").to_string();
                Ok(Envelope::ok_with_summary(data, summary))
            }
            Err(e) => Ok(coordination_error(e, codes::AGENT_CLAIM_INVALID_INPUT)),
        }
    }
}

// ---------------------------------------------------------------------------
// context_pack
// ---------------------------------------------------------------------------

pub struct ContextPackTool {
    bridge: Arc<Bridge>,
}

#[async_trait]
impl Tool for ContextPackTool {
    fn name(&self) -> &'static str {
        "context_pack"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            category: ToolCategory::Coordination,
            description: Some(
                "Assemble a budgeted working context for a task: symbols, snippets, memory, blockers."
                    .to_string(),
            ),
            input_schema: object_schema(
                json!({
                    "task": {"type": "string"},
                    "taskId": {"type": "string"},
                    "agentId": {"type": "string"},
                    "includeDecisions": {"type": "boolean", "default": true},
                    "includeLearnings": {"type": "boolean", "default": true},
                    "includeEpisodes": {"type": "boolean", "default": true},
                    "tokenBudget": {"type": "integer"},
                }),
                &["task"],
            ),
        }
    }

    async fn run(&self, args: Value, ctx: &CallContext) -> Result<Envelope, ToolError> {
        let Some(task) = str_arg(&args, "task") else {
            return Ok(Envelope::err(
                codes::CONTEXT_PACK_INVALID_INPUT,
                "task description is required",
            ));
        };
        let context = resolve_context(&self.bridge, &args, ctx);

        let assembler =
            ContextPackAssembler::new(self.bridge.graph(), self.bridge.ppr.clone());
        let request = ContextPackRequest {
            project_id: context.project_id,
            workspace_root: context.workspace_root,
            task: task.to_string(),
            task_id: str_arg(&args, "taskId").map(String::from),
            agent_id: agent_arg(&self.bridge, &args),
            include_decisions: bool_arg(&args, "includeDecisions", true),
            include_learnings: bool_arg(&args, "includeLearnings", true),
            include_episodes: bool_arg(&args, "includeEpisodes", true),
            token_budget: args
                .get("tokenBudget")
                .and_then(Value::as_u64)
                .map(|n| n as usize)
                .or_else(|| Some(usize_arg(&args, "budget", 4000))),
        };

        match assembler.assemble(request).await {
            Ok(pack) => {
                let summary = format!(
                    "{} core symbol(s), ~{} tokens",
                    pack.core_symbols.len(),
                    pack.token_estimate
                );
                Ok(Envelope::ok_with_summary(
                    serde_json::to_value(&pack)
                        .map_err(|e| ToolError::Internal(e.to_string()))?,
                    summary,
                ))
            }
            Err(ContextPackError::InvalidInput(reason)) => {
                Ok(Envelope::err(codes::CONTEXT_PACK_INVALID_INPUT, reason))
            }
            Err(ContextPackError::Unavailable) => Ok(Envelope::err(
                codes::GRAPH_STORE_UNAVAILABLE,
                "graph store is not connected",
            )),
            Err(ContextPackError::Store(e)) => Err(e.into()),
        }
    }
}
