//! Test-selection and architecture tools. The heavy engines are external;
//! impact analysis runs directly on the graph.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::bridge::{ArchEngine, Bridge, EngineError, TestEngine};
use crate::dispatch::{CallContext, Tool, ToolCategory, ToolError, ToolRegistry, ToolSpec};
use crate::envelope::{codes, Envelope};
use crate::graph::{NodeType, RelType};

use super::{require_graph, resolve_context, str_arg, str_list, usize_arg};

pub(super) fn register(registry: &mut ToolRegistry, bridge: Arc<Bridge>) {
    registry.register(Arc::new(TestSelectTool { bridge: bridge.clone() }));
    registry.register(Arc::new(TestCategorizeTool { bridge: bridge.clone() }));
    registry.register(Arc::new(ImpactAnalyzeTool { bridge: bridge.clone() }));
    registry.register(Arc::new(TestRunTool { bridge: bridge.clone() }));
    registry.register(Arc::new(SuggestTestsTool { bridge: bridge.clone() }));
    registry.register(Arc::new(ArchValidateTool { bridge: bridge.clone() }));
    registry.register(Arc::new(ArchSuggestTool { bridge }));
}

fn tests_engine(bridge: &Bridge) -> Result<Arc<dyn TestEngine>, Envelope> {
    bridge.tests.clone().ok_or_else(|| {
        Envelope::err(
            codes::TEST_ENGINE_UNAVAILABLE,
            "test selection engine is not configured",
        )
    })
}

fn arch_engine(bridge: &Bridge) -> Result<Arc<dyn ArchEngine>, Envelope> {
    bridge.arch.clone().ok_or_else(|| {
        Envelope::err(
            codes::ARCH_ENGINE_UNAVAILABLE,
            "architecture engine is not configured",
        )
    })
}

fn engine_failure(e: EngineError) -> Envelope {
    Envelope::err(codes::GRAPH_QUERY_FAILED, e.to_string())
}

fn object_schema(properties: Value, required: &[&str]) -> Value {
    json!({ "type": "object", "properties": properties, "required": required })
}

// ---------------------------------------------------------------------------
// test_select
// ---------------------------------------------------------------------------

pub struct TestSelectTool {
    bridge: Arc<Bridge>,
}

#[async_trait]
impl Tool for TestSelectTool {
    fn name(&self) -> &'static str {
        "test_select"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            category: ToolCategory::Tests,
            description: Some("Select the tests affected by a set of changed files.".to_string()),
            input_schema: object_schema(
                json!({"files": {"type": "array", "items": {"type": "string"}}}),
                &["files"],
            ),
        }
    }

    async fn run(&self, args: Value, ctx: &CallContext) -> Result<Envelope, ToolError> {
        let files = str_list(&args, "files");
        if files.is_empty() {
            return Ok(Envelope::err(
                codes::IMPACT_ANALYZE_INVALID_INPUT,
                "files is required",
            )
            .with_hint("pass the changed files to select tests for"));
        }
        let engine = match tests_engine(&self.bridge) {
            Ok(engine) => engine,
            Err(envelope) => return Ok(envelope),
        };
        let context = resolve_context(&self.bridge, &args, ctx);
        match engine.select_tests(&context.project_id, &files).await {
            Ok(selection) => Ok(Envelope::ok(selection)),
            Err(e) => Ok(engine_failure(e)),
        }
    }
}

// ---------------------------------------------------------------------------
// test_categorize
// ---------------------------------------------------------------------------

pub struct TestCategorizeTool {
    bridge: Arc<Bridge>,
}

#[async_trait]
impl Tool for TestCategorizeTool {
    fn name(&self) -> &'static str {
        "test_categorize"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            category: ToolCategory::Tests,
            description: Some("Categorize the project's tests by kind and speed.".to_string()),
            input_schema: object_schema(json!({}), &[]),
        }
    }

    async fn run(&self, args: Value, ctx: &CallContext) -> Result<Envelope, ToolError> {
        let engine = match tests_engine(&self.bridge) {
            Ok(engine) => engine,
            Err(envelope) => return Ok(envelope),
        };
        let context = resolve_context(&self.bridge, &args, ctx);
        match engine.categorize_tests(&context.project_id).await {
            Ok(categories) => Ok(Envelope::ok(categories)),
            Err(e) => Ok(engine_failure(e)),
        }
    }
}

// ---------------------------------------------------------------------------
// test_run
// ---------------------------------------------------------------------------

pub struct TestRunTool {
    bridge: Arc<Bridge>,
}

#[async_trait]
impl Tool for TestRunTool {
    fn name(&self) -> &'static str {
        "test_run"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            category: ToolCategory::Tests,
            description: Some("Run a test selection through the external engine.".to_string()),
            input_schema: object_schema(json!({"selector": {"type": "object"}}), &[]),
        }
    }

    async fn run(&self, args: Value, ctx: &CallContext) -> Result<Envelope, ToolError> {
        let engine = match tests_engine(&self.bridge) {
            Ok(engine) => engine,
            Err(envelope) => return Ok(envelope),
        };
        let context = resolve_context(&self.bridge, &args, ctx);
        let selector = args.get("selector").cloned().unwrap_or_else(|| json!({}));
        match engine.run_tests(&context.project_id, selector).await {
            Ok(results) => Ok(Envelope::ok(results)),
            Err(e) => Ok(engine_failure(e)),
        }
    }
}

// ---------------------------------------------------------------------------
// suggest_tests
// ---------------------------------------------------------------------------

pub struct SuggestTestsTool {
    bridge: Arc<Bridge>,
}

#[async_trait]
impl Tool for SuggestTestsTool {
    fn name(&self) -> &'static str {
        "suggest_tests"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            category: ToolCategory::Tests,
            description: Some("Suggest missing tests for a target element.".to_string()),
            input_schema: object_schema(json!({"target": {"type": "string"}}), &["target"]),
        }
    }

    async fn run(&self, args: Value, ctx: &CallContext) -> Result<Envelope, ToolError> {
        let Some(target) = str_arg(&args, "target") else {
            return Ok(Envelope::err(
                codes::ELEMENT_NOT_FOUND,
                "target is required",
            ));
        };
        let engine = match tests_engine(&self.bridge) {
            Ok(engine) => engine,
            Err(envelope) => return Ok(envelope),
        };
        let context = resolve_context(&self.bridge, &args, ctx);
        match engine.suggest_tests(&context.project_id, target).await {
            Ok(suggestions) => Ok(Envelope::ok(suggestions)),
            Err(e) => Ok(engine_failure(e)),
        }
    }
}

// ---------------------------------------------------------------------------
// arch_validate / arch_suggest
// ---------------------------------------------------------------------------

pub struct ArchValidateTool {
    bridge: Arc<Bridge>,
}

#[async_trait]
impl Tool for ArchValidateTool {
    fn name(&self) -> &'static str {
        "arch_validate"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            category: ToolCategory::Tests,
            description: Some(
                "Validate the architecture against its declared constraints.".to_string(),
            ),
            input_schema: object_schema(json!({}), &[]),
        }
    }

    async fn run(&self, args: Value, ctx: &CallContext) -> Result<Envelope, ToolError> {
        let engine = match arch_engine(&self.bridge) {
            Ok(engine) => engine,
            Err(envelope) => return Ok(envelope),
        };
        let context = resolve_context(&self.bridge, &args, ctx);
        match engine.validate(&context.project_id).await {
            Ok(findings) => Ok(Envelope::ok(findings)),
            Err(e) => Ok(engine_failure(e)),
        }
    }
}

pub struct ArchSuggestTool {
    bridge: Arc<Bridge>,
}

#[async_trait]
impl Tool for ArchSuggestTool {
    fn name(&self) -> &'static str {
        "arch_suggest"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            category: ToolCategory::Tests,
            description: Some("Suggest architectural improvements.".to_string()),
            input_schema: object_schema(json!({}), &[]),
        }
    }

    async fn run(&self, args: Value, ctx: &CallContext) -> Result<Envelope, ToolError> {
        let engine = match arch_engine(&self.bridge) {
            Ok(engine) => engine,
            Err(envelope) => return Ok(envelope),
        };
        let context = resolve_context(&self.bridge, &args, ctx);
        match engine.suggest(&context.project_id).await {
            Ok(suggestions) => Ok(Envelope::ok(suggestions)),
            Err(e) => Ok(engine_failure(e)),
        }
    }
}

// ---------------------------------------------------------------------------
// impact_analyze
// ---------------------------------------------------------------------------

/// Reverse-dependency closure over CALLS/IMPORTS/REFERENCES, starting from
/// the symbols the changed files contain.
pub struct ImpactAnalyzeTool {
    bridge: Arc<Bridge>,
}

#[async_trait]
impl Tool for ImpactAnalyzeTool {
    fn name(&self) -> &'static str {
        "impact_analyze"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            category: ToolCategory::Tests,
            description: Some(
                "Symbols and files impacted by changes to the given files.".to_string(),
            ),
            input_schema: object_schema(
                json!({
                    "files": {"type": "array", "items": {"type": "string"}},
                    "depth": {"type": "integer", "default": 2},
                }),
                &["files"],
            ),
        }
    }

    async fn run(&self, args: Value, ctx: &CallContext) -> Result<Envelope, ToolError> {
        let files = str_list(&args, "files");
        if files.is_empty() {
            return Ok(Envelope::err(
                codes::IMPACT_ANALYZE_INVALID_INPUT,
                "files is required",
            )
            .with_hint("pass files (alias changedFiles)"));
        }
        let graph = match require_graph(&self.bridge) {
            Ok(g) => g,
            Err(envelope) => return Ok(envelope),
        };
        let context = resolve_context(&self.bridge, &args, ctx);
        let project = context.project_id.as_str();
        let depth = usize_arg(&args, "depth", 2).min(5);

        // Changed files -> their file nodes -> contained symbols.
        let mut seeds: BTreeSet<String> = BTreeSet::new();
        for node in graph.live_nodes(project, &[NodeType::File]).await? {
            let path = node.prop_str("path").unwrap_or(&node.id);
            if files
                .iter()
                .any(|f| path.ends_with(f.as_str()) || f.ends_with(path))
            {
                for rel in graph
                    .relationships(project, RelType::Contains, Some(&node.id), None)
                    .await?
                {
                    seeds.insert(rel.to);
                }
                seeds.insert(node.id);
            }
        }

        // Reverse closure: who calls, imports, or references the changed set.
        let mut impacted = seeds.clone();
        let mut frontier: Vec<String> = seeds.iter().cloned().collect();
        for _ in 0..depth {
            let mut next: Vec<String> = Vec::new();
            for id in &frontier {
                for rel_type in [RelType::Calls, RelType::Imports, RelType::References] {
                    for rel in graph
                        .relationships(project, rel_type, None, Some(id))
                        .await?
                    {
                        if impacted.insert(rel.from.clone()) {
                            next.push(rel.from);
                        }
                    }
                }
            }
            if next.is_empty() {
                break;
            }
            frontier = next;
        }

        let directly_changed = seeds.len();
        let impacted: Vec<String> = impacted.into_iter().collect();
        let count = impacted.len();
        Ok(Envelope::ok_with_summary(
            json!({
                "files": files,
                "directlyChanged": directly_changed,
                "impacted": impacted,
                "depth": depth,
            }),
            format!("{} impacted symbol(s)", count),
        ))
    }
}
