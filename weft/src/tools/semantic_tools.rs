//! Semantic tools over the vector store: search, similarity, slices, diffs,
//! and community clusters.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::bridge::Bridge;
use crate::dispatch::{CallContext, Tool, ToolCategory, ToolError, ToolRegistry, ToolSpec};
use crate::embedding::EmbeddingKind;
use crate::envelope::{codes, Envelope};
use crate::graph::resolve::{resolve_element, ResolveError};
use crate::graph::{GraphNode, RelType};

use super::{require_graph, resolve_context, str_arg, str_list, usize_arg};

pub(super) fn register(registry: &mut ToolRegistry, bridge: Arc<Bridge>) {
    registry.register(Arc::new(SemanticSearchTool { bridge: bridge.clone() }));
    registry.register(Arc::new(FindSimilarCodeTool { bridge: bridge.clone() }));
    registry.register(Arc::new(SemanticSliceTool { bridge: bridge.clone() }));
    registry.register(Arc::new(SemanticDiffTool { bridge: bridge.clone() }));
    registry.register(Arc::new(CodeClustersTool { bridge }));
}

fn kinds_filter(args: &Value) -> Vec<EmbeddingKind> {
    str_list(args, "types")
        .iter()
        .filter_map(|t| match t.to_lowercase().as_str() {
            "function" => Some(EmbeddingKind::Function),
            "class" => Some(EmbeddingKind::Class),
            "file" => Some(EmbeddingKind::File),
            _ => None,
        })
        .collect()
}

fn embeddings_not_ready(project_id: &str) -> Envelope {
    Envelope::err(
        codes::VECTOR_STORE_UNAVAILABLE,
        format!("embeddings are not ready for project {}", project_id),
    )
    .with_hint("run a full graph_rebuild to generate embeddings")
}

async fn resolve_or_envelope(
    bridge: &Bridge,
    project_id: &str,
    reference: &str,
    not_found_code: &str,
) -> Result<Result<GraphNode, Envelope>, ToolError> {
    let graph = match require_graph(bridge) {
        Ok(g) => g,
        Err(envelope) => return Ok(Err(envelope)),
    };
    match resolve_element(graph.as_ref(), project_id, reference).await {
        Ok(node) => Ok(Ok(node)),
        Err(ResolveError::Store(e)) => Err(e.into()),
        Err(ResolveError::Ambiguous { candidates, .. }) => Ok(Err(Envelope::err(
            not_found_code,
            format!("reference '{}' is ambiguous", reference),
        )
        .with_hint(format!("candidates: {}", candidates.join(", "))))),
        Err(ResolveError::NotFound(_)) => Ok(Err(Envelope::err(
            not_found_code,
            format!("no element matches '{}'", reference),
        ))),
    }
}

// ---------------------------------------------------------------------------
// semantic_search
// ---------------------------------------------------------------------------

pub struct SemanticSearchTool {
    bridge: Arc<Bridge>,
}

#[async_trait]
impl Tool for SemanticSearchTool {
    fn name(&self) -> &'static str {
        "semantic_search"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            category: ToolCategory::Semantic,
            description: Some("Embedding search over functions, classes, and files.".to_string()),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string"},
                    "types": {"type": "array", "items": {"type": "string", "enum": ["function", "class", "file"]}},
                    "limit": {"type": "integer", "default": 10},
                },
                "required": ["query"],
            }),
        }
    }

    async fn run(&self, args: Value, ctx: &CallContext) -> Result<Envelope, ToolError> {
        let Some(query) = str_arg(&args, "query") else {
            return Ok(Envelope::err(
                codes::SEMANTIC_SEARCH_INVALID_INPUT,
                "query is required",
            ));
        };
        let context = resolve_context(&self.bridge, &args, ctx);
        if !self.bridge.embeddings.is_ready(&context.project_id) {
            return Ok(embeddings_not_ready(&context.project_id));
        }

        let kinds = kinds_filter(&args);
        let limit = usize_arg(&args, "limit", 10);
        let hits = self
            .bridge
            .embeddings
            .search_entities(
                &context.project_id,
                query,
                if kinds.is_empty() { EmbeddingKind::ALL } else { kinds.as_slice() },
                limit,
            )
            .await?;
        let count = hits.len();
        Ok(Envelope::ok_with_summary(
            json!({ "hits": hits }),
            format!("{} hit(s)", count),
        ))
    }
}

// ---------------------------------------------------------------------------
// find_similar_code
// ---------------------------------------------------------------------------

pub struct FindSimilarCodeTool {
    bridge: Arc<Bridge>,
}

#[async_trait]
impl Tool for FindSimilarCodeTool {
    fn name(&self) -> &'static str {
        "find_similar_code"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            category: ToolCategory::Semantic,
            description: Some("Entities semantically closest to a given element.".to_string()),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "element": {"type": "string"},
                    "limit": {"type": "integer", "default": 5},
                },
                "required": ["element"],
            }),
        }
    }

    async fn run(&self, args: Value, ctx: &CallContext) -> Result<Envelope, ToolError> {
        let Some(reference) = str_arg(&args, "element") else {
            return Ok(Envelope::err(
                codes::ELEMENT_NOT_FOUND,
                "element reference is required",
            ));
        };
        let context = resolve_context(&self.bridge, &args, ctx);
        let node = match resolve_or_envelope(
            &self.bridge,
            &context.project_id,
            reference,
            codes::ELEMENT_NOT_FOUND,
        )
        .await?
        {
            Ok(node) => node,
            Err(envelope) => return Ok(envelope),
        };
        if !self.bridge.embeddings.is_ready(&context.project_id) {
            return Ok(embeddings_not_ready(&context.project_id));
        }

        let probe = match node.prop_str("path") {
            Some(path) => format!("{} {}", node.display_name(), path),
            None => node.display_name().to_string(),
        };
        let limit = usize_arg(&args, "limit", 5);
        let hits: Vec<_> = self
            .bridge
            .embeddings
            .search_entities(&context.project_id, &probe, EmbeddingKind::ALL, limit + 1)
            .await?
            .into_iter()
            .filter(|hit| hit.id != node.id)
            .take(limit)
            .collect();
        Ok(Envelope::ok(json!({ "element": node.id, "similar": hits })))
    }
}

// ---------------------------------------------------------------------------
// semantic_slice
// ---------------------------------------------------------------------------

pub struct SemanticSliceTool {
    bridge: Arc<Bridge>,
}

#[async_trait]
impl Tool for SemanticSliceTool {
    fn name(&self) -> &'static str {
        "semantic_slice"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            category: ToolCategory::Semantic,
            description: Some(
                "The call-graph slice around a symbol, out to a bounded depth.".to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "symbol": {"type": "string"},
                    "depth": {"type": "integer", "default": 1, "maximum": 3},
                },
                "required": ["symbol"],
            }),
        }
    }

    async fn run(&self, args: Value, ctx: &CallContext) -> Result<Envelope, ToolError> {
        let Some(symbol) = str_arg(&args, "symbol").or_else(|| str_arg(&args, "element")) else {
            return Ok(Envelope::err(
                codes::SEMANTIC_SLICE_INVALID_INPUT,
                "symbol is required",
            ));
        };
        let context = resolve_context(&self.bridge, &args, ctx);
        let node = match resolve_or_envelope(
            &self.bridge,
            &context.project_id,
            symbol,
            codes::SEMANTIC_SLICE_NOT_FOUND,
        )
        .await?
        {
            Ok(node) => node,
            Err(envelope) => return Ok(envelope),
        };
        let graph = match require_graph(&self.bridge) {
            Ok(g) => g,
            Err(envelope) => return Ok(envelope),
        };

        let depth = usize_arg(&args, "depth", 1).min(3);
        let project = context.project_id.as_str();
        let mut frontier = vec![node.id.clone()];
        let mut seen: std::collections::BTreeSet<String> = frontier.iter().cloned().collect();
        let mut layers: Vec<Vec<String>> = Vec::new();
        for _ in 0..depth {
            let mut next: Vec<String> = Vec::new();
            for id in &frontier {
                for rel in graph.relationships(project, RelType::Calls, Some(id), None).await? {
                    if seen.insert(rel.to.clone()) {
                        next.push(rel.to);
                    }
                }
                for rel in graph.relationships(project, RelType::Calls, None, Some(id)).await? {
                    if seen.insert(rel.from.clone()) {
                        next.push(rel.from);
                    }
                }
            }
            if next.is_empty() {
                break;
            }
            layers.push(next.clone());
            frontier = next;
        }

        Ok(Envelope::ok(json!({
            "root": node.id,
            "depth": depth,
            "layers": layers,
        })))
    }
}

// ---------------------------------------------------------------------------
// semantic_diff
// ---------------------------------------------------------------------------

pub struct SemanticDiffTool {
    bridge: Arc<Bridge>,
}

#[async_trait]
impl Tool for SemanticDiffTool {
    fn name(&self) -> &'static str {
        "semantic_diff"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            category: ToolCategory::Semantic,
            description: Some("Semantic and structural comparison of two elements.".to_string()),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "left": {"type": "string"},
                    "right": {"type": "string"},
                },
                "required": ["left", "right"],
            }),
        }
    }

    async fn run(&self, args: Value, ctx: &CallContext) -> Result<Envelope, ToolError> {
        let (Some(left_ref), Some(right_ref)) = (str_arg(&args, "left"), str_arg(&args, "right"))
        else {
            return Ok(Envelope::err(
                codes::ELEMENT_NOT_FOUND,
                "left and right element references are required",
            ));
        };
        let context = resolve_context(&self.bridge, &args, ctx);

        let left = match resolve_or_envelope(
            &self.bridge,
            &context.project_id,
            left_ref,
            codes::ELEMENT_NOT_FOUND,
        )
        .await?
        {
            Ok(node) => node,
            Err(envelope) => return Ok(envelope),
        };
        let right = match resolve_or_envelope(
            &self.bridge,
            &context.project_id,
            right_ref,
            codes::ELEMENT_NOT_FOUND,
        )
        .await?
        {
            Ok(node) => node,
            Err(envelope) => return Ok(envelope),
        };

        let text_of = |n: &GraphNode| match n.prop_str("path") {
            Some(path) => format!("{} {}", n.display_name(), path),
            None => n.display_name().to_string(),
        };
        let similarity = self
            .bridge
            .embeddings
            .similarity(&text_of(&left), &text_of(&right))
            .await?;

        let describe = |n: &GraphNode| {
            json!({ "id": n.id, "type": n.node_type, "path": n.prop_str("path") })
        };
        Ok(Envelope::ok_with_summary(
            json!({
                "left": describe(&left),
                "right": describe(&right),
                "sameKind": left.node_type == right.node_type,
                "similarity": similarity,
            }),
            format!("similarity {:.2}", similarity),
        ))
    }
}

// ---------------------------------------------------------------------------
// code_clusters
// ---------------------------------------------------------------------------

pub struct CodeClustersTool {
    bridge: Arc<Bridge>,
}

#[async_trait]
impl Tool for CodeClustersTool {
    fn name(&self) -> &'static str {
        "code_clusters"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            category: ToolCategory::Semantic,
            description: Some("Precomputed community clusters, largest first.".to_string()),
            input_schema: json!({
                "type": "object",
                "properties": { "limit": {"type": "integer", "default": 10} },
            }),
        }
    }

    async fn run(&self, args: Value, ctx: &CallContext) -> Result<Envelope, ToolError> {
        let graph = match require_graph(&self.bridge) {
            Ok(g) => g,
            Err(envelope) => return Ok(envelope),
        };
        let context = resolve_context(&self.bridge, &args, ctx);
        let limit = usize_arg(&args, "limit", 10);
        let clusters: Vec<Value> = graph
            .top_communities(&context.project_id, limit)
            .await?
            .into_iter()
            .map(|node| {
                json!({
                    "id": node.id,
                    "label": node.prop_str("label"),
                    "summary": node.prop_str("summary"),
                    "memberCount": node.properties.get("memberCount").cloned().unwrap_or(Value::Null),
                })
            })
            .collect();
        let count = clusters.len();
        Ok(Envelope::ok_with_summary(
            json!({ "clusters": clusters }),
            format!("{} cluster(s)", count),
        ))
    }
}
