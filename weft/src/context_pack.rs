//! Context-pack assembly: seed selection, personalized PageRank, symbol
//! materialization, memory enrichment, and deterministic budget trimming.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::bridge::PprEngine;
use crate::graph::{
    Claim, Episode, EpisodeFilter, EpisodeType, GraphNode, GraphStore, Learning, NodeType, RelType,
    StoreError,
};

const SEED_LIMIT: usize = 5;
const PPR_MAX_RESULTS: usize = 60;
const CORE_SYMBOL_LIMIT: usize = 8;
const SNIPPET_CHAR_LIMIT: usize = 800;
const EDGE_LIMIT: usize = 5;
const ENRICH_LIMIT: usize = 10;
const TRIM_MAX_ITERATIONS: usize = 200;
const SNIPPET_TRIM_THRESHOLD: usize = 220;
const SNIPPET_TRIM_TARGET: usize = 217;
const DEFAULT_TOKEN_BUDGET: usize = 4000;

/// Types eligible as seeds and core symbols.
const SYMBOL_TYPES: &[NodeType] = &[NodeType::Function, NodeType::Class, NodeType::File];

#[derive(Debug, Error)]
pub enum ContextPackError {
    #[error("invalid context pack input: {0}")]
    InvalidInput(String),
    #[error("graph store unavailable")]
    Unavailable,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Assembly request.
#[derive(Clone, Debug)]
pub struct ContextPackRequest {
    pub project_id: String,
    pub workspace_root: std::path::PathBuf,
    pub task: String,
    pub task_id: Option<String>,
    pub agent_id: String,
    pub include_decisions: bool,
    pub include_learnings: bool,
    pub include_episodes: bool,
    pub token_budget: Option<usize>,
}

/// One materialized symbol with its snippet and call neighborhood.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CoreSymbol {
    pub id: String,
    pub name: String,
    pub kind: NodeType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_line: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_line: Option<u64>,
    pub callers: Vec<String>,
    pub callees: Vec<String>,
}

/// The assembled pack.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextPack {
    pub task: String,
    pub seeds: Vec<String>,
    pub core_symbols: Vec<CoreSymbol>,
    pub decisions: Vec<Episode>,
    pub learnings: Vec<Learning>,
    pub episodes: Vec<Episode>,
    pub blockers: Vec<Claim>,
    pub token_estimate: usize,
}

fn task_tokens(task: &str) -> Vec<String> {
    task.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() >= 3)
        .map(|t| t.to_lowercase())
        .collect()
}

/// Rough tokens-from-chars estimate over the serialized pack.
fn estimate_tokens(pack: &ContextPack) -> usize {
    serde_json::to_string(pack).map(|s| s.len() / 4).unwrap_or(0)
}

pub struct ContextPackAssembler {
    graph: Option<Arc<dyn GraphStore>>,
    ppr: Option<Arc<dyn PprEngine>>,
}

impl ContextPackAssembler {
    pub fn new(graph: Option<Arc<dyn GraphStore>>, ppr: Option<Arc<dyn PprEngine>>) -> Self {
        Self { graph, ppr }
    }

    pub async fn assemble(
        &self,
        request: ContextPackRequest,
    ) -> Result<ContextPack, ContextPackError> {
        if request.task.trim().is_empty() {
            return Err(ContextPackError::InvalidInput(
                "task description is required".to_string(),
            ));
        }
        let graph = self.graph.as_ref().ok_or(ContextPackError::Unavailable)?;
        let project = request.project_id.as_str();

        let candidates = graph.live_nodes(project, SYMBOL_TYPES).await?;
        let seeds = self
            .expand_interfaces(graph.as_ref(), project, select_seeds(&request.task, &candidates))
            .await?;
        let seed_ids: Vec<String> = seeds.iter().map(|n| n.id.clone()).collect();

        // PPR ranks the neighborhood; without the engine the seeds rank
        // themselves.
        let ranked_ids: Vec<String> = match &self.ppr {
            Some(ppr) => ppr
                .personalized_pagerank(project, &seed_ids, PPR_MAX_RESULTS)
                .await
                .map(|ranked| ranked.into_iter().map(|r| r.id).collect())
                .unwrap_or_else(|_| seed_ids.clone()),
            None => seed_ids.clone(),
        };

        let mut core_symbols: Vec<CoreSymbol> = Vec::new();
        let mut selected_ids: Vec<String> = Vec::new();
        for id in &ranked_ids {
            if core_symbols.len() == CORE_SYMBOL_LIMIT {
                break;
            }
            let Some(node) = graph.live_node(project, id).await? else {
                continue;
            };
            if !SYMBOL_TYPES.contains(&node.node_type) {
                continue;
            }
            selected_ids.push(node.id.clone());
            core_symbols.push(
                self.materialize(graph.as_ref(), project, &request.workspace_root, node)
                    .await?,
            );
        }

        let decisions = if request.include_decisions && !selected_ids.is_empty() {
            graph
                .episodes(
                    project,
                    &EpisodeFilter {
                        types: vec![EpisodeType::Decision],
                        entities: selected_ids.clone(),
                        ..Default::default()
                    },
                )
                .await?
                .into_iter()
                .take(ENRICH_LIMIT)
                .collect()
        } else {
            Vec::new()
        };

        let learnings = if request.include_learnings {
            graph
                .learnings_for(project, &selected_ids, ENRICH_LIMIT)
                .await?
        } else {
            Vec::new()
        };

        let episodes = if request.include_episodes {
            let filter = match &request.task_id {
                Some(task_id) => EpisodeFilter {
                    task_id: Some(task_id.clone()),
                    ..Default::default()
                },
                None => EpisodeFilter {
                    agent_id: Some(request.agent_id.clone()),
                    ..Default::default()
                },
            };
            graph
                .episodes(project, &filter)
                .await?
                .into_iter()
                .take(ENRICH_LIMIT)
                .collect()
        } else {
            Vec::new()
        };

        // Active blockers: someone else holds a claim on a selected symbol.
        let mut blockers: Vec<Claim> = Vec::new();
        for claim in graph.live_claims(project, None).await? {
            if claim.agent_id != request.agent_id && selected_ids.contains(&claim.target_id) {
                blockers.push(claim);
            }
        }

        let mut pack = ContextPack {
            task: request.task,
            seeds: seed_ids,
            core_symbols,
            decisions,
            learnings,
            episodes,
            blockers,
            token_estimate: 0,
        };
        trim_to_budget(
            &mut pack,
            request.token_budget.unwrap_or(DEFAULT_TOKEN_BUDGET),
        );
        Ok(pack)
    }

    /// Adds every implementation of interface/abstract seeds.
    async fn expand_interfaces(
        &self,
        graph: &dyn GraphStore,
        project: &str,
        seeds: Vec<GraphNode>,
    ) -> Result<Vec<GraphNode>, ContextPackError> {
        let mut out = seeds;
        let mut seen: BTreeSet<String> = out.iter().map(|n| n.id.clone()).collect();
        let interface_ids: Vec<String> = out
            .iter()
            .filter(|n| matches!(n.prop_str("kind"), Some("interface") | Some("abstract")))
            .map(|n| n.id.clone())
            .collect();
        for id in interface_ids {
            for rel in graph
                .relationships(project, RelType::ImplementedBy, Some(&id), None)
                .await?
            {
                if seen.insert(rel.to.clone()) {
                    if let Some(node) = graph.live_node(project, &rel.to).await? {
                        out.push(node);
                    }
                }
            }
        }
        Ok(out)
    }

    /// Resolves path/snippet/edges for one symbol.
    async fn materialize(
        &self,
        graph: &dyn GraphStore,
        project: &str,
        workspace_root: &Path,
        node: GraphNode,
    ) -> Result<CoreSymbol, ContextPackError> {
        // Path: own property, else the containing file's.
        let mut path = node.prop_str("path").map(String::from);
        if path.is_none() {
            for rel in graph
                .relationships(project, RelType::Contains, None, Some(&node.id))
                .await?
            {
                if let Some(parent) = graph.live_node(project, &rel.from).await? {
                    if let Some(p) = parent.prop_str("path") {
                        path = Some(p.to_string());
                        break;
                    }
                }
            }
        }

        let start_line = node.properties.get("startLine").and_then(Value::as_u64);
        let end_line = node.properties.get("endLine").and_then(Value::as_u64);
        let snippet = match (&path, start_line) {
            (Some(path), Some(start)) => {
                read_snippet(workspace_root, path, start, end_line).await
            }
            _ => None,
        };

        let callers: Vec<String> = graph
            .relationships(project, RelType::Calls, None, Some(&node.id))
            .await?
            .into_iter()
            .take(EDGE_LIMIT)
            .map(|r| r.from)
            .collect();
        let callees: Vec<String> = graph
            .relationships(project, RelType::Calls, Some(&node.id), None)
            .await?
            .into_iter()
            .take(EDGE_LIMIT)
            .map(|r| r.to)
            .collect();

        Ok(CoreSymbol {
            name: node.display_name().to_string(),
            kind: node.node_type,
            id: node.id,
            path,
            snippet,
            start_line,
            end_line,
            callers,
            callees,
        })
    }
}

/// Scores candidates by task-token containment over id/name/path; top five,
/// falling back to the first five candidates when nothing matches.
fn select_seeds(task: &str, candidates: &[GraphNode]) -> Vec<GraphNode> {
    let tokens = task_tokens(task);
    let mut scored: Vec<(usize, &GraphNode)> = candidates
        .iter()
        .map(|node| {
            let haystack = format!(
                "{} {} {}",
                node.id,
                node.prop_str("name").unwrap_or(""),
                node.prop_str("path").unwrap_or("")
            )
            .to_lowercase();
            let score = tokens.iter().filter(|t| haystack.contains(t.as_str())).count();
            (score, node)
        })
        .collect();
    scored.sort_by(|a, b| b.0.cmp(&a.0));

    let hits: Vec<GraphNode> = scored
        .iter()
        .filter(|(score, _)| *score > 0)
        .take(SEED_LIMIT)
        .map(|(_, node)| (*node).clone())
        .collect();
    if !hits.is_empty() {
        return hits;
    }
    candidates.iter().take(SEED_LIMIT).cloned().collect()
}

async fn read_snippet(
    workspace_root: &Path,
    path: &str,
    start_line: u64,
    end_line: Option<u64>,
) -> Option<String> {
    let full = if Path::new(path).is_absolute() {
        Path::new(path).to_path_buf()
    } else {
        workspace_root.join(path)
    };
    let content = tokio::fs::read_to_string(&full).await.ok()?;
    let start = (start_line.max(1) - 1) as usize;
    let end = end_line.map(|e| e as usize).unwrap_or(start + 40);
    let mut snippet: String = content
        .lines()
        .skip(start)
        .take(end.saturating_sub(start).max(1))
        .collect::<Vec<_>>()
        .join("\n");
    if snippet.len() > SNIPPET_CHAR_LIMIT {
        snippet.truncate(SNIPPET_CHAR_LIMIT);
    }
    Some(snippet)
}

/// Applies the highest-priority prune action that still has something to
/// give. Returns false when nothing applies.
fn prune_once(pack: &mut ContextPack) -> bool {
    if pack.core_symbols.len() > 1 {
        pack.core_symbols.pop();
        return true;
    }
    if pack.decisions.len() > 2 {
        pack.decisions.pop();
        return true;
    }
    if pack.learnings.len() > 2 {
        pack.learnings.pop();
        return true;
    }
    if pack.episodes.len() > 2 {
        pack.episodes.pop();
        return true;
    }
    for symbol in pack.core_symbols.iter_mut() {
        if let Some(snippet) = &mut symbol.snippet {
            if snippet.len() > SNIPPET_TRIM_THRESHOLD {
                snippet.truncate(SNIPPET_TRIM_TARGET);
                snippet.push('…');
                return true;
            }
        }
    }
    false
}

/// Deterministic trim loop: prune until under budget or no action applies,
/// capped at [`TRIM_MAX_ITERATIONS`].
fn trim_to_budget(pack: &mut ContextPack, budget: usize) {
    pack.token_estimate = estimate_tokens(pack);
    let mut iterations = 0usize;
    while pack.token_estimate > budget && iterations < TRIM_MAX_ITERATIONS {
        if !prune_once(pack) {
            break;
        }
        pack.token_estimate = estimate_tokens(pack);
        iterations += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn symbol(id: &str, snippet_len: usize) -> CoreSymbol {
        CoreSymbol {
            id: id.to_string(),
            name: id.to_string(),
            kind: NodeType::Function,
            path: None,
            snippet: Some("x".repeat(snippet_len)),
            start_line: None,
            end_line: None,
            callers: Vec::new(),
            callees: Vec::new(),
        }
    }

    fn node(id: &str, name: &str, path: &str) -> GraphNode {
        GraphNode::new(id, NodeType::Function, "p")
            .with_property("name", json!(name))
            .with_property("path", json!(path))
    }

    /// Token hits rank seeds; no hits falls back to the first candidates.
    #[test]
    fn seed_selection_scores_then_falls_back() {
        let candidates = vec![
            node("fn:parse", "parse", "src/parser.rs"),
            node("fn:render", "render", "src/render.rs"),
            node("fn:lex", "lex", "src/parser.rs"),
        ];
        let seeds = select_seeds("fix the parser edge cases", &candidates);
        assert_eq!(seeds.len(), 2);
        assert!(seeds.iter().all(|s| s.prop_str("path") == Some("src/parser.rs")));

        let fallback = select_seeds("zzz qqq www", &candidates);
        assert_eq!(fallback.len(), 3);
    }

    /// Trimming pops symbols first, keeps floors, then shortens snippets,
    /// and always terminates.
    #[test]
    fn trim_respects_floors_and_terminates() {
        let mut pack = ContextPack {
            task: "t".to_string(),
            seeds: Vec::new(),
            core_symbols: (0..8).map(|i| symbol(&format!("s{}", i), 400)).collect(),
            decisions: Vec::new(),
            learnings: Vec::new(),
            episodes: Vec::new(),
            blockers: Vec::new(),
            token_estimate: 0,
        };
        trim_to_budget(&mut pack, 60);
        assert_eq!(pack.core_symbols.len(), 1);
        let snippet = pack.core_symbols[0].snippet.as_ref().unwrap();
        assert!(snippet.chars().count() <= SNIPPET_TRIM_TARGET + 1);
        assert!(snippet.ends_with('…'));
    }

    /// A generous budget leaves the pack untouched.
    #[test]
    fn trim_noop_under_budget() {
        let mut pack = ContextPack {
            task: "t".to_string(),
            seeds: Vec::new(),
            core_symbols: vec![symbol("a", 100), symbol("b", 100)],
            decisions: Vec::new(),
            learnings: Vec::new(),
            episodes: Vec::new(),
            blockers: Vec::new(),
            token_estimate: 0,
        };
        trim_to_budget(&mut pack, 100_000);
        assert_eq!(pack.core_symbols.len(), 2);
        assert!(pack.token_estimate > 0);
    }
}
