//! Episode memory: validated persistence, ranked recall, decision queries,
//! and reflection into learnings.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::bridge::Summarizer;
use crate::embedding::{EmbeddingKind, EmbeddingManager};
use crate::graph::{
    now_ms, Episode, EpisodeFilter, EpisodeType, GraphRelationship, GraphStore, Learning, Outcome,
    RelType, StoreError,
};

/// Recall scoring weights. Text relevance dominates; recency breaks ties;
/// entity-hint overlap nudges related episodes up.
const WEIGHT_TEXT: f64 = 0.6;
const WEIGHT_RECENCY: f64 = 0.3;
const WEIGHT_ENTITY: f64 = 0.2;

const RECALL_DEFAULT_LIMIT: usize = 10;
const REFLECT_WINDOW: usize = 20;

#[derive(Debug, Error)]
pub enum EpisodeError {
    #[error("invalid episode input: {0}")]
    InvalidInput(String),
    #[error("invalid episode metadata: {0}")]
    InvalidMetadata(String),
    #[error("graph store unavailable")]
    Unavailable,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Raw episode input as handed to `episode_add`.
#[derive(Clone, Debug, Default)]
pub struct EpisodeInput {
    pub project_id: String,
    pub episode_type: Option<String>,
    pub content: String,
    pub entities: Vec<String>,
    pub task_id: Option<String>,
    pub outcome: Option<String>,
    pub metadata: BTreeMap<String, Value>,
    pub sensitive: bool,
    pub agent_id: Option<String>,
    pub session_id: Option<String>,
}

/// Recall parameters. All filters optional; `query` drives text ranking.
#[derive(Clone, Debug, Default)]
pub struct RecallQuery {
    pub project_id: String,
    pub query: Option<String>,
    pub agent_id: Option<String>,
    pub task_id: Option<String>,
    pub types: Vec<EpisodeType>,
    pub entities: Vec<String>,
    pub since: Option<i64>,
    pub limit: Option<usize>,
}

/// One scored recall hit.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedEpisode {
    #[serde(flatten)]
    pub episode: Episode,
    pub score: f64,
}

/// Outcome of a reflection pass.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReflectOutcome {
    pub reflection_id: String,
    pub learnings_created: usize,
}

fn tokens(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() >= 2)
        .map(|t| t.to_lowercase())
        .collect()
}

fn text_similarity(query: &BTreeSet<String>, content: &str) -> f64 {
    if query.is_empty() {
        return 0.0;
    }
    let content_tokens = tokens(content);
    if content_tokens.is_empty() {
        return 0.0;
    }
    let overlap = query.intersection(&content_tokens).count();
    overlap as f64 / query.len() as f64
}

fn recency(timestamp: i64, now: i64) -> f64 {
    let age_days = ((now - timestamp).max(0)) as f64 / 86_400_000.0;
    1.0 / (1.0 + age_days)
}

/// Validates type-dependent invariants, returning the parsed type/outcome.
fn validate(input: &EpisodeInput) -> Result<(EpisodeType, Option<Outcome>), EpisodeError> {
    let type_str = input
        .episode_type
        .as_deref()
        .ok_or_else(|| EpisodeError::InvalidInput("missing type".to_string()))?;
    let episode_type = EpisodeType::parse(type_str)
        .ok_or_else(|| EpisodeError::InvalidInput(format!("unknown episode type: {}", type_str)))?;
    if input.content.trim().is_empty() {
        return Err(EpisodeError::InvalidInput("missing content".to_string()));
    }
    if input.project_id.is_empty() {
        return Err(EpisodeError::InvalidInput("missing projectId".to_string()));
    }

    let outcome = match input.outcome.as_deref() {
        Some(s) => Some(
            Outcome::parse(s)
                .ok_or_else(|| EpisodeError::InvalidInput(format!("invalid outcome: {}", s)))?,
        ),
        None => None,
    };

    let has_meta = |keys: &[&str]| {
        keys.iter().any(|k| {
            input
                .metadata
                .get(*k)
                .and_then(|v| v.as_str())
                .map_or(false, |s| !s.trim().is_empty())
        })
    };

    match episode_type {
        EpisodeType::Decision => {
            if outcome.is_none() {
                return Err(EpisodeError::InvalidInput(
                    "DECISION requires an outcome (success|failure|partial)".to_string(),
                ));
            }
            if !has_meta(&["rationale", "reason"]) {
                return Err(EpisodeError::InvalidMetadata(
                    "DECISION requires metadata.rationale or metadata.reason".to_string(),
                ));
            }
        }
        EpisodeType::Edit => {
            if input.entities.is_empty() {
                return Err(EpisodeError::InvalidInput(
                    "EDIT requires at least one entity".to_string(),
                ));
            }
        }
        EpisodeType::TestResult => {
            if outcome.is_none() {
                return Err(EpisodeError::InvalidInput(
                    "TEST_RESULT requires an outcome (success|failure|partial)".to_string(),
                ));
            }
            if !has_meta(&["testName", "testFile"]) {
                return Err(EpisodeError::InvalidMetadata(
                    "TEST_RESULT requires metadata.testName or metadata.testFile".to_string(),
                ));
            }
        }
        EpisodeType::Error => {
            if !has_meta(&["errorCode", "stack"]) {
                return Err(EpisodeError::InvalidMetadata(
                    "ERROR requires metadata.errorCode or metadata.stack".to_string(),
                ));
            }
        }
        EpisodeType::Observation | EpisodeType::Reflection => {}
    }

    Ok((episode_type, outcome))
}

/// Persists, recalls, and reflects over episodes.
pub struct EpisodeEngine {
    graph: Option<Arc<dyn GraphStore>>,
    embeddings: Arc<EmbeddingManager>,
    summarizer: Option<Arc<dyn Summarizer>>,
    default_agent_id: String,
}

impl EpisodeEngine {
    pub fn new(
        graph: Option<Arc<dyn GraphStore>>,
        embeddings: Arc<EmbeddingManager>,
        summarizer: Option<Arc<dyn Summarizer>>,
        default_agent_id: String,
    ) -> Self {
        Self {
            graph,
            embeddings,
            summarizer,
            default_agent_id,
        }
    }

    fn graph(&self) -> Result<&Arc<dyn GraphStore>, EpisodeError> {
        self.graph.as_ref().ok_or(EpisodeError::Unavailable)
    }

    /// Validates and persists one episode; returns its id.
    pub async fn add(&self, input: EpisodeInput) -> Result<String, EpisodeError> {
        let (episode_type, outcome) = validate(&input)?;
        let graph = self.graph()?;

        let id = format!("ep-{}", uuid::Uuid::new_v4().simple());
        graph
            .put_episode(Episode {
                id: id.clone(),
                project_id: input.project_id,
                episode_type,
                content: input.content,
                entities: input.entities,
                task_id: input.task_id,
                outcome,
                metadata: input.metadata,
                sensitive: input.sensitive,
                agent_id: input
                    .agent_id
                    .unwrap_or_else(|| self.default_agent_id.clone()),
                session_id: input.session_id,
                timestamp: now_ms(),
            })
            .await?;
        Ok(id)
    }

    /// Filters and ranks episodes by text similarity, recency, and overlap
    /// with entity hints. When a textual query is present, the embedding
    /// manager augments the hint set with top vector candidates; hints shape
    /// ranking while hard filtering uses only the caller's entities.
    pub async fn recall(&self, query: RecallQuery) -> Result<Vec<RankedEpisode>, EpisodeError> {
        if query.project_id.is_empty() {
            return Err(EpisodeError::InvalidInput("missing projectId".to_string()));
        }
        let graph = self.graph()?;

        let filter = EpisodeFilter {
            agent_id: query.agent_id.clone(),
            task_id: query.task_id.clone(),
            types: query.types.clone(),
            entities: query.entities.clone(),
            since: query.since,
        };
        let episodes = graph.episodes(&query.project_id, &filter).await?;

        let mut entity_hints: BTreeSet<String> = query.entities.iter().cloned().collect();
        if let Some(text) = query.query.as_deref() {
            if self.embeddings.is_ready(&query.project_id) {
                if let Ok(hits) = self
                    .embeddings
                    .search_entities(&query.project_id, text, EmbeddingKind::ALL, 5)
                    .await
                {
                    entity_hints.extend(hits.into_iter().map(|h| h.id));
                }
            }
        }

        let query_tokens = query
            .query
            .as_deref()
            .map(tokens)
            .unwrap_or_default();
        let now = now_ms();
        let mut ranked: Vec<RankedEpisode> = episodes
            .into_iter()
            .map(|ep| {
                let text = text_similarity(&query_tokens, &ep.content);
                let fresh = recency(ep.timestamp, now);
                let entity = if !entity_hints.is_empty()
                    && ep.entities.iter().any(|e| entity_hints.contains(e))
                {
                    1.0
                } else {
                    0.0
                };
                let score =
                    WEIGHT_TEXT * text + WEIGHT_RECENCY * fresh + WEIGHT_ENTITY * entity;
                RankedEpisode { episode: ep, score }
            })
            .collect();
        ranked.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        ranked.truncate(query.limit.unwrap_or(RECALL_DEFAULT_LIMIT));
        Ok(ranked)
    }

    /// Recall restricted to DECISION episodes.
    pub async fn decision_query(
        &self,
        mut query: RecallQuery,
    ) -> Result<Vec<RankedEpisode>, EpisodeError> {
        query.types = vec![EpisodeType::Decision];
        self.recall(query).await
    }

    /// Summarizes recent episodes for a task or agent into a REFLECTION
    /// episode and LEARNING nodes attached to the involved entities.
    pub async fn reflect(
        &self,
        project_id: &str,
        task_id: Option<&str>,
        agent_id: Option<&str>,
    ) -> Result<ReflectOutcome, EpisodeError> {
        if task_id.is_none() && agent_id.is_none() {
            return Err(EpisodeError::InvalidInput(
                "reflect requires taskId or agentId".to_string(),
            ));
        }
        let graph = self.graph()?;

        let filter = EpisodeFilter {
            agent_id: agent_id.map(String::from),
            task_id: task_id.map(String::from),
            ..Default::default()
        };
        let mut episodes = graph.episodes(project_id, &filter).await?;
        episodes.truncate(REFLECT_WINDOW);
        if episodes.is_empty() {
            return Err(EpisodeError::InvalidInput(
                "no episodes to reflect over".to_string(),
            ));
        }

        let summary = self.summarize_episodes(&episodes).await;
        let agent = agent_id
            .map(String::from)
            .unwrap_or_else(|| self.default_agent_id.clone());

        let reflection_id = self
            .add(EpisodeInput {
                project_id: project_id.to_string(),
                episode_type: Some("REFLECTION".to_string()),
                content: summary.clone(),
                entities: Vec::new(),
                task_id: task_id.map(String::from),
                agent_id: Some(agent),
                ..Default::default()
            })
            .await?;

        // One learning covering the entities that still resolve to live nodes.
        let involved: BTreeSet<String> = episodes
            .iter()
            .flat_map(|ep| ep.entities.iter().cloned())
            .collect();
        let failures = episodes
            .iter()
            .filter(|ep| ep.outcome == Some(Outcome::Failure))
            .count();
        let confidence =
            (0.4 + 0.6 * (episodes.len() - failures) as f64 / episodes.len() as f64).min(0.95);

        let mut learnings_created = 0usize;
        let mut applies_to: Vec<String> = Vec::new();
        for entity in involved {
            if graph.live_node(project_id, &entity).await?.is_some() {
                applies_to.push(entity);
            }
        }
        if !applies_to.is_empty() {
            let learning_id = format!("learn-{}", uuid::Uuid::new_v4().simple());
            graph
                .put_learning(Learning {
                    id: learning_id.clone(),
                    project_id: project_id.to_string(),
                    content: summary,
                    confidence,
                    applies_to: applies_to.clone(),
                    source_reflection: Some(reflection_id.clone()),
                    timestamp: now_ms(),
                })
                .await?;
            for target in &applies_to {
                graph
                    .upsert_relationship(GraphRelationship::new(
                        learning_id.clone(),
                        target.clone(),
                        RelType::AppliesTo,
                        project_id,
                    ))
                    .await?;
            }
            learnings_created = 1;
        }

        Ok(ReflectOutcome {
            reflection_id,
            learnings_created,
        })
    }

    async fn summarize_episodes(&self, episodes: &[Episode]) -> String {
        let digest: String = episodes
            .iter()
            .take(6)
            .map(|ep| format!("[{:?}] {}", ep.episode_type, ep.content))
            .collect::<Vec<_>>()
            .join("; ");
        if let Some(summarizer) = &self.summarizer {
            if let Ok(summary) = summarizer.summarize(&digest).await {
                return summary;
            }
        }
        let successes = episodes
            .iter()
            .filter(|ep| ep.outcome == Some(Outcome::Success))
            .count();
        let failures = episodes
            .iter()
            .filter(|ep| ep.outcome == Some(Outcome::Failure))
            .count();
        let mut summary = format!(
            "{} episodes ({} success, {} failure): {}",
            episodes.len(),
            successes,
            failures,
            digest
        );
        if summary.len() > 500 {
            summary.truncate(497);
            summary.push_str("...");
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{HashEmbedder, MemoryVectorStore};
    use crate::graph::{MemoryGraphStore, NodeType};
    use serde_json::json;

    fn engine_with_store() -> (EpisodeEngine, Arc<MemoryGraphStore>) {
        let store = Arc::new(MemoryGraphStore::new());
        let embeddings = Arc::new(EmbeddingManager::new(
            Arc::new(HashEmbedder::default()),
            Arc::new(MemoryVectorStore::new()),
        ));
        let engine = EpisodeEngine::new(
            Some(store.clone() as Arc<dyn GraphStore>),
            embeddings,
            None,
            "agent-default".to_string(),
        );
        (engine, store)
    }

    fn decision_input(metadata: BTreeMap<String, Value>) -> EpisodeInput {
        EpisodeInput {
            project_id: "p".to_string(),
            episode_type: Some("DECISION".to_string()),
            content: "chose the parser rewrite".to_string(),
            outcome: Some("success".to_string()),
            metadata,
            ..Default::default()
        }
    }

    /// DECISION without rationale/reason is invalid metadata; adding
    /// rationale makes it pass.
    #[tokio::test]
    async fn decision_requires_rationale() {
        let (engine, _) = engine_with_store();
        let err = engine.add(decision_input(BTreeMap::new())).await.unwrap_err();
        assert!(matches!(err, EpisodeError::InvalidMetadata(_)));

        let mut meta = BTreeMap::new();
        meta.insert("rationale".to_string(), json!("benchmarks regressed"));
        let id = engine.add(decision_input(meta)).await.unwrap();
        assert!(id.starts_with("ep-"));
    }

    /// EDIT requires at least one entity; TEST_RESULT requires test metadata.
    #[tokio::test]
    async fn type_specific_validation() {
        let (engine, _) = engine_with_store();
        let err = engine
            .add(EpisodeInput {
                project_id: "p".to_string(),
                episode_type: Some("EDIT".to_string()),
                content: "edited".to_string(),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, EpisodeError::InvalidInput(_)));

        let err = engine
            .add(EpisodeInput {
                project_id: "p".to_string(),
                episode_type: Some("TEST_RESULT".to_string()),
                content: "ran tests".to_string(),
                outcome: Some("failure".to_string()),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, EpisodeError::InvalidMetadata(_)));

        let err = engine
            .add(EpisodeInput {
                project_id: "p".to_string(),
                episode_type: Some("ERROR".to_string()),
                content: "boom".to_string(),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, EpisodeError::InvalidMetadata(_)));
    }

    /// Recall ranks by text relevance, then recency; limit applies.
    #[tokio::test]
    async fn recall_ranks_relevant_first() {
        let (engine, _) = engine_with_store();
        for content in [
            "refactored the lexer error paths",
            "updated readme badges",
            "lexer now recovers from bad tokens",
        ] {
            engine
                .add(EpisodeInput {
                    project_id: "p".to_string(),
                    episode_type: Some("OBSERVATION".to_string()),
                    content: content.to_string(),
                    ..Default::default()
                })
                .await
                .unwrap();
        }

        let hits = engine
            .recall(RecallQuery {
                project_id: "p".to_string(),
                query: Some("lexer tokens".to_string()),
                limit: Some(2),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits[0].episode.content.contains("lexer"));
        assert!(hits[1].episode.content.contains("lexer"));
    }

    /// Reflection writes a REFLECTION episode and attaches learnings to
    /// entities that still resolve.
    #[tokio::test]
    async fn reflect_creates_learning_for_live_entities() {
        let (engine, store) = engine_with_store();
        store
            .upsert_node(crate::graph::GraphNode::new(
                "fn:lex",
                NodeType::Function,
                "p",
            ))
            .await
            .unwrap();

        engine
            .add(EpisodeInput {
                project_id: "p".to_string(),
                episode_type: Some("EDIT".to_string()),
                content: "tightened lexer".to_string(),
                entities: vec!["fn:lex".to_string(), "fn:gone".to_string()],
                task_id: Some("t1".to_string()),
                agent_id: Some("a1".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();

        let outcome = engine.reflect("p", Some("t1"), Some("a1")).await.unwrap();
        assert_eq!(outcome.learnings_created, 1);

        let learnings = store
            .learnings_for("p", &["fn:lex".to_string()], 10)
            .await
            .unwrap();
        assert_eq!(learnings.len(), 1);
        assert!(learnings[0].applies_to.contains(&"fn:lex".to_string()));
        // The vanished entity is not attached.
        assert!(!learnings[0].applies_to.contains(&"fn:gone".to_string()));
    }
}
