//! Embeddings: the embedder client, the vector store interface, and the
//! per-project readiness manager.
//!
//! The vector store is a best-effort cache over the graph store. Readiness is
//! process-local: a full rebuild regenerates all vectors and marks the project
//! ready; an incremental rebuild only marks it dirty.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::graph::{GraphStore, NodeType, StoreError};

/// Produces fixed-size float vectors from text.
///
/// Implementations must be `Send + Sync`; calls happen from tool handlers and
/// from the background rebuild task.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embeds each text, one vector per input in the same order.
    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, StoreError>;

    /// Vector dimension returned by [`Embedder::embed`].
    fn dimension(&self) -> usize;
}

/// Embedder backed by an HTTP endpoint.
///
/// Posts `{"texts": [...], "model": "..."}` and expects
/// `{"vectors": [[f32, ...], ...]}` back. The endpoint URL comes from runtime
/// policy; when none is configured deployments fall back to [`HashEmbedder`].
pub struct HttpEmbedder {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    dimension: usize,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    texts: &'a [&'a str],
    model: &'a str,
}

#[derive(Deserialize)]
struct EmbedResponse {
    vectors: Vec<Vec<f32>>,
}

impl HttpEmbedder {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>, dimension: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            model: model.into(),
            dimension,
        }
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, StoreError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&EmbedRequest {
                texts,
                model: &self.model,
            })
            .send()
            .await
            .map_err(|e| StoreError::Embedding(format!("embedding endpoint error: {}", e)))?;
        let body: EmbedResponse = response
            .json()
            .await
            .map_err(|e| StoreError::Embedding(format!("embedding response malformed: {}", e)))?;
        if body.vectors.len() != texts.len() {
            return Err(StoreError::Embedding(format!(
                "embedding endpoint returned {} vectors for {} texts",
                body.vectors.len(),
                texts.len()
            )));
        }
        Ok(body.vectors)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Deterministic bag-of-tokens embedder. No model behind it; similar texts
/// share token buckets and therefore score close under cosine. Used by tests
/// and endpoint-less deployments.
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn bucket(&self, token: &str) -> usize {
        // FNV-1a, folded into the dimension.
        let mut hash: u64 = 0xcbf29ce484222325;
        for b in token.bytes() {
            hash ^= b as u64;
            hash = hash.wrapping_mul(0x100000001b3);
        }
        (hash % self.dimension as u64) as usize
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(64)
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, StoreError> {
        Ok(texts
            .iter()
            .map(|text| {
                let mut v = vec![0.0f32; self.dimension];
                for token in text
                    .split(|c: char| !c.is_alphanumeric())
                    .filter(|t| !t.is_empty())
                {
                    v[self.bucket(&token.to_lowercase())] += 1.0;
                }
                v
            })
            .collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Collections the vector store partitions records into.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingKind {
    Function,
    Class,
    File,
}

impl EmbeddingKind {
    pub const ALL: &'static [EmbeddingKind] =
        &[EmbeddingKind::Function, EmbeddingKind::Class, EmbeddingKind::File];

    /// Collection name in the vector store.
    pub fn collection(&self) -> &'static str {
        match self {
            EmbeddingKind::Function => "functions",
            EmbeddingKind::Class => "classes",
            EmbeddingKind::File => "files",
        }
    }

    pub fn from_node_type(t: NodeType) -> Option<EmbeddingKind> {
        match t {
            NodeType::Function => Some(EmbeddingKind::Function),
            NodeType::Class => Some(EmbeddingKind::Class),
            NodeType::File => Some(EmbeddingKind::File),
            _ => None,
        }
    }
}

/// One embedded entity.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddingRecord {
    pub id: String,
    pub project_id: String,
    pub kind: EmbeddingKind,
    pub name: String,
    #[serde(skip_serializing)]
    pub vector: Vec<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// A scored search hit.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VectorHit {
    pub id: String,
    pub name: String,
    pub kind: EmbeddingKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub score: f32,
}

/// Capability interface of the vector store client.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn upsert(&self, records: Vec<EmbeddingRecord>) -> Result<(), StoreError>;

    /// Nearest records to `vector` in the given collections, best first.
    async fn search(
        &self,
        project_id: &str,
        kinds: &[EmbeddingKind],
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<VectorHit>, StoreError>;

    /// Record count per collection for a project.
    async fn counts(&self, project_id: &str) -> Result<HashMap<String, usize>, StoreError>;

    /// Drops all records for a project.
    async fn clear_project(&self, project_id: &str) -> Result<(), StoreError>;
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// Pure in-memory [`VectorStore`] with cosine scoring.
#[derive(Default)]
pub struct MemoryVectorStore {
    // Keyed by project; records carry their collection.
    data: DashMap<String, Vec<EmbeddingRecord>>,
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn upsert(&self, records: Vec<EmbeddingRecord>) -> Result<(), StoreError> {
        for record in records {
            let mut rows = self.data.entry(record.project_id.clone()).or_default();
            rows.retain(|r| !(r.id == record.id && r.kind == record.kind));
            rows.push(record);
        }
        Ok(())
    }

    async fn search(
        &self,
        project_id: &str,
        kinds: &[EmbeddingKind],
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<VectorHit>, StoreError> {
        let mut hits: Vec<VectorHit> = self
            .data
            .get(project_id)
            .map(|rows| {
                rows.iter()
                    .filter(|r| kinds.is_empty() || kinds.contains(&r.kind))
                    .map(|r| VectorHit {
                        id: r.id.clone(),
                        name: r.name.clone(),
                        kind: r.kind,
                        path: r.path.clone(),
                        score: cosine_similarity(&r.vector, vector),
                    })
                    .collect()
            })
            .unwrap_or_default();
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn counts(&self, project_id: &str) -> Result<HashMap<String, usize>, StoreError> {
        let mut counts: HashMap<String, usize> = HashMap::new();
        for kind in EmbeddingKind::ALL {
            counts.insert(kind.collection().to_string(), 0);
        }
        if let Some(rows) = self.data.get(project_id) {
            for row in rows.iter() {
                *counts.entry(row.kind.collection().to_string()).or_insert(0) += 1;
            }
        }
        Ok(counts)
    }

    async fn clear_project(&self, project_id: &str) -> Result<(), StoreError> {
        self.data.remove(project_id);
        Ok(())
    }
}

/// Per-project embedding lifecycle: readiness flag plus the
/// generate → store → mark-ready pipeline.
///
/// The readiness map is process-local and rebuilt on restart; it answers
/// "can semantic search trust the vector store for this project right now".
pub struct EmbeddingManager {
    embedder: Arc<dyn Embedder>,
    vectors: Arc<dyn VectorStore>,
    ready: DashMap<String, bool>,
}

impl EmbeddingManager {
    pub fn new(embedder: Arc<dyn Embedder>, vectors: Arc<dyn VectorStore>) -> Self {
        Self {
            embedder,
            vectors,
            ready: DashMap::new(),
        }
    }

    pub fn vectors(&self) -> Arc<dyn VectorStore> {
        self.vectors.clone()
    }

    pub fn is_ready(&self, project_id: &str) -> bool {
        self.ready.get(project_id).map(|r| *r).unwrap_or(false)
    }

    /// Marks the project's vectors stale (incremental rebuild hook).
    pub fn mark_dirty(&self, project_id: &str) {
        self.ready.insert(project_id.to_string(), false);
    }

    /// Embeds every live FUNCTION/CLASS/FILE node, replaces the project's
    /// vector records, and marks the project ready.
    pub async fn generate_all(
        &self,
        graph: &dyn GraphStore,
        project_id: &str,
    ) -> Result<usize, StoreError> {
        let nodes = graph
            .live_nodes(
                project_id,
                &[NodeType::Function, NodeType::Class, NodeType::File],
            )
            .await?;

        let mut records: Vec<EmbeddingRecord> = Vec::with_capacity(nodes.len());
        let texts: Vec<String> = nodes
            .iter()
            .map(|n| {
                let name = n.display_name();
                match n.prop_str("path") {
                    Some(path) => format!("{} {}", name, path),
                    None => name.to_string(),
                }
            })
            .collect();
        let text_refs: Vec<&str> = texts.iter().map(String::as_str).collect();
        let vectors = if text_refs.is_empty() {
            Vec::new()
        } else {
            self.embedder.embed(&text_refs).await?
        };

        for (node, vector) in nodes.iter().zip(vectors) {
            let Some(kind) = EmbeddingKind::from_node_type(node.node_type) else {
                continue;
            };
            records.push(EmbeddingRecord {
                id: node.id.clone(),
                project_id: project_id.to_string(),
                kind,
                name: node.display_name().to_string(),
                vector,
                path: node.prop_str("path").map(String::from),
            });
        }

        self.vectors.clear_project(project_id).await?;
        let count = records.len();
        self.vectors.upsert(records).await?;
        self.ready.insert(project_id.to_string(), true);
        Ok(count)
    }

    /// Embeds `query` and returns the best entity hits across collections.
    /// Used by semantic search and by recall's entity augmentation.
    pub async fn search_entities(
        &self,
        project_id: &str,
        query: &str,
        kinds: &[EmbeddingKind],
        limit: usize,
    ) -> Result<Vec<VectorHit>, StoreError> {
        let vectors = self.embedder.embed(&[query]).await?;
        let vector = vectors
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::Embedding("no vector returned".to_string()))?;
        self.vectors.search(project_id, kinds, &vector, limit).await
    }

    /// Cosine similarity of two texts under the configured embedder.
    pub async fn similarity(&self, a: &str, b: &str) -> Result<f32, StoreError> {
        let vectors = self.embedder.embed(&[a, b]).await?;
        match vectors.as_slice() {
            [va, vb] => Ok(cosine_similarity(va, vb)),
            _ => Err(StoreError::Embedding("expected two vectors".to_string())),
        }
    }

    /// Readiness snapshot for health reporting.
    pub fn readiness(&self, project_id: &str) -> serde_json::Value {
        json!({ "embeddingsReady": self.is_ready(project_id) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{GraphNode, MemoryGraphStore};

    /// HashEmbedder is deterministic and shaped to its dimension.
    #[tokio::test]
    async fn hash_embedder_is_deterministic() {
        let embedder = HashEmbedder::new(32);
        let a = embedder.embed(&["parse tokens"]).await.unwrap();
        let b = embedder.embed(&["parse tokens"]).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a[0].len(), 32);
    }

    /// Identical texts score 1.0; disjoint token sets score lower.
    #[tokio::test]
    async fn vector_search_ranks_by_similarity() {
        let embedder = Arc::new(HashEmbedder::default());
        let vectors = Arc::new(MemoryVectorStore::new());
        let texts = ["parse query tokens", "render html page"];
        let embedded = embedder.embed(&texts).await.unwrap();
        vectors
            .upsert(vec![
                EmbeddingRecord {
                    id: "fn:parse".into(),
                    project_id: "p".into(),
                    kind: EmbeddingKind::Function,
                    name: "parse".into(),
                    vector: embedded[0].clone(),
                    path: None,
                },
                EmbeddingRecord {
                    id: "fn:render".into(),
                    project_id: "p".into(),
                    kind: EmbeddingKind::Function,
                    name: "render".into(),
                    vector: embedded[1].clone(),
                    path: None,
                },
            ])
            .await
            .unwrap();

        let query = embedder.embed(&["parse query tokens"]).await.unwrap();
        let hits = vectors
            .search("p", &[EmbeddingKind::Function], &query[0], 2)
            .await
            .unwrap();
        assert_eq!(hits[0].id, "fn:parse");
        assert!(hits[0].score > hits[1].score);
    }

    /// generate_all embeds live entities, fills collections, and flips the
    /// readiness flag; mark_dirty flips it back.
    #[tokio::test]
    async fn generate_then_dirty_roundtrip() {
        let graph = MemoryGraphStore::new();
        for (id, t) in [
            ("fn:a", NodeType::Function),
            ("class:B", NodeType::Class),
            ("file:c", NodeType::File),
        ] {
            graph
                .upsert_node(
                    GraphNode::new(id, t, "p").with_property("name", serde_json::json!(id)),
                )
                .await
                .unwrap();
        }
        let manager = EmbeddingManager::new(
            Arc::new(HashEmbedder::default()),
            Arc::new(MemoryVectorStore::new()),
        );
        assert!(!manager.is_ready("p"));

        let count = manager.generate_all(&graph, "p").await.unwrap();
        assert_eq!(count, 3);
        assert!(manager.is_ready("p"));

        let counts = manager.vectors().counts("p").await.unwrap();
        assert_eq!(counts["functions"], 1);
        assert_eq!(counts["classes"], 1);
        assert_eq!(counts["files"], 1);

        manager.mark_dirty("p");
        assert!(!manager.is_ready("p"));
    }
}
