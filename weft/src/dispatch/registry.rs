//! Tool trait and registry.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::envelope::Envelope;
use crate::graph::StoreError;

/// Catalog grouping, surfaced by `tools_list`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCategory {
    Graph,
    Semantic,
    Tests,
    Progress,
    Episodes,
    Coordination,
    Docs,
}

/// Tool metadata: name, category, description, and the JSON schema of its
/// arguments.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolSpec {
    pub name: String,
    pub category: ToolCategory,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub input_schema: Value,
}

/// Per-call context. Carries the logical session id; everything else comes
/// through the bridge a handler was constructed with.
#[derive(Clone, Debug, Default)]
pub struct CallContext {
    pub session_id: Option<String>,
}

impl CallContext {
    pub fn session(&self) -> Option<&str> {
        self.session_id.as_deref()
    }
}

/// Unexpected handler failure. Expected failures are `Ok(Envelope::Err)`;
/// this error re-raises out of `call_tool` so a supervising layer can log it.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("internal error: {0}")]
    Internal(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// One tool in the fixed catalog.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;

    fn spec(&self) -> ToolSpec;

    /// Runs with already-normalized args. Returns an envelope for both
    /// success and expected failure; `Err` is reserved for internal errors.
    async fn run(&self, args: Value, ctx: &CallContext) -> Result<Envelope, ToolError>;
}

/// Name-keyed tool registry.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<&'static str, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tool under its name. Last registration wins.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// All specs, sorted by name.
    pub fn specs(&self) -> Vec<ToolSpec> {
        let mut specs: Vec<ToolSpec> = self.tools.values().map(|t| t.spec()).collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
