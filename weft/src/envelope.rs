//! Uniform tool-response envelope.
//!
//! Every tool call resolves to exactly one [`Envelope`]: `{ok: true, data, ...}`
//! on success, `{ok: false, error: {code, reason, recoverable, hint?}}` on an
//! expected failure. Handlers build envelopes structurally; serialization to the
//! wire shape happens once at the transport boundary.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Stable error codes, UPPER_SNAKE on the wire.
///
/// The registry is open-ended: subsystems add codes following the taxonomy
/// (`*_INVALID_INPUT`, `*_UNAVAILABLE`, `*_NOT_FOUND`, `*_FAILED`), but codes
/// listed here are contracts and must not be renamed.
pub mod codes {
    pub const TOOL_NOT_FOUND: &str = "TOOL_NOT_FOUND";
    pub const TOOL_DEADLINE_EXCEEDED: &str = "TOOL_DEADLINE_EXCEEDED";
    pub const GRAPH_QUERY_FAILED: &str = "GRAPH_QUERY_FAILED";
    pub const GRAPH_QUERY_EXCEPTION: &str = "GRAPH_QUERY_EXCEPTION";
    pub const GRAPH_QUERY_ASOF_UNSUPPORTED_FOR_CYPHER: &str =
        "GRAPH_QUERY_ASOF_UNSUPPORTED_FOR_CYPHER";
    pub const WORKSPACE_NOT_FOUND: &str = "WORKSPACE_NOT_FOUND";
    pub const SOURCE_DIR_NOT_FOUND: &str = "SOURCE_DIR_NOT_FOUND";
    pub const WORKSPACE_PATH_SANDBOXED: &str = "WORKSPACE_PATH_SANDBOXED";
    pub const ARCH_ENGINE_UNAVAILABLE: &str = "ARCH_ENGINE_UNAVAILABLE";
    pub const TEST_ENGINE_UNAVAILABLE: &str = "TEST_ENGINE_UNAVAILABLE";
    pub const DOCS_ENGINE_UNAVAILABLE: &str = "DOCS_ENGINE_UNAVAILABLE";
    pub const GRAPH_STORE_UNAVAILABLE: &str = "GRAPH_STORE_UNAVAILABLE";
    pub const VECTOR_STORE_UNAVAILABLE: &str = "VECTOR_STORE_UNAVAILABLE";
    pub const RETRIEVER_UNAVAILABLE: &str = "RETRIEVER_UNAVAILABLE";
    pub const ELEMENT_NOT_FOUND: &str = "ELEMENT_NOT_FOUND";
    pub const EPISODE_ADD_INVALID_INPUT: &str = "EPISODE_ADD_INVALID_INPUT";
    pub const EPISODE_ADD_INVALID_METADATA: &str = "EPISODE_ADD_INVALID_METADATA";
    pub const EPISODE_RECALL_INVALID_INPUT: &str = "EPISODE_RECALL_INVALID_INPUT";
    pub const DECISION_QUERY_INVALID_INPUT: &str = "DECISION_QUERY_INVALID_INPUT";
    pub const AGENT_CLAIM_INVALID_INPUT: &str = "AGENT_CLAIM_INVALID_INPUT";
    pub const AGENT_RELEASE_INVALID_INPUT: &str = "AGENT_RELEASE_INVALID_INPUT";
    pub const DIFF_SINCE_INVALID_INPUT: &str = "DIFF_SINCE_INVALID_INPUT";
    pub const DIFF_SINCE_INVALID_TYPES: &str = "DIFF_SINCE_INVALID_TYPES";
    pub const DIFF_SINCE_ANCHOR_NOT_FOUND: &str = "DIFF_SINCE_ANCHOR_NOT_FOUND";
    pub const CONTEXT_PACK_INVALID_INPUT: &str = "CONTEXT_PACK_INVALID_INPUT";
    pub const CONTRACT_VALIDATE_INVALID_INPUT: &str = "CONTRACT_VALIDATE_INVALID_INPUT";
    pub const COPILOT_INSTR_TARGET_NOT_FOUND: &str = "COPILOT_INSTR_TARGET_NOT_FOUND";
    pub const REF_REPO_MISSING: &str = "REF_REPO_MISSING";
    pub const REF_REPO_NOT_FOUND: &str = "REF_REPO_NOT_FOUND";
    pub const INIT_MISSING_WORKSPACE: &str = "INIT_MISSING_WORKSPACE";
    pub const SEMANTIC_SLICE_INVALID_INPUT: &str = "SEMANTIC_SLICE_INVALID_INPUT";
    pub const SEMANTIC_SLICE_NOT_FOUND: &str = "SEMANTIC_SLICE_NOT_FOUND";
    pub const FIND_PATTERN_INVALID_INPUT: &str = "FIND_PATTERN_INVALID_INPUT";
    pub const SEMANTIC_SEARCH_INVALID_INPUT: &str = "SEMANTIC_SEARCH_INVALID_INPUT";
    pub const TASK_UPDATE_INVALID_INPUT: &str = "TASK_UPDATE_INVALID_INPUT";
    pub const TASK_NOT_FOUND: &str = "TASK_NOT_FOUND";
    pub const IMPACT_ANALYZE_INVALID_INPUT: &str = "IMPACT_ANALYZE_INVALID_INPUT";
    pub const REFLECT_INVALID_INPUT: &str = "REFLECT_INVALID_INPUT";
}

/// Error payload of a failed envelope.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub reason: String,
    pub recoverable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

/// Success payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OkBody {
    pub data: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    #[serde(rename = "contractWarnings", skip_serializing_if = "Option::is_none")]
    pub contract_warnings: Option<Vec<String>>,
}

/// Tool call result. Kept structured end-to-end; the serialized form
/// (`{"ok": true, ...}` / `{"ok": false, "error": ...}`) is produced only at
/// the transport boundary via [`Envelope::to_wire`].
#[derive(Clone, Debug)]
pub enum Envelope {
    Ok(OkBody),
    Err(ErrorBody),
}

impl Envelope {
    /// Success with data only.
    pub fn ok(data: Value) -> Self {
        Envelope::Ok(OkBody {
            data,
            summary: None,
            tool: None,
            contract_warnings: None,
        })
    }

    /// Success with a human-readable summary line.
    pub fn ok_with_summary(data: Value, summary: impl Into<String>) -> Self {
        Envelope::Ok(OkBody {
            data,
            summary: Some(summary.into()),
            tool: None,
            contract_warnings: None,
        })
    }

    /// Recoverable error (the common case in the taxonomy).
    pub fn err(code: &str, reason: impl Into<String>) -> Self {
        Envelope::Err(ErrorBody {
            code: code.to_string(),
            reason: reason.into(),
            recoverable: true,
            hint: None,
        })
    }

    /// Non-recoverable error. Only dispatch-level failures use this.
    pub fn err_fatal(code: &str, reason: impl Into<String>) -> Self {
        Envelope::Err(ErrorBody {
            code: code.to_string(),
            reason: reason.into(),
            recoverable: false,
            hint: None,
        })
    }

    /// Attaches a hint to an error envelope; no-op on success.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        if let Envelope::Err(ref mut e) = self {
            e.hint = Some(hint.into());
        }
        self
    }

    /// Stamps the tool name onto a success envelope; no-op on error.
    pub fn with_tool(mut self, tool: &str) -> Self {
        if let Envelope::Ok(ref mut body) = self {
            body.tool = Some(tool.to_string());
        }
        self
    }

    /// Appends normalization warnings to a success envelope. Errors pass
    /// through untouched so the failure shape stays minimal.
    pub fn attach_warnings(&mut self, warnings: &[String]) {
        if warnings.is_empty() {
            return;
        }
        if let Envelope::Ok(ref mut body) = self {
            body.contract_warnings
                .get_or_insert_with(Vec::new)
                .extend(warnings.iter().cloned());
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Envelope::Ok(_))
    }

    /// Error code of a failed envelope, if any.
    pub fn error_code(&self) -> Option<&str> {
        match self {
            Envelope::Err(e) => Some(&e.code),
            Envelope::Ok(_) => None,
        }
    }

    /// Data of a success envelope, if any.
    pub fn data(&self) -> Option<&Value> {
        match self {
            Envelope::Ok(body) => Some(&body.data),
            Envelope::Err(_) => None,
        }
    }

    /// Serializes to the wire shape.
    pub fn to_wire(&self) -> Value {
        match self {
            Envelope::Ok(body) => {
                let mut v = serde_json::to_value(body).unwrap_or(Value::Null);
                if let Value::Object(ref mut map) = v {
                    map.insert("ok".to_string(), Value::Bool(true));
                }
                v
            }
            Envelope::Err(e) => serde_json::json!({
                "ok": false,
                "error": serde_json::to_value(e).unwrap_or(Value::Null),
            }),
        }
    }
}

/// Truncates every string in `value` longer than `max_len` to a prefix plus
/// an ellipsis, recursively. Used by the compact response profile.
pub fn compact_strings(value: &mut Value, max_len: usize) {
    match value {
        Value::String(s) => {
            if s.chars().count() > max_len {
                let mut truncated: String = s.chars().take(max_len.saturating_sub(1)).collect();
                truncated.push('…');
                *s = truncated;
            }
        }
        Value::Array(items) => {
            for item in items {
                compact_strings(item, max_len);
            }
        }
        Value::Object(map) => {
            for (_, v) in map.iter_mut() {
                compact_strings(v, max_len);
            }
        }
        _ => {}
    }
}

/// Rewrites absolute path strings under `workspace_root` to workspace-relative
/// form, recursively, so envelopes stay stable across machines.
pub fn relativize_paths(value: &mut Value, workspace_root: &str) {
    let root = workspace_root.trim_end_matches('/');
    match value {
        Value::String(s) => {
            if let Some(rest) = s.strip_prefix(root) {
                let rest = rest.trim_start_matches('/');
                if !rest.is_empty() {
                    *s = rest.to_string();
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                relativize_paths(item, workspace_root);
            }
        }
        Value::Object(map) => {
            for (_, v) in map.iter_mut() {
                relativize_paths(v, workspace_root);
            }
        }
        _ => {}
    }
}
