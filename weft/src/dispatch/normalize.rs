//! Argument normalization: the backward-compat alias catalog.
//!
//! Rules are pure data — each names the tools it covers, a predicate, a
//! transform, and the warning it emits. Normalization is idempotent: every
//! predicate checks the pre-transform shape, so a second pass finds nothing
//! to do and emits no new warnings.

use serde_json::{Map, Value};

type ArgMap = Map<String, Value>;

struct Rule {
    tools: &'static [&'static str],
    applies: fn(&ArgMap) -> bool,
    /// Applies the transform and returns the warning to emit.
    apply: fn(&mut ArgMap) -> String,
}

fn has_str(args: &ArgMap, key: &str, value: &str) -> bool {
    args.get(key).and_then(Value::as_str) == Some(value)
}

fn rename_key(args: &mut ArgMap, from: &str, to: &str) {
    if let Some(v) = args.remove(from) {
        args.entry(to.to_string()).or_insert(v);
    }
}

static RULES: &[Rule] = &[
    Rule {
        tools: &["impact_analyze"],
        applies: |args| args.contains_key("changedFiles") && !args.contains_key("files"),
        apply: |args| {
            rename_key(args, "changedFiles", "files");
            "mapped changedFiles -> files".to_string()
        },
    },
    Rule {
        tools: &["progress_query", "task_update"],
        applies: |args| has_str(args, "status", "active"),
        apply: |args| {
            args.insert("status".to_string(), Value::String("in-progress".to_string()));
            "mapped status 'active' -> 'in-progress'".to_string()
        },
    },
    Rule {
        tools: &["progress_query"],
        applies: |args| has_str(args, "status", "all"),
        apply: |args| {
            args.remove("status");
            "dropped status 'all' (all statuses are returned by default)".to_string()
        },
    },
    Rule {
        tools: &["progress_query"],
        applies: |args| {
            !args.contains_key("type")
                && args
                    .get("query")
                    .and_then(Value::as_str)
                    .map_or(false, |q| derive_type_from_query(q).is_some())
        },
        apply: |args| {
            // The predicate established derivability; "task" is unreachable.
            let derived = args
                .get("query")
                .and_then(Value::as_str)
                .and_then(derive_type_from_query)
                .unwrap_or("task");
            args.insert("type".to_string(), Value::String(derived.to_string()));
            format!("derived type '{}' from query text", derived)
        },
    },
    Rule {
        tools: &["graph_set_workspace", "graph_rebuild", "init_project_setup"],
        applies: |args| args.contains_key("workspacePath") && !args.contains_key("workspaceRoot"),
        apply: |args| {
            rename_key(args, "workspacePath", "workspaceRoot");
            "mapped workspacePath -> workspaceRoot".to_string()
        },
    },
];

fn derive_type_from_query(query: &str) -> Option<&'static str> {
    let lowered = query.to_lowercase();
    if lowered.contains("task") {
        Some("task")
    } else if lowered.contains("feature") {
        Some("feature")
    } else {
        None
    }
}

/// Applies every matching rule for `tool` to `args`, returning the
/// normalized args and one warning per applied rule.
pub fn normalize(tool: &str, args: Value) -> (Value, Vec<String>) {
    let mut map = match args {
        Value::Object(map) => map,
        other => return (other, Vec::new()),
    };
    let mut warnings = Vec::new();
    for rule in RULES {
        if rule.tools.contains(&tool) && (rule.applies)(&map) {
            warnings.push((rule.apply)(&mut map));
        }
    }
    (Value::Object(map), warnings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// changedFiles maps to files with the documented warning.
    #[test]
    fn maps_changed_files() {
        let (args, warnings) =
            normalize("impact_analyze", json!({"changedFiles": ["a.ts"], "depth": 2}));
        assert_eq!(args["files"], json!(["a.ts"]));
        assert!(args.get("changedFiles").is_none());
        assert_eq!(warnings, vec!["mapped changedFiles -> files".to_string()]);
    }

    /// Rules only fire for their tools.
    #[test]
    fn rules_are_tool_scoped() {
        let (args, warnings) = normalize("graph_query", json!({"changedFiles": ["a.ts"]}));
        assert_eq!(args["changedFiles"], json!(["a.ts"]));
        assert!(warnings.is_empty());
    }

    /// Status aliases rewrite for progress_query and task_update.
    #[test]
    fn status_aliases() {
        let (args, warnings) = normalize("progress_query", json!({"status": "active"}));
        assert_eq!(args["status"], json!("in-progress"));
        assert_eq!(warnings.len(), 1);

        let (args, warnings) = normalize("progress_query", json!({"status": "all"}));
        assert!(args.get("status").is_none());
        assert_eq!(warnings.len(), 1);

        let (args, warnings) = normalize("task_update", json!({"status": "active"}));
        assert_eq!(args["status"], json!("in-progress"));
        assert_eq!(warnings.len(), 1);
    }

    /// Type derives from query text only when absent.
    #[test]
    fn derives_type_from_query() {
        let (args, warnings) =
            normalize("progress_query", json!({"query": "open tasks for auth"}));
        assert_eq!(args["type"], json!("task"));
        assert_eq!(warnings, vec!["derived type 'task' from query text".to_string()]);

        let (args, warnings) = normalize(
            "progress_query",
            json!({"query": "feature rollout", "type": "feature"}),
        );
        assert_eq!(args["type"], json!("feature"));
        assert!(warnings.is_empty());
    }

    /// workspacePath maps to workspaceRoot for workspace tools.
    #[test]
    fn maps_workspace_path() {
        for tool in ["graph_set_workspace", "graph_rebuild"] {
            let (args, warnings) = normalize(tool, json!({"workspacePath": "/tmp/w"}));
            assert_eq!(args["workspaceRoot"], json!("/tmp/w"));
            assert_eq!(warnings.len(), 1);
        }
    }

    /// Normalization is idempotent: a second pass changes nothing and emits
    /// no warnings.
    #[test]
    fn idempotent() {
        let cases = [
            ("impact_analyze", json!({"changedFiles": ["a.ts"]})),
            ("progress_query", json!({"status": "active", "query": "tasks"})),
            ("graph_rebuild", json!({"workspacePath": "/w"})),
        ];
        for (tool, args) in cases {
            let (once, w1) = normalize(tool, args);
            assert!(!w1.is_empty());
            let (twice, w2) = normalize(tool, once.clone());
            assert_eq!(once, twice);
            assert!(w2.is_empty(), "second pass warned for {}: {:?}", tool, w2);
        }
    }
}
