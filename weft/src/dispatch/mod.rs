//! Tool dispatch: the per-call pipeline.
//!
//! `call_tool` normalizes arguments against the alias catalog, resolves the
//! tool, runs it, and attaches any normalization warnings to the result.
//! Expected failures come back as error envelopes; internal handler errors
//! propagate to the caller unswallowed.

pub mod normalize;
mod registry;

pub use registry::{CallContext, Tool, ToolCategory, ToolError, ToolRegistry, ToolSpec};

use std::time::Duration;

use serde_json::Value;

use crate::envelope::{codes, compact_strings, Envelope};

/// String cap applied to success data under the compact profile.
const COMPACT_MAX_STRING: usize = 200;

/// Default per-call deadline. Handlers abandoned at the deadline stop being
/// polled; background work they queued keeps running.
const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

pub struct Dispatcher {
    registry: ToolRegistry,
    call_timeout: Duration,
}

impl Dispatcher {
    pub fn new(registry: ToolRegistry) -> Self {
        Self {
            registry,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    pub fn with_timeout(registry: ToolRegistry, call_timeout: Duration) -> Self {
        Self {
            registry,
            call_timeout,
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Runs one tool call under a logical session.
    pub async fn call_tool(
        &self,
        session_id: Option<&str>,
        tool_name: &str,
        args: Value,
    ) -> Result<Envelope, ToolError> {
        let (args, warnings) = normalize::normalize(tool_name, args);
        let compact = args.get("profile").and_then(Value::as_str) == Some("compact");

        let Some(tool) = self.registry.get(tool_name) else {
            return Ok(Envelope::err_fatal(
                codes::TOOL_NOT_FOUND,
                format!("unknown tool: {}", tool_name),
            )
            .with_hint("call tools_list for the catalog"));
        };

        let ctx = CallContext {
            session_id: session_id.map(String::from),
        };
        tracing::debug!(tool = tool_name, session = ?session_id, "dispatching tool call");
        let mut envelope =
            match tokio::time::timeout(self.call_timeout, tool.run(args, &ctx)).await {
                Ok(result) => result?.with_tool(tool_name),
                Err(_) => {
                    return Ok(Envelope::err(
                        codes::TOOL_DEADLINE_EXCEEDED,
                        format!(
                            "{} did not answer within {}ms",
                            tool_name,
                            self.call_timeout.as_millis()
                        ),
                    )
                    .with_hint("retry; long-running work continues in the background"));
                }
            };
        if compact {
            if let Envelope::Ok(ref mut body) = envelope {
                compact_strings(&mut body.data, COMPACT_MAX_STRING);
            }
        }
        envelope.attach_warnings(&warnings);
        Ok(envelope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Arc;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &'static str {
            "echo"
        }

        fn spec(&self) -> ToolSpec {
            ToolSpec {
                name: "echo".to_string(),
                category: ToolCategory::Graph,
                description: None,
                input_schema: json!({"type": "object"}),
            }
        }

        async fn run(&self, args: Value, _ctx: &CallContext) -> Result<Envelope, ToolError> {
            Ok(Envelope::ok(args))
        }
    }

    struct FailingTool;

    #[async_trait]
    impl Tool for FailingTool {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn spec(&self) -> ToolSpec {
            ToolSpec {
                name: "failing".to_string(),
                category: ToolCategory::Graph,
                description: None,
                input_schema: json!({"type": "object"}),
            }
        }

        async fn run(&self, _args: Value, _ctx: &CallContext) -> Result<Envelope, ToolError> {
            Err(ToolError::Internal("handler exploded".to_string()))
        }
    }

    fn dispatcher() -> Dispatcher {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        registry.register(Arc::new(FailingTool));
        Dispatcher::new(registry)
    }

    /// Unknown tools answer TOOL_NOT_FOUND, non-recoverable.
    #[tokio::test]
    async fn unknown_tool_not_found() {
        let d = dispatcher();
        let env = d.call_tool(None, "nope", json!({})).await.unwrap();
        assert_eq!(env.error_code(), Some(codes::TOOL_NOT_FOUND));
        let wire = env.to_wire();
        assert_eq!(wire["error"]["recoverable"], json!(false));
    }

    /// Handlers see normalized args; warnings ride on the success envelope.
    #[tokio::test]
    async fn success_envelope_carries_tool_name() {
        let d = dispatcher();
        let env = d
            .call_tool(Some("s1"), "echo", json!({"k": 1}))
            .await
            .unwrap();
        let wire = env.to_wire();
        assert_eq!(wire["ok"], json!(true));
        assert_eq!(wire["tool"], json!("echo"));
        assert_eq!(wire["data"]["k"], json!(1));
    }

    /// Internal handler errors re-raise out of call_tool.
    #[tokio::test]
    async fn internal_errors_propagate() {
        let d = dispatcher();
        let err = d.call_tool(None, "failing", json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::Internal(_)));
    }

    struct SleepyTool;

    #[async_trait]
    impl Tool for SleepyTool {
        fn name(&self) -> &'static str {
            "sleepy"
        }

        fn spec(&self) -> ToolSpec {
            ToolSpec {
                name: "sleepy".to_string(),
                category: ToolCategory::Graph,
                description: None,
                input_schema: json!({"type": "object"}),
            }
        }

        async fn run(&self, _args: Value, _ctx: &CallContext) -> Result<Envelope, ToolError> {
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
            Ok(Envelope::ok(json!({})))
        }
    }

    /// A handler that blows the deadline answers a timeout envelope instead
    /// of hanging the caller.
    #[tokio::test]
    async fn deadline_produces_timeout_envelope() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(SleepyTool));
        let d = Dispatcher::with_timeout(registry, std::time::Duration::from_millis(50));

        let env = d.call_tool(None, "sleepy", json!({})).await.unwrap();
        assert_eq!(env.error_code(), Some(codes::TOOL_DEADLINE_EXCEEDED));
    }

    /// The compact profile truncates long strings in success data.
    #[tokio::test]
    async fn compact_profile_truncates() {
        let d = dispatcher();
        let env = d
            .call_tool(
                None,
                "echo",
                json!({"profile": "compact", "blob": "z".repeat(500)}),
            )
            .await
            .unwrap();
        let wire = env.to_wire();
        assert!(wire["data"]["blob"].as_str().unwrap().chars().count() <= 200);
    }
}
