//! WebSocket connection lifecycle: one logical session per connection,
//! request frames dispatched through the weft core.

use axum::extract::ws::{Message, WebSocket};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::oneshot;
use weft::Weft;

/// One request frame: `{id?, tool, arguments?}`.
#[derive(Debug, Deserialize)]
struct ToolCallRequest {
    #[serde(default)]
    id: Option<Value>,
    tool: String,
    #[serde(default)]
    arguments: Option<Value>,
}

/// One response frame: the request id plus the serialized envelope.
#[derive(Debug, Serialize)]
struct ToolCallResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<Value>,
    result: Value,
}

pub(crate) async fn handle_socket(
    mut socket: WebSocket,
    weft: Arc<Weft>,
    shutdown_tx: Option<oneshot::Sender<()>>,
) {
    let session_id = format!("ws-{}", uuid::Uuid::new_v4().simple());
    tracing::debug!(session = %session_id, "connection opened");

    while let Some(received) = socket.recv().await {
        let message = match received {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(session = %session_id, "read error (client closed?): {}", e);
                break;
            }
        };
        let text = match &message {
            Message::Text(t) => t.clone(),
            Message::Binary(b) => String::from_utf8_lossy(b).into_owned(),
            _ => continue,
        };

        if let Err(e) = handle_frame(&text, &mut socket, &weft, &session_id).await {
            tracing::warn!(session = %session_id, "send error: {}", e);
            break;
        }
    }

    weft.cleanup_session(&session_id);
    tracing::debug!(session = %session_id, "connection closed");
    if let Some(tx) = shutdown_tx {
        let _ = tx.send(());
    }
}

async fn handle_frame(
    text: &str,
    socket: &mut WebSocket,
    weft: &Weft,
    session_id: &str,
) -> Result<(), axum::Error> {
    let request: ToolCallRequest = match serde_json::from_str(text) {
        Ok(r) => r,
        Err(e) => {
            return send(
                socket,
                &ToolCallResponse {
                    id: None,
                    result: serde_json::json!({
                        "ok": false,
                        "error": {
                            "code": "BAD_REQUEST",
                            "reason": format!("parse error: {}", e),
                            "recoverable": true,
                        },
                    }),
                },
            )
            .await;
        }
    };

    let arguments = request.arguments.unwrap_or_else(|| serde_json::json!({}));
    let result = match weft
        .call_tool(Some(session_id), &request.tool, arguments)
        .await
    {
        Ok(envelope) => envelope.to_wire(),
        Err(e) => {
            // Internal handler errors: logged here, surfaced as a
            // non-recoverable frame, connection kept.
            tracing::error!(session = session_id, tool = %request.tool, "handler error: {}", e);
            serde_json::json!({
                "ok": false,
                "error": {
                    "code": "INTERNAL_ERROR",
                    "reason": e.to_string(),
                    "recoverable": false,
                },
            })
        }
    };

    send(
        socket,
        &ToolCallResponse {
            id: request.id,
            result,
        },
    )
    .await
}

async fn send(socket: &mut WebSocket, response: &ToolCallResponse) -> Result<(), axum::Error> {
    let json = serde_json::to_string(response).unwrap_or_else(|_| {
        r#"{"result":{"ok":false,"error":{"code":"INTERNAL_ERROR","reason":"serialization error","recoverable":false}}}"#
            .to_string()
    });
    socket.send(Message::Text(json)).await
}
