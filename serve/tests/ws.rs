//! WebSocket round-trip: connect, call a tool, read the envelope, and let
//! once-mode shut the server down.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;
use weft::WeftBuilder;

fn quiet_policy() -> env_config::Policy {
    env_config::Policy {
        watcher_enabled: false,
        ..env_config::Policy::default()
    }
}

/// One frame in, one envelope out, echoing the request id; closing the
/// connection stops a once-mode server.
#[tokio::test]
async fn tool_call_round_trip_and_once_shutdown() {
    let weft = Arc::new(WeftBuilder::new(quiet_policy()).memory_graph().build());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(serve::serve_on(listener, true, weft));

    let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{}/", addr))
        .await
        .expect("connect");

    socket
        .send(Message::Text(
            serde_json::json!({"id": 7, "tool": "tools_list", "arguments": {}}).to_string(),
        ))
        .await
        .unwrap();

    let reply = loop {
        match socket.next().await.expect("frame").unwrap() {
            Message::Text(text) => break text,
            _ => continue,
        }
    };
    let reply: serde_json::Value = serde_json::from_str(&reply).unwrap();
    assert_eq!(reply["id"], serde_json::json!(7));
    assert_eq!(reply["result"]["ok"], serde_json::json!(true));
    assert!(reply["result"]["data"]["tools"].as_array().unwrap().len() >= 30);

    // Unknown tools answer in-protocol, not by dropping the connection.
    socket
        .send(Message::Text(
            serde_json::json!({"id": 8, "tool": "nope"}).to_string(),
        ))
        .await
        .unwrap();
    let reply = loop {
        match socket.next().await.expect("frame").unwrap() {
            Message::Text(text) => break text,
            _ => continue,
        }
    };
    let reply: serde_json::Value = serde_json::from_str(&reply).unwrap();
    assert_eq!(reply["result"]["error"]["code"], serde_json::json!("TOOL_NOT_FOUND"));

    socket.close(None).await.unwrap();
    // once mode: the server future completes after the connection closes.
    tokio::time::timeout(std::time::Duration::from_secs(5), server)
        .await
        .expect("server exited")
        .unwrap()
        .unwrap();
}

/// Malformed frames answer a parse error and keep serving.
#[tokio::test]
async fn malformed_frame_is_answered() {
    let weft = Arc::new(WeftBuilder::new(quiet_policy()).memory_graph().build());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let _server = tokio::spawn(serve::serve_on(listener, true, weft));

    let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{}/", addr))
        .await
        .expect("connect");
    socket.send(Message::Text("not json".to_string())).await.unwrap();

    let reply = loop {
        match socket.next().await.expect("frame").unwrap() {
            Message::Text(text) => break text,
            _ => continue,
        }
    };
    let reply: serde_json::Value = serde_json::from_str(&reply).unwrap();
    assert_eq!(reply["result"]["ok"], serde_json::json!(false));
    assert_eq!(reply["result"]["error"]["code"], serde_json::json!("BAD_REQUEST"));
}
