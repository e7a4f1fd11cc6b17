//! Axum app: state, router, and WebSocket upgrade handler.

use axum::{
    extract::{ws::WebSocketUpgrade, State},
    response::Response,
    routing::get,
    Router,
};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use weft::Weft;

use super::connection::handle_socket;

/// Shared server state. In once mode the first connection to close sends on
/// `shutdown_tx` to stop the server.
pub(crate) struct AppState {
    pub(crate) weft: Arc<Weft>,
    pub(crate) shutdown_tx: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}

pub(crate) fn router(state: Arc<AppState>) -> Router {
    Router::new().route("/", get(ws_handler)).with_state(state)
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    let shutdown_tx = state.shutdown_tx.lock().ok().and_then(|mut g| g.take());
    let weft = state.weft.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, weft, shutdown_tx))
}
