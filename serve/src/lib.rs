//! WebSocket front end: one logical session per connection, one tool call
//! per request frame.

mod app;
mod connection;

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use tokio::net::TcpListener;
use tokio::sync::oneshot;
use weft::Weft;

use app::{router, AppState};

/// Binds `addr` and serves until shutdown. In `once` mode the server exits
/// when the first connection closes (used by integration tests).
pub async fn run(addr: SocketAddr, once: bool, weft: Arc<Weft>) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    serve_on(listener, once, weft).await
}

/// Serves on an already-bound listener. Exposed so tests can bind port 0 and
/// read the local address first.
pub async fn serve_on(listener: TcpListener, once: bool, weft: Arc<Weft>) -> std::io::Result<()> {
    let local = listener.local_addr()?;
    tracing::info!(addr = %local, once, "weft serve listening");

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    // In once mode the first connection to close fires the sender; otherwise
    // it is parked here so the shutdown future never resolves.
    let mut parked_tx = None;
    let connection_tx = if once {
        Some(shutdown_tx)
    } else {
        parked_tx = Some(shutdown_tx);
        None
    };
    let state = Arc::new(AppState {
        weft: weft.clone(),
        shutdown_tx: Arc::new(Mutex::new(connection_tx)),
    });

    let result = axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.await;
        })
        .await;

    drop(parked_tx);
    weft.cleanup_all();
    result
}
