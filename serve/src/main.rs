//! `weft-serve`: bind the WebSocket front end over an assembled weft core.

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use weft::WeftBuilder;

#[derive(Parser, Debug)]
#[command(name = "weft-serve", about = "Weft code-intelligence tool server")]
struct Args {
    /// Address to listen on.
    #[arg(long, default_value = "127.0.0.1:8787", env = "WEFT_SERVE_ADDR")]
    addr: SocketAddr,

    /// Exit after the first connection closes.
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = env_config::load_and_apply("weft") {
        tracing::warn!("config load failed, continuing on process env: {}", e);
    }
    let policy = env_config::Policy::from_env();

    let args = Args::parse();
    let weft = Arc::new(WeftBuilder::new(policy).memory_graph().build());
    serve::run(args.addr, args.once, weft).await
}
