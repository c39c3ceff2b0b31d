//! WebSocket server: accepts connections and runs one sender/receiver pair
//! per client.

mod dispatcher;
pub mod protocol;

use crate::{shared::PipelineControl, store::SharedStateStore};
use eyre::{Result, WrapErr};
use std::sync::Arc;
use tokio::net::TcpListener;

/// Binds `port` and serves connections until the process is torn down.
/// Binding failure is a fatal startup error per the CLI's exit-code policy.
pub async fn run(port: u16, store: Arc<SharedStateStore>, control: Arc<PipelineControl>) -> Result<()> {
    let addr = format!("127.0.0.1:{port}");
    let listener = TcpListener::bind(&addr).await.wrap_err_with(|| format!("failed to bind {addr}"))?;
    tracing::info!("listening on ws://{addr}");

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(err) => {
                tracing::warn!("accept failed: {err:?}");
                continue;
            }
        };
        let store = Arc::clone(&store);
        let control = Arc::clone(&control);
        tokio::spawn(async move {
            let config = tungstenite::protocol::WebSocketConfig::default();
            match tokio_tungstenite::accept_async_with_config(stream, Some(config)).await {
                Ok(ws) => {
                    tracing::info!(%peer, "client connected");
                    dispatcher::serve_connection(ws, store, control).await;
                    tracing::info!(%peer, "client disconnected");
                }
                Err(err) => tracing::warn!(%peer, "websocket handshake failed: {err:?}"),
            }
        });
    }
}
