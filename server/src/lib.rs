//! REST JSON API for EchoGarden (spec.md §4.H, §6).
//!
//! Grounded on the origin crate's `Router`/`AppState`/`with_state` shape
//! (`app.rs`) and its serialize-or-fallback-error response pattern
//! (`response.rs`), expanded from one WebSocket route into the full set of
//! stateless REST handlers the external-interfaces table enumerates.
//!
//! **Public API**: [`router`], [`run_server`], [`run_server_on_listener`].

mod app;
mod error;
mod routes;

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

pub use app::{router, AppState};

const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8080";

/// Runs the HTTP server on an existing listener. Used by tests (bind to
/// `127.0.0.1:0`, then read back the assigned port).
pub async fn run_server_on_listener(listener: TcpListener, state: Arc<AppState>) -> std::io::Result<()> {
    let addr = listener.local_addr()?;
    info!("EchoGarden HTTP server listening on http://{addr}");
    let app = router(state);
    axum::serve(listener, app).await
}

/// Runs the HTTP server on `addr` (default `127.0.0.1:8080`).
pub async fn run_server(addr: Option<&str>, state: Arc<AppState>) -> std::io::Result<()> {
    let addr = addr.unwrap_or(DEFAULT_BIND_ADDR);
    let listener = TcpListener::bind(addr).await?;
    run_server_on_listener(listener, state).await
}
