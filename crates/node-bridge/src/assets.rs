//! Static file server for the web UI.

use anyhow::Result;
use axum::Router;
use std::path::PathBuf;
use tokio::net::TcpListener;
use tower_http::services::ServeDir;
use tracing::info;

/// Router serving `web_root`, with `index.html` for directories.
pub fn router(web_root: PathBuf) -> Router {
    Router::new().fallback_service(ServeDir::new(web_root))
}

/// Serve the web UI until the process exits.
///
/// Requests are not logged: everything logged here would be relayed to the
/// viewers too.
pub async fn serve(listen_addr: String, web_root: PathBuf) -> Result<()> {
    let listener = TcpListener::bind(&listen_addr).await?;
    info!("Web UI at http://{}", listener.local_addr()?);
    axum::serve(listener, router(web_root)).await?;
    Ok(())
}
