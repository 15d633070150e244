//! Startup and shutdown ordering for the bridge process.

use crate::assets;
use crate::capture::{LineSink, LogCapture};
use crate::config::{BridgeConfig, CaptureMode};
use crate::connection::BridgeContext;
use crate::dispatch::CommandDispatcher;
use crate::hub::BroadcastHub;
use crate::native::NativeNodeHandle;
use crate::registry::ClientRegistry;
use crate::server::BridgeServer;
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{error, info};

/// Run the bridge until Ctrl+C or SIGTERM.
///
/// `sink` and `lines` are the two ends of the relay channel. In
/// [`CaptureMode::Logs`] the caller has already wired `sink` into the
/// tracing subscriber. Stdio is restored on every return, so an error
/// returned from here still reaches the terminal.
pub async fn run(
    config: BridgeConfig,
    sink: LineSink,
    lines: mpsc::UnboundedReceiver<String>,
) -> Result<()> {
    let node = NativeNodeHandle::load(&config.library).context("Failed to load native node")?;
    let node = Arc::new(node);

    // Dropping the capture restores stdio
    let capture = match config.capture {
        CaptureMode::Fd => Some(
            LogCapture::install(sink, config.echo).context("Failed to capture process output")?,
        ),
        CaptureMode::Logs => None,
    };
    info!("Log capture active ({:?})", config.capture);

    let http_addr = config.http_addr();
    let web_root = config.web_root.clone();
    tokio::spawn(async move {
        if let Err(e) = assets::serve(http_addr, web_root).await {
            error!("Web UI server failed: {}", e);
        }
    });

    node.spawn(config.seed);

    let registry = ClientRegistry::new();
    tokio::spawn(BroadcastHub::new(registry.clone()).run(lines));

    let ctx = BridgeContext {
        registry,
        dispatcher: CommandDispatcher::new(Arc::clone(&node)),
    };
    let server = BridgeServer::bind(&config.ws_addr(), ctx).await?;
    info!("Bridge running. Press Ctrl+C to stop.");

    server.run(shutdown_signal()).await;

    if let Some(capture) = capture {
        capture.restore();
    }
    info!("Shutdown.");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
