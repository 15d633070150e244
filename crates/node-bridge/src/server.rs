//! WebSocket server accepting viewer connections.
//!
//! Each accepted socket is upgraded and served on its own task; the accept
//! loop itself never waits on a client.

use crate::connection::{serve_connection, BridgeContext};
use anyhow::Result;
use std::future::Future;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::accept_async;
use tracing::{debug, error, info};

/// Listener plus the shared state handed to every connection.
pub struct BridgeServer {
    listener: TcpListener,
    ctx: BridgeContext,
}

impl BridgeServer {
    /// Bind to an address.
    pub async fn bind(listen_addr: &str, ctx: BridgeContext) -> Result<Self> {
        let listener = TcpListener::bind(listen_addr).await?;
        info!("WebSocket server listening on {}", listener.local_addr()?);
        Ok(Self { listener, ctx })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept clients until `shutdown` resolves.
    pub async fn run<F>(self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            tokio::spawn(handle_socket(stream, addr, self.ctx.clone()));
                        }
                        Err(e) => {
                            error!("Failed to accept connection: {}", e);
                        }
                    }
                }

                _ = &mut shutdown => {
                    info!("WebSocket server stopping");
                    break;
                }
            }
        }
    }
}

async fn handle_socket(stream: TcpStream, addr: SocketAddr, ctx: BridgeContext) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            // Health checks (like `nc -z`) connect and immediately close without
            // completing the WebSocket handshake. Log these as debug, not error.
            let err_str = e.to_string();
            if err_str.contains("Handshake not finished")
                || err_str.contains("Connection reset")
                || err_str.contains("unexpected EOF")
            {
                debug!("Connection closed before handshake from {}", addr);
            } else {
                error!("WebSocket upgrade failed for {}: {}", addr, e);
            }
            return;
        }
    };

    serve_connection(ws_stream, addr, ctx).await;
}
