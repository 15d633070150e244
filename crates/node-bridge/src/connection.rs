//! Per-client connection lifecycle.
//!
//! Each client goes `Connecting -> Active -> Closed`. Registration happens on
//! entering `Active` and is released when [`serve_connection`] returns, by
//! dropping the registry guard, whatever ended the loop.

use crate::dispatch::{CommandDispatcher, Dispatched};
use crate::error::SendError;
use crate::native::SendStatus;
use crate::protocol::{Envelope, MAX_MESSAGE_SIZE};
use crate::registry::{ClientId, ClientRegistry, ClientSink};
use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tokio_tungstenite::{
    tungstenite::{Error as WsError, Message},
    WebSocketStream,
};
use tracing::{debug, info, warn};

/// Shared state every connection needs.
#[derive(Clone)]
pub struct BridgeContext {
    pub registry: ClientRegistry,
    pub dispatcher: CommandDispatcher,
}

/// Why a connection reached `Closed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Client sent a close frame
    ClientClosed,
    /// Stream ended without a close frame
    StreamEnded,
    /// Read failed
    TransportError(String),
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::ClientClosed => write!(f, "closed by client"),
            CloseReason::StreamEnded => write!(f, "stream ended"),
            CloseReason::TransportError(e) => write!(f, "transport error: {}", e),
        }
    }
}

/// Write half of a client WebSocket.
pub struct WsSink<S> {
    write: Mutex<SplitSink<WebSocketStream<S>, Message>>,
}

#[async_trait]
impl<S> ClientSink for WsSink<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn send_text(&self, text: &str) -> Result<(), SendError> {
        let mut write = self.write.lock().await;
        send_frame(&mut write, text).await
    }
}

async fn send_frame<S>(
    write: &mut SplitSink<WebSocketStream<S>, Message>,
    text: &str,
) -> Result<(), SendError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    write
        .send(Message::Text(text.to_string().into()))
        .await
        .map_err(|e| match e {
            WsError::ConnectionClosed | WsError::AlreadyClosed => SendError::Closed,
            other => SendError::Transport(other.to_string()),
        })
}

/// Run one client from handshake to teardown.
///
/// The client is registered for exactly the duration of this call.
pub async fn serve_connection<S>(
    ws_stream: WebSocketStream<S>,
    addr: SocketAddr,
    ctx: BridgeContext,
) -> CloseReason
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (write, read) = ws_stream.split();
    let sink = Arc::new(WsSink {
        write: Mutex::new(write),
    });

    // Broadcasts queue on the write lock until the status frame is out
    let registration = {
        let mut write = sink.write.lock().await;
        let registration = ctx.registry.add(sink.clone());
        let status = Envelope::Status {
            node: ctx.dispatcher.node().describe().to_string(),
            clients: ctx.registry.len(),
        };
        if let Err(e) = send_frame(&mut write, &status.to_json()).await {
            debug!("Failed to send status to {}: {}", registration.id(), e);
        }
        registration
    };
    let client_id = registration.id();
    info!("Client {} connected from {} ({} total)", client_id, addr, ctx.registry.len());

    let reason = read_loop(client_id, read, &ctx.dispatcher).await;

    drop(registration);
    info!("Client {} disconnected: {}", client_id, reason);
    reason
}

async fn read_loop<S>(
    client_id: ClientId,
    mut read: SplitStream<WebSocketStream<S>>,
    dispatcher: &CommandDispatcher,
) -> CloseReason
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let msg = match read.next().await {
            Some(Ok(msg)) => msg,
            Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) => {
                return CloseReason::ClientClosed;
            }
            Some(Err(e)) => return CloseReason::TransportError(e.to_string()),
            None => return CloseReason::StreamEnded,
        };

        let text = match msg {
            Message::Text(ref text) => text.as_str(),
            Message::Binary(ref data) => match std::str::from_utf8(data) {
                Ok(text) => text,
                Err(_) => {
                    warn!("Dropping non-UTF-8 binary message from {}", client_id);
                    continue;
                }
            },
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
            Message::Close(_) => {
                debug!("Received close frame from {}", client_id);
                return CloseReason::ClientClosed;
            }
        };

        if text.len() > MAX_MESSAGE_SIZE {
            warn!(
                "Message from {} exceeds max size ({} > {}), dropping",
                client_id,
                text.len(),
                MAX_MESSAGE_SIZE
            );
            continue;
        }

        match dispatcher.dispatch(text).await {
            Ok(Dispatched::Send { peer, status }) => {
                if let SendStatus::Sent(code) = status {
                    debug!("Dispatched send from {} to {} (status {})", client_id, peer, code);
                }
            }
            Err(e) => warn!("Ignoring message from {}: {}", client_id, e),
        }
    }
}
