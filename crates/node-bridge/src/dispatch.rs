//! Dispatch of client commands into the native node.

use crate::error::DispatchError;
use crate::native::{NativeNodeHandle, SendStatus};
use crate::protocol::{ClientCommand, SendCommand};
use std::sync::Arc;
use tracing::{debug, info};

/// What a successfully dispatched command did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatched {
    Send { peer: String, status: SendStatus },
}

/// Turns client messages into native calls.
#[derive(Clone)]
pub struct CommandDispatcher {
    node: Arc<NativeNodeHandle>,
}

impl CommandDispatcher {
    pub fn new(node: Arc<NativeNodeHandle>) -> Self {
        Self { node }
    }

    pub fn node(&self) -> &NativeNodeHandle {
        &self.node
    }

    /// Parse and execute one client message.
    ///
    /// Errors describe a single bad message; the caller logs them and keeps
    /// the connection open.
    pub async fn dispatch(&self, text: &str) -> Result<Dispatched, DispatchError> {
        match ClientCommand::parse(text)? {
            ClientCommand::Send(cmd) => self.send(cmd).await,
        }
    }

    async fn send(&self, cmd: SendCommand) -> Result<Dispatched, DispatchError> {
        // Goes out through the captured stderr, so viewers see outbound traffic
        info!("Sending to {}: {}", cmd.peer, cmd.msg);

        let status = self.node.send(&cmd.peer, &cmd.msg).await?;
        if status == SendStatus::Disabled {
            debug!("Native send disabled, dropped message for {}", cmd.peer);
        }

        Ok(Dispatched::Send {
            peer: cmd.peer,
            status,
        })
    }
}
