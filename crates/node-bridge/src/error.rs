//! Error types shared across the relay components.

use std::path::PathBuf;
use thiserror::Error;

/// Failure to bring up the native node library.
#[derive(Debug, Error)]
pub enum NativeError {
    #[error("Native library not found: {}", .0.display())]
    LibraryNotFound(PathBuf),

    #[error("Failed to open native library {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },

    #[error("Native symbol {name} not found: {source}")]
    Symbol {
        name: &'static str,
        #[source]
        source: libloading::Error,
    },
}

/// Failure to redirect the process's stdio into the relay.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("Failed to create log pipe: {0}")]
    Pipe(#[source] std::io::Error),

    #[error("Failed to redirect fd {fd}: {source}")]
    Redirect {
        fd: i32,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to spawn log reader: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("stdio capture is not supported on this platform")]
    Unsupported,
}

/// An inbound client message that is not a usable command.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Malformed message: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("Message has no action")]
    MissingAction,

    #[error("Unknown action: {0}")]
    UnknownAction(String),

    #[error("Invalid fields for {action}: {source}")]
    InvalidFields {
        action: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// Failure while dispatching a parsed command.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("Invalid argument for native call: {0}")]
    InvalidArgument(#[from] std::ffi::NulError),

    #[error("Native call failed to run: {0}")]
    Native(#[from] tokio::task::JoinError),
}

/// Failure delivering one outbound frame to one client.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("Connection closed")]
    Closed,

    #[error("Send timed out")]
    TimedOut,

    #[error("Transport error: {0}")]
    Transport(String),
}
