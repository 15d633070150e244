//! node-bridge library: exposes the relay components for the binary and tests.
//!
//! The binary in `main.rs` is a thin wrapper around [`supervisor::run`].

pub mod assets;
pub mod capture;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod hub;
pub mod native;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod supervisor;

// Re-export key types for convenience
pub use capture::{line_channel, LineSink};
pub use config::{BridgeConfig, CaptureMode};
pub use connection::{serve_connection, BridgeContext, CloseReason};
pub use dispatch::{CommandDispatcher, Dispatched};
pub use hub::{BroadcastHub, BroadcastReport};
pub use native::{NativeNodeHandle, NodeLibrary, SendStatus};
pub use protocol::{ClientCommand, Envelope, MAX_MESSAGE_SIZE};
pub use registry::{ClientId, ClientRegistry, ClientSink, Registration};
pub use server::BridgeServer;
