//! node-bridge: relays a native peer node's output to WebSocket viewers.
//!
//! Loads the node library, captures everything written to stdout/stderr and
//! broadcasts it line by line; viewers can send messages back into the node.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

use node_bridge::capture::{line_channel, ChannelWriter};
use node_bridge::config::{BridgeConfig, CaptureMode};
use node_bridge::supervisor;

#[tokio::main]
async fn main() -> Result<()> {
    let config = BridgeConfig::parse();
    let (sink, lines) = line_channel();

    // Set up logging - respects RUST_LOG env var, defaults to info (or debug with --verbose)
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.default_filter()));
    match config.capture {
        // stderr is redirected into the relay once capture is installed
        CaptureMode::Fd => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .init(),
        CaptureMode::Logs => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr.and(ChannelWriter::new(sink.clone())))
            .with_ansi(false)
            .init(),
    }

    supervisor::run(config, sink, lines).await
}
