//! Startup configuration.
//!
//! Every value can come from a flag or an environment variable and is read
//! once; nothing is reconfigured while running.

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// How the bridge feeds the log relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CaptureMode {
    /// Redirect fd 1 and 2, capturing the native node's output too
    Fd,
    /// Relay only the bridge's own log output
    Logs,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "node-bridge")]
#[command(about = "Relay a native peer node's logs to WebSocket viewers")]
pub struct BridgeConfig {
    /// Path to the native node library
    #[arg(long, default_value = "./libaeon_core.so", env = "BRIDGE_LIBRARY")]
    pub library: PathBuf,

    /// Address to bind both servers to
    #[arg(long, default_value = "0.0.0.0", env = "BRIDGE_BIND")]
    pub bind: String,

    /// WebSocket port for log viewers
    #[arg(long, default_value_t = 8765, env = "BRIDGE_WS_PORT")]
    pub ws_port: u16,

    /// HTTP port for the web UI
    #[arg(long, default_value_t = 8000, env = "BRIDGE_HTTP_PORT")]
    pub http_port: u16,

    /// Directory served as the web UI
    #[arg(long, default_value = ".", env = "BRIDGE_WEB_ROOT")]
    pub web_root: PathBuf,

    /// Seed passed to the native node at startup
    #[arg(long, default_value_t = 123456789, env = "BRIDGE_SEED", allow_negative_numbers = true)]
    pub seed: i64,

    /// Log capture mode
    #[arg(long, value_enum, default_value = "fd", env = "BRIDGE_CAPTURE")]
    pub capture: CaptureMode,

    /// Also copy captured output to the original terminal
    #[arg(long, env = "BRIDGE_ECHO")]
    pub echo: bool,

    /// Enable verbose logging
    #[arg(long)]
    pub verbose: bool,
}

impl BridgeConfig {
    pub fn ws_addr(&self) -> String {
        format!("{}:{}", self.bind, self.ws_port)
    }

    pub fn http_addr(&self) -> String {
        format!("{}:{}", self.bind, self.http_port)
    }

    /// Default `EnvFilter` directive when `RUST_LOG` is unset.
    pub fn default_filter(&self) -> &'static str {
        if self.verbose {
            "debug,node_bridge=debug"
        } else {
            "info,node_bridge=info"
        }
    }
}
