//! Per-port proxy listeners.
//!
//! This module provides:
//! - `ListenerPool`: owns every live listener, keyed by port
//! - `ListenerState`: lifecycle of one port
//! - `ListenerError`: bind failures
//!
//! ## Module Structure
//!
//! - `network`: socket creation
//! - `handler`: request handling (CORS, forward, 502 translation, logging)
//! - `body`: response body wrapper that writes the log entry
//! - `pool`: start/stop and the accept loop

mod body;
mod handler;
mod network;
mod pool;

pub use handler::{bad_gateway, handle_proxy_request, BadGatewayBody, ListenerContext, ProxyBody};
pub use network::{create_listener, resolve_bind_addr};
pub use pool::ListenerPool;

use serde::Serialize;

/// Lifecycle of a single port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ListenerState {
    Stopped,
    /// Held only while the socket binds; reserves the port
    Starting,
    Running,
    Stopping,
}

/// Listener lifecycle errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ListenerError {
    #[error("Port {port} is unavailable: {reason}")]
    PortUnavailable { port: u16, reason: String },
    #[error("Invalid bind address {host}:{port}")]
    InvalidAddress { host: String, port: u16 },
}

impl ListenerError {
    pub fn port(&self) -> u16 {
        match self {
            ListenerError::PortUnavailable { port, .. } => *port,
            ListenerError::InvalidAddress { port, .. } => *port,
        }
    }
}
