//! WebSocket transport implementation
//!
//! This module provides a transport implementation on top of
//! `tokio-tungstenite`. Each transport owns one I/O task that performs the
//! handshake, pumps frames in both directions and reports the final close.

mod config;
mod lifecycle;
mod transport;

// Re-export public types
pub use config::DEFAULT_CONNECT_TIMEOUT;
pub use transport::{WebSocketTransport, WebSocketTransportFactory};
