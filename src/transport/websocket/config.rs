//! Configuration constants for the WebSocket transport

use std::time::Duration;

/// Default bound on the opening handshake (10 seconds)
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Commands from the transport handle to its I/O task
#[derive(Debug)]
pub(super) enum Outbound {
    /// Send a text frame
    Text(String),
    /// Send a close frame and stop
    Close {
        /// Close code
        code: u16,
        /// Close reason
        reason: String,
    },
}
