//! # Agent Link
//!
//! Connection lifecycle management for talking to several independent agent
//! services at once. Each agent gets one persistent, bidirectional connection;
//! a parallel set of signaling channels carries agent-to-agent messages and
//! task events.
//!
//! The library keeps every connection honest without blocking its caller:
//!
//! - at most one live connection per agent, replaced (never mutated) on reconnect
//! - exponential backoff with jitter and an attempt cap
//! - a liveness sweep that catches half-open connections
//! - agent activity (idle, thinking, responding) derived from inbound frames
//!
//! ## Quick Start
//!
//! ```no_run
//! use kodegen_agent_link::{ConnectionManager, LinkEvent, LinkOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let manager = ConnectionManager::websocket(LinkOptions::from_env()?)?;
//!     let (_subscription, mut events) = manager.subscribe_channel();
//!
//!     manager.connect("session-1", "chloe").await?;
//!     manager.send("chloe", r#"{"message":"hi"}"#).await?;
//!
//!     while let Some(event) = events.recv().await {
//!         if let LinkEvent::Packet(packet) = event {
//!             log::info!("{}: {:?}", packet.agent_id, packet.frame);
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Listening
//!
//! Implement [`ConnectionListener`] (every method defaults to a no-op), build a
//! [`CallbackListener`] from closures, or take events as a channel with
//! [`ConnectionManager::subscribe_channel`]. Every registration returns a
//! [`Subscription`] that removes only that listener.
//!
//! ## Testing
//!
//! [`MemoryTransportFactory`] hands out in-memory transports whose remote side
//! ([`MemoryConnection`]) can open, send, error and close on demand.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod health;
pub mod listeners;
pub mod manager;
pub mod message;
pub mod scheduler;
pub mod signaling;
pub mod status;
pub mod transport;
pub mod types;

// Re-export commonly used types for external API
pub use error::{AgentError, ErrorKind, LinkError, Result};
pub use listeners::{
    CallbackListener, ChannelListener, ConnectionListener, LinkEvent, ListenerRegistry,
    Subscription,
};
pub use manager::{ConnectionInfo, ConnectionManager, ConnectionSnapshot};
pub use message::classify;
pub use signaling::{ChannelKey, SignalingManager};
pub use status::StatusStore;
pub use transport::{
    MemoryConnection, MemoryTransportFactory, ReadyState, Transport, TransportEvent,
    TransportFactory, WebSocketTransportFactory,
};

// Re-export type submodules for flat public API
pub use types::identifiers::{AgentId, ConnectionId, SessionId, TaskId};
pub use types::messages::{A2AMessage, AgentPacket, InboundFrame, TaskEvent};
pub use types::options::{
    Endpoints, HealthOptions, LinkOptions, LinkOptionsBuilder, ReconnectPolicy,
};
pub use types::status::{ActivityState, AgentStatus, ConnectionState};

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
