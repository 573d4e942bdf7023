//! Type definitions for the agent link
//!
//! This module contains the type definitions shared by the managers,
//! organized into logical submodules:
//!
//! - [`identifiers`] - Type-safe ID wrappers (`AgentId`, `SessionId`, `TaskId`, `ConnectionId`)
//! - [`status`] - Connection and activity states
//! - [`messages`] - Inbound frames, packets and signaling payloads
//! - [`options`] - Reconnect policy, health options, endpoints

pub mod identifiers;
pub mod messages;
pub mod options;
pub mod status;

// Re-export commonly used types
pub use identifiers::{AgentId, ConnectionId, SessionId, TaskId};
pub use messages::{A2AMessage, AgentPacket, InboundFrame, TaskEvent};
pub use options::{Endpoints, HealthOptions, LinkOptions, LinkOptionsBuilder, ReconnectPolicy};
pub use status::{ActivityState, AgentStatus, ConnectionState};
