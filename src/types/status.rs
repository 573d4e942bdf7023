//! Externally visible per-agent status

use serde::{Deserialize, Serialize};

/// Transport-level state of an agent connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No connection and nothing scheduled
    #[default]
    Disconnected,
    /// Transport open pending
    Connecting,
    /// Transport open and ready
    Connected,
    /// Waiting on a backoff timer
    Reconnecting,
    /// Attempts exhausted; needs a manual retry
    Error,
}

/// What the agent is doing, derived from inbound frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityState {
    /// Nothing in flight
    #[default]
    Idle,
    /// A prompt was sent and no content has arrived yet
    Thinking,
    /// Content frames are streaming in
    Responding,
    /// The agent reported an error
    Error,
}

/// Last-known status of one agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentStatus {
    /// Connection state
    pub connection_state: ConnectionState,
    /// Activity state; only meaningful while connected
    pub activity_state: ActivityState,
}

impl AgentStatus {
    /// Status with the given connection state and an idle activity
    #[must_use]
    pub const fn new(connection_state: ConnectionState) -> Self {
        Self {
            connection_state,
            activity_state: ActivityState::Idle,
        }
    }

    /// Connected and idle
    #[must_use]
    pub const fn connected() -> Self {
        Self::new(ConnectionState::Connected)
    }

    /// Copy with a different activity state
    #[must_use]
    pub const fn with_activity(self, activity_state: ActivityState) -> Self {
        Self {
            connection_state: self.connection_state,
            activity_state,
        }
    }

    /// Whether the transport is open
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        matches!(self.connection_state, ConnectionState::Connected)
    }
}
