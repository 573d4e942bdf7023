//! Error types for the agent link

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::identifiers::AgentId;

/// Main error type for the agent link
#[derive(Error, Debug)]
pub enum LinkError {
    /// No live, ready connection exists for the agent
    #[error("Agent {0} is not connected")]
    NotConnected(String),

    /// The connection did not finish opening before the send timeout elapsed
    #[error("Timed out waiting for agent {agent_id} to connect after {timeout_ms}ms")]
    ConnectTimeout {
        /// Agent the send was addressed to
        agent_id: String,
        /// Timeout that elapsed
        timeout_ms: u64,
    },

    /// No open signaling channel for the given key
    #[error("No active signaling channel for {0}")]
    NoActiveChannel(String),

    /// Creating the transport itself failed
    #[error("Failed to open transport: {0}")]
    TransportOpen(String),

    /// The transport closed without the manager asking it to
    #[error("Connection closed abnormally (code {code}): {reason}")]
    AbnormalClose {
        /// Close code reported by the transport
        code: u16,
        /// Close reason reported by the transport
        reason: String,
    },

    /// A liveness probe went unanswered for a full sweep
    #[error("No response to liveness probe within {0}ms")]
    LivenessTimeout(u64),

    /// The reconnect attempt cap was reached
    #[error("Gave up reconnecting after {0} attempts")]
    ExhaustedRetries(u32),

    /// Transport layer error
    #[error("Transport error: {0}")]
    Transport(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Endpoint URL could not be built
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(#[from] url::ParseError),

    /// JSON encode/decode error
    #[error("JSON error: {0}")]
    JsonDecode(#[from] serde_json::Error),

    /// The manager's event loop has stopped
    #[error("Connection manager is shut down")]
    ManagerClosed,
}

/// Result type alias for agent link operations
pub type Result<T> = std::result::Result<T, LinkError>;

impl LinkError {
    /// Create a not connected error
    pub fn not_connected(agent_id: impl Into<String>) -> Self {
        Self::NotConnected(agent_id.into())
    }

    /// Create a connect timeout error
    pub fn connect_timeout(agent_id: impl Into<String>, timeout_ms: u64) -> Self {
        Self::ConnectTimeout {
            agent_id: agent_id.into(),
            timeout_ms,
        }
    }

    /// Create a no active channel error
    pub fn no_active_channel(key: impl Into<String>) -> Self {
        Self::NoActiveChannel(key.into())
    }

    /// Create a transport open error
    pub fn transport_open(msg: impl Into<String>) -> Self {
        Self::TransportOpen(msg.into())
    }

    /// Create an abnormal close error
    pub fn abnormal_close(code: u16, reason: impl Into<String>) -> Self {
        Self::AbnormalClose {
            code,
            reason: reason.into(),
        }
    }

    /// Create a transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create an invalid configuration error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Stable classification of this error
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::NotConnected(_) | Self::ConnectTimeout { .. } | Self::NoActiveChannel(_) => {
                ErrorKind::SendFailure
            }
            Self::TransportOpen(_) | Self::InvalidEndpoint(_) => ErrorKind::TransportOpenFailure,
            Self::AbnormalClose { .. } => ErrorKind::AbnormalClose,
            Self::LivenessTimeout(_) => ErrorKind::LivenessTimeout,
            Self::ExhaustedRetries(_) => ErrorKind::ExhaustedRetries,
            Self::JsonDecode(_) => ErrorKind::ParseFailure,
            Self::Transport(_) | Self::InvalidConfig(_) | Self::ManagerClosed => {
                ErrorKind::Transport
            }
        }
    }
}

/// Error taxonomy surfaced to subscribers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Socket creation failed
    TransportOpenFailure,
    /// Close not initiated by the manager
    AbnormalClose,
    /// Probe went unanswered
    LivenessTimeout,
    /// Inbound payload unparsable (recovered locally, never surfaced)
    ParseFailure,
    /// No live/ready connection for a send
    SendFailure,
    /// Attempt cap reached
    ExhaustedRetries,
    /// Error event reported by the transport
    Transport,
}

impl ErrorKind {
    /// Wire code used in [`AgentError::code`]
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::TransportOpenFailure => "transport_open_failure",
            Self::AbnormalClose => "abnormal_close",
            Self::LivenessTimeout => "liveness_timeout",
            Self::ParseFailure => "parse_failure",
            Self::SendFailure => "send_failure",
            Self::ExhaustedRetries => "exhausted_retries",
            Self::Transport => "transport_error",
        }
    }
}

/// Error payload delivered to `on_error`, always tagged with its agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentError {
    /// Originating agent (or signaling channel key)
    pub agent_id: AgentId,
    /// Error classification
    pub kind: ErrorKind,
    /// Stable snake_case code
    pub code: String,
    /// Human-readable detail
    pub message: String,
}

impl AgentError {
    /// Build from a kind and message
    pub fn new(agent_id: AgentId, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            agent_id,
            kind,
            code: kind.code().to_string(),
            message: message.into(),
        }
    }

    /// Build from a [`LinkError`]
    #[must_use]
    pub fn from_link_error(agent_id: AgentId, err: &LinkError) -> Self {
        Self::new(agent_id, err.kind(), err.to_string())
    }
}

impl fmt::Display for AgentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.agent_id, self.code, self.message)
    }
}
