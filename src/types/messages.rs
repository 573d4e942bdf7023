//! Message-related type definitions
//!
//! Inbound frames on primary connections, and the payloads carried by the
//! signaling channels.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::identifiers::{AgentId, TaskId};
use super::status::ActivityState;

// ============================================================================
// Primary connection frames
// ============================================================================

/// One classified inbound frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InboundFrame {
    /// Content fragment (also what unparsable payloads become)
    Content {
        /// Text carried by the frame, if any
        #[serde(skip_serializing_if = "Option::is_none")]
        text: Option<String>,
        /// Full frame
        payload: serde_json::Value,
    },
    /// The agent finished its turn
    TurnComplete {
        /// Full frame
        payload: serde_json::Value,
    },
    /// The agent's turn was interrupted
    Interrupted {
        /// Full frame
        payload: serde_json::Value,
    },
    /// The agent reported an error
    ErrorFrame {
        /// Error text
        message: String,
        /// Full frame
        payload: serde_json::Value,
    },
    /// Answer to a liveness probe; never forwarded to subscribers
    ProbeResponse,
    /// Structured frame with no recognised shape
    Unrecognized {
        /// Full frame
        payload: serde_json::Value,
    },
}

impl InboundFrame {
    /// Activity this frame moves the agent into, if any
    #[must_use]
    pub const fn activity(&self) -> Option<ActivityState> {
        match self {
            Self::ErrorFrame { .. } => Some(ActivityState::Error),
            Self::TurnComplete { .. } | Self::Interrupted { .. } => Some(ActivityState::Idle),
            Self::Content { .. } => Some(ActivityState::Responding),
            Self::ProbeResponse | Self::Unrecognized { .. } => None,
        }
    }

    /// Whether the frame belongs to the health monitor
    #[must_use]
    pub const fn is_probe_response(&self) -> bool {
        matches!(self, Self::ProbeResponse)
    }
}

/// Application packet delivered to `on_packet`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentPacket {
    /// Agent the frame arrived from
    pub agent_id: AgentId,
    /// Classified frame
    pub frame: InboundFrame,
    /// When the manager received it
    pub received_at: DateTime<Utc>,
}

// ============================================================================
// Signaling payloads
// ============================================================================

/// Agent-to-agent message on the signaling bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct A2AMessage {
    /// Message id
    #[serde(default = "new_message_id")]
    pub id: String,
    /// Sending agent
    pub from_agent: AgentId,
    /// Receiving agent
    pub to_agent: AgentId,
    /// Message body
    pub content: serde_json::Value,
    /// Creation time
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

fn new_message_id() -> String {
    Uuid::new_v4().to_string()
}

impl A2AMessage {
    /// New message stamped with a fresh id and the current time
    pub fn new(
        from_agent: impl Into<AgentId>,
        to_agent: impl Into<AgentId>,
        content: serde_json::Value,
    ) -> Self {
        Self {
            id: new_message_id(),
            from_agent: from_agent.into(),
            to_agent: to_agent.into(),
            content,
            timestamp: Utc::now(),
        }
    }
}

/// Event pushed on a task subscription channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEvent {
    /// Task the channel is subscribed to
    pub task_id: TaskId,
    /// Event type (`type`/`event` field of the frame, `raw` for unparsable frames)
    pub event_type: String,
    /// Event body
    pub data: serde_json::Value,
    /// When the manager received it
    pub received_at: DateTime<Utc>,
}
