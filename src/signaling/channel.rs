//! Signaling channel keys, records and frame decoding

use std::fmt;

use chrono::Utc;
use serde_json::Value;
use tokio::task::JoinHandle;
use url::Url;

use crate::error::{LinkError, Result};
use crate::transport::Transport;
use crate::types::identifiers::{AgentId, ConnectionId, TaskId};
use crate::types::messages::{A2AMessage, TaskEvent};
use crate::types::options::Endpoints;

/// Identifies one signaling channel
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChannelKey {
    /// Agent-to-agent bus of one agent
    Agent(AgentId),
    /// Event subscription for one task
    Task(TaskId),
}

impl ChannelKey {
    /// Endpoint this channel connects to
    ///
    /// # Errors
    /// Returns error if the signaling base URL cannot carry a path
    pub fn url(&self, endpoints: &Endpoints) -> Result<Url> {
        match self {
            Self::Agent(agent_id) => endpoints.a2a_url(agent_id),
            Self::Task(task_id) => endpoints.task_url(task_id),
        }
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Agent(agent_id) => write!(f, "a2a/{agent_id}"),
            Self::Task(task_id) => write!(f, "tasks/{task_id}"),
        }
    }
}

impl From<AgentId> for ChannelKey {
    fn from(agent_id: AgentId) -> Self {
        Self::Agent(agent_id)
    }
}

impl From<TaskId> for ChannelKey {
    fn from(task_id: TaskId) -> Self {
        Self::Task(task_id)
    }
}

/// Live signaling connection
pub(super) struct SignalingChannel {
    pub connection_id: ConnectionId,
    pub transport: Box<dyn Transport>,
    pub relay: JoinHandle<()>,
    pub attempts: u32,
    pub opened: bool,
}

impl SignalingChannel {
    /// Detach and close
    pub(super) fn release(mut self, code: u16, reason: &str) {
        self.relay.abort();
        self.transport.close(code, reason);
    }
}

/// Decode an inbound agent-to-agent frame
///
/// # Errors
/// Returns error if the frame is not a valid message
pub fn decode_a2a(raw: &str) -> Result<A2AMessage> {
    Ok(serde_json::from_str(raw)?)
}

/// Decode an inbound task frame
///
/// The event type comes from `type` (or `event`), the body from `data` (or
/// the whole frame). Unparsable frames become a `raw` event carrying the text.
#[must_use]
pub fn decode_task_event(task_id: &TaskId, raw: &str) -> TaskEvent {
    let (event_type, data) = match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(mut fields)) => {
            let event_type = ["type", "event"]
                .iter()
                .find_map(|key| fields.get(*key).and_then(Value::as_str))
                .unwrap_or("message")
                .to_string();
            let data = match fields.remove("data") {
                Some(data) => data,
                None => Value::Object(fields),
            };
            (event_type, data)
        }
        Ok(other) => ("message".to_string(), other),
        Err(e) => {
            log::debug!("Task {task_id} sent an unparsable frame: {e}");
            ("raw".to_string(), Value::String(raw.to_string()))
        }
    };
    TaskEvent {
        task_id: task_id.clone(),
        event_type,
        data,
        received_at: Utc::now(),
    }
}

/// Error for a send without an open channel
pub(super) fn no_channel(key: &ChannelKey) -> LinkError {
    LinkError::no_active_channel(key.to_string())
}
