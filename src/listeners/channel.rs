//! Channel-backed listener

use futures::Stream;
use tokio::sync::mpsc;

use super::ConnectionListener;
use crate::error::AgentError;
use crate::types::identifiers::AgentId;
use crate::types::messages::{A2AMessage, AgentPacket, TaskEvent};
use crate::types::status::AgentStatus;

/// Every listener callback as a value
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// Primary connection opened
    Open(AgentId),
    /// Classified packet
    Packet(AgentPacket),
    /// Status change
    StatusChange {
        /// Agent
        agent_id: AgentId,
        /// New status
        status: AgentStatus,
    },
    /// Primary connection went away
    Disconnect(AgentId),
    /// Primary connection came back
    Reconnect(AgentId),
    /// Error
    Error(AgentError),
    /// Agent-to-agent message
    A2AMessage(A2AMessage),
    /// Task event
    TaskEvent(TaskEvent),
}

impl LinkEvent {
    /// Agent the event concerns, if any
    #[must_use]
    pub fn agent_id(&self) -> Option<&AgentId> {
        match self {
            Self::Open(agent_id)
            | Self::Disconnect(agent_id)
            | Self::Reconnect(agent_id)
            | Self::StatusChange { agent_id, .. } => Some(agent_id),
            Self::Packet(packet) => Some(&packet.agent_id),
            Self::Error(error) => Some(&error.agent_id),
            Self::A2AMessage(_) | Self::TaskEvent(_) => None,
        }
    }
}

/// Listener forwarding every callback into an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelListener {
    tx: mpsc::UnboundedSender<LinkEvent>,
}

impl ChannelListener {
    /// Create the listener and the receiving end
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<LinkEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn forward(&self, event: LinkEvent) {
        // Receiver gone: the subscriber stopped caring
        let _ = self.tx.send(event);
    }
}

impl ConnectionListener for ChannelListener {
    fn on_open(&self, agent_id: &AgentId) {
        self.forward(LinkEvent::Open(agent_id.clone()));
    }

    fn on_packet(&self, packet: &AgentPacket) {
        self.forward(LinkEvent::Packet(packet.clone()));
    }

    fn on_status_change(&self, agent_id: &AgentId, status: AgentStatus) {
        self.forward(LinkEvent::StatusChange {
            agent_id: agent_id.clone(),
            status,
        });
    }

    fn on_disconnect(&self, agent_id: &AgentId) {
        self.forward(LinkEvent::Disconnect(agent_id.clone()));
    }

    fn on_reconnect(&self, agent_id: &AgentId) {
        self.forward(LinkEvent::Reconnect(agent_id.clone()));
    }

    fn on_error(&self, error: &AgentError) {
        self.forward(LinkEvent::Error(error.clone()));
    }

    fn on_a2a_message(&self, message: &A2AMessage) {
        self.forward(LinkEvent::A2AMessage(message.clone()));
    }

    fn on_task_event(&self, event: &TaskEvent) {
        self.forward(LinkEvent::TaskEvent(event.clone()));
    }
}

/// Turn a [`ChannelListener`] receiver into a stream
pub fn event_stream(mut rx: mpsc::UnboundedReceiver<LinkEvent>) -> impl Stream<Item = LinkEvent> {
    async_stream::stream! {
        while let Some(event) = rx.recv().await {
            yield event;
        }
    }
}
