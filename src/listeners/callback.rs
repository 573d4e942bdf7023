//! Closure-based listener

use std::sync::Arc;

use super::ConnectionListener;
use crate::error::AgentError;
use crate::types::identifiers::AgentId;
use crate::types::messages::{A2AMessage, AgentPacket, TaskEvent};
use crate::types::status::AgentStatus;

type AgentCallback = Arc<dyn Fn(&AgentId) + Send + Sync>;
type PacketCallback = Arc<dyn Fn(&AgentPacket) + Send + Sync>;
type StatusCallback = Arc<dyn Fn(&AgentId, AgentStatus) + Send + Sync>;
type ErrorCallback = Arc<dyn Fn(&AgentError) + Send + Sync>;
type A2ACallback = Arc<dyn Fn(&A2AMessage) + Send + Sync>;
type TaskCallback = Arc<dyn Fn(&TaskEvent) + Send + Sync>;

/// Listener made of optional closures
///
/// ```
/// use kodegen_agent_link::listeners::CallbackListener;
///
/// let listener = CallbackListener::builder()
///     .on_status_change(|agent, status| println!("{agent}: {:?}", status.connection_state))
///     .on_error(|error| eprintln!("{error}"))
///     .build();
/// # let _ = listener;
/// ```
#[derive(Clone, Default)]
pub struct CallbackListener {
    on_open: Option<AgentCallback>,
    on_packet: Option<PacketCallback>,
    on_status_change: Option<StatusCallback>,
    on_disconnect: Option<AgentCallback>,
    on_reconnect: Option<AgentCallback>,
    on_error: Option<ErrorCallback>,
    on_a2a_message: Option<A2ACallback>,
    on_task_event: Option<TaskCallback>,
}

impl CallbackListener {
    /// Start building a listener
    #[must_use]
    pub fn builder() -> CallbackListenerBuilder {
        CallbackListenerBuilder::default()
    }
}

impl ConnectionListener for CallbackListener {
    fn on_open(&self, agent_id: &AgentId) {
        if let Some(f) = &self.on_open {
            f(agent_id);
        }
    }

    fn on_packet(&self, packet: &AgentPacket) {
        if let Some(f) = &self.on_packet {
            f(packet);
        }
    }

    fn on_status_change(&self, agent_id: &AgentId, status: AgentStatus) {
        if let Some(f) = &self.on_status_change {
            f(agent_id, status);
        }
    }

    fn on_disconnect(&self, agent_id: &AgentId) {
        if let Some(f) = &self.on_disconnect {
            f(agent_id);
        }
    }

    fn on_reconnect(&self, agent_id: &AgentId) {
        if let Some(f) = &self.on_reconnect {
            f(agent_id);
        }
    }

    fn on_error(&self, error: &AgentError) {
        if let Some(f) = &self.on_error {
            f(error);
        }
    }

    fn on_a2a_message(&self, message: &A2AMessage) {
        if let Some(f) = &self.on_a2a_message {
            f(message);
        }
    }

    fn on_task_event(&self, event: &TaskEvent) {
        if let Some(f) = &self.on_task_event {
            f(event);
        }
    }
}

/// Builder for [`CallbackListener`]
#[derive(Default)]
pub struct CallbackListenerBuilder {
    listener: CallbackListener,
}

impl CallbackListenerBuilder {
    /// Called when a primary connection opens
    #[must_use]
    pub fn on_open(mut self, f: impl Fn(&AgentId) + Send + Sync + 'static) -> Self {
        self.listener.on_open = Some(Arc::new(f));
        self
    }

    /// Called for every classified packet
    #[must_use]
    pub fn on_packet(mut self, f: impl Fn(&AgentPacket) + Send + Sync + 'static) -> Self {
        self.listener.on_packet = Some(Arc::new(f));
        self
    }

    /// Called on every status change
    #[must_use]
    pub fn on_status_change(
        mut self,
        f: impl Fn(&AgentId, AgentStatus) + Send + Sync + 'static,
    ) -> Self {
        self.listener.on_status_change = Some(Arc::new(f));
        self
    }

    /// Called when a primary connection goes away
    #[must_use]
    pub fn on_disconnect(mut self, f: impl Fn(&AgentId) + Send + Sync + 'static) -> Self {
        self.listener.on_disconnect = Some(Arc::new(f));
        self
    }

    /// Called when a primary connection comes back
    #[must_use]
    pub fn on_reconnect(mut self, f: impl Fn(&AgentId) + Send + Sync + 'static) -> Self {
        self.listener.on_reconnect = Some(Arc::new(f));
        self
    }

    /// Called on errors
    #[must_use]
    pub fn on_error(mut self, f: impl Fn(&AgentError) + Send + Sync + 'static) -> Self {
        self.listener.on_error = Some(Arc::new(f));
        self
    }

    /// Called for inbound agent-to-agent messages
    #[must_use]
    pub fn on_a2a_message(mut self, f: impl Fn(&A2AMessage) + Send + Sync + 'static) -> Self {
        self.listener.on_a2a_message = Some(Arc::new(f));
        self
    }

    /// Called for inbound task events
    #[must_use]
    pub fn on_task_event(mut self, f: impl Fn(&TaskEvent) + Send + Sync + 'static) -> Self {
        self.listener.on_task_event = Some(Arc::new(f));
        self
    }

    /// Build the listener
    #[must_use]
    pub fn build(self) -> CallbackListener {
        self.listener
    }
}
