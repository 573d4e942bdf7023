//! Listener system for connection events
//!
//! Subscribers implement [`ConnectionListener`] (every method has a no-op
//! default) and register it with a [`ListenerRegistry`]. Registration returns a
//! [`Subscription`] that removes exactly that listener when unsubscribed, so
//! call sites never clobber each other's handlers.
//!
//! Listener methods run on the manager's event loop and must not block.

mod callback;
mod channel;

use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use uuid::Uuid;

use crate::error::AgentError;
use crate::types::identifiers::AgentId;
use crate::types::messages::{A2AMessage, AgentPacket, TaskEvent};
use crate::types::status::AgentStatus;

pub use callback::{CallbackListener, CallbackListenerBuilder};
pub use channel::{ChannelListener, LinkEvent, event_stream};

/// Receiver of connection events
#[allow(unused_variables)]
pub trait ConnectionListener: Send + Sync {
    /// A primary connection opened
    fn on_open(&self, agent_id: &AgentId) {}

    /// A classified packet arrived
    fn on_packet(&self, packet: &AgentPacket) {}

    /// An agent's status changed
    fn on_status_change(&self, agent_id: &AgentId, status: AgentStatus) {}

    /// A primary connection went away
    fn on_disconnect(&self, agent_id: &AgentId) {}

    /// A primary connection came back after a failure
    fn on_reconnect(&self, agent_id: &AgentId) {}

    /// Something failed for an agent
    fn on_error(&self, error: &AgentError) {}

    /// An agent-to-agent message arrived
    fn on_a2a_message(&self, message: &A2AMessage) {}

    /// A task event arrived
    fn on_task_event(&self, event: &TaskEvent) {}
}

/// Identifier of one registration
pub type ListenerId = Uuid;

type ListenerList = RwLock<Vec<(ListenerId, Arc<dyn ConnectionListener>)>>;

/// Registry of connection listeners, shared by the managers
#[derive(Clone, Default)]
pub struct ListenerRegistry {
    listeners: Arc<ListenerList>,
}

impl ListenerRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener
    pub fn subscribe(&self, listener: Arc<dyn ConnectionListener>) -> Subscription {
        let id = Uuid::new_v4();
        self.listeners.write().push((id, listener));
        Subscription {
            id,
            registry: Arc::downgrade(&self.listeners),
        }
    }

    /// Register a [`ChannelListener`] and return its event receiver
    pub fn subscribe_channel(
        &self,
    ) -> (Subscription, tokio::sync::mpsc::UnboundedReceiver<LinkEvent>) {
        let (listener, rx) = ChannelListener::new();
        (self.subscribe(Arc::new(listener)), rx)
    }

    /// Number of registered listeners
    #[must_use]
    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    /// Whether no listener is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.listeners.read().is_empty()
    }

    /// Invoke `f` on every listener
    ///
    /// The list is copied first so listeners may (un)subscribe from inside a
    /// callback.
    pub(crate) fn emit(&self, f: impl Fn(&dyn ConnectionListener)) {
        let listeners: Vec<Arc<dyn ConnectionListener>> = self
            .listeners
            .read()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            f(listener.as_ref());
        }
    }
}

impl std::fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("listeners", &format!("[{} listeners]", self.len()))
            .finish()
    }
}

/// Handle to one registration
#[derive(Debug)]
#[must_use = "dropping a Subscription keeps the listener registered; call unsubscribe to remove it"]
pub struct Subscription {
    id: ListenerId,
    registry: Weak<ListenerList>,
}

impl Subscription {
    /// Registration id
    #[must_use]
    pub const fn id(&self) -> ListenerId {
        self.id
    }

    /// Remove the listener
    ///
    /// Returns `false` if it was already gone.
    pub fn unsubscribe(self) -> bool {
        let Some(listeners) = self.registry.upgrade() else {
            return false;
        };
        let mut listeners = listeners.write();
        let before = listeners.len();
        listeners.retain(|(id, _)| *id != self.id);
        listeners.len() != before
    }
}
