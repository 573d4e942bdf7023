//! Public handle to the signaling manager

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use super::background::{SignalingCommand, spawn_signaling_loop};
use super::channel::ChannelKey;
use crate::error::{LinkError, Result};
use crate::listeners::ListenerRegistry;
use crate::transport::{TransportFactory, WebSocketTransportFactory};
use crate::types::identifiers::{AgentId, TaskId};
use crate::types::messages::A2AMessage;
use crate::types::options::LinkOptions;

/// Manages agent-to-agent channels and task subscriptions
///
/// Inbound traffic is delivered through `on_a2a_message` and `on_task_event`
/// on the listener registry. Cheap to clone.
#[derive(Clone)]
pub struct SignalingManager {
    commands: mpsc::UnboundedSender<SignalingCommand>,
    listeners: ListenerRegistry,
}

impl SignalingManager {
    /// Start a signaling manager using `factory` for every channel
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    /// Returns `LinkError::InvalidConfig` if the options are invalid
    pub fn new(
        options: LinkOptions,
        factory: Arc<dyn TransportFactory>,
        listeners: ListenerRegistry,
    ) -> Result<Self> {
        options.validate()?;
        let (commands, commands_rx) = mpsc::unbounded_channel();
        spawn_signaling_loop(Arc::new(options), factory, listeners.clone(), commands_rx);
        Ok(Self {
            commands,
            listeners,
        })
    }

    /// Start a signaling manager over WebSockets
    ///
    /// # Errors
    /// Returns `LinkError::InvalidConfig` if the options are invalid
    pub fn websocket(options: LinkOptions, listeners: ListenerRegistry) -> Result<Self> {
        Self::new(
            options,
            Arc::new(WebSocketTransportFactory::default()),
            listeners,
        )
    }

    /// Open the agent-to-agent channel of `agent_id`
    ///
    /// # Errors
    /// Returns error if the endpoint URL cannot be built or the manager is shut down
    pub async fn connect_agent_channel(&self, agent_id: impl Into<AgentId>) -> Result<()> {
        let key = ChannelKey::Agent(agent_id.into());
        self.request(|response_tx| SignalingCommand::Open { key, response_tx })
            .await?
    }

    /// Close the agent-to-agent channel of `agent_id`
    ///
    /// Returns whether anything was open or pending.
    ///
    /// # Errors
    /// Returns `LinkError::ManagerClosed` if the manager is shut down
    pub async fn disconnect_agent_channel(&self, agent_id: impl Into<AgentId>) -> Result<bool> {
        let key = ChannelKey::Agent(agent_id.into());
        self.request(|response_tx| SignalingCommand::Close { key, response_tx })
            .await
    }

    /// Send a message from `from_agent` to `to_agent` on `from_agent`'s channel
    ///
    /// # Errors
    /// Returns `LinkError::NoActiveChannel` if that channel is not open
    pub async fn send_a2a(
        &self,
        from_agent: impl Into<AgentId>,
        to_agent: impl Into<AgentId>,
        content: Value,
    ) -> Result<A2AMessage> {
        let message = A2AMessage::new(from_agent, to_agent, content);
        let sent = message.clone();
        self.request(|response_tx| SignalingCommand::SendA2A {
            message: sent,
            response_tx,
        })
        .await??;
        Ok(message)
    }

    /// Subscribe to events of `task_id`
    ///
    /// # Errors
    /// Returns error if the endpoint URL cannot be built or the manager is shut down
    pub async fn subscribe_task(&self, task_id: impl Into<TaskId>) -> Result<()> {
        let key = ChannelKey::Task(task_id.into());
        self.request(|response_tx| SignalingCommand::Open { key, response_tx })
            .await?
    }

    /// Stop receiving events of `task_id`
    ///
    /// # Errors
    /// Returns `LinkError::ManagerClosed` if the manager is shut down
    pub async fn unsubscribe_task(&self, task_id: impl Into<TaskId>) -> Result<bool> {
        let key = ChannelKey::Task(task_id.into());
        self.request(|response_tx| SignalingCommand::Close { key, response_tx })
            .await
    }

    /// Whether the channel for `key` is open
    ///
    /// # Errors
    /// Returns `LinkError::ManagerClosed` if the manager is shut down
    pub async fn is_channel_open(&self, key: impl Into<ChannelKey>) -> Result<bool> {
        let key = key.into();
        self.request(|response_tx| SignalingCommand::IsOpen { key, response_tx })
            .await
    }

    /// Every open channel
    ///
    /// # Errors
    /// Returns `LinkError::ManagerClosed` if the manager is shut down
    pub async fn open_channels(&self) -> Result<Vec<ChannelKey>> {
        self.request(|response_tx| SignalingCommand::OpenChannels { response_tx })
            .await
    }

    /// Close every channel and cancel every timer
    ///
    /// # Errors
    /// Returns `LinkError::ManagerClosed` if the manager is shut down
    pub async fn cleanup(&self) -> Result<()> {
        self.request(|response_tx| SignalingCommand::Cleanup { response_tx })
            .await
    }

    /// Close everything and stop the event loop
    ///
    /// # Errors
    /// Returns `LinkError::ManagerClosed` if the manager is already shut down
    pub async fn shutdown(&self) -> Result<()> {
        self.request(|response_tx| SignalingCommand::Shutdown { response_tx })
            .await
    }

    /// The listener registry inbound traffic is delivered to
    #[must_use]
    pub const fn listeners(&self) -> &ListenerRegistry {
        &self.listeners
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> SignalingCommand,
    ) -> Result<T> {
        let (response_tx, response_rx) = oneshot::channel();
        self.commands
            .send(command(response_tx))
            .map_err(|_| LinkError::ManagerClosed)?;
        response_rx.await.map_err(|_| LinkError::ManagerClosed)
    }
}

impl std::fmt::Debug for SignalingManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalingManager")
            .field("closed", &self.commands.is_closed())
            .finish_non_exhaustive()
    }
}
