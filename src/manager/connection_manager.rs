//! Public handle to the connection manager

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};

use super::background::{LoopContext, spawn_manager_loop};
use super::commands::ManagerCommand;
use super::connection::ConnectionSnapshot;
use crate::error::{LinkError, Result};
use crate::listeners::{ConnectionListener, LinkEvent, ListenerRegistry, Subscription};
use crate::status::StatusStore;
use crate::transport::{TransportFactory, WebSocketTransportFactory};
use crate::types::identifiers::{AgentId, SessionId};
use crate::types::options::LinkOptions;
use crate::types::status::{AgentStatus, ConnectionState};

/// Manages the primary connection of every agent
///
/// Cheap to clone; all clones drive the same event loop. The loop tears every
/// connection down once [`ConnectionManager::shutdown`] is called or the last
/// clone is dropped.
///
/// # Example
///
/// ```no_run
/// use kodegen_agent_link::{ConnectionManager, LinkOptions};
///
/// # async fn demo() -> kodegen_agent_link::Result<()> {
/// let manager = ConnectionManager::websocket(LinkOptions::from_env()?)?;
/// let (_subscription, mut events) = manager.subscribe_channel();
///
/// manager.connect("session-1", "planner").await?;
/// manager.send("planner", r#"{"message":"hello"}"#).await?;
///
/// while let Some(event) = events.recv().await {
///     println!("{event:?}");
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ConnectionManager {
    commands: mpsc::UnboundedSender<ManagerCommand>,
    status: StatusStore,
    listeners: ListenerRegistry,
    options: Arc<LinkOptions>,
}

impl ConnectionManager {
    /// Start a manager using `factory` for every transport
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    /// Returns `LinkError::InvalidConfig` if the options are invalid
    pub fn new(options: LinkOptions, factory: Arc<dyn TransportFactory>) -> Result<Self> {
        Self::with_listeners(options, factory, ListenerRegistry::new())
    }

    /// Start a manager over WebSockets
    ///
    /// # Errors
    /// Returns `LinkError::InvalidConfig` if the options are invalid
    pub fn websocket(options: LinkOptions) -> Result<Self> {
        Self::new(options, Arc::new(WebSocketTransportFactory::default()))
    }

    /// Start a manager sharing an existing listener registry
    ///
    /// # Errors
    /// Returns `LinkError::InvalidConfig` if the options are invalid
    pub fn with_listeners(
        options: LinkOptions,
        factory: Arc<dyn TransportFactory>,
        listeners: ListenerRegistry,
    ) -> Result<Self> {
        options.validate()?;
        let options = Arc::new(options);
        let status = StatusStore::new();
        let (commands, commands_rx) = mpsc::unbounded_channel();

        spawn_manager_loop(
            LoopContext {
                options: Arc::clone(&options),
                factory,
                status: status.clone(),
                listeners: listeners.clone(),
            },
            commands_rx,
        );

        Ok(Self {
            commands,
            status,
            listeners,
            options,
        })
    }

    /// Ensure a connection exists for `agent_id` within `session_id`
    ///
    /// Idempotent for a pair that is already connecting or connected. A
    /// different session replaces the existing connection. The status is
    /// `Connecting` by the time this returns.
    ///
    /// # Errors
    /// Returns error if the endpoint URL cannot be built or the manager is shut down
    pub async fn connect(
        &self,
        session_id: impl Into<SessionId>,
        agent_id: impl Into<AgentId>,
    ) -> Result<()> {
        let (session_id, agent_id) = (session_id.into(), agent_id.into());
        self.request(|response_tx| ManagerCommand::Connect {
            session_id,
            agent_id,
            response_tx,
        })
        .await?
    }

    /// Tear down an agent's connection
    ///
    /// With `attempt_reconnect` the agent goes straight back into the
    /// reconnection path with a fresh attempt counter; otherwise it ends up
    /// `Disconnected` with no pending timer.
    ///
    /// # Errors
    /// Returns `LinkError::ManagerClosed` if the manager is shut down
    pub async fn disconnect(
        &self,
        agent_id: impl Into<AgentId>,
        attempt_reconnect: bool,
    ) -> Result<()> {
        let agent_id = agent_id.into();
        self.request(|response_tx| ManagerCommand::Disconnect {
            agent_id,
            attempt_reconnect,
            response_tx,
        })
        .await?
    }

    /// Send a text frame to an agent
    ///
    /// If the connection is still opening, waits up to the configured send
    /// timeout for it to open.
    ///
    /// # Errors
    /// - `LinkError::NotConnected` if there is no live connection
    /// - `LinkError::ConnectTimeout` if the connection did not open in time
    pub async fn send(&self, agent_id: impl Into<AgentId>, payload: impl Into<String>) -> Result<()> {
        let (agent_id, payload) = (agent_id.into(), payload.into());
        self.request(|response_tx| ManagerCommand::Send {
            agent_id,
            payload,
            response_tx,
        })
        .await?
    }

    /// Serialize `message` as JSON and send it
    ///
    /// # Errors
    /// Returns error if serialization or the send fails
    pub async fn send_json<T: Serialize>(
        &self,
        agent_id: impl Into<AgentId>,
        message: &T,
    ) -> Result<()> {
        let payload = serde_json::to_string(message)?;
        self.send(agent_id, payload).await
    }

    /// Start over for an agent that is reconnecting or gave up
    ///
    /// Resets the attempt counter. A no-op if a connection attempt is live.
    ///
    /// # Errors
    /// Returns `LinkError::NotConnected` if the agent has no session to retry
    pub async fn retry_connection(&self, agent_id: impl Into<AgentId>) -> Result<()> {
        let agent_id = agent_id.into();
        self.request(|response_tx| ManagerCommand::RetryConnection {
            agent_id,
            response_tx,
        })
        .await?
    }

    /// Everything the manager knows about one agent
    ///
    /// # Errors
    /// Returns `LinkError::ManagerClosed` if the manager is shut down
    pub async fn inspect(&self, agent_id: impl Into<AgentId>) -> Result<ConnectionSnapshot> {
        let agent_id = agent_id.into();
        self.request(|response_tx| ManagerCommand::Inspect {
            agent_id,
            response_tx,
        })
        .await
    }

    /// Agents whose transport is open
    ///
    /// # Errors
    /// Returns `LinkError::ManagerClosed` if the manager is shut down
    pub async fn connected_agents(&self) -> Result<Vec<AgentId>> {
        self.request(|response_tx| ManagerCommand::ConnectedAgents { response_tx })
            .await
    }

    /// Disconnect every agent and cancel every timer
    ///
    /// The manager stays usable afterwards.
    ///
    /// # Errors
    /// Returns `LinkError::ManagerClosed` if the manager is shut down
    pub async fn cleanup(&self) -> Result<()> {
        self.request(|response_tx| ManagerCommand::Cleanup { response_tx })
            .await
    }

    /// Disconnect everything and stop the event loop
    ///
    /// # Errors
    /// Returns `LinkError::ManagerClosed` if the manager is already shut down
    pub async fn shutdown(&self) -> Result<()> {
        self.request(|response_tx| ManagerCommand::Shutdown { response_tx })
            .await
    }

    /// Current status of an agent
    #[must_use]
    pub fn status(&self, agent_id: &AgentId) -> AgentStatus {
        self.status.get(agent_id)
    }

    /// Current status of every known agent
    #[must_use]
    pub fn statuses(&self) -> HashMap<AgentId, AgentStatus> {
        self.status.snapshot()
    }

    /// Agents whose connection is in the given state, sorted
    #[must_use]
    pub fn agents_in(&self, state: ConnectionState) -> Vec<AgentId> {
        self.status.agents_in(state)
    }

    /// The status store, for readers that outlive this handle
    #[must_use]
    pub const fn status_store(&self) -> &StatusStore {
        &self.status
    }

    /// The listener registry
    #[must_use]
    pub const fn listeners(&self) -> &ListenerRegistry {
        &self.listeners
    }

    /// Register a listener
    pub fn subscribe(&self, listener: Arc<dyn ConnectionListener>) -> Subscription {
        self.listeners.subscribe(listener)
    }

    /// Register a channel listener and return its receiver
    pub fn subscribe_channel(&self) -> (Subscription, mpsc::UnboundedReceiver<LinkEvent>) {
        self.listeners.subscribe_channel()
    }

    /// Options in effect
    #[must_use]
    pub fn options(&self) -> &LinkOptions {
        &self.options
    }

    /// Whether the event loop has stopped
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> ManagerCommand,
    ) -> Result<T> {
        let (response_tx, response_rx) = oneshot::channel();
        self.commands
            .send(command(response_tx))
            .map_err(|_| LinkError::ManagerClosed)?;
        response_rx.await.map_err(|_| LinkError::ManagerClosed)
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("agents", &self.status.snapshot().len())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
