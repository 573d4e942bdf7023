//! Command protocol for the connection manager loop
//!
//! [`ManagerCommand`]s come from [`ConnectionManager`](super::ConnectionManager)
//! handles; [`LoopEvent`]s come from tasks the loop spawned itself (timers,
//! transport relays, the health monitor).

use tokio::sync::oneshot;

use super::connection::ConnectionSnapshot;
use crate::error::Result;
use crate::scheduler::TimerTicket;
use crate::transport::TransportEvent;
use crate::types::identifiers::{AgentId, ConnectionId, SessionId};

/// Requests from manager handles
pub(super) enum ManagerCommand {
    /// Open (or keep) a connection for the pair
    Connect {
        session_id: SessionId,
        agent_id: AgentId,
        response_tx: oneshot::Sender<Result<()>>,
    },

    /// Tear down an agent's connection
    Disconnect {
        agent_id: AgentId,
        attempt_reconnect: bool,
        response_tx: oneshot::Sender<Result<()>>,
    },

    /// Send a text frame
    Send {
        agent_id: AgentId,
        payload: String,
        response_tx: oneshot::Sender<Result<()>>,
    },

    /// Start over after giving up
    RetryConnection {
        agent_id: AgentId,
        response_tx: oneshot::Sender<Result<()>>,
    },

    /// Describe one agent
    Inspect {
        agent_id: AgentId,
        response_tx: oneshot::Sender<ConnectionSnapshot>,
    },

    /// Agents with an open transport
    ConnectedAgents {
        response_tx: oneshot::Sender<Vec<AgentId>>,
    },

    /// Tear down everything but keep the loop running
    Cleanup { response_tx: oneshot::Sender<()> },

    /// Tear down everything and stop the loop
    Shutdown { response_tx: oneshot::Sender<()> },
}

/// Events from tasks owned by the loop
pub(super) enum LoopEvent {
    /// Settle delay finished; open the transport
    SettleElapsed {
        agent_id: AgentId,
        connection_id: ConnectionId,
    },

    /// Something happened on a transport
    Transport {
        agent_id: AgentId,
        connection_id: ConnectionId,
        event: TransportEvent,
    },

    /// A reconnect timer fired
    ReconnectDue {
        agent_id: AgentId,
        ticket: TimerTicket,
    },

    /// A parked send ran out of time
    SendTimeout {
        agent_id: AgentId,
        connection_id: ConnectionId,
        waiter: u64,
    },

    /// Health sweep tick
    Sweep,
}
