//! Per-agent connection records
//!
//! The registry holds at most one [`AgentConnection`] per agent: the live
//! attempt. Agents waiting on a reconnect timer (or parked in `Error`) keep
//! only a [`RetiredConnection`] carrying the session and failure count forward.

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::error::{LinkError, Result};
use crate::transport::{ReadyState, Transport};
use crate::types::identifiers::{AgentId, ConnectionId, SessionId};
use crate::types::status::AgentStatus;

/// How an attempt was started
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum AttemptKind {
    /// `connect()`
    Fresh,
    /// `retry_connection()`
    Retry,
    /// Backoff timer
    Backoff,
}

impl AttemptKind {
    /// Whether the settle delay applies
    pub(super) const fn settles(self) -> bool {
        matches!(self, Self::Fresh | Self::Retry)
    }

    /// Whether a successful open counts as a reconnect
    pub(super) const fn is_reconnect(self) -> bool {
        matches!(self, Self::Retry | Self::Backoff)
    }
}

/// A `send()` parked until the connection opens
pub(super) struct WaitingSend {
    pub id: u64,
    pub payload: String,
    pub response_tx: oneshot::Sender<Result<()>>,
    pub timer: JoinHandle<()>,
}

impl WaitingSend {
    pub(super) fn fail(self, err: LinkError) {
        self.timer.abort();
        let _ = self.response_tx.send(Err(err));
    }
}

/// The live connection attempt for one agent
pub(super) struct AgentConnection {
    pub agent_id: AgentId,
    pub session_id: SessionId,
    pub connection_id: ConnectionId,
    pub kind: AttemptKind,
    /// `None` while the settle delay runs
    pub transport: Option<Box<dyn Transport>>,
    pub relay: Option<JoinHandle<()>>,
    pub settle_timer: Option<JoinHandle<()>>,
    pub reconnect_attempts: u32,
    pub opened: bool,
    pub last_activity: Instant,
    pub probe_outstanding: bool,
    pub waiting_sends: Vec<WaitingSend>,
}

impl AgentConnection {
    pub(super) fn new(
        agent_id: AgentId,
        session_id: SessionId,
        connection_id: ConnectionId,
        kind: AttemptKind,
        reconnect_attempts: u32,
    ) -> Self {
        Self {
            agent_id,
            session_id,
            connection_id,
            kind,
            transport: None,
            relay: None,
            settle_timer: None,
            reconnect_attempts,
            opened: false,
            last_activity: Instant::now(),
            probe_outstanding: false,
            waiting_sends: Vec::new(),
        }
    }

    /// Transport readiness; `None` while settling
    pub(super) fn ready_state(&self) -> Option<ReadyState> {
        self.transport.as_ref().map(|transport| transport.ready_state())
    }

    /// Still opening (settling or handshaking)
    pub(super) fn is_opening(&self) -> bool {
        matches!(self.ready_state(), None | Some(ReadyState::Connecting))
    }

    /// Record inbound traffic
    pub(super) fn touch(&mut self) {
        self.last_activity = Instant::now();
        self.probe_outstanding = false;
    }

    /// Stop every task feeding this record into the loop
    pub(super) fn detach(&mut self) {
        if let Some(relay) = self.relay.take() {
            relay.abort();
        }
        if let Some(timer) = self.settle_timer.take() {
            timer.abort();
        }
    }

    /// Close the transport; must follow [`AgentConnection::detach`]
    pub(super) fn close_transport(&mut self, code: u16, reason: &str) {
        if let Some(mut transport) = self.transport.take() {
            transport.close(code, reason);
        }
    }

    /// Fail every parked send with `NotConnected`
    pub(super) fn fail_waiting_sends(&mut self) {
        for waiter in self.waiting_sends.drain(..) {
            waiter.fail(LinkError::not_connected(self.agent_id.as_str()));
        }
    }

    /// Detach, close and fail parked sends
    pub(super) fn release(mut self, code: u16, reason: &str) {
        self.detach();
        self.close_transport(code, reason);
        self.fail_waiting_sends();
    }

    pub(super) fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            session_id: self.session_id.clone(),
            connection_id: self.connection_id,
            ready_state: self.ready_state(),
            reconnect_attempts: self.reconnect_attempts,
            probe_outstanding: self.probe_outstanding,
        }
    }
}

/// What survives a failed connection until its reconnect fires
#[derive(Debug, Clone)]
pub(super) struct RetiredConnection {
    pub session_id: SessionId,
    pub attempts: u32,
}

/// Public view of a registry entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// Session the connection belongs to
    pub session_id: SessionId,
    /// Identity of this attempt
    pub connection_id: ConnectionId,
    /// Transport readiness; `None` while the settle delay runs
    pub ready_state: Option<ReadyState>,
    /// Consecutive failures before this attempt
    pub reconnect_attempts: u32,
    /// A liveness probe is awaiting an answer
    pub probe_outstanding: bool,
}

/// Everything the manager knows about one agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSnapshot {
    /// Agent
    pub agent_id: AgentId,
    /// Published status
    pub status: AgentStatus,
    /// Registry entry, if a connection attempt is live
    pub connection: Option<ConnectionInfo>,
    /// Attempt number of the pending reconnect timer
    pub pending_reconnect: Option<u32>,
    /// Session the agent will reconnect to
    pub session_id: Option<SessionId>,
}

impl ConnectionSnapshot {
    /// Whether a registry entry exists
    #[must_use]
    pub const fn is_registered(&self) -> bool {
        self.connection.is_some()
    }
}
