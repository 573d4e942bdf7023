//! The connection manager's event loop
//!
//! One task owns the registry, the reconnect timers and the health sweep.
//! Handles talk to it through [`ManagerCommand`]s; transports, timers and the
//! health monitor feed it [`LoopEvent`]s. Every event carries the
//! [`ConnectionId`] of the attempt that produced it, and events whose id no
//! longer matches the registry entry are dropped.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::commands::{LoopEvent, ManagerCommand};
use super::connection::{
    AgentConnection, AttemptKind, ConnectionSnapshot, RetiredConnection, WaitingSend,
};
use crate::error::{AgentError, LinkError, Result};
use crate::health::{HealthMonitor, SweepAction, plan_sweep};
use crate::listeners::ListenerRegistry;
use crate::message::{PROBE_FRAME, classify};
use crate::scheduler::{ReconnectScheduler, ScheduleOutcome, TimerTicket};
use crate::status::StatusStore;
use crate::transport::{
    CLOSE_LIVENESS_TIMEOUT, CLOSE_NORMAL, ReadyState, TransportEvent, TransportFactory,
    spawn_event_relay,
};
use crate::types::identifiers::{AgentId, ConnectionId, SessionId};
use crate::types::messages::AgentPacket;
use crate::types::options::LinkOptions;
use crate::types::status::{ActivityState, AgentStatus, ConnectionState};

/// Shared state handed to the loop
pub(super) struct LoopContext {
    pub options: Arc<LinkOptions>,
    pub factory: Arc<dyn TransportFactory>,
    pub status: StatusStore,
    pub listeners: ListenerRegistry,
}

/// Spawn the event loop
///
/// The loop runs until a `Shutdown` command arrives or every handle is
/// dropped; either way all connections are torn down first.
pub(super) fn spawn_manager_loop(
    ctx: LoopContext,
    commands: mpsc::UnboundedReceiver<ManagerCommand>,
) -> JoinHandle<()> {
    let (events_tx, events_rx) = mpsc::unbounded_channel();

    let fire_tx = events_tx.clone();
    let scheduler = ReconnectScheduler::<AgentId>::new(ctx.options.reconnect.clone(), move |agent_id, ticket| {
        let _ = fire_tx.send(LoopEvent::ReconnectDue { agent_id, ticket });
    });

    let sweep_tx = events_tx.clone();
    let health = HealthMonitor::spawn(ctx.options.health.probe_interval(), move || {
        sweep_tx.send(LoopEvent::Sweep).is_ok()
    });

    let manager_loop = ManagerLoop {
        options: ctx.options,
        factory: ctx.factory,
        status: ctx.status,
        listeners: ctx.listeners,
        registry: HashMap::new(),
        retired: HashMap::new(),
        last_sessions: HashMap::new(),
        scheduler,
        events_tx,
        next_connection_id: ConnectionId::new(1),
        next_waiter_id: 0,
        _health: health,
    };

    tokio::spawn(manager_loop.run(commands, events_rx))
}

struct ManagerLoop {
    options: Arc<LinkOptions>,
    factory: Arc<dyn TransportFactory>,
    status: StatusStore,
    listeners: ListenerRegistry,
    registry: HashMap<AgentId, AgentConnection>,
    retired: HashMap<AgentId, RetiredConnection>,
    last_sessions: HashMap<AgentId, SessionId>,
    scheduler: ReconnectScheduler<AgentId>,
    events_tx: mpsc::UnboundedSender<LoopEvent>,
    next_connection_id: ConnectionId,
    next_waiter_id: u64,
    _health: HealthMonitor,
}

impl ManagerLoop {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<ManagerCommand>,
        mut events: mpsc::UnboundedReceiver<LoopEvent>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => {
                    let Some(command) = command else {
                        log::debug!("All manager handles dropped");
                        break;
                    };
                    if !self.handle_command(command) {
                        return;
                    }
                }
                Some(event) = events.recv() => self.handle_event(event),
            }
        }
        self.teardown_all();
    }

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------

    /// Returns `false` once the loop should stop
    fn handle_command(&mut self, command: ManagerCommand) -> bool {
        match command {
            ManagerCommand::Connect {
                session_id,
                agent_id,
                response_tx,
            } => {
                let _ = response_tx.send(self.connect(session_id, agent_id));
            }
            ManagerCommand::Disconnect {
                agent_id,
                attempt_reconnect,
                response_tx,
            } => {
                self.disconnect(&agent_id, attempt_reconnect);
                let _ = response_tx.send(Ok(()));
            }
            ManagerCommand::Send {
                agent_id,
                payload,
                response_tx,
            } => self.send(agent_id, payload, response_tx),
            ManagerCommand::RetryConnection {
                agent_id,
                response_tx,
            } => {
                let _ = response_tx.send(self.retry(agent_id));
            }
            ManagerCommand::Inspect {
                agent_id,
                response_tx,
            } => {
                let _ = response_tx.send(self.inspect(agent_id));
            }
            ManagerCommand::ConnectedAgents { response_tx } => {
                let _ = response_tx.send(self.connected_agents());
            }
            ManagerCommand::Cleanup { response_tx } => {
                self.teardown_all();
                let _ = response_tx.send(());
            }
            ManagerCommand::Shutdown { response_tx } => {
                self.teardown_all();
                let _ = response_tx.send(());
                return false;
            }
        }
        true
    }

    fn connect(&mut self, session_id: SessionId, agent_id: AgentId) -> Result<()> {
        self.options.endpoints.agent_url(&session_id, &agent_id)?;

        if let Some(existing) = self.registry.get(&agent_id) {
            if existing.session_id == session_id {
                log::debug!("Agent {agent_id} already connecting or connected in {session_id}");
                return Ok(());
            }
            log::info!(
                "Agent {agent_id} moving from session {} to {session_id}",
                existing.session_id
            );
            if let Some(record) = self.registry.remove(&agent_id) {
                record.release(CLOSE_NORMAL, "session changed");
            }
        }

        self.scheduler.cancel(&agent_id);
        self.retired.remove(&agent_id);
        self.begin_attempt(agent_id, session_id, 0, AttemptKind::Fresh);
        Ok(())
    }

    fn disconnect(&mut self, agent_id: &AgentId, attempt_reconnect: bool) {
        self.scheduler.cancel(agent_id);
        let retired = self.retired.remove(agent_id);
        let record = self.registry.remove(agent_id);

        let session_id = record
            .as_ref()
            .map(|record| record.session_id.clone())
            .or_else(|| retired.map(|retired| retired.session_id));
        let Some(session_id) = session_id else {
            log::debug!("Disconnect for unknown agent {agent_id} ignored");
            return;
        };

        let was_open = record.as_ref().is_some_and(|record| record.opened);
        if let Some(record) = record {
            record.release(CLOSE_NORMAL, "client disconnect");
        }
        if was_open {
            self.listeners.emit(|l| l.on_disconnect(agent_id));
        }

        if attempt_reconnect {
            log::info!("Agent {agent_id} disconnected; reconnecting");
            self.schedule_reconnect(agent_id.clone(), session_id, 0);
        } else {
            log::info!("Agent {agent_id} disconnected");
            self.publish(agent_id, AgentStatus::new(ConnectionState::Disconnected));
        }
    }

    fn send(
        &mut self,
        agent_id: AgentId,
        payload: String,
        response_tx: oneshot::Sender<Result<()>>,
    ) {
        let Some(record) = self.registry.get_mut(&agent_id) else {
            let _ = response_tx.send(Err(LinkError::not_connected(agent_id.as_str())));
            return;
        };

        if record.is_opening() {
            let waiter = self.next_waiter_id;
            self.next_waiter_id += 1;

            let timeout = self.options.send_timeout();
            let events = self.events_tx.clone();
            let timed_out = (agent_id.clone(), record.connection_id);
            let timer = tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                let (agent_id, connection_id) = timed_out;
                let _ = events.send(LoopEvent::SendTimeout {
                    agent_id,
                    connection_id,
                    waiter,
                });
            });

            log::debug!("Send to agent {agent_id} parked until the connection opens");
            record.waiting_sends.push(WaitingSend {
                id: waiter,
                payload,
                response_tx,
                timer,
            });
            return;
        }

        let result = match record.transport.as_mut() {
            Some(transport) if transport.is_ready() => transport.send(&payload),
            _ => Err(LinkError::not_connected(agent_id.as_str())),
        };
        if result.is_ok() {
            self.set_activity(&agent_id, ActivityState::Thinking);
        }
        let _ = response_tx.send(result);
    }

    fn retry(&mut self, agent_id: AgentId) -> Result<()> {
        if self.registry.contains_key(&agent_id) {
            return Ok(());
        }
        let session_id = match self.retired.remove(&agent_id) {
            Some(retired) => retired.session_id,
            None => self
                .last_sessions
                .get(&agent_id)
                .cloned()
                .ok_or_else(|| LinkError::not_connected(agent_id.as_str()))?,
        };
        self.scheduler.cancel(&agent_id);
        log::info!("Retrying agent {agent_id} with a fresh attempt counter");
        self.begin_attempt(agent_id, session_id, 0, AttemptKind::Retry);
        Ok(())
    }

    fn inspect(&self, agent_id: AgentId) -> ConnectionSnapshot {
        let record = self.registry.get(&agent_id);
        let session_id = record.map(|record| record.session_id.clone()).or_else(|| {
            self.retired
                .get(&agent_id)
                .map(|retired| retired.session_id.clone())
        });
        ConnectionSnapshot {
            status: self.status.get(&agent_id),
            connection: record.map(AgentConnection::info),
            pending_reconnect: self.scheduler.pending_attempt(&agent_id),
            session_id,
            agent_id,
        }
    }

    fn connected_agents(&self) -> Vec<AgentId> {
        let mut agents: Vec<AgentId> = self
            .registry
            .values()
            .filter(|record| record.ready_state() == Some(ReadyState::Open))
            .map(|record| record.agent_id.clone())
            .collect();
        agents.sort();
        agents
    }

    fn teardown_all(&mut self) {
        self.scheduler.cancel_all();
        let agents: BTreeSet<AgentId> = self
            .registry
            .keys()
            .chain(self.retired.keys())
            .cloned()
            .collect();
        for agent_id in &agents {
            self.disconnect(agent_id, false);
        }
    }

    // ------------------------------------------------------------------
    // Loop events
    // ------------------------------------------------------------------

    fn handle_event(&mut self, event: LoopEvent) {
        match event {
            LoopEvent::SettleElapsed {
                agent_id,
                connection_id,
            } => self.open_transport(&agent_id, connection_id),
            LoopEvent::Transport {
                agent_id,
                connection_id,
                event,
            } => {
                if !self.is_current(&agent_id, connection_id) {
                    log::trace!("Dropping event from superseded connection {connection_id} of {agent_id}");
                    return;
                }
                match event {
                    TransportEvent::Open => self.on_transport_open(&agent_id, connection_id),
                    TransportEvent::Message(raw) => {
                        self.on_transport_message(&agent_id, connection_id, &raw);
                    }
                    TransportEvent::Error(message) => {
                        log::warn!("Transport error for agent {agent_id}: {message}");
                        self.emit_error(&agent_id, &LinkError::transport(message));
                    }
                    TransportEvent::Close { code, reason } => {
                        self.on_transport_close(&agent_id, connection_id, code, &reason);
                    }
                }
            }
            LoopEvent::ReconnectDue { agent_id, ticket } => self.reconnect_due(agent_id, ticket),
            LoopEvent::SendTimeout {
                agent_id,
                connection_id,
                waiter,
            } => self.send_timed_out(&agent_id, connection_id, waiter),
            LoopEvent::Sweep => self.sweep(),
        }
    }

    fn begin_attempt(
        &mut self,
        agent_id: AgentId,
        session_id: SessionId,
        reconnect_attempts: u32,
        kind: AttemptKind,
    ) {
        let connection_id = self.next_connection_id;
        self.next_connection_id = connection_id.next();

        self.last_sessions
            .insert(agent_id.clone(), session_id.clone());
        let mut record = AgentConnection::new(
            agent_id.clone(),
            session_id,
            connection_id,
            kind,
            reconnect_attempts,
        );
        self.publish(&agent_id, AgentStatus::new(ConnectionState::Connecting));

        let settle = self.options.settle_delay();
        if kind.settles() && !settle.is_zero() {
            let events = self.events_tx.clone();
            let settled = agent_id.clone();
            record.settle_timer = Some(tokio::spawn(async move {
                tokio::time::sleep(settle).await;
                let _ = events.send(LoopEvent::SettleElapsed {
                    agent_id: settled,
                    connection_id,
                });
            }));
            self.registry.insert(agent_id, record);
        } else {
            self.registry.insert(agent_id.clone(), record);
            self.open_transport(&agent_id, connection_id);
        }
    }

    fn open_transport(&mut self, agent_id: &AgentId, connection_id: ConnectionId) {
        let Some(session_id) = self
            .current(agent_id, connection_id)
            .map(|record| record.session_id.clone())
        else {
            return;
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let opened = self
            .options
            .endpoints
            .agent_url(&session_id, agent_id)
            .and_then(|url| {
                log::debug!("Opening {url} for agent {agent_id} ({connection_id})");
                self.factory.open(&url, tx)
            });

        match opened {
            Ok(transport) => {
                let tagged = agent_id.clone();
                let relay = spawn_event_relay(rx, self.events_tx.clone(), move |event| {
                    LoopEvent::Transport {
                        agent_id: tagged.clone(),
                        connection_id,
                        event,
                    }
                });
                if let Some(record) = self.registry.get_mut(agent_id) {
                    record.settle_timer = None;
                    record.transport = Some(transport);
                    record.relay = Some(relay);
                }
            }
            Err(e) => {
                log::warn!("Failed to open transport for agent {agent_id}: {e}");
                self.emit_error(agent_id, &LinkError::transport_open(e.to_string()));
                if let Some(record) = self.take_current(agent_id, connection_id) {
                    self.retire_abnormally(record);
                }
            }
        }
    }

    fn on_transport_open(&mut self, agent_id: &AgentId, connection_id: ConnectionId) {
        let Some(record) = self.current_mut(agent_id, connection_id) else {
            return;
        };
        record.opened = true;
        record.reconnect_attempts = 0;
        record.touch();
        let is_reconnect = record.kind.is_reconnect();
        let waiting = std::mem::take(&mut record.waiting_sends);

        log::info!("Agent {agent_id} connected ({connection_id})");
        self.publish(agent_id, AgentStatus::connected());
        self.listeners.emit(|l| l.on_open(agent_id));
        if is_reconnect {
            self.listeners.emit(|l| l.on_reconnect(agent_id));
        }

        let mut delivered = false;
        if let Some(record) = self.current_mut(agent_id, connection_id) {
            for WaitingSend {
                payload,
                response_tx,
                timer,
                ..
            } in waiting
            {
                timer.abort();
                if response_tx.is_closed() {
                    continue;
                }
                let result = match record.transport.as_mut() {
                    Some(transport) => transport.send(&payload),
                    None => Err(LinkError::not_connected(agent_id.as_str())),
                };
                delivered |= result.is_ok();
                let _ = response_tx.send(result);
            }
        }
        if delivered {
            self.set_activity(agent_id, ActivityState::Thinking);
        }
    }

    fn on_transport_message(&mut self, agent_id: &AgentId, connection_id: ConnectionId, raw: &str) {
        let Some(record) = self.current_mut(agent_id, connection_id) else {
            return;
        };
        record.touch();

        let frame = classify(raw);
        if frame.is_probe_response() {
            log::trace!("Agent {agent_id} answered the liveness probe");
            let status = self.status.get(agent_id);
            if status.is_connected() && status.activity_state == ActivityState::Error {
                self.publish(agent_id, status.with_activity(ActivityState::Idle));
            }
            return;
        }

        if let Some(activity) = frame.activity() {
            self.set_activity(agent_id, activity);
        }
        let packet = AgentPacket {
            agent_id: agent_id.clone(),
            frame,
            received_at: Utc::now(),
        };
        self.listeners.emit(|l| l.on_packet(&packet));
    }

    fn on_transport_close(
        &mut self,
        agent_id: &AgentId,
        connection_id: ConnectionId,
        code: u16,
        reason: &str,
    ) {
        let Some(record) = self.take_current(agent_id, connection_id) else {
            return;
        };

        // The manager detaches its own closes, so any close seen here is abnormal
        log::warn!("Agent {agent_id} connection closed abnormally (code {code}): {reason}");
        let err = if record.opened {
            LinkError::abnormal_close(code, reason)
        } else {
            LinkError::transport_open(format!("{reason} (code {code})"))
        };
        self.emit_error(agent_id, &err);
        self.retire_abnormally(record);
    }

    fn reconnect_due(&mut self, agent_id: AgentId, ticket: TimerTicket) {
        let Some(attempt) = self.scheduler.take_due(&agent_id, ticket) else {
            return;
        };
        if self.registry.contains_key(&agent_id) {
            return;
        }
        let Some(retired) = self.retired.remove(&agent_id) else {
            return;
        };
        log::info!(
            "Reconnect attempt {attempt}/{} for agent {agent_id}",
            self.scheduler.policy().max_attempts
        );
        self.begin_attempt(
            agent_id,
            retired.session_id,
            retired.attempts,
            AttemptKind::Backoff,
        );
    }

    fn send_timed_out(&mut self, agent_id: &AgentId, connection_id: ConnectionId, waiter: u64) {
        let timeout_ms = self.options.send_timeout_ms;
        let Some(record) = self.current_mut(agent_id, connection_id) else {
            return;
        };
        let Some(index) = record.waiting_sends.iter().position(|w| w.id == waiter) else {
            return;
        };
        log::debug!("Send to agent {agent_id} timed out waiting for the connection");
        record
            .waiting_sends
            .swap_remove(index)
            .fail(LinkError::connect_timeout(agent_id.as_str(), timeout_ms));
    }

    fn sweep(&mut self) {
        let now = Instant::now();
        let threshold = self.options.health.liveness_threshold();
        let mut failed = Vec::new();

        for record in self.registry.values_mut() {
            if !record.opened || record.ready_state() != Some(ReadyState::Open) {
                continue;
            }
            match plan_sweep(now, record.last_activity, record.probe_outstanding, threshold) {
                SweepAction::Healthy => {}
                SweepAction::Probe => {
                    let probed = record
                        .transport
                        .as_mut()
                        .is_some_and(|transport| transport.send(PROBE_FRAME).is_ok());
                    if probed {
                        log::debug!("Probing silent agent {}", record.agent_id);
                        record.probe_outstanding = true;
                    } else {
                        failed.push((record.agent_id.clone(), record.connection_id));
                    }
                }
                SweepAction::Fail => failed.push((record.agent_id.clone(), record.connection_id)),
            }
        }

        for (agent_id, connection_id) in failed {
            let Some(mut record) = self.take_current(&agent_id, connection_id) else {
                continue;
            };
            log::warn!("Agent {agent_id} did not answer the liveness probe");
            record.detach();
            record.close_transport(CLOSE_LIVENESS_TIMEOUT, "liveness timeout");
            self.emit_error(
                &agent_id,
                &LinkError::LivenessTimeout(self.options.health.probe_interval_ms),
            );
            self.retire_abnormally(record);
        }
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    /// Schedule a reconnect for a connection that failed on its own
    fn retire_abnormally(&mut self, mut record: AgentConnection) {
        record.detach();
        record.fail_waiting_sends();
        let agent_id = record.agent_id.clone();
        if record.opened {
            self.listeners.emit(|l| l.on_disconnect(&agent_id));
        }
        self.schedule_reconnect(agent_id, record.session_id.clone(), record.reconnect_attempts);
    }

    fn schedule_reconnect(&mut self, agent_id: AgentId, session_id: SessionId, previous: u32) {
        let failures = previous.saturating_add(1);
        match self.scheduler.schedule(agent_id.clone(), failures) {
            ScheduleOutcome::Scheduled { attempt, delay } => {
                log::info!("Reconnecting agent {agent_id} in {delay:?} (attempt {attempt})");
                self.retired.insert(
                    agent_id.clone(),
                    RetiredConnection {
                        session_id,
                        attempts: failures,
                    },
                );
                self.publish(&agent_id, AgentStatus::new(ConnectionState::Reconnecting));
            }
            ScheduleOutcome::Exhausted { attempts } => {
                log::error!("Giving up on agent {agent_id} after {attempts} failed attempts");
                self.retired
                    .insert(agent_id.clone(), RetiredConnection { session_id, attempts });
                self.publish(&agent_id, AgentStatus::new(ConnectionState::Error));
                self.emit_error(&agent_id, &LinkError::ExhaustedRetries(attempts));
            }
        }
    }

    fn publish(&self, agent_id: &AgentId, status: AgentStatus) {
        if self.status.set(agent_id, status) {
            log::debug!(
                "Agent {agent_id} is now {:?}/{:?}",
                status.connection_state,
                status.activity_state
            );
            self.listeners.emit(|l| l.on_status_change(agent_id, status));
        }
    }

    fn set_activity(&self, agent_id: &AgentId, activity: ActivityState) {
        let status = self.status.get(agent_id);
        if status.is_connected() {
            self.publish(agent_id, status.with_activity(activity));
        }
    }

    fn emit_error(&self, agent_id: &AgentId, err: &LinkError) {
        let error = AgentError::from_link_error(agent_id.clone(), err);
        self.listeners.emit(|l| l.on_error(&error));
    }

    fn is_current(&self, agent_id: &AgentId, connection_id: ConnectionId) -> bool {
        self.current(agent_id, connection_id).is_some()
    }

    fn current(&self, agent_id: &AgentId, connection_id: ConnectionId) -> Option<&AgentConnection> {
        self.registry
            .get(agent_id)
            .filter(|record| record.connection_id == connection_id)
    }

    fn current_mut(
        &mut self,
        agent_id: &AgentId,
        connection_id: ConnectionId,
    ) -> Option<&mut AgentConnection> {
        self.registry
            .get_mut(agent_id)
            .filter(|record| record.connection_id == connection_id)
    }

    fn take_current(
        &mut self,
        agent_id: &AgentId,
        connection_id: ConnectionId,
    ) -> Option<AgentConnection> {
        if self.is_current(agent_id, connection_id) {
            self.registry.remove(agent_id)
        } else {
            None
        }
    }
}
