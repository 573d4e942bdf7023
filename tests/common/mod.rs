//! Shared helpers for the integration tests
//!
//! Every test runs on paused Tokio time, so backoff and sweep timers elapse
//! instantly once the runtime is idle.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use kodegen_agent_link::{
    AgentId, AgentStatus, ConnectionManager, ConnectionState, Endpoints, HealthOptions, LinkEvent,
    LinkOptions, MemoryConnection, MemoryTransportFactory, ReconnectPolicy, Subscription,
};
use tokio::sync::mpsc::UnboundedReceiver;

pub const SETTLE: Duration = Duration::from_millis(100);
pub const SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Jitter-free policy: delays are exactly 1s, 2s, 4s, ...
pub fn policy() -> ReconnectPolicy {
    ReconnectPolicy {
        base_delay_ms: 1_000,
        multiplier: 2.0,
        max_delay_ms: 30_000,
        max_attempts: 5,
        jitter_ms: 0,
    }
}

/// Options whose health sweep never fires within a test
pub fn quiet_options() -> LinkOptions {
    options_with_health(HealthOptions {
        liveness_threshold_ms: 3_600_000,
        probe_interval_ms: 3_600_000,
    })
}

pub fn options_with_health(health: HealthOptions) -> LinkOptions {
    LinkOptions::builder()
        .endpoints(Endpoints::from_base("ws://agents.test").unwrap())
        .reconnect(policy())
        .signaling_reconnect(policy())
        .health(health)
        .settle_delay(SETTLE)
        .send_timeout(SEND_TIMEOUT)
        .build()
}

pub struct Harness {
    pub manager: ConnectionManager,
    pub factory: MemoryTransportFactory,
    pub events: UnboundedReceiver<LinkEvent>,
    pub subscription: Subscription,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_options(quiet_options())
    }

    pub fn with_options(options: LinkOptions) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        let factory = MemoryTransportFactory::new();
        let manager = ConnectionManager::new(options, Arc::new(factory.clone())).unwrap();
        let (subscription, events) = manager.subscribe_channel();
        Self {
            manager,
            factory,
            events,
            subscription,
        }
    }

    /// Next transport the manager opens
    pub async fn next_connection(&self) -> MemoryConnection {
        self.factory.next_connection().await.unwrap()
    }

    /// Connect and complete the open
    pub async fn connect_open(&mut self, session: &str, agent: &str) -> MemoryConnection {
        self.manager.connect(session, agent).await.unwrap();
        let conn = self.next_connection().await;
        conn.open();
        self.wait_for_state(agent, ConnectionState::Connected).await;
        conn
    }

    /// Next event matching `pred`, skipping the rest
    pub async fn wait_for(&mut self, pred: impl Fn(&LinkEvent) -> bool) -> LinkEvent {
        loop {
            let event = self.events.recv().await.unwrap();
            if pred(&event) {
                return event;
            }
        }
    }

    /// Next status change of `agent`
    pub async fn next_status(&mut self, agent: &str) -> AgentStatus {
        let agent = AgentId::new(agent);
        match self
            .wait_for(|event| {
                matches!(event, LinkEvent::StatusChange { agent_id, .. } if *agent_id == agent)
            })
            .await
        {
            LinkEvent::StatusChange { status, .. } => status,
            _ => unreachable!(),
        }
    }

    /// Skip status changes of `agent` until it reaches `state`
    pub async fn wait_for_state(&mut self, agent: &str, state: ConnectionState) -> AgentStatus {
        loop {
            let status = self.next_status(agent).await;
            if status.connection_state == state {
                return status;
            }
        }
    }

    /// Every event already delivered
    pub fn drain(&mut self) -> Vec<LinkEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

/// Let every ready task run
///
/// With paused time the clock only moves once the runtime is idle, so this
/// returns after all pending work has been processed.
pub async fn settle_tasks() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}
