//! Status store
//!
//! Last-known [`AgentStatus`] per agent. Readers (the UI layer) can take
//! snapshots at any time; only the managers' event loops write.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::types::identifiers::AgentId;
use crate::types::status::{AgentStatus, ConnectionState};

/// Shared, read-mostly map of agent statuses
#[derive(Debug, Clone, Default)]
pub struct StatusStore {
    inner: Arc<RwLock<HashMap<AgentId, AgentStatus>>>,
}

impl StatusStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Status of one agent; unknown agents are `Disconnected`
    #[must_use]
    pub fn get(&self, agent_id: &AgentId) -> AgentStatus {
        self.inner.read().get(agent_id).copied().unwrap_or_default()
    }

    /// Copy of every known status
    #[must_use]
    pub fn snapshot(&self) -> HashMap<AgentId, AgentStatus> {
        self.inner.read().clone()
    }

    /// Agents currently in the given state
    #[must_use]
    pub fn agents_in(&self, state: ConnectionState) -> Vec<AgentId> {
        let mut agents: Vec<AgentId> = self
            .inner
            .read()
            .iter()
            .filter(|(_, status)| status.connection_state == state)
            .map(|(agent_id, _)| agent_id.clone())
            .collect();
        agents.sort();
        agents
    }

    /// Replace a status, returning whether it changed
    pub(crate) fn set(&self, agent_id: &AgentId, status: AgentStatus) -> bool {
        let mut statuses = self.inner.write();
        match statuses.get_mut(agent_id) {
            Some(current) if *current == status => false,
            Some(current) => {
                *current = status;
                true
            }
            None => {
                statuses.insert(agent_id.clone(), status);
                true
            }
        }
    }
}
