//! Container id to compute agent registry.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::agent::ComputeAgentHandle;
use crate::locator::Locator;

/// A registered compute agent.
#[derive(Clone)]
pub struct AgentRegistration {
    pub container_id: String,
    pub locator: Locator,
    pub agent: Arc<dyn ComputeAgentHandle>,
}

/// Concurrent map from container id to the agent serving that container.
///
/// The lock is held only while the map is read or written. Lookups hand out
/// a clone of the handle so downstream calls run without it.
#[derive(Default)]
pub struct AgentRegistry {
    agents: Mutex<HashMap<String, AgentRegistration>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `registration`, returning the entry it replaced.
    pub async fn insert(&self, registration: AgentRegistration) -> Option<AgentRegistration> {
        self.agents
            .lock()
            .await
            .insert(registration.container_id.clone(), registration)
    }

    pub async fn get(&self, container_id: &str) -> Option<Arc<dyn ComputeAgentHandle>> {
        self.agents
            .lock()
            .await
            .get(container_id)
            .map(|r| Arc::clone(&r.agent))
    }

    pub async fn locator(&self, container_id: &str) -> Option<Locator> {
        self.agents
            .lock()
            .await
            .get(container_id)
            .map(|r| r.locator.clone())
    }

    pub async fn len(&self) -> usize {
        self.agents.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.agents.lock().await.is_empty()
    }
}
