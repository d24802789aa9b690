//! In-memory CI server for tests and dry runs

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use crate::domain::models::{AgentState, CiAgent, ConfigState, InstanceId};
use crate::domain::ports::{CiServer, ServerCommunicationError};

/// CI agent registry held in memory
#[derive(Default)]
pub struct InMemoryCiServer {
    agents: DashMap<InstanceId, CiAgent>,
    failure: Mutex<Option<ServerCommunicationError>>,
    disabled: Mutex<Vec<InstanceId>>,
    deleted: Mutex<Vec<InstanceId>>,
    list_calls: AtomicUsize,
}

impl InMemoryCiServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an enabled agent in the given state
    pub fn register(&self, id: &InstanceId, state: AgentState) {
        self.agents
            .insert(id.clone(), CiAgent::new(id.clone(), state, ConfigState::Enabled));
    }

    pub fn set_state(&self, id: &InstanceId, state: AgentState) {
        if let Some(mut agent) = self.agents.get_mut(id) {
            agent.agent_state = state;
        }
    }

    pub fn agent(&self, id: &InstanceId) -> Option<CiAgent> {
        self.agents.get(id).map(|agent| agent.clone())
    }

    /// Every call fails with `error` until [`InMemoryCiServer::recover`]
    pub fn fail_with(&self, error: ServerCommunicationError) {
        *lock(&self.failure) = Some(error);
    }

    pub fn recover(&self) {
        *lock(&self.failure) = None;
    }

    pub fn disabled_ids(&self) -> Vec<InstanceId> {
        lock(&self.disabled).clone()
    }

    pub fn deleted_ids(&self) -> Vec<InstanceId> {
        lock(&self.deleted).clone()
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), ServerCommunicationError> {
        match lock(&self.failure).as_ref() {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait]
impl CiServer for InMemoryCiServer {
    async fn list_agents(&self) -> Result<Vec<CiAgent>, ServerCommunicationError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        let mut agents: Vec<CiAgent> = self.agents.iter().map(|a| a.value().clone()).collect();
        agents.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(agents)
    }

    async fn disable_agents(&self, ids: &[InstanceId]) -> Result<(), ServerCommunicationError> {
        self.check()?;
        for id in ids {
            if let Some(mut agent) = self.agents.get_mut(id) {
                agent.config_state = ConfigState::Disabled;
            }
        }
        lock(&self.disabled).extend_from_slice(ids);
        Ok(())
    }

    async fn delete_agents(&self, ids: &[InstanceId]) -> Result<(), ServerCommunicationError> {
        self.check()?;
        for id in ids {
            self.agents.remove(id);
        }
        lock(&self.deleted).extend_from_slice(ids);
        Ok(())
    }
}
