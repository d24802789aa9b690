use async_trait::async_trait;

use crate::domain::models::{CiAgent, InstanceId};

/// Non-2xx answer from the CI server
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("CI server responded with status {status}: {body}")]
pub struct ServerCommunicationError {
    pub status: u16,
    pub body: String,
}

impl ServerCommunicationError {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

/// Narrow contract over the CI server's agent registry
#[async_trait]
pub trait CiServer: Send + Sync {
    /// All agents currently registered with the server
    async fn list_agents(&self) -> Result<Vec<CiAgent>, ServerCommunicationError>;

    /// Stop scheduling work on the given agents
    async fn disable_agents(&self, ids: &[InstanceId]) -> Result<(), ServerCommunicationError>;

    /// Remove the given agents from the server
    async fn delete_agents(&self, ids: &[InstanceId]) -> Result<(), ServerCommunicationError>;
}
