//! Domain errors for the stratus lifecycle engine.

use thiserror::Error;

use super::models::InstanceId;
use super::ports::{ProviderError, ServerCommunicationError};

/// Errors surfaced by the registry, caches and reconciler.
///
/// None of these are fatal: callers degrade to a skipped action plus a
/// health message.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Image not found: {0}")]
    ImageNotFound(String),

    #[error("Flavor not found: {0}")]
    FlavorNotFound(String),

    #[error("Instance not found: {0}")]
    InstanceNotFound(InstanceId),

    #[error("Provisioning failed: {0}")]
    Provision(String),

    #[error(transparent)]
    ServerCommunication(#[from] ServerCommunicationError),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

impl DomainError {
    /// Whether this error means something was absent rather than broken.
    pub const fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::ImageNotFound(_) | Self::FlavorNotFound(_) | Self::InstanceNotFound(_)
        )
    }
}

pub type DomainResult<T> = Result<T, DomainError>;

impl From<ProviderError> for DomainError {
    fn from(err: ProviderError) -> Self {
        Self::Provision(err.to_string())
    }
}
