use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::domain::models::{BootSpec, InstanceId};

/// Error type for cloud provider calls
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Not found: {0}")]
    NotFound(String),
}

/// Server status as reported by the provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderStatus {
    Build,
    Active,
    Shutoff,
    Error,
    Deleted,
    Other(String),
}

impl ProviderStatus {
    pub const fn is_error(&self) -> bool {
        matches!(self, Self::Error)
    }
}

/// A server as seen by the provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderInstance {
    pub id: InstanceId,
    pub name: String,
    pub status: ProviderStatus,
    pub image_id: String,
    pub flavor_id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// Kind of named provider resource that can be resolved to an id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Image,
    Flavor,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Image => f.write_str("image"),
            Self::Flavor => f.write_str("flavor"),
        }
    }
}

/// An image or flavor with its canonical id and human name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedResource {
    pub id: String,
    pub name: String,
    /// Publication time, used to pick the newest of several same-named images
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl NamedResource {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            created_at: None,
        }
    }
}

/// Narrow contract over a cloud compute API
///
/// Implementations wrap a concrete SDK. Calls may block for a long time;
/// callers never hold shared-state locks while one is in flight.
#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Boot a new server
    ///
    /// # Returns
    /// * `Ok(server)` - The server as created, with canonical image and flavor ids
    /// * `Err(ProviderError)` - The boot request failed
    async fn boot_instance(&self, spec: &BootSpec) -> Result<ProviderInstance, ProviderError>;

    /// Fetch one server by id
    ///
    /// # Returns
    /// * `Ok(Some(server))` if it exists
    /// * `Ok(None)` if the provider does not know the id
    async fn get_instance(&self, id: &InstanceId) -> Result<Option<ProviderInstance>, ProviderError>;

    /// Delete one server
    async fn delete_instance(&self, id: &InstanceId) -> Result<(), ProviderError>;

    /// List servers whose name starts with `name_prefix`
    async fn list_instances(&self, name_prefix: &str) -> Result<Vec<ProviderInstance>, ProviderError>;

    /// Look up an image or flavor by exact id
    ///
    /// # Returns
    /// * `Ok(Some(resource))` if the id exists
    /// * `Ok(None)` if it does not
    async fn get_resource(
        &self,
        kind: ResourceKind,
        id: &str,
    ) -> Result<Option<NamedResource>, ProviderError>;

    /// List every image or flavor visible to the project
    async fn list_resources(&self, kind: ResourceKind) -> Result<Vec<NamedResource>, ProviderError>;
}
