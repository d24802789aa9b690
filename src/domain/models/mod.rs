//! Domain models for the stratus lifecycle engine.

pub mod agent;
pub mod cluster;
pub mod config;
pub mod instance;
pub mod profile;

pub use agent::{AgentState, CiAgent, ConfigState};
pub use cluster::{ClusterSettings, FLAVOR_CACHE_TTL_MINUTES};
pub use config::{Config, LoggingConfig, ReconcilerConfig, RetryConfig};
pub use instance::{Instance, InstanceId, JobAccounting};
pub use profile::{
    environments_match, AgentMatchResult, BootSpec, CreateRequest, ProfileProperties,
};
