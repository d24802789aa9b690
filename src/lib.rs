//! Stratus - ephemeral cloud build agent lifecycle
//!
//! Stratus launches cloud instances that act as CI build agents, keeps a
//! per-cluster registry of them, and periodically reconciles that registry
//! against the CI server and the cloud provider: adopting known agents,
//! terminating orphans, expiring agents after a randomized lifetime and
//! retiring agents that finished their allowed number of jobs.
//!
//! # Architecture
//!
//! - **Domain Layer** (`domain`): models, errors and the two port traits
//!   ([`CloudProvider`], [`CiServer`])
//! - **Service Layer** (`services`): resolution caches, matching, the
//!   instance registry and the reconciler
//! - **Infrastructure Layer** (`infrastructure`): configuration, logging and
//!   in-memory adapters
//! - **CLI Layer** (`cli`): command-line interface
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use stratus::{ClusterDirectory, Reconciler};
//!
//! let directory = ClusterDirectory::default();
//! let registry = directory.get_or_init(&settings, |s| connect(s));
//! let reconciler = Reconciler::new(registry, ci_server);
//! reconciler.on_server_ping().await?;
//! ```

pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

pub use domain::errors::{DomainError, DomainResult};
pub use domain::models::{
    AgentState, CiAgent, ClusterSettings, Config, ConfigState, CreateRequest, Instance,
    InstanceId, JobAccounting, ProfileProperties,
};
pub use domain::ports::{CiServer, CloudProvider};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{
    ClusterDirectory, InstanceRegistry, ProvisionOutcome, Reconciler, ReconcilerDaemon,
};
