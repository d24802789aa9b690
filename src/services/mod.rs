//! Lifecycle services: caches, matching, the instance registry and the
//! reconciliation loop.

pub mod cluster_directory;
pub mod health;
pub mod instance_registry;
pub mod matcher;
pub mod pending_tracker;
pub mod reconciler;
pub mod resolution_cache;
pub mod retry;
pub mod single_flight;

pub use cluster_directory::ClusterDirectory;
pub use health::{HealthCategory, HealthMessage, HealthReporter};
pub use instance_registry::{CleanupReport, InstanceRegistry, ProvisionOutcome, RefreshOutcome};
pub use matcher::AgentMatcher;
pub use pending_tracker::{InstanceReaper, PendingAgent, PendingRefreshReport, PendingTracker};
pub use reconciler::{
    DaemonHandle, DaemonStatus, PassOutcome, ReconcileReport, Reconciler, ReconcilerDaemon,
    ReconcilerEvent, StopReason,
};
pub use resolution_cache::ResolutionCache;
pub use retry::RetryPolicy;
pub use single_flight::{FlightGuard, SingleFlight};
