//! Reconciliation pass and its periodic daemon.
//!
//! A pass brings one cluster's registry in line with what the CI server and
//! the cloud provider report:
//! 1. list CI agents
//! 2. one-shot startup refresh of the registry
//! 3. settle pending launches
//! 4. sweep orphaned instances
//! 5. disable and delete expired agents
//! 6. top up to the cluster minimum

use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify, RwLock};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{InstanceId, ReconcilerConfig};
use crate::domain::ports::CiServer;
use crate::services::health::HealthCategory;
use crate::services::instance_registry::{CleanupReport, InstanceRegistry, RefreshOutcome};
use crate::services::pending_tracker::PendingRefreshReport;
use crate::services::single_flight::SingleFlight;

/// What one reconciliation pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Agents the CI server reported at the start of the pass.
    pub known_agents: usize,
    /// Set on the pass that performed the startup refresh.
    pub startup_refresh: Option<RefreshOutcome>,
    pub pending: PendingRefreshReport,
    pub orphans_terminated: Vec<InstanceId>,
    pub cleanup: CleanupReport,
    pub launched: Vec<InstanceId>,
    /// Steps that failed; later steps still ran.
    pub errors: Vec<String>,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Outcome of asking for a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    Completed(ReconcileReport),
    /// Another pass was already running.
    Skipped,
}

/// Runs reconciliation passes for one cluster, one at a time.
pub struct Reconciler {
    registry: Arc<InstanceRegistry>,
    ci_server: Arc<dyn CiServer>,
    flight: SingleFlight,
}

impl Reconciler {
    pub fn new(registry: Arc<InstanceRegistry>, ci_server: Arc<dyn CiServer>) -> Self {
        Self {
            registry,
            ci_server,
            flight: SingleFlight::new(),
        }
    }

    pub fn registry(&self) -> &Arc<InstanceRegistry> {
        &self.registry
    }

    pub fn is_running(&self) -> bool {
        self.flight.is_running()
    }

    /// The host server checked in; reconcile now.
    pub async fn on_server_ping(&self) -> DomainResult<PassOutcome> {
        debug!(cluster = %self.registry.cluster_id(), "server ping received");
        self.run_once().await
    }

    /// Run one pass unless one is already in progress.
    ///
    /// Fails only when the CI server cannot list its agents; failures of
    /// later steps are recorded in the report and as health messages.
    pub async fn run_once(&self) -> DomainResult<PassOutcome> {
        let Some(_flight) = self.flight.try_begin() else {
            debug!(cluster = %self.registry.cluster_id(), "reconcile already running, skipping");
            return Ok(PassOutcome::Skipped);
        };

        let health = self.registry.health();
        let agents = match self.ci_server.list_agents().await {
            Ok(agents) => {
                health.clear(HealthCategory::CiServer);
                agents
            }
            Err(err) => {
                health.report(
                    HealthCategory::CiServer,
                    format!("listing agents failed: {err}"),
                );
                return Err(err.into());
            }
        };

        let mut report = ReconcileReport {
            known_agents: agents.len(),
            ..Default::default()
        };

        if !self.registry.is_refreshed() {
            match self.registry.refresh_all(&agents).await {
                Ok(outcome) => report.startup_refresh = Some(outcome),
                Err(err) => self.record(&mut report, HealthCategory::Cleanup, "startup refresh", &err),
            }
        }

        report.pending = self.registry.refresh_pending(&agents).await;

        let pending_ids = self.registry.pending().pending_ids();
        match self
            .registry
            .terminate_unregistered_instances(&agents, &pending_ids)
            .await
        {
            Ok(terminated) => report.orphans_terminated = terminated,
            Err(err) => self.record(&mut report, HealthCategory::Cleanup, "orphan sweep", &err),
        }

        match self.registry.perform_cleanup(self.ci_server.as_ref()).await {
            Ok(cleanup) => {
                health.clear(HealthCategory::Cleanup);
                report.cleanup = cleanup;
            }
            Err(err @ DomainError::ServerCommunication(_)) => {
                self.record(&mut report, HealthCategory::CiServer, "cleanup", &err);
            }
            Err(err) => self.record(&mut report, HealthCategory::Cleanup, "cleanup", &err),
        }

        match self.registry.ensure_minimum().await {
            Ok(created) => {
                report.launched = created.iter().map(|i| i.id().clone()).collect();
            }
            // The registry already reported the lookup or boot failure.
            Err(err) => report.errors.push(format!("minimum instances: {err}")),
        }

        info!(
            cluster = %self.registry.cluster_id(),
            known_agents = report.known_agents,
            graduated = report.pending.graduated.len(),
            orphans = report.orphans_terminated.len(),
            deleted = report.cleanup.deleted.len(),
            launched = report.launched.len(),
            errors = report.errors.len(),
            "reconcile pass complete"
        );
        Ok(PassOutcome::Completed(report))
    }

    fn record(
        &self,
        report: &mut ReconcileReport,
        category: HealthCategory,
        step: &str,
        err: &DomainError,
    ) {
        let message = format!("{step}: {err}");
        self.registry.health().report(category, message.clone());
        report.errors.push(message);
    }
}

/// Event emitted by the reconciler daemon.
#[derive(Debug, Clone)]
pub enum ReconcilerEvent {
    Started,
    PassCompleted {
        run_number: u64,
        report: ReconcileReport,
        duration_ms: u64,
    },
    /// A pass triggered elsewhere was still running.
    PassSkipped { run_number: u64 },
    PassFailed { run_number: u64, error: String },
    Stopped { reason: StopReason },
}

/// Reason the daemon stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Requested,
    TooManyFailures,
}

/// Snapshot of the daemon's progress.
#[derive(Debug, Clone, Default)]
pub struct DaemonStatus {
    pub running: bool,
    pub total_runs: u64,
    pub successful_runs: u64,
    pub failed_runs: u64,
    pub skipped_runs: u64,
    pub consecutive_failures: u32,
    pub last_run: Option<Instant>,
}

/// Handle to control a running daemon.
#[derive(Clone)]
pub struct DaemonHandle {
    stop_flag: Arc<AtomicBool>,
    wake: Arc<Notify>,
    status: Arc<RwLock<DaemonStatus>>,
}

impl DaemonHandle {
    /// Ask the daemon to stop after the current pass.
    pub fn stop(&self) {
        self.stop_flag.store(true, Ordering::Release);
        self.wake.notify_one();
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop_flag.load(Ordering::Acquire)
    }

    pub async fn status(&self) -> DaemonStatus {
        self.status.read().await.clone()
    }
}

/// Runs reconciliation passes on a fixed interval.
pub struct ReconcilerDaemon {
    reconciler: Arc<Reconciler>,
    config: ReconcilerConfig,
    status: Arc<RwLock<DaemonStatus>>,
    stop_flag: Arc<AtomicBool>,
    wake: Arc<Notify>,
}

impl ReconcilerDaemon {
    pub fn new(reconciler: Arc<Reconciler>, config: ReconcilerConfig) -> Self {
        Self {
            reconciler,
            config,
            status: Arc::new(RwLock::new(DaemonStatus::default())),
            stop_flag: Arc::new(AtomicBool::new(false)),
            wake: Arc::new(Notify::new()),
        }
    }

    pub fn handle(&self) -> DaemonHandle {
        DaemonHandle {
            stop_flag: self.stop_flag.clone(),
            wake: self.wake.clone(),
            status: self.status.clone(),
        }
    }

    pub const fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// Spawn the daemon loop, returning a channel of its events.
    pub fn spawn(self) -> mpsc::Receiver<ReconcilerEvent> {
        let (tx, rx) = mpsc::channel(100);
        tokio::spawn(async move {
            self.run_loop(tx).await;
        });
        rx
    }

    async fn run_loop(self, tx: mpsc::Sender<ReconcilerEvent>) {
        self.status.write().await.running = true;
        let _ = tx.send(ReconcilerEvent::Started).await;

        let period = Duration::from_secs(self.config.interval_secs.max(1));
        let mut timer = interval(period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        if !self.config.run_on_startup {
            // The first tick of an interval completes immediately.
            timer.tick().await;
        }

        let reason = loop {
            tokio::select! {
                _ = timer.tick() => {}
                () = self.wake.notified() => {}
            }
            if self.stop_flag.load(Ordering::Acquire) {
                break StopReason::Requested;
            }

            let consecutive_failures = self.run_pass(&tx).await;
            if consecutive_failures >= self.config.max_consecutive_failures {
                warn!(
                    failures = consecutive_failures,
                    "too many failed reconcile passes, stopping daemon"
                );
                break StopReason::TooManyFailures;
            }
        };

        self.status.write().await.running = false;
        let _ = tx.send(ReconcilerEvent::Stopped { reason }).await;
    }

    /// Run one pass and return the number of consecutive failures so far.
    async fn run_pass(&self, tx: &mpsc::Sender<ReconcilerEvent>) -> u32 {
        let run_number = {
            let mut status = self.status.write().await;
            status.total_runs += 1;
            status.total_runs
        };

        let start = Instant::now();
        let result = self.reconciler.run_once().await;
        let duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

        let mut status = self.status.write().await;
        status.last_run = Some(Instant::now());
        let event = match result {
            Ok(PassOutcome::Completed(report)) if report.is_clean() => {
                status.successful_runs += 1;
                status.consecutive_failures = 0;
                ReconcilerEvent::PassCompleted {
                    run_number,
                    report,
                    duration_ms,
                }
            }
            Ok(PassOutcome::Completed(report)) => {
                status.failed_runs += 1;
                status.consecutive_failures += 1;
                ReconcilerEvent::PassFailed {
                    run_number,
                    error: report.errors.join("; "),
                }
            }
            Ok(PassOutcome::Skipped) => {
                status.skipped_runs += 1;
                ReconcilerEvent::PassSkipped { run_number }
            }
            Err(err) => {
                status.failed_runs += 1;
                status.consecutive_failures += 1;
                ReconcilerEvent::PassFailed {
                    run_number,
                    error: err.to_string(),
                }
            }
        };
        let consecutive_failures = status.consecutive_failures;
        drop(status);

        let _ = tx.send(event).await;
        consecutive_failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{AgentState, ClusterSettings, CreateRequest, ProfileProperties};
    use crate::domain::ports::{ProviderInstance, ProviderStatus, ServerCommunicationError};
    use crate::infrastructure::memory::{InMemoryCiServer, InMemoryCloudProvider};
    use crate::services::retry::RetryPolicy;
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn setup() -> (Arc<InMemoryCloudProvider>, Arc<InMemoryCiServer>, Reconciler) {
        let cloud = Arc::new(InMemoryCloudProvider::new());
        cloud.publish_image("img-1", "ubuntu");
        cloud.add_flavor("flv-1", "m1.small");
        let ci = Arc::new(InMemoryCiServer::new());
        let settings = ClusterSettings {
            endpoint_url: "https://cloud.example".into(),
            instance_prefix: "ci".into(),
            defaults: ProfileProperties::new("ubuntu", "m1.small"),
            ..Default::default()
        };
        let registry = Arc::new(InstanceRegistry::new(
            settings,
            cloud.clone(),
            RetryPolicy::new(0, Duration::ZERO),
        ));
        let reconciler = Reconciler::new(registry, ci.clone());
        (cloud, ci, reconciler)
    }

    fn server(id: &str, name: &str) -> ProviderInstance {
        ProviderInstance {
            id: InstanceId::from(id),
            name: name.to_string(),
            status: ProviderStatus::Active,
            image_id: "img-1".into(),
            flavor_id: "flv-1".into(),
            created_at: Utc::now(),
            metadata: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn test_first_pass_adopts_known_and_kills_unknown() {
        let (cloud, ci, reconciler) = setup();
        cloud.insert_server(server("a", "ci-a"));
        cloud.insert_server(server("b", "ci-b"));
        cloud.insert_server(server("other", "someone-else"));
        ci.register(&InstanceId::from("a"), AgentState::Idle);

        let PassOutcome::Completed(report) = reconciler.run_once().await.unwrap() else {
            panic!("pass was skipped");
        };

        assert!(matches!(report.startup_refresh, Some(RefreshOutcome::Completed { .. })));
        assert!(reconciler.registry().contains(&InstanceId::from("a")));
        assert!(cloud.has_server(&InstanceId::from("a")));
        assert!(!cloud.has_server(&InstanceId::from("b")));
        assert!(cloud.has_server(&InstanceId::from("other")));
        assert!(report.is_clean());
    }

    #[tokio::test]
    async fn test_second_pass_skips_startup_refresh() {
        let (_cloud, _ci, reconciler) = setup();
        reconciler.run_once().await.unwrap();
        let PassOutcome::Completed(report) = reconciler.run_once().await.unwrap() else {
            panic!("pass was skipped");
        };
        assert!(report.startup_refresh.is_none());
    }

    #[tokio::test]
    async fn test_ci_failure_aborts_pass_and_reports_health() {
        let (cloud, ci, reconciler) = setup();
        cloud.insert_server(server("b", "ci-b"));
        ci.fail_with(ServerCommunicationError::new(503, "maintenance"));

        let err = reconciler.run_once().await.unwrap_err();

        assert!(matches!(err, DomainError::ServerCommunication(_)));
        assert!(cloud.has_server(&InstanceId::from("b")));
        assert!(!reconciler.registry().is_refreshed());
        let health = reconciler.registry().health();
        assert!(health.get(HealthCategory::CiServer).unwrap().message.contains("503"));

        ci.recover();
        reconciler.on_server_ping().await.unwrap();
        assert!(health.get(HealthCategory::CiServer).is_none());
    }

    #[tokio::test]
    async fn test_pending_launch_survives_sweep() {
        let (cloud, _ci, reconciler) = setup();
        reconciler.run_once().await.unwrap();
        let launched = reconciler
            .registry()
            .create(&CreateRequest::default())
            .await
            .unwrap();

        let PassOutcome::Completed(report) = reconciler.run_once().await.unwrap() else {
            panic!("pass was skipped");
        };
        assert!(report.orphans_terminated.is_empty());
        assert!(cloud.has_server(launched.id()));
    }

    #[tokio::test]
    async fn test_overlapping_pass_is_skipped() {
        let (_cloud, _ci, reconciler) = setup();
        let _held = reconciler.flight.try_begin().unwrap();
        assert_eq!(reconciler.run_once().await.unwrap(), PassOutcome::Skipped);
    }

    #[tokio::test]
    async fn test_daemon_stops_on_request() {
        let (_cloud, _ci, reconciler) = setup();
        let daemon = ReconcilerDaemon::new(
            Arc::new(reconciler),
            ReconcilerConfig {
                interval_secs: 3600,
                run_on_startup: true,
                max_consecutive_failures: 3,
            },
        );
        let handle = daemon.handle();
        let mut events = daemon.spawn();

        assert!(matches!(events.recv().await, Some(ReconcilerEvent::Started)));
        assert!(matches!(
            events.recv().await,
            Some(ReconcilerEvent::PassCompleted { run_number: 1, .. })
        ));

        handle.stop();
        assert!(matches!(
            events.recv().await,
            Some(ReconcilerEvent::Stopped {
                reason: StopReason::Requested
            })
        ));
        let status = handle.status().await;
        assert!(!status.running);
        assert_eq!(status.successful_runs, 1);
    }

    #[tokio::test]
    async fn test_daemon_gives_up_after_consecutive_failures() {
        let (_cloud, ci, reconciler) = setup();
        ci.fail_with(ServerCommunicationError::new(500, "down"));
        let daemon = ReconcilerDaemon::new(
            Arc::new(reconciler),
            ReconcilerConfig {
                interval_secs: 1,
                run_on_startup: true,
                max_consecutive_failures: 2,
            },
        );
        let handle = daemon.handle();
        let mut events = daemon.spawn();

        let mut failures = 0;
        while let Some(event) = events.recv().await {
            match event {
                ReconcilerEvent::PassFailed { .. } => failures += 1,
                ReconcilerEvent::Stopped { reason } => {
                    assert_eq!(reason, StopReason::TooManyFailures);
                    break;
                }
                _ => {}
            }
        }
        assert_eq!(failures, 2);
        assert_eq!(handle.status().await.failed_runs, 2);
    }
}
