//! Instance registry.
//!
//! The per-cluster source of truth for instances this process launched or
//! adopted. It creates and terminates instances, sweeps orphans, detects
//! expired agents and drives the disable-then-delete cleanup against the
//! CI server.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use dashmap::DashMap;
use futures::future::join_all;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::profile::{
    METADATA_AUTH_KEY, METADATA_CLUSTER, METADATA_ENVIRONMENT, METADATA_JOB,
};
use crate::domain::models::{
    BootSpec, CiAgent, ClusterSettings, ConfigState, CreateRequest, Instance, InstanceId,
    JobAccounting, ProfileProperties,
};
use crate::domain::ports::{CiServer, CloudProvider, ProviderInstance};
use crate::services::health::{HealthCategory, HealthReporter};
use crate::services::matcher::AgentMatcher;
use crate::services::pending_tracker::{InstanceReaper, PendingRefreshReport, PendingTracker};
use crate::services::resolution_cache::ResolutionCache;
use crate::services::retry::RetryPolicy;
use crate::services::single_flight::SingleFlight;

/// Attempts at finding a server name nobody uses yet.
const MAX_NAME_ATTEMPTS: usize = 16;
const NAME_SUFFIX_LEN: usize = 8;

/// Result of asking the registry for an agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisionOutcome {
    /// A new instance was launched.
    Created(Instance),
    /// A launch for the same job is already in flight.
    AwaitPending,
    /// The profile already has as many instances as allowed.
    AtCapacity { limit: u32, current: usize },
}

/// Result of the one-shot startup refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum RefreshOutcome {
    Completed {
        adopted: Vec<InstanceId>,
        terminated: Vec<InstanceId>,
    },
    /// A previous refresh already succeeded.
    AlreadyRefreshed,
    /// Another refresh is running right now.
    Skipped,
}

/// What one cleanup pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    /// Agents disabled because their instance outlived its TTL.
    pub disabled: Vec<InstanceId>,
    /// Agents deleted from the CI server after their instance was terminated.
    pub deleted: Vec<InstanceId>,
    /// Instances whose provider-side delete failed.
    pub failed_terminations: Vec<InstanceId>,
}

/// An instance is an orphan when neither the CI server nor the pending
/// tracker accounts for it.
fn is_orphan(id: &InstanceId, known: &HashSet<&InstanceId>, pending: &HashSet<&InstanceId>) -> bool {
    !known.contains(id) && !pending.contains(id)
}

/// Lifetime for one agent: uniform in `[min, max]`, exactly `min` when
/// `max < min`.
fn random_ttl_minutes(min: u32, max: u32) -> u32 {
    if max <= min {
        min
    } else {
        rand::thread_rng().gen_range(min..=max)
    }
}

fn random_suffix() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(NAME_SUFFIX_LEN)
        .map(|c| char::from(c).to_ascii_lowercase())
        .collect()
}

pub struct InstanceRegistry {
    settings: Arc<ClusterSettings>,
    cluster_id: Uuid,
    provider: Arc<dyn CloudProvider>,
    instances: DashMap<InstanceId, Instance>,
    pending: PendingTracker,
    matcher: AgentMatcher,
    health: Arc<HealthReporter>,
    delete_policy: RetryPolicy,
    refreshed: AtomicBool,
    refresh_flight: SingleFlight,
}

impl InstanceRegistry {
    /// Build the registry bundle for one cluster: instance map, pending
    /// tracker, image and flavor caches and health reporter.
    pub fn new(
        settings: ClusterSettings,
        provider: Arc<dyn CloudProvider>,
        delete_policy: RetryPolicy,
    ) -> Self {
        let images = Arc::new(ResolutionCache::for_images(
            provider.clone(),
            settings.image_cache_ttl(),
        ));
        let flavors = Arc::new(ResolutionCache::for_flavors(provider.clone()));
        let pending = PendingTracker::new(
            provider.clone(),
            settings.pending_timeout(),
            settings.delete_error_instances,
        );

        Self {
            cluster_id: settings.uuid(),
            settings: Arc::new(settings),
            provider,
            instances: DashMap::new(),
            pending,
            matcher: AgentMatcher::new(images, flavors),
            health: Arc::new(HealthReporter::new()),
            delete_policy,
            refreshed: AtomicBool::new(false),
            refresh_flight: SingleFlight::new(),
        }
    }

    pub fn settings(&self) -> &ClusterSettings {
        &self.settings
    }

    pub const fn cluster_id(&self) -> Uuid {
        self.cluster_id
    }

    pub const fn pending(&self) -> &PendingTracker {
        &self.pending
    }

    pub const fn matcher(&self) -> &AgentMatcher {
        &self.matcher
    }

    pub fn health(&self) -> &Arc<HealthReporter> {
        &self.health
    }

    pub fn get(&self, id: &InstanceId) -> Option<Instance> {
        self.instances.get(id).map(|instance| instance.clone())
    }

    pub fn contains(&self, id: &InstanceId) -> bool {
        self.instances.contains_key(id)
    }

    /// Snapshot of every live instance.
    pub fn instances(&self) -> Vec<Instance> {
        self.instances.iter().map(|i| i.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn is_refreshed(&self) -> bool {
        self.refreshed.load(Ordering::Acquire)
    }

    /// Names of servers owned by this cluster start with this.
    fn name_prefix(&self) -> String {
        format!("{}-", self.settings.instance_prefix)
    }

    /// Resolve the image and flavor of `profile` to canonical ids.
    async fn resolve_profile(&self, profile: &ProfileProperties) -> DomainResult<(String, String)> {
        let image_id = self
            .matcher
            .images()
            .resolve(&profile.image)
            .await
            .inspect_err(|err| self.health.report(HealthCategory::ImageLookup, err.to_string()))?;
        self.health.clear(HealthCategory::ImageLookup);

        let flavor_id = self
            .matcher
            .flavors()
            .resolve(&profile.flavor)
            .await
            .inspect_err(|err| self.health.report(HealthCategory::FlavorLookup, err.to_string()))?;
        self.health.clear(HealthCategory::FlavorLookup);

        Ok((image_id, flavor_id))
    }

    async fn generate_unique_name(&self) -> DomainResult<String> {
        for _ in 0..MAX_NAME_ATTEMPTS {
            let candidate = format!("{}{}", self.name_prefix(), random_suffix());
            let taken = self
                .provider
                .list_instances(&candidate)
                .await?
                .iter()
                .any(|server| server.name == candidate);
            if !taken {
                return Ok(candidate);
            }
            debug!(name = %candidate, "server name taken, generating another");
        }
        Err(DomainError::Provision(format!(
            "no free server name after {MAX_NAME_ATTEMPTS} attempts"
        )))
    }

    fn boot_spec(
        &self,
        name: String,
        profile: &ProfileProperties,
        image_id: String,
        flavor_id: String,
        request: &CreateRequest,
    ) -> BootSpec {
        let mut metadata = BTreeMap::new();
        metadata.insert(METADATA_CLUSTER.to_string(), self.cluster_id.to_string());
        metadata.insert(
            METADATA_ENVIRONMENT.to_string(),
            request.environment.trim().to_string(),
        );
        metadata.insert(METADATA_AUTH_KEY.to_string(), request.auto_register_key.clone());
        if let Some(job) = &request.job_id {
            metadata.insert(METADATA_JOB.to_string(), job.clone());
        }

        BootSpec {
            name,
            image_id,
            flavor_id,
            network: profile.network.clone(),
            security_groups: profile.security_group.iter().cloned().collect(),
            keypair: profile.keypair.clone(),
            availability_zone: profile.availability_zone.clone(),
            user_data: profile.user_data.clone(),
            metadata,
        }
    }

    /// Launch a new instance for `request` and track it as pending.
    ///
    /// Nothing is registered when resolution or the boot call fails.
    pub async fn create(&self, request: &CreateRequest) -> DomainResult<Instance> {
        let profile = self.settings.effective_profile(request);
        let (image_id, flavor_id) = self.resolve_profile(&profile).await?;
        let name = self.generate_unique_name().await?;
        let spec = self.boot_spec(name, &profile, image_id.clone(), flavor_id.clone(), request);

        let server = self.provider.boot_instance(&spec).await.map_err(|err| {
            let err = DomainError::Provision(format!("boot of {} failed: {err}", spec.name));
            self.health.report(HealthCategory::Provisioning, err.to_string());
            err
        })?;
        self.health.clear(HealthCategory::Provisioning);

        let instance = self.instance_from_boot(&server, image_id, flavor_id, request);
        self.instances
            .insert(instance.id().clone(), instance.clone());
        self.pending.add_pending(instance.clone(), request.clone());

        info!(
            instance_id = %instance.id(),
            name = %instance.name,
            image_id = %instance.image_id,
            flavor_id = %instance.flavor_id,
            "instance launched"
        );
        Ok(instance)
    }

    /// Prefer the ids the provider reports for the new server.
    fn instance_from_boot(
        &self,
        server: &ProviderInstance,
        image_id: String,
        flavor_id: String,
        request: &CreateRequest,
    ) -> Instance {
        let image_id = if server.image_id.is_empty() {
            image_id
        } else {
            server.image_id.clone()
        };
        let flavor_id = if server.flavor_id.is_empty() {
            flavor_id
        } else {
            server.flavor_id.clone()
        };
        Instance::new(
            server.id.clone(),
            server.name.clone(),
            request.environment.trim(),
            image_id,
            flavor_id,
            self.settings.max_jobs_per_instance,
        )
    }

    /// Delete an instance at the provider.
    ///
    /// Local bookkeeping is dropped first and regardless of the outcome. A
    /// failed delete is retried after re-fetching the server; a server that
    /// is gone by then counts as terminated.
    pub async fn terminate(&self, id: &InstanceId) -> bool {
        let known = self.instances.remove(id).is_some();
        self.pending.remove(id);
        if !known {
            warn!(instance_id = %id, "terminating instance unknown to the registry");
        }

        let result = self
            .delete_policy
            .execute(|attempt| async move {
                if attempt > 0 {
                    match self.provider.get_instance(id).await {
                        Ok(None) => return Ok(()),
                        Ok(Some(server)) => {
                            debug!(instance_id = %id, status = ?server.status, "retrying delete");
                        }
                        Err(err) => {
                            debug!(instance_id = %id, error = %err, "status check failed, retrying delete");
                        }
                    }
                }
                self.provider.delete_instance(id).await
            })
            .await;

        match result {
            Ok(()) => {
                info!(instance_id = %id, "instance terminated");
                true
            }
            Err(err) => {
                warn!(instance_id = %id, error = %err, "failed to terminate instance");
                false
            }
        }
    }

    /// One-shot startup reconciliation.
    ///
    /// Adopts provider instances that the CI server knows as agents and
    /// terminates every other instance carrying this cluster's prefix. Runs
    /// at most once successfully per process; an overlapping call is
    /// skipped.
    pub async fn refresh_all(&self, known_agents: &[CiAgent]) -> DomainResult<RefreshOutcome> {
        if self.is_refreshed() {
            return Ok(RefreshOutcome::AlreadyRefreshed);
        }
        let Some(_flight) = self.refresh_flight.try_begin() else {
            debug!(cluster = %self.cluster_id, "refresh already running, skipping");
            return Ok(RefreshOutcome::Skipped);
        };
        if self.is_refreshed() {
            return Ok(RefreshOutcome::AlreadyRefreshed);
        }

        let servers = self.provider.list_instances(&self.name_prefix()).await?;
        let known: HashSet<&InstanceId> = known_agents.iter().map(|agent| &agent.id).collect();
        let pending_ids = self.pending.pending_ids();
        let pending: HashSet<&InstanceId> = pending_ids.iter().collect();

        let mut adopted = Vec::new();
        let mut terminated = Vec::new();
        for server in &servers {
            if known.contains(&server.id) {
                self.instances.entry(server.id.clone()).or_insert_with(|| {
                    Instance::from_provider(server, self.settings.max_jobs_per_instance)
                });
                adopted.push(server.id.clone());
            } else if is_orphan(&server.id, &known, &pending) && self.terminate(&server.id).await {
                terminated.push(server.id.clone());
            }
        }

        self.refreshed.store(true, Ordering::Release);
        info!(
            cluster = %self.cluster_id,
            adopted = adopted.len(),
            terminated = terminated.len(),
            "startup refresh complete"
        );
        Ok(RefreshOutcome::Completed {
            adopted,
            terminated,
        })
    }

    /// Steady-state orphan sweep: terminate every prefixed instance that is
    /// neither a known agent nor a pending launch.
    ///
    /// Instances in an error state are left alone unless the cluster deletes
    /// error instances.
    pub async fn terminate_unregistered_instances(
        &self,
        known_agents: &[CiAgent],
        pending_ids: &[InstanceId],
    ) -> DomainResult<Vec<InstanceId>> {
        let servers = self.provider.list_instances(&self.name_prefix()).await?;
        let known: HashSet<&InstanceId> = known_agents.iter().map(|agent| &agent.id).collect();
        let pending: HashSet<&InstanceId> = pending_ids.iter().collect();

        let mut terminated = Vec::new();
        for server in servers {
            // Launches that became pending after the snapshot are not orphans.
            if !is_orphan(&server.id, &known, &pending) || self.pending.contains(&server.id) {
                continue;
            }
            if server.status.is_error() && !self.settings.delete_error_instances {
                debug!(instance_id = %server.id, "keeping errored orphan");
                continue;
            }
            info!(instance_id = %server.id, name = %server.name, "terminating unregistered instance");
            if self.terminate(&server.id).await {
                terminated.push(server.id);
            }
        }
        Ok(terminated)
    }

    /// Known agents whose instance outlived its randomized TTL.
    pub fn fetch_expired_agents(&self, known_agents: &[CiAgent]) -> Vec<CiAgent> {
        let min = self.settings.agent_ttl_min_minutes;
        let max = self.settings.agent_ttl_max_minutes;
        if min == 0 && max == 0 {
            return Vec::new();
        }

        let now = Utc::now();
        known_agents
            .iter()
            .filter(|agent| {
                let Some(created_at) = self.instances.get(&agent.id).map(|i| i.created_at) else {
                    return false;
                };
                let ttl = Duration::minutes(i64::from(random_ttl_minutes(min, max)));
                created_at + ttl < now
            })
            .cloned()
            .collect()
    }

    /// Disable expired agents, then terminate and delete agents that are
    /// ready to go.
    pub async fn perform_cleanup(&self, ci_server: &dyn CiServer) -> DomainResult<CleanupReport> {
        let mut report = CleanupReport::default();

        let agents = ci_server.list_agents().await?;
        report.disabled = self
            .fetch_expired_agents(&agents)
            .into_iter()
            .filter(|agent| agent.config_state == ConfigState::Enabled)
            .map(|agent| agent.id)
            .collect();
        if !report.disabled.is_empty() {
            info!(count = report.disabled.len(), "disabling expired agents");
            ci_server.disable_agents(&report.disabled).await?;
        }

        let agents = ci_server.list_agents().await?;
        let mut retire: Vec<InstanceId> = agents
            .iter()
            .filter(|agent| self.contains(&agent.id) && agent.is_retirable())
            .map(|agent| agent.id.clone())
            .collect();
        retire.extend(self.vanished_agents(&agents).await);

        if retire.is_empty() {
            return Ok(report);
        }

        let outcomes = join_all(retire.iter().map(|id| self.terminate(id))).await;
        for (id, terminated) in retire.iter().zip(outcomes) {
            if !terminated {
                report.failed_terminations.push(id.clone());
            }
        }

        ci_server.delete_agents(&retire).await?;
        info!(count = retire.len(), "deleted retired agents");
        report.deleted = retire;
        Ok(report)
    }

    /// Enabled agents that lost their instance: the registry still tracks
    /// them but the provider no longer does.
    async fn vanished_agents(&self, agents: &[CiAgent]) -> Vec<InstanceId> {
        let candidates: Vec<&CiAgent> = agents
            .iter()
            .filter(|agent| {
                agent.config_state == ConfigState::Enabled
                    && agent.agent_state.is_gone()
                    && self.contains(&agent.id)
            })
            .collect();

        let mut vanished = Vec::new();
        for agent in candidates {
            match self.provider.get_instance(&agent.id).await {
                Ok(None) => vanished.push(agent.id.clone()),
                Ok(Some(_)) => {}
                Err(err) => {
                    warn!(instance_id = %agent.id, error = %err, "failed to check lost agent");
                }
            }
        }
        vanished
    }

    /// Settle pending launches; see [`PendingTracker::refresh_all`].
    pub async fn refresh_pending(&self, known_agents: &[CiAgent]) -> PendingRefreshReport {
        self.pending.refresh_all(known_agents, self).await
    }

    /// Count one finished job on `id`, terminating the instance once it
    /// reaches its job limit.
    pub async fn job_completed(&self, id: &InstanceId) -> Option<JobAccounting> {
        let (before, state) = self.instances.get_mut(id).map(|mut instance| {
            let before = instance.job_accounting();
            (before, instance.record_job_completed())
        })?;

        // Only the completion that crosses the limit terminates.
        if before == JobAccounting::Active && state == JobAccounting::ExceededLimit {
            info!(instance_id = %id, "instance reached its job limit, terminating");
            self.terminate(id).await;
        }
        Some(state)
    }

    /// Live instances that could serve `request`.
    pub async fn count_matching(&self, request: &CreateRequest) -> usize {
        let profile = self.settings.effective_profile(request);
        let mut count = 0;
        for instance in self.instances() {
            if self
                .matcher
                .matches(
                    &instance,
                    &profile,
                    &request.environment,
                    self.settings.use_previous_image,
                )
                .await
            {
                count += 1;
            }
        }
        count
    }

    /// Whether another instance for `request` fits under the max limit.
    pub async fn can_start_new_instance(&self, request: &CreateRequest) -> bool {
        let limit = self.settings.max_instances_for(request);
        limit == 0 || self.count_matching(request).await < limit as usize
    }

    /// Whether work described by `request` may run on instance `id`.
    pub async fn can_run_on(&self, id: &InstanceId, request: &CreateRequest) -> bool {
        let Some(instance) = self.get(id) else {
            return false;
        };
        if instance.job_accounting() == JobAccounting::ExceededLimit {
            return false;
        }
        let profile = self.settings.effective_profile(request);
        self.matcher
            .matches(
                &instance,
                &profile,
                &request.environment,
                self.settings.use_previous_image,
            )
            .await
    }

    /// Entry point for create-agent requests.
    ///
    /// Launches while the profile is below the request's minimum. Otherwise
    /// waits for an in-flight launch of the same job, refuses when the
    /// profile is at capacity, and launches if neither applies.
    pub async fn provision(&self, request: &CreateRequest) -> DomainResult<ProvisionOutcome> {
        let profile = self.settings.effective_profile(request);
        let (image_id, flavor_id) = self.resolve_profile(&profile).await?;

        let current = self.count_matching(request).await;
        let min = self.settings.min_instances_for(request) as usize;
        if current < min {
            debug!(min, current, "profile below its minimum");
            return self.create(request).await.map(ProvisionOutcome::Created);
        }

        let pending = self.pending.match_pending(
            &image_id,
            &flavor_id,
            &request.environment,
            request.job_id.as_deref(),
        );
        if pending.job_match {
            debug!(job = ?request.job_id, "launch for this job already pending");
            return Ok(ProvisionOutcome::AwaitPending);
        }

        let limit = self.settings.max_instances_for(request);
        if limit > 0 && current >= limit as usize {
            debug!(limit, current, "profile at capacity");
            return Ok(ProvisionOutcome::AtCapacity { limit, current });
        }

        self.create(request).await.map(ProvisionOutcome::Created)
    }

    /// Launch default-profile instances until the cluster minimum is met.
    ///
    /// Nothing is launched without a cluster registration key, since such
    /// agents could never register and would be reaped on timeout.
    pub async fn ensure_minimum(&self) -> DomainResult<Vec<Instance>> {
        if self.settings.min_instances == 0 {
            return Ok(Vec::new());
        }
        let Some(request) = self.settings.minimum_pool_request() else {
            debug!(
                min = self.settings.min_instances,
                "no registration key configured, minimum pool not topped up"
            );
            return Ok(Vec::new());
        };
        let min = self.settings.min_instances_for(&request) as usize;

        let live = self.count_matching(&request).await;
        let mut created = Vec::new();
        for _ in live..min {
            created.push(self.create(&request).await?);
        }
        if !created.is_empty() {
            info!(count = created.len(), min, "launched instances to meet the minimum");
        }
        Ok(created)
    }
}

#[async_trait]
impl InstanceReaper for InstanceRegistry {
    async fn terminate(&self, id: &InstanceId) -> bool {
        Self::terminate(self, id).await
    }

    fn forget(&self, id: &InstanceId) {
        self.instances.remove(id);
        self.pending.remove(id);
    }
}
