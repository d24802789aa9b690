//! Pending-instance tracker.
//!
//! Remembers instances that were launched but not yet registered with the
//! CI server. It keeps a second request for the same job from launching a
//! duplicate and reaps launches that never get claimed.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::domain::models::{
    environments_match, AgentMatchResult, CiAgent, CreateRequest, Instance, InstanceId,
};
use crate::domain::ports::CloudProvider;

/// Something that can dispose of instances on behalf of the tracker.
#[async_trait]
pub trait InstanceReaper: Send + Sync {
    /// Delete the instance at the provider and drop local bookkeeping.
    async fn terminate(&self, id: &InstanceId) -> bool;

    /// Drop local bookkeeping only; the instance is already gone.
    fn forget(&self, id: &InstanceId);
}

/// A launched instance waiting for CI registration.
#[derive(Debug, Clone)]
pub struct PendingAgent {
    pub instance: Instance,
    pub request: CreateRequest,
    pub added_at: DateTime<Utc>,
}

impl PendingAgent {
    /// Compare this launch with already-resolved profile ids.
    ///
    /// Ids must match exactly: a pending launch was never confirmed, so the
    /// previous-image grace does not apply.
    pub fn evaluate(
        &self,
        image_id: &str,
        flavor_id: &str,
        environment: &str,
        job_id: Option<&str>,
    ) -> AgentMatchResult {
        if !environments_match(&self.instance.environment, environment)
            || self.instance.image_id != image_id
            || self.instance.flavor_id != flavor_id
        {
            return AgentMatchResult::NONE;
        }

        let job_match = match (self.request.job_id.as_deref(), job_id) {
            (Some(own), Some(proposed)) => own == proposed,
            _ => false,
        };

        AgentMatchResult {
            job_match,
            profile_match: true,
        }
    }
}

/// What happened to pending entries during one refresh.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PendingRefreshReport {
    /// Registered with the CI server.
    pub graduated: Vec<InstanceId>,
    /// No longer known to the provider.
    pub missing: Vec<InstanceId>,
    /// Reported in an error state.
    pub errored: Vec<InstanceId>,
    /// Never registered within the timeout; terminated.
    pub timed_out: Vec<InstanceId>,
    /// Could not be checked this time; left pending.
    pub check_failures: Vec<InstanceId>,
    pub still_pending: usize,
}

pub struct PendingTracker {
    entries: DashMap<InstanceId, PendingAgent>,
    provider: Arc<dyn CloudProvider>,
    registration_timeout: Duration,
    delete_error_instances: bool,
}

impl PendingTracker {
    pub fn new(
        provider: Arc<dyn CloudProvider>,
        registration_timeout: Duration,
        delete_error_instances: bool,
    ) -> Self {
        Self {
            entries: DashMap::new(),
            provider,
            registration_timeout,
            delete_error_instances,
        }
    }

    /// Track a fresh launch. The first add for an id wins.
    pub fn add_pending(&self, instance: Instance, request: CreateRequest) -> bool {
        let id = instance.id().clone();
        let mut inserted = false;
        self.entries.entry(id.clone()).or_insert_with(|| {
            inserted = true;
            PendingAgent {
                instance,
                request,
                added_at: Utc::now(),
            }
        });
        if inserted {
            debug!(instance_id = %id, "instance pending registration");
        }
        inserted
    }

    /// Best match of any pending launch against the proposed profile.
    pub fn match_pending(
        &self,
        image_id: &str,
        flavor_id: &str,
        environment: &str,
        job_id: Option<&str>,
    ) -> AgentMatchResult {
        self.entries
            .iter()
            .map(|entry| entry.evaluate(image_id, flavor_id, environment, job_id))
            .fold(AgentMatchResult::NONE, AgentMatchResult::merge)
    }

    pub fn contains(&self, id: &InstanceId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn get(&self, id: &InstanceId) -> Option<PendingAgent> {
        self.entries.get(id).map(|entry| entry.clone())
    }

    pub fn remove(&self, id: &InstanceId) -> Option<PendingAgent> {
        self.entries.remove(id).map(|(_, agent)| agent)
    }

    pub fn pending_ids(&self) -> Vec<InstanceId> {
        self.entries.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Settle pending launches against the CI server and the provider.
    ///
    /// A failure while checking one entry is logged and leaves that entry
    /// pending; the pass continues with the rest.
    pub async fn refresh_all(
        &self,
        known_agents: &[CiAgent],
        reaper: &dyn InstanceReaper,
    ) -> PendingRefreshReport {
        let mut report = PendingRefreshReport::default();

        for agent in known_agents {
            if self.entries.remove(&agent.id).is_some() {
                info!(instance_id = %agent.id, "pending instance registered with CI server");
                report.graduated.push(agent.id.clone());
            }
        }

        let now = Utc::now();
        for id in self.pending_ids() {
            let Some(created_at) = self.entries.get(&id).map(|e| e.instance.created_at) else {
                continue;
            };

            let server = match self.provider.get_instance(&id).await {
                Ok(server) => server,
                Err(err) => {
                    warn!(instance_id = %id, error = %err, "failed to check pending instance");
                    report.check_failures.push(id);
                    continue;
                }
            };

            match server {
                None => {
                    info!(instance_id = %id, "pending instance disappeared from provider");
                    self.entries.remove(&id);
                    reaper.forget(&id);
                    report.missing.push(id);
                }
                Some(server) if server.status.is_error() => {
                    self.entries.remove(&id);
                    if self.delete_error_instances {
                        warn!(instance_id = %id, "pending instance in error state, terminating");
                        reaper.terminate(&id).await;
                    } else {
                        warn!(instance_id = %id, "pending instance in error state, leaving it in place");
                        reaper.forget(&id);
                    }
                    report.errored.push(id);
                }
                Some(_) if now - created_at > self.registration_timeout => {
                    warn!(
                        instance_id = %id,
                        timeout_minutes = self.registration_timeout.num_minutes(),
                        "instance did not register in time, terminating"
                    );
                    self.entries.remove(&id);
                    reaper.terminate(&id).await;
                    report.timed_out.push(id);
                }
                Some(_) => {}
            }
        }

        report.still_pending = self.entries.len();
        report
    }
}
