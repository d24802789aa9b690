//! Cloud instance domain model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::domain::ports::ProviderInstance;

/// Provider-assigned instance identifier. Also used as the CI agent id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(String);

impl InstanceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for InstanceId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for InstanceId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Job-completion state of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobAccounting {
    /// The instance may accept more work.
    Active,
    /// The instance completed its allowed number of jobs and must be retired.
    ExceededLimit,
}

/// One provisioned cloud instance acting as a build agent.
///
/// Equality and hashing consider only [`Instance::id`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
    id: InstanceId,
    /// Provider-side server name (prefix plus random suffix).
    pub name: String,
    pub created_at: DateTime<Utc>,
    /// Environment tag, may be empty.
    pub environment: String,
    /// Canonical image id at creation time.
    pub image_id: String,
    /// Canonical flavor id at creation time.
    pub flavor_id: String,
    pub jobs_completed: u32,
    /// Zero means unlimited.
    pub max_jobs_allowed: u32,
}

impl Instance {
    pub fn new(
        id: InstanceId,
        name: impl Into<String>,
        environment: impl Into<String>,
        image_id: impl Into<String>,
        flavor_id: impl Into<String>,
        max_jobs_allowed: u32,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            created_at: Utc::now(),
            environment: environment.into(),
            image_id: image_id.into(),
            flavor_id: flavor_id.into(),
            jobs_completed: 0,
            max_jobs_allowed,
        }
    }

    /// Rehydrate an instance from what the provider reports about it.
    ///
    /// The environment tag is read back from the boot metadata.
    pub fn from_provider(server: &ProviderInstance, max_jobs_allowed: u32) -> Self {
        Self {
            id: server.id.clone(),
            name: server.name.clone(),
            created_at: server.created_at,
            environment: server
                .metadata
                .get(super::profile::METADATA_ENVIRONMENT)
                .cloned()
                .unwrap_or_default(),
            image_id: server.image_id.clone(),
            flavor_id: server.flavor_id.clone(),
            jobs_completed: 0,
            max_jobs_allowed,
        }
    }

    #[must_use]
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    pub const fn id(&self) -> &InstanceId {
        &self.id
    }

    /// Record one finished job and report the resulting state.
    pub fn record_job_completed(&mut self) -> JobAccounting {
        self.jobs_completed = self.jobs_completed.saturating_add(1);
        self.job_accounting()
    }

    pub const fn job_accounting(&self) -> JobAccounting {
        if self.max_jobs_allowed > 0 && self.jobs_completed >= self.max_jobs_allowed {
            JobAccounting::ExceededLimit
        } else {
            JobAccounting::Active
        }
    }
}

impl PartialEq for Instance {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Instance {}

impl Hash for Instance {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn instance(id: &str, max_jobs: u32) -> Instance {
        Instance::new(InstanceId::from(id), "agent-1", "prod", "img-1", "flv-1", max_jobs)
    }

    #[test]
    fn test_equality_uses_id_only() {
        let a = instance("i-1", 0);
        let mut b = instance("i-1", 3);
        b.image_id = "img-2".to_string();
        b.jobs_completed = 7;
        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(!set.insert(b));
        assert!(set.insert(instance("i-2", 0)));
    }

    #[test]
    fn test_unlimited_instance_stays_active() {
        let mut inst = instance("i-1", 0);
        for _ in 0..1000 {
            assert_eq!(inst.record_job_completed(), JobAccounting::Active);
        }
        assert_eq!(inst.jobs_completed, 1000);
    }

    #[test]
    fn test_limited_instance_exceeds_at_max() {
        let mut inst = instance("i-1", 2);
        assert_eq!(inst.job_accounting(), JobAccounting::Active);
        assert_eq!(inst.record_job_completed(), JobAccounting::Active);
        assert_eq!(inst.record_job_completed(), JobAccounting::ExceededLimit);
        assert_eq!(inst.record_job_completed(), JobAccounting::ExceededLimit);
    }
}
