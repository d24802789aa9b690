//! Per-cluster registry bundles keyed by settings identity.

use dashmap::DashMap;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::domain::models::ClusterSettings;
use crate::domain::ports::CloudProvider;
use crate::services::instance_registry::InstanceRegistry;
use crate::services::retry::RetryPolicy;

/// Owns one [`InstanceRegistry`] per distinct cluster configuration.
///
/// Bundles are created on first use and live as long as the directory.
/// Two equal [`ClusterSettings`] values share a bundle; any change to the
/// settings yields a new one.
pub struct ClusterDirectory {
    registries: DashMap<Uuid, Arc<InstanceRegistry>>,
    delete_policy: RetryPolicy,
}

impl ClusterDirectory {
    pub fn new(delete_policy: RetryPolicy) -> Self {
        Self {
            registries: DashMap::new(),
            delete_policy,
        }
    }

    /// The registry for `settings`, building it with a provider from
    /// `connect` if this is the first request for that configuration.
    pub fn get_or_init<F>(&self, settings: &ClusterSettings, connect: F) -> Arc<InstanceRegistry>
    where
        F: FnOnce(&ClusterSettings) -> Arc<dyn CloudProvider>,
    {
        let cluster_id = settings.uuid();
        self.registries
            .entry(cluster_id)
            .or_insert_with(|| {
                info!(cluster = %cluster_id, name = %settings.name, "creating cluster registry");
                Arc::new(InstanceRegistry::new(
                    settings.clone(),
                    connect(settings),
                    self.delete_policy.clone(),
                ))
            })
            .clone()
    }

    pub fn get(&self, cluster_id: &Uuid) -> Option<Arc<InstanceRegistry>> {
        self.registries.get(cluster_id).map(|r| r.clone())
    }

    pub fn cluster_ids(&self) -> Vec<Uuid> {
        self.registries.iter().map(|r| *r.key()).collect()
    }

    pub fn len(&self) -> usize {
        self.registries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registries.is_empty()
    }
}

impl Default for ClusterDirectory {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}
