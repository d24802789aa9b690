//! Per-endpoint cluster settings.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::profile::{CreateRequest, ProfileProperties};

/// Namespace for cluster identities derived from settings.
const CLUSTER_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_2d3e_8a4b_4c5d_9e6f_7a8b_9c0d_1e2f);

/// Flavor definitions rarely change, so their cache entries live for a day.
pub const FLAVOR_CACHE_TTL_MINUTES: i64 = 24 * 60;

/// Configuration bound to one cloud endpoint.
///
/// Immutable for the duration of a request cycle. [`ClusterSettings::uuid`]
/// identifies the configuration and keys the per-cluster registry.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ClusterSettings {
    /// Human readable label
    #[serde(default)]
    pub name: String,

    /// Identity endpoint of the cloud
    #[serde(default)]
    pub endpoint_url: String,

    #[serde(default)]
    pub region: Option<String>,

    #[serde(default)]
    pub project: String,

    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub password: String,

    /// Prefix of every server name this cluster launches
    #[serde(default = "default_instance_prefix")]
    pub instance_prefix: String,

    /// Profile used when a request leaves a field unset
    #[serde(default)]
    pub defaults: ProfileProperties,

    /// Key agents launched for the minimum pool register with.
    /// The pool is not topped up while this is empty.
    #[serde(default)]
    pub registration_key: String,

    /// Instances kept alive even without demand
    #[serde(default)]
    pub min_instances: u32,

    /// Upper bound of live instances per profile (0 = unlimited)
    #[serde(default = "default_max_instances")]
    pub max_instances: u32,

    /// Lower bound of an agent's lifetime in minutes (0 with max 0 = forever)
    #[serde(default)]
    pub agent_ttl_min_minutes: u32,

    /// Upper bound of an agent's lifetime in minutes
    #[serde(default)]
    pub agent_ttl_max_minutes: u32,

    /// How long a launched instance may take to register
    #[serde(default = "default_pending_timeout_minutes")]
    pub pending_timeout_minutes: u32,

    /// Lifetime of resolved image ids
    #[serde(default = "default_image_cache_ttl_minutes")]
    pub image_cache_ttl_minutes: u32,

    /// Accept agents built from the image previously published under a name
    #[serde(default)]
    pub use_previous_image: bool,

    /// Terminate launches the provider reports as errored
    #[serde(default)]
    pub delete_error_instances: bool,

    /// Jobs an instance may run before it is recycled (0 = unlimited)
    #[serde(default)]
    pub max_jobs_per_instance: u32,
}

fn default_instance_prefix() -> String {
    "stratus".to_string()
}

const fn default_max_instances() -> u32 {
    10
}

const fn default_pending_timeout_minutes() -> u32 {
    30
}

const fn default_image_cache_ttl_minutes() -> u32 {
    10
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            name: String::new(),
            endpoint_url: String::new(),
            region: None,
            project: String::new(),
            username: String::new(),
            password: String::new(),
            instance_prefix: default_instance_prefix(),
            defaults: ProfileProperties::default(),
            registration_key: String::new(),
            min_instances: 0,
            max_instances: default_max_instances(),
            agent_ttl_min_minutes: 0,
            agent_ttl_max_minutes: 0,
            pending_timeout_minutes: default_pending_timeout_minutes(),
            image_cache_ttl_minutes: default_image_cache_ttl_minutes(),
            use_previous_image: false,
            delete_error_instances: false,
            max_jobs_per_instance: 0,
        }
    }
}

impl fmt::Debug for ClusterSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterSettings")
            .field("name", &self.name)
            .field("endpoint_url", &self.endpoint_url)
            .field("region", &self.region)
            .field("project", &self.project)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("instance_prefix", &self.instance_prefix)
            .field("defaults", &self.defaults)
            .field("registration_key", &"<redacted>")
            .field("min_instances", &self.min_instances)
            .field("max_instances", &self.max_instances)
            .field("agent_ttl_min_minutes", &self.agent_ttl_min_minutes)
            .field("agent_ttl_max_minutes", &self.agent_ttl_max_minutes)
            .field("pending_timeout_minutes", &self.pending_timeout_minutes)
            .field("image_cache_ttl_minutes", &self.image_cache_ttl_minutes)
            .field("use_previous_image", &self.use_previous_image)
            .field("delete_error_instances", &self.delete_error_instances)
            .field("max_jobs_per_instance", &self.max_jobs_per_instance)
            .finish()
    }
}

impl ClusterSettings {
    /// Stable identity of this configuration.
    ///
    /// Derived from the serialized settings, so equal settings map to the
    /// same id across processes.
    pub fn uuid(&self) -> Uuid {
        // Serializing a plain struct of strings, numbers and bools cannot fail.
        let canonical = serde_json::to_vec(self).unwrap_or_default();
        Uuid::new_v5(&CLUSTER_NAMESPACE, &canonical)
    }

    /// The request's profile with unset fields taken from the cluster defaults.
    pub fn effective_profile(&self, request: &CreateRequest) -> ProfileProperties {
        request.profile.or_defaults(&self.defaults)
    }

    pub fn max_instances_for(&self, request: &CreateRequest) -> u32 {
        request.max_instances.unwrap_or(self.max_instances)
    }

    pub fn min_instances_for(&self, request: &CreateRequest) -> u32 {
        request.min_instances.unwrap_or(self.min_instances)
    }

    /// Request used to top up the minimum pool, if the cluster has a
    /// registration key for it.
    pub fn minimum_pool_request(&self) -> Option<CreateRequest> {
        if self.registration_key.trim().is_empty() {
            return None;
        }
        Some(CreateRequest {
            auto_register_key: self.registration_key.clone(),
            ..CreateRequest::default()
        })
    }

    pub fn image_cache_ttl(&self) -> Duration {
        Duration::minutes(i64::from(self.image_cache_ttl_minutes))
    }

    pub fn pending_timeout(&self) -> Duration {
        Duration::minutes(i64::from(self.pending_timeout_minutes))
    }
}
