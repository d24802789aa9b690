//! Agent profiles, creation requests and match results.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Boot metadata key holding the agent environment tag.
pub const METADATA_ENVIRONMENT: &str = "stratus-environment";
/// Boot metadata key holding the key the agent registers with.
pub const METADATA_AUTH_KEY: &str = "stratus-auth-key";
/// Boot metadata key holding the owning cluster identity.
pub const METADATA_CLUSTER: &str = "stratus-cluster";
/// Boot metadata key holding the job that triggered the launch.
pub const METADATA_JOB: &str = "stratus-job";

/// The provider-facing properties of an agent.
///
/// `image` and `flavor` may hold either a canonical id or a human name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ProfileProperties {
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub flavor: String,
    #[serde(default)]
    pub network: Option<String>,
    #[serde(default)]
    pub security_group: Option<String>,
    #[serde(default)]
    pub keypair: Option<String>,
    #[serde(default)]
    pub availability_zone: Option<String>,
    #[serde(default)]
    pub user_data: Option<String>,
}

impl ProfileProperties {
    pub fn new(image: impl Into<String>, flavor: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            flavor: flavor.into(),
            ..Default::default()
        }
    }

    /// Fill every unset field from `defaults`.
    #[must_use]
    pub fn or_defaults(&self, defaults: &Self) -> Self {
        fn pick(own: &str, fallback: &str) -> String {
            if own.trim().is_empty() {
                fallback.to_string()
            } else {
                own.to_string()
            }
        }

        Self {
            image: pick(&self.image, &defaults.image),
            flavor: pick(&self.flavor, &defaults.flavor),
            network: self.network.clone().or_else(|| defaults.network.clone()),
            security_group: self
                .security_group
                .clone()
                .or_else(|| defaults.security_group.clone()),
            keypair: self.keypair.clone().or_else(|| defaults.keypair.clone()),
            availability_zone: self
                .availability_zone
                .clone()
                .or_else(|| defaults.availability_zone.clone()),
            user_data: self.user_data.clone().or_else(|| defaults.user_data.clone()),
        }
    }
}

/// A request to start (or reuse) an agent for some piece of work.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CreateRequest {
    /// Key the agent presents when it registers with the CI server.
    #[serde(default)]
    pub auto_register_key: String,
    /// Work item that asked for the agent, if any.
    #[serde(default)]
    pub job_id: Option<String>,
    #[serde(default)]
    pub environment: String,
    /// Overrides of the cluster's default profile.
    #[serde(default)]
    pub profile: ProfileProperties,
    #[serde(default)]
    pub min_instances: Option<u32>,
    #[serde(default)]
    pub max_instances: Option<u32>,
}

impl CreateRequest {
    pub fn new(profile: ProfileProperties, environment: impl Into<String>) -> Self {
        Self {
            profile,
            environment: environment.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_job(mut self, job_id: impl Into<String>) -> Self {
        self.job_id = Some(job_id.into());
        self
    }

    #[must_use]
    pub fn with_min_instances(mut self, min: u32) -> Self {
        self.min_instances = Some(min);
        self
    }

    #[must_use]
    pub fn with_register_key(mut self, key: impl Into<String>) -> Self {
        self.auto_register_key = key.into();
        self
    }

    #[must_use]
    pub fn with_max_instances(mut self, max: u32) -> Self {
        self.max_instances = Some(max);
        self
    }
}

/// Outcome of comparing a pending launch against a proposed profile.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentMatchResult {
    /// The same work item already triggered this launch.
    pub job_match: bool,
    /// The launch would satisfy the proposed profile.
    pub profile_match: bool,
}

impl AgentMatchResult {
    pub const NONE: Self = Self {
        job_match: false,
        profile_match: false,
    };

    /// Combine two results, keeping any positive signal.
    #[must_use]
    pub const fn merge(self, other: Self) -> Self {
        Self {
            job_match: self.job_match || other.job_match,
            profile_match: self.profile_match || other.profile_match,
        }
    }
}

/// Everything the provider needs to boot one instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootSpec {
    pub name: String,
    pub image_id: String,
    pub flavor_id: String,
    pub network: Option<String>,
    pub security_groups: Vec<String>,
    pub keypair: Option<String>,
    pub availability_zone: Option<String>,
    pub user_data: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

/// Environment tags compare trimmed and case-insensitively; empty equals empty.
pub fn environments_match(left: &str, right: &str) -> bool {
    let (left, right) = (left.trim(), right.trim());
    if left.is_ascii() && right.is_ascii() {
        return left.eq_ignore_ascii_case(right);
    }
    left.to_lowercase() == right.to_lowercase()
}
