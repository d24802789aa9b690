//! Common test utilities for integration tests
//!
//! Provides shared fixtures used across the integration test files.

#![allow(dead_code)]

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use stratus::domain::models::{ClusterSettings, InstanceId, ProfileProperties};
use stratus::domain::ports::{ProviderInstance, ProviderStatus};
use stratus::infrastructure::memory::{InMemoryCiServer, InMemoryCloudProvider};
use stratus::services::{InstanceRegistry, Reconciler, RetryPolicy};

pub const PREFIX: &str = "ci";

/// Cluster settings with a resolvable default profile and no limits that
/// interfere with a test unless it opts in.
pub fn cluster_settings() -> ClusterSettings {
    ClusterSettings {
        name: "test".to_string(),
        endpoint_url: "https://keystone.test:5000/v3".to_string(),
        instance_prefix: PREFIX.to_string(),
        defaults: ProfileProperties::new("ubuntu", "m1.small"),
        ..Default::default()
    }
}

/// A cloud with one image and two flavors.
pub fn seeded_cloud() -> Arc<InMemoryCloudProvider> {
    let cloud = Arc::new(InMemoryCloudProvider::new());
    cloud.publish_image("img-1", "ubuntu");
    cloud.add_flavor("flv-1", "m1.small");
    cloud.add_flavor("flv-2", "m1.large");
    cloud
}

/// A server that exists before the registry starts.
pub fn existing_server(id: &str, name: &str, created_at: DateTime<Utc>) -> ProviderInstance {
    ProviderInstance {
        id: InstanceId::from(id),
        name: name.to_string(),
        status: ProviderStatus::Active,
        image_id: "img-1".to_string(),
        flavor_id: "flv-1".to_string(),
        created_at,
        metadata: BTreeMap::new(),
    }
}

/// Registry and reconciler wired to in-memory adapters.
pub struct Harness {
    pub cloud: Arc<InMemoryCloudProvider>,
    pub ci: Arc<InMemoryCiServer>,
    pub registry: Arc<InstanceRegistry>,
    pub reconciler: Reconciler,
}

impl Harness {
    pub fn new(settings: ClusterSettings) -> Self {
        Self::with_cloud(settings, seeded_cloud())
    }

    pub fn with_cloud(settings: ClusterSettings, cloud: Arc<InMemoryCloudProvider>) -> Self {
        let ci = Arc::new(InMemoryCiServer::new());
        let registry = Arc::new(InstanceRegistry::new(
            settings,
            cloud.clone(),
            RetryPolicy::new(1, Duration::ZERO),
        ));
        let reconciler = Reconciler::new(registry.clone(), ci.clone());
        Self {
            cloud,
            ci,
            registry,
            reconciler,
        }
    }
}

/// Setup test logging
///
/// Initializes tracing subscriber for test output.
pub fn setup_test_logging() {
    use tracing_subscriber::fmt;

    let _ = fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}
