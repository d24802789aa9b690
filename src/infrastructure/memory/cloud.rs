//! In-memory cloud provider for tests and dry runs

use async_trait::async_trait;
use chrono::Utc;
use dashmap::{DashMap, DashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use crate::domain::models::{BootSpec, InstanceId};
use crate::domain::ports::{
    CloudProvider, NamedResource, ProviderError, ProviderInstance, ProviderStatus, ResourceKind,
};

/// Cloud provider that keeps servers, images and flavors in memory
///
/// Counts every call and can be told to fail specific operations, which
/// makes it suitable for exercising reconciliation edge cases.
#[derive(Default)]
pub struct InMemoryCloudProvider {
    servers: DashMap<InstanceId, ProviderInstance>,
    images: Mutex<Vec<NamedResource>>,
    flavors: Mutex<Vec<NamedResource>>,
    next_id: AtomicU64,

    fail_boot: AtomicBool,
    fail_list: AtomicBool,
    delete_failures: AtomicU32,
    failing_gets: DashSet<InstanceId>,

    boot_calls: AtomicUsize,
    delete_calls: AtomicUsize,
    list_calls: AtomicUsize,
    get_calls: AtomicUsize,
    resource_lookups: AtomicUsize,
}

impl InMemoryCloudProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_image(&self, id: &str, name: &str) {
        lock(&self.images).push(NamedResource::new(id, name));
    }

    /// Publish an image that is newer than every image added so far
    pub fn publish_image(&self, id: &str, name: &str) {
        let mut images = lock(&self.images);
        let stamp = Utc::now() + chrono::Duration::seconds(images.len() as i64);
        images.push(NamedResource {
            id: id.to_string(),
            name: name.to_string(),
            created_at: Some(stamp),
        });
    }

    pub fn remove_image(&self, id: &str) {
        lock(&self.images).retain(|image| image.id != id);
    }

    pub fn add_flavor(&self, id: &str, name: &str) {
        lock(&self.flavors).push(NamedResource::new(id, name));
    }

    /// Register a server that exists independently of this process
    pub fn insert_server(&self, server: ProviderInstance) {
        self.servers.insert(server.id.clone(), server);
    }

    pub fn set_status(&self, id: &InstanceId, status: ProviderStatus) {
        if let Some(mut server) = self.servers.get_mut(id) {
            server.status = status;
        }
    }

    /// Make a server vanish without a delete call
    pub fn remove_server(&self, id: &InstanceId) {
        self.servers.remove(id);
    }

    pub fn has_server(&self, id: &InstanceId) -> bool {
        self.servers.contains_key(id)
    }

    pub fn server_count(&self) -> usize {
        self.servers.len()
    }

    pub fn set_fail_boot(&self, fail: bool) {
        self.fail_boot.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_list(&self, fail: bool) {
        self.fail_list.store(fail, Ordering::SeqCst);
    }

    /// Fail the next `count` delete calls
    pub fn fail_next_deletes(&self, count: u32) {
        self.delete_failures.store(count, Ordering::SeqCst);
    }

    pub fn fail_get_for(&self, id: &InstanceId) {
        self.failing_gets.insert(id.clone());
    }

    pub fn boot_calls(&self) -> usize {
        self.boot_calls.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    /// Image and flavor lookups, by id or by listing
    pub fn resource_lookups(&self) -> usize {
        self.resource_lookups.load(Ordering::SeqCst)
    }

    fn resources(&self, kind: ResourceKind) -> Vec<NamedResource> {
        match kind {
            ResourceKind::Image => lock(&self.images).clone(),
            ResourceKind::Flavor => lock(&self.flavors).clone(),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait]
impl CloudProvider for InMemoryCloudProvider {
    async fn boot_instance(&self, spec: &BootSpec) -> Result<ProviderInstance, ProviderError> {
        self.boot_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_boot.load(Ordering::SeqCst) {
            return Err(ProviderError::Rejected {
                status: 413,
                message: "quota exceeded".to_string(),
            });
        }

        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let server = ProviderInstance {
            id: InstanceId::new(format!("srv-{n:04}")),
            name: spec.name.clone(),
            status: ProviderStatus::Build,
            image_id: spec.image_id.clone(),
            flavor_id: spec.flavor_id.clone(),
            created_at: Utc::now(),
            metadata: spec.metadata.clone(),
        };
        self.servers.insert(server.id.clone(), server.clone());
        Ok(server)
    }

    async fn get_instance(&self, id: &InstanceId) -> Result<Option<ProviderInstance>, ProviderError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_gets.contains(id) {
            return Err(ProviderError::Transport(format!("timeout fetching {id}")));
        }
        Ok(self.servers.get(id).map(|server| server.clone()))
    }

    async fn delete_instance(&self, id: &InstanceId) -> Result<(), ProviderError> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        let should_fail = self
            .delete_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(ProviderError::Transport(format!("delete of {id} timed out")));
        }
        match self.servers.remove(id) {
            Some(_) => Ok(()),
            None => Err(ProviderError::NotFound(id.to_string())),
        }
    }

    async fn list_instances(&self, name_prefix: &str) -> Result<Vec<ProviderInstance>, ProviderError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(ProviderError::Transport("list servers failed".to_string()));
        }
        let mut servers: Vec<ProviderInstance> = self
            .servers
            .iter()
            .filter(|server| server.name.starts_with(name_prefix))
            .map(|server| server.value().clone())
            .collect();
        servers.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(servers)
    }

    async fn get_resource(
        &self,
        kind: ResourceKind,
        id: &str,
    ) -> Result<Option<NamedResource>, ProviderError> {
        self.resource_lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self.resources(kind).into_iter().find(|r| r.id == id))
    }

    async fn list_resources(&self, kind: ResourceKind) -> Result<Vec<NamedResource>, ProviderError> {
        self.resource_lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self.resources(kind))
    }
}
