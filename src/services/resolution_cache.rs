//! Name-or-id resolution cache for images and flavors.
//!
//! Translates whatever an operator typed (a canonical id or a human name)
//! into the provider's canonical id. Resolved names are remembered in a
//! per-name history so that agents built from an image that has since been
//! republished under the same name can still be recognised.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::FLAVOR_CACHE_TTL_MINUTES;
use crate::domain::ports::{CloudProvider, ProviderError, ResourceKind};

#[derive(Debug, Clone)]
struct CacheEntry {
    id: String,
    written_at: DateTime<Utc>,
}

/// TTL cache from name-or-id to canonical id, for one kind of resource.
pub struct ResolutionCache {
    kind: ResourceKind,
    ttl: Duration,
    provider: Arc<dyn CloudProvider>,
    entries: DashMap<String, CacheEntry>,
    /// Every id resolved for a name, oldest first. Never evicted.
    history: DashMap<String, Vec<String>>,
    lookups: AtomicU64,
}

impl ResolutionCache {
    pub fn new(kind: ResourceKind, provider: Arc<dyn CloudProvider>, ttl: Duration) -> Self {
        Self {
            kind,
            ttl,
            provider,
            entries: DashMap::new(),
            history: DashMap::new(),
            lookups: AtomicU64::new(0),
        }
    }

    /// Image cache with an operator-chosen lifetime.
    pub fn for_images(provider: Arc<dyn CloudProvider>, ttl: Duration) -> Self {
        Self::new(ResourceKind::Image, provider, ttl)
    }

    /// Flavor cache with the fixed one-day lifetime.
    pub fn for_flavors(provider: Arc<dyn CloudProvider>) -> Self {
        Self::new(
            ResourceKind::Flavor,
            provider,
            Duration::minutes(FLAVOR_CACHE_TTL_MINUTES),
        )
    }

    pub const fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Number of cache misses that went to the provider.
    pub fn lookups(&self) -> u64 {
        self.lookups.load(Ordering::Relaxed)
    }

    /// Resolve `name_or_id` to a canonical id.
    ///
    /// An exact id match wins over a name match. When several resources
    /// share the name, the most recently created one is used.
    pub async fn resolve(&self, name_or_id: &str) -> DomainResult<String> {
        let key = name_or_id.trim();
        if key.is_empty() {
            return Err(self.not_found(key));
        }

        if let Some(id) = self.cached(key) {
            return Ok(id);
        }

        self.lookups.fetch_add(1, Ordering::Relaxed);

        match self.provider.get_resource(self.kind, key).await {
            Ok(Some(resource)) => {
                debug!(kind = %self.kind, id = %resource.id, "resolved by exact id");
                self.store(key, &resource.id);
                return Ok(resource.id);
            }
            Ok(None) | Err(ProviderError::NotFound(_)) => {}
            Err(err) => return Err(err.into()),
        }

        let listed = self.provider.list_resources(self.kind).await?;
        let Some(resource) = listed
            .into_iter()
            .filter(|resource| resource.name == key)
            .max_by_key(|resource| resource.created_at)
        else {
            return Err(self.not_found(key));
        };

        self.remember(key, &resource.id);
        self.store(key, &resource.id);
        debug!(kind = %self.kind, name = key, id = %resource.id, "resolved by name");
        Ok(resource.id)
    }

    /// The id that was current for `name` before the latest one.
    ///
    /// Empty when fewer than two ids were ever seen for the name.
    pub fn previous_id(&self, name: &str) -> String {
        self.history
            .get(name.trim())
            .and_then(|ids| ids.len().checked_sub(2).map(|i| ids[i].clone()))
            .unwrap_or_default()
    }

    /// All ids resolved for `name`, oldest first.
    pub fn history(&self, name: &str) -> Vec<String> {
        self.history
            .get(name.trim())
            .map(|ids| ids.clone())
            .unwrap_or_default()
    }

    pub fn invalidate(&self, name_or_id: &str) {
        self.entries.remove(name_or_id.trim());
    }

    /// Forget every entry and the whole previous-id history.
    pub fn reset(&self) {
        self.entries.clear();
        self.history.clear();
        info!(kind = %self.kind, "resolution cache reset");
    }

    fn cached(&self, key: &str) -> Option<String> {
        let entry = self.entries.get(key).map(|entry| entry.clone())?;
        if Utc::now() - entry.written_at < self.ttl {
            return Some(entry.id);
        }
        self.entries.remove(key);
        None
    }

    fn store(&self, key: &str, id: &str) {
        self.entries.insert(
            key.to_string(),
            CacheEntry {
                id: id.to_string(),
                written_at: Utc::now(),
            },
        );
    }

    fn remember(&self, name: &str, id: &str) {
        let mut ids = self.history.entry(name.to_string()).or_default();
        if ids.last().map(String::as_str) != Some(id) {
            if !ids.is_empty() {
                info!(kind = %self.kind, name, id, "name now resolves to a new id");
            }
            ids.push(id.to_string());
        }
    }

    fn not_found(&self, key: &str) -> DomainError {
        match self.kind {
            ResourceKind::Image => DomainError::ImageNotFound(key.to_string()),
            ResourceKind::Flavor => DomainError::FlavorNotFound(key.to_string()),
        }
    }
}
