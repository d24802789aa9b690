//! Match engine: decides whether a live instance satisfies a proposed profile.

use std::sync::Arc;
use tracing::debug;

use crate::domain::models::{environments_match, Instance, ProfileProperties};
use crate::services::resolution_cache::ResolutionCache;

/// Compares instances against proposed profiles using the resolution caches.
///
/// Callers may pass either canonical ids or human names, so each field is
/// compared first as given, then after resolution. Images additionally
/// accept the id previously published under the same name when asked to.
#[derive(Clone)]
pub struct AgentMatcher {
    images: Arc<ResolutionCache>,
    flavors: Arc<ResolutionCache>,
}

impl AgentMatcher {
    pub const fn new(images: Arc<ResolutionCache>, flavors: Arc<ResolutionCache>) -> Self {
        Self { images, flavors }
    }

    pub fn images(&self) -> &Arc<ResolutionCache> {
        &self.images
    }

    pub fn flavors(&self) -> &Arc<ResolutionCache> {
        &self.flavors
    }

    /// Whether `instance` can serve work that asks for `profile` in `environment`.
    pub async fn matches(
        &self,
        instance: &Instance,
        profile: &ProfileProperties,
        environment: &str,
        allow_previous_image: bool,
    ) -> bool {
        if !environments_match(&instance.environment, environment) {
            return false;
        }

        if !self
            .image_matches(&instance.image_id, &profile.image, allow_previous_image)
            .await
        {
            debug!(instance_id = %instance.id(), image = %profile.image, "image mismatch");
            return false;
        }

        if !self.flavor_matches(&instance.flavor_id, &profile.flavor).await {
            debug!(instance_id = %instance.id(), flavor = %profile.flavor, "flavor mismatch");
            return false;
        }

        true
    }

    async fn image_matches(&self, actual_id: &str, proposed: &str, allow_previous: bool) -> bool {
        let proposed = proposed.trim();
        if actual_id == proposed {
            return true;
        }

        match self.images.resolve(proposed).await {
            Ok(resolved) if resolved == actual_id => return true,
            Ok(_) => {}
            Err(err) => debug!(image = proposed, error = %err, "image did not resolve"),
        }

        if !allow_previous {
            return false;
        }
        let previous = self.images.previous_id(proposed);
        !previous.is_empty() && previous == actual_id
    }

    async fn flavor_matches(&self, actual_id: &str, proposed: &str) -> bool {
        let proposed = proposed.trim();
        if actual_id == proposed {
            return true;
        }

        match self.flavors.resolve(proposed).await {
            Ok(resolved) => resolved == actual_id,
            Err(err) => {
                debug!(flavor = proposed, error = %err, "flavor did not resolve");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::InstanceId;
    use crate::infrastructure::memory::InMemoryCloudProvider;
    use chrono::Duration;

    fn setup() -> (Arc<InMemoryCloudProvider>, AgentMatcher) {
        let cloud = Arc::new(InMemoryCloudProvider::new());
        cloud.publish_image("img-1", "ubuntu");
        cloud.add_flavor("flv-1", "m1.small");
        cloud.add_flavor("flv-2", "m1.large");
        let matcher = AgentMatcher::new(
            Arc::new(ResolutionCache::for_images(cloud.clone(), Duration::zero())),
            Arc::new(ResolutionCache::for_flavors(cloud.clone())),
        );
        (cloud, matcher)
    }

    fn instance() -> Instance {
        Instance::new(InstanceId::from("i-1"), "ci-1", "prod", "img-1", "flv-1", 0)
    }

    #[tokio::test]
    async fn test_exact_fields_match_case_insensitive_environment() {
        let (_cloud, matcher) = setup();
        let profile = ProfileProperties::new("img-1", "flv-1");
        assert!(matcher.matches(&instance(), &profile, "PROD", false).await);
        assert!(!matcher.matches(&instance(), &profile, "staging", false).await);
    }

    #[tokio::test]
    async fn test_different_image_id_does_not_match() {
        let (cloud, matcher) = setup();
        cloud.add_image("img-2", "debian");
        let profile = ProfileProperties::new("img-2", "flv-1");
        assert!(!matcher.matches(&instance(), &profile, "prod", false).await);
    }

    #[tokio::test]
    async fn test_names_match_after_resolution() {
        let (_cloud, matcher) = setup();
        let profile = ProfileProperties::new("ubuntu", "m1.small");
        assert!(matcher.matches(&instance(), &profile, " prod ", false).await);

        let larger = ProfileProperties::new("ubuntu", "m1.large");
        assert!(!matcher.matches(&instance(), &larger, "prod", false).await);
    }

    #[tokio::test]
    async fn test_previous_image_only_when_allowed() {
        let (cloud, matcher) = setup();
        let profile = ProfileProperties::new("ubuntu", "flv-1");
        assert!(matcher.matches(&instance(), &profile, "prod", false).await);

        cloud.publish_image("img-2", "ubuntu");
        assert!(!matcher.matches(&instance(), &profile, "prod", false).await);
        assert!(matcher.matches(&instance(), &profile, "prod", true).await);
    }

    #[tokio::test]
    async fn test_previous_image_checked_when_name_no_longer_resolves() {
        let (cloud, matcher) = setup();
        let profile = ProfileProperties::new("ubuntu", "flv-1");
        assert!(matcher.matches(&instance(), &profile, "prod", true).await);
        cloud.publish_image("img-2", "ubuntu");
        assert!(matcher.matches(&instance(), &profile, "prod", true).await);

        cloud.remove_image("img-1");
        cloud.remove_image("img-2");
        assert!(matcher.matches(&instance(), &profile, "prod", true).await);
        assert!(!matcher.matches(&instance(), &profile, "prod", false).await);
    }

    #[tokio::test]
    async fn test_unresolvable_profile_is_a_mismatch() {
        let (_cloud, matcher) = setup();
        let profile = ProfileProperties::new("fedora", "flv-1");
        assert!(!matcher.matches(&instance(), &profile, "prod", true).await);
    }
}
