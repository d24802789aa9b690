//! Property tests for matching, image history, expiry and job accounting.

mod common;

use chrono::{Duration, Utc};
use common::{cluster_settings, existing_server, seeded_cloud, Harness};
use proptest::prelude::*;
use std::sync::Arc;
use stratus::domain::models::{
    environments_match, AgentState, Instance, InstanceId, JobAccounting, ProfileProperties,
};
use stratus::infrastructure::memory::InMemoryCloudProvider;
use stratus::services::{AgentMatcher, ResolutionCache};
use tokio::runtime::Runtime;

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn matcher(cloud: &Arc<InMemoryCloudProvider>) -> AgentMatcher {
    AgentMatcher::new(
        Arc::new(ResolutionCache::for_images(cloud.clone(), Duration::zero())),
        Arc::new(ResolutionCache::for_flavors(cloud.clone())),
    )
}

proptest! {
    /// Property: environment comparison ignores case and surrounding whitespace
    #[test]
    fn prop_environment_match_is_case_and_space_insensitive(
        env in "[a-zA-Z0-9-]{0,12}",
        pad in " {0,3}",
    ) {
        let padded = format!("{pad}{}{pad}", env.to_uppercase());
        prop_assert!(environments_match(&env, &padded));
        prop_assert!(environments_match(&padded, &env));
    }

    /// Property: an instance always matches the profile it was launched from
    #[test]
    fn prop_instance_matches_its_own_profile(
        env in "[a-z]{0,8}",
        by_name in any::<bool>(),
        allow_previous in any::<bool>(),
    ) {
        let cloud = seeded_cloud();
        let matcher = matcher(&cloud);
        let instance = Instance::new(InstanceId::from("i-1"), "ci-1", env.clone(), "img-1", "flv-1", 0);
        let profile = if by_name {
            ProfileProperties::new("ubuntu", "m1.small")
        } else {
            ProfileProperties::new("img-1", "flv-1")
        };

        let matched = runtime().block_on(matcher.matches(&instance, &profile, &env, allow_previous));
        prop_assert!(matched);
    }

    /// Property: after republishing a name n times, the previous id is the
    /// second-to-last one published
    #[test]
    fn prop_previous_id_is_second_to_last(count in 1usize..8) {
        let cloud = Arc::new(InMemoryCloudProvider::new());
        let cache = ResolutionCache::for_images(cloud.clone(), Duration::zero());
        let rt = runtime();

        for n in 0..count {
            cloud.publish_image(&format!("img-{n}"), "ubuntu");
            let resolved = rt.block_on(cache.resolve("ubuntu")).unwrap();
            prop_assert_eq!(resolved, format!("img-{n}"));
        }

        let expected = if count >= 2 { format!("img-{}", count - 2) } else { String::new() };
        prop_assert_eq!(cache.previous_id("ubuntu"), expected);
        prop_assert_eq!(cache.history("ubuntu").len(), count);
    }

    /// Property: agents older than the max TTL always expire, agents younger
    /// than the min TTL never do
    #[test]
    fn prop_expiry_respects_ttl_bounds(
        min in 1u32..120,
        spread in 0u32..120,
        swapped in any::<bool>(),
        age in 0u32..400,
    ) {
        let (lo, hi) = (min, min + spread);
        let mut settings = cluster_settings();
        // A max below the min collapses to the min.
        if swapped && spread > 0 {
            settings.agent_ttl_min_minutes = hi;
            settings.agent_ttl_max_minutes = lo;
        } else {
            settings.agent_ttl_min_minutes = lo;
            settings.agent_ttl_max_minutes = hi;
        }
        let (effective_lo, effective_hi) = if swapped && spread > 0 { (hi, hi) } else { (lo, hi) };

        let h = Harness::new(settings);
        let created = Utc::now() - Duration::minutes(i64::from(age)) - Duration::seconds(30);
        h.cloud.insert_server(existing_server("a", "ci-a", created));
        h.ci.register(&InstanceId::from("a"), AgentState::Idle);
        let agents = vec![h.ci.agent(&InstanceId::from("a")).unwrap()];
        runtime().block_on(h.registry.refresh_all(&agents)).unwrap();

        let expired = !h.registry.fetch_expired_agents(&agents).is_empty();
        if age >= effective_hi {
            prop_assert!(expired);
        }
        if age < effective_lo {
            prop_assert!(!expired);
        }
    }

    /// Property: an instance leaves Active exactly when it reaches its job limit
    #[test]
    fn prop_job_accounting_threshold(max_jobs in 0u32..10, completed in 0u32..20) {
        let mut instance = Instance::new(InstanceId::from("i-1"), "ci-1", "", "img", "flv", max_jobs);
        let mut state = instance.job_accounting();
        for _ in 0..completed {
            state = instance.record_job_completed();
        }
        let expected = if max_jobs > 0 && completed >= max_jobs {
            JobAccounting::ExceededLimit
        } else {
            JobAccounting::Active
        };
        prop_assert_eq!(state, expected);
    }
}

#[test]
fn test_zero_ttl_bounds_disable_expiry() {
    let h = Harness::new(cluster_settings());
    let created = Utc::now() - Duration::days(365);
    h.cloud.insert_server(existing_server("a", "ci-a", created));
    h.ci.register(&InstanceId::from("a"), AgentState::Idle);
    let agents = vec![h.ci.agent(&InstanceId::from("a")).unwrap()];
    runtime().block_on(h.registry.refresh_all(&agents)).unwrap();

    assert!(h.registry.fetch_expired_agents(&agents).is_empty());
}
