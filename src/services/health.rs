//! Operator-visible health messages.
//!
//! Failures inside the lifecycle engine never crash the host; they end up
//! here instead, one current message per category.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Area a health message belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthCategory {
    ImageLookup,
    FlavorLookup,
    Provisioning,
    CiServer,
    Cleanup,
}

/// Latest problem reported for one category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthMessage {
    pub category: HealthCategory,
    pub message: String,
    pub reported_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct HealthReporter {
    messages: DashMap<HealthCategory, HealthMessage>,
}

impl HealthReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the current message of `category`.
    pub fn report(&self, category: HealthCategory, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(category = ?category, "{message}");
        self.messages.insert(
            category,
            HealthMessage {
                category,
                message,
                reported_at: Utc::now(),
            },
        );
    }

    /// The category recovered.
    pub fn clear(&self, category: HealthCategory) {
        self.messages.remove(&category);
    }

    pub fn get(&self, category: HealthCategory) -> Option<HealthMessage> {
        self.messages.get(&category).map(|m| m.clone())
    }

    pub fn is_healthy(&self) -> bool {
        self.messages.is_empty()
    }

    /// All current messages ordered by category.
    pub fn snapshot(&self) -> Vec<HealthMessage> {
        let mut messages: Vec<HealthMessage> =
            self.messages.iter().map(|m| m.value().clone()).collect();
        messages.sort_by_key(|m| m.category);
        messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_replaces_and_clear_removes() {
        let health = HealthReporter::new();
        assert!(health.is_healthy());

        health.report(HealthCategory::CiServer, "status 500");
        health.report(HealthCategory::CiServer, "status 503");
        health.report(HealthCategory::ImageLookup, "image ubuntu not found");

        let snapshot = health.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].category, HealthCategory::ImageLookup);
        assert_eq!(health.get(HealthCategory::CiServer).unwrap().message, "status 503");

        health.clear(HealthCategory::CiServer);
        assert!(health.get(HealthCategory::CiServer).is_none());
        assert!(!health.is_healthy());
    }
}
