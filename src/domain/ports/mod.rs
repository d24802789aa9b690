//! Port trait definitions (Hexagonal Architecture)
//!
//! This module defines the async trait interfaces that external collaborators
//! must implement:
//! - CloudProvider: boot, inspect, delete and list servers; resolve images and flavors
//! - CiServer: list, disable and delete build agents
//!
//! The lifecycle engine depends only on these contracts, never on a concrete SDK.

pub mod ci_server;
pub mod cloud_provider;

pub use ci_server::{CiServer, ServerCommunicationError};
pub use cloud_provider::{
    CloudProvider, NamedResource, ProviderError, ProviderInstance, ProviderStatus, ResourceKind,
};
