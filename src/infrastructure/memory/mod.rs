//! In-memory adapters for the cloud provider and CI server ports
//!
//! Used by the test suites and for dry runs without a real endpoint.

pub mod ci;
pub mod cloud;

pub use ci::InMemoryCiServer;
pub use cloud::InMemoryCloudProvider;
