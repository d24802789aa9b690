//! Infrastructure layer module
//!
//! Adapters and ambient plumbing around the lifecycle services:
//! - Configuration management
//! - Logging infrastructure
//! - In-memory port implementations
//!
//! Implementations satisfy the port traits defined in the domain layer.

pub mod config;
pub mod logging;
pub mod memory;
