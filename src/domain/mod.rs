//! Domain layer for the stratus lifecycle engine
//!
//! This module contains the core models, error taxonomy and port traits.

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{DomainError, DomainResult};
