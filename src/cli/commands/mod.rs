pub mod cluster;
pub mod config;

use anyhow::Result;
use std::path::Path;

use crate::domain::models::Config;
use crate::infrastructure::config::ConfigLoader;

/// Load from `file` when given, otherwise from the project configuration.
pub(crate) fn load_config(file: Option<&Path>) -> Result<Config> {
    match file {
        Some(path) => ConfigLoader::load_from_file(path),
        None => ConfigLoader::load(),
    }
}
