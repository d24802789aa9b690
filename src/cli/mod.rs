//! Command line interface.

pub mod commands;
pub mod output;
pub mod types;

pub use types::{Cli, ClusterIdArgs, Commands, ConfigCommands};

use crate::infrastructure::logging::{LogConfig, LoggerImpl};

/// Install the logger, reporting a failure on stderr.
///
/// Commands still run without logging when this fails.
pub fn init_logging(config: &LogConfig) -> Option<LoggerImpl> {
    match LoggerImpl::init(config) {
        Ok(logger) => Some(logger),
        Err(err) => {
            eprintln!("Warning: logging disabled: {err:#}");
            None
        }
    }
}

/// Print a command failure and exit non-zero.
pub fn handle_error(err: anyhow::Error, json_mode: bool) -> ! {
    if json_mode {
        let body = serde_json::json!({
            "success": false,
            "error": format!("{err:#}"),
        });
        eprintln!("{}", serde_json::to_string_pretty(&body).unwrap_or_default());
    } else {
        eprintln!("Error: {err:#}");
    }
    std::process::exit(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_reports_invalid_level() {
        let config = LogConfig {
            level: "chatty".to_string(),
            ..LogConfig::default()
        };
        assert!(init_logging(&config).is_none());
    }
}
