//! Implementation of the `stratus config` commands.

use anyhow::Result;
use serde::Serialize;

use super::load_config;
use crate::cli::output::{output, CommandOutput};
use crate::cli::types::ConfigCommands;
use crate::domain::models::Config;

const REDACTED: &str = "<redacted>";

#[derive(Debug, Serialize)]
pub struct ValidateOutput {
    pub success: bool,
    pub message: String,
    pub clusters: usize,
}

impl CommandOutput for ValidateOutput {
    fn to_human(&self) -> String {
        format!("{} ({} cluster(s))", self.message, self.clusters)
    }
}

#[derive(Debug, Serialize)]
pub struct ShowOutput {
    pub config: Config,
}

impl CommandOutput for ShowOutput {
    fn to_human(&self) -> String {
        serde_yaml::to_string(&self.config).unwrap_or_default()
    }
}

/// Copy of `config` that is safe to print.
pub fn redacted(config: &Config) -> Config {
    let mut config = config.clone();
    for cluster in &mut config.clusters {
        if !cluster.password.is_empty() {
            cluster.password = REDACTED.to_string();
        }
        if !cluster.registration_key.is_empty() {
            cluster.registration_key = REDACTED.to_string();
        }
    }
    config
}

pub async fn execute(command: ConfigCommands, json_mode: bool) -> Result<()> {
    match command {
        ConfigCommands::Validate { file } => {
            let config = load_config(file.as_deref())?;
            output(
                &ValidateOutput {
                    success: true,
                    message: "Configuration is valid".to_string(),
                    clusters: config.clusters.len(),
                },
                json_mode,
            );
        }
        ConfigCommands::Show { file } => {
            let config = load_config(file.as_deref())?;
            output(
                &ShowOutput {
                    config: redacted(&config),
                },
                json_mode,
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::ClusterSettings;

    #[test]
    fn test_redacted_hides_passwords() {
        let config = Config {
            clusters: vec![ClusterSettings {
                password: "hunter2".to_string(),
                registration_key: "agent-secret".to_string(),
                ..Default::default()
            }],
            ..Default::default()
        };
        let shown = ShowOutput {
            config: redacted(&config),
        };
        assert!(!shown.to_human().contains("hunter2"));
        assert!(!shown.to_human().contains("agent-secret"));
        assert!(!shown.to_json().to_string().contains("hunter2"));
        assert_eq!(config.clusters[0].password, "hunter2");
    }
}
