use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use std::path::Path;
use thiserror::Error;

use crate::domain::models::config::Config;

/// Directory holding project configuration, relative to the working directory
pub const CONFIG_DIR: &str = ".stratus";

/// Prefix of environment variable overrides
pub const ENV_PREFIX: &str = "STRATUS_";

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
const LOG_FORMATS: [&str; 2] = ["json", "pretty"];
const LOG_ROTATIONS: [&str; 3] = ["daily", "hourly", "never"];

/// Configuration error types
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Invalid log rotation: {0}. Must be one of: daily, hourly, never")]
    InvalidLogRotation(String),

    #[error("Reconcile interval must be at least one second")]
    ZeroReconcileInterval,

    #[error("Cluster '{0}' has an empty endpoint_url")]
    EmptyEndpoint(String),

    #[error("Cluster '{0}' has an empty instance_prefix")]
    EmptyInstancePrefix(String),

    #[error("Cluster '{cluster}': min_instances ({min}) exceeds max_instances ({max})")]
    InvalidInstanceLimits { cluster: String, min: u32, max: u32 },

    #[error("Cluster '{0}': pending_timeout_minutes must be positive")]
    ZeroPendingTimeout(String),
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .stratus/config.yaml (project config)
    /// 3. .stratus/local.yaml (local overrides, optional)
    /// 4. Environment variables (`STRATUS_*`, `__` separates nested keys)
    pub fn load() -> Result<Config> {
        Self::load_from_dir(".")
    }

    /// Same as [`ConfigLoader::load`] with `base` standing in for the working directory
    pub fn load_from_dir(base: impl AsRef<Path>) -> Result<Config> {
        let dir = base.as_ref().join(CONFIG_DIR);
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(dir.join("config.yaml")))
            .merge(Yaml::file(dir.join("local.yaml")))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Config> {
        let path = path.as_ref();
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path))
            .extract()
            .with_context(|| format!("Failed to load config from {}", path.display()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        let logging = &config.logging;
        if !LOG_LEVELS.contains(&logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(logging.level.clone()));
        }
        if !LOG_FORMATS.contains(&logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(logging.format.clone()));
        }
        if !LOG_ROTATIONS.contains(&logging.rotation.as_str()) {
            return Err(ConfigError::InvalidLogRotation(logging.rotation.clone()));
        }

        if config.reconciler.interval_secs == 0 {
            return Err(ConfigError::ZeroReconcileInterval);
        }

        for cluster in &config.clusters {
            let name = cluster.name.clone();
            if cluster.endpoint_url.trim().is_empty() {
                return Err(ConfigError::EmptyEndpoint(name));
            }
            if cluster.instance_prefix.trim().is_empty() {
                return Err(ConfigError::EmptyInstancePrefix(name));
            }
            // max_instances of zero means unlimited
            if cluster.max_instances > 0 && cluster.min_instances > cluster.max_instances {
                return Err(ConfigError::InvalidInstanceLimits {
                    cluster: name,
                    min: cluster.min_instances,
                    max: cluster.max_instances,
                });
            }
            if cluster.pending_timeout_minutes == 0 {
                return Err(ConfigError::ZeroPendingTimeout(name));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::ClusterSettings;
    use std::fs;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    fn cluster() -> ClusterSettings {
        ClusterSettings {
            name: "east".to_string(),
            endpoint_url: "https://keystone.example:5000/v3".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.reconciler.interval_secs, 60);
        assert_eq!(config.retry.max_retries, 1);
        assert!(config.clusters.is_empty());
        ConfigLoader::validate(&config).expect("Default config should be valid");
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml = r"
logging:
  level: debug
  format: pretty
reconciler:
  interval_secs: 30
clusters:
  - name: east
    endpoint_url: https://keystone.example:5000/v3
    instance_prefix: ci
    defaults:
      image: ubuntu-22.04
      flavor: m1.medium
    min_instances: 1
    max_instances: 4
    agent_ttl_min_minutes: 60
    agent_ttl_max_minutes: 120
";

        let config: Config = serde_yaml::from_str(yaml).expect("YAML should parse");

        assert_eq!(config.logging.format, "pretty");
        assert_eq!(config.reconciler.interval_secs, 30);
        assert!(config.reconciler.run_on_startup);
        let east = &config.clusters[0];
        assert_eq!(east.instance_prefix, "ci");
        assert_eq!(east.defaults.image, "ubuntu-22.04");
        assert_eq!(east.pending_timeout_minutes, 30);
        assert_eq!(east.image_cache_ttl_minutes, 10);

        ConfigLoader::validate(&config).expect("Parsed config should be valid");
    }

    #[test]
    fn test_validate_invalid_log_level() {
        let mut config = Config::default();
        config.logging.level = "verbose".to_string();
        assert_eq!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidLogLevel("verbose".to_string()))
        );
    }

    #[test]
    fn test_validate_invalid_log_format() {
        let mut config = Config::default();
        config.logging.format = "xml".to_string();
        assert_eq!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidLogFormat("xml".to_string()))
        );
    }

    #[test]
    fn test_validate_zero_interval() {
        let mut config = Config::default();
        config.reconciler.interval_secs = 0;
        assert_eq!(
            ConfigLoader::validate(&config),
            Err(ConfigError::ZeroReconcileInterval)
        );
    }

    #[test]
    fn test_validate_cluster_rules() {
        let mut config = Config {
            clusters: vec![cluster()],
            ..Default::default()
        };
        assert!(ConfigLoader::validate(&config).is_ok());

        config.clusters[0].endpoint_url = "  ".to_string();
        assert_eq!(
            ConfigLoader::validate(&config),
            Err(ConfigError::EmptyEndpoint("east".to_string()))
        );

        config.clusters[0] = ClusterSettings {
            instance_prefix: String::new(),
            ..cluster()
        };
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::EmptyInstancePrefix(_))
        ));

        config.clusters[0] = ClusterSettings {
            min_instances: 5,
            max_instances: 2,
            ..cluster()
        };
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidInstanceLimits { min: 5, max: 2, .. })
        ));

        // Unlimited max accepts any minimum
        config.clusters[0].max_instances = 0;
        assert!(ConfigLoader::validate(&config).is_ok());

        config.clusters[0] = ClusterSettings {
            pending_timeout_minutes: 0,
            ..cluster()
        };
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::ZeroPendingTimeout(_))
        ));
    }

    #[test]
    fn test_load_from_file_rejects_invalid() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "logging:\n  level: loud").unwrap();
        file.flush().unwrap();

        let err = ConfigLoader::load_from_file(file.path()).unwrap_err();
        assert!(err.to_string().contains("loud"));
    }

    #[test]
    fn test_hierarchical_merging_with_env_override() {
        let base = TempDir::new().unwrap();
        let dir = base.path().join(CONFIG_DIR);
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("config.yaml"),
            "logging:\n  level: info\n  format: json\nreconciler:\n  interval_secs: 120\n",
        )
        .unwrap();
        fs::write(dir.join("local.yaml"), "logging:\n  level: debug\n").unwrap();

        temp_env::with_vars(
            [
                ("STRATUS_RECONCILER__INTERVAL_SECS", Some("15")),
                ("STRATUS_LOGGING__LEVEL", None::<&str>),
            ],
            || {
                let config = ConfigLoader::load_from_dir(base.path()).unwrap();
                assert_eq!(config.logging.level, "debug", "local.yaml should win");
                assert_eq!(config.logging.format, "json", "base value should persist");
                assert_eq!(config.reconciler.interval_secs, 15, "env should win");
            },
        );
    }

    #[test]
    fn test_missing_files_fall_back_to_defaults() {
        let base = TempDir::new().unwrap();
        temp_env::with_var("STRATUS_RETRY__MAX_RETRIES", Some("3"), || {
            let config = ConfigLoader::load_from_dir(base.path()).unwrap();
            assert_eq!(config.retry.max_retries, 3);
            assert_eq!(config.logging.level, "info");
        });
    }
}
