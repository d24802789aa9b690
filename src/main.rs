//! Stratus CLI entry point.

use clap::Parser;

use stratus::cli::{Cli, Commands};
use stratus::infrastructure::config::ConfigLoader;
use stratus::infrastructure::logging::LogConfig;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // A broken config is reported by the command itself; log with defaults meanwhile.
    let log_config = ConfigLoader::load()
        .ok()
        .and_then(|config| LogConfig::from_settings(&config.logging).ok())
        .unwrap_or_else(|| LogConfig {
            level: "warn".to_string(),
            ..LogConfig::default().pretty()
        });
    let _logger = stratus::cli::init_logging(&log_config);

    let result = match cli.command {
        Commands::Config(command) => stratus::cli::commands::config::execute(command, cli.json).await,
        Commands::ClusterId(args) => stratus::cli::commands::cluster::execute(args, cli.json).await,
    };

    if let Err(err) = result {
        stratus::cli::handle_error(err, cli.json);
    }
}
