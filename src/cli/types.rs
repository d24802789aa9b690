//! CLI type definitions

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "stratus")]
#[command(about = "Stratus - ephemeral cloud build agent lifecycle", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Configuration commands
    #[command(subcommand)]
    Config(ConfigCommands),

    /// Print the identity of every configured cluster
    ClusterId(ClusterIdArgs),
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Load and validate the configuration
    Validate {
        /// Validate this file instead of the project configuration
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Print the effective configuration (passwords redacted)
    Show {
        /// Read this file instead of the project configuration
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}

#[derive(Args, Debug)]
pub struct ClusterIdArgs {
    /// Read this file instead of the project configuration
    #[arg(short, long)]
    pub file: Option<PathBuf>,
}
