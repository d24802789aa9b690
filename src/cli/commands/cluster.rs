//! Implementation of the `stratus cluster-id` command.

use anyhow::Result;
use serde::Serialize;
use uuid::Uuid;

use super::load_config;
use crate::cli::output::{output, CommandOutput};
use crate::cli::types::ClusterIdArgs;

#[derive(Debug, Serialize)]
pub struct ClusterIdentity {
    pub name: String,
    pub endpoint_url: String,
    pub cluster_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct ClusterIdOutput {
    pub clusters: Vec<ClusterIdentity>,
}

impl CommandOutput for ClusterIdOutput {
    fn to_human(&self) -> String {
        if self.clusters.is_empty() {
            return "No clusters configured".to_string();
        }
        self.clusters
            .iter()
            .map(|c| format!("{}  {} ({})", c.cluster_id, c.name, c.endpoint_url))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

pub async fn execute(args: ClusterIdArgs, json_mode: bool) -> Result<()> {
    let config = load_config(args.file.as_deref())?;
    let clusters = config
        .clusters
        .iter()
        .map(|settings| ClusterIdentity {
            name: settings.name.clone(),
            endpoint_url: settings.endpoint_url.clone(),
            cluster_id: settings.uuid(),
        })
        .collect();
    output(&ClusterIdOutput { clusters }, json_mode);
    Ok(())
}
