use serde::{Deserialize, Serialize};

use super::instance::InstanceId;

/// Runtime state of a CI agent as reported by the CI server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    Idle,
    Building,
    LostContact,
    Missing,
}

impl AgentState {
    /// The agent is not connected to its backing instance anymore.
    pub const fn is_gone(self) -> bool {
        matches!(self, Self::LostContact | Self::Missing)
    }
}

/// Administrative state of a CI agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigState {
    Enabled,
    Disabled,
}

/// An agent registered with the CI server. Its id is the backing instance id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CiAgent {
    pub id: InstanceId,
    pub agent_state: AgentState,
    pub config_state: ConfigState,
}

impl CiAgent {
    pub fn new(id: impl Into<InstanceId>, agent_state: AgentState, config_state: ConfigState) -> Self {
        Self {
            id: id.into(),
            agent_state,
            config_state,
        }
    }

    /// Disabled and either idle or no longer reachable: safe to delete.
    pub const fn is_retirable(&self) -> bool {
        matches!(self.config_state, ConfigState::Disabled)
            && matches!(
                self.agent_state,
                AgentState::Idle | AgentState::LostContact | AgentState::Missing
            )
    }
}
