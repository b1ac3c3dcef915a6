// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Swarm Load Model
//!
//! Types describing how work is spread across the agents of one swarm:
//!
//! - [`SwarmId`]: identifier of a group of cooperating agents.
//! - [`AgentProfile`]: registry entry: agent type and claim capacity.
//! - [`AgentLoadInfo`] / [`SwarmLoadInfo`]: derived snapshots, never persisted.
//! - [`ImbalanceReport`]: overloaded and underloaded agents at one instant.
//! - [`RebalanceOptions`] / [`RebalanceResult`]: rebalance inputs and the moves it produced.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use workclaim_core::domain::claim::Claim;
use workclaim_core::domain::claimant::{AgentType, Claimant};
use workclaim_core::domain::coordination_config::LoadBalancingSettings;

/// Identifier of a swarm.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SwarmId(pub String);

impl SwarmId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SwarmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SwarmId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Registry entry for one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentProfile {
    pub agent_id: String,
    pub agent_type: AgentType,
    pub swarm_id: SwarmId,
    /// Weighted claim capacity. Zero means the agent takes no work.
    pub max_claims: usize,
}

impl AgentProfile {
    pub fn new(
        agent_id: impl Into<String>,
        agent_type: impl Into<AgentType>,
        swarm_id: impl Into<SwarmId>,
        max_claims: usize,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            agent_type: agent_type.into(),
            swarm_id: swarm_id.into(),
            max_claims,
        }
    }

    /// The claimant identity this agent holds claims under.
    pub fn claimant(&self) -> Claimant {
        Claimant::agent(self.agent_id.clone(), self.agent_type.clone())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentLoadInfo {
    pub agent_id: String,
    pub agent_type: AgentType,
    pub claim_count: usize,
    pub max_claims: usize,
    /// Weighted load in `[0, 1]`.
    pub utilization: f64,
    pub claims: Vec<Claim>,
    #[serde(with = "humantime_serde")]
    pub avg_completion_time: Option<Duration>,
    pub current_blocked_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SwarmLoadInfo {
    pub swarm_id: SwarmId,
    pub total_agents: usize,
    pub total_claims: usize,
    pub avg_utilization: f64,
    pub agents: Vec<AgentLoadInfo>,
    pub overloaded_agents: Vec<String>,
    pub underloaded_agents: Vec<String>,
    /// `1 - stddev/mean`, clamped to `[0, 1]`.
    pub balance_score: f64,
}

impl SwarmLoadInfo {
    pub fn agent(&self, agent_id: &str) -> Option<&AgentLoadInfo> {
        self.agents.iter().find(|agent| agent.agent_id == agent_id)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OverloadedAgent {
    pub agent_id: String,
    pub agent_type: AgentType,
    pub utilization: f64,
    pub claim_count: usize,
    pub excess_claims: usize,
    /// Candidates for moving: low progress, not pending handoff, not protected.
    pub movable_claims: Vec<Claim>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UnderloadedAgent {
    pub agent_id: String,
    pub agent_type: AgentType,
    pub utilization: f64,
    pub claim_count: usize,
    pub available_capacity: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImbalanceReport {
    pub swarm_id: SwarmId,
    pub overloaded: Vec<OverloadedAgent>,
    pub underloaded: Vec<UnderloadedAgent>,
    pub avg_utilization: f64,
    pub balance_score: f64,
    pub is_balanced: bool,
    pub detected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RebalanceOptions {
    /// Request real handoffs. When unset every move is only a suggestion.
    pub use_handoff: bool,
    pub prefer_same_type: bool,
    pub max_moves: usize,
    /// Claims at or above this progress stay where they are.
    pub max_progress_to_move: u8,
}

impl RebalanceOptions {
    pub fn from_settings(settings: &LoadBalancingSettings) -> Self {
        Self {
            use_handoff: settings.use_handoff,
            prefer_same_type: settings.prefer_same_type,
            max_moves: settings.max_moves_per_rebalance,
            max_progress_to_move: settings.max_progress_to_move,
        }
    }

    pub fn preview(mut self) -> Self {
        self.use_handoff = false;
        self
    }
}

impl Default for RebalanceOptions {
    fn default() -> Self {
        Self::from_settings(&LoadBalancingSettings::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveStatus {
    /// Handoff requested; the target still has to accept.
    Requested,
    /// Recorded only; nothing changed in the store.
    Suggested,
    /// The handoff request was rejected or errored.
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RebalanceMove {
    pub issue_id: String,
    pub from_agent: String,
    /// `None` when no underloaded agent had capacity.
    pub to_agent: Option<String>,
    pub progress: u8,
    pub status: MoveStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RebalanceResult {
    pub swarm_id: SwarmId,
    pub moves: Vec<RebalanceMove>,
    pub previous_balance_score: f64,
    /// Projected score with every requested and targeted suggested move applied.
    pub new_balance_score: f64,
    pub rebalanced_at: DateTime<Utc>,
}

impl RebalanceResult {
    fn count(&self, status: MoveStatus) -> usize {
        self.moves.iter().filter(|m| m.status == status).count()
    }

    pub fn requested(&self) -> usize {
        self.count(MoveStatus::Requested)
    }

    pub fn suggested(&self) -> usize {
        self.count(MoveStatus::Suggested)
    }

    pub fn failed(&self) -> usize {
        self.count(MoveStatus::Failed)
    }
}
