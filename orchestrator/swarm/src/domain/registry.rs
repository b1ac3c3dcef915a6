// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Agent directory contract. The balancer never tracks agents itself; it asks
//! the registry who is in a swarm and how much each agent can carry.

use async_trait::async_trait;
use std::time::Duration;
use workclaim_core::domain::repository::RepositoryError;

use crate::domain::swarm::{AgentProfile, SwarmId};

#[async_trait]
pub trait AgentRegistry: Send + Sync {
    async fn get_agent(&self, agent_id: &str) -> Result<Option<AgentProfile>, RepositoryError>;

    async fn agents_in_swarm(&self, swarm_id: &SwarmId) -> Result<Vec<AgentProfile>, RepositoryError>;

    /// Recent completion durations for `agent_id`, used for the average
    /// completion time. Empty when nothing has been recorded.
    async fn completion_times(&self, agent_id: &str) -> Result<Vec<Duration>, RepositoryError>;
}
