// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! In-memory [`AgentRegistry`] for tests and single-process swarms.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use workclaim_core::domain::repository::RepositoryError;

use crate::domain::registry::AgentRegistry;
use crate::domain::swarm::{AgentProfile, SwarmId};

/// Completion samples kept per agent.
const MAX_COMPLETION_SAMPLES: usize = 50;

#[derive(Clone, Default)]
pub struct InMemoryAgentRegistry {
    // Ordered by agent id so swarm listings are deterministic.
    agents: Arc<RwLock<BTreeMap<String, AgentProfile>>>,
    completions: Arc<RwLock<HashMap<String, VecDeque<Duration>>>>,
}

impl InMemoryAgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, profile: AgentProfile) {
        self.agents.write().insert(profile.agent_id.clone(), profile);
    }

    pub fn deregister(&self, agent_id: &str) -> Option<AgentProfile> {
        self.completions.write().remove(agent_id);
        self.agents.write().remove(agent_id)
    }

    pub fn record_completion(&self, agent_id: &str, took: Duration) {
        let mut completions = self.completions.write();
        let samples = completions.entry(agent_id.to_string()).or_default();
        if samples.len() == MAX_COMPLETION_SAMPLES {
            samples.pop_front();
        }
        samples.push_back(took);
    }
}

#[async_trait]
impl AgentRegistry for InMemoryAgentRegistry {
    async fn get_agent(&self, agent_id: &str) -> Result<Option<AgentProfile>, RepositoryError> {
        Ok(self.agents.read().get(agent_id).cloned())
    }

    async fn agents_in_swarm(&self, swarm_id: &SwarmId) -> Result<Vec<AgentProfile>, RepositoryError> {
        Ok(self
            .agents
            .read()
            .values()
            .filter(|profile| &profile.swarm_id == swarm_id)
            .cloned()
            .collect())
    }

    async fn completion_times(&self, agent_id: &str) -> Result<Vec<Duration>, RepositoryError> {
        Ok(self
            .completions
            .read()
            .get(agent_id)
            .map(|samples| samples.iter().copied().collect())
            .unwrap_or_default())
    }
}
