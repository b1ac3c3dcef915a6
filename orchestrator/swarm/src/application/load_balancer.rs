// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Load Balancer Application Service
//!
//! Measures how claims are spread over the agents of a swarm and moves
//! low-progress work from overloaded agents to underloaded ones.
//!
//! Load snapshots are read without locks and may be slightly stale; every
//! real transfer goes through [`HandoffService::request_handoff`], which
//! re-checks ownership under the issue lock. A rebalance never transfers
//! ownership itself: it requests handoffs the targets still have to accept.

use async_trait::async_trait;
use futures::future::try_join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use workclaim_core::application::claim_service::HandoffService;
use workclaim_core::domain::claim::{Claim, ClaimError, ClaimStatus, Outcome};
use workclaim_core::domain::claimant::{AgentType, Claimant};
use workclaim_core::domain::clock::Clock;
use workclaim_core::domain::coordination_config::LoadBalancingSettings;
use workclaim_core::domain::events::LoadEvent;
use workclaim_core::domain::repository::{ClaimRepository, RepositoryError};
use workclaim_core::infrastructure::event_bus::EventBus;

use crate::domain::load;
use crate::domain::registry::AgentRegistry;
use crate::domain::swarm::{
    AgentLoadInfo, AgentProfile, ImbalanceReport, MoveStatus, OverloadedAgent, RebalanceMove, RebalanceOptions,
    RebalanceResult, SwarmId, SwarmLoadInfo, UnderloadedAgent,
};

#[derive(Debug, Error)]
pub enum LoadBalancerError {
    #[error("Agent {agent_id} is not registered")]
    AgentNotFound { agent_id: String },

    #[error(transparent)]
    Claim(#[from] ClaimError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

#[async_trait]
pub trait LoadBalancer: Send + Sync {
    async fn get_agent_load(&self, agent_id: &str) -> Result<AgentLoadInfo, LoadBalancerError>;

    async fn get_swarm_load(&self, swarm_id: &SwarmId) -> Result<SwarmLoadInfo, LoadBalancerError>;

    /// Emits `AgentOverloaded` / `AgentUnderloaded` for every flagged agent.
    async fn detect_imbalance(&self, swarm_id: &SwarmId) -> Result<ImbalanceReport, LoadBalancerError>;

    async fn rebalance(
        &self,
        swarm_id: &SwarmId,
        options: RebalanceOptions,
    ) -> Result<RebalanceResult, LoadBalancerError>;

    /// `rebalance` with handoffs disabled: nothing in the store changes.
    async fn preview_rebalance(
        &self,
        swarm_id: &SwarmId,
        options: RebalanceOptions,
    ) -> Result<RebalanceResult, LoadBalancerError>;
}

pub struct StandardLoadBalancer {
    registry: Arc<dyn AgentRegistry>,
    repository: Arc<dyn ClaimRepository>,
    handoff: Arc<dyn HandoffService>,
    event_bus: Arc<EventBus>,
    clock: Arc<dyn Clock>,
    settings: LoadBalancingSettings,
}

/// One agent's state inside a single rebalance run.
struct WorkingAgent {
    agent_type: AgentType,
    max_claims: usize,
    claims: Vec<Claim>,
    /// Remaining capacity while the agent is a move target; zero otherwise.
    capacity: usize,
}

impl WorkingAgent {
    fn utilization(&self) -> f64 {
        load::utilization(&self.claims, self.max_claims)
    }
}

impl StandardLoadBalancer {
    pub fn new(
        registry: Arc<dyn AgentRegistry>,
        repository: Arc<dyn ClaimRepository>,
        handoff: Arc<dyn HandoffService>,
        event_bus: Arc<EventBus>,
        clock: Arc<dyn Clock>,
        settings: LoadBalancingSettings,
    ) -> Self {
        Self {
            registry,
            repository,
            handoff,
            event_bus,
            clock,
            settings,
        }
    }

    pub fn settings(&self) -> &LoadBalancingSettings {
        &self.settings
    }

    async fn load_for(&self, profile: &AgentProfile) -> Result<AgentLoadInfo, LoadBalancerError> {
        let mut claims = self.repository.find_by_claimant(&profile.claimant()).await?;
        claims.retain(Claim::is_live);
        let samples = self.registry.completion_times(&profile.agent_id).await?;
        let avg_completion_time = if samples.is_empty() {
            None
        } else {
            Some(samples.iter().sum::<Duration>() / samples.len() as u32)
        };

        Ok(AgentLoadInfo {
            agent_id: profile.agent_id.clone(),
            agent_type: profile.agent_type.clone(),
            claim_count: claims.len(),
            max_claims: profile.max_claims,
            utilization: load::utilization(&claims, profile.max_claims),
            current_blocked_count: claims.iter().filter(|c| c.status() == ClaimStatus::Blocked).count(),
            avg_completion_time,
            claims,
        })
    }

    async fn swarm_load(&self, swarm_id: &SwarmId) -> Result<SwarmLoadInfo, LoadBalancerError> {
        let profiles = self.registry.agents_in_swarm(swarm_id).await?;
        let agents = try_join_all(profiles.iter().map(|profile| self.load_for(profile))).await?;

        let utilizations: Vec<f64> = agents.iter().map(|a| a.utilization).collect();
        let avg_utilization = load::mean(&utilizations);
        let overload_line = avg_utilization * self.settings.overload_threshold;
        let underload_line = avg_utilization * self.settings.underload_threshold;

        Ok(SwarmLoadInfo {
            swarm_id: swarm_id.clone(),
            total_agents: agents.len(),
            total_claims: agents.iter().map(|a| a.claim_count).sum(),
            avg_utilization,
            overloaded_agents: agents
                .iter()
                .filter(|a| a.utilization > overload_line)
                .map(|a| a.agent_id.clone())
                .collect(),
            underloaded_agents: agents
                .iter()
                .filter(|a| a.utilization < underload_line)
                .map(|a| a.agent_id.clone())
                .collect(),
            balance_score: load::balance_score(&utilizations),
            agents,
        })
    }

    fn is_movable(claim: &Claim, max_progress_to_move: u8) -> bool {
        claim.progress() < max_progress_to_move
            && claim.status() != ClaimStatus::PendingHandoff
            && !claim.is_protected()
    }

    fn imbalance(&self, swarm: &SwarmLoadInfo, max_progress_to_move: u8) -> ImbalanceReport {
        let overloaded = swarm
            .agents
            .iter()
            .filter(|a| swarm.overloaded_agents.contains(&a.agent_id))
            .map(|a| {
                let mut movable_claims: Vec<Claim> = a
                    .claims
                    .iter()
                    .filter(|c| Self::is_movable(c, max_progress_to_move))
                    .cloned()
                    .collect();
                movable_claims.sort_by(|x, y| x.progress().cmp(&y.progress()).then_with(|| x.issue_id.cmp(&y.issue_id)));
                OverloadedAgent {
                    agent_id: a.agent_id.clone(),
                    agent_type: a.agent_type.clone(),
                    utilization: a.utilization,
                    claim_count: a.claim_count,
                    excess_claims: load::excess_claims(a.claim_count, a.max_claims, swarm.avg_utilization),
                    movable_claims,
                }
            })
            .collect::<Vec<_>>();

        let underloaded = swarm
            .agents
            .iter()
            .filter(|a| swarm.underloaded_agents.contains(&a.agent_id))
            .map(|a| UnderloadedAgent {
                agent_id: a.agent_id.clone(),
                agent_type: a.agent_type.clone(),
                utilization: a.utilization,
                claim_count: a.claim_count,
                available_capacity: a.max_claims.saturating_sub(a.claim_count),
            })
            .collect::<Vec<_>>();

        let is_balanced =
            overloaded.is_empty() || swarm.balance_score > self.settings.balanced_score_threshold;

        ImbalanceReport {
            swarm_id: swarm.swarm_id.clone(),
            overloaded,
            underloaded,
            avg_utilization: swarm.avg_utilization,
            balance_score: swarm.balance_score,
            is_balanced,
            detected_at: self.clock.now(),
        }
    }

    /// Best target for a claim leaving `source`: same type first when
    /// preferred, then most remaining capacity, then lowest utilization,
    /// then agent id.
    fn pick_target(
        working: &BTreeMap<String, WorkingAgent>,
        source_id: &str,
        source_type: &AgentType,
        prefer_same_type: bool,
    ) -> Option<String> {
        working
            .iter()
            .filter(|(id, agent)| id.as_str() != source_id && agent.capacity > 0)
            .min_by(|(a_id, a), (b_id, b)| {
                let type_rank = |agent: &WorkingAgent| prefer_same_type && &agent.agent_type != source_type;
                type_rank(*a)
                    .cmp(&type_rank(*b))
                    .then_with(|| b.capacity.cmp(&a.capacity))
                    .then_with(|| a.utilization().total_cmp(&b.utilization()))
                    .then_with(|| a_id.cmp(b_id))
            })
            .map(|(id, _)| id.clone())
    }

    async fn run_rebalance(
        &self,
        swarm_id: &SwarmId,
        options: RebalanceOptions,
    ) -> Result<RebalanceResult, LoadBalancerError> {
        let swarm = self.swarm_load(swarm_id).await?;
        let report = self.imbalance(&swarm, options.max_progress_to_move);

        let mut working: BTreeMap<String, WorkingAgent> = swarm
            .agents
            .iter()
            .map(|a| {
                (
                    a.agent_id.clone(),
                    WorkingAgent {
                        agent_type: a.agent_type.clone(),
                        max_claims: a.max_claims,
                        claims: a.claims.clone(),
                        capacity: 0,
                    },
                )
            })
            .collect();
        for under in &report.underloaded {
            if let Some(agent) = working.get_mut(&under.agent_id) {
                agent.capacity = under.available_capacity;
            }
        }

        let mut sources: Vec<&OverloadedAgent> = report.overloaded.iter().collect();
        sources.sort_by(|a, b| b.utilization.total_cmp(&a.utilization).then_with(|| a.agent_id.cmp(&b.agent_id)));

        let mut moves = Vec::new();
        'sources: for source in sources {
            for claim in source.movable_claims.iter().take(source.excess_claims) {
                if moves.len() >= options.max_moves {
                    break 'sources;
                }

                let target = Self::pick_target(&working, &source.agent_id, &source.agent_type, options.prefer_same_type);
                let Some(target_id) = target else {
                    moves.push(RebalanceMove {
                        issue_id: claim.issue_id.clone(),
                        from_agent: source.agent_id.clone(),
                        to_agent: None,
                        progress: claim.progress(),
                        status: MoveStatus::Suggested,
                        error: None,
                    });
                    continue;
                };

                let (status, error) = if options.use_handoff {
                    let target_type = working
                        .get(&target_id)
                        .map(|agent| agent.agent_type.clone())
                        .unwrap_or_else(|| source.agent_type.clone());
                    let to = Claimant::agent(target_id.clone(), target_type);
                    let reason = format!("rebalance: {} is overloaded", source.agent_id);
                    match self.handoff.request_handoff(&claim.issue_id, claim.claimant(), &to, &reason).await {
                        Ok(Outcome::Completed(_)) => (MoveStatus::Requested, None),
                        Ok(Outcome::Rejected(e)) => (MoveStatus::Failed, Some(e.to_string())),
                        Err(e) => {
                            warn!(issue_id = %claim.issue_id, error = %e, "Rebalance handoff failed");
                            (MoveStatus::Failed, Some(e.to_string()))
                        }
                    }
                } else {
                    (MoveStatus::Suggested, None)
                };

                if status != MoveStatus::Failed {
                    if let Some(agent) = working.get_mut(&source.agent_id) {
                        agent.claims.retain(|c| c.issue_id != claim.issue_id);
                    }
                    if let Some(agent) = working.get_mut(&target_id) {
                        agent.claims.push(claim.clone());
                        agent.capacity -= 1;
                    }
                }

                moves.push(RebalanceMove {
                    issue_id: claim.issue_id.clone(),
                    from_agent: source.agent_id.clone(),
                    to_agent: Some(target_id),
                    progress: claim.progress(),
                    status,
                    error,
                });
            }
        }

        let projected: Vec<f64> = working.values().map(WorkingAgent::utilization).collect();
        let result = RebalanceResult {
            swarm_id: swarm_id.clone(),
            moves,
            previous_balance_score: swarm.balance_score,
            new_balance_score: load::balance_score(&projected),
            rebalanced_at: self.clock.now(),
        };

        metrics::counter!("workclaim_rebalance_moves_total").increment(result.requested() as u64);
        metrics::gauge!("workclaim_swarm_balance_score", "swarm" => swarm_id.to_string())
            .set(result.new_balance_score);
        info!(
            swarm_id = %swarm_id,
            requested = result.requested(),
            suggested = result.suggested(),
            failed = result.failed(),
            previous_balance_score = result.previous_balance_score,
            new_balance_score = result.new_balance_score,
            "Swarm rebalanced"
        );

        self.event_bus.publish_load_event(LoadEvent::SwarmRebalanced {
            swarm_id: swarm_id.to_string(),
            moves: result.requested(),
            suggestions: result.suggested(),
            failed: result.failed(),
            previous_balance_score: result.previous_balance_score,
            new_balance_score: result.new_balance_score,
            rebalanced_at: result.rebalanced_at,
        });
        Ok(result)
    }
}

#[async_trait]
impl LoadBalancer for StandardLoadBalancer {
    async fn get_agent_load(&self, agent_id: &str) -> Result<AgentLoadInfo, LoadBalancerError> {
        let profile = self
            .registry
            .get_agent(agent_id)
            .await?
            .ok_or_else(|| LoadBalancerError::AgentNotFound {
                agent_id: agent_id.to_string(),
            })?;
        self.load_for(&profile).await
    }

    async fn get_swarm_load(&self, swarm_id: &SwarmId) -> Result<SwarmLoadInfo, LoadBalancerError> {
        self.swarm_load(swarm_id).await
    }

    async fn detect_imbalance(&self, swarm_id: &SwarmId) -> Result<ImbalanceReport, LoadBalancerError> {
        let swarm = self.swarm_load(swarm_id).await?;
        let report = self.imbalance(&swarm, self.settings.max_progress_to_move);

        for agent in &report.overloaded {
            self.event_bus.publish_load_event(LoadEvent::AgentOverloaded {
                swarm_id: swarm_id.to_string(),
                agent_id: agent.agent_id.clone(),
                utilization: agent.utilization,
                claim_count: agent.claim_count,
                excess_claims: agent.excess_claims,
                detected_at: report.detected_at,
            });
        }
        for agent in &report.underloaded {
            self.event_bus.publish_load_event(LoadEvent::AgentUnderloaded {
                swarm_id: swarm_id.to_string(),
                agent_id: agent.agent_id.clone(),
                utilization: agent.utilization,
                claim_count: agent.claim_count,
                available_capacity: agent.available_capacity,
                detected_at: report.detected_at,
            });
        }

        metrics::gauge!("workclaim_swarm_balance_score", "swarm" => swarm_id.to_string())
            .set(report.balance_score);
        debug!(
            swarm_id = %swarm_id,
            overloaded = report.overloaded.len(),
            underloaded = report.underloaded.len(),
            balance_score = report.balance_score,
            "Imbalance detection finished"
        );
        Ok(report)
    }

    async fn rebalance(
        &self,
        swarm_id: &SwarmId,
        options: RebalanceOptions,
    ) -> Result<RebalanceResult, LoadBalancerError> {
        self.run_rebalance(swarm_id, options).await
    }

    async fn preview_rebalance(
        &self,
        swarm_id: &SwarmId,
        options: RebalanceOptions,
    ) -> Result<RebalanceResult, LoadBalancerError> {
        self.run_rebalance(swarm_id, options.preview()).await
    }
}
