// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Load measurement and rebalancing over a registered swarm.

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use std::sync::Arc;
use std::time::Duration;

use workclaim_core::application::{ClaimService, HandoffService, StandardClaimService};
use workclaim_core::domain::claim::{Claim, ClaimError, ClaimStatus, IssuePriority, Outcome};
use workclaim_core::domain::claimant::Claimant;
use workclaim_core::domain::clock::ManualClock;
use workclaim_core::domain::coordination_config::LoadBalancingSettings;
use workclaim_core::domain::events::LoadEvent;
use workclaim_core::infrastructure::event_bus::{DomainEvent, EventBus};
use workclaim_core::infrastructure::issue_locks::IssueLockManager;
use workclaim_core::infrastructure::repositories::InMemoryClaimRepository;
use workclaim_swarm::application::{LoadBalancer, LoadBalancerError, StandardLoadBalancer};
use workclaim_swarm::domain::swarm::{AgentProfile, MoveStatus, RebalanceMove, RebalanceOptions, SwarmId};
use workclaim_swarm::infrastructure::InMemoryAgentRegistry;

const EPSILON: f64 = 1e-6;

struct Harness {
    claims: Arc<StandardClaimService>,
    registry: Arc<InMemoryAgentRegistry>,
    balancer: StandardLoadBalancer,
    event_bus: Arc<EventBus>,
}

/// Rejects every handoff, standing in for a target that refuses work.
struct RefusingHandoff;

#[async_trait]
impl HandoffService for RefusingHandoff {
    async fn request_handoff(
        &self,
        issue_id: &str,
        _from: &Claimant,
        _to: &Claimant,
        _reason: &str,
    ) -> Result<Outcome<Claim>, ClaimError> {
        Ok(Outcome::Rejected(ClaimError::ValidationFailed {
            issue_id: issue_id.to_string(),
            reason: "target is draining".to_string(),
        }))
    }
}

fn harness_with_handoff(handoff: Option<Arc<dyn HandoffService>>) -> Harness {
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()));
    let event_bus = Arc::new(EventBus::new(256));
    let repository = Arc::new(InMemoryClaimRepository::new());
    let registry = Arc::new(InMemoryAgentRegistry::new());
    let claims = Arc::new(StandardClaimService::new(
        repository.clone(),
        event_bus.clone(),
        clock.clone(),
        IssueLockManager::new(),
    ));
    let handoff = handoff.unwrap_or_else(|| claims.clone() as Arc<dyn HandoffService>);
    let balancer = StandardLoadBalancer::new(
        registry.clone(),
        repository,
        handoff,
        event_bus.clone(),
        clock,
        LoadBalancingSettings::default(),
    );
    Harness {
        claims,
        registry,
        balancer,
        event_bus,
    }
}

fn harness() -> Harness {
    harness_with_handoff(None)
}

fn swarm() -> SwarmId {
    SwarmId::new("swarm-1")
}

impl Harness {
    fn agent(&self, agent_id: &str, max_claims: usize) -> Claimant {
        let profile = AgentProfile::new(agent_id, "coder", swarm(), max_claims);
        let claimant = profile.claimant();
        self.registry.register(profile);
        claimant
    }

    async fn give(&self, claimant: &Claimant, issues: &[&str], priority: IssuePriority) {
        for issue in issues {
            self.claims
                .claim_with_priority(issue, claimant.clone(), priority)
                .await
                .expect("Failed to claim issue")
                .into_value()
                .expect("Claim should not be rejected");
        }
    }

    /// agent-a holds four medium claims at capacity four; agent-b and
    /// agent-c are idle with the same capacity.
    async fn lopsided(&self) -> Claimant {
        let a = self.agent("agent-a", 4);
        self.agent("agent-b", 4);
        self.agent("agent-c", 4);
        self.give(&a, &["issue-1", "issue-2", "issue-3", "issue-4"], IssuePriority::Medium)
            .await;
        a
    }
}

#[tokio::test]
async fn test_critical_claim_fills_two_slots() {
    let h = harness();
    let agent = h.agent("agent-a", 2);
    h.give(&agent, &["issue-1"], IssuePriority::Critical).await;

    let info = h.balancer.get_agent_load("agent-a").await.unwrap();
    assert_eq!(info.claim_count, 1);
    assert!((info.utilization - 1.0).abs() < EPSILON);
    assert!(info.avg_completion_time.is_none());
}

#[tokio::test]
async fn test_agent_load_reports_blocked_and_completion_times() {
    let h = harness();
    let agent = h.agent("agent-a", 4);
    h.give(&agent, &["issue-1", "issue-2"], IssuePriority::High).await;
    h.claims
        .update_status("issue-2", &agent, ClaimStatus::Blocked, Some("waiting on review".into()))
        .await
        .unwrap();
    h.registry.record_completion("agent-a", Duration::from_secs(60));
    h.registry.record_completion("agent-a", Duration::from_secs(180));

    let info = h.balancer.get_agent_load("agent-a").await.unwrap();
    assert_eq!(info.current_blocked_count, 1);
    // 1.5 + 1.5 * 0.5 over four slots.
    assert!((info.utilization - 0.5625).abs() < EPSILON);
    assert_eq!(info.avg_completion_time, Some(Duration::from_secs(120)));
}

#[tokio::test]
async fn test_load_ignores_released_but_counts_expired_claims() {
    let h = harness();
    let agent = h.agent("agent-a", 2);
    h.give(&agent, &["issue-1"], IssuePriority::Medium).await;
    h.claims
        .update_status("issue-1", &agent, ClaimStatus::Released, None)
        .await
        .expect("Failed to release through status change");

    let info = h.balancer.get_agent_load("agent-a").await.unwrap();
    assert_eq!(info.claim_count, 0);
    assert!(info.utilization.abs() < EPSILON);
    assert!(info.claims.is_empty());

    h.give(&agent, &["issue-2"], IssuePriority::Medium).await;
    h.claims
        .update_status("issue-2", &agent, ClaimStatus::Expired, None)
        .await
        .expect("Failed to expire claim");

    let info = h.balancer.get_agent_load("agent-a").await.unwrap();
    assert_eq!(info.claim_count, 1);
    assert!((info.utilization - 0.5).abs() < EPSILON);
    assert_eq!(info.claims[0].issue_id, "issue-2");
}

#[tokio::test]
async fn test_unknown_agent_is_an_error() {
    let h = harness();
    let err = h.balancer.get_agent_load("ghost").await.unwrap_err();
    assert!(matches!(err, LoadBalancerError::AgentNotFound { agent_id } if agent_id == "ghost"));
}

#[tokio::test]
async fn test_skewed_swarm_is_flagged() {
    let h = harness();
    let a = h.agent("agent-a", 4);
    let b = h.agent("agent-b", 10);
    let c = h.agent("agent-c", 10);
    h.give(&a, &["issue-1", "issue-2", "issue-3", "issue-4"], IssuePriority::Medium)
        .await;
    h.give(&b, &["issue-5"], IssuePriority::Medium).await;
    h.give(&c, &["issue-6"], IssuePriority::Medium).await;

    let load = h.balancer.get_swarm_load(&swarm()).await.unwrap();
    let utilizations: Vec<f64> = load.agents.iter().map(|agent| agent.utilization).collect();
    assert!((utilizations[0] - 1.0).abs() < EPSILON);
    assert!((utilizations[1] - 0.1).abs() < EPSILON);
    assert!((utilizations[2] - 0.1).abs() < EPSILON);
    assert!((load.avg_utilization - 0.4).abs() < EPSILON);
    assert_eq!(load.total_claims, 6);
    assert_eq!(load.overloaded_agents, vec!["agent-a".to_string()]);
    assert_eq!(load.underloaded_agents, vec!["agent-b".to_string(), "agent-c".to_string()]);

    let mut receiver = h.event_bus.subscribe();
    let report = h.balancer.detect_imbalance(&swarm()).await.unwrap();
    assert!(!report.is_balanced);
    assert!((0.0..=1.0).contains(&report.balance_score));
    assert!((report.balance_score - load.balance_score).abs() < EPSILON);
    assert_eq!(report.overloaded.len(), 1);
    assert_eq!(report.overloaded[0].movable_claims.len(), 4);
    assert_eq!(report.underloaded.len(), 2);
    assert_eq!(report.underloaded[0].available_capacity, 9);

    let types: Vec<&str> = receiver
        .drain()
        .into_iter()
        .filter_map(|event| match event {
            DomainEvent::Load(event) => Some(event.event_type()),
            DomainEvent::Claim(_) => None,
        })
        .collect();
    assert_eq!(types, vec!["agent:overloaded", "agent:underloaded", "agent:underloaded"]);
}

#[tokio::test]
async fn test_even_swarm_is_balanced() {
    let h = harness();
    let a = h.agent("agent-a", 2);
    let b = h.agent("agent-b", 2);
    h.give(&a, &["issue-1"], IssuePriority::Medium).await;
    h.give(&b, &["issue-2"], IssuePriority::Medium).await;

    let report = h.balancer.detect_imbalance(&swarm()).await.unwrap();
    assert!(report.is_balanced);
    assert!((report.balance_score - 1.0).abs() < EPSILON);
    assert!(report.overloaded.is_empty());
}

#[tokio::test]
async fn test_rebalance_requests_handoffs_and_improves_score() {
    let h = harness();
    let a = h.lopsided().await;

    let mut receiver = h.event_bus.subscribe();
    let result = h.balancer.rebalance(&swarm(), RebalanceOptions::default()).await.unwrap();

    assert_eq!(result.requested(), 3);
    let targets: Vec<_> = result
        .moves
        .iter()
        .map(|m| (m.issue_id.as_str(), m.to_agent.as_deref()))
        .collect();
    assert_eq!(
        targets,
        vec![
            ("issue-1", Some("agent-b")),
            ("issue-2", Some("agent-c")),
            ("issue-3", Some("agent-b")),
        ]
    );
    assert!(result.previous_balance_score.abs() < EPSILON);
    assert!(result.new_balance_score >= result.previous_balance_score);
    assert!((result.new_balance_score - (1.0 - 0.5f64.sqrt() / 2.0)).abs() < 1e-3);

    // Ownership waits for the targets to accept.
    let pending = h.claims.pending_handoffs().await.unwrap();
    assert_eq!(pending.len(), 3);
    assert!(pending.iter().all(|claim| claim.claimant() == &a));

    let rebalanced = receiver
        .drain()
        .into_iter()
        .filter_map(|event| match event {
            DomainEvent::Load(LoadEvent::SwarmRebalanced { moves, .. }) => Some(moves),
            _ => None,
        })
        .collect::<Vec<_>>();
    assert_eq!(rebalanced, vec![3]);
}

#[tokio::test]
async fn test_rebalance_respects_move_limit_and_progress() {
    let h = harness();
    h.lopsided().await;
    h.claims.update_progress("issue-1", 60).await.unwrap();

    let options = RebalanceOptions {
        max_moves: 2,
        ..RebalanceOptions::default()
    };
    let result = h.balancer.rebalance(&swarm(), options).await.unwrap();
    let moved: Vec<_> = result.moves.iter().map(|m| m.issue_id.as_str()).collect();
    assert_eq!(moved, vec!["issue-2", "issue-3"]);
}

#[tokio::test]
async fn test_preview_leaves_store_untouched() {
    let h = harness();
    h.lopsided().await;

    let first = h
        .balancer
        .preview_rebalance(&swarm(), RebalanceOptions::default())
        .await
        .unwrap();
    let second = h
        .balancer
        .preview_rebalance(&swarm(), RebalanceOptions::default())
        .await
        .unwrap();

    assert_eq!(first.moves, second.moves);
    assert_eq!(first.suggested(), 3);
    assert_eq!(first.requested(), 0);
    assert!(h.claims.pending_handoffs().await.unwrap().is_empty());
    assert!((first.new_balance_score - second.new_balance_score).abs() < EPSILON);
}

#[tokio::test]
async fn test_preview_picks_the_same_moves_as_rebalance() {
    let previewed = harness();
    previewed.lopsided().await;
    let applied = harness();
    applied.lopsided().await;

    let preview = previewed
        .balancer
        .preview_rebalance(&swarm(), RebalanceOptions::default())
        .await
        .unwrap();
    let result = applied
        .balancer
        .rebalance(&swarm(), RebalanceOptions::default())
        .await
        .unwrap();

    let targets = |moves: &[RebalanceMove]| {
        moves
            .iter()
            .map(|m| (m.issue_id.clone(), m.to_agent.clone()))
            .collect::<Vec<_>>()
    };
    assert_eq!(targets(&preview.moves), targets(&result.moves));
    assert_eq!(preview.suggested(), result.requested());
    assert!((preview.new_balance_score - result.new_balance_score).abs() < EPSILON);
}

#[tokio::test]
async fn test_refused_handoffs_are_recorded_as_failed() {
    let h = harness_with_handoff(Some(Arc::new(RefusingHandoff)));
    h.lopsided().await;

    let result = h.balancer.rebalance(&swarm(), RebalanceOptions::default()).await.unwrap();
    assert_eq!(result.failed(), 3);
    for m in &result.moves {
        assert_eq!(m.status, MoveStatus::Failed);
        // A refused move leaves the target's capacity free for the next claim.
        assert_eq!(m.to_agent.as_deref(), Some("agent-b"));
        assert!(m.error.as_deref().is_some_and(|e| e.contains("draining")));
    }
    assert!((result.new_balance_score - result.previous_balance_score).abs() < EPSILON);
}

#[tokio::test]
async fn test_moves_without_capacity_are_suggestions() {
    let h = harness();
    let a = h.agent("agent-a", 4);
    h.agent("agent-b", 0);
    h.give(&a, &["issue-1", "issue-2"], IssuePriority::High).await;

    let result = h.balancer.rebalance(&swarm(), RebalanceOptions::default()).await.unwrap();
    assert!(result.moves.iter().all(|m| m.to_agent.is_none()));
    assert!(result.moves.iter().all(|m| m.status == MoveStatus::Suggested));
    assert!(h.claims.pending_handoffs().await.unwrap().is_empty());
}
