// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::claim::{ClaimStatus, IssuePriority, StealableReason};
use crate::domain::claimant::Claimant;

/// Issue-scoped state changes published after each committed write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ClaimEvent {
    IssueClaimed {
        issue_id: String,
        claimant: Claimant,
        priority: IssuePriority,
        expires_at: Option<DateTime<Utc>>,
        claimed_at: DateTime<Utc>,
    },
    IssueReleased {
        issue_id: String,
        claimant: Claimant,
        released_at: DateTime<Utc>,
    },
    HandoffRequested {
        issue_id: String,
        from: Claimant,
        to: Claimant,
        reason: String,
        requested_at: DateTime<Utc>,
    },
    HandoffAccepted {
        issue_id: String,
        from: Claimant,
        to: Claimant,
        accepted_at: DateTime<Utc>,
    },
    HandoffRejected {
        issue_id: String,
        from: Claimant,
        to: Claimant,
        reason: String,
        rejected_at: DateTime<Utc>,
    },
    StatusChanged {
        issue_id: String,
        claimant: Claimant,
        from: ClaimStatus,
        to: ClaimStatus,
        note: Option<String>,
        changed_at: DateTime<Utc>,
    },
    ProgressUpdated {
        issue_id: String,
        claimant: Claimant,
        progress: u8,
        updated_at: DateTime<Utc>,
    },
    ClaimExpired {
        issue_id: String,
        claimant: Claimant,
        expired_at: DateTime<Utc>,
    },
    WorkMarkedStealable {
        issue_id: String,
        owner: Claimant,
        reason: StealableReason,
        stealable_at: DateTime<Utc>,
        marked_at: DateTime<Utc>,
    },
    WorkStolen {
        issue_id: String,
        from: Claimant,
        to: Claimant,
        contest_window_ends: DateTime<Utc>,
        stolen_at: DateTime<Utc>,
    },
    StealContested {
        issue_id: String,
        original_owner: Claimant,
        holder: Claimant,
        reason: String,
        contested_at: DateTime<Utc>,
    },
    StealContestResolved {
        issue_id: String,
        winner: Claimant,
        loser: Claimant,
        resolved_at: DateTime<Utc>,
    },
    StaleWorkDetected {
        count: usize,
        issue_ids: Vec<String>,
        since: DateTime<Utc>,
        detected_at: DateTime<Utc>,
    },
    ProtectionChanged {
        issue_id: String,
        owner: Claimant,
        protected: bool,
        reason: Option<String>,
        changed_at: DateTime<Utc>,
    },
}

impl ClaimEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::IssueClaimed { .. } => "issue:claimed",
            Self::IssueReleased { .. } => "issue:released",
            Self::HandoffRequested { .. } => "issue:handoff:requested",
            Self::HandoffAccepted { .. } => "issue:handoff:accepted",
            Self::HandoffRejected { .. } => "issue:handoff:rejected",
            Self::StatusChanged { .. } => "issue:status:changed",
            Self::ProgressUpdated { .. } => "issue:progress",
            Self::ClaimExpired { .. } => "issue:expired",
            Self::WorkMarkedStealable { .. } => "issue:stealable",
            Self::WorkStolen { .. } => "issue:stolen",
            Self::StealContested { .. } => "issue:steal:contested",
            Self::StealContestResolved { .. } => "issue:steal:resolved",
            Self::StaleWorkDetected { .. } => "issue:stale",
            Self::ProtectionChanged { .. } => "issue:protection:changed",
        }
    }

    /// `None` only for batched events that span several issues.
    pub fn issue_id(&self) -> Option<&str> {
        match self {
            Self::IssueClaimed { issue_id, .. }
            | Self::IssueReleased { issue_id, .. }
            | Self::HandoffRequested { issue_id, .. }
            | Self::HandoffAccepted { issue_id, .. }
            | Self::HandoffRejected { issue_id, .. }
            | Self::StatusChanged { issue_id, .. }
            | Self::ProgressUpdated { issue_id, .. }
            | Self::ClaimExpired { issue_id, .. }
            | Self::WorkMarkedStealable { issue_id, .. }
            | Self::WorkStolen { issue_id, .. }
            | Self::StealContested { issue_id, .. }
            | Self::StealContestResolved { issue_id, .. }
            | Self::ProtectionChanged { issue_id, .. } => Some(issue_id),
            Self::StaleWorkDetected { .. } => None,
        }
    }

    /// Whether the event concerns `issue_id`, including batched events that list it.
    pub fn concerns(&self, issue_id: &str) -> bool {
        match self {
            Self::StaleWorkDetected { issue_ids, .. } => issue_ids.iter().any(|id| id == issue_id),
            other => other.issue_id() == Some(issue_id),
        }
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            Self::IssueClaimed { claimed_at: at, .. }
            | Self::IssueReleased { released_at: at, .. }
            | Self::HandoffRequested { requested_at: at, .. }
            | Self::HandoffAccepted { accepted_at: at, .. }
            | Self::HandoffRejected { rejected_at: at, .. }
            | Self::StatusChanged { changed_at: at, .. }
            | Self::ProgressUpdated { updated_at: at, .. }
            | Self::ClaimExpired { expired_at: at, .. }
            | Self::WorkMarkedStealable { marked_at: at, .. }
            | Self::WorkStolen { stolen_at: at, .. }
            | Self::StealContested { contested_at: at, .. }
            | Self::StealContestResolved { resolved_at: at, .. }
            | Self::StaleWorkDetected { detected_at: at, .. }
            | Self::ProtectionChanged { changed_at: at, .. } => *at,
        }
    }
}

/// Swarm-scoped load events raised by imbalance detection and rebalancing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LoadEvent {
    AgentOverloaded {
        swarm_id: String,
        agent_id: String,
        utilization: f64,
        claim_count: usize,
        excess_claims: usize,
        detected_at: DateTime<Utc>,
    },
    AgentUnderloaded {
        swarm_id: String,
        agent_id: String,
        utilization: f64,
        claim_count: usize,
        available_capacity: usize,
        detected_at: DateTime<Utc>,
    },
    SwarmRebalanced {
        swarm_id: String,
        moves: usize,
        suggestions: usize,
        failed: usize,
        previous_balance_score: f64,
        new_balance_score: f64,
        rebalanced_at: DateTime<Utc>,
    },
}

impl LoadEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::AgentOverloaded { .. } => "agent:overloaded",
            Self::AgentUnderloaded { .. } => "agent:underloaded",
            Self::SwarmRebalanced { .. } => "swarm:rebalanced",
        }
    }

    pub fn swarm_id(&self) -> &str {
        match self {
            Self::AgentOverloaded { swarm_id, .. }
            | Self::AgentUnderloaded { swarm_id, .. }
            | Self::SwarmRebalanced { swarm_id, .. } => swarm_id,
        }
    }
}

/// Append-only audit record persisted by the event store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimEventRecord {
    pub id: Uuid,
    pub event_type: String,
    /// Every issue the event concerns (one, or several for batched events).
    pub issue_ids: Vec<String>,
    pub payload: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
}

impl ClaimEventRecord {
    pub fn from_event(event: &ClaimEvent) -> Result<Self, serde_json::Error> {
        let issue_ids = match event {
            ClaimEvent::StaleWorkDetected { issue_ids, .. } => issue_ids.clone(),
            other => other.issue_id().map(str::to_string).into_iter().collect(),
        };
        Ok(Self {
            id: Uuid::new_v4(),
            event_type: event.event_type().to_string(),
            issue_ids,
            payload: serde_json::to_value(event)?,
            occurred_at: event.occurred_at(),
        })
    }

    pub fn event(&self) -> Result<ClaimEvent, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}
