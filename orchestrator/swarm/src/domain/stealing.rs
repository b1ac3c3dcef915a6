// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Work-Stealing Rules
//!
//! Who may take work from whom, how long a dispossessed owner may object,
//! and who wins when they do.
//!
//! - [`StealingPolicy`]: pluggable rule set consulted by the stealing engine.
//! - [`DefaultStealingPolicy`]: compatibility graph, coordinator override and
//!   human protection, built from [`StealingSettings`].
//! - [`StealEligibility`]: the single predicate shared by `steal` and
//!   `get_stealable`, so listing and taking never disagree.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use workclaim_core::domain::claim::{Claim, ClaimError, StealableReason};
use workclaim_core::domain::claimant::{AgentType, Claimant};
use workclaim_core::domain::coordination_config::StealingSettings;

// ============================================================================
// Requests & Results
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StealableRequest {
    pub reason: StealableReason,
    /// Earliest steal time. `None` means immediately.
    #[serde(default)]
    pub stealable_after: Option<DateTime<Utc>>,
    #[serde(default)]
    pub preferred_types: Vec<AgentType>,
    #[serde(default)]
    pub context: Option<String>,
}

impl StealableRequest {
    pub fn new(reason: StealableReason) -> Self {
        Self {
            reason,
            stealable_after: None,
            preferred_types: Vec::new(),
            context: None,
        }
    }

    pub fn after(mut self, at: DateTime<Utc>) -> Self {
        self.stealable_after = Some(at);
        self
    }

    pub fn preferring(mut self, types: impl IntoIterator<Item = AgentType>) -> Self {
        self.preferred_types = types.into_iter().collect();
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StealFilter {
    /// Only claims an agent of this type could steal right now.
    pub thief_type: Option<AgentType>,
    pub exclude_protected: bool,
    pub reason: Option<StealableReason>,
    pub limit: Option<usize>,
}

impl Default for StealFilter {
    fn default() -> Self {
        Self {
            thief_type: None,
            exclude_protected: true,
            reason: None,
            limit: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContestResolution {
    pub issue_id: String,
    pub winner: Claimant,
    pub loser: Claimant,
    /// True when ownership went back to the original owner.
    pub ownership_changed: bool,
    pub resolved_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StealVerdict {
    Allowed,
    Denied(String),
}

// ============================================================================
// Policy
// ============================================================================

pub trait StealingPolicy: Send + Sync {
    fn can_steal(&self, thief: &Claimant, owner: &Claimant, claim: &Claim) -> StealVerdict;

    /// How long the dispossessed owner may contest a steal of `claim`.
    fn contest_window(&self, claim: &Claim) -> Duration;

    /// Returns the claimant that keeps the work.
    fn resolve_contest(&self, original: &Claimant, holder: &Claimant, claim: &Claim) -> Claimant;
}

/// Directed graph of agent types: thief type -> types it may steal from.
#[derive(Debug, Clone, Default)]
pub struct CrossTypeRules {
    edges: BTreeMap<String, BTreeSet<String>>,
    coordinator_type: Option<String>,
}

impl CrossTypeRules {
    pub fn new(coordinator_type: Option<String>) -> Self {
        Self {
            edges: BTreeMap::new(),
            coordinator_type,
        }
    }

    pub fn from_settings(settings: &StealingSettings) -> Self {
        let mut rules = Self::new(Some(settings.coordinator_type.clone()));
        for (thief, victims) in &settings.compatibility {
            for victim in victims {
                rules.allow(thief, victim);
            }
        }
        rules
    }

    pub fn allow(&mut self, thief: &str, victim: &str) {
        self.edges
            .entry(thief.to_string())
            .or_default()
            .insert(victim.to_string());
    }

    /// Same type always; the coordinator type steals from anyone.
    pub fn permits(&self, thief: &AgentType, victim: &AgentType) -> bool {
        if thief == victim {
            return true;
        }
        if self.coordinator_type.as_deref() == Some(thief.as_str()) {
            return true;
        }
        self.edges
            .get(thief.as_str())
            .is_some_and(|victims| victims.contains(victim.as_str()))
    }
}

#[derive(Debug, Clone)]
pub struct DefaultStealingPolicy {
    rules: CrossTypeRules,
    protect_human_claims: bool,
    contest_window: Duration,
}

impl DefaultStealingPolicy {
    pub fn new(rules: CrossTypeRules, protect_human_claims: bool, contest_window: Duration) -> Self {
        Self {
            rules,
            protect_human_claims,
            contest_window,
        }
    }

    pub fn from_settings(settings: &StealingSettings) -> Self {
        Self::new(
            CrossTypeRules::from_settings(settings),
            settings.protect_human_claims,
            Duration::from_std(settings.contest_window).unwrap_or_else(|_| Duration::minutes(5)),
        )
    }
}

impl Default for DefaultStealingPolicy {
    fn default() -> Self {
        Self::from_settings(&StealingSettings::default())
    }
}

impl StealingPolicy for DefaultStealingPolicy {
    fn can_steal(&self, thief: &Claimant, owner: &Claimant, _claim: &Claim) -> StealVerdict {
        match (thief.agent_type(), owner.agent_type()) {
            // Humans may take work from anyone.
            (None, _) => StealVerdict::Allowed,
            (Some(_), None) if self.protect_human_claims => {
                StealVerdict::Denied("agents may not steal work claimed by humans".to_string())
            }
            (Some(_), None) => StealVerdict::Allowed,
            (Some(thief_type), Some(owner_type)) => {
                if self.rules.permits(thief_type, owner_type) {
                    StealVerdict::Allowed
                } else {
                    StealVerdict::Denied(format!(
                        "agent type {} may not steal from agent type {}",
                        thief_type, owner_type
                    ))
                }
            }
        }
    }

    fn contest_window(&self, _claim: &Claim) -> Duration {
        self.contest_window
    }

    fn resolve_contest(&self, original: &Claimant, holder: &Claimant, claim: &Claim) -> Claimant {
        if original.is_human() && self.protect_human_claims {
            return original.clone();
        }
        let progress_at_steal = claim.contest().map_or(0, |window| window.progress_at_steal);
        if claim.progress() <= progress_at_steal {
            original.clone()
        } else {
            holder.clone()
        }
    }
}

// ============================================================================
// Eligibility
// ============================================================================

/// Steal gates in their fixed order. The first failure wins.
pub struct StealEligibility<'a> {
    policy: &'a dyn StealingPolicy,
    now: DateTime<Utc>,
}

impl<'a> StealEligibility<'a> {
    pub fn new(policy: &'a dyn StealingPolicy, now: DateTime<Utc>) -> Self {
        Self { policy, now }
    }

    /// Protection, stealable flag, stealable time, self-steal, then
    /// [`StealEligibility::check_thief`].
    pub fn check(&self, claim: &Claim, thief: &Claimant) -> Result<(), ClaimError> {
        claim.check_stealable(self.now)?;
        if claim.is_owned_by(thief) {
            return Err(ClaimError::NotStealable {
                issue_id: claim.issue_id.clone(),
                reason: format!("{} already owns it", thief),
            });
        }
        self.check_thief(claim, thief)
    }

    /// Preferred agent types, then the policy. Humans are not bound by the
    /// preferred-type list.
    pub fn check_thief(&self, claim: &Claim, thief: &Claimant) -> Result<(), ClaimError> {
        let owner = claim.claimant();
        let denied = |reason: String| ClaimError::CrossTypeStealDenied {
            issue_id: claim.issue_id.clone(),
            thief: thief.clone(),
            owner: owner.clone(),
            reason,
        };

        if let (Some(info), Some(thief_type)) = (claim.stealable(), thief.agent_type()) {
            if !info.preferred_types.is_empty() && !info.preferred_types.contains(thief_type) {
                return Err(denied(format!("agent type {} is not among the preferred types", thief_type)));
            }
        }

        match self.policy.can_steal(thief, owner, claim) {
            StealVerdict::Allowed => Ok(()),
            StealVerdict::Denied(reason) => Err(denied(reason)),
        }
    }

    /// Whether an agent of `thief_type` that does not already own the claim
    /// could steal it now.
    pub fn allows_type(&self, claim: &Claim, thief_type: &AgentType) -> bool {
        let candidate = Claimant::agent(format!("{}:candidate", thief_type), thief_type.clone());
        claim.check_stealable(self.now).is_ok() && self.check_thief(claim, &candidate).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use workclaim_core::domain::claim::{IssuePriority, StealableInfo};

    fn claim_owned_by(owner: Claimant) -> Claim {
        Claim::new("issue-1", owner, IssuePriority::Medium, Utc::now(), None)
    }

    #[test]
    fn test_default_compatibility_graph() {
        let policy = DefaultStealingPolicy::default();
        let claim = claim_owned_by(Claimant::agent("a-1", "coder"));
        let owner = claim.claimant().clone();

        let debugger = Claimant::agent("a-2", "debugger");
        let tester = Claimant::agent("a-3", "tester");
        let coordinator = Claimant::agent("a-4", "coordinator");
        let coder = Claimant::agent("a-5", "coder");

        assert_eq!(policy.can_steal(&debugger, &owner, &claim), StealVerdict::Allowed);
        assert_eq!(policy.can_steal(&coordinator, &owner, &claim), StealVerdict::Allowed);
        assert_eq!(policy.can_steal(&coder, &owner, &claim), StealVerdict::Allowed);
        assert!(matches!(policy.can_steal(&tester, &owner, &claim), StealVerdict::Denied(_)));
    }

    #[test]
    fn test_human_claims_protected_from_agents_only() {
        let policy = DefaultStealingPolicy::default();
        let claim = claim_owned_by(Claimant::human("u-1", "Ada"));
        let owner = claim.claimant().clone();

        assert!(matches!(
            policy.can_steal(&Claimant::agent("a-1", "coordinator"), &owner, &claim),
            StealVerdict::Denied(_)
        ));
        assert_eq!(
            policy.can_steal(&Claimant::human("u-2", "Lin"), &owner, &claim),
            StealVerdict::Allowed
        );
    }

    #[test]
    fn test_contest_goes_back_when_holder_made_no_progress() {
        let policy = DefaultStealingPolicy::default();
        let now = Utc::now();
        let original = Claimant::agent("a-1", "coder");
        let holder = Claimant::agent("a-2", "coder");
        let mut claim = claim_owned_by(original.clone());
        claim.set_progress(30, now);
        claim.transfer_by_steal(holder.clone(), now, now + Duration::minutes(5), None);

        assert_eq!(policy.resolve_contest(&original, &holder, &claim), original);

        claim.set_progress(45, now);
        assert_eq!(policy.resolve_contest(&original, &holder, &claim), holder);
    }

    #[test]
    fn test_preferred_types_restrict_agents() {
        let policy = DefaultStealingPolicy::default();
        let now = Utc::now();
        let mut claim = claim_owned_by(Claimant::agent("a-1", "coder"));
        claim.mark_stealable(
            StealableInfo {
                reason: StealableReason::Overloaded,
                stealable_at: now,
                preferred_types: vec![AgentType::from("debugger")],
                progress: 0,
                context: None,
            },
            now,
        );

        let eligibility = StealEligibility::new(&policy, now);
        assert!(eligibility.check(&claim, &Claimant::agent("a-2", "debugger")).is_ok());
        let err = eligibility
            .check(&claim, &Claimant::agent("a-3", "coder"))
            .unwrap_err();
        assert!(matches!(err, ClaimError::CrossTypeStealDenied { .. }));
        assert!(eligibility.check(&claim, &Claimant::human("u-1", "Ada")).is_ok());
        assert!(eligibility.allows_type(&claim, &AgentType::from("debugger")));
        assert!(!eligibility.allows_type(&claim, &AgentType::from("tester")));
    }

    #[test]
    fn test_self_steal_is_not_stealable() {
        let policy = DefaultStealingPolicy::default();
        let now = Utc::now();
        let owner = Claimant::agent("a-1", "coder");
        let mut claim = claim_owned_by(owner.clone());
        claim.mark_stealable(
            StealableInfo {
                reason: StealableReason::Voluntary,
                stealable_at: now,
                preferred_types: vec![],
                progress: 0,
                context: None,
            },
            now,
        );
        let err = StealEligibility::new(&policy, now).check(&claim, &owner).unwrap_err();
        assert!(matches!(err, ClaimError::NotStealable { .. }));
    }
}
