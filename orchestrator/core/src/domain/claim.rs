// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Claim Aggregate
//!
//! A [`Claim`] is the ownership record for one issue. At most one live claim
//! exists per issue id; every ownership change is a single replace of the
//! `claimant` field performed by one of the aggregate methods below, after
//! all of that method's preconditions have been checked.
//!
//! ## Status Machine
//!
//! | from | allowed to |
//! |------|-----------|
//! | `active` | `pending_handoff`, `released`, `expired`, `blocked`, `review-requested` |
//! | `pending_handoff` | `active`, `released` |
//! | `expired` | `active` |
//! | `released` | terminal |
//!
//! Statuses without a row have no outgoing transitions; they leave the store
//! through `release`, which deletes the claim outright.
//!
//! ## Metadata
//!
//! Handoff, stealability, protection, contest and staleness are explicit
//! optional value objects rather than loose fields. Their invariants:
//!
//! - `handoff` is present iff `status == PendingHandoff`
//! - `protection` and `stealable` are never both present
//! - `contest` only exists after a steal and is dropped once it lapses or resolves

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::domain::claimant::{AgentType, Claimant};
use crate::domain::repository::RepositoryError;

pub const MAX_PROGRESS: u8 = 100;

// ============================================================================
// Value Objects
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimStatus {
    Active,
    Paused,
    PendingHandoff,
    #[serde(rename = "review-requested")]
    ReviewRequested,
    Blocked,
    Stealable,
    Completed,
    Released,
    Expired,
}

impl ClaimStatus {
    pub const ALL: [ClaimStatus; 9] = [
        ClaimStatus::Active,
        ClaimStatus::Paused,
        ClaimStatus::PendingHandoff,
        ClaimStatus::ReviewRequested,
        ClaimStatus::Blocked,
        ClaimStatus::Stealable,
        ClaimStatus::Completed,
        ClaimStatus::Released,
        ClaimStatus::Expired,
    ];

    /// The canonical transition table. Every status change in the engine is
    /// checked against this function and nothing else.
    pub fn can_transition_to(self, to: ClaimStatus) -> bool {
        use ClaimStatus::*;
        matches!(
            (self, to),
            (Active, PendingHandoff)
                | (Active, Released)
                | (Active, Expired)
                | (Active, Blocked)
                | (Active, ReviewRequested)
                | (PendingHandoff, Active)
                | (PendingHandoff, Released)
                | (Expired, Active)
        )
    }

    /// A claim in one of these statuses may be replaced by a fresh `claim` call.
    pub fn is_vacated(self) -> bool {
        matches!(self, ClaimStatus::Released | ClaimStatus::Stealable)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ClaimStatus::Released)
    }
}

impl fmt::Display for ClaimStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Active => "active",
            Self::Paused => "paused",
            Self::PendingHandoff => "handoff-pending",
            Self::ReviewRequested => "review-requested",
            Self::Blocked => "blocked",
            Self::Stealable => "stealable",
            Self::Completed => "completed",
            Self::Released => "released",
            Self::Expired => "expired",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssuePriority {
    Critical,
    High,
    #[default]
    Medium,
    Low,
}

impl fmt::Display for IssuePriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandoffRequest {
    pub target: Claimant,
    pub reason: String,
    pub requested_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StealableReason {
    Overloaded,
    Stale,
    BlockedTimeout,
    Voluntary,
}

impl fmt::Display for StealableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Overloaded => "overloaded",
            Self::Stale => "stale",
            Self::BlockedTimeout => "blocked-timeout",
            Self::Voluntary => "voluntary",
        };
        write!(f, "{}", name)
    }
}

/// Attached when a claim is opened for stealing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StealableInfo {
    pub reason: StealableReason,
    pub stealable_at: DateTime<Utc>,
    /// Agent types allowed to take the work. Empty means no preference.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub preferred_types: Vec<AgentType>,
    /// Progress at the moment the claim was opened.
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StealProtection {
    pub reason: String,
    pub protected_at: DateTime<Utc>,
}

/// Window after a steal during which the dispossessed owner may contest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContestWindow {
    pub original_owner: Claimant,
    pub opened_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub progress_at_steal: u8,
}

impl ContestWindow {
    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        now < self.ends_at
    }
}

/// Observational marker left by stale-work detection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaleMarker {
    pub since: DateTime<Utc>,
    pub reason: String,
    pub detected_at: DateTime<Utc>,
}

// ============================================================================
// Errors & Outcomes
// ============================================================================

#[derive(Debug, Error)]
pub enum ClaimError {
    #[error("No claim exists for issue {issue_id}")]
    NotFound { issue_id: String },

    #[error("Issue {issue_id} is already claimed by {holder}")]
    AlreadyClaimed { issue_id: String, holder: Claimant },

    #[error("{caller} does not own issue {issue_id} (owner: {owner})")]
    NotOwner {
        issue_id: String,
        caller: Claimant,
        owner: Claimant,
    },

    #[error("Invalid status transition for issue {issue_id}: {from} -> {to}")]
    InvalidTransition {
        issue_id: String,
        from: ClaimStatus,
        to: ClaimStatus,
    },

    #[error("{caller} is not the handoff target for issue {issue_id} (expected {expected})")]
    NotHandoffTarget {
        issue_id: String,
        caller: Claimant,
        expected: Claimant,
    },

    #[error("Contest window for issue {issue_id} is closed")]
    ContestWindowExpired {
        issue_id: String,
        ended_at: Option<DateTime<Utc>>,
    },

    #[error("Issue {issue_id} is protected from stealing: {reason}")]
    ProtectedClaim { issue_id: String, reason: String },

    #[error("Issue {issue_id} is not stealable: {reason}")]
    NotStealable { issue_id: String, reason: String },

    #[error("Issue {issue_id} is not stealable until {stealable_at}")]
    NotYetStealable {
        issue_id: String,
        stealable_at: DateTime<Utc>,
    },

    #[error("{thief} may not steal issue {issue_id} from {owner}: {reason}")]
    CrossTypeStealDenied {
        issue_id: String,
        thief: Claimant,
        owner: Claimant,
        reason: String,
    },

    #[error("Validation failed for issue {issue_id}: {reason}")]
    ValidationFailed { issue_id: String, reason: String },

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl ClaimError {
    /// Business outcomes callers are expected to branch on, as opposed to
    /// protocol violations that indicate the caller lost track of state.
    pub fn is_soft(&self) -> bool {
        matches!(
            self,
            Self::NotHandoffTarget { .. }
                | Self::ContestWindowExpired { .. }
                | Self::ProtectedClaim { .. }
                | Self::NotStealable { .. }
                | Self::NotYetStealable { .. }
                | Self::CrossTypeStealDenied { .. }
                | Self::ValidationFailed { .. }
        )
    }

    pub fn not_found(issue_id: &str) -> Self {
        Self::NotFound {
            issue_id: issue_id.to_string(),
        }
    }
}

/// Result of an operation whose failures are a normal part of operation.
///
/// Hard failures travel in the surrounding `Result`; an `Outcome` is either
/// the applied value or the soft rejection that left the store untouched.
#[must_use]
#[derive(Debug)]
pub enum Outcome<T> {
    Completed(T),
    Rejected(ClaimError),
}

impl<T> Outcome<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Completed(value) => Some(value),
            Self::Rejected(_) => None,
        }
    }

    pub fn into_value(self) -> Option<T> {
        match self {
            Self::Completed(value) => Some(value),
            Self::Rejected(_) => None,
        }
    }

    pub fn rejection(&self) -> Option<&ClaimError> {
        match self {
            Self::Completed(_) => None,
            Self::Rejected(err) => Some(err),
        }
    }

    pub fn into_result(self) -> Result<T, ClaimError> {
        match self {
            Self::Completed(value) => Ok(value),
            Self::Rejected(err) => Err(err),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Self::Completed(value) => Outcome::Completed(f(value)),
            Self::Rejected(err) => Outcome::Rejected(err),
        }
    }

    /// Route a precondition result: soft errors become a rejection, hard
    /// errors stay in the outer `Result`.
    pub fn from_checked(result: Result<T, ClaimError>) -> Result<Outcome<T>, ClaimError> {
        match result {
            Ok(value) => Ok(Outcome::Completed(value)),
            Err(err) if err.is_soft() => Ok(Outcome::Rejected(err)),
            Err(err) => Err(err),
        }
    }
}

// ============================================================================
// Aggregate
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claim {
    pub issue_id: String,
    claimant: Claimant,
    status: ClaimStatus,
    pub priority: IssuePriority,
    claimed_at: DateTime<Utc>,
    status_changed_at: DateTime<Utc>,
    last_activity_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    blocked_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    review_requested_from: Vec<Claimant>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    handoff: Option<HandoffRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    stealable: Option<StealableInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    protection: Option<StealProtection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    contest: Option<ContestWindow>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    stale: Option<StaleMarker>,
}

impl Claim {
    pub fn new(
        issue_id: impl Into<String>,
        claimant: Claimant,
        priority: IssuePriority,
        now: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            issue_id: issue_id.into(),
            claimant,
            status: ClaimStatus::Active,
            priority,
            claimed_at: now,
            status_changed_at: now,
            last_activity_at: now,
            expires_at,
            progress: 0,
            blocked_reason: None,
            review_requested_from: Vec::new(),
            handoff: None,
            stealable: None,
            protection: None,
            contest: None,
            stale: None,
        }
    }

    pub fn claimant(&self) -> &Claimant {
        &self.claimant
    }

    pub fn status(&self) -> ClaimStatus {
        self.status
    }

    pub fn claimed_at(&self) -> DateTime<Utc> {
        self.claimed_at
    }

    pub fn status_changed_at(&self) -> DateTime<Utc> {
        self.status_changed_at
    }

    pub fn last_activity_at(&self) -> DateTime<Utc> {
        self.last_activity_at
    }

    pub fn progress(&self) -> u8 {
        self.progress
    }

    pub fn blocked_reason(&self) -> Option<&str> {
        self.blocked_reason.as_deref()
    }

    pub fn review_requested_from(&self) -> &[Claimant] {
        &self.review_requested_from
    }

    pub fn handoff(&self) -> Option<&HandoffRequest> {
        self.handoff.as_ref()
    }

    pub fn stealable(&self) -> Option<&StealableInfo> {
        self.stealable.as_ref()
    }

    pub fn is_stealable(&self) -> bool {
        self.stealable.is_some()
    }

    pub fn protection(&self) -> Option<&StealProtection> {
        self.protection.as_ref()
    }

    pub fn is_protected(&self) -> bool {
        self.protection.is_some()
    }

    /// The stored contest window, open or not.
    pub fn contest(&self) -> Option<&ContestWindow> {
        self.contest.as_ref()
    }

    /// The contest window if it is still open at `now`.
    pub fn active_contest(&self, now: DateTime<Utc>) -> Option<&ContestWindow> {
        self.contest.as_ref().filter(|window| window.is_open(now))
    }

    pub fn stale(&self) -> Option<&StaleMarker> {
        self.stale.as_ref()
    }

    pub fn is_live(&self) -> bool {
        !self.status.is_terminal()
    }

    pub fn is_owned_by(&self, claimant: &Claimant) -> bool {
        &self.claimant == claimant
    }

    pub fn ensure_owner(&self, caller: &Claimant) -> Result<(), ClaimError> {
        if self.is_owned_by(caller) {
            Ok(())
        } else {
            Err(ClaimError::NotOwner {
                issue_id: self.issue_id.clone(),
                caller: caller.clone(),
                owner: self.claimant.clone(),
            })
        }
    }

    /// Structural invariants over the optional metadata.
    pub fn invariants_hold(&self) -> bool {
        let handoff_matches_status =
            self.handoff.is_some() == (self.status == ClaimStatus::PendingHandoff);
        let protection_excludes_stealable = !(self.protection.is_some() && self.stealable.is_some());
        handoff_matches_status && protection_excludes_stealable && self.progress <= MAX_PROGRESS
    }

    fn invalid_transition(&self, to: ClaimStatus) -> ClaimError {
        ClaimError::InvalidTransition {
            issue_id: self.issue_id.clone(),
            from: self.status,
            to,
        }
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.last_activity_at = now;
        self.stale = None;
        if self.contest.as_ref().is_some_and(|window| !window.is_open(now)) {
            self.contest = None;
        }
    }

    fn set_status(&mut self, to: ClaimStatus, now: DateTime<Utc>) {
        self.blocked_reason = None;
        if to != ClaimStatus::ReviewRequested {
            self.review_requested_from.clear();
        }
        if to != ClaimStatus::PendingHandoff {
            self.handoff = None;
        }
        if to.is_terminal() {
            self.stealable = None;
            self.contest = None;
        }
        self.status = to;
        self.status_changed_at = now;
        self.touch(now);
    }

    /// Table-checked status change. `pending_handoff` is only reachable via
    /// [`Claim::request_handoff`] because it needs a target.
    pub fn transition_to(
        &mut self,
        to: ClaimStatus,
        note: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<ClaimStatus, ClaimError> {
        if to == ClaimStatus::PendingHandoff || !self.status.can_transition_to(to) {
            return Err(self.invalid_transition(to));
        }
        let from = self.status;
        self.set_status(to, now);
        if to == ClaimStatus::Blocked {
            self.blocked_reason = note;
        }
        Ok(from)
    }

    /// `expired -> active`, with a fresh expiry for the current owner.
    pub fn reactivate(
        &mut self,
        now: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<(), ClaimError> {
        if self.status != ClaimStatus::Expired {
            return Err(self.invalid_transition(ClaimStatus::Active));
        }
        self.set_status(ClaimStatus::Active, now);
        self.expires_at = expires_at;
        Ok(())
    }

    pub fn request_review(
        &mut self,
        reviewers: Vec<Claimant>,
        now: DateTime<Utc>,
    ) -> Result<(), ClaimError> {
        self.transition_to(ClaimStatus::ReviewRequested, None, now)?;
        self.review_requested_from = reviewers;
        Ok(())
    }

    pub fn request_handoff(
        &mut self,
        target: Claimant,
        reason: String,
        now: DateTime<Utc>,
    ) -> Result<(), ClaimError> {
        if !self.status.can_transition_to(ClaimStatus::PendingHandoff) {
            return Err(self.invalid_transition(ClaimStatus::PendingHandoff));
        }
        self.set_status(ClaimStatus::PendingHandoff, now);
        self.handoff = Some(HandoffRequest {
            target,
            reason,
            requested_at: now,
        });
        Ok(())
    }

    fn pending_handoff_for(&self, caller: &Claimant) -> Result<&HandoffRequest, ClaimError> {
        let handoff = match (&self.handoff, self.status) {
            (Some(handoff), ClaimStatus::PendingHandoff) => handoff,
            _ => return Err(self.invalid_transition(ClaimStatus::Active)),
        };
        if &handoff.target != caller {
            return Err(ClaimError::NotHandoffTarget {
                issue_id: self.issue_id.clone(),
                caller: caller.clone(),
                expected: handoff.target.clone(),
            });
        }
        Ok(handoff)
    }

    /// Completes a pending handoff. Returns the previous owner.
    pub fn accept_handoff(
        &mut self,
        accepting: &Claimant,
        now: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<Claimant, ClaimError> {
        self.pending_handoff_for(accepting)?;
        let previous = std::mem::replace(&mut self.claimant, accepting.clone());
        self.set_status(ClaimStatus::Active, now);
        self.claimed_at = now;
        self.expires_at = expires_at;
        self.stealable = None;
        self.contest = None;
        self.stale = None;
        Ok(previous)
    }

    /// Cancels a pending handoff, leaving the original owner in place.
    pub fn reject_handoff(
        &mut self,
        rejecting: &Claimant,
        now: DateTime<Utc>,
    ) -> Result<HandoffRequest, ClaimError> {
        let request = self.pending_handoff_for(rejecting)?.clone();
        self.set_status(ClaimStatus::Active, now);
        Ok(request)
    }

    /// Clamps to `[0, 100]` and returns the stored value.
    pub fn set_progress(&mut self, progress: i32, now: DateTime<Utc>) -> u8 {
        self.progress = progress.clamp(0, MAX_PROGRESS as i32) as u8;
        self.touch(now);
        self.progress
    }

    pub fn mark_stealable(&mut self, info: StealableInfo, now: DateTime<Utc>) {
        self.protection = None;
        self.stealable = Some(info);
        self.touch(now);
    }

    /// Steal gates owned by the claim itself, in order: liveness, protection,
    /// flag, time.
    pub fn check_stealable(&self, now: DateTime<Utc>) -> Result<&StealableInfo, ClaimError> {
        if !self.is_live() {
            return Err(ClaimError::NotStealable {
                issue_id: self.issue_id.clone(),
                reason: format!("claim is {}", self.status),
            });
        }
        if let Some(protection) = &self.protection {
            return Err(ClaimError::ProtectedClaim {
                issue_id: self.issue_id.clone(),
                reason: protection.reason.clone(),
            });
        }
        let info = self.stealable.as_ref().ok_or_else(|| ClaimError::NotStealable {
            issue_id: self.issue_id.clone(),
            reason: "claim has not been marked stealable".to_string(),
        })?;
        if now < info.stealable_at {
            return Err(ClaimError::NotYetStealable {
                issue_id: self.issue_id.clone(),
                stealable_at: info.stealable_at,
            });
        }
        Ok(info)
    }

    /// Replaces the owner after a successful steal and opens the contest
    /// window. Returns the dispossessed owner.
    pub fn transfer_by_steal(
        &mut self,
        thief: Claimant,
        now: DateTime<Utc>,
        contest_ends_at: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Claimant {
        let previous = std::mem::replace(&mut self.claimant, thief);
        if self.status != ClaimStatus::Active {
            self.set_status(ClaimStatus::Active, now);
        }
        self.touch(now);
        self.claimed_at = now;
        self.expires_at = expires_at;
        self.stealable = None;
        self.stale = None;
        self.contest = Some(ContestWindow {
            original_owner: previous.clone(),
            opened_at: now,
            ends_at: contest_ends_at,
            progress_at_steal: self.progress,
        });
        previous
    }

    /// Closes the contest window, restoring `winner` if it is not the current
    /// holder. Returns whether ownership changed.
    pub fn settle_contest(
        &mut self,
        winner: Claimant,
        now: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
    ) -> bool {
        self.contest = None;
        let changed = self.claimant != winner;
        if changed {
            self.claimant = winner;
            self.claimed_at = now;
            self.expires_at = expires_at;
        }
        self.touch(now);
        changed
    }

    pub fn set_protection(&mut self, reason: String, now: DateTime<Utc>) {
        self.stealable = None;
        self.protection = Some(StealProtection {
            reason,
            protected_at: now,
        });
        self.touch(now);
    }

    /// Returns whether a protection was present.
    pub fn remove_protection(&mut self, now: DateTime<Utc>) -> bool {
        let had = self.protection.take().is_some();
        self.touch(now);
        had
    }

    /// Detection is observational: it does not touch the activity timestamp,
    /// otherwise a stale claim would stop looking stale.
    pub fn mark_stale(&mut self, since: DateTime<Utc>, reason: String, now: DateTime<Utc>) {
        self.stale = Some(StaleMarker {
            since,
            reason,
            detected_at: now,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn agent(id: &str) -> Claimant {
        Claimant::agent(id, "coder")
    }

    fn new_claim(now: DateTime<Utc>) -> Claim {
        Claim::new("issue-1", agent("agent-a"), IssuePriority::Medium, now, None)
    }

    #[test]
    fn test_transition_table_closure() {
        let allowed = [
            (ClaimStatus::Active, ClaimStatus::PendingHandoff),
            (ClaimStatus::Active, ClaimStatus::Released),
            (ClaimStatus::Active, ClaimStatus::Expired),
            (ClaimStatus::Active, ClaimStatus::Blocked),
            (ClaimStatus::Active, ClaimStatus::ReviewRequested),
            (ClaimStatus::PendingHandoff, ClaimStatus::Active),
            (ClaimStatus::PendingHandoff, ClaimStatus::Released),
            (ClaimStatus::Expired, ClaimStatus::Active),
        ];
        for from in ClaimStatus::ALL {
            for to in ClaimStatus::ALL {
                assert_eq!(
                    from.can_transition_to(to),
                    allowed.contains(&(from, to)),
                    "{} -> {}",
                    from,
                    to
                );
            }
        }
    }

    #[test]
    fn test_invalid_transition_leaves_claim_untouched() {
        let now = Utc::now();
        let mut claim = new_claim(now);
        claim.transition_to(ClaimStatus::Released, None, now).unwrap();
        let snapshot = claim.clone();

        let err = claim
            .transition_to(ClaimStatus::Active, None, now + Duration::seconds(1))
            .unwrap_err();
        assert!(matches!(
            err,
            ClaimError::InvalidTransition { from: ClaimStatus::Released, to: ClaimStatus::Active, .. }
        ));
        assert!(err.to_string().contains("released -> active"));
        assert_eq!(claim, snapshot);
    }

    #[test]
    fn test_pending_handoff_requires_target() {
        let now = Utc::now();
        let mut claim = new_claim(now);
        assert!(claim.transition_to(ClaimStatus::PendingHandoff, None, now).is_err());
        assert_eq!(claim.status(), ClaimStatus::Active);
    }

    #[test]
    fn test_handoff_round_trips_preserve_invariants() {
        let now = Utc::now();
        let mut claim = new_claim(now);
        let target = agent("agent-b");

        claim.request_handoff(target.clone(), "shift change".into(), now).unwrap();
        assert!(claim.invariants_hold());
        assert_eq!(claim.status(), ClaimStatus::PendingHandoff);

        let wrong = agent("agent-c");
        let err = claim.accept_handoff(&wrong, now, None).unwrap_err();
        assert!(err.is_soft());

        claim.reject_handoff(&target, now).unwrap();
        assert_eq!(claim.claimant(), &agent("agent-a"));
        assert!(claim.handoff().is_none());
        assert!(claim.invariants_hold());

        claim.request_handoff(target.clone(), "again".into(), now).unwrap();
        let previous = claim.accept_handoff(&target, now, None).unwrap();
        assert_eq!(previous, agent("agent-a"));
        assert_eq!(claim.claimant(), &target);
        assert!(claim.handoff().is_none());
        assert!(claim.invariants_hold());
    }

    #[test]
    fn test_progress_is_clamped() {
        let now = Utc::now();
        let mut claim = new_claim(now);
        assert_eq!(claim.set_progress(150, now), 100);
        assert_eq!(claim.set_progress(-20, now), 0);
        assert_eq!(claim.set_progress(42, now), 42);
    }

    #[test]
    fn test_protection_precedes_stealable_flag() {
        let now = Utc::now();
        let mut claim = new_claim(now);
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
        claim.set_protection("release candidate".into(), now);
        assert!(!claim.is_stealable());
        assert!(claim.invariants_hold());

        let err = claim.check_stealable(now).unwrap_err();
        assert!(matches!(err, ClaimError::ProtectedClaim { ref reason, .. } if reason == "release candidate"));
    }

    #[test]
    fn test_release_drops_steal_metadata() {
        let now = Utc::now();
        let mut claim = new_claim(now);
        claim.mark_stealable(
            StealableInfo {
                reason: StealableReason::Overloaded,
                stealable_at: now,
                preferred_types: vec![],
                progress: 0,
                context: None,
            },
            now,
        );
        claim.transition_to(ClaimStatus::Released, None, now).unwrap();
        assert!(!claim.is_stealable());
        assert!(claim.contest().is_none());

        let err = claim.check_stealable(now).unwrap_err();
        assert!(matches!(err, ClaimError::NotStealable { ref reason, .. } if reason == "claim is released"));
    }

    #[test]
    fn test_lapsed_contest_cleared_on_next_mutation() {
        let now = Utc::now();
        let mut claim = new_claim(now);
        claim.transfer_by_steal(agent("agent-b"), now, now + Duration::minutes(5), None);
        assert!(claim.active_contest(now).is_some());

        let later = now + Duration::minutes(6);
        assert!(claim.active_contest(later).is_none());
        assert!(claim.contest().is_some());

        claim.set_progress(10, later);
        assert!(claim.contest().is_none());
    }
}
