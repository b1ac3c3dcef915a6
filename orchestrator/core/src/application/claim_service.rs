// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Claim Engine Application Service
//!
//! Owns the claim lifecycle: claim, release, handoff, status transitions,
//! progress and expiry. Every mutation follows the same sequence under the
//! per-issue lock:
//!
//! 1. read the claim through the repository
//! 2. run every precondition (no writes yet)
//! 3. mutate through the aggregate and write it back
//! 4. publish the event, only once the write succeeded
//!
//! Hard failures come back as `Err(ClaimError)`; soft business rejections as
//! `Ok(Outcome::Rejected(..))` and leave the store untouched.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::domain::claim::{Claim, ClaimError, ClaimStatus, IssuePriority, Outcome};
use crate::domain::claimant::{Claimant, ClaimantKind};
use crate::domain::clock::Clock;
use crate::domain::coordination_config::CoordinationConfig;
use crate::domain::events::ClaimEvent;
use crate::domain::policy::{ClaimValidator, ClaimantExpirationPolicy, ExpirationPolicy, PermissiveValidator};
use crate::domain::repository::{ClaimEventStore, ClaimRepository};
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::issue_locks::IssueLockManager;

// ============================================================================
// Results
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct ExpirationReport {
    pub count: usize,
    pub claims: Vec<Claim>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ClaimStatistics {
    pub total: usize,
    pub by_status: HashMap<ClaimStatus, usize>,
    pub human_claims: usize,
    pub agent_claims: usize,
    pub stealable: usize,
    pub pending_handoffs: usize,
}

// ============================================================================
// Service Interfaces
// ============================================================================

/// Ownership transfer initiation. The load balancer moves work only through
/// this interface.
#[async_trait]
pub trait HandoffService: Send + Sync {
    /// `from` must own the claim and the claim must be `active`. Sets
    /// `pending_handoff`; ownership does not change until the target accepts.
    async fn request_handoff(
        &self,
        issue_id: &str,
        from: &Claimant,
        to: &Claimant,
        reason: &str,
    ) -> Result<Outcome<Claim>, ClaimError>;
}

#[async_trait]
pub trait ClaimService: HandoffService {
    async fn claim(&self, issue_id: &str, claimant: Claimant) -> Result<Outcome<Claim>, ClaimError>;

    async fn claim_with_priority(
        &self,
        issue_id: &str,
        claimant: Claimant,
        priority: IssuePriority,
    ) -> Result<Outcome<Claim>, ClaimError>;

    /// Deletes the claim. Returns it as it was before removal.
    async fn release(&self, issue_id: &str, claimant: &Claimant) -> Result<Claim, ClaimError>;

    async fn accept_handoff(&self, issue_id: &str, accepting: &Claimant) -> Result<Outcome<Claim>, ClaimError>;

    async fn reject_handoff(
        &self,
        issue_id: &str,
        rejecting: &Claimant,
        reason: &str,
    ) -> Result<Outcome<Claim>, ClaimError>;

    async fn update_status(
        &self,
        issue_id: &str,
        caller: &Claimant,
        to: ClaimStatus,
        note: Option<String>,
    ) -> Result<Claim, ClaimError>;

    /// Clamped to `[0, 100]`.
    async fn update_progress(&self, issue_id: &str, progress: i32) -> Result<Claim, ClaimError>;

    async fn expire_stale(&self, cutoff: DateTime<Utc>) -> Result<ExpirationReport, ClaimError>;

    async fn request_review(
        &self,
        issue_id: &str,
        owner: &Claimant,
        reviewers: Vec<Claimant>,
    ) -> Result<Claim, ClaimError>;

    async fn get_claim(&self, issue_id: &str) -> Result<Option<Claim>, ClaimError>;

    async fn claims_by_claimant(&self, claimant: &Claimant) -> Result<Vec<Claim>, ClaimError>;

    async fn pending_handoffs(&self) -> Result<Vec<Claim>, ClaimError>;

    /// Recorded events for one issue, oldest first. Empty without an event store.
    async fn claim_history(&self, issue_id: &str) -> Result<Vec<ClaimEvent>, ClaimError>;

    async fn statistics(&self) -> Result<ClaimStatistics, ClaimError>;
}

// ============================================================================
// Standard Implementation
// ============================================================================

pub struct StandardClaimService {
    repository: Arc<dyn ClaimRepository>,
    event_bus: Arc<EventBus>,
    clock: Arc<dyn Clock>,
    locks: IssueLockManager,
    validator: Arc<dyn ClaimValidator>,
    expiration: Arc<dyn ExpirationPolicy>,
    event_store: Option<Arc<dyn ClaimEventStore>>,
}

impl StandardClaimService {
    pub fn new(
        repository: Arc<dyn ClaimRepository>,
        event_bus: Arc<EventBus>,
        clock: Arc<dyn Clock>,
        locks: IssueLockManager,
    ) -> Self {
        Self {
            repository,
            event_bus,
            clock,
            locks,
            validator: Arc::new(PermissiveValidator),
            expiration: Arc::new(ClaimantExpirationPolicy::default()),
            event_store: None,
        }
    }

    /// Service wired with the claim lifetimes from `config`.
    pub fn from_config(
        config: &CoordinationConfig,
        repository: Arc<dyn ClaimRepository>,
        event_bus: Arc<EventBus>,
        clock: Arc<dyn Clock>,
        locks: IssueLockManager,
    ) -> Self {
        Self::new(repository, event_bus, clock, locks)
            .with_expiration_policy(Arc::new(ClaimantExpirationPolicy::from_settings(&config.spec.claims)))
    }

    pub fn with_validator(mut self, validator: Arc<dyn ClaimValidator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_expiration_policy(mut self, expiration: Arc<dyn ExpirationPolicy>) -> Self {
        self.expiration = expiration;
        self
    }

    pub fn with_event_store(mut self, event_store: Arc<dyn ClaimEventStore>) -> Self {
        self.event_store = Some(event_store);
        self
    }

    /// The lock manager, for engines that must serialize with this one.
    pub fn lock_manager(&self) -> IssueLockManager {
        self.locks.clone()
    }

    async fn load(&self, issue_id: &str) -> Result<Claim, ClaimError> {
        self.repository
            .find_by_id(issue_id)
            .await?
            .ok_or_else(|| ClaimError::not_found(issue_id))
    }

    async fn commit(&self, claim: &Claim, event: ClaimEvent) -> Result<(), ClaimError> {
        self.repository.update(claim).await?;
        self.event_bus.publish_claim_event(event);
        Ok(())
    }

    async fn claim_inner(
        &self,
        issue_id: &str,
        claimant: Claimant,
        priority: IssuePriority,
    ) -> Result<Outcome<Claim>, ClaimError> {
        let validation = self.validator.validate_claim(issue_id, &claimant);
        if !validation.valid {
            debug!(issue_id = %issue_id, claimant = %claimant, "Claim rejected by validator");
            return Ok(Outcome::Rejected(ClaimError::ValidationFailed {
                issue_id: issue_id.to_string(),
                reason: validation.error.unwrap_or_else(|| "claim rejected".to_string()),
            }));
        }

        let _guard = self.locks.lock(issue_id).await;

        if let Some(existing) = self.repository.find_by_id(issue_id).await? {
            if !existing.status().is_vacated() {
                return Err(ClaimError::AlreadyClaimed {
                    issue_id: issue_id.to_string(),
                    holder: existing.claimant().clone(),
                });
            }
        }

        let now = self.clock.now();
        let expires_at = self.expiration.calculate_expiration(&claimant, now);
        let claim = Claim::new(issue_id, claimant, priority, now, expires_at);
        self.repository.save(&claim).await?;

        metrics::counter!("workclaim_claims_total").increment(1);
        info!(issue_id = %issue_id, claimant = %claim.claimant(), priority = %priority, "Issue claimed");

        self.event_bus.publish_claim_event(ClaimEvent::IssueClaimed {
            issue_id: issue_id.to_string(),
            claimant: claim.claimant().clone(),
            priority,
            expires_at,
            claimed_at: now,
        });
        Ok(Outcome::Completed(claim))
    }
}

#[async_trait]
impl HandoffService for StandardClaimService {
    async fn request_handoff(
        &self,
        issue_id: &str,
        from: &Claimant,
        to: &Claimant,
        reason: &str,
    ) -> Result<Outcome<Claim>, ClaimError> {
        let _guard = self.locks.lock(issue_id).await;
        let mut claim = self.load(issue_id).await?;
        claim.ensure_owner(from)?;
        if !claim.status().can_transition_to(ClaimStatus::PendingHandoff) {
            return Err(ClaimError::InvalidTransition {
                issue_id: issue_id.to_string(),
                from: claim.status(),
                to: ClaimStatus::PendingHandoff,
            });
        }

        let validation = self.validator.validate_handoff(from, to);
        if !validation.valid {
            return Ok(Outcome::Rejected(ClaimError::ValidationFailed {
                issue_id: issue_id.to_string(),
                reason: validation.error.unwrap_or_else(|| "handoff rejected".to_string()),
            }));
        }

        let now = self.clock.now();
        claim.request_handoff(to.clone(), reason.to_string(), now)?;
        self.commit(
            &claim,
            ClaimEvent::HandoffRequested {
                issue_id: issue_id.to_string(),
                from: from.clone(),
                to: to.clone(),
                reason: reason.to_string(),
                requested_at: now,
            },
        )
        .await?;

        info!(issue_id = %issue_id, from = %from, to = %to, "Handoff requested");
        Ok(Outcome::Completed(claim))
    }
}

#[async_trait]
impl ClaimService for StandardClaimService {
    async fn claim(&self, issue_id: &str, claimant: Claimant) -> Result<Outcome<Claim>, ClaimError> {
        self.claim_inner(issue_id, claimant, IssuePriority::default()).await
    }

    async fn claim_with_priority(
        &self,
        issue_id: &str,
        claimant: Claimant,
        priority: IssuePriority,
    ) -> Result<Outcome<Claim>, ClaimError> {
        self.claim_inner(issue_id, claimant, priority).await
    }

    async fn release(&self, issue_id: &str, claimant: &Claimant) -> Result<Claim, ClaimError> {
        let _guard = self.locks.lock(issue_id).await;
        let claim = self.load(issue_id).await?;
        claim.ensure_owner(claimant)?;

        self.repository.delete(issue_id).await?;
        let now = self.clock.now();
        self.event_bus.publish_claim_event(ClaimEvent::IssueReleased {
            issue_id: issue_id.to_string(),
            claimant: claim.claimant().clone(),
            released_at: now,
        });

        info!(issue_id = %issue_id, claimant = %claimant, "Issue released");
        Ok(claim)
    }

    async fn accept_handoff(&self, issue_id: &str, accepting: &Claimant) -> Result<Outcome<Claim>, ClaimError> {
        let _guard = self.locks.lock(issue_id).await;
        let mut claim = self.load(issue_id).await?;

        let now = self.clock.now();
        let expires_at = self.expiration.calculate_expiration(accepting, now);
        let previous = match Outcome::from_checked(claim.accept_handoff(accepting, now, expires_at))? {
            Outcome::Completed(previous) => previous,
            Outcome::Rejected(err) => return Ok(Outcome::Rejected(err)),
        };

        self.commit(
            &claim,
            ClaimEvent::HandoffAccepted {
                issue_id: issue_id.to_string(),
                from: previous.clone(),
                to: accepting.clone(),
                accepted_at: now,
            },
        )
        .await?;

        info!(issue_id = %issue_id, from = %previous, to = %accepting, "Handoff accepted");
        Ok(Outcome::Completed(claim))
    }

    async fn reject_handoff(
        &self,
        issue_id: &str,
        rejecting: &Claimant,
        reason: &str,
    ) -> Result<Outcome<Claim>, ClaimError> {
        let _guard = self.locks.lock(issue_id).await;
        let mut claim = self.load(issue_id).await?;

        let now = self.clock.now();
        if let Outcome::Rejected(err) = Outcome::from_checked(claim.reject_handoff(rejecting, now))? {
            return Ok(Outcome::Rejected(err));
        }

        self.commit(
            &claim,
            ClaimEvent::HandoffRejected {
                issue_id: issue_id.to_string(),
                from: claim.claimant().clone(),
                to: rejecting.clone(),
                reason: reason.to_string(),
                rejected_at: now,
            },
        )
        .await?;

        info!(issue_id = %issue_id, rejected_by = %rejecting, "Handoff rejected");
        Ok(Outcome::Completed(claim))
    }

    async fn update_status(
        &self,
        issue_id: &str,
        caller: &Claimant,
        to: ClaimStatus,
        note: Option<String>,
    ) -> Result<Claim, ClaimError> {
        let _guard = self.locks.lock(issue_id).await;
        let mut claim = self.load(issue_id).await?;
        claim.ensure_owner(caller)?;

        let now = self.clock.now();
        let from = claim.status();
        if from == ClaimStatus::Expired && to == ClaimStatus::Active {
            let expires_at = self.expiration.calculate_expiration(claim.claimant(), now);
            claim.reactivate(now, expires_at)?;
        } else {
            claim.transition_to(to, note.clone(), now)?;
        }

        self.commit(
            &claim,
            ClaimEvent::StatusChanged {
                issue_id: issue_id.to_string(),
                claimant: caller.clone(),
                from,
                to,
                note,
                changed_at: now,
            },
        )
        .await?;

        info!(issue_id = %issue_id, from = %from, to = %to, "Claim status changed");
        Ok(claim)
    }

    async fn update_progress(&self, issue_id: &str, progress: i32) -> Result<Claim, ClaimError> {
        let _guard = self.locks.lock(issue_id).await;
        let mut claim = self.load(issue_id).await?;

        let now = self.clock.now();
        let stored = claim.set_progress(progress, now);
        self.commit(
            &claim,
            ClaimEvent::ProgressUpdated {
                issue_id: issue_id.to_string(),
                claimant: claim.claimant().clone(),
                progress: stored,
                updated_at: now,
            },
        )
        .await?;

        debug!(issue_id = %issue_id, progress = stored, "Progress updated");
        Ok(claim)
    }

    async fn expire_stale(&self, cutoff: DateTime<Utc>) -> Result<ExpirationReport, ClaimError> {
        let candidates = self.repository.find_expired_claims(cutoff).await?;
        let mut expired = Vec::new();

        for candidate in candidates {
            let issue_id = candidate.issue_id.clone();
            let _guard = self.locks.lock(&issue_id).await;

            // Re-read under the lock; the candidate snapshot may be outdated.
            let Some(mut claim) = self.repository.find_by_id(&issue_id).await? else {
                continue;
            };
            let now = self.clock.now();
            if claim.status() != ClaimStatus::Active || !self.expiration.is_expired(&claim, now) {
                continue;
            }

            claim.transition_to(ClaimStatus::Expired, None, now)?;
            self.commit(
                &claim,
                ClaimEvent::ClaimExpired {
                    issue_id: issue_id.clone(),
                    claimant: claim.claimant().clone(),
                    expired_at: now,
                },
            )
            .await?;
            expired.push(claim);
        }

        if !expired.is_empty() {
            info!("Expired {} claims", expired.len());
        }
        Ok(ExpirationReport {
            count: expired.len(),
            claims: expired,
        })
    }

    async fn request_review(
        &self,
        issue_id: &str,
        owner: &Claimant,
        reviewers: Vec<Claimant>,
    ) -> Result<Claim, ClaimError> {
        let _guard = self.locks.lock(issue_id).await;
        let mut claim = self.load(issue_id).await?;
        claim.ensure_owner(owner)?;

        let now = self.clock.now();
        let from = claim.status();
        let note = format!("review requested from {} reviewer(s)", reviewers.len());
        claim.request_review(reviewers, now)?;

        self.commit(
            &claim,
            ClaimEvent::StatusChanged {
                issue_id: issue_id.to_string(),
                claimant: owner.clone(),
                from,
                to: ClaimStatus::ReviewRequested,
                note: Some(note),
                changed_at: now,
            },
        )
        .await?;
        Ok(claim)
    }

    async fn get_claim(&self, issue_id: &str) -> Result<Option<Claim>, ClaimError> {
        Ok(self.repository.find_by_id(issue_id).await?)
    }

    async fn claims_by_claimant(&self, claimant: &Claimant) -> Result<Vec<Claim>, ClaimError> {
        Ok(self.repository.find_by_claimant(claimant).await?)
    }

    async fn pending_handoffs(&self) -> Result<Vec<Claim>, ClaimError> {
        Ok(self.repository.find_pending_handoffs().await?)
    }

    async fn claim_history(&self, issue_id: &str) -> Result<Vec<ClaimEvent>, ClaimError> {
        let Some(store) = &self.event_store else {
            return Ok(Vec::new());
        };

        let mut events = Vec::new();
        for record in store.events_for(issue_id).await? {
            match record.event() {
                Ok(event) => events.push(event),
                Err(e) => warn!(record_id = %record.id, error = %e, "Skipping unreadable claim event"),
            }
        }
        Ok(events)
    }

    async fn statistics(&self) -> Result<ClaimStatistics, ClaimError> {
        let claims = self.repository.list_all().await?;
        let mut stats = ClaimStatistics {
            total: claims.len(),
            ..Default::default()
        };
        for claim in &claims {
            *stats.by_status.entry(claim.status()).or_insert(0) += 1;
            match claim.claimant().kind() {
                ClaimantKind::Human => stats.human_claims += 1,
                ClaimantKind::Agent => stats.agent_claims += 1,
            }
            if claim.is_stealable() {
                stats.stealable += 1;
            }
            if claim.status() == ClaimStatus::PendingHandoff {
                stats.pending_handoffs += 1;
            }
        }
        Ok(stats)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::clock::ManualClock;
    use crate::domain::policy::ValidationResult;
    use crate::infrastructure::event_bus::DomainEvent;
    use crate::infrastructure::repositories::InMemoryClaimRepository;

    struct DenyAll;

    impl ClaimValidator for DenyAll {
        fn validate_claim(&self, _issue_id: &str, _claimant: &Claimant) -> ValidationResult {
            ValidationResult::invalid("frozen for release")
        }

        fn validate_handoff(&self, _from: &Claimant, _to: &Claimant) -> ValidationResult {
            ValidationResult::invalid("frozen for release")
        }
    }

    fn service() -> (StandardClaimService, Arc<EventBus>) {
        let event_bus = Arc::new(EventBus::new(64));
        let service = StandardClaimService::new(
            Arc::new(InMemoryClaimRepository::new()),
            event_bus.clone(),
            Arc::new(ManualClock::default()),
            IssueLockManager::new(),
        );
        (service, event_bus)
    }

    #[tokio::test]
    async fn test_validator_rejection_is_soft_and_silent() {
        let (service, event_bus) = service();
        let service = service.with_validator(Arc::new(DenyAll));
        let mut receiver = event_bus.subscribe();

        let outcome = service
            .claim("issue-1", Claimant::agent("a-1", "coder"))
            .await
            .expect("Claim should not fail hard");

        assert!(matches!(outcome.rejection(), Some(ClaimError::ValidationFailed { .. })));
        assert!(service.get_claim("issue-1").await.unwrap().is_none());
        assert!(receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_update_status_rejects_pending_handoff_without_target() {
        let (service, _bus) = service();
        let owner = Claimant::agent("a-1", "coder");
        let _ = service.claim("issue-2", owner.clone()).await.unwrap();

        let err = service
            .update_status("issue-2", &owner, ClaimStatus::PendingHandoff, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ClaimError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_blocked_note_is_stored() {
        let (service, event_bus) = service();
        let owner = Claimant::human("u-1", "Ada");
        let _ = service.claim("issue-3", owner.clone()).await.unwrap();
        let mut receiver = event_bus.subscribe();

        let claim = service
            .update_status("issue-3", &owner, ClaimStatus::Blocked, Some("waiting on API keys".into()))
            .await
            .unwrap();
        assert_eq!(claim.blocked_reason(), Some("waiting on API keys"));

        match receiver.try_recv().unwrap() {
            DomainEvent::Claim(ClaimEvent::StatusChanged { from, to, .. }) => {
                assert_eq!(from, ClaimStatus::Active);
                assert_eq!(to, ClaimStatus::Blocked);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_statistics_counts_kinds() {
        let (service, _bus) = service();
        let coder = Claimant::agent("a-1", "coder");
        let _ = service.claim("issue-4", coder.clone()).await.unwrap();
        let _ = service.claim("issue-5", Claimant::human("u-1", "Ada")).await.unwrap();
        let _ = service
            .request_handoff("issue-4", &coder, &Claimant::agent("a-2", "tester"), "tests")
            .await
            .unwrap();

        let stats = service.statistics().await.unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.human_claims, 1);
        assert_eq!(stats.agent_claims, 1);
        assert_eq!(stats.pending_handoffs, 1);
        assert_eq!(stats.by_status.get(&ClaimStatus::Active), Some(&1));
    }
}
