// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Work-Stealing Application Service
//!
//! Lets idle agents and humans take over abandoned or low-progress work.
//! A steal runs under the same per-issue lock as the claim engine, so it is
//! totally ordered with handoffs on that issue. After a steal the previous
//! owner has a contest window; a contest is settled by the [`StealingPolicy`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info};

use workclaim_core::domain::claim::{Claim, ClaimError, Outcome, StealableInfo, StealableReason};
use workclaim_core::domain::claimant::Claimant;
use workclaim_core::domain::clock::Clock;
use workclaim_core::domain::coordination_config::CoordinationConfig;
use workclaim_core::domain::events::ClaimEvent;
use workclaim_core::domain::policy::{ClaimantExpirationPolicy, ExpirationPolicy};
use workclaim_core::domain::repository::{selectors, ClaimRepository, StealableQuery};
use workclaim_core::infrastructure::event_bus::EventBus;
use workclaim_core::infrastructure::issue_locks::IssueLockManager;

use crate::domain::stealing::{
    ContestResolution, DefaultStealingPolicy, StealEligibility, StealFilter, StealableRequest, StealingPolicy,
};

#[async_trait]
pub trait WorkStealingService: Send + Sync {
    /// Owner-only. Opens the claim for stealing from `stealable_after` (or now).
    async fn mark_stealable(
        &self,
        issue_id: &str,
        owner: &Claimant,
        request: StealableRequest,
    ) -> Result<Claim, ClaimError>;

    /// Every precondition failure, a missing claim included, is a soft rejection.
    async fn steal(&self, issue_id: &str, thief: &Claimant) -> Result<Outcome<Claim>, ClaimError>;

    async fn get_stealable(&self, filter: &StealFilter) -> Result<Vec<Claim>, ClaimError>;

    async fn contest_steal(
        &self,
        issue_id: &str,
        original_owner: &Claimant,
        reason: &str,
    ) -> Result<Outcome<ContestResolution>, ClaimError>;

    /// Flags idle claims as stale. Returns the newly flagged issue ids.
    async fn detect_stale_work(&self, since: DateTime<Utc>) -> Result<Vec<String>, ClaimError>;

    /// Marks idle, unprotected claims stealable on their owners' behalf.
    /// Does nothing unless enabled in the stealing configuration.
    async fn auto_mark_stale(&self, since: DateTime<Utc>, reason: &str) -> Result<Vec<String>, ClaimError>;

    async fn set_protection(&self, issue_id: &str, owner: &Claimant, reason: &str) -> Result<Claim, ClaimError>;

    async fn remove_protection(&self, issue_id: &str, owner: &Claimant) -> Result<Claim, ClaimError>;
}

pub struct StandardWorkStealingService {
    repository: Arc<dyn ClaimRepository>,
    event_bus: Arc<EventBus>,
    clock: Arc<dyn Clock>,
    locks: IssueLockManager,
    policy: Arc<dyn StealingPolicy>,
    expiration: Arc<dyn ExpirationPolicy>,
    auto_mark_stale: bool,
}

impl StandardWorkStealingService {
    /// `locks` must be the manager the claim engine uses.
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
            policy: Arc::new(DefaultStealingPolicy::default()),
            expiration: Arc::new(ClaimantExpirationPolicy::default()),
            auto_mark_stale: false,
        }
    }

    pub fn from_config(
        config: &CoordinationConfig,
        repository: Arc<dyn ClaimRepository>,
        event_bus: Arc<EventBus>,
        clock: Arc<dyn Clock>,
        locks: IssueLockManager,
    ) -> Self {
        let mut service = Self::new(repository, event_bus, clock, locks)
            .with_policy(Arc::new(DefaultStealingPolicy::from_settings(&config.spec.stealing)))
            .with_expiration_policy(Arc::new(ClaimantExpirationPolicy::from_settings(&config.spec.claims)));
        service.auto_mark_stale = config.spec.stealing.auto_mark_stale;
        service
    }

    pub fn with_policy(mut self, policy: Arc<dyn StealingPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_expiration_policy(mut self, expiration: Arc<dyn ExpirationPolicy>) -> Self {
        self.expiration = expiration;
        self
    }

    pub fn with_auto_mark_stale(mut self, enabled: bool) -> Self {
        self.auto_mark_stale = enabled;
        self
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

    async fn change_protection(
        &self,
        issue_id: &str,
        owner: &Claimant,
        reason: Option<&str>,
    ) -> Result<Claim, ClaimError> {
        let _guard = self.locks.lock(issue_id).await;
        let mut claim = self.load(issue_id).await?;
        claim.ensure_owner(owner)?;

        let now = self.clock.now();
        match reason {
            Some(reason) => claim.set_protection(reason.to_string(), now),
            None => {
                claim.remove_protection(now);
            }
        }
        self.commit(
            &claim,
            ClaimEvent::ProtectionChanged {
                issue_id: issue_id.to_string(),
                owner: owner.clone(),
                protected: reason.is_some(),
                reason: reason.map(str::to_string),
                changed_at: now,
            },
        )
        .await?;

        info!(issue_id = %issue_id, protected = reason.is_some(), "Steal protection changed");
        Ok(claim)
    }
}

#[async_trait]
impl WorkStealingService for StandardWorkStealingService {
    async fn mark_stealable(
        &self,
        issue_id: &str,
        owner: &Claimant,
        request: StealableRequest,
    ) -> Result<Claim, ClaimError> {
        let _guard = self.locks.lock(issue_id).await;
        let mut claim = self.load(issue_id).await?;
        claim.ensure_owner(owner)?;
        if !claim.is_live() {
            return Err(ClaimError::NotStealable {
                issue_id: issue_id.to_string(),
                reason: format!("claim is {}", claim.status()),
            });
        }

        let now = self.clock.now();
        let stealable_at = request.stealable_after.unwrap_or(now);
        claim.mark_stealable(
            StealableInfo {
                reason: request.reason,
                stealable_at,
                preferred_types: request.preferred_types,
                progress: claim.progress(),
                context: request.context,
            },
            now,
        );

        self.commit(
            &claim,
            ClaimEvent::WorkMarkedStealable {
                issue_id: issue_id.to_string(),
                owner: owner.clone(),
                reason: request.reason,
                stealable_at,
                marked_at: now,
            },
        )
        .await?;

        info!(issue_id = %issue_id, reason = %request.reason, stealable_at = %stealable_at, "Work marked stealable");
        Ok(claim)
    }

    async fn steal(&self, issue_id: &str, thief: &Claimant) -> Result<Outcome<Claim>, ClaimError> {
        let _guard = self.locks.lock(issue_id).await;
        let Some(mut claim) = self.repository.find_by_id(issue_id).await? else {
            return Ok(Outcome::Rejected(ClaimError::not_found(issue_id)));
        };

        let now = self.clock.now();
        let eligibility = StealEligibility::new(self.policy.as_ref(), now);
        if let Outcome::Rejected(err) = Outcome::from_checked(eligibility.check(&claim, thief))? {
            debug!(issue_id = %issue_id, thief = %thief, error = %err, "Steal rejected");
            return Ok(Outcome::Rejected(err));
        }

        let contest_ends_at = now + self.policy.contest_window(&claim);
        let expires_at = self.expiration.calculate_expiration(thief, now);
        let previous = claim.transfer_by_steal(thief.clone(), now, contest_ends_at, expires_at);

        self.commit(
            &claim,
            ClaimEvent::WorkStolen {
                issue_id: issue_id.to_string(),
                from: previous.clone(),
                to: thief.clone(),
                contest_window_ends: contest_ends_at,
                stolen_at: now,
            },
        )
        .await?;

        metrics::counter!("workclaim_steals_total").increment(1);
        info!(issue_id = %issue_id, from = %previous, to = %thief, contest_window_ends = %contest_ends_at, "Work stolen");
        Ok(Outcome::Completed(claim))
    }

    async fn get_stealable(&self, filter: &StealFilter) -> Result<Vec<Claim>, ClaimError> {
        let now = self.clock.now();
        let query = StealableQuery {
            reason: filter.reason,
            ready_at: Some(now),
        };
        let eligibility = StealEligibility::new(self.policy.as_ref(), now);

        let mut claims: Vec<Claim> = self
            .repository
            .find_stealable(&query)
            .await?
            .into_iter()
            .filter(|claim| !(filter.exclude_protected && claim.is_protected()))
            .filter(|claim| match &filter.thief_type {
                Some(thief_type) => eligibility.allows_type(claim, thief_type),
                None => claim.check_stealable(now).is_ok(),
            })
            .collect();

        claims.sort_by(|a, b| {
            let at = |claim: &Claim| claim.stealable().map(|info| info.stealable_at);
            at(a).cmp(&at(b)).then_with(|| a.issue_id.cmp(&b.issue_id))
        });
        if let Some(limit) = filter.limit {
            claims.truncate(limit);
        }
        Ok(claims)
    }

    async fn contest_steal(
        &self,
        issue_id: &str,
        original_owner: &Claimant,
        reason: &str,
    ) -> Result<Outcome<ContestResolution>, ClaimError> {
        let _guard = self.locks.lock(issue_id).await;
        let mut claim = self.load(issue_id).await?;

        let now = self.clock.now();
        let Some(window) = claim.active_contest(now).cloned() else {
            return Ok(Outcome::Rejected(ClaimError::ContestWindowExpired {
                issue_id: issue_id.to_string(),
                ended_at: claim.contest().map(|window| window.ends_at),
            }));
        };
        if &window.original_owner != original_owner {
            return Err(ClaimError::NotOwner {
                issue_id: issue_id.to_string(),
                caller: original_owner.clone(),
                owner: window.original_owner,
            });
        }

        let holder = claim.claimant().clone();
        let winner = self.policy.resolve_contest(&window.original_owner, &holder, &claim);
        let loser = if winner == holder {
            window.original_owner.clone()
        } else {
            holder.clone()
        };
        let expires_at = self.expiration.calculate_expiration(&winner, now);
        let ownership_changed = claim.settle_contest(winner.clone(), now, expires_at);

        self.repository.update(&claim).await?;
        self.event_bus.publish_claim_event(ClaimEvent::StealContested {
            issue_id: issue_id.to_string(),
            original_owner: window.original_owner.clone(),
            holder: holder.clone(),
            reason: reason.to_string(),
            contested_at: now,
        });
        self.event_bus.publish_claim_event(ClaimEvent::StealContestResolved {
            issue_id: issue_id.to_string(),
            winner: winner.clone(),
            loser: loser.clone(),
            resolved_at: now,
        });

        info!(issue_id = %issue_id, winner = %winner, loser = %loser, "Steal contest resolved");
        Ok(Outcome::Completed(ContestResolution {
            issue_id: issue_id.to_string(),
            winner,
            loser,
            ownership_changed,
            resolved_at: now,
        }))
    }

    async fn detect_stale_work(&self, since: DateTime<Utc>) -> Result<Vec<String>, ClaimError> {
        let candidates = self.repository.find_stale_claims(since).await?;
        let now = self.clock.now();
        let mut flagged = Vec::new();

        for candidate in candidates {
            let _guard = self.locks.lock(&candidate.issue_id).await;
            let Some(mut claim) = self.repository.find_by_id(&candidate.issue_id).await? else {
                continue;
            };
            if !selectors::is_stale_candidate(&claim, since) {
                continue;
            }
            claim.mark_stale(since, format!("no activity since {}", since), now);
            self.repository.update(&claim).await?;
            flagged.push(claim.issue_id);
        }

        if !flagged.is_empty() {
            info!("Detected {} stale claims", flagged.len());
            self.event_bus.publish_claim_event(ClaimEvent::StaleWorkDetected {
                count: flagged.len(),
                issue_ids: flagged.clone(),
                since,
                detected_at: now,
            });
        }
        Ok(flagged)
    }

    async fn auto_mark_stale(&self, since: DateTime<Utc>, reason: &str) -> Result<Vec<String>, ClaimError> {
        if !self.auto_mark_stale {
            debug!("Automatic stale marking is disabled");
            return Ok(Vec::new());
        }

        let eligible = |claim: &Claim| selectors::is_idle(claim, since) && !claim.is_protected() && !claim.is_stealable();
        let candidates: Vec<Claim> = self
            .repository
            .list_all()
            .await?
            .into_iter()
            .filter(|claim| eligible(claim))
            .collect();

        let mut marked = Vec::new();
        for candidate in candidates {
            let _guard = self.locks.lock(&candidate.issue_id).await;
            let Some(mut claim) = self.repository.find_by_id(&candidate.issue_id).await? else {
                continue;
            };
            if !eligible(&claim) {
                continue;
            }

            let now = self.clock.now();
            claim.mark_stealable(
                StealableInfo {
                    reason: StealableReason::Stale,
                    stealable_at: now,
                    preferred_types: Vec::new(),
                    progress: claim.progress(),
                    context: Some(reason.to_string()),
                },
                now,
            );
            self.commit(
                &claim,
                ClaimEvent::WorkMarkedStealable {
                    issue_id: claim.issue_id.clone(),
                    owner: claim.claimant().clone(),
                    reason: StealableReason::Stale,
                    stealable_at: now,
                    marked_at: now,
                },
            )
            .await?;
            marked.push(claim.issue_id);
        }

        if !marked.is_empty() {
            info!("Marked {} stale claims stealable", marked.len());
        }
        Ok(marked)
    }

    async fn set_protection(&self, issue_id: &str, owner: &Claimant, reason: &str) -> Result<Claim, ClaimError> {
        self.change_protection(issue_id, owner, Some(reason)).await
    }

    async fn remove_protection(&self, issue_id: &str, owner: &Claimant) -> Result<Claim, ClaimError> {
        self.change_protection(issue_id, owner, None).await
    }
}
