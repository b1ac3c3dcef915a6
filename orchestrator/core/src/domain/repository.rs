// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Domain Repository Interfaces
//!
//! Persistence contracts for the [`Claim`] aggregate and its audit trail,
//! following the DDD Repository pattern: interfaces live in the domain layer,
//! implementations in `crate::infrastructure::repositories`.
//!
//! | Trait | Aggregate | Implementations |
//! |-------|-----------|----------------|
//! | `ClaimRepository` | `Claim` | `InMemoryClaimRepository`, `SledClaimRepository` |
//! | `ClaimEventStore` | `ClaimEventRecord` | `InMemoryClaimEventStore` |
//!
//! Implementations must give at least sequential consistency per issue id.
//! The engines never keep private copies of claims: every read and write goes
//! through the shared repository so the one-live-claim-per-issue invariant
//! holds across the claim, stealing and load-balancing services.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::claim::{Claim, ClaimStatus, StealableReason};
use crate::domain::claimant::Claimant;
use crate::domain::events::ClaimEventRecord;

/// Storage backend selection for the claim repository.
#[derive(Debug, Clone)]
pub enum StorageBackend {
    InMemory,
    Sled(SledConfig),
}

#[derive(Debug, Clone)]
pub struct SledConfig {
    pub path: std::path::PathBuf,
}

/// Coarse repository-side filter for stealable claims. Policy-level
/// eligibility (agent types, human protection) is decided by the engine.
#[derive(Debug, Clone, Default)]
pub struct StealableQuery {
    pub reason: Option<StealableReason>,
    /// Only claims whose `stealable_at` is at or before this instant.
    pub ready_at: Option<DateTime<Utc>>,
}

impl StealableQuery {
    pub fn matches(&self, claim: &Claim) -> bool {
        let Some(info) = claim.stealable() else {
            return false;
        };
        if !claim.is_live() {
            return false;
        }
        if self.reason.is_some_and(|reason| reason != info.reason) {
            return false;
        }
        self.ready_at.map_or(true, |ready_at| info.stealable_at <= ready_at)
    }
}

/// Candidate selection shared by every repository implementation.
pub mod selectors {
    use super::*;

    /// Claims that could move to `expired`: either past their expiry, or
    /// without an expiry and unchanged since `before`.
    pub fn is_expiry_candidate(claim: &Claim, before: DateTime<Utc>) -> bool {
        if !claim.status().can_transition_to(ClaimStatus::Expired) {
            return false;
        }
        match claim.expires_at {
            Some(expires_at) => expires_at <= before,
            None => claim.status_changed_at() <= before,
        }
    }

    /// Claims someone is supposed to be working on, untouched since `since`.
    pub fn is_idle(claim: &Claim, since: DateTime<Utc>) -> bool {
        let worked = matches!(
            claim.status(),
            ClaimStatus::Active | ClaimStatus::Blocked | ClaimStatus::Paused | ClaimStatus::ReviewRequested
        );
        worked && claim.last_activity_at() <= since
    }

    /// Idle claims that have not already been flagged stale.
    pub fn is_stale_candidate(claim: &Claim, since: DateTime<Utc>) -> bool {
        is_idle(claim, since) && claim.stale().is_none()
    }

    pub fn is_pending_handoff(claim: &Claim) -> bool {
        claim.status() == ClaimStatus::PendingHandoff
    }
}

/// Repository interface for Claim aggregates (one live claim per issue id).
#[async_trait]
pub trait ClaimRepository: Send + Sync {
    /// Find the claim for an issue
    async fn find_by_id(&self, issue_id: &str) -> Result<Option<Claim>, RepositoryError>;

    /// Insert or replace the claim for its issue id
    async fn save(&self, claim: &Claim) -> Result<(), RepositoryError>;

    /// Replace an existing claim; `NotFound` if there is none
    async fn update(&self, claim: &Claim) -> Result<(), RepositoryError>;

    /// Delete the claim for an issue. Returns whether one existed.
    async fn delete(&self, issue_id: &str) -> Result<bool, RepositoryError>;

    /// All claims currently owned by `claimant`
    async fn find_by_claimant(&self, claimant: &Claimant) -> Result<Vec<Claim>, RepositoryError>;

    /// Expiry candidates as of `before` (see [`selectors::is_expiry_candidate`])
    async fn find_expired_claims(&self, before: DateTime<Utc>) -> Result<Vec<Claim>, RepositoryError>;

    /// Claims waiting on a handoff target
    async fn find_pending_handoffs(&self) -> Result<Vec<Claim>, RepositoryError>;

    /// Claims carrying the stealable flag that match `query`
    async fn find_stealable(&self, query: &StealableQuery) -> Result<Vec<Claim>, RepositoryError>;

    /// Stale candidates (see [`selectors::is_stale_candidate`])
    async fn find_stale_claims(&self, since: DateTime<Utc>) -> Result<Vec<Claim>, RepositoryError>;

    /// Every stored claim
    async fn list_all(&self) -> Result<Vec<Claim>, RepositoryError>;
}

/// Append-only audit trail of claim events.
#[async_trait]
pub trait ClaimEventStore: Send + Sync {
    async fn append(&self, record: &ClaimEventRecord) -> Result<(), RepositoryError>;

    /// Events concerning one issue, oldest first
    async fn events_for(&self, issue_id: &str) -> Result<Vec<ClaimEventRecord>, RepositoryError>;
}

/// Repository errors
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        RepositoryError::Serialization(err.to_string())
    }
}

impl From<sled::Error> for RepositoryError {
    fn from(err: sled::Error) -> Self {
        RepositoryError::Database(err.to_string())
    }
}
