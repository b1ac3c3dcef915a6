// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Repository Implementations
//!
//! Infrastructure implementations of the repository abstractions defined in
//! `crate::domain::repository`, following the Repository pattern from DDD.
//!
//! # Available Implementations
//!
//! - **InMemoryClaimRepository** - lock-guarded map, used by tests and single-process swarms
//! - **SledClaimRepository** - embedded on-disk store that survives restarts
//! - **InMemoryClaimEventStore** - append-only audit log kept in memory
//!
//! Candidate selection (expiry, stale, stealable) is delegated to
//! [`crate::domain::repository::selectors`] so both claim stores answer
//! queries identically.
//!
//! # Usage
//!
//! ```no_run
//! use workclaim_core::infrastructure::repositories::SledClaimRepository;
//! use workclaim_core::domain::repository::ClaimRepository;
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let repo = SledClaimRepository::open("/var/lib/workclaim/claims")?;
//! let claim = repo.find_by_id("issue-42").await?;
//! # Ok(())
//! # }
//! ```

pub mod sled_claim;

pub use sled_claim::SledClaimRepository;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::domain::claim::Claim;
use crate::domain::claimant::Claimant;
use crate::domain::events::ClaimEventRecord;
use crate::domain::repository::{
    selectors, ClaimEventStore, ClaimRepository, RepositoryError, StealableQuery, StorageBackend,
};

/// Build the claim repository selected by `backend`.
pub fn create_claim_repository(backend: &StorageBackend) -> Result<Arc<dyn ClaimRepository>, RepositoryError> {
    match backend {
        StorageBackend::InMemory => Ok(Arc::new(InMemoryClaimRepository::new())),
        StorageBackend::Sled(config) => Ok(Arc::new(SledClaimRepository::open(&config.path)?)),
    }
}

/// Claims keyed by issue id. Iteration order is by issue id.
#[derive(Clone, Default)]
pub struct InMemoryClaimRepository {
    claims: Arc<RwLock<BTreeMap<String, Claim>>>,
}

impl InMemoryClaimRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn filtered(&self, predicate: impl Fn(&Claim) -> bool) -> Vec<Claim> {
        self.claims
            .read()
            .values()
            .filter(|claim| predicate(claim))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ClaimRepository for InMemoryClaimRepository {
    async fn find_by_id(&self, issue_id: &str) -> Result<Option<Claim>, RepositoryError> {
        Ok(self.claims.read().get(issue_id).cloned())
    }

    async fn save(&self, claim: &Claim) -> Result<(), RepositoryError> {
        self.claims.write().insert(claim.issue_id.clone(), claim.clone());
        Ok(())
    }

    async fn update(&self, claim: &Claim) -> Result<(), RepositoryError> {
        let mut claims = self.claims.write();
        match claims.get_mut(&claim.issue_id) {
            Some(existing) => {
                *existing = claim.clone();
                Ok(())
            }
            None => Err(RepositoryError::NotFound(claim.issue_id.clone())),
        }
    }

    async fn delete(&self, issue_id: &str) -> Result<bool, RepositoryError> {
        Ok(self.claims.write().remove(issue_id).is_some())
    }

    async fn find_by_claimant(&self, claimant: &Claimant) -> Result<Vec<Claim>, RepositoryError> {
        Ok(self.filtered(|claim| claim.is_owned_by(claimant)))
    }

    async fn find_expired_claims(&self, before: DateTime<Utc>) -> Result<Vec<Claim>, RepositoryError> {
        Ok(self.filtered(|claim| selectors::is_expiry_candidate(claim, before)))
    }

    async fn find_pending_handoffs(&self) -> Result<Vec<Claim>, RepositoryError> {
        Ok(self.filtered(selectors::is_pending_handoff))
    }

    async fn find_stealable(&self, query: &StealableQuery) -> Result<Vec<Claim>, RepositoryError> {
        Ok(self.filtered(|claim| query.matches(claim)))
    }

    async fn find_stale_claims(&self, since: DateTime<Utc>) -> Result<Vec<Claim>, RepositoryError> {
        Ok(self.filtered(|claim| selectors::is_stale_candidate(claim, since)))
    }

    async fn list_all(&self) -> Result<Vec<Claim>, RepositoryError> {
        Ok(self.filtered(|_| true))
    }
}

/// Append-only audit log held in memory.
#[derive(Clone, Default)]
pub struct InMemoryClaimEventStore {
    records: Arc<RwLock<Vec<ClaimEventRecord>>>,
}

impl InMemoryClaimEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[async_trait]
impl ClaimEventStore for InMemoryClaimEventStore {
    async fn append(&self, record: &ClaimEventRecord) -> Result<(), RepositoryError> {
        self.records.write().push(record.clone());
        Ok(())
    }

    async fn events_for(&self, issue_id: &str) -> Result<Vec<ClaimEventRecord>, RepositoryError> {
        Ok(self
            .records
            .read()
            .iter()
            .filter(|record| record.issue_ids.iter().any(|id| id == issue_id))
            .cloned()
            .collect())
    }
}
