// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Sled Claim Repository
//!
//! Embedded, crash-safe claim storage. Each claim is stored as a JSON
//! document in the `claims` tree keyed by its issue id, so a restarted
//! coordinator resumes with every live claim, handoff and contest window.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::Path;
use tracing::debug;

use crate::domain::claim::Claim;
use crate::domain::claimant::Claimant;
use crate::domain::repository::{selectors, ClaimRepository, RepositoryError, StealableQuery};

const CLAIMS_TREE: &str = "claims";

#[derive(Clone)]
pub struct SledClaimRepository {
    tree: sled::Tree,
}

impl SledClaimRepository {
    /// Open (or create) a database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RepositoryError> {
        let db = sled::open(path.as_ref())?;
        debug!("Opened claim store at {}", path.as_ref().display());
        Self::new(&db)
    }

    pub fn new(db: &sled::Db) -> Result<Self, RepositoryError> {
        Ok(Self {
            tree: db.open_tree(CLAIMS_TREE)?,
        })
    }

    fn decode(bytes: &[u8]) -> Result<Claim, RepositoryError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    fn write(&self, claim: &Claim) -> Result<(), RepositoryError> {
        let value = serde_json::to_vec(claim)?;
        self.tree.insert(claim.issue_id.as_bytes(), value)?;
        Ok(())
    }

    fn scan(&self, predicate: impl Fn(&Claim) -> bool) -> Result<Vec<Claim>, RepositoryError> {
        let mut claims = Vec::new();
        for entry in self.tree.iter() {
            let (_, value) = entry?;
            let claim = Self::decode(&value)?;
            if predicate(&claim) {
                claims.push(claim);
            }
        }
        Ok(claims)
    }

    /// Flush pending writes to disk.
    pub async fn flush(&self) -> Result<(), RepositoryError> {
        self.tree.flush_async().await?;
        Ok(())
    }
}

#[async_trait]
impl ClaimRepository for SledClaimRepository {
    async fn find_by_id(&self, issue_id: &str) -> Result<Option<Claim>, RepositoryError> {
        match self.tree.get(issue_id.as_bytes())? {
            Some(value) => Ok(Some(Self::decode(&value)?)),
            None => Ok(None),
        }
    }

    async fn save(&self, claim: &Claim) -> Result<(), RepositoryError> {
        self.write(claim)
    }

    async fn update(&self, claim: &Claim) -> Result<(), RepositoryError> {
        if !self.tree.contains_key(claim.issue_id.as_bytes())? {
            return Err(RepositoryError::NotFound(claim.issue_id.clone()));
        }
        self.write(claim)
    }

    async fn delete(&self, issue_id: &str) -> Result<bool, RepositoryError> {
        Ok(self.tree.remove(issue_id.as_bytes())?.is_some())
    }

    async fn find_by_claimant(&self, claimant: &Claimant) -> Result<Vec<Claim>, RepositoryError> {
        self.scan(|claim| claim.is_owned_by(claimant))
    }

    async fn find_expired_claims(&self, before: DateTime<Utc>) -> Result<Vec<Claim>, RepositoryError> {
        self.scan(|claim| selectors::is_expiry_candidate(claim, before))
    }

    async fn find_pending_handoffs(&self) -> Result<Vec<Claim>, RepositoryError> {
        self.scan(selectors::is_pending_handoff)
    }

    async fn find_stealable(&self, query: &StealableQuery) -> Result<Vec<Claim>, RepositoryError> {
        self.scan(|claim| query.matches(claim))
    }

    async fn find_stale_claims(&self, since: DateTime<Utc>) -> Result<Vec<Claim>, RepositoryError> {
        self.scan(|claim| selectors::is_stale_candidate(claim, since))
    }

    async fn list_all(&self) -> Result<Vec<Claim>, RepositoryError> {
        self.scan(|_| true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::claim::{ClaimStatus, IssuePriority, StealableInfo, StealableReason};
    use chrono::Duration;

    #[tokio::test]
    async fn test_claims_visible_through_second_handle() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let db = sled::open(dir.path().join("claims")).expect("Failed to open db");
        let now = Utc::now();

        let writer = SledClaimRepository::new(&db).expect("Failed to open tree");
        let mut claim = Claim::new(
            "issue-7",
            Claimant::agent("a-1", "coder"),
            IssuePriority::High,
            now,
            Some(now + Duration::hours(2)),
        );
        claim.set_progress(40, now);
        claim.mark_stealable(
            StealableInfo {
                reason: StealableReason::Stale,
                stealable_at: now,
                preferred_types: Vec::new(),
                progress: 40,
                context: Some("owner went quiet".to_string()),
            },
            now,
        );
        writer.save(&claim).await.expect("Failed to save claim");
        writer.flush().await.expect("Failed to flush");

        let reader = SledClaimRepository::new(&db).expect("Failed to open tree");
        let stored = reader
            .find_by_id("issue-7")
            .await
            .expect("Failed to read claim")
            .expect("Claim missing");
        assert_eq!(stored, claim);
        assert_eq!(stored.status(), ClaimStatus::Active);
        assert!(stored.is_stealable());

        let stealable = reader
            .find_stealable(&StealableQuery::default())
            .await
            .expect("Failed to query stealable");
        assert_eq!(stealable.len(), 1);
    }

    #[tokio::test]
    async fn test_update_missing_claim_is_not_found() {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .expect("Failed to open temporary db");
        let repo = SledClaimRepository::new(&db).expect("Failed to open tree");
        let now = Utc::now();
        let claim = Claim::new("issue-8", Claimant::human("u-1", "Ada"), IssuePriority::Low, now, None);

        assert!(matches!(repo.update(&claim).await, Err(RepositoryError::NotFound(_))));
        repo.save(&claim).await.expect("Failed to save claim");
        assert_eq!(repo.list_all().await.expect("Failed to list").len(), 1);
        assert!(repo.delete("issue-8").await.expect("Failed to delete"));
    }
}
