// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Per-issue async mutexes.
//!
//! Every read-check-write sequence on a claim runs under the lock for its
//! issue id. The claim engine and the stealing engine share one manager, so a
//! steal and a handoff on the same issue are totally ordered while unrelated
//! issues proceed in parallel.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

type LockMap = DashMap<String, Arc<Mutex<()>>>;

#[derive(Clone, Default)]
pub struct IssueLockManager {
    locks: Arc<LockMap>,
}

impl IssueLockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `issue_id`. Released when the guard drops.
    pub async fn lock(&self, issue_id: &str) -> IssueLockGuard {
        let mutex = self
            .locks
            .entry(issue_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        IssueLockGuard {
            guard: Some(mutex.lock_owned().await),
            issue_id: issue_id.to_string(),
            locks: self.locks.clone(),
        }
    }

    /// Number of issues with a holder or waiter.
    pub fn tracked(&self) -> usize {
        self.locks.len()
    }
}

/// Exclusive access to one issue. Dropping the last guard or waiter for an
/// issue removes its mutex from the manager.
pub struct IssueLockGuard {
    guard: Option<OwnedMutexGuard<()>>,
    issue_id: String,
    locks: Arc<LockMap>,
}

impl Drop for IssueLockGuard {
    fn drop(&mut self) {
        self.guard.take();
        // The map's own reference is the only one left when nobody waits.
        self.locks
            .remove_if(&self.issue_id, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_issue_serializes() {
        let locks = IssueLockManager::new();
        let guard = locks.lock("issue-1").await;

        let contender = locks.clone();
        let waiting = tokio::spawn(async move {
            let _guard = contender.lock("issue-1").await;
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiting.is_finished());

        drop(guard);
        waiting.await.expect("Failed to join waiter");
    }

    #[tokio::test]
    async fn test_distinct_issues_do_not_block() {
        let locks = IssueLockManager::new();
        let _first = locks.lock("issue-1").await;
        let _second = locks.lock("issue-2").await;
        assert_eq!(locks.tracked(), 2);
    }

    #[tokio::test]
    async fn test_entry_removed_after_last_guard() {
        let locks = IssueLockManager::new();
        let held = locks.lock("issue-1").await;
        drop(locks.lock("issue-2").await);
        assert_eq!(locks.tracked(), 1);

        drop(held);
        assert_eq!(locks.tracked(), 0);
    }

    #[tokio::test]
    async fn test_waiter_keeps_entry_alive() {
        let locks = IssueLockManager::new();
        let held = locks.lock("issue-1").await;

        let contender = locks.clone();
        let waiting = tokio::spawn(async move {
            let _guard = contender.lock("issue-1").await;
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        drop(held);
        assert_eq!(locks.tracked(), 1);
        waiting.await.expect("Failed to join waiter");
        assert_eq!(locks.tracked(), 0);
    }
}
