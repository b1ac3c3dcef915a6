// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Business-rule collaborators consulted by the claim engine before it writes.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::claim::Claim;
use crate::domain::claimant::{Claimant, ClaimantKind};
use crate::domain::coordination_config::ClaimSettings;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub error: Option<String>,
}

impl ValidationResult {
    pub fn valid() -> Self {
        Self {
            valid: true,
            error: None,
        }
    }

    pub fn invalid(error: impl Into<String>) -> Self {
        Self {
            valid: false,
            error: Some(error.into()),
        }
    }
}

/// Pure gate evaluated before any claim or handoff mutation.
pub trait ClaimValidator: Send + Sync {
    fn validate_claim(&self, issue_id: &str, claimant: &Claimant) -> ValidationResult;
    fn validate_handoff(&self, from: &Claimant, to: &Claimant) -> ValidationResult;
}

/// Accepts every claim; rejects handing an issue to its current owner.
#[derive(Debug, Clone, Copy, Default)]
pub struct PermissiveValidator;

impl ClaimValidator for PermissiveValidator {
    fn validate_claim(&self, issue_id: &str, _claimant: &Claimant) -> ValidationResult {
        if issue_id.trim().is_empty() {
            return ValidationResult::invalid("issue id cannot be empty");
        }
        ValidationResult::valid()
    }

    fn validate_handoff(&self, from: &Claimant, to: &Claimant) -> ValidationResult {
        if from == to {
            return ValidationResult::invalid(format!("cannot hand off to the current owner {}", to));
        }
        ValidationResult::valid()
    }
}

pub trait ExpirationPolicy: Send + Sync {
    /// Expiry for a claim taken (or handed over) at `now`. `None` never expires.
    fn calculate_expiration(&self, claimant: &Claimant, now: DateTime<Utc>) -> Option<DateTime<Utc>>;

    /// Final say on an expiry candidate returned by the repository.
    fn is_expired(&self, claim: &Claim, now: DateTime<Utc>) -> bool;
}

/// TTL keyed on claimant kind, plus an inactivity limit for claims without one.
#[derive(Debug, Clone)]
pub struct ClaimantExpirationPolicy {
    agent_ttl: Option<Duration>,
    human_ttl: Option<Duration>,
    inactivity_timeout: Duration,
}

impl ClaimantExpirationPolicy {
    pub fn new(agent_ttl: Option<Duration>, human_ttl: Option<Duration>, inactivity_timeout: Duration) -> Self {
        Self {
            agent_ttl,
            human_ttl,
            inactivity_timeout,
        }
    }

    pub fn from_settings(settings: &ClaimSettings) -> Self {
        let to_chrono = |d: std::time::Duration| Duration::from_std(d).ok();
        Self {
            agent_ttl: settings.agent_claim_ttl.and_then(to_chrono),
            human_ttl: settings.human_claim_ttl.and_then(to_chrono),
            inactivity_timeout: to_chrono(settings.inactivity_timeout).unwrap_or_else(|| Duration::hours(24)),
        }
    }
}

impl Default for ClaimantExpirationPolicy {
    fn default() -> Self {
        Self::from_settings(&ClaimSettings::default())
    }
}

impl ExpirationPolicy for ClaimantExpirationPolicy {
    fn calculate_expiration(&self, claimant: &Claimant, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let ttl = match claimant.kind() {
            ClaimantKind::Agent => self.agent_ttl,
            ClaimantKind::Human => self.human_ttl,
        };
        ttl.map(|ttl| now + ttl)
    }

    fn is_expired(&self, claim: &Claim, now: DateTime<Utc>) -> bool {
        match claim.expires_at {
            Some(expires_at) => expires_at <= now,
            None => claim.last_activity_at() + self.inactivity_timeout <= now,
        }
    }
}
