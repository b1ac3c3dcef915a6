// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Load arithmetic shared by the balancer: weighted utilization, population
//! statistics and the balance score. Pure functions, no I/O.

use workclaim_core::domain::claim::{Claim, ClaimStatus, IssuePriority};

pub fn priority_weight(priority: IssuePriority) -> f64 {
    match priority {
        IssuePriority::Critical => 2.0,
        IssuePriority::High => 1.5,
        IssuePriority::Medium => 1.0,
        IssuePriority::Low => 0.5,
    }
}

/// Blocked work counts for half.
pub fn block_factor(status: ClaimStatus) -> f64 {
    if status == ClaimStatus::Blocked {
        0.5
    } else {
        1.0
    }
}

pub fn claim_weight(claim: &Claim) -> f64 {
    priority_weight(claim.priority) * block_factor(claim.status())
}

/// `min(1, Σ weight / max_claims)`. An agent with no capacity is fully
/// utilized as soon as it holds anything.
pub fn utilization(claims: &[Claim], max_claims: usize) -> f64 {
    if max_claims == 0 {
        return if claims.is_empty() { 0.0 } else { 1.0 };
    }
    let load: f64 = claims.iter().map(claim_weight).sum();
    (load / max_claims as f64).min(1.0)
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation.
pub fn std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let avg = mean(values);
    let variance = values.iter().map(|v| (v - avg).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

pub fn balance_score(utilizations: &[f64]) -> f64 {
    let avg = mean(utilizations);
    if utilizations.len() <= 1 || avg <= 0.0 {
        return 1.0;
    }
    (1.0 - std_dev(utilizations) / avg).clamp(0.0, 1.0)
}

/// `max(0, ceil(claim_count - max_claims * avg_utilization))`
pub fn excess_claims(claim_count: usize, max_claims: usize, avg_utilization: f64) -> usize {
    let excess = (claim_count as f64 - max_claims as f64 * avg_utilization).ceil();
    if excess > 0.0 {
        excess as usize
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use workclaim_core::domain::claimant::Claimant;

    fn claim(priority: IssuePriority) -> Claim {
        Claim::new("issue-1", Claimant::agent("a-1", "coder"), priority, Utc::now(), None)
    }

    #[test]
    fn test_critical_claim_saturates_two_slots() {
        let claims = vec![claim(IssuePriority::Critical)];
        assert_eq!(utilization(&claims, 2), 1.0);
    }

    #[test]
    fn test_blocked_claims_count_half() {
        let now = Utc::now();
        let mut blocked = claim(IssuePriority::High);
        blocked.transition_to(ClaimStatus::Blocked, None, now).unwrap();
        assert!((utilization(&[blocked], 3) - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_zero_capacity() {
        assert_eq!(utilization(&[], 0), 0.0);
        assert_eq!(utilization(&[claim(IssuePriority::Low)], 0), 1.0);
    }

    #[test]
    fn test_balance_score_bounds() {
        assert_eq!(balance_score(&[]), 1.0);
        assert_eq!(balance_score(&[0.7]), 1.0);
        assert_eq!(balance_score(&[0.0, 0.0]), 1.0);
        assert_eq!(balance_score(&[0.5, 0.5, 0.5]), 1.0);

        let skewed = [1.0, 0.1, 0.1];
        let expected = (1.0 - std_dev(&skewed) / mean(&skewed)).max(0.0);
        assert!((balance_score(&skewed) - expected).abs() < 1e-9);
        assert!((0.0..=1.0).contains(&balance_score(&[1.0, 0.0, 0.0])));
    }

    #[test]
    fn test_excess_claims_never_negative() {
        assert_eq!(excess_claims(4, 4, 1.0 / 3.0), 3);
        assert_eq!(excess_claims(1, 4, 0.5), 0);
    }
}
