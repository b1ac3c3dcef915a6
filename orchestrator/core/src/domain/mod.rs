// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Claim Domain Layer
//!
//! Pure domain types for issue ownership. No I/O dependencies.
//!
//! | Module | Key Types |
//! |--------|-----------|
//! | [`claimant`] | `Claimant`, `AgentType` |
//! | [`claim`] | `Claim`, `ClaimStatus`, `ClaimError`, `Outcome` |
//! | [`clock`] | `Clock`, `SystemClock`, `ManualClock` |
//! | [`events`] | `ClaimEvent`, `LoadEvent`, `ClaimEventRecord` |
//! | [`policy`] | `ClaimValidator`, `ExpirationPolicy` |
//! | [`repository`] | `ClaimRepository`, `ClaimEventStore` |
//! | [`coordination_config`] | `CoordinationConfig` |

pub mod claimant;
pub mod claim;
pub mod clock;
pub mod events;
pub mod policy;
pub mod repository;
pub mod coordination_config;
