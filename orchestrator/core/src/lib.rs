// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # `workclaim-core`: Issue Ownership Crate
//!
//! Mutual-exclusion ownership of issues shared by humans and agents, with an
//! auditable handoff protocol between owners.
//!
//! ## Crate Layout
//!
//! | Module | Layer | Contents |
//! |--------|-------|----------|
//! | [`domain`] | Domain | `Claim` aggregate, `Claimant`, status machine, events, repository and policy contracts, `CoordinationConfig` |
//! | [`application`] | Application | `ClaimService` / `HandoffService` use cases, `ClaimAuditRecorder` |
//! | [`infrastructure`] | Infrastructure | `EventBus`, `IssueLockManager`, in-memory and sled repositories |
//!
//! ## Key Concepts
//!
//! - **Claim**: at most one live claim per issue id. Ownership only changes
//!   through an accepted handoff, a steal, or a resolved contest.
//! - **Soft vs hard failures**: expected business rejections come back as
//!   `Outcome::Rejected`; protocol violations as `Err(ClaimError)`.
//! - **Per-issue serialization**: every mutation of one issue runs under the
//!   same async mutex, shared with the work-stealing engine in `workclaim-swarm`.

pub mod domain;
pub mod application;
pub mod infrastructure;

pub use domain::*;
