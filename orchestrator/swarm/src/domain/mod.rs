// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Swarm Domain Layer
//!
//! Pure domain types for redistributing work across a swarm. No I/O dependencies.
//!
//! | Module | Key Types |
//! |--------|-----------|
//! | [`swarm`] | `SwarmId`, `AgentProfile`, `SwarmLoadInfo`, `ImbalanceReport`, `RebalanceResult` |
//! | [`stealing`] | `StealingPolicy`, `DefaultStealingPolicy`, `StealEligibility` |
//! | [`load`] | utilization and balance-score arithmetic |
//! | [`registry`] | `AgentRegistry` contract |

pub mod load;
pub mod registry;
pub mod stealing;
pub mod swarm;

pub use registry::AgentRegistry;
pub use stealing::*;
pub use swarm::*;
