// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # `workclaim-swarm`: Work Redistribution Crate
//!
//! Redistributes claimed work across a swarm of agents (and the humans
//! working next to them) without a central scheduler.
//!
//! ## Crate Layout
//!
//! | Module | Layer | Contents |
//! |--------|-------|----------|
//! | [`domain`] | Domain | `StealingPolicy`, `StealEligibility`, load arithmetic, `AgentRegistry`, load and rebalance types |
//! | [`application`] | Application | `WorkStealingService`, `LoadBalancer` |
//! | [`infrastructure`] | Infrastructure | `InMemoryAgentRegistry` |
//!
//! ## Key Concepts
//!
//! - **Work stealing**: an owner (or the stale-work sweep) opens a claim for
//!   stealing; an eligible claimant takes it, and the previous owner gets a
//!   contest window to object.
//! - **Cross-type rules**: a directed compatibility graph between agent types,
//!   with a coordinator type allowed to take anything and human claims
//!   protected from agents.
//! - **Load balancing**: weighted utilization per agent, a balance score per
//!   swarm, and rebalancing through handoff requests the targets accept.
//!
//! Claims themselves live in `workclaim-core`; this crate shares its
//! repository and per-issue lock manager.

pub mod domain;
pub mod application;
pub mod infrastructure;

pub use domain::*;
