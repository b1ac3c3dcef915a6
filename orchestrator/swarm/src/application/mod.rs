// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Swarm use cases: taking over abandoned work and spreading load.
//!
//! Both services read and write claims through the shared `ClaimRepository`
//! and never keep claims of their own.

pub mod load_balancer;
pub mod work_stealing;

pub use load_balancer::{LoadBalancer, LoadBalancerError, StandardLoadBalancer};
pub use work_stealing::{StandardWorkStealingService, WorkStealingService};
