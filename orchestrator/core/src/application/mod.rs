// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod audit_recorder;
pub mod claim_service;

pub use audit_recorder::ClaimAuditRecorder;
pub use claim_service::{ClaimService, ClaimStatistics, ExpirationReport, HandoffService, StandardClaimService};
