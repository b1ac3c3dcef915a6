// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Claim Audit Recorder Application Service
//!
//! Subscribes to claim events on the event bus and appends them to the
//! [`ClaimEventStore`], giving every issue a replayable history of who held
//! it, who asked for it and who took it.
//!
//! Failures are logged and skipped; the recorder never stops the engines.

use crate::domain::events::ClaimEventRecord;
use crate::domain::repository::ClaimEventStore;
use crate::infrastructure::event_bus::{DomainEvent, EventBus, EventBusError};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

// ============================================================================
// Service
// ============================================================================

pub struct ClaimAuditRecorder {
    store: Arc<dyn ClaimEventStore>,
    event_bus: Arc<EventBus>,
}

impl ClaimAuditRecorder {
    pub fn new(store: Arc<dyn ClaimEventStore>, event_bus: Arc<EventBus>) -> Self {
        Self { store, event_bus }
    }

    /// Spawn the recording task. It subscribes before returning, so events
    /// published after `start` are never missed, and exits once the bus closes.
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        info!("Starting claim audit recorder background task");

        let mut receiver = self.event_bus.subscribe();
        tokio::spawn(async move {
            let mut recorded = 0u64;
            let mut errors_encountered = 0u64;

            loop {
                match receiver.recv().await {
                    Ok(DomainEvent::Claim(event)) => {
                        let result = match ClaimEventRecord::from_event(&event) {
                            Ok(record) => self.store.append(&record).await.map_err(|e| e.to_string()),
                            Err(e) => Err(e.to_string()),
                        };

                        match result {
                            Ok(()) => {
                                recorded += 1;
                                if recorded % 100 == 0 {
                                    debug!("Claim audit recorder stored {} events", recorded);
                                }
                            }
                            Err(e) => {
                                errors_encountered += 1;
                                error!(event = ?event, error = %e, "Failed to record claim event");
                                if errors_encountered % 10 == 0 {
                                    warn!("Claim audit recording has failed {} times", errors_encountered);
                                }
                            }
                        }
                    }
                    Ok(DomainEvent::Load(_)) => continue,
                    Err(EventBusError::Closed) => break,
                    Err(EventBusError::Lagged(n)) => {
                        warn!("Claim audit recorder lagged by {} events, audit trail has gaps", n);
                    }
                    Err(e) => {
                        error!(error = ?e, "Unexpected error receiving event from bus");
                    }
                }
            }

            info!(
                "Claim audit recorder shut down (recorded {} events, {} errors)",
                recorded, errors_encountered
            );
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
