// Event Bus Implementation - Pub/Sub for Domain Events
//
// Provides in-memory event streaming using tokio broadcast channels.
// Services publish only after the repository write for a change succeeded;
// subscribers (audit recorder, dashboards) must tolerate at-least-once delivery
// and handle lag when they fall behind the bounded buffer.

use crate::domain::coordination_config::EventBusSettings;
use crate::domain::events::{ClaimEvent, LoadEvent};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Unified domain event type for the event bus
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    Claim(ClaimEvent),
    Load(LoadEvent),
}

impl DomainEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Claim(event) => event.event_type(),
            Self::Load(event) => event.event_type(),
        }
    }
}

/// Event bus for publishing and subscribing to domain events
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with specified channel capacity
    /// Capacity determines how many events can be buffered before dropping old ones
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Create event bus with default capacity (1000)
    pub fn with_default_capacity() -> Self {
        Self::new(1000)
    }

    pub fn from_settings(settings: &EventBusSettings) -> Self {
        Self::new(settings.capacity)
    }

    /// Publish an issue-scoped claim event
    pub fn publish_claim_event(&self, event: ClaimEvent) {
        self.publish(DomainEvent::Claim(event));
    }

    /// Publish a swarm load event
    pub fn publish_load_event(&self, event: LoadEvent) {
        self.publish(DomainEvent::Load(event));
    }

    fn publish(&self, event: DomainEvent) {
        debug!(event_type = event.event_type(), "Publishing event");

        // send() only fails when nobody is subscribed
        let receiver_count = self.sender.send(event).unwrap_or(0);

        if receiver_count == 0 {
            debug!("No subscribers listening to event");
        }
    }

    /// Subscribe to all domain events
    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    /// Subscribe to claim events concerning a single issue
    pub fn subscribe_issue(&self, issue_id: impl Into<String>) -> IssueEventReceiver {
        IssueEventReceiver {
            receiver: self.sender.subscribe(),
            issue_id: issue_id.into(),
        }
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

fn map_recv_error(e: broadcast::error::RecvError) -> EventBusError {
    match e {
        broadcast::error::RecvError::Closed => EventBusError::Closed,
        broadcast::error::RecvError::Lagged(n) => {
            warn!("Event receiver lagged by {} events", n);
            EventBusError::Lagged(n)
        }
    }
}

/// Receiver for all domain events
pub struct EventReceiver {
    receiver: broadcast::Receiver<DomainEvent>,
}

impl EventReceiver {
    /// Receive the next event (waits until one is available)
    pub async fn recv(&mut self) -> Result<DomainEvent, EventBusError> {
        self.receiver.recv().await.map_err(map_recv_error)
    }

    /// Try to receive an event without blocking
    pub fn try_recv(&mut self) -> Result<DomainEvent, EventBusError> {
        self.receiver.try_recv().map_err(|e| match e {
            broadcast::error::TryRecvError::Empty => EventBusError::Empty,
            broadcast::error::TryRecvError::Closed => EventBusError::Closed,
            broadcast::error::TryRecvError::Lagged(n) => {
                warn!("Event receiver lagged by {} events", n);
                EventBusError::Lagged(n)
            }
        })
    }

    /// Drain every event currently buffered for this receiver
    pub fn drain(&mut self) -> Vec<DomainEvent> {
        let mut events = Vec::new();
        loop {
            match self.try_recv() {
                Ok(event) => events.push(event),
                Err(EventBusError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }
        events
    }
}

/// Receiver for one issue's claim events (filtered)
pub struct IssueEventReceiver {
    receiver: broadcast::Receiver<DomainEvent>,
    issue_id: String,
}

impl IssueEventReceiver {
    /// Receive the next claim event concerning the subscribed issue.
    /// Batched events that list the issue are delivered too.
    pub async fn recv(&mut self) -> Result<ClaimEvent, EventBusError> {
        loop {
            let event = self.receiver.recv().await.map_err(map_recv_error)?;
            if let DomainEvent::Claim(claim_event) = event {
                if claim_event.concerns(&self.issue_id) {
                    return Ok(claim_event);
                }
            }
        }
    }
}

/// Errors that can occur when receiving events
#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("Event bus is closed")]
    Closed,

    #[error("No events available")]
    Empty,

    #[error("Receiver lagged by {0} events (events were dropped)")]
    Lagged(u64),
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::claim::IssuePriority;
    use crate::domain::claimant::Claimant;
    use chrono::Utc;

    fn claimed(issue_id: &str) -> ClaimEvent {
        ClaimEvent::IssueClaimed {
            issue_id: issue_id.to_string(),
            claimant: Claimant::agent("agent-1", "coder"),
            priority: IssuePriority::High,
            expires_at: None,
            claimed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_event_bus_publish_subscribe() {
        let event_bus = EventBus::new(10);
        let mut receiver = event_bus.subscribe();

        event_bus.publish_claim_event(claimed("issue-1"));

        let received = receiver.recv().await.unwrap();
        match received {
            DomainEvent::Claim(ClaimEvent::IssueClaimed { issue_id, .. }) => {
                assert_eq!(issue_id, "issue-1");
            }
            _ => panic!("Wrong event type received"),
        }
    }

    #[tokio::test]
    async fn test_issue_event_filtering() {
        let event_bus = EventBus::new(10);
        let mut receiver = event_bus.subscribe_issue("issue-2");

        // Different issue, filtered out
        event_bus.publish_claim_event(claimed("issue-1"));
        event_bus.publish_claim_event(claimed("issue-2"));

        let received = receiver.recv().await.unwrap();
        assert_eq!(received.issue_id(), Some("issue-2"));
    }

    #[tokio::test]
    async fn test_batched_event_reaches_listed_issue() {
        let event_bus = EventBus::new(10);
        let mut receiver = event_bus.subscribe_issue("issue-3");

        event_bus.publish_claim_event(ClaimEvent::StaleWorkDetected {
            count: 2,
            issue_ids: vec!["issue-3".to_string(), "issue-4".to_string()],
            since: Utc::now(),
            detected_at: Utc::now(),
        });

        let received = receiver.recv().await.unwrap();
        assert_eq!(received.event_type(), "issue:stale");
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let event_bus = EventBus::new(10);
        let mut receiver1 = event_bus.subscribe();
        let mut receiver2 = event_bus.subscribe();

        assert_eq!(event_bus.subscriber_count(), 2);

        event_bus.publish_claim_event(claimed("issue-5"));

        // Both receivers should get the event
        let _ = receiver1.recv().await.unwrap();
        let _ = receiver2.recv().await.unwrap();
    }

    #[test]
    fn test_lagged_receiver_reports_drop() {
        let event_bus = EventBus::new(2);
        let mut receiver = event_bus.subscribe();
        for i in 0..4 {
            event_bus.publish_claim_event(claimed(&format!("issue-{}", i)));
        }
        assert!(matches!(receiver.try_recv(), Err(EventBusError::Lagged(2))));
        assert_eq!(receiver.drain().len(), 2);
    }
}
