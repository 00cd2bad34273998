use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

use crate::models::{ConnectionAction, ConnectionRole, ConnectionState};

/// Events produced by the orchestration core
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ControlEvent {
    ConnectionChanged {
        receiver_id: String,
        state: ConnectionState,
        role: ConnectionRole,
        action: ConnectionAction,
        sender_id: Option<String>,
        flow_id: Option<String>,
        changed_by: String,
        changed_at: DateTime<Utc>,
    },
}

impl ControlEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ConnectionChanged { .. } => "connection_changed",
        }
    }
}

/// Event that has been published
#[derive(Debug, Clone)]
pub struct PublishedEvent {
    pub event: ControlEvent,
    pub published_at: DateTime<Utc>,
}

/// Broadcast publisher; publishing never blocks and never fails for lack of listeners
#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: broadcast::Sender<PublishedEvent>,
}

impl EventPublisher {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn publish(&self, event: ControlEvent) {
        let name = event.name();
        let published = PublishedEvent {
            event,
            published_at: Utc::now(),
        };

        // send() only errors when nobody is subscribed
        if self.sender.send(published).is_err() {
            trace!(event = name, "No subscribers for event");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PublishedEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn changed(receiver_id: &str) -> ControlEvent {
        ControlEvent::ConnectionChanged {
            receiver_id: receiver_id.to_string(),
            state: ConnectionState::Staged,
            role: ConnectionRole::Master,
            action: ConnectionAction::Connect,
            sender_id: Some("tx-1".to_string()),
            flow_id: Some("flow-1".to_string()),
            changed_by: "ops".to_string(),
            changed_at: Utc::now(),
        }
    }

    #[test]
    fn test_publish_without_subscribers_is_silent() {
        let publisher = EventPublisher::new(4);
        publisher.publish(changed("rx-1"));
        assert_eq!(publisher.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_subscribers_receive_events() {
        let publisher = EventPublisher::new(4);
        let mut rx = publisher.subscribe();

        publisher.publish(changed("rx-1"));

        let received = rx.recv().await.unwrap();
        assert_eq!(received.event.name(), "connection_changed");
        let ControlEvent::ConnectionChanged {
            receiver_id,
            action,
            ..
        } = received.event;
        assert_eq!(receiver_id, "rx-1");
        assert_eq!(action, ConnectionAction::Connect);
    }

    #[test]
    fn test_event_serializes_with_tag() {
        let value = serde_json::to_value(changed("rx-7")).unwrap();
        assert_eq!(value["event"], "connection_changed");
        assert_eq!(value["receiver_id"], "rx-7");
        assert_eq!(value["state"], "staged");
    }
}
