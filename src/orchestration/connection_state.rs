//! # Connection State Store
//!
//! The durable record of what this system last told each receiver to do. Every
//! mutation attempt lands in the history; successful changes are broadcast as
//! [`ControlEvent::ConnectionChanged`].

use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::ControlResult;
use crate::events::{ControlEvent, EventPublisher};
use crate::models::{
    ConnectionAction, ConnectionKey, ConnectionRole, ConnectionState, ReceiverConnection,
    ReceiverConnectionHistory,
};
use crate::store::ConnectionStore;

/// Values written for one `connect`
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectRecord {
    pub receiver_id: String,
    pub state: ConnectionState,
    pub role: ConnectionRole,
    pub sender_id: Option<String>,
    pub flow_id: Option<String>,
    pub metadata: Option<Value>,
}

#[derive(Clone)]
pub struct ConnectionStateStore {
    store: Arc<dyn ConnectionStore>,
    events: EventPublisher,
}

impl std::fmt::Debug for ConnectionStateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionStateStore")
            .field("subscribers", &self.events.subscriber_count())
            .finish_non_exhaustive()
    }
}

impl ConnectionStateStore {
    pub fn new(store: Arc<dyn ConnectionStore>, events: EventPublisher) -> Self {
        Self { store, events }
    }

    pub fn events(&self) -> &EventPublisher {
        &self.events
    }

    /// Upsert the connection row and append a `connect` history entry
    pub async fn record_connect(
        &self,
        record: ConnectRecord,
        changed_by: &str,
    ) -> ControlResult<ReceiverConnection> {
        let connection = ReceiverConnection {
            receiver_id: record.receiver_id,
            state: record.state,
            role: record.role,
            sender_id: record.sender_id,
            flow_id: record.flow_id,
            metadata: record.metadata,
            changed_at: Utc::now(),
            changed_by: changed_by.to_string(),
        };

        let history = ReceiverConnectionHistory::from_connection(&connection, ConnectionAction::Connect);
        let applied = self.store.upsert_connection(connection.clone()).await;
        if let Err(e) = self.store.append_connection_history(history).await {
            warn!(receiver_id = %connection.receiver_id, error = %e, "Failed to append connection history");
        }

        if applied? {
            self.publish(&connection, ConnectionAction::Connect);
        } else {
            debug!(receiver_id = %connection.receiver_id, "Newer connection row kept");
        }
        Ok(connection)
    }

    /// Delete the connection row; returns whether one existed
    pub async fn record_disconnect(&self, key: &ConnectionKey, changed_by: &str) -> ControlResult<bool> {
        let removed = self.store.delete_connection(key).await;

        let tombstone = ReceiverConnection {
            receiver_id: key.receiver_id.clone(),
            state: key.state,
            role: key.role,
            sender_id: None,
            flow_id: None,
            metadata: None,
            changed_at: Utc::now(),
            changed_by: changed_by.to_string(),
        };
        let history = ReceiverConnectionHistory::from_connection(&tombstone, ConnectionAction::Disconnect);
        if let Err(e) = self.store.append_connection_history(history).await {
            warn!(receiver_id = %key.receiver_id, error = %e, "Failed to append connection history");
        }

        let removed = removed?;
        if removed {
            self.publish(&tombstone, ConnectionAction::Disconnect);
        }
        Ok(removed)
    }

    pub async fn get(&self, key: &ConnectionKey) -> ControlResult<Option<ReceiverConnection>> {
        self.store.get_connection(key).await
    }

    /// Current rows for one receiver
    pub async fn current(&self, receiver_id: &str) -> ControlResult<Vec<ReceiverConnection>> {
        self.store.list_connections(receiver_id).await
    }

    /// Every recorded change for one receiver, oldest first
    pub async fn history(&self, receiver_id: &str) -> ControlResult<Vec<ReceiverConnectionHistory>> {
        self.store.list_connection_history(receiver_id).await
    }

    fn publish(&self, connection: &ReceiverConnection, action: ConnectionAction) {
        self.events.publish(ControlEvent::ConnectionChanged {
            receiver_id: connection.receiver_id.clone(),
            state: connection.state,
            role: connection.role,
            action,
            sender_id: connection.sender_id.clone(),
            flow_id: connection.flow_id.clone(),
            changed_by: connection.changed_by.clone(),
            changed_at: connection.changed_at,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn staged(receiver_id: &str, sender_id: &str) -> ConnectRecord {
        ConnectRecord {
            receiver_id: receiver_id.to_string(),
            state: ConnectionState::Staged,
            role: ConnectionRole::Master,
            sender_id: Some(sender_id.to_string()),
            flow_id: Some("flow-1".to_string()),
            metadata: None,
        }
    }

    #[tokio::test]
    async fn test_connect_writes_row_history_and_event() {
        let store = Arc::new(MemoryStore::new());
        let state = ConnectionStateStore::new(store, EventPublisher::new(8));
        let mut events = state.events().subscribe();

        state.record_connect(staged("rx-1", "tx-1"), "ops").await.unwrap();
        state.record_connect(staged("rx-1", "tx-2"), "ops").await.unwrap();

        let current = state.current("rx-1").await.unwrap();
        assert_eq!(current.len(), 1);
        assert_eq!(current[0].sender_id.as_deref(), Some("tx-2"));

        let history = state.history("rx-1").await.unwrap();
        assert_eq!(history.len(), 2);
        assert!(history.iter().all(|h| h.action == ConnectionAction::Connect));

        assert!(events.recv().await.is_ok());
        assert!(events.recv().await.is_ok());
    }

    #[tokio::test]
    async fn test_disconnect_removes_row_and_is_recorded() {
        let store = Arc::new(MemoryStore::new());
        let state = ConnectionStateStore::new(store, EventPublisher::new(8));
        let mut record = staged("rx-2", "tx-1");
        record.state = ConnectionState::Active;
        state.record_connect(record, "ops").await.unwrap();

        let key = ConnectionKey::new("rx-2", ConnectionState::Active, ConnectionRole::Master);
        assert!(state.record_disconnect(&key, "ops").await.unwrap());
        assert!(!state.record_disconnect(&key, "ops").await.unwrap());
        assert!(state.get(&key).await.unwrap().is_none());

        let actions: Vec<_> = state
            .history("rx-2")
            .await
            .unwrap()
            .into_iter()
            .map(|h| h.action)
            .collect();
        assert_eq!(
            actions,
            vec![
                ConnectionAction::Connect,
                ConnectionAction::Disconnect,
                ConnectionAction::Disconnect
            ]
        );
    }
}
