//! # Connection Events
//!
//! Structured events emitted on every successful connection state change,
//! fanned out to in-process subscribers over a tokio broadcast channel.
//!
//! ## Usage
//!
//! ```rust
//! use chrono::Utc;
//! use nmos_control::events::{ControlEvent, EventPublisher};
//! use nmos_control::models::{ConnectionAction, ConnectionRole, ConnectionState};
//!
//! # tokio_test::block_on(async {
//! let publisher = EventPublisher::new(16);
//! let mut rx = publisher.subscribe();
//!
//! publisher.publish(ControlEvent::ConnectionChanged {
//!     receiver_id: "rx-1".to_string(),
//!     state: ConnectionState::Active,
//!     role: ConnectionRole::Master,
//!     action: ConnectionAction::Connect,
//!     sender_id: Some("tx-1".to_string()),
//!     flow_id: None,
//!     changed_by: "operator".to_string(),
//!     changed_at: Utc::now(),
//! });
//!
//! let received = rx.recv().await.unwrap();
//! assert_eq!(received.event.name(), "connection_changed");
//! # });
//! ```

pub mod publisher;

pub use publisher::{ControlEvent, EventPublisher, PublishedEvent};
