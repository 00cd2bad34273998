//! # Receiver Connection Models
//!
//! Local record of what this system last instructed each receiver to do. This is
//! a cache of intended device state, not a reading of actual device state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Staged,
    Active,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Staged => write!(f, "staged"),
            Self::Active => write!(f, "active"),
        }
    }
}

impl std::str::FromStr for ConnectionState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "staged" => Ok(Self::Staged),
            "active" => Ok(Self::Active),
            _ => Err(format!("Invalid connection state: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionRole {
    Master,
    Backup,
}

impl fmt::Display for ConnectionRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Master => write!(f, "master"),
            Self::Backup => write!(f, "backup"),
        }
    }
}

impl std::str::FromStr for ConnectionRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "master" => Ok(Self::Master),
            "backup" => Ok(Self::Backup),
            _ => Err(format!("Invalid connection role: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionAction {
    Connect,
    Disconnect,
}

impl fmt::Display for ConnectionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect => write!(f, "connect"),
            Self::Disconnect => write!(f, "disconnect"),
        }
    }
}

impl std::str::FromStr for ConnectionAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "connect" => Ok(Self::Connect),
            "disconnect" => Ok(Self::Disconnect),
            _ => Err(format!("Invalid connection action: {s}")),
        }
    }
}

/// Identity of one logical connection row
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionKey {
    pub receiver_id: String,
    pub state: ConnectionState,
    pub role: ConnectionRole,
}

impl ConnectionKey {
    pub fn new(receiver_id: impl Into<String>, state: ConnectionState, role: ConnectionRole) -> Self {
        Self {
            receiver_id: receiver_id.into(),
            state,
            role,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiverConnection {
    pub receiver_id: String,
    pub state: ConnectionState,
    pub role: ConnectionRole,
    pub sender_id: Option<String>,
    pub flow_id: Option<String>,
    pub metadata: Option<Value>,
    pub changed_at: DateTime<Utc>,
    pub changed_by: String,
}

impl ReceiverConnection {
    pub fn key(&self) -> ConnectionKey {
        ConnectionKey::new(self.receiver_id.clone(), self.state, self.role)
    }
}

/// Append-only history row mirroring a connection mutation attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiverConnectionHistory {
    pub id: Uuid,
    pub receiver_id: String,
    pub state: ConnectionState,
    pub role: ConnectionRole,
    pub action: ConnectionAction,
    pub sender_id: Option<String>,
    pub flow_id: Option<String>,
    pub metadata: Option<Value>,
    pub changed_at: DateTime<Utc>,
    pub changed_by: String,
}

impl ReceiverConnectionHistory {
    pub fn from_connection(connection: &ReceiverConnection, action: ConnectionAction) -> Self {
        Self {
            id: Uuid::new_v4(),
            receiver_id: connection.receiver_id.clone(),
            state: connection.state,
            role: connection.role,
            action,
            sender_id: connection.sender_id.clone(),
            flow_id: connection.flow_id.clone(),
            metadata: connection.metadata.clone(),
            changed_at: connection.changed_at,
            changed_by: connection.changed_by.clone(),
        }
    }
}
