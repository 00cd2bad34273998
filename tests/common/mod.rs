//! Shared fixtures for the integration tests: an in-memory control plane and a
//! scripted IS-05 endpoint that records every call it receives.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Url;
use std::collections::HashMap;
use std::sync::Arc;

use nmos_control::error::{ControlError, ControlResult, RemoteCallError};
use nmos_control::events::EventPublisher;
use nmos_control::is05::{ConnectionApi, StagedPatch};
use nmos_control::models::{
    ConnectionKey, Flow, NmosReceiver, NmosSender, ReceiverConnection, ReceiverConnectionHistory,
};
use nmos_control::orchestration::{ConnectionActivationOrchestrator, ConnectionStateStore};
use nmos_control::policy::RoutingPolicyEngine;
use nmos_control::registry::MemoryRegistry;
use nmos_control::store::{ConnectionStore, MemoryStore};

pub const BASE_URL: &str = "http://device.local/x-nmos/connection/v1.1";

/// IS-05 double; receivers listed in `failures` answer with the scripted error
#[derive(Debug, Default)]
pub struct ScriptedConnectionApi {
    failures: Mutex<HashMap<String, RemoteCallError>>,
    calls: Mutex<Vec<(String, StagedPatch)>>,
}

impl ScriptedConnectionApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_receiver(&self, receiver_id: &str, status: u16) {
        self.fail_receiver_with(
            receiver_id,
            RemoteCallError::Status {
                status,
                body: "rejected".to_string(),
            },
        );
    }

    pub fn fail_receiver_with(&self, receiver_id: &str, error: RemoteCallError) {
        self.failures.lock().insert(receiver_id.to_string(), error);
    }

    /// Receiver ids in the order their PATCH arrived
    pub fn patched_receivers(&self) -> Vec<String> {
        self.calls.lock().iter().map(|(id, _)| id.clone()).collect()
    }

    pub fn bodies(&self) -> Vec<StagedPatch> {
        self.calls.lock().iter().map(|(_, body)| body.clone()).collect()
    }
}

fn receiver_from_url(url: &Url) -> String {
    url.path_segments()
        .and_then(|segments| {
            let segments: Vec<&str> = segments.collect();
            segments.iter().rev().nth(1).map(|s| s.to_string())
        })
        .unwrap_or_default()
}

#[async_trait]
impl ConnectionApi for ScriptedConnectionApi {
    async fn patch_staged(&self, url: &Url, body: &StagedPatch) -> Result<u16, RemoteCallError> {
        let receiver_id = receiver_from_url(url);
        self.calls.lock().push((receiver_id.clone(), body.clone()));

        match self.failures.lock().get(&receiver_id) {
            Some(error) => Err(error.clone()),
            None => Ok(200),
        }
    }
}

/// Connection state backend that is down for every call
#[derive(Debug, Default)]
pub struct UnavailableConnectionStore;

fn unavailable<T>() -> ControlResult<T> {
    Err(ControlError::DatabaseError("connection store unavailable".to_string()))
}

#[async_trait]
impl ConnectionStore for UnavailableConnectionStore {
    async fn upsert_connection(&self, _connection: ReceiverConnection) -> ControlResult<bool> {
        unavailable()
    }

    async fn get_connection(&self, _key: &ConnectionKey) -> ControlResult<Option<ReceiverConnection>> {
        unavailable()
    }

    async fn list_connections(&self, _receiver_id: &str) -> ControlResult<Vec<ReceiverConnection>> {
        unavailable()
    }

    async fn delete_connection(&self, _key: &ConnectionKey) -> ControlResult<bool> {
        unavailable()
    }

    async fn append_connection_history(&self, _entry: ReceiverConnectionHistory) -> ControlResult<()> {
        unavailable()
    }

    async fn list_connection_history(
        &self,
        _receiver_id: &str,
    ) -> ControlResult<Vec<ReceiverConnectionHistory>> {
        unavailable()
    }
}

pub fn flow(flow_id: &str, multicast_ip: &str, port: u16) -> Flow {
    Flow {
        flow_id: flow_id.to_string(),
        display_name: format!("{flow_id} program"),
        multicast_ip: multicast_ip.to_string(),
        source_ip: "10.0.0.10".to_string(),
        port,
        sender_id: Some(format!("{flow_id}-sender")),
    }
}

pub fn receiver(id: &str, format: &str) -> NmosReceiver {
    NmosReceiver {
        id: id.to_string(),
        device_id: "device-1".to_string(),
        format: format!("urn:x-nmos:format:{format}"),
    }
}

pub fn sender(id: &str, flow_id: Option<&str>, label: &str) -> NmosSender {
    NmosSender {
        id: id.to_string(),
        flow_id: flow_id.map(str::to_string),
        label: label.to_string(),
    }
}

/// Store, registry and IS-05 double wired into one orchestrator
pub struct TestPlane {
    pub store: Arc<MemoryStore>,
    pub registry: Arc<MemoryRegistry>,
    pub api: Arc<ScriptedConnectionApi>,
    pub connections: ConnectionStateStore,
    pub policy: RoutingPolicyEngine,
    pub orchestrator: Arc<ConnectionActivationOrchestrator>,
}

impl TestPlane {
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        Self::build(store.clone(), store)
    }

    /// Same plane with connection state kept in `connection_store`
    pub fn with_connection_store(connection_store: Arc<dyn ConnectionStore>) -> Self {
        Self::build(Arc::new(MemoryStore::new()), connection_store)
    }

    fn build(store: Arc<MemoryStore>, connection_store: Arc<dyn ConnectionStore>) -> Self {
        let registry = Arc::new(MemoryRegistry::new());
        let api = Arc::new(ScriptedConnectionApi::new());
        let connections = ConnectionStateStore::new(connection_store, EventPublisher::default());
        let policy = RoutingPolicyEngine::new(store.clone());
        let orchestrator = Arc::new(ConnectionActivationOrchestrator::new(
            registry.clone(),
            registry.clone(),
            api.clone(),
            store.clone(),
            connections.clone(),
            policy.clone(),
        ));

        Self {
            store,
            registry,
            api,
            connections,
            policy,
            orchestrator,
        }
    }
}
