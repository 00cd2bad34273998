use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;

use super::{FlowLookup, NmosRegistry};
use crate::error::ControlResult;
use crate::models::{Flow, NmosReceiver, NmosSender};

/// Registry snapshot held in memory, keyed by id for stable listing order
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    flows: RwLock<BTreeMap<String, Flow>>,
    receivers: RwLock<BTreeMap<String, NmosReceiver>>,
    senders: RwLock<BTreeMap<String, NmosSender>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_flow(&self, flow: Flow) {
        self.flows.write().insert(flow.flow_id.clone(), flow);
    }

    pub fn remove_flow(&self, flow_id: &str) -> bool {
        self.flows.write().remove(flow_id).is_some()
    }

    pub fn put_receiver(&self, receiver: NmosReceiver) {
        self.receivers.write().insert(receiver.id.clone(), receiver);
    }

    pub fn put_sender(&self, sender: NmosSender) {
        self.senders.write().insert(sender.id.clone(), sender);
    }
}

#[async_trait]
impl FlowLookup for MemoryRegistry {
    async fn get_flow(&self, flow_id: &str) -> ControlResult<Option<Flow>> {
        Ok(self.flows.read().get(flow_id).cloned())
    }

    async fn list_flows(&self) -> ControlResult<Vec<Flow>> {
        Ok(self.flows.read().values().cloned().collect())
    }
}

#[async_trait]
impl NmosRegistry for MemoryRegistry {
    async fn list_receivers(&self, device_id: Option<&str>) -> ControlResult<Vec<NmosReceiver>> {
        Ok(self
            .receivers
            .read()
            .values()
            .filter(|receiver| device_id.map_or(true, |id| receiver.device_id == id))
            .cloned()
            .collect())
    }

    async fn list_senders(&self) -> ControlResult<Vec<NmosSender>> {
        Ok(self.senders.read().values().cloned().collect())
    }
}
