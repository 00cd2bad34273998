//! # Flow Catalogue and NMOS Registry Read Model
//!
//! Narrow read interfaces over discovered data. Discovery itself (IS-04 query
//! subscriptions, registry mirroring) happens outside this crate.

pub mod memory;

use async_trait::async_trait;

use crate::error::ControlResult;
use crate::models::{Flow, NmosReceiver, NmosSender};

pub use memory::MemoryRegistry;

#[async_trait]
pub trait FlowLookup: Send + Sync {
    async fn get_flow(&self, flow_id: &str) -> ControlResult<Option<Flow>>;
    async fn list_flows(&self) -> ControlResult<Vec<Flow>>;
}

#[async_trait]
pub trait NmosRegistry: Send + Sync {
    /// All receivers, or those of one device
    async fn list_receivers(&self, device_id: Option<&str>) -> ControlResult<Vec<NmosReceiver>>;
    async fn list_senders(&self) -> ControlResult<Vec<NmosSender>>;
}
