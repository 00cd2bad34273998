//! # IS-05 Connection API
//!
//! The single remote operation this core performs: PATCH a receiver's staged
//! endpoint with new transport parameters and an immediate activation.
//! [`ConnectionApi`] is the seam; [`HttpConnectionApi`] is the reqwest-backed
//! implementation.

pub mod client;

use async_trait::async_trait;
use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::error::RemoteCallError;
use crate::models::Flow;

pub use client::HttpConnectionApi;

#[async_trait]
pub trait ConnectionApi: Send + Sync {
    /// PATCH `url` with `body`; `Ok` means the device answered 2xx
    async fn patch_staged(&self, url: &Url, body: &StagedPatch) -> Result<u16, RemoteCallError>;
}

/// `<base>/single/receivers/<id>/staged`
pub fn staged_url(is05_base_url: &str, receiver_id: &str) -> Result<Url, RemoteCallError> {
    if receiver_id.trim().is_empty() {
        return Err(RemoteCallError::InvalidUrl("empty receiver id".to_string()));
    }
    let base = is05_base_url.trim().trim_end_matches('/');
    let raw = format!("{base}/single/receivers/{receiver_id}/staged");
    let url = Url::parse(&raw).map_err(|e| RemoteCallError::InvalidUrl(format!("{raw}: {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(RemoteCallError::InvalidUrl(format!(
            "{raw}: unsupported scheme '{other}'"
        ))),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Activation {
    pub mode: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportParams {
    pub multicast_ip: String,
    pub source_ip: String,
    pub destination_port: u16,
    pub rtp_enabled: bool,
}

/// Body of the staged PATCH
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedPatch {
    pub activation: Activation,
    pub master_enable: bool,
    pub transport_params: Vec<TransportParams>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<String>,
}

impl StagedPatch {
    /// Enable the receiver on `flow`'s transport and activate immediately
    pub fn for_flow(flow: &Flow, sender_id: Option<&str>) -> Self {
        Self {
            activation: Activation {
                mode: "activate_immediate".to_string(),
            },
            master_enable: true,
            transport_params: vec![TransportParams {
                multicast_ip: flow.multicast_ip.clone(),
                source_ip: flow.source_ip.clone(),
                destination_port: flow.port,
                rtp_enabled: true,
            }],
            sender_id: sender_id.filter(|id| !id.is_empty()).map(str::to_string),
        }
    }
}
