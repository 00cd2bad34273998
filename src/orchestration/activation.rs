//! # Connection Activation Orchestrator
//!
//! Executes one logical activation against a set of receivers:
//!
//! 1. validate the request and resolve the flow
//! 2. order receivers (`safe_switch` sorts by media format)
//! 3. PATCH each receiver's staged endpoint
//! 4. record successful receivers in the connection state store
//! 5. aggregate per-receiver outcomes
//!
//! `safe_switch` dispatches strictly one receiver after another so the
//! audio/video ordering holds on the wire. `immediate` fans out concurrently and
//! collects results by submission index. A failing receiver never stops the
//! others, and nothing is retried.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use opentelemetry::KeyValue;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

use super::connection_state::{ConnectRecord, ConnectionStateStore};
use super::ordering::order_receivers;
use crate::error::{ControlError, ControlResult};
use crate::is05::{staged_url, ConnectionApi, StagedPatch};
use crate::metrics;
use crate::models::{
    ActivationMode, Actor, ConnectionRole, ConnectionState, Flow, MediaFormat,
    NewScheduledActivation, ScheduledActivation,
};
use crate::policy::{ConnectionIntent, PolicyViolation, RoutingPolicyEngine};
use crate::registry::{FlowLookup, NmosRegistry};
use crate::store::ScheduledActivationStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivationRequest {
    pub flow_id: String,
    pub receiver_ids: Vec<String>,
    pub is05_base_url: String,
    #[serde(default)]
    pub sender_id: Option<String>,
    #[serde(default)]
    pub mode: ActivationMode,
}

impl ActivationRequest {
    pub fn validate(&self) -> ControlResult<()> {
        if self.flow_id.trim().is_empty() {
            return Err(ControlError::validation("flow_id is required"));
        }
        if self.receiver_ids.is_empty() {
            return Err(ControlError::validation("at least one receiver_id is required"));
        }
        if self.receiver_ids.iter().any(|id| id.trim().is_empty()) {
            return Err(ControlError::validation("receiver_ids cannot contain blank ids"));
        }
        if self.is05_base_url.trim().is_empty() {
            return Err(ControlError::validation("is05_base_url is required"));
        }
        Ok(())
    }
}

impl From<&ScheduledActivation> for ActivationRequest {
    fn from(row: &ScheduledActivation) -> Self {
        Self {
            flow_id: row.flow_id.clone(),
            receiver_ids: row.receiver_ids.clone(),
            is05_base_url: row.is05_base_url.clone(),
            sender_id: row.sender_id.clone(),
            mode: row.mode,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiverPatchResult {
    pub receiver_id: String,
    pub success: bool,
    pub status_code: Option<u16>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationOutcome {
    /// At least one receiver accepted the patch
    Executed,
    Failed,
}

impl fmt::Display for ActivationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Executed => write!(f, "executed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Aggregate result of one activation, per receiver in dispatch order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivationReport {
    pub flow_id: String,
    pub mode: ActivationMode,
    pub outcome: ActivationOutcome,
    pub succeeded: usize,
    pub failed: usize,
    pub results: Vec<ReceiverPatchResult>,
}

impl ActivationReport {
    fn aggregate(flow_id: &str, mode: ActivationMode, results: Vec<ReceiverPatchResult>) -> Self {
        let succeeded = results.iter().filter(|r| r.success).count();
        let failed = results.len() - succeeded;
        Self {
            flow_id: flow_id.to_string(),
            mode,
            outcome: if succeeded > 0 {
                ActivationOutcome::Executed
            } else {
                ActivationOutcome::Failed
            },
            succeeded,
            failed,
            results,
        }
    }
}

#[derive(Clone)]
pub struct ConnectionActivationOrchestrator {
    flows: Arc<dyn FlowLookup>,
    registry: Arc<dyn NmosRegistry>,
    api: Arc<dyn ConnectionApi>,
    schedules: Arc<dyn ScheduledActivationStore>,
    connections: ConnectionStateStore,
    policy: RoutingPolicyEngine,
}

impl fmt::Debug for ConnectionActivationOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionActivationOrchestrator")
            .field("connections", &self.connections)
            .finish_non_exhaustive()
    }
}

impl ConnectionActivationOrchestrator {
    pub fn new(
        flows: Arc<dyn FlowLookup>,
        registry: Arc<dyn NmosRegistry>,
        api: Arc<dyn ConnectionApi>,
        schedules: Arc<dyn ScheduledActivationStore>,
        connections: ConnectionStateStore,
        policy: RoutingPolicyEngine,
    ) -> Self {
        Self {
            flows,
            registry,
            api,
            schedules,
            connections,
            policy,
        }
    }

    pub async fn resolve_flow(&self, flow_id: &str) -> ControlResult<Flow> {
        self.flows
            .get_flow(flow_id)
            .await?
            .ok_or_else(|| ControlError::not_found("flow", flow_id))
    }

    /// Activate without a policy gate
    pub async fn activate(
        &self,
        request: &ActivationRequest,
        actor: &str,
    ) -> ControlResult<ActivationReport> {
        request.validate()?;
        let flow = self.resolve_flow(&request.flow_id).await?;
        self.activate_flow(&flow, request, actor).await
    }

    /// Check every receiver against routing policy, then activate.
    ///
    /// Violations reject the request unless `override_policy` is set, in which
    /// case each overridden policy is audited under the actor's name first.
    pub async fn activate_gated(
        &self,
        request: &ActivationRequest,
        actor: &Actor,
        override_policy: bool,
    ) -> ControlResult<ActivationReport> {
        request.validate()?;
        let flow = self.resolve_flow(&request.flow_id).await?;
        self.enforce_policy(&flow, request, actor, override_policy)
            .await?;
        self.activate_flow(&flow, request, &actor.username).await
    }

    /// Accept an activation for later execution.
    ///
    /// The request passes the same validation, flow lookup and policy gate as
    /// [`activate_gated`](Self::activate_gated) before the row is written.
    #[instrument(skip(self, request, actor), fields(flow_id = %request.flow_id, user = %actor.username))]
    pub async fn schedule(
        &self,
        request: &ActivationRequest,
        scheduled_at: DateTime<Utc>,
        actor: &Actor,
        override_policy: bool,
    ) -> ControlResult<ScheduledActivation> {
        request.validate()?;
        let flow = self.resolve_flow(&request.flow_id).await?;
        self.enforce_policy(&flow, request, actor, override_policy)
            .await?;

        let row = self
            .schedules
            .create_scheduled_activation(NewScheduledActivation {
                flow_id: flow.flow_id.clone(),
                receiver_ids: request.receiver_ids.clone(),
                is05_base_url: request.is05_base_url.clone(),
                sender_id: request.sender_id.clone(),
                scheduled_at,
                mode: request.mode,
                created_by: actor.username.clone(),
            })
            .await?;
        info!(scheduled_id = %row.id, scheduled_at = %row.scheduled_at, "Activation scheduled");
        Ok(row)
    }

    async fn enforce_policy(
        &self,
        flow: &Flow,
        request: &ActivationRequest,
        actor: &Actor,
        override_policy: bool,
    ) -> ControlResult<()> {
        let sender_id = request
            .sender_id
            .clone()
            .or_else(|| flow.sender_id.clone())
            .unwrap_or_default();
        let sender_label = self.sender_label(&sender_id).await;

        let mut blocked: Vec<(ConnectionIntent, Vec<PolicyViolation>)> = Vec::new();
        for receiver_id in &request.receiver_ids {
            let mut intent = ConnectionIntent::new(sender_id.clone(), receiver_id.clone())
                .with_flow(flow.flow_id.clone(), Some(flow.display_name.clone()));
            intent.sender_label = sender_label.clone();

            let violations = self.policy.check_connection(&intent).await;
            if !violations.is_empty() {
                blocked.push((intent, violations));
            }
        }

        if blocked.is_empty() {
            return Ok(());
        }
        if !override_policy {
            let reasons: Vec<String> = blocked
                .iter()
                .flat_map(|(_, violations)| violations.iter().map(|v| v.reason.clone()))
                .collect();
            return Err(ControlError::PolicyViolation(reasons.join("; ")));
        }
        for (intent, violations) in &blocked {
            self.policy
                .record_overrides(violations, intent, &actor.username)
                .await;
        }
        info!(
            actor = %actor.username,
            receivers = blocked.len(),
            "Routing policy overridden"
        );
        Ok(())
    }

    /// Activate against an already resolved flow
    #[instrument(skip(self, flow, request), fields(flow_id = %flow.flow_id, mode = %request.mode, receivers = request.receiver_ids.len()))]
    pub async fn activate_flow(
        &self,
        flow: &Flow,
        request: &ActivationRequest,
        actor: &str,
    ) -> ControlResult<ActivationReport> {
        request.validate()?;
        let start = Instant::now();

        let formats = match request.mode {
            ActivationMode::SafeSwitch => self.receiver_formats().await,
            ActivationMode::Immediate => HashMap::new(),
        };
        let ordered = order_receivers(&request.receiver_ids, &formats, request.mode);

        let sender_id = request.sender_id.as_deref().or(flow.sender_id.as_deref());
        let body = StagedPatch::for_flow(flow, sender_id);

        let results = match request.mode {
            ActivationMode::SafeSwitch => {
                let mut results = Vec::with_capacity(ordered.len());
                for receiver_id in &ordered {
                    results.push(self.patch_receiver(flow, request, &body, receiver_id, actor).await);
                }
                results
            }
            ActivationMode::Immediate => {
                join_all(
                    ordered
                        .iter()
                        .map(|receiver_id| self.patch_receiver(flow, request, &body, receiver_id, actor)),
                )
                .await
            }
        };

        let report = ActivationReport::aggregate(&flow.flow_id, request.mode, results);

        let labels = [
            KeyValue::new("mode", request.mode.to_string()),
            KeyValue::new("outcome", report.outcome.to_string()),
        ];
        metrics::activations_total().add(1, &labels);
        metrics::activation_duration().record(start.elapsed().as_millis() as f64, &labels);

        info!(
            succeeded = report.succeeded,
            failed = report.failed,
            outcome = %report.outcome,
            "Activation finished"
        );
        Ok(report)
    }

    async fn patch_receiver(
        &self,
        flow: &Flow,
        request: &ActivationRequest,
        body: &StagedPatch,
        receiver_id: &str,
        actor: &str,
    ) -> ReceiverPatchResult {
        let outcome = match staged_url(&request.is05_base_url, receiver_id) {
            Ok(url) => self.api.patch_staged(&url, body).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(status) => {
                metrics::receiver_patches_total().add(1, &[KeyValue::new("outcome", "success")]);
                self.remember_staged(flow, request, body, receiver_id, actor).await;
                debug!(receiver_id = %receiver_id, status = status, "Receiver patched");
                ReceiverPatchResult {
                    receiver_id: receiver_id.to_string(),
                    success: true,
                    status_code: Some(status),
                    error: None,
                }
            }
            Err(e) => {
                metrics::receiver_patches_total().add(1, &[KeyValue::new("outcome", "failure")]);
                warn!(receiver_id = %receiver_id, error = %e, "Receiver patch failed");
                ReceiverPatchResult {
                    receiver_id: receiver_id.to_string(),
                    success: false,
                    status_code: e.status_code(),
                    error: Some(e.to_string()),
                }
            }
        }
    }

    /// Best effort; a storage failure never turns a patched receiver into a failure
    async fn remember_staged(
        &self,
        flow: &Flow,
        request: &ActivationRequest,
        body: &StagedPatch,
        receiver_id: &str,
        actor: &str,
    ) {
        let record = ConnectRecord {
            receiver_id: receiver_id.to_string(),
            state: ConnectionState::Staged,
            role: ConnectionRole::Master,
            sender_id: body.sender_id.clone(),
            flow_id: Some(flow.flow_id.clone()),
            metadata: Some(json!({
                "mode": request.mode,
                "is05_base_url": request.is05_base_url,
            })),
        };
        if let Err(e) = self.connections.record_connect(record, actor).await {
            warn!(receiver_id = %receiver_id, error = %e, "Failed to persist staged connection");
        }
    }

    async fn receiver_formats(&self) -> HashMap<String, MediaFormat> {
        match self.registry.list_receivers(None).await {
            Ok(receivers) => receivers
                .into_iter()
                .map(|r| {
                    let format = MediaFormat::from_format(&r.format);
                    (r.id, format)
                })
                .collect(),
            Err(e) => {
                warn!(error = %e, "Receiver formats unavailable, keeping submission order");
                HashMap::new()
            }
        }
    }

    async fn sender_label(&self, sender_id: &str) -> Option<String> {
        if sender_id.is_empty() {
            return None;
        }
        match self.registry.list_senders().await {
            Ok(senders) => senders
                .into_iter()
                .find(|s| s.id == sender_id)
                .map(|s| s.label),
            Err(e) => {
                warn!(error = %e, "Sender labels unavailable");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(receivers: &[&str]) -> ActivationRequest {
        ActivationRequest {
            flow_id: "flow-1".to_string(),
            receiver_ids: receivers.iter().map(|s| s.to_string()).collect(),
            is05_base_url: "http://device/x-nmos/connection/v1.1".to_string(),
            sender_id: None,
            mode: ActivationMode::Immediate,
        }
    }

    #[test]
    fn test_request_validation() {
        assert!(request(&["rx-1"]).validate().is_ok());
        assert!(request(&[]).validate().is_err());
        assert!(request(&["rx-1", " "]).validate().is_err());

        let mut missing_url = request(&["rx-1"]);
        missing_url.is05_base_url = String::new();
        assert!(matches!(
            missing_url.validate(),
            Err(ControlError::ValidationError(_))
        ));
    }

    #[test]
    fn test_report_outcome_from_successes() {
        let ok = ReceiverPatchResult {
            receiver_id: "rx-1".to_string(),
            success: true,
            status_code: Some(200),
            error: None,
        };
        let failed = ReceiverPatchResult {
            receiver_id: "rx-2".to_string(),
            success: false,
            status_code: Some(500),
            error: Some("boom".to_string()),
        };

        let report =
            ActivationReport::aggregate("flow-1", ActivationMode::Immediate, vec![ok, failed.clone()]);
        assert_eq!(report.outcome, ActivationOutcome::Executed);
        assert_eq!((report.succeeded, report.failed), (1, 1));

        let report = ActivationReport::aggregate("flow-1", ActivationMode::SafeSwitch, vec![failed]);
        assert_eq!(report.outcome, ActivationOutcome::Failed);
    }

    #[test]
    fn test_mode_defaults_to_immediate() {
        let parsed: ActivationRequest = serde_json::from_value(json!({
            "flow_id": "flow-1",
            "receiver_ids": ["rx-1"],
            "is05_base_url": "http://device"
        }))
        .unwrap();
        assert_eq!(parsed.mode, ActivationMode::Immediate);
    }
}
