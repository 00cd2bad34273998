//! # Scheduled Activation Runner
//!
//! Background loop driving due scheduled activations through the
//! orchestrator. Each due row is claimed (`pending -> executing`), executed and
//! closed with a single terminal write. Rows are processed one at a time.
//!
//! A crash between the IS-05 calls and the terminal write leaves the row in
//! `executing`; it is not picked up again.

use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use super::activation::{ActivationOutcome, ActivationRequest, ConnectionActivationOrchestrator};
use crate::error::{ControlError, ControlResult};
use crate::models::ScheduledActivation;
use crate::state_machine::ScheduledActivationStatus;
use crate::store::ScheduledActivationStore;

#[derive(Clone)]
pub struct ScheduledActivationRunner {
    store: Arc<dyn ScheduledActivationStore>,
    orchestrator: Arc<ConnectionActivationOrchestrator>,
    poll_interval: Duration,
}

impl std::fmt::Debug for ScheduledActivationRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduledActivationRunner")
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

impl ScheduledActivationRunner {
    pub fn new(
        store: Arc<dyn ScheduledActivationStore>,
        orchestrator: Arc<ConnectionActivationOrchestrator>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            store,
            orchestrator,
            poll_interval,
        }
    }

    /// Poll until `shutdown` flips to true
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut timer = interval(self.poll_interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_secs = self.poll_interval.as_secs(), "Starting scheduled activation runner");

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    if let Err(e) = self.tick(Utc::now()).await {
                        error!(error = %e, "Scheduled activation tick failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Scheduled activation runner stopped");
    }

    /// Execute every activation due at `now`; returns how many were executed
    pub async fn tick(&self, now: DateTime<Utc>) -> ControlResult<usize> {
        let due = self.store.list_due_activations(now).await?;
        if due.is_empty() {
            debug!("No scheduled activations due");
            return Ok(0);
        }

        let mut executed = 0;
        for row in due {
            match self.store.claim_scheduled_activation(row.id).await {
                Ok(claimed) => {
                    if let Err(e) = self.execute(&claimed).await {
                        error!(activation_id = %claimed.id, error = %e, "Failed to record activation outcome");
                    } else {
                        executed += 1;
                    }
                }
                Err(ControlError::InvalidStateTransition { .. }) => {
                    debug!(activation_id = %row.id, "Activation claimed elsewhere, skipping");
                }
                Err(e) => {
                    warn!(activation_id = %row.id, error = %e, "Failed to claim scheduled activation");
                }
            }
        }
        Ok(executed)
    }

    #[instrument(skip(self, row), fields(activation_id = %row.id, flow_id = %row.flow_id))]
    async fn execute(&self, row: &ScheduledActivation) -> ControlResult<()> {
        let request = ActivationRequest::from(row);

        let (status, result) = match self.orchestrator.resolve_flow(&row.flow_id).await {
            Err(e) => {
                warn!(error = %e, "Scheduled activation flow unavailable");
                (ScheduledActivationStatus::Failed, json!({ "error": e.to_string() }))
            }
            Ok(flow) => match self
                .orchestrator
                .activate_flow(&flow, &request, &row.created_by)
                .await
            {
                Ok(report) => {
                    let status = match report.outcome {
                        ActivationOutcome::Executed => ScheduledActivationStatus::Executed,
                        ActivationOutcome::Failed => ScheduledActivationStatus::Failed,
                    };
                    (status, serde_json::to_value(&report)?)
                }
                Err(e) => (ScheduledActivationStatus::Failed, json!({ "error": e.to_string() })),
            },
        };

        self.store
            .complete_scheduled_activation(row.id, status, Utc::now(), result)
            .await?;
        info!(status = %status, "Scheduled activation completed");
        Ok(())
    }
}
