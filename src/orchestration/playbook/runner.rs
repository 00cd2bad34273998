//! # Scheduled Playbook Runner
//!
//! Claims due scheduled playbooks, runs them with the creator's identity and
//! writes back the outcome. A playbook that was disabled, deleted or no longer
//! permits the creator's role fails the scheduled row.

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::engine::PlaybookEngine;
use crate::error::{ControlError, ControlResult};
use crate::models::{Actor, ScheduledPlaybookExecution};
use crate::state_machine::{PlaybookExecutionStatus, ScheduledPlaybookStatus};
use crate::store::ScheduledPlaybookStore;

#[derive(Clone)]
pub struct ScheduledPlaybookRunner {
    store: Arc<dyn ScheduledPlaybookStore>,
    engine: Arc<PlaybookEngine>,
    poll_interval: Duration,
}

impl std::fmt::Debug for ScheduledPlaybookRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduledPlaybookRunner")
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

impl ScheduledPlaybookRunner {
    pub fn new(
        store: Arc<dyn ScheduledPlaybookStore>,
        engine: Arc<PlaybookEngine>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            store,
            engine,
            poll_interval,
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut timer = interval(self.poll_interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_secs = self.poll_interval.as_secs(), "Starting scheduled playbook runner");

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    if let Err(e) = self.tick(Utc::now()).await {
                        error!(error = %e, "Scheduled playbook tick failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Scheduled playbook runner stopped");
    }

    /// Run every scheduled playbook due at `now`; returns how many were completed
    pub async fn tick(&self, now: DateTime<Utc>) -> ControlResult<usize> {
        let due = self.store.list_due_scheduled_playbooks(now).await?;
        let mut completed = 0;

        for row in due {
            match self.store.claim_scheduled_playbook(row.id).await {
                Ok(claimed) => match self.execute(&claimed).await {
                    Ok(()) => completed += 1,
                    Err(e) => {
                        error!(scheduled_id = %claimed.id, error = %e, "Failed to record scheduled playbook outcome")
                    }
                },
                Err(ControlError::InvalidStateTransition { .. }) => {
                    debug!(scheduled_id = %row.id, "Scheduled playbook claimed elsewhere, skipping");
                }
                Err(e) => {
                    warn!(scheduled_id = %row.id, error = %e, "Failed to claim scheduled playbook");
                }
            }
        }
        Ok(completed)
    }

    #[instrument(skip(self, row), fields(scheduled_id = %row.id, playbook_id = %row.playbook_id))]
    async fn execute(&self, row: &ScheduledPlaybookExecution) -> ControlResult<()> {
        let actor = Actor::new(row.created_by.clone(), row.created_by_role.clone());

        let started = match self
            .engine
            .begin(row.playbook_id, &actor, &row.parameters)
            .await
        {
            Ok(started) => started,
            Err(e) => {
                warn!(error = %e, "Scheduled playbook could not run");
                let result = json!({ "error": e.to_string() });
                return self
                    .complete(row, ScheduledPlaybookStatus::Failed, None, result)
                    .await;
            }
        };
        let execution_id = started.execution_id;

        let (status, result) = match self.engine.run(started, &actor, &row.parameters).await {
            Ok(report) => {
                let status = match report.status {
                    PlaybookExecutionStatus::Error => ScheduledPlaybookStatus::Error,
                    _ => ScheduledPlaybookStatus::Success,
                };
                (status, serde_json::to_value(&report)?)
            }
            Err(e) => {
                warn!(execution_id = %execution_id, error = %e, "Scheduled playbook did not finish");
                (
                    ScheduledPlaybookStatus::Failed,
                    json!({ "error": e.to_string() }),
                )
            }
        };

        self.complete(row, status, Some(execution_id), result).await
    }

    async fn complete(
        &self,
        row: &ScheduledPlaybookExecution,
        status: ScheduledPlaybookStatus,
        execution_id: Option<Uuid>,
        result: Value,
    ) -> ControlResult<()> {
        self.store
            .complete_scheduled_playbook(row.id, status, Utc::now(), execution_id, result)
            .await?;
        info!(status = %status, "Scheduled playbook completed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::Map;

    use crate::events::EventPublisher;
    use crate::models::{NewPlaybook, NewScheduledPlaybook, Playbook, PlaybookExecution, StepOutcome};
    use crate::orchestration::connection_state::ConnectionStateStore;
    use crate::store::{MemoryStore, PlaybookStore};

    /// Memory-backed playbooks whose executions can never be finished
    struct UnfinishableStore(Arc<MemoryStore>);

    #[async_trait]
    impl PlaybookStore for UnfinishableStore {
        async fn create_playbook(&self, playbook: NewPlaybook) -> ControlResult<Playbook> {
            self.0.create_playbook(playbook).await
        }
        async fn get_playbook(&self, id: Uuid) -> ControlResult<Option<Playbook>> {
            self.0.get_playbook(id).await
        }
        async fn list_playbooks(&self) -> ControlResult<Vec<Playbook>> {
            self.0.list_playbooks().await
        }
        async fn set_playbook_enabled(&self, id: Uuid, enabled: bool) -> ControlResult<bool> {
            self.0.set_playbook_enabled(id, enabled).await
        }
        async fn delete_playbook(&self, id: Uuid) -> ControlResult<bool> {
            self.0.delete_playbook(id).await
        }
        async fn create_execution(&self, execution: PlaybookExecution) -> ControlResult<()> {
            self.0.create_execution(execution).await
        }
        async fn finish_execution(
            &self,
            _id: Uuid,
            _status: PlaybookExecutionStatus,
            _finished_at: DateTime<Utc>,
            _result: Vec<StepOutcome>,
        ) -> ControlResult<()> {
            Err(ControlError::DatabaseError("connection reset".to_string()))
        }
        async fn get_execution(&self, id: Uuid) -> ControlResult<Option<PlaybookExecution>> {
            self.0.get_execution(id).await
        }
        async fn list_executions(&self, playbook_id: Uuid) -> ControlResult<Vec<PlaybookExecution>> {
            self.0.list_executions(playbook_id).await
        }
    }

    #[tokio::test]
    async fn test_unfinished_execution_stays_linked() {
        let store = Arc::new(MemoryStore::new());
        let connections = ConnectionStateStore::new(store.clone(), EventPublisher::new(8));
        let engine = Arc::new(PlaybookEngine::new(
            Arc::new(UnfinishableStore(store.clone())),
            store.clone(),
            connections,
        ));
        let runner = ScheduledPlaybookRunner::new(store.clone(), engine, Duration::from_secs(10));

        let playbook = store
            .create_playbook(NewPlaybook {
                name: "night reset".to_string(),
                description: None,
                steps: vec![json!({"action": "disconnect_receiver", "receiver_id": "rx-1"})],
                parameters: json!({}),
                allowed_roles: Vec::new(),
                enabled: true,
            })
            .await
            .unwrap();
        let scheduled = store
            .create_scheduled_playbook(NewScheduledPlaybook {
                playbook_id: playbook.id,
                parameters: Map::new(),
                scheduled_at: Utc::now() - chrono::Duration::seconds(1),
                created_by: "ada".to_string(),
                created_by_role: "admin".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(runner.tick(Utc::now()).await.unwrap(), 1);

        let row = store.get_scheduled_playbook(scheduled.id).await.unwrap().unwrap();
        assert_eq!(row.status, ScheduledPlaybookStatus::Failed);
        let execution_id = row.execution_id.expect("execution stays linked");

        let execution = store.get_execution(execution_id).await.unwrap().unwrap();
        assert_eq!(execution.status, PlaybookExecutionStatus::Running);
        assert!(row.result.unwrap()["error"]
            .as_str()
            .unwrap()
            .contains("connection reset"));
    }
}
