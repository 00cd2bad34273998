//! # Playbook Execution Engine
//!
//! Runs a playbook's steps in declaration order. The execution row is written
//! in `running` before the first step so a crash leaves a visible record; the
//! first failing step stops the run and nothing is rolled back.

use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::steps::{resolve_parameters, PlaybookStep};
use crate::error::{ControlError, ControlResult};
use crate::metrics;
use crate::models::{
    Actor, ConnectionKey, ConnectionRole, ConnectionState, NewScheduledPlaybook, Playbook,
    PlaybookExecution, ScheduledPlaybookExecution, StepOutcome,
};
use crate::orchestration::connection_state::{ConnectRecord, ConnectionStateStore};
use crate::state_machine::PlaybookExecutionStatus;
use crate::store::{PlaybookStore, ScheduledPlaybookStore};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybookRunReport {
    pub execution_id: Uuid,
    pub status: PlaybookExecutionStatus,
    pub steps: Vec<StepOutcome>,
}

/// Execution row written in `running`, steps not yet run
#[derive(Debug)]
pub(super) struct StartedExecution {
    playbook: Playbook,
    pub(super) execution_id: Uuid,
    started: Instant,
}

#[derive(Clone)]
pub struct PlaybookEngine {
    playbooks: Arc<dyn PlaybookStore>,
    scheduled: Arc<dyn ScheduledPlaybookStore>,
    connections: ConnectionStateStore,
}

impl std::fmt::Debug for PlaybookEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybookEngine").finish_non_exhaustive()
    }
}

impl PlaybookEngine {
    pub fn new(
        playbooks: Arc<dyn PlaybookStore>,
        scheduled: Arc<dyn ScheduledPlaybookStore>,
        connections: ConnectionStateStore,
    ) -> Self {
        Self {
            playbooks,
            scheduled,
            connections,
        }
    }

    /// Load the playbook and check that `role` may run it
    pub async fn authorize(&self, playbook_id: Uuid, role: &str) -> ControlResult<Playbook> {
        let playbook = self
            .playbooks
            .get_playbook(playbook_id)
            .await?
            .ok_or_else(|| ControlError::not_found("playbook", playbook_id))?;

        if !playbook.enabled {
            return Err(ControlError::validation(format!(
                "playbook {playbook_id} is disabled"
            )));
        }
        if !playbook.permits_role(role) {
            return Err(ControlError::Unauthorized {
                role: role.to_string(),
                operation: format!("execute playbook '{}'", playbook.name),
            });
        }
        Ok(playbook)
    }

    /// Queue a run for `scheduled_at` under the actor's identity. The role is
    /// checked now and again when the run starts.
    #[instrument(skip(self, actor, parameters), fields(user = %actor.username, role = %actor.role))]
    pub async fn schedule(
        &self,
        playbook_id: Uuid,
        actor: &Actor,
        parameters: Map<String, Value>,
        scheduled_at: DateTime<Utc>,
    ) -> ControlResult<ScheduledPlaybookExecution> {
        self.authorize(playbook_id, &actor.role).await?;
        let row = self
            .scheduled
            .create_scheduled_playbook(NewScheduledPlaybook {
                playbook_id,
                parameters,
                scheduled_at,
                created_by: actor.username.clone(),
                created_by_role: actor.role.clone(),
            })
            .await?;
        info!(scheduled_id = %row.id, scheduled_at = %row.scheduled_at, "Playbook run scheduled");
        Ok(row)
    }

    #[instrument(skip(self, actor, parameters), fields(user = %actor.username, role = %actor.role))]
    pub async fn execute(
        &self,
        playbook_id: Uuid,
        actor: &Actor,
        parameters: Map<String, Value>,
    ) -> ControlResult<PlaybookRunReport> {
        let started = self.begin(playbook_id, actor, &parameters).await?;
        self.run(started, actor, &parameters).await
    }

    /// Authorize and write the `running` execution row
    pub(super) async fn begin(
        &self,
        playbook_id: Uuid,
        actor: &Actor,
        parameters: &Map<String, Value>,
    ) -> ControlResult<StartedExecution> {
        let playbook = self.authorize(playbook_id, &actor.role).await?;

        let execution = PlaybookExecution {
            id: Uuid::new_v4(),
            playbook_id,
            parameters: parameters.clone(),
            status: PlaybookExecutionStatus::Running,
            executed_by: actor.username.clone(),
            started_at: Utc::now(),
            finished_at: None,
            result: Vec::new(),
        };
        let execution_id = execution.id;
        self.playbooks.create_execution(execution).await?;

        Ok(StartedExecution {
            playbook,
            execution_id,
            started: Instant::now(),
        })
    }

    /// Run the steps of a begun execution and record its final status
    pub(super) async fn run(
        &self,
        started: StartedExecution,
        actor: &Actor,
        parameters: &Map<String, Value>,
    ) -> ControlResult<PlaybookRunReport> {
        let StartedExecution {
            playbook,
            execution_id,
            started,
        } = started;

        let mut outcomes = Vec::with_capacity(playbook.steps.len());
        for (index, raw) in playbook.steps.iter().enumerate() {
            let outcome = self
                .run_step(index, raw, parameters, &playbook, execution_id, actor)
                .await;
            let failed = !outcome.success;
            outcomes.push(outcome);
            if failed {
                break;
            }
        }

        let status = if outcomes.iter().all(|o| o.success) {
            PlaybookExecutionStatus::Success
        } else {
            PlaybookExecutionStatus::Error
        };

        self.playbooks
            .finish_execution(execution_id, status, Utc::now(), outcomes.clone())
            .await?;

        let labels = [KeyValue::new("status", status.to_string())];
        metrics::playbook_executions_total().add(1, &labels);
        metrics::playbook_duration().record(started.elapsed().as_millis() as f64, &labels);
        info!(
            playbook = %playbook.name,
            execution_id = %execution_id,
            status = %status,
            steps = outcomes.len(),
            "Playbook execution finished"
        );

        Ok(PlaybookRunReport {
            execution_id,
            status,
            steps: outcomes,
        })
    }

    async fn run_step(
        &self,
        index: usize,
        raw: &Value,
        parameters: &Map<String, Value>,
        playbook: &Playbook,
        execution_id: Uuid,
        actor: &Actor,
    ) -> StepOutcome {
        let declared_action = raw
            .get("action")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();

        let resolved = resolve_parameters(raw, parameters);
        let step = match PlaybookStep::decode(&resolved) {
            Ok(step) => step,
            Err(e) => {
                warn!(step = index, error = %e, "Playbook step rejected");
                return StepOutcome {
                    index,
                    action: declared_action,
                    success: false,
                    message: e.to_string(),
                };
            }
        };

        let result = match &step {
            PlaybookStep::ConnectReceiver {
                receiver_id,
                sender_id,
            } => {
                let record = ConnectRecord {
                    receiver_id: receiver_id.clone(),
                    state: ConnectionState::Active,
                    role: ConnectionRole::Master,
                    sender_id: Some(sender_id.clone()),
                    flow_id: None,
                    metadata: Some(json!({
                        "playbook_id": playbook.id,
                        "execution_id": execution_id,
                    })),
                };
                self.connections
                    .record_connect(record, &actor.username)
                    .await
                    .map(|_| format!("connected {receiver_id} to {sender_id}"))
            }
            PlaybookStep::DisconnectReceiver { receiver_id } => {
                let key = ConnectionKey::new(
                    receiver_id.clone(),
                    ConnectionState::Active,
                    ConnectionRole::Master,
                );
                self.connections
                    .record_disconnect(&key, &actor.username)
                    .await
                    .map(|removed| {
                        if removed {
                            format!("disconnected {receiver_id}")
                        } else {
                            format!("{receiver_id} had no active connection")
                        }
                    })
            }
        };

        match result {
            Ok(message) => StepOutcome {
                index,
                action: step.action().to_string(),
                success: true,
                message,
            },
            Err(e) => {
                warn!(step = index, action = step.action(), error = %e, "Playbook step failed");
                StepOutcome {
                    index,
                    action: step.action().to_string(),
                    success: false,
                    message: e.to_string(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventPublisher;
    use crate::models::NewPlaybook;
    use crate::store::{ConnectionStore, MemoryStore};

    fn engine(store: &Arc<MemoryStore>) -> PlaybookEngine {
        let connections = ConnectionStateStore::new(store.clone(), EventPublisher::new(8));
        PlaybookEngine::new(store.clone(), store.clone(), connections)
    }

    fn new_playbook(steps: Vec<Value>) -> NewPlaybook {
        NewPlaybook {
            name: "studio swap".to_string(),
            description: None,
            steps,
            parameters: json!({"rx": "string"}),
            allowed_roles: vec!["editor".to_string()],
            enabled: true,
        }
    }

    #[tokio::test]
    async fn test_connect_step_uses_parameters() {
        let store = Arc::new(MemoryStore::new());
        let playbook = store
            .create_playbook(new_playbook(vec![json!({
                "action": "connect_receiver",
                "receiver_id": "{{rx}}",
                "sender_id": "tx-1"
            })]))
            .await
            .unwrap();

        let mut params = Map::new();
        params.insert("rx".to_string(), json!("rx-42"));
        let report = engine(&store)
            .execute(playbook.id, &Actor::new("erin", "editor"), params)
            .await
            .unwrap();

        assert_eq!(report.status, PlaybookExecutionStatus::Success);
        let key = ConnectionKey::new("rx-42", ConnectionState::Active, ConnectionRole::Master);
        let row = store.get_connection(&key).await.unwrap().unwrap();
        assert_eq!(row.sender_id.as_deref(), Some("tx-1"));
        assert_eq!(row.changed_by, "erin");

        let execution = store.get_execution(report.execution_id).await.unwrap().unwrap();
        assert_eq!(execution.status, PlaybookExecutionStatus::Success);
        assert!(execution.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_disabled_playbook_rejected_without_execution() {
        let store = Arc::new(MemoryStore::new());
        let playbook = store
            .create_playbook(new_playbook(vec![json!({
                "action": "disconnect_receiver",
                "receiver_id": "rx-1"
            })]))
            .await
            .unwrap();
        store.set_playbook_enabled(playbook.id, false).await.unwrap();

        let err = engine(&store)
            .execute(playbook.id, &Actor::new("root", "admin"), Map::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::ValidationError(_)));
        assert_eq!(store.execution_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_playbook_is_not_found() {
        let store = Arc::new(MemoryStore::new());
        let err = engine(&store)
            .execute(Uuid::new_v4(), &Actor::new("root", "admin"), Map::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::NotFound { .. }));
    }
}
