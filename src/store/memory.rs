//! In-process store. Rows live in `DashMap`s so per-row status changes are
//! atomic under the shard lock; append-only logs sit behind `parking_lot` locks.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::Value;
use uuid::Uuid;

use super::{
    AutomationJobStore, CheckerResultStore, ConnectionStore, MaintenanceWindowStore,
    PlaybookStore, RoutingPolicyStore, ScheduledActivationStore, ScheduledPlaybookStore,
};
use crate::error::{ControlError, ControlResult};
use crate::models::{
    AutomationJob, CheckerResult, ConnectionKey, JobRunRecord, MaintenanceWindow,
    NewMaintenanceWindow, NewPlaybook, NewRoutingPolicy, NewScheduledActivation,
    NewScheduledPlaybook, Playbook, PlaybookExecution, ReceiverConnection,
    ReceiverConnectionHistory, RoutingPolicy, RoutingPolicyAudit, RoutingPolicyPatch,
    ScheduledActivation, ScheduledPlaybookExecution, StepOutcome,
};
use crate::state_machine::{
    ensure_transition, PlaybookExecutionStatus, ScheduledActivationStatus,
    ScheduledPlaybookStatus,
};

#[derive(Debug, Default)]
pub struct MemoryStore {
    jobs: DashMap<String, AutomationJob>,
    checker_results: RwLock<Vec<CheckerResult>>,
    policies: DashMap<Uuid, RoutingPolicy>,
    policy_audit: RwLock<Vec<RoutingPolicyAudit>>,
    connections: DashMap<ConnectionKey, ReceiverConnection>,
    connection_history: RwLock<Vec<ReceiverConnectionHistory>>,
    activations: DashMap<Uuid, ScheduledActivation>,
    playbooks: DashMap<Uuid, Playbook>,
    executions: DashMap<Uuid, PlaybookExecution>,
    scheduled_playbooks: DashMap<Uuid, ScheduledPlaybookExecution>,
    windows: DashMap<Uuid, MaintenanceWindow>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of execution rows ever created
    pub fn execution_count(&self) -> usize {
        self.executions.len()
    }
}

#[async_trait]
impl AutomationJobStore for MemoryStore {
    async fn upsert_job(&self, mut job: AutomationJob) -> ControlResult<AutomationJob> {
        if let Some(existing) = self.jobs.get(&job.job_id) {
            job.last_run_at = existing.last_run_at;
            job.last_run_status = existing.last_run_status.clone();
            job.last_run_result = existing.last_run_result.clone();
        }
        job.updated_at = Utc::now();
        self.jobs.insert(job.job_id.clone(), job.clone());
        Ok(job)
    }

    async fn get_job(&self, job_id: &str) -> ControlResult<Option<AutomationJob>> {
        Ok(self.jobs.get(job_id).map(|job| job.clone()))
    }

    async fn list_jobs(&self) -> ControlResult<Vec<AutomationJob>> {
        let mut jobs: Vec<AutomationJob> = self.jobs.iter().map(|job| job.clone()).collect();
        jobs.sort_by(|a, b| a.job_id.cmp(&b.job_id));
        Ok(jobs)
    }

    async fn set_job_enabled(&self, job_id: &str, enabled: bool) -> ControlResult<bool> {
        match self.jobs.get_mut(job_id) {
            Some(mut job) => {
                job.enabled = enabled;
                job.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn record_job_run(&self, job_id: &str, run: JobRunRecord) -> ControlResult<()> {
        let mut job = self
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| ControlError::not_found("automation_job", job_id))?;
        job.last_run_at = Some(run.ran_at);
        job.last_run_status = Some(run.status);
        job.last_run_result = Some(run.result);
        job.updated_at = run.ran_at;
        Ok(())
    }
}

#[async_trait]
impl CheckerResultStore for MemoryStore {
    async fn save_checker_result(
        &self,
        kind: &str,
        result: Value,
        checked_at: DateTime<Utc>,
    ) -> ControlResult<CheckerResult> {
        let row = CheckerResult {
            id: Uuid::new_v4(),
            kind: kind.to_string(),
            result,
            checked_at,
        };
        self.checker_results.write().push(row.clone());
        Ok(row)
    }

    async fn latest_checker_result(&self, kind: &str) -> ControlResult<Option<CheckerResult>> {
        Ok(self
            .checker_results
            .read()
            .iter()
            .rev()
            .find(|row| row.kind == kind)
            .cloned())
    }
}

#[async_trait]
impl RoutingPolicyStore for MemoryStore {
    async fn create_policy(&self, policy: NewRoutingPolicy) -> ControlResult<RoutingPolicy> {
        policy.validate()?;
        let policy = policy.into_policy(Utc::now());
        self.policies.insert(policy.id, policy.clone());
        Ok(policy)
    }

    async fn get_policy(&self, id: Uuid) -> ControlResult<Option<RoutingPolicy>> {
        Ok(self.policies.get(&id).map(|policy| policy.clone()))
    }

    async fn list_policies(&self) -> ControlResult<Vec<RoutingPolicy>> {
        let mut policies: Vec<RoutingPolicy> =
            self.policies.iter().map(|policy| policy.clone()).collect();
        policies.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.created_at.cmp(&b.created_at)));
        Ok(policies)
    }

    async fn list_enabled_policies(&self) -> ControlResult<Vec<RoutingPolicy>> {
        let mut policies = self.list_policies().await?;
        policies.retain(|policy| policy.enabled);
        Ok(policies)
    }

    async fn update_policy(
        &self,
        id: Uuid,
        patch: RoutingPolicyPatch,
    ) -> ControlResult<Option<RoutingPolicy>> {
        patch.validate()?;
        match self.policies.get_mut(&id) {
            Some(mut policy) => {
                patch.apply(&mut *policy, Utc::now());
                Ok(Some(policy.clone()))
            }
            None => Ok(None),
        }
    }

    async fn delete_policy(&self, id: Uuid) -> ControlResult<bool> {
        Ok(self.policies.remove(&id).is_some())
    }

    async fn append_policy_audit(&self, audit: RoutingPolicyAudit) -> ControlResult<()> {
        self.policy_audit.write().push(audit);
        Ok(())
    }

    async fn list_policy_audit(&self, limit: usize) -> ControlResult<Vec<RoutingPolicyAudit>> {
        Ok(self
            .policy_audit
            .read()
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ConnectionStore for MemoryStore {
    async fn upsert_connection(&self, connection: ReceiverConnection) -> ControlResult<bool> {
        let mut entry = self
            .connections
            .entry(connection.key())
            .or_insert_with(|| connection.clone());
        if entry.changed_at > connection.changed_at {
            return Ok(false);
        }
        *entry = connection;
        Ok(true)
    }

    async fn get_connection(
        &self,
        key: &ConnectionKey,
    ) -> ControlResult<Option<ReceiverConnection>> {
        Ok(self.connections.get(key).map(|row| row.clone()))
    }

    async fn list_connections(&self, receiver_id: &str) -> ControlResult<Vec<ReceiverConnection>> {
        Ok(self
            .connections
            .iter()
            .filter(|row| row.receiver_id == receiver_id)
            .map(|row| row.clone())
            .collect())
    }

    async fn delete_connection(&self, key: &ConnectionKey) -> ControlResult<bool> {
        Ok(self.connections.remove(key).is_some())
    }

    async fn append_connection_history(
        &self,
        entry: ReceiverConnectionHistory,
    ) -> ControlResult<()> {
        self.connection_history.write().push(entry);
        Ok(())
    }

    async fn list_connection_history(
        &self,
        receiver_id: &str,
    ) -> ControlResult<Vec<ReceiverConnectionHistory>> {
        Ok(self
            .connection_history
            .read()
            .iter()
            .filter(|entry| entry.receiver_id == receiver_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ScheduledActivationStore for MemoryStore {
    async fn create_scheduled_activation(
        &self,
        activation: NewScheduledActivation,
    ) -> ControlResult<ScheduledActivation> {
        activation.validate()?;
        let activation = activation.into_activation(Utc::now());
        self.activations.insert(activation.id, activation.clone());
        Ok(activation)
    }

    async fn get_scheduled_activation(
        &self,
        id: Uuid,
    ) -> ControlResult<Option<ScheduledActivation>> {
        Ok(self.activations.get(&id).map(|row| row.clone()))
    }

    async fn list_scheduled_activations(&self) -> ControlResult<Vec<ScheduledActivation>> {
        let mut rows: Vec<ScheduledActivation> =
            self.activations.iter().map(|row| row.clone()).collect();
        rows.sort_by_key(|row| row.scheduled_at);
        Ok(rows)
    }

    async fn list_due_activations(
        &self,
        now: DateTime<Utc>,
    ) -> ControlResult<Vec<ScheduledActivation>> {
        let mut rows: Vec<ScheduledActivation> = self
            .activations
            .iter()
            .filter(|row| row.status == ScheduledActivationStatus::Pending && row.scheduled_at <= now)
            .map(|row| row.clone())
            .collect();
        rows.sort_by_key(|row| row.scheduled_at);
        Ok(rows)
    }

    async fn claim_scheduled_activation(&self, id: Uuid) -> ControlResult<ScheduledActivation> {
        transition_activation(self, id, ScheduledActivationStatus::Executing, |_| {})
    }

    async fn complete_scheduled_activation(
        &self,
        id: Uuid,
        status: ScheduledActivationStatus,
        executed_at: DateTime<Utc>,
        result: Value,
    ) -> ControlResult<()> {
        transition_activation(self, id, status, |row| {
            row.executed_at = Some(executed_at);
            row.result = Some(result);
        })?;
        Ok(())
    }

    async fn cancel_scheduled_activation(&self, id: Uuid) -> ControlResult<ScheduledActivation> {
        transition_activation(self, id, ScheduledActivationStatus::Cancelled, |_| {})
    }
}

fn transition_activation(
    store: &MemoryStore,
    id: Uuid,
    to: ScheduledActivationStatus,
    update: impl FnOnce(&mut ScheduledActivation),
) -> ControlResult<ScheduledActivation> {
    let mut row = store
        .activations
        .get_mut(&id)
        .ok_or_else(|| ControlError::not_found("scheduled_activation", id))?;
    ensure_transition(id, row.status, to)?;
    row.status = to;
    update(&mut *row);
    Ok(row.clone())
}

#[async_trait]
impl PlaybookStore for MemoryStore {
    async fn create_playbook(&self, playbook: NewPlaybook) -> ControlResult<Playbook> {
        playbook.validate()?;
        let playbook = playbook.into_playbook(Utc::now());
        self.playbooks.insert(playbook.id, playbook.clone());
        Ok(playbook)
    }

    async fn get_playbook(&self, id: Uuid) -> ControlResult<Option<Playbook>> {
        Ok(self.playbooks.get(&id).map(|row| row.clone()))
    }

    async fn list_playbooks(&self) -> ControlResult<Vec<Playbook>> {
        let mut rows: Vec<Playbook> = self.playbooks.iter().map(|row| row.clone()).collect();
        rows.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(rows)
    }

    async fn set_playbook_enabled(&self, id: Uuid, enabled: bool) -> ControlResult<bool> {
        match self.playbooks.get_mut(&id) {
            Some(mut playbook) => {
                playbook.enabled = enabled;
                playbook.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_playbook(&self, id: Uuid) -> ControlResult<bool> {
        Ok(self.playbooks.remove(&id).is_some())
    }

    async fn create_execution(&self, execution: PlaybookExecution) -> ControlResult<()> {
        self.executions.insert(execution.id, execution);
        Ok(())
    }

    async fn finish_execution(
        &self,
        id: Uuid,
        status: PlaybookExecutionStatus,
        finished_at: DateTime<Utc>,
        result: Vec<StepOutcome>,
    ) -> ControlResult<()> {
        let mut row = self
            .executions
            .get_mut(&id)
            .ok_or_else(|| ControlError::not_found("playbook_execution", id))?;
        ensure_transition(id, row.status, status)?;
        row.status = status;
        row.finished_at = Some(finished_at);
        row.result = result;
        Ok(())
    }

    async fn get_execution(&self, id: Uuid) -> ControlResult<Option<PlaybookExecution>> {
        Ok(self.executions.get(&id).map(|row| row.clone()))
    }

    async fn list_executions(&self, playbook_id: Uuid) -> ControlResult<Vec<PlaybookExecution>> {
        let mut rows: Vec<PlaybookExecution> = self
            .executions
            .iter()
            .filter(|row| row.playbook_id == playbook_id)
            .map(|row| row.clone())
            .collect();
        rows.sort_by_key(|row| row.started_at);
        Ok(rows)
    }
}

#[async_trait]
impl ScheduledPlaybookStore for MemoryStore {
    async fn create_scheduled_playbook(
        &self,
        scheduled: NewScheduledPlaybook,
    ) -> ControlResult<ScheduledPlaybookExecution> {
        let scheduled = scheduled.into_scheduled(Utc::now());
        self.scheduled_playbooks.insert(scheduled.id, scheduled.clone());
        Ok(scheduled)
    }

    async fn get_scheduled_playbook(
        &self,
        id: Uuid,
    ) -> ControlResult<Option<ScheduledPlaybookExecution>> {
        Ok(self.scheduled_playbooks.get(&id).map(|row| row.clone()))
    }

    async fn list_due_scheduled_playbooks(
        &self,
        now: DateTime<Utc>,
    ) -> ControlResult<Vec<ScheduledPlaybookExecution>> {
        let mut rows: Vec<ScheduledPlaybookExecution> = self
            .scheduled_playbooks
            .iter()
            .filter(|row| row.status == ScheduledPlaybookStatus::Pending && row.scheduled_at <= now)
            .map(|row| row.clone())
            .collect();
        rows.sort_by_key(|row| row.scheduled_at);
        Ok(rows)
    }

    async fn claim_scheduled_playbook(
        &self,
        id: Uuid,
    ) -> ControlResult<ScheduledPlaybookExecution> {
        transition_scheduled_playbook(self, id, ScheduledPlaybookStatus::Executing, |_| {})
    }

    async fn complete_scheduled_playbook(
        &self,
        id: Uuid,
        status: ScheduledPlaybookStatus,
        executed_at: DateTime<Utc>,
        execution_id: Option<Uuid>,
        result: Value,
    ) -> ControlResult<()> {
        transition_scheduled_playbook(self, id, status, |row| {
            row.executed_at = Some(executed_at);
            row.execution_id = execution_id;
            row.result = Some(result);
        })?;
        Ok(())
    }

    async fn cancel_scheduled_playbook(
        &self,
        id: Uuid,
    ) -> ControlResult<ScheduledPlaybookExecution> {
        transition_scheduled_playbook(self, id, ScheduledPlaybookStatus::Cancelled, |_| {})
    }
}

fn transition_scheduled_playbook(
    store: &MemoryStore,
    id: Uuid,
    to: ScheduledPlaybookStatus,
    update: impl FnOnce(&mut ScheduledPlaybookExecution),
) -> ControlResult<ScheduledPlaybookExecution> {
    let mut row = store
        .scheduled_playbooks
        .get_mut(&id)
        .ok_or_else(|| ControlError::not_found("scheduled_playbook_execution", id))?;
    ensure_transition(id, row.status, to)?;
    row.status = to;
    update(&mut *row);
    Ok(row.clone())
}

#[async_trait]
impl MaintenanceWindowStore for MemoryStore {
    async fn create_window(
        &self,
        window: NewMaintenanceWindow,
    ) -> ControlResult<MaintenanceWindow> {
        window.validate()?;
        let window = window.into_window(Utc::now());
        self.windows.insert(window.id, window.clone());
        Ok(window)
    }

    async fn get_window(&self, id: Uuid) -> ControlResult<Option<MaintenanceWindow>> {
        Ok(self.windows.get(&id).map(|row| row.clone()))
    }

    async fn list_windows(&self) -> ControlResult<Vec<MaintenanceWindow>> {
        let mut rows: Vec<MaintenanceWindow> = self.windows.iter().map(|row| row.clone()).collect();
        rows.sort_by_key(|row| row.start_time);
        Ok(rows)
    }

    async fn delete_window(&self, id: Uuid) -> ControlResult<bool> {
        Ok(self.windows.remove(&id).is_some())
    }

    async fn list_active_windows(
        &self,
        at: DateTime<Utc>,
    ) -> ControlResult<Vec<MaintenanceWindow>> {
        let mut rows = self.list_windows().await?;
        rows.retain(|window| window.is_active_at(at));
        Ok(rows)
    }
}
