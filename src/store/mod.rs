//! # Persistence Contract
//!
//! Per-entity async store traits consumed by the engines and runners. Each
//! single-entity write is expected to be atomic. Status writes follow the
//! lifecycles in [`crate::state_machine`]: claims and cancellations are
//! conditional on the current status and fail with
//! [`ControlError::InvalidStateTransition`](crate::error::ControlError) when the
//! row has already moved on.
//!
//! Two implementations ship with the crate:
//!
//! - [`MemoryStore`]: process-local, used by tests and embedded deployments
//! - [`PgStore`]: PostgreSQL via SQLx, also serving the flow and registry read model

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::error::ControlResult;
use crate::models::{
    AutomationJob, CheckerResult, ConnectionKey, JobRunRecord, MaintenanceWindow,
    NewMaintenanceWindow, NewPlaybook, NewRoutingPolicy, NewScheduledActivation,
    NewScheduledPlaybook, Playbook, PlaybookExecution, ReceiverConnection,
    ReceiverConnectionHistory, RoutingPolicy, RoutingPolicyAudit, RoutingPolicyPatch,
    ScheduledActivation, ScheduledPlaybookExecution, StepOutcome,
};
use crate::state_machine::{
    PlaybookExecutionStatus, ScheduledActivationStatus, ScheduledPlaybookStatus,
};

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[async_trait]
pub trait AutomationJobStore: Send + Sync {
    /// Insert or replace the job definition, keeping run bookkeeping intact
    async fn upsert_job(&self, job: AutomationJob) -> ControlResult<AutomationJob>;
    async fn get_job(&self, job_id: &str) -> ControlResult<Option<AutomationJob>>;
    async fn list_jobs(&self) -> ControlResult<Vec<AutomationJob>>;
    async fn set_job_enabled(&self, job_id: &str, enabled: bool) -> ControlResult<bool>;
    async fn record_job_run(&self, job_id: &str, run: JobRunRecord) -> ControlResult<()>;
}

#[async_trait]
pub trait CheckerResultStore: Send + Sync {
    async fn save_checker_result(
        &self,
        kind: &str,
        result: Value,
        checked_at: DateTime<Utc>,
    ) -> ControlResult<CheckerResult>;
    async fn latest_checker_result(&self, kind: &str) -> ControlResult<Option<CheckerResult>>;
}

#[async_trait]
pub trait RoutingPolicyStore: Send + Sync {
    async fn create_policy(&self, policy: NewRoutingPolicy) -> ControlResult<RoutingPolicy>;
    async fn get_policy(&self, id: Uuid) -> ControlResult<Option<RoutingPolicy>>;
    async fn list_policies(&self) -> ControlResult<Vec<RoutingPolicy>>;
    /// Enabled policies, highest priority first
    async fn list_enabled_policies(&self) -> ControlResult<Vec<RoutingPolicy>>;
    async fn update_policy(
        &self,
        id: Uuid,
        patch: RoutingPolicyPatch,
    ) -> ControlResult<Option<RoutingPolicy>>;
    async fn delete_policy(&self, id: Uuid) -> ControlResult<bool>;
    async fn append_policy_audit(&self, audit: RoutingPolicyAudit) -> ControlResult<()>;
    /// Most recent first
    async fn list_policy_audit(&self, limit: usize) -> ControlResult<Vec<RoutingPolicyAudit>>;
}

#[async_trait]
pub trait ConnectionStore: Send + Sync {
    /// Last writer by `changed_at` wins; returns false when a newer row was kept
    async fn upsert_connection(&self, connection: ReceiverConnection) -> ControlResult<bool>;
    async fn get_connection(&self, key: &ConnectionKey)
        -> ControlResult<Option<ReceiverConnection>>;
    async fn list_connections(&self, receiver_id: &str) -> ControlResult<Vec<ReceiverConnection>>;
    async fn delete_connection(&self, key: &ConnectionKey) -> ControlResult<bool>;
    async fn append_connection_history(&self, entry: ReceiverConnectionHistory)
        -> ControlResult<()>;
    /// Oldest first
    async fn list_connection_history(
        &self,
        receiver_id: &str,
    ) -> ControlResult<Vec<ReceiverConnectionHistory>>;
}

#[async_trait]
pub trait ScheduledActivationStore: Send + Sync {
    async fn create_scheduled_activation(
        &self,
        activation: NewScheduledActivation,
    ) -> ControlResult<ScheduledActivation>;
    async fn get_scheduled_activation(&self, id: Uuid)
        -> ControlResult<Option<ScheduledActivation>>;
    async fn list_scheduled_activations(&self) -> ControlResult<Vec<ScheduledActivation>>;
    /// Pending rows with `scheduled_at <= now`, earliest first
    async fn list_due_activations(&self, now: DateTime<Utc>)
        -> ControlResult<Vec<ScheduledActivation>>;
    /// `pending -> executing`
    async fn claim_scheduled_activation(&self, id: Uuid) -> ControlResult<ScheduledActivation>;
    /// `executing -> executed | failed`
    async fn complete_scheduled_activation(
        &self,
        id: Uuid,
        status: ScheduledActivationStatus,
        executed_at: DateTime<Utc>,
        result: Value,
    ) -> ControlResult<()>;
    /// `pending -> cancelled`
    async fn cancel_scheduled_activation(&self, id: Uuid) -> ControlResult<ScheduledActivation>;
}

#[async_trait]
pub trait PlaybookStore: Send + Sync {
    async fn create_playbook(&self, playbook: NewPlaybook) -> ControlResult<Playbook>;
    async fn get_playbook(&self, id: Uuid) -> ControlResult<Option<Playbook>>;
    async fn list_playbooks(&self) -> ControlResult<Vec<Playbook>>;
    async fn set_playbook_enabled(&self, id: Uuid, enabled: bool) -> ControlResult<bool>;
    async fn delete_playbook(&self, id: Uuid) -> ControlResult<bool>;
    /// Persist a new execution in `running`
    async fn create_execution(&self, execution: PlaybookExecution) -> ControlResult<()>;
    /// `running -> success | error`
    async fn finish_execution(
        &self,
        id: Uuid,
        status: PlaybookExecutionStatus,
        finished_at: DateTime<Utc>,
        result: Vec<StepOutcome>,
    ) -> ControlResult<()>;
    async fn get_execution(&self, id: Uuid) -> ControlResult<Option<PlaybookExecution>>;
    async fn list_executions(&self, playbook_id: Uuid) -> ControlResult<Vec<PlaybookExecution>>;
}

#[async_trait]
pub trait ScheduledPlaybookStore: Send + Sync {
    async fn create_scheduled_playbook(
        &self,
        scheduled: NewScheduledPlaybook,
    ) -> ControlResult<ScheduledPlaybookExecution>;
    async fn get_scheduled_playbook(
        &self,
        id: Uuid,
    ) -> ControlResult<Option<ScheduledPlaybookExecution>>;
    /// Pending rows with `scheduled_at <= now`, earliest first
    async fn list_due_scheduled_playbooks(
        &self,
        now: DateTime<Utc>,
    ) -> ControlResult<Vec<ScheduledPlaybookExecution>>;
    /// `pending -> executing`
    async fn claim_scheduled_playbook(&self, id: Uuid)
        -> ControlResult<ScheduledPlaybookExecution>;
    /// `executing -> success | error | failed`
    async fn complete_scheduled_playbook(
        &self,
        id: Uuid,
        status: ScheduledPlaybookStatus,
        executed_at: DateTime<Utc>,
        execution_id: Option<Uuid>,
        result: Value,
    ) -> ControlResult<()>;
    /// `pending -> cancelled`
    async fn cancel_scheduled_playbook(&self, id: Uuid)
        -> ControlResult<ScheduledPlaybookExecution>;
}

#[async_trait]
pub trait MaintenanceWindowStore: Send + Sync {
    async fn create_window(&self, window: NewMaintenanceWindow)
        -> ControlResult<MaintenanceWindow>;
    async fn get_window(&self, id: Uuid) -> ControlResult<Option<MaintenanceWindow>>;
    async fn list_windows(&self) -> ControlResult<Vec<MaintenanceWindow>>;
    async fn delete_window(&self, id: Uuid) -> ControlResult<bool>;
    /// Enabled windows containing `at`
    async fn list_active_windows(&self, at: DateTime<Utc>) -> ControlResult<Vec<MaintenanceWindow>>;
}

/// Everything the orchestration core needs from one backing store
pub trait ControlStore:
    AutomationJobStore
    + CheckerResultStore
    + RoutingPolicyStore
    + ConnectionStore
    + ScheduledActivationStore
    + PlaybookStore
    + ScheduledPlaybookStore
    + MaintenanceWindowStore
{
}

impl<T> ControlStore for T where
    T: AutomationJobStore
        + CheckerResultStore
        + RoutingPolicyStore
        + ConnectionStore
        + ScheduledActivationStore
        + PlaybookStore
        + ScheduledPlaybookStore
        + MaintenanceWindowStore
{
}
