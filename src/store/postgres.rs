//! # PostgreSQL Store
//!
//! SQLx-backed implementation of every store trait plus the flow and registry
//! read model. Queries are built at runtime (`sqlx::query_as::<_, Row>`), rows
//! decode into `*Row` structs and convert into the domain models.
//!
//! Status changes are single conditional statements
//! (`UPDATE ... WHERE id = $1 AND status = 'pending' RETURNING ...`); when no row
//! comes back the current status is read to report not-found versus a lost
//! transition. Connection upserts keep the row with the newest `changed_at`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool};
use std::str::FromStr;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

use super::{
    AutomationJobStore, CheckerResultStore, ConnectionStore, MaintenanceWindowStore,
    PlaybookStore, RoutingPolicyStore, ScheduledActivationStore, ScheduledPlaybookStore,
};
use crate::config::DatabaseConfig;
use crate::error::{ControlError, ControlResult};
use crate::models::{
    AutomationJob, CheckerResult, ConnectionKey, Flow, JobRunRecord, MaintenanceWindow,
    NewMaintenanceWindow, NewPlaybook, NewRoutingPolicy, NewScheduledActivation,
    NewScheduledPlaybook, NmosReceiver, NmosSender, Playbook, PlaybookExecution,
    ReceiverConnection, ReceiverConnectionHistory, RoutingPolicy, RoutingPolicyAudit,
    RoutingPolicyPatch, ScheduledActivation, ScheduledPlaybookExecution, StepOutcome,
};
use crate::registry::{FlowLookup, NmosRegistry};
use crate::state_machine::{
    ensure_transition, Lifecycle, PlaybookExecutionStatus, ScheduledActivationStatus,
    ScheduledPlaybookStatus,
};

pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(config: &DatabaseConfig) -> ControlResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect(&config.url)
            .await?;
        Ok(Self::new(pool))
    }

    pub async fn migrate(&self) -> ControlResult<()> {
        info!("Running database migrations");
        MIGRATOR.run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn parse<T: FromStr<Err = String>>(raw: &str) -> ControlResult<T> {
    raw.parse().map_err(ControlError::DatabaseError)
}

fn object(value: Value) -> ControlResult<Map<String, Value>> {
    match value {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Map::new()),
        other => Err(ControlError::DatabaseError(format!(
            "expected a JSON object, found {other}"
        ))),
    }
}

/// Error for a conditional status update that matched no row
fn lost_transition<S: Lifecycle>(id: Uuid, current: Option<S>, to: S) -> ControlError {
    match current {
        None => ControlError::not_found(S::ENTITY, id),
        Some(from) => ControlError::InvalidStateTransition {
            entity: S::ENTITY,
            id: id.to_string(),
            from: from.to_string(),
            to: to.to_string(),
        },
    }
}

// Rows

#[derive(Debug, FromRow)]
struct AutomationJobRow {
    job_id: String,
    job_type: String,
    enabled: bool,
    schedule_type: String,
    schedule_value: String,
    last_run_at: Option<DateTime<Utc>>,
    last_run_status: Option<String>,
    last_run_result: Option<Value>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<AutomationJobRow> for AutomationJob {
    type Error = ControlError;

    fn try_from(row: AutomationJobRow) -> ControlResult<Self> {
        Ok(Self {
            job_id: row.job_id,
            job_type: row.job_type,
            enabled: row.enabled,
            schedule_type: parse(&row.schedule_type)?,
            schedule_value: row.schedule_value,
            last_run_at: row.last_run_at,
            last_run_status: row.last_run_status,
            last_run_result: row.last_run_result,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct CheckerResultRow {
    id: Uuid,
    kind: String,
    result: Value,
    checked_at: DateTime<Utc>,
}

impl From<CheckerResultRow> for CheckerResult {
    fn from(row: CheckerResultRow) -> Self {
        Self {
            id: row.id,
            kind: row.kind,
            result: row.result,
            checked_at: row.checked_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct RoutingPolicyRow {
    id: Uuid,
    name: String,
    policy_type: String,
    enabled: bool,
    priority: i32,
    source_pattern: Option<String>,
    destination_pattern: Option<String>,
    constraint_field: Option<String>,
    constraint_value: Option<String>,
    constraint_operator: Option<String>,
    created_by: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<RoutingPolicyRow> for RoutingPolicy {
    type Error = ControlError;

    fn try_from(row: RoutingPolicyRow) -> ControlResult<Self> {
        Ok(Self {
            id: row.id,
            name: row.name,
            policy_type: parse(&row.policy_type)?,
            enabled: row.enabled,
            priority: row.priority,
            source_pattern: row.source_pattern,
            destination_pattern: row.destination_pattern,
            constraint_field: row.constraint_field,
            constraint_value: row.constraint_value,
            constraint_operator: row.constraint_operator,
            created_by: row.created_by,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct PolicyAuditRow {
    id: Uuid,
    policy_id: Option<Uuid>,
    action: String,
    source_id: String,
    destination_id: String,
    flow_id: Option<String>,
    violation_reason: Option<String>,
    overridden_by: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<PolicyAuditRow> for RoutingPolicyAudit {
    type Error = ControlError;

    fn try_from(row: PolicyAuditRow) -> ControlResult<Self> {
        Ok(Self {
            id: row.id,
            policy_id: row.policy_id,
            action: parse(&row.action)?,
            source_id: row.source_id,
            destination_id: row.destination_id,
            flow_id: row.flow_id,
            violation_reason: row.violation_reason,
            overridden_by: row.overridden_by,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct ConnectionRow {
    receiver_id: String,
    state: String,
    role: String,
    sender_id: Option<String>,
    flow_id: Option<String>,
    metadata: Option<Value>,
    changed_at: DateTime<Utc>,
    changed_by: String,
}

impl TryFrom<ConnectionRow> for ReceiverConnection {
    type Error = ControlError;

    fn try_from(row: ConnectionRow) -> ControlResult<Self> {
        Ok(Self {
            receiver_id: row.receiver_id,
            state: parse(&row.state)?,
            role: parse(&row.role)?,
            sender_id: row.sender_id,
            flow_id: row.flow_id,
            metadata: row.metadata,
            changed_at: row.changed_at,
            changed_by: row.changed_by,
        })
    }
}

#[derive(Debug, FromRow)]
struct ConnectionHistoryRow {
    id: Uuid,
    receiver_id: String,
    state: String,
    role: String,
    action: String,
    sender_id: Option<String>,
    flow_id: Option<String>,
    metadata: Option<Value>,
    changed_at: DateTime<Utc>,
    changed_by: String,
}

impl TryFrom<ConnectionHistoryRow> for ReceiverConnectionHistory {
    type Error = ControlError;

    fn try_from(row: ConnectionHistoryRow) -> ControlResult<Self> {
        Ok(Self {
            id: row.id,
            receiver_id: row.receiver_id,
            state: parse(&row.state)?,
            role: parse(&row.role)?,
            action: parse(&row.action)?,
            sender_id: row.sender_id,
            flow_id: row.flow_id,
            metadata: row.metadata,
            changed_at: row.changed_at,
            changed_by: row.changed_by,
        })
    }
}

#[derive(Debug, FromRow)]
struct ScheduledActivationRow {
    id: Uuid,
    flow_id: String,
    receiver_ids: Vec<String>,
    is05_base_url: String,
    sender_id: Option<String>,
    scheduled_at: DateTime<Utc>,
    mode: String,
    status: String,
    executed_at: Option<DateTime<Utc>>,
    result: Option<Value>,
    created_by: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<ScheduledActivationRow> for ScheduledActivation {
    type Error = ControlError;

    fn try_from(row: ScheduledActivationRow) -> ControlResult<Self> {
        Ok(Self {
            id: row.id,
            flow_id: row.flow_id,
            receiver_ids: row.receiver_ids,
            is05_base_url: row.is05_base_url,
            sender_id: row.sender_id,
            scheduled_at: row.scheduled_at,
            mode: parse(&row.mode)?,
            status: parse(&row.status)?,
            executed_at: row.executed_at,
            result: row.result,
            created_by: row.created_by,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct PlaybookRow {
    id: Uuid,
    name: String,
    description: Option<String>,
    steps: Value,
    parameters: Value,
    allowed_roles: Vec<String>,
    enabled: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PlaybookRow> for Playbook {
    type Error = ControlError;

    fn try_from(row: PlaybookRow) -> ControlResult<Self> {
        let steps = match row.steps {
            Value::Array(steps) => steps,
            other => {
                return Err(ControlError::DatabaseError(format!(
                    "playbook {} steps are not an array: {other}",
                    row.id
                )))
            }
        };
        Ok(Self {
            id: row.id,
            name: row.name,
            description: row.description,
            steps,
            parameters: row.parameters,
            allowed_roles: row.allowed_roles,
            enabled: row.enabled,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct PlaybookExecutionRow {
    id: Uuid,
    playbook_id: Uuid,
    parameters: Value,
    status: String,
    executed_by: String,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    result: Value,
}

impl TryFrom<PlaybookExecutionRow> for PlaybookExecution {
    type Error = ControlError;

    fn try_from(row: PlaybookExecutionRow) -> ControlResult<Self> {
        Ok(Self {
            id: row.id,
            playbook_id: row.playbook_id,
            parameters: object(row.parameters)?,
            status: parse(&row.status)?,
            executed_by: row.executed_by,
            started_at: row.started_at,
            finished_at: row.finished_at,
            result: serde_json::from_value::<Vec<StepOutcome>>(row.result)?,
        })
    }
}

#[derive(Debug, FromRow)]
struct ScheduledPlaybookRow {
    id: Uuid,
    playbook_id: Uuid,
    parameters: Value,
    scheduled_at: DateTime<Utc>,
    status: String,
    execution_id: Option<Uuid>,
    executed_at: Option<DateTime<Utc>>,
    result: Option<Value>,
    created_by: String,
    created_by_role: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<ScheduledPlaybookRow> for ScheduledPlaybookExecution {
    type Error = ControlError;

    fn try_from(row: ScheduledPlaybookRow) -> ControlResult<Self> {
        Ok(Self {
            id: row.id,
            playbook_id: row.playbook_id,
            parameters: object(row.parameters)?,
            scheduled_at: row.scheduled_at,
            status: parse(&row.status)?,
            execution_id: row.execution_id,
            executed_at: row.executed_at,
            result: row.result,
            created_by: row.created_by,
            created_by_role: row.created_by_role,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct MaintenanceWindowRow {
    id: Uuid,
    name: String,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    routing_policy_id: Option<Uuid>,
    enabled: bool,
    created_at: DateTime<Utc>,
}

impl From<MaintenanceWindowRow> for MaintenanceWindow {
    fn from(row: MaintenanceWindowRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            start_time: row.start_time,
            end_time: row.end_time,
            routing_policy_id: row.routing_policy_id,
            enabled: row.enabled,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct FlowRow {
    flow_id: String,
    display_name: String,
    multicast_ip: String,
    source_ip: String,
    port: i32,
    sender_id: Option<String>,
}

impl TryFrom<FlowRow> for Flow {
    type Error = ControlError;

    fn try_from(row: FlowRow) -> ControlResult<Self> {
        let port = u16::try_from(row.port).map_err(|_| {
            ControlError::DatabaseError(format!("flow {} has invalid port {}", row.flow_id, row.port))
        })?;
        Ok(Self {
            flow_id: row.flow_id,
            display_name: row.display_name,
            multicast_ip: row.multicast_ip,
            source_ip: row.source_ip,
            port,
            sender_id: row.sender_id,
        })
    }
}

#[derive(Debug, FromRow)]
struct NmosReceiverRow {
    id: String,
    device_id: String,
    format: String,
}

#[derive(Debug, FromRow)]
struct NmosSenderRow {
    id: String,
    flow_id: Option<String>,
    label: String,
}

fn convert_all<R, T>(rows: Vec<R>) -> ControlResult<Vec<T>>
where
    T: TryFrom<R, Error = ControlError>,
{
    rows.into_iter().map(T::try_from).collect()
}

// Store implementations

#[async_trait]
impl AutomationJobStore for PgStore {
    async fn upsert_job(&self, job: AutomationJob) -> ControlResult<AutomationJob> {
        let row = sqlx::query_as::<_, AutomationJobRow>(
            r#"
            INSERT INTO automation_jobs (job_id, job_type, enabled, schedule_type, schedule_value, updated_at)
            VALUES ($1, $2, $3, $4, $5, NOW())
            ON CONFLICT (job_id) DO UPDATE SET
                job_type = EXCLUDED.job_type,
                enabled = EXCLUDED.enabled,
                schedule_type = EXCLUDED.schedule_type,
                schedule_value = EXCLUDED.schedule_value,
                updated_at = NOW()
            RETURNING *
            "#,
        )
        .bind(&job.job_id)
        .bind(&job.job_type)
        .bind(job.enabled)
        .bind(job.schedule_type.to_string())
        .bind(&job.schedule_value)
        .fetch_one(&self.pool)
        .await?;
        row.try_into()
    }

    async fn get_job(&self, job_id: &str) -> ControlResult<Option<AutomationJob>> {
        sqlx::query_as::<_, AutomationJobRow>("SELECT * FROM automation_jobs WHERE job_id = $1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?
            .map(AutomationJob::try_from)
            .transpose()
    }

    async fn list_jobs(&self) -> ControlResult<Vec<AutomationJob>> {
        let rows = sqlx::query_as::<_, AutomationJobRow>(
            "SELECT * FROM automation_jobs ORDER BY job_id",
        )
        .fetch_all(&self.pool)
        .await?;
        convert_all(rows)
    }

    async fn set_job_enabled(&self, job_id: &str, enabled: bool) -> ControlResult<bool> {
        let result = sqlx::query(
            "UPDATE automation_jobs SET enabled = $2, updated_at = NOW() WHERE job_id = $1",
        )
        .bind(job_id)
        .bind(enabled)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn record_job_run(&self, job_id: &str, run: JobRunRecord) -> ControlResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE automation_jobs
            SET last_run_at = $2, last_run_status = $3, last_run_result = $4, updated_at = NOW()
            WHERE job_id = $1
            "#,
        )
        .bind(job_id)
        .bind(run.ran_at)
        .bind(&run.status)
        .bind(&run.result)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(ControlError::not_found("automation_job", job_id));
        }
        Ok(())
    }
}

#[async_trait]
impl CheckerResultStore for PgStore {
    async fn save_checker_result(
        &self,
        kind: &str,
        result: Value,
        checked_at: DateTime<Utc>,
    ) -> ControlResult<CheckerResult> {
        let row = sqlx::query_as::<_, CheckerResultRow>(
            r#"
            INSERT INTO checker_results (id, kind, result, checked_at)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(kind)
        .bind(&result)
        .bind(checked_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    async fn latest_checker_result(&self, kind: &str) -> ControlResult<Option<CheckerResult>> {
        let row = sqlx::query_as::<_, CheckerResultRow>(
            "SELECT * FROM checker_results WHERE kind = $1 ORDER BY checked_at DESC LIMIT 1",
        )
        .bind(kind)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }
}

#[async_trait]
impl RoutingPolicyStore for PgStore {
    async fn create_policy(&self, policy: NewRoutingPolicy) -> ControlResult<RoutingPolicy> {
        policy.validate()?;
        let policy = policy.into_policy(Utc::now());
        sqlx::query(
            r#"
            INSERT INTO routing_policies (
                id, name, policy_type, enabled, priority, source_pattern, destination_pattern,
                constraint_field, constraint_value, constraint_operator, created_by, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(policy.id)
        .bind(&policy.name)
        .bind(policy.policy_type.to_string())
        .bind(policy.enabled)
        .bind(policy.priority)
        .bind(&policy.source_pattern)
        .bind(&policy.destination_pattern)
        .bind(&policy.constraint_field)
        .bind(&policy.constraint_value)
        .bind(&policy.constraint_operator)
        .bind(&policy.created_by)
        .bind(policy.created_at)
        .bind(policy.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(policy)
    }

    async fn get_policy(&self, id: Uuid) -> ControlResult<Option<RoutingPolicy>> {
        sqlx::query_as::<_, RoutingPolicyRow>("SELECT * FROM routing_policies WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(RoutingPolicy::try_from)
            .transpose()
    }

    async fn list_policies(&self) -> ControlResult<Vec<RoutingPolicy>> {
        let rows = sqlx::query_as::<_, RoutingPolicyRow>(
            "SELECT * FROM routing_policies ORDER BY priority DESC, created_at",
        )
        .fetch_all(&self.pool)
        .await?;
        convert_all(rows)
    }

    async fn list_enabled_policies(&self) -> ControlResult<Vec<RoutingPolicy>> {
        let rows = sqlx::query_as::<_, RoutingPolicyRow>(
            "SELECT * FROM routing_policies WHERE enabled ORDER BY priority DESC, created_at",
        )
        .fetch_all(&self.pool)
        .await?;
        convert_all(rows)
    }

    async fn update_policy(
        &self,
        id: Uuid,
        patch: RoutingPolicyPatch,
    ) -> ControlResult<Option<RoutingPolicy>> {
        patch.validate()?;
        let row = sqlx::query_as::<_, RoutingPolicyRow>(
            r#"
            UPDATE routing_policies SET
                name = COALESCE($2, name),
                enabled = COALESCE($3, enabled),
                priority = COALESCE($4, priority),
                source_pattern = COALESCE($5, source_pattern),
                destination_pattern = COALESCE($6, destination_pattern),
                constraint_field = COALESCE($7, constraint_field),
                constraint_value = COALESCE($8, constraint_value),
                constraint_operator = COALESCE($9, constraint_operator),
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(patch.name)
        .bind(patch.enabled)
        .bind(patch.priority)
        .bind(patch.source_pattern)
        .bind(patch.destination_pattern)
        .bind(patch.constraint_field)
        .bind(patch.constraint_value)
        .bind(patch.constraint_operator)
        .fetch_optional(&self.pool)
        .await?;
        row.map(RoutingPolicy::try_from).transpose()
    }

    async fn delete_policy(&self, id: Uuid) -> ControlResult<bool> {
        let result = sqlx::query("DELETE FROM routing_policies WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn append_policy_audit(&self, audit: RoutingPolicyAudit) -> ControlResult<()> {
        sqlx::query(
            r#"
            INSERT INTO routing_policy_audit (
                id, policy_id, action, source_id, destination_id, flow_id,
                violation_reason, overridden_by, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(audit.id)
        .bind(audit.policy_id)
        .bind(audit.action.to_string())
        .bind(&audit.source_id)
        .bind(&audit.destination_id)
        .bind(&audit.flow_id)
        .bind(&audit.violation_reason)
        .bind(&audit.overridden_by)
        .bind(audit.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_policy_audit(&self, limit: usize) -> ControlResult<Vec<RoutingPolicyAudit>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query_as::<_, PolicyAuditRow>(
            "SELECT * FROM routing_policy_audit ORDER BY seq DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        convert_all(rows)
    }
}

#[async_trait]
impl ConnectionStore for PgStore {
    async fn upsert_connection(&self, connection: ReceiverConnection) -> ControlResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO receiver_connections (
                receiver_id, state, role, sender_id, flow_id, metadata, changed_at, changed_by
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (receiver_id, state, role) DO UPDATE SET
                sender_id = EXCLUDED.sender_id,
                flow_id = EXCLUDED.flow_id,
                metadata = EXCLUDED.metadata,
                changed_at = EXCLUDED.changed_at,
                changed_by = EXCLUDED.changed_by
            WHERE receiver_connections.changed_at <= EXCLUDED.changed_at
            "#,
        )
        .bind(&connection.receiver_id)
        .bind(connection.state.to_string())
        .bind(connection.role.to_string())
        .bind(&connection.sender_id)
        .bind(&connection.flow_id)
        .bind(&connection.metadata)
        .bind(connection.changed_at)
        .bind(&connection.changed_by)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_connection(
        &self,
        key: &ConnectionKey,
    ) -> ControlResult<Option<ReceiverConnection>> {
        sqlx::query_as::<_, ConnectionRow>(
            "SELECT * FROM receiver_connections WHERE receiver_id = $1 AND state = $2 AND role = $3",
        )
        .bind(&key.receiver_id)
        .bind(key.state.to_string())
        .bind(key.role.to_string())
        .fetch_optional(&self.pool)
        .await?
        .map(ReceiverConnection::try_from)
        .transpose()
    }

    async fn list_connections(&self, receiver_id: &str) -> ControlResult<Vec<ReceiverConnection>> {
        let rows = sqlx::query_as::<_, ConnectionRow>(
            "SELECT * FROM receiver_connections WHERE receiver_id = $1 ORDER BY state, role",
        )
        .bind(receiver_id)
        .fetch_all(&self.pool)
        .await?;
        convert_all(rows)
    }

    async fn delete_connection(&self, key: &ConnectionKey) -> ControlResult<bool> {
        let result = sqlx::query(
            "DELETE FROM receiver_connections WHERE receiver_id = $1 AND state = $2 AND role = $3",
        )
        .bind(&key.receiver_id)
        .bind(key.state.to_string())
        .bind(key.role.to_string())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn append_connection_history(
        &self,
        entry: ReceiverConnectionHistory,
    ) -> ControlResult<()> {
        sqlx::query(
            r#"
            INSERT INTO receiver_connection_history (
                id, receiver_id, state, role, action, sender_id, flow_id, metadata, changed_at, changed_by
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(entry.id)
        .bind(&entry.receiver_id)
        .bind(entry.state.to_string())
        .bind(entry.role.to_string())
        .bind(entry.action.to_string())
        .bind(&entry.sender_id)
        .bind(&entry.flow_id)
        .bind(&entry.metadata)
        .bind(entry.changed_at)
        .bind(&entry.changed_by)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_connection_history(
        &self,
        receiver_id: &str,
    ) -> ControlResult<Vec<ReceiverConnectionHistory>> {
        let rows = sqlx::query_as::<_, ConnectionHistoryRow>(
            "SELECT * FROM receiver_connection_history WHERE receiver_id = $1 ORDER BY seq",
        )
        .bind(receiver_id)
        .fetch_all(&self.pool)
        .await?;
        convert_all(rows)
    }
}

impl PgStore {
    async fn activation_status(&self, id: Uuid) -> ControlResult<Option<ScheduledActivationStatus>> {
        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM scheduled_activations WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        status.as_deref().map(parse).transpose()
    }

    async fn transition_activation(
        &self,
        id: Uuid,
        from: ScheduledActivationStatus,
        to: ScheduledActivationStatus,
    ) -> ControlResult<ScheduledActivation> {
        let row = sqlx::query_as::<_, ScheduledActivationRow>(
            "UPDATE scheduled_activations SET status = $3 WHERE id = $1 AND status = $2 RETURNING *",
        )
        .bind(id)
        .bind(from.to_string())
        .bind(to.to_string())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => row.try_into(),
            None => Err(lost_transition(id, self.activation_status(id).await?, to)),
        }
    }

    async fn scheduled_playbook_status(
        &self,
        id: Uuid,
    ) -> ControlResult<Option<ScheduledPlaybookStatus>> {
        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM scheduled_playbook_executions WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        status.as_deref().map(parse).transpose()
    }

    async fn transition_scheduled_playbook(
        &self,
        id: Uuid,
        from: ScheduledPlaybookStatus,
        to: ScheduledPlaybookStatus,
    ) -> ControlResult<ScheduledPlaybookExecution> {
        let row = sqlx::query_as::<_, ScheduledPlaybookRow>(
            "UPDATE scheduled_playbook_executions SET status = $3 WHERE id = $1 AND status = $2 RETURNING *",
        )
        .bind(id)
        .bind(from.to_string())
        .bind(to.to_string())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => row.try_into(),
            None => Err(lost_transition(id, self.scheduled_playbook_status(id).await?, to)),
        }
    }
}

#[async_trait]
impl ScheduledActivationStore for PgStore {
    async fn create_scheduled_activation(
        &self,
        activation: NewScheduledActivation,
    ) -> ControlResult<ScheduledActivation> {
        activation.validate()?;
        let activation = activation.into_activation(Utc::now());
        sqlx::query(
            r#"
            INSERT INTO scheduled_activations (
                id, flow_id, receiver_ids, is05_base_url, sender_id, scheduled_at, mode, status,
                created_by, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(activation.id)
        .bind(&activation.flow_id)
        .bind(&activation.receiver_ids)
        .bind(&activation.is05_base_url)
        .bind(&activation.sender_id)
        .bind(activation.scheduled_at)
        .bind(activation.mode.to_string())
        .bind(activation.status.to_string())
        .bind(&activation.created_by)
        .bind(activation.created_at)
        .execute(&self.pool)
        .await?;
        Ok(activation)
    }

    async fn get_scheduled_activation(
        &self,
        id: Uuid,
    ) -> ControlResult<Option<ScheduledActivation>> {
        sqlx::query_as::<_, ScheduledActivationRow>(
            "SELECT * FROM scheduled_activations WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .map(ScheduledActivation::try_from)
        .transpose()
    }

    async fn list_scheduled_activations(&self) -> ControlResult<Vec<ScheduledActivation>> {
        let rows = sqlx::query_as::<_, ScheduledActivationRow>(
            "SELECT * FROM scheduled_activations ORDER BY scheduled_at",
        )
        .fetch_all(&self.pool)
        .await?;
        convert_all(rows)
    }

    async fn list_due_activations(
        &self,
        now: DateTime<Utc>,
    ) -> ControlResult<Vec<ScheduledActivation>> {
        let rows = sqlx::query_as::<_, ScheduledActivationRow>(
            r#"
            SELECT * FROM scheduled_activations
            WHERE status = 'pending' AND scheduled_at <= $1
            ORDER BY scheduled_at
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        convert_all(rows)
    }

    async fn claim_scheduled_activation(&self, id: Uuid) -> ControlResult<ScheduledActivation> {
        self.transition_activation(
            id,
            ScheduledActivationStatus::Pending,
            ScheduledActivationStatus::Executing,
        )
        .await
    }

    async fn complete_scheduled_activation(
        &self,
        id: Uuid,
        status: ScheduledActivationStatus,
        executed_at: DateTime<Utc>,
        result: Value,
    ) -> ControlResult<()> {
        ensure_transition(id, ScheduledActivationStatus::Executing, status)?;
        let updated = sqlx::query(
            r#"
            UPDATE scheduled_activations
            SET status = $2, executed_at = $3, result = $4
            WHERE id = $1 AND status = 'executing'
            "#,
        )
        .bind(id)
        .bind(status.to_string())
        .bind(executed_at)
        .bind(&result)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(lost_transition(id, self.activation_status(id).await?, status));
        }
        Ok(())
    }

    async fn cancel_scheduled_activation(&self, id: Uuid) -> ControlResult<ScheduledActivation> {
        self.transition_activation(
            id,
            ScheduledActivationStatus::Pending,
            ScheduledActivationStatus::Cancelled,
        )
        .await
    }
}

#[async_trait]
impl PlaybookStore for PgStore {
    async fn create_playbook(&self, playbook: NewPlaybook) -> ControlResult<Playbook> {
        playbook.validate()?;
        let playbook = playbook.into_playbook(Utc::now());
        sqlx::query(
            r#"
            INSERT INTO playbooks (
                id, name, description, steps, parameters, allowed_roles, enabled, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(playbook.id)
        .bind(&playbook.name)
        .bind(&playbook.description)
        .bind(Value::Array(playbook.steps.clone()))
        .bind(&playbook.parameters)
        .bind(&playbook.allowed_roles)
        .bind(playbook.enabled)
        .bind(playbook.created_at)
        .bind(playbook.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(playbook)
    }

    async fn get_playbook(&self, id: Uuid) -> ControlResult<Option<Playbook>> {
        sqlx::query_as::<_, PlaybookRow>("SELECT * FROM playbooks WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(Playbook::try_from)
            .transpose()
    }

    async fn list_playbooks(&self) -> ControlResult<Vec<Playbook>> {
        let rows = sqlx::query_as::<_, PlaybookRow>("SELECT * FROM playbooks ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        convert_all(rows)
    }

    async fn set_playbook_enabled(&self, id: Uuid, enabled: bool) -> ControlResult<bool> {
        let result =
            sqlx::query("UPDATE playbooks SET enabled = $2, updated_at = NOW() WHERE id = $1")
                .bind(id)
                .bind(enabled)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_playbook(&self, id: Uuid) -> ControlResult<bool> {
        let result = sqlx::query("DELETE FROM playbooks WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn create_execution(&self, execution: PlaybookExecution) -> ControlResult<()> {
        sqlx::query(
            r#"
            INSERT INTO playbook_executions (
                id, playbook_id, parameters, status, executed_by, started_at, finished_at, result
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(execution.id)
        .bind(execution.playbook_id)
        .bind(Value::Object(execution.parameters))
        .bind(execution.status.to_string())
        .bind(&execution.executed_by)
        .bind(execution.started_at)
        .bind(execution.finished_at)
        .bind(serde_json::to_value(&execution.result)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn finish_execution(
        &self,
        id: Uuid,
        status: PlaybookExecutionStatus,
        finished_at: DateTime<Utc>,
        result: Vec<StepOutcome>,
    ) -> ControlResult<()> {
        ensure_transition(id, PlaybookExecutionStatus::Running, status)?;
        let updated = sqlx::query(
            r#"
            UPDATE playbook_executions
            SET status = $2, finished_at = $3, result = $4
            WHERE id = $1 AND status = 'running'
            "#,
        )
        .bind(id)
        .bind(status.to_string())
        .bind(finished_at)
        .bind(serde_json::to_value(&result)?)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            let current: Option<String> =
                sqlx::query_scalar("SELECT status FROM playbook_executions WHERE id = $1")
                    .bind(id)
                    .fetch_optional(&self.pool)
                    .await?;
            let current = current
                .as_deref()
                .map(parse::<PlaybookExecutionStatus>)
                .transpose()?;
            return Err(lost_transition(id, current, status));
        }
        Ok(())
    }

    async fn get_execution(&self, id: Uuid) -> ControlResult<Option<PlaybookExecution>> {
        sqlx::query_as::<_, PlaybookExecutionRow>("SELECT * FROM playbook_executions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(PlaybookExecution::try_from)
            .transpose()
    }

    async fn list_executions(&self, playbook_id: Uuid) -> ControlResult<Vec<PlaybookExecution>> {
        let rows = sqlx::query_as::<_, PlaybookExecutionRow>(
            "SELECT * FROM playbook_executions WHERE playbook_id = $1 ORDER BY started_at",
        )
        .bind(playbook_id)
        .fetch_all(&self.pool)
        .await?;
        convert_all(rows)
    }
}

#[async_trait]
impl ScheduledPlaybookStore for PgStore {
    async fn create_scheduled_playbook(
        &self,
        scheduled: NewScheduledPlaybook,
    ) -> ControlResult<ScheduledPlaybookExecution> {
        let scheduled = scheduled.into_scheduled(Utc::now());
        sqlx::query(
            r#"
            INSERT INTO scheduled_playbook_executions (
                id, playbook_id, parameters, scheduled_at, status, created_by, created_by_role, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(scheduled.id)
        .bind(scheduled.playbook_id)
        .bind(Value::Object(scheduled.parameters.clone()))
        .bind(scheduled.scheduled_at)
        .bind(scheduled.status.to_string())
        .bind(&scheduled.created_by)
        .bind(&scheduled.created_by_role)
        .bind(scheduled.created_at)
        .execute(&self.pool)
        .await?;
        Ok(scheduled)
    }

    async fn get_scheduled_playbook(
        &self,
        id: Uuid,
    ) -> ControlResult<Option<ScheduledPlaybookExecution>> {
        sqlx::query_as::<_, ScheduledPlaybookRow>(
            "SELECT * FROM scheduled_playbook_executions WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .map(ScheduledPlaybookExecution::try_from)
        .transpose()
    }

    async fn list_due_scheduled_playbooks(
        &self,
        now: DateTime<Utc>,
    ) -> ControlResult<Vec<ScheduledPlaybookExecution>> {
        let rows = sqlx::query_as::<_, ScheduledPlaybookRow>(
            r#"
            SELECT * FROM scheduled_playbook_executions
            WHERE status = 'pending' AND scheduled_at <= $1
            ORDER BY scheduled_at
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        convert_all(rows)
    }

    async fn claim_scheduled_playbook(
        &self,
        id: Uuid,
    ) -> ControlResult<ScheduledPlaybookExecution> {
        self.transition_scheduled_playbook(
            id,
            ScheduledPlaybookStatus::Pending,
            ScheduledPlaybookStatus::Executing,
        )
        .await
    }

    async fn complete_scheduled_playbook(
        &self,
        id: Uuid,
        status: ScheduledPlaybookStatus,
        executed_at: DateTime<Utc>,
        execution_id: Option<Uuid>,
        result: Value,
    ) -> ControlResult<()> {
        ensure_transition(id, ScheduledPlaybookStatus::Executing, status)?;
        let updated = sqlx::query(
            r#"
            UPDATE scheduled_playbook_executions
            SET status = $2, executed_at = $3, execution_id = $4, result = $5
            WHERE id = $1 AND status = 'executing'
            "#,
        )
        .bind(id)
        .bind(status.to_string())
        .bind(executed_at)
        .bind(execution_id)
        .bind(&result)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(lost_transition(
                id,
                self.scheduled_playbook_status(id).await?,
                status,
            ));
        }
        Ok(())
    }

    async fn cancel_scheduled_playbook(
        &self,
        id: Uuid,
    ) -> ControlResult<ScheduledPlaybookExecution> {
        self.transition_scheduled_playbook(
            id,
            ScheduledPlaybookStatus::Pending,
            ScheduledPlaybookStatus::Cancelled,
        )
        .await
    }
}

#[async_trait]
impl MaintenanceWindowStore for PgStore {
    async fn create_window(
        &self,
        window: NewMaintenanceWindow,
    ) -> ControlResult<MaintenanceWindow> {
        window.validate()?;
        let window = window.into_window(Utc::now());
        sqlx::query(
            r#"
            INSERT INTO maintenance_windows (
                id, name, start_time, end_time, routing_policy_id, enabled, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(window.id)
        .bind(&window.name)
        .bind(window.start_time)
        .bind(window.end_time)
        .bind(window.routing_policy_id)
        .bind(window.enabled)
        .bind(window.created_at)
        .execute(&self.pool)
        .await?;
        Ok(window)
    }

    async fn get_window(&self, id: Uuid) -> ControlResult<Option<MaintenanceWindow>> {
        let row = sqlx::query_as::<_, MaintenanceWindowRow>(
            "SELECT * FROM maintenance_windows WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn list_windows(&self) -> ControlResult<Vec<MaintenanceWindow>> {
        let rows = sqlx::query_as::<_, MaintenanceWindowRow>(
            "SELECT * FROM maintenance_windows ORDER BY start_time",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn delete_window(&self, id: Uuid) -> ControlResult<bool> {
        let result = sqlx::query("DELETE FROM maintenance_windows WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_active_windows(
        &self,
        at: DateTime<Utc>,
    ) -> ControlResult<Vec<MaintenanceWindow>> {
        let rows = sqlx::query_as::<_, MaintenanceWindowRow>(
            r#"
            SELECT * FROM maintenance_windows
            WHERE enabled AND start_time <= $1 AND end_time > $1
            ORDER BY start_time
            "#,
        )
        .bind(at)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }
}

#[async_trait]
impl FlowLookup for PgStore {
    async fn get_flow(&self, flow_id: &str) -> ControlResult<Option<Flow>> {
        sqlx::query_as::<_, FlowRow>("SELECT * FROM flows WHERE flow_id = $1")
            .bind(flow_id)
            .fetch_optional(&self.pool)
            .await?
            .map(Flow::try_from)
            .transpose()
    }

    async fn list_flows(&self) -> ControlResult<Vec<Flow>> {
        let rows = sqlx::query_as::<_, FlowRow>("SELECT * FROM flows ORDER BY flow_id")
            .fetch_all(&self.pool)
            .await?;
        convert_all(rows)
    }
}

#[async_trait]
impl NmosRegistry for PgStore {
    async fn list_receivers(&self, device_id: Option<&str>) -> ControlResult<Vec<NmosReceiver>> {
        let rows = sqlx::query_as::<_, NmosReceiverRow>(
            "SELECT * FROM nmos_receivers WHERE $1::TEXT IS NULL OR device_id = $1 ORDER BY id",
        )
        .bind(device_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|row| NmosReceiver {
                id: row.id,
                device_id: row.device_id,
                format: row.format,
            })
            .collect())
    }

    async fn list_senders(&self) -> ControlResult<Vec<NmosSender>> {
        let rows = sqlx::query_as::<_, NmosSenderRow>("SELECT * FROM nmos_senders ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| NmosSender {
                id: row.id,
                flow_id: row.flow_id,
                label: row.label,
            })
            .collect())
    }
}
