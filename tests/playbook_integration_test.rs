//! Playbook execution and the scheduled playbook runner over the in-memory store.

mod common;

use chrono::{Duration, Utc};
use serde_json::{json, Map, Value};
use std::sync::Arc;

use common::TestPlane;
use nmos_control::error::ControlError;
use nmos_control::events::ControlEvent;
use nmos_control::models::{
    Actor, ConnectionAction, ConnectionKey, ConnectionRole, ConnectionState, NewPlaybook,
    NewScheduledPlaybook,
};
use nmos_control::orchestration::{PlaybookEngine, ScheduledPlaybookRunner};
use nmos_control::state_machine::{PlaybookExecutionStatus, ScheduledPlaybookStatus};
use nmos_control::store::{PlaybookStore, ScheduledPlaybookStore};

fn engine(plane: &TestPlane) -> Arc<PlaybookEngine> {
    Arc::new(PlaybookEngine::new(
        plane.store.clone(),
        plane.store.clone(),
        plane.connections.clone(),
    ))
}

fn playbook(steps: Vec<Value>, allowed_roles: &[&str]) -> NewPlaybook {
    NewPlaybook {
        name: "evening switch".to_string(),
        description: Some("Moves the evening feeds".to_string()),
        steps,
        parameters: json!({ "rx": "receiver id" }),
        allowed_roles: allowed_roles.iter().map(|s| s.to_string()).collect(),
        enabled: true,
    }
}

fn params(pairs: &[(&str, &str)]) -> Map<String, Value> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
        .collect()
}

fn active(receiver_id: &str) -> ConnectionKey {
    ConnectionKey::new(receiver_id, ConnectionState::Active, ConnectionRole::Master)
}

#[tokio::test]
async fn test_viewer_cannot_run_restricted_playbook() {
    let plane = TestPlane::new();
    let engine = engine(&plane);
    let created = plane
        .store
        .create_playbook(playbook(
            vec![json!({"action": "connect_receiver", "receiver_id": "rx-1", "sender_id": "tx-1"})],
            &["operator"],
        ))
        .await
        .unwrap();

    let err = engine
        .execute(created.id, &Actor::new("vic", "viewer"), Map::new())
        .await
        .unwrap_err();

    assert!(matches!(err, ControlError::Unauthorized { ref role, .. } if role == "viewer"));
    assert_eq!(plane.store.execution_count(), 0);
    assert!(plane.connections.get(&active("rx-1")).await.unwrap().is_none());
}

#[tokio::test]
async fn test_admin_runs_any_playbook() {
    let plane = TestPlane::new();
    let engine = engine(&plane);
    let created = plane
        .store
        .create_playbook(playbook(
            vec![json!({"action": "connect_receiver", "receiver_id": "{{rx}}", "sender_id": "tx-1"})],
            &["operator"],
        ))
        .await
        .unwrap();

    let report = engine
        .execute(created.id, &Actor::new("ada", "admin"), params(&[("rx", "rx-7")]))
        .await
        .unwrap();

    assert_eq!(report.status, PlaybookExecutionStatus::Success);
    assert_eq!(report.steps.len(), 1);

    let connection = plane.connections.get(&active("rx-7")).await.unwrap().unwrap();
    assert_eq!(connection.sender_id.as_deref(), Some("tx-1"));
    assert_eq!(connection.changed_by, "ada");
    assert_eq!(
        connection.metadata.unwrap()["execution_id"],
        json!(report.execution_id)
    );

    let execution = plane
        .store
        .get_execution(report.execution_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(execution.status, PlaybookExecutionStatus::Success);
    assert!(execution.finished_at.is_some());
    assert_eq!(execution.parameters["rx"], "rx-7");
}

#[tokio::test]
async fn test_failed_step_stops_execution() {
    let plane = TestPlane::new();
    let engine = engine(&plane);
    let created = plane
        .store
        .create_playbook(playbook(
            vec![
                json!({"action": "connect_receiver", "receiver_id": "rx-1", "sender_id": "tx-1"}),
                json!({"action": "reboot_device", "device_id": "dev-1"}),
                json!({"action": "connect_receiver", "receiver_id": "rx-2", "sender_id": "tx-2"}),
            ],
            &["operator"],
        ))
        .await
        .unwrap();

    let report = engine
        .execute(created.id, &Actor::new("jo", "operator"), Map::new())
        .await
        .unwrap();

    assert_eq!(report.status, PlaybookExecutionStatus::Error);
    assert_eq!(report.steps.len(), 2);
    assert!(report.steps[0].success);
    assert!(!report.steps[1].success);
    assert_eq!(report.steps[1].action, "reboot_device");
    assert!(report.steps[1].message.contains("reboot_device"));

    // The third step never ran
    assert!(plane.connections.get(&active("rx-2")).await.unwrap().is_none());

    let execution = plane
        .store
        .get_execution(report.execution_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(execution.status, PlaybookExecutionStatus::Error);
    assert_eq!(execution.result, report.steps);
}

#[tokio::test]
async fn test_disconnect_step_publishes_change() {
    let plane = TestPlane::new();
    let engine = engine(&plane);
    let mut events = plane.connections.events().subscribe();
    let created = plane
        .store
        .create_playbook(playbook(
            vec![
                json!({"action": "connect_receiver", "receiver_id": "rx-1", "sender_id": "tx-1"}),
                json!({"action": "disconnect_receiver", "receiver_id": "rx-1"}),
            ],
            &["operator"],
        ))
        .await
        .unwrap();

    let report = engine
        .execute(created.id, &Actor::new("jo", "operator"), Map::new())
        .await
        .unwrap();
    assert_eq!(report.status, PlaybookExecutionStatus::Success);
    assert!(plane.connections.get(&active("rx-1")).await.unwrap().is_none());

    let history = plane.connections.history("rx-1").await.unwrap();
    assert_eq!(history.len(), 2);

    let first = events.recv().await.unwrap();
    let second = events.recv().await.unwrap();
    assert_eq!(first.event.name(), second.event.name());
    let ControlEvent::ConnectionChanged {
        action, sender_id, ..
    } = second.event;
    assert_eq!(action, ConnectionAction::Disconnect);
    assert_eq!(sender_id, None);
}

#[tokio::test]
async fn test_disabled_playbook_is_rejected() {
    let plane = TestPlane::new();
    let engine = engine(&plane);
    let created = plane
        .store
        .create_playbook(playbook(
            vec![json!({"action": "disconnect_receiver", "receiver_id": "rx-1"})],
            &[],
        ))
        .await
        .unwrap();
    plane.store.set_playbook_enabled(created.id, false).await.unwrap();

    let err = engine
        .execute(created.id, &Actor::new("ada", "admin"), Map::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ControlError::ValidationError(_)));
    assert_eq!(plane.store.execution_count(), 0);
}

#[tokio::test]
async fn test_scheduled_playbook_runner_records_outcomes() {
    let plane = TestPlane::new();
    let engine = engine(&plane);
    let runner = ScheduledPlaybookRunner::new(
        plane.store.clone(),
        engine,
        std::time::Duration::from_secs(10),
    );

    let created = plane
        .store
        .create_playbook(playbook(
            vec![json!({"action": "connect_receiver", "receiver_id": "{{rx}}", "sender_id": "tx-9"})],
            &["operator"],
        ))
        .await
        .unwrap();

    let allowed = plane
        .store
        .create_scheduled_playbook(NewScheduledPlaybook {
            playbook_id: created.id,
            parameters: params(&[("rx", "rx-5")]),
            scheduled_at: Utc::now() - Duration::seconds(1),
            created_by: "jo".to_string(),
            created_by_role: "operator".to_string(),
        })
        .await
        .unwrap();
    let forbidden = plane
        .store
        .create_scheduled_playbook(NewScheduledPlaybook {
            playbook_id: created.id,
            parameters: Map::new(),
            scheduled_at: Utc::now() - Duration::seconds(1),
            created_by: "vic".to_string(),
            created_by_role: "viewer".to_string(),
        })
        .await
        .unwrap();

    assert_eq!(runner.tick(Utc::now()).await.unwrap(), 2);

    let row = plane.store.get_scheduled_playbook(allowed.id).await.unwrap().unwrap();
    assert_eq!(row.status, ScheduledPlaybookStatus::Success);
    assert!(row.execution_id.is_some());
    assert!(plane.connections.get(&active("rx-5")).await.unwrap().is_some());

    let row = plane.store.get_scheduled_playbook(forbidden.id).await.unwrap().unwrap();
    assert_eq!(row.status, ScheduledPlaybookStatus::Failed);
    assert!(row.execution_id.is_none());
    assert!(row.result.unwrap()["error"].is_string());

    assert_eq!(plane.store.execution_count(), 1);
    assert_eq!(runner.tick(Utc::now()).await.unwrap(), 0);
}

#[tokio::test]
async fn test_cancelled_scheduled_playbook_is_skipped() {
    let plane = TestPlane::new();
    let runner = ScheduledPlaybookRunner::new(
        plane.store.clone(),
        engine(&plane),
        std::time::Duration::from_secs(10),
    );

    let created = plane
        .store
        .create_playbook(playbook(
            vec![json!({"action": "disconnect_receiver", "receiver_id": "rx-1"})],
            &[],
        ))
        .await
        .unwrap();
    let scheduled = plane
        .store
        .create_scheduled_playbook(NewScheduledPlaybook {
            playbook_id: created.id,
            parameters: Map::new(),
            scheduled_at: Utc::now() - Duration::seconds(1),
            created_by: "ada".to_string(),
            created_by_role: "admin".to_string(),
        })
        .await
        .unwrap();

    plane.store.cancel_scheduled_playbook(scheduled.id).await.unwrap();
    assert_eq!(runner.tick(Utc::now()).await.unwrap(), 0);
    assert_eq!(plane.store.execution_count(), 0);
}

#[tokio::test]
async fn test_schedule_checks_playbook_and_role() {
    let plane = TestPlane::new();
    let engine = engine(&plane);
    let created = plane
        .store
        .create_playbook(playbook(
            vec![json!({"action": "connect_receiver", "receiver_id": "{{rx}}", "sender_id": "tx-3"})],
            &["operator"],
        ))
        .await
        .unwrap();
    let at = Utc::now() + Duration::minutes(30);
    let horizon = at + Duration::days(1);

    let err = engine
        .schedule(uuid::Uuid::new_v4(), &Actor::new("jo", "operator"), Map::new(), at)
        .await
        .unwrap_err();
    assert!(matches!(err, ControlError::NotFound { entity: "playbook", .. }));

    let err = engine
        .schedule(created.id, &Actor::new("vic", "viewer"), Map::new(), at)
        .await
        .unwrap_err();
    assert!(matches!(err, ControlError::Unauthorized { ref role, .. } if role == "viewer"));
    assert!(plane
        .store
        .list_due_scheduled_playbooks(horizon)
        .await
        .unwrap()
        .is_empty());

    let row = engine
        .schedule(created.id, &Actor::new("jo", "operator"), params(&[("rx", "rx-4")]), at)
        .await
        .unwrap();
    assert_eq!(row.status, ScheduledPlaybookStatus::Pending);
    assert_eq!(row.created_by, "jo");
    assert_eq!(row.created_by_role, "operator");
    assert_eq!(row.scheduled_at, at);

    let runner = ScheduledPlaybookRunner::new(
        plane.store.clone(),
        engine,
        std::time::Duration::from_secs(10),
    );
    assert_eq!(runner.tick(horizon).await.unwrap(), 1);
    assert!(plane.connections.get(&active("rx-4")).await.unwrap().is_some());
}
