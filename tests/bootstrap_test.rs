//! Orchestration core wiring, runner lifecycle and configuration-driven startup.

mod common;

use chrono::{Duration, Utc};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use common::{flow, ScriptedConnectionApi, BASE_URL};
use nmos_control::config::ControlConfig;
use nmos_control::models::{ActivationMode, NewScheduledActivation};
use nmos_control::orchestration::OrchestrationCore;
use nmos_control::registry::MemoryRegistry;
use nmos_control::state_machine::{Lifecycle, ScheduledActivationStatus};
use nmos_control::store::{MemoryStore, ScheduledActivationStore};

fn core(config: ControlConfig) -> (OrchestrationCore<MemoryStore>, Arc<ScriptedConnectionApi>) {
    let registry = Arc::new(MemoryRegistry::new());
    registry.put_flow(flow("flow-1", "239.1.1.1", 5004));
    let api = Arc::new(ScriptedConnectionApi::new());

    let core = OrchestrationCore::bootstrap(
        Arc::new(MemoryStore::new()),
        registry.clone(),
        registry,
        api.clone(),
        config,
    );
    (core, api)
}

#[tokio::test]
async fn test_start_spawns_enabled_runners_and_shutdown_stops_them() {
    let mut config = ControlConfig::default();
    config.runners.playbook_runner_enabled = false;
    let (mut core, _) = core(config);

    assert!(core.running_runners().is_empty());
    core.start();

    let running = core.running_runners();
    assert_eq!(running.len(), 2);
    assert!(running.contains(&"scheduled_activation_runner"));
    assert!(running.contains(&"automation_job_runner"));

    tokio::time::timeout(StdDuration::from_secs(5), core.shutdown())
        .await
        .expect("runners stop on shutdown");
}

#[tokio::test]
async fn test_due_activation_executes_in_background() {
    let mut config = ControlConfig::default();
    config.runners.activation_poll_interval_secs = 1;
    config.runners.automation_runner_enabled = false;
    config.runners.playbook_runner_enabled = false;
    let (mut core, api) = core(config);

    let row = core
        .store()
        .create_scheduled_activation(NewScheduledActivation {
            flow_id: "flow-1".to_string(),
            receiver_ids: vec!["rx-1".to_string()],
            is05_base_url: BASE_URL.to_string(),
            sender_id: None,
            scheduled_at: Utc::now() - Duration::seconds(1),
            mode: ActivationMode::Immediate,
            created_by: "scheduler".to_string(),
        })
        .await
        .unwrap();

    let mut events = core.events().subscribe();
    core.start();

    let store = core.store().clone();
    let status = tokio::time::timeout(StdDuration::from_secs(5), async {
        loop {
            let current = store.get_scheduled_activation(row.id).await.unwrap().unwrap();
            if current.status.is_terminal() {
                break current.status;
            }
            tokio::time::sleep(StdDuration::from_millis(20)).await;
        }
    })
    .await
    .expect("activation completes");

    assert_eq!(status, ScheduledActivationStatus::Executed);
    assert_eq!(api.patched_receivers(), vec!["rx-1"]);

    let published = events.recv().await.unwrap();
    assert_eq!(published.event.name(), "connection_changed");

    core.shutdown().await;
}
