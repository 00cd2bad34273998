//! # Orchestration Core Bootstrap
//!
//! Builds every component over one backing store and owns the three background
//! runners. Shutdown flips a shared `watch` flag and waits for the loops to
//! finish their current item.

use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::activation::ConnectionActivationOrchestrator;
use super::activation_runner::ScheduledActivationRunner;
use super::automation::{AutomationChecks, AutomationJobRunner};
use super::connection_state::ConnectionStateStore;
use super::playbook::{PlaybookEngine, ScheduledPlaybookRunner};
use crate::config::ControlConfig;
use crate::events::EventPublisher;
use crate::is05::ConnectionApi;
use crate::policy::RoutingPolicyEngine;
use crate::registry::{FlowLookup, NmosRegistry};
use crate::store::ControlStore;

pub struct OrchestrationCore<S: ControlStore + 'static> {
    store: Arc<S>,
    config: ControlConfig,
    events: EventPublisher,
    connections: ConnectionStateStore,
    policy: RoutingPolicyEngine,
    orchestrator: Arc<ConnectionActivationOrchestrator>,
    playbooks: Arc<PlaybookEngine>,
    checks: AutomationChecks,
    shutdown: watch::Sender<bool>,
    handles: Vec<(&'static str, JoinHandle<()>)>,
}

impl<S: ControlStore + 'static> std::fmt::Debug for OrchestrationCore<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrchestrationCore")
            .field("runners", &self.running_runners())
            .finish_non_exhaustive()
    }
}

impl<S: ControlStore + 'static> OrchestrationCore<S> {
    /// Wire components; runners are not started until [`start`](Self::start)
    pub fn bootstrap(
        store: Arc<S>,
        flows: Arc<dyn FlowLookup>,
        registry: Arc<dyn NmosRegistry>,
        api: Arc<dyn ConnectionApi>,
        config: ControlConfig,
    ) -> Self {
        let events = EventPublisher::new(config.events.channel_capacity);
        let connections = ConnectionStateStore::new(store.clone(), events.clone());
        let policy = RoutingPolicyEngine::new(store.clone());
        let orchestrator = Arc::new(ConnectionActivationOrchestrator::new(
            flows.clone(),
            registry.clone(),
            api,
            store.clone(),
            connections.clone(),
            policy.clone(),
        ));
        let playbooks = Arc::new(PlaybookEngine::new(
            store.clone(),
            store.clone(),
            connections.clone(),
        ));
        let checks = AutomationChecks::new(flows, registry);
        let (shutdown, _) = watch::channel(false);

        Self {
            store,
            config,
            events,
            connections,
            policy,
            orchestrator,
            playbooks,
            checks,
            shutdown,
            handles: Vec::new(),
        }
    }

    /// Spawn the enabled runners
    pub fn start(&mut self) {
        if !self.handles.is_empty() {
            warn!("Orchestration runners already started");
            return;
        }
        let runners = &self.config.runners;

        if runners.activation_runner_enabled {
            let runner = ScheduledActivationRunner::new(
                self.store.clone(),
                self.orchestrator.clone(),
                runners.activation_poll_interval(),
            );
            let rx = self.shutdown.subscribe();
            self.handles
                .push(("scheduled_activation_runner", tokio::spawn(runner.run(rx))));
        }

        if runners.playbook_runner_enabled {
            let runner = ScheduledPlaybookRunner::new(
                self.store.clone(),
                self.playbooks.clone(),
                runners.playbook_poll_interval(),
            );
            let rx = self.shutdown.subscribe();
            self.handles
                .push(("scheduled_playbook_runner", tokio::spawn(runner.run(rx))));
        }

        if runners.automation_runner_enabled {
            let runner = AutomationJobRunner::new(
                self.store.clone(),
                self.store.clone(),
                self.checks.clone(),
                runners.automation_tick_interval(),
            );
            let rx = self.shutdown.subscribe();
            self.handles
                .push(("automation_job_runner", tokio::spawn(runner.run(rx))));
        }

        info!(runners = ?self.running_runners(), "Orchestration core started");
    }

    /// Signal every runner and wait for it to stop
    pub async fn shutdown(mut self) {
        // send_replace succeeds even with no live receivers
        self.shutdown.send_replace(true);
        for (name, handle) in self.handles.drain(..) {
            if let Err(e) = handle.await {
                warn!(runner = name, error = %e, "Runner task ended abnormally");
            }
        }
        info!("Orchestration core stopped");
    }

    pub fn running_runners(&self) -> Vec<&'static str> {
        self.handles
            .iter()
            .filter(|(_, handle)| !handle.is_finished())
            .map(|(name, _)| *name)
            .collect()
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn events(&self) -> &EventPublisher {
        &self.events
    }

    pub fn connections(&self) -> &ConnectionStateStore {
        &self.connections
    }

    pub fn policy(&self) -> &RoutingPolicyEngine {
        &self.policy
    }

    pub fn orchestrator(&self) -> &Arc<ConnectionActivationOrchestrator> {
        &self.orchestrator
    }

    pub fn playbooks(&self) -> &Arc<PlaybookEngine> {
        &self.playbooks
    }
}
