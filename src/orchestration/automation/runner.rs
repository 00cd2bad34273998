//! # Automation Job Runner
//!
//! Every tick, runs each enabled job that is due and records the run on the
//! job exactly once.

use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use super::checks::{AutomationChecks, BuiltinCheck};
use crate::error::ControlResult;
use crate::metrics;
use crate::models::{AutomationJob, JobRunRecord};
use crate::schedule::should_run;
use crate::store::{AutomationJobStore, CheckerResultStore};

#[derive(Clone)]
pub struct AutomationJobRunner {
    jobs: Arc<dyn AutomationJobStore>,
    results: Arc<dyn CheckerResultStore>,
    checks: AutomationChecks,
    tick_interval: Duration,
}

impl std::fmt::Debug for AutomationJobRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutomationJobRunner")
            .field("tick_interval", &self.tick_interval)
            .finish_non_exhaustive()
    }
}

impl AutomationJobRunner {
    pub fn new(
        jobs: Arc<dyn AutomationJobStore>,
        results: Arc<dyn CheckerResultStore>,
        checks: AutomationChecks,
        tick_interval: Duration,
    ) -> Self {
        Self {
            jobs,
            results,
            checks,
            tick_interval,
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut timer = interval(self.tick_interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_secs = self.tick_interval.as_secs(), "Starting automation job runner");

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    if let Err(e) = self.tick(Utc::now()).await {
                        error!(error = %e, "Automation tick failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Automation job runner stopped");
    }

    /// Run every due job; returns the ids that ran
    pub async fn tick(&self, now: DateTime<Utc>) -> ControlResult<Vec<String>> {
        let mut ran = Vec::new();
        for job in self.jobs.list_jobs().await? {
            if !job.enabled || !should_run(&job, now) {
                continue;
            }
            let Some(check) = BuiltinCheck::from_job_id(&job.job_id) else {
                debug!(job_id = %job.job_id, "No built-in check for job, skipping");
                continue;
            };

            match self.run_job(&job, check, now).await {
                Ok(()) => ran.push(job.job_id.clone()),
                Err(e) => warn!(job_id = %job.job_id, error = %e, "Failed to record job run"),
            }
        }
        Ok(ran)
    }

    #[instrument(skip(self, job, now), fields(job_id = %job.job_id, job_type = %job.job_type))]
    async fn run_job(
        &self,
        job: &AutomationJob,
        check: BuiltinCheck,
        now: DateTime<Utc>,
    ) -> ControlResult<()> {
        let start = Instant::now();

        let outcome = match self.checks.run(check).await {
            Ok(result) => self
                .results
                .save_checker_result(check.kind(), result.clone(), now)
                .await
                .map(|_| result),
            Err(e) => Err(e),
        };

        let run = match outcome {
            Ok(result) => JobRunRecord {
                ran_at: now,
                status: "success".to_string(),
                result,
            },
            Err(e) => {
                warn!(error = %e, "Automation check failed");
                JobRunRecord {
                    ran_at: now,
                    status: "error".to_string(),
                    result: json!({ "error": e.to_string() }),
                }
            }
        };

        let labels = [
            KeyValue::new("job_id", job.job_id.clone()),
            KeyValue::new("status", run.status.clone()),
        ];
        metrics::job_runs_total().add(1, &labels);
        metrics::job_duration().record(start.elapsed().as_millis() as f64, &labels);

        info!(status = %run.status, "Automation job ran");
        self.jobs.record_job_run(&job.job_id, run).await
    }
}
