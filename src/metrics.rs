//! # Control Metrics
//!
//! OpenTelemetry instruments for the orchestration core. Instruments are
//! created from the globally installed meter provider; with none installed
//! they are no-ops, so recording is always safe.
//!
//! ## Labels
//!
//! - `outcome`: `success` / `failure` for receiver patches, `executed` /
//!   `failed` for activations, `success` / `error` for playbooks and jobs
//! - `mode`: `immediate` / `safe_switch`
//! - `job_id`: automation job identifier

use opentelemetry::metrics::{Counter, Histogram, Meter};
use std::sync::OnceLock;

static CONTROL_METER: OnceLock<Meter> = OnceLock::new();

fn meter() -> &'static Meter {
    CONTROL_METER.get_or_init(|| opentelemetry::global::meter("nmos-control"))
}

// Counters

/// Routing policy checks evaluated
pub fn policy_checks_total() -> Counter<u64> {
    meter()
        .u64_counter("nmos_control.policy.checks.total")
        .with_description("Total number of routing policy checks")
        .build()
}

/// Policy violations found across all checks
pub fn policy_violations_total() -> Counter<u64> {
    meter()
        .u64_counter("nmos_control.policy.violations.total")
        .with_description("Total number of routing policy violations")
        .build()
}

pub fn policy_overrides_total() -> Counter<u64> {
    meter()
        .u64_counter("nmos_control.policy.overrides.total")
        .with_description("Total number of overridden routing policy violations")
        .build()
}

/// IS-05 staged PATCH calls, labelled by `outcome`
pub fn receiver_patches_total() -> Counter<u64> {
    meter()
        .u64_counter("nmos_control.is05.patches.total")
        .with_description("Total number of IS-05 receiver patches")
        .build()
}

/// Logical activations, labelled by `mode` and `outcome`
pub fn activations_total() -> Counter<u64> {
    meter()
        .u64_counter("nmos_control.activations.total")
        .with_description("Total number of connection activations")
        .build()
}

pub fn playbook_executions_total() -> Counter<u64> {
    meter()
        .u64_counter("nmos_control.playbooks.executions.total")
        .with_description("Total number of playbook executions")
        .build()
}

pub fn job_runs_total() -> Counter<u64> {
    meter()
        .u64_counter("nmos_control.automation.runs.total")
        .with_description("Total number of automation job runs")
        .build()
}

// Histograms

pub fn activation_duration() -> Histogram<f64> {
    meter()
        .f64_histogram("nmos_control.activation.duration")
        .with_description("Connection activation duration in milliseconds")
        .with_unit("ms")
        .build()
}

pub fn playbook_duration() -> Histogram<f64> {
    meter()
        .f64_histogram("nmos_control.playbook.duration")
        .with_description("Playbook execution duration in milliseconds")
        .with_unit("ms")
        .build()
}

pub fn job_duration() -> Histogram<f64> {
    meter()
        .f64_histogram("nmos_control.automation.job.duration")
        .with_description("Automation job duration in milliseconds")
        .with_unit("ms")
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry::KeyValue;

    #[test]
    fn test_instruments_record_without_provider() {
        policy_checks_total().add(1, &[]);
        receiver_patches_total().add(1, &[KeyValue::new("outcome", "success")]);
        activation_duration().record(12.5, &[KeyValue::new("mode", "immediate")]);
    }
}
