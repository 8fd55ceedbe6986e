//! Prometheus metrics for the streak keeper.
//!
//! Exposes:
//! - `streak_keeper_runs_total` (counter by trigger and status)
//! - `streak_keeper_run_duration_seconds` (histogram by trigger)
//! - `streak_keeper_runs_inflight` (gauge)
//! - `streak_keeper_contacts_total` (counter by outcome)
//! - `streak_keeper_command_*` for one-shot CLI commands
//! - process metrics via `process` collector

use std::time::Duration;

use once_cell::sync::Lazy;
use prometheus::process_collector::ProcessCollector;
use prometheus::{
    default_registry, register_histogram_vec, register_int_counter_vec, register_int_gauge,
    register_int_gauge_vec, Encoder, HistogramVec, IntCounterVec, IntGauge, IntGaugeVec,
    TextEncoder,
};
use tracing::warn;

use crate::error::{Error, Result};
use crate::workflow::{FailureReason, RunOutcome};

static PROCESS_COLLECTOR: Lazy<()> = Lazy::new(|| {
    if let Err(err) = default_registry().register(Box::new(ProcessCollector::for_self())) {
        warn!("Failed to register process collector: {}", err);
    }
});

static RUNS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "streak_keeper_runs_total",
        "Streak runs by trigger and final status",
        &["trigger", "status"]
    )
    .expect("failed to register runs counter")
});

static RUN_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    // 1s up to ~68 minutes
    let buckets =
        prometheus::exponential_buckets(1.0, 2.0, 13).expect("failed to create histogram buckets");
    register_histogram_vec!(
        "streak_keeper_run_duration_seconds",
        "Streak run duration in seconds",
        &["trigger"],
        buckets
    )
    .expect("failed to register run duration histogram")
});

static RUNS_INFLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("streak_keeper_runs_inflight", "Number of runs in progress")
        .expect("failed to register inflight gauge")
});

static CONTACTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "streak_keeper_contacts_total",
        "Per-contact outcomes across all runs",
        &["outcome"]
    )
    .expect("failed to register contact counter")
});

static COMMAND_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    let buckets =
        prometheus::exponential_buckets(0.05, 2.0, 14).expect("failed to create histogram buckets");
    register_histogram_vec!(
        "streak_keeper_command_duration_seconds",
        "CLI command duration in seconds",
        &["command"],
        buckets
    )
    .expect("failed to register command duration histogram")
});

static COMMAND_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "streak_keeper_command_total",
        "Total command executions by status",
        &["command", "status"]
    )
    .expect("failed to register command counter")
});

static COMMAND_INFLIGHT: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "streak_keeper_command_inflight",
        "Number of in-flight commands",
        &["command"]
    )
    .expect("failed to register command inflight gauge")
});

/// Ensure collectors are registered.
fn init_collectors() {
    Lazy::force(&PROCESS_COLLECTOR);
    Lazy::force(&RUNS_TOTAL);
    Lazy::force(&RUN_DURATION);
    Lazy::force(&RUNS_INFLIGHT);
    Lazy::force(&CONTACTS_TOTAL);
    Lazy::force(&COMMAND_DURATION);
    Lazy::force(&COMMAND_TOTAL);
    Lazy::force(&COMMAND_INFLIGHT);
}

/// A run was accepted and is about to start.
pub fn record_run_start() {
    init_collectors();
    RUNS_INFLIGHT.inc();
}

/// A run request was refused because another run holds the lock.
pub fn record_run_rejected(trigger: &str) {
    init_collectors();
    RUNS_TOTAL.with_label_values(&[trigger, "rejected"]).inc();
}

/// Record a finished run with its per-contact outcomes.
pub fn record_run_finished(trigger: &str, duration: Duration, outcome: &RunOutcome) {
    init_collectors();
    RUNS_INFLIGHT.dec();
    RUN_DURATION
        .with_label_values(&[trigger])
        .observe(duration.as_secs_f64());

    let status = match outcome {
        RunOutcome::Aborted { .. } => "aborted",
        RunOutcome::Completed(result) if result.failed == 0 => "completed",
        RunOutcome::Completed(_) => "partial",
    };
    RUNS_TOTAL.with_label_values(&[trigger, status]).inc();

    if let RunOutcome::Completed(result) = outcome {
        let delivered = if result.dry_run { "located" } else { "sent" };
        CONTACTS_TOTAL
            .with_label_values(&[delivered])
            .inc_by(result.succeeded as u64);
        for failure in &result.failures {
            let label = match failure.reason {
                FailureReason::ContactNotFound => "not_found",
                FailureReason::AutomationError(_) => "automation_error",
            };
            CONTACTS_TOTAL.with_label_values(&[label]).inc();
        }
    }
}

/// Increment inflight gauge for a command.
pub fn record_command_start(command: &'static str) {
    init_collectors();
    COMMAND_INFLIGHT.with_label_values(&[command]).inc();
}

/// Record command completion with duration and status.
pub fn record_command_result(command: &'static str, duration: Duration, success: bool) {
    init_collectors();
    COMMAND_INFLIGHT.with_label_values(&[command]).dec();
    COMMAND_DURATION
        .with_label_values(&[command])
        .observe(duration.as_secs_f64());
    COMMAND_TOTAL
        .with_label_values(&[command, if success { "ok" } else { "error" }])
        .inc();
}

/// Encode the default registry in Prometheus text format.
///
/// Returns the content type together with the body.
pub fn render() -> Result<(String, Vec<u8>)> {
    init_collectors();
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| Error::SerializationError(format!("Failed to encode metrics: {}", e)))?;
    Ok((encoder.format_type().to_string(), buffer))
}
