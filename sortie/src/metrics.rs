//! Prometheus metrics instrumentation for sortie.
//!
//! All metrics are conditionally compiled behind the `metrics` feature flag and
//! are updated from the `record_*` helpers in [`crate::telemetry`].
//!
//! # Metrics
//!
//! ## Counters
//! - `sortie_steps_launched_total` - Steps registered by `run`
//! - `sortie_submissions_failed_total` - Batch submissions that exited non-zero
//! - `sortie_steps_cancelled_total` - Steps removed by `stop`
//! - `sortie_tasks_exited_total` - Supervised processes seen exiting
//!
//! ## Histograms
//! - `sortie_id_resolution_attempts` - Listing queries needed to resolve a job id
#![cfg(feature = "metrics")]

use prometheus::{CounterVec, HistogramVec, Opts, Registry, linear_buckets};
use std::sync::LazyLock;

/// Global Prometheus registry for sortie metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

/// Labels:
/// - `backend`: workload manager name
/// - `kind`: `batch` or `direct-run`
pub static STEPS_LAUNCHED_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        "sortie_steps_launched_total",
        "Total number of steps launched",
    );
    CounterVec::new(opts, &["backend", "kind"])
        .expect("sortie_steps_launched_total metric creation failed")
});

/// Labels:
/// - `backend`: workload manager name
pub static SUBMISSIONS_FAILED_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        "sortie_submissions_failed_total",
        "Total number of failed batch submissions",
    );
    CounterVec::new(opts, &["backend"])
        .expect("sortie_submissions_failed_total metric creation failed")
});

/// Labels:
/// - `backend`: workload manager name
pub static STEPS_CANCELLED_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        "sortie_steps_cancelled_total",
        "Total number of steps stopped",
    );
    CounterVec::new(opts, &["backend"])
        .expect("sortie_steps_cancelled_total metric creation failed")
});

/// Labels:
/// - `status`: `Completed` or `Failed`
pub static TASKS_EXITED_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        "sortie_tasks_exited_total",
        "Total number of supervised processes that exited",
    );
    CounterVec::new(opts, &["status"]).expect("sortie_tasks_exited_total metric creation failed")
});

/// Labels:
/// - `outcome`: `resolved` or `exhausted`
pub static ID_RESOLUTION_ATTEMPTS: LazyLock<HistogramVec> = LazyLock::new(|| {
    let buckets = linear_buckets(1.0, 1.0, 10).expect("bucket creation failed");
    let opts = prometheus::HistogramOpts::new(
        "sortie_id_resolution_attempts",
        "Listing queries needed to resolve a job id",
    )
    .buckets(buckets);
    HistogramVec::new(opts, &["outcome"])
        .expect("sortie_id_resolution_attempts metric creation failed")
});

/// Register all collectors with [`REGISTRY`]. Idempotent.
pub fn init_metrics() -> anyhow::Result<()> {
    let registry = &*REGISTRY;

    for metric in [
        Box::new(STEPS_LAUNCHED_TOTAL.clone()) as Box<dyn prometheus::core::Collector>,
        Box::new(SUBMISSIONS_FAILED_TOTAL.clone()),
        Box::new(STEPS_CANCELLED_TOTAL.clone()),
        Box::new(TASKS_EXITED_TOTAL.clone()),
        Box::new(ID_RESOLUTION_ATTEMPTS.clone()),
    ] {
        if let Err(e) = registry.register(metric) {
            let msg = e.to_string();
            if !msg.contains("Duplicate metrics collector registration attempted") {
                return Err(e.into());
            }
        }
    }

    Ok(())
}

pub fn record_step_launched(backend: &str, kind: &str) {
    STEPS_LAUNCHED_TOTAL.with_label_values(&[backend, kind]).inc();
}

pub fn record_submission_failed(backend: &str) {
    SUBMISSIONS_FAILED_TOTAL.with_label_values(&[backend]).inc();
}

pub fn record_step_cancelled(backend: &str) {
    STEPS_CANCELLED_TOTAL.with_label_values(&[backend]).inc();
}

pub fn record_task_exited(status: &str) {
    TASKS_EXITED_TOTAL.with_label_values(&[status]).inc();
}

pub fn observe_id_resolution(attempts: u32, resolved: bool) {
    let outcome = if resolved { "resolved" } else { "exhausted" };
    ID_RESOLUTION_ATTEMPTS
        .with_label_values(&[outcome])
        .observe(f64::from(attempts));
}

/// Gather all registered metrics in Prometheus text format.
pub fn gather_metrics() -> anyhow::Result<String> {
    let encoder = prometheus::TextEncoder::new();
    let metric_families = REGISTRY.gather();
    encoder
        .encode_to_string(&metric_families)
        .map_err(Into::into)
}
