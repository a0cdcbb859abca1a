//! Tracing and telemetry instrumentation for sortie.
//!
//! Span constructors for launcher operations and `record_*` helpers that log
//! lifecycle facts and, with the `metrics` feature, update the Prometheus
//! collectors in [`crate::metrics`].
//!
//! Logging is never configured behind the caller's back. A process that wants
//! sortie's logs calls [`init`] once at start-up and keeps the returned
//! [`TelemetryGuard`] alive; dropping the guard removes the subscriber again.
//!
//! # Example
//!
//! ```ignore
//! let _guard = sortie::telemetry::init("sortie=debug")?;
//! let launcher = PbsLauncher::new(Pbs::new());
//! ```

use tracing::{Span, info_span};
use tracing_subscriber::EnvFilter;

/// Scoped logging context returned by [`init`].
///
/// The subscriber stays installed as the thread default for as long as the
/// guard lives.
#[must_use = "dropping the guard uninstalls the subscriber"]
pub struct TelemetryGuard {
    _default: tracing::subscriber::DefaultGuard,
}

impl std::fmt::Debug for TelemetryGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryGuard").finish_non_exhaustive()
    }
}

/// Install a formatting subscriber filtered by `filter` (`RUST_LOG` syntax).
///
/// `RUST_LOG`, when set, takes precedence over `filter`.
pub fn init(filter: &str) -> anyhow::Result<TelemetryGuard> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(from_env) => from_env,
        Err(_) => EnvFilter::try_new(filter)?,
    };
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .finish();
    let guard = tracing::subscriber::set_default(subscriber);
    Ok(TelemetryGuard { _default: guard })
}

/// Root span owned by a launcher; every launcher operation runs inside it.
#[must_use]
pub fn launcher_span(backend: impl AsRef<str>) -> Span {
    info_span!("sortie.launcher", backend = %backend.as_ref())
}

/// Span for `Launcher::run`.
#[must_use]
pub fn step_run_span(step_name: impl AsRef<str>, kind: impl AsRef<str>) -> Span {
    info_span!(
        "sortie.run",
        step = %step_name.as_ref(),
        kind = %kind.as_ref(),
    )
}

/// Span for one batched status poll.
#[must_use]
pub fn step_poll_span(requested: usize) -> Span {
    info_span!("sortie.poll", requested = requested)
}

/// Span for `Launcher::stop`.
#[must_use]
pub fn step_stop_span(step_name: impl AsRef<str>) -> Span {
    info_span!("sortie.stop", step = %step_name.as_ref())
}

/// Span for the identifier-resolution retry loop.
#[must_use]
pub fn id_resolution_span(step_name: impl AsRef<str>, attempts: u32) -> Span {
    info_span!(
        "sortie.resolve_id",
        step = %step_name.as_ref(),
        attempts = attempts,
    )
}

/// Record a step registered by `run`.
pub fn record_step_launched(
    backend: impl AsRef<str>,
    step_name: impl AsRef<str>,
    kind: impl AsRef<str>,
    identifier: impl AsRef<str>,
) {
    tracing::info!(
        backend = %backend.as_ref(),
        step = %step_name.as_ref(),
        kind = %kind.as_ref(),
        identifier = %identifier.as_ref(),
        "step launched"
    );

    #[cfg(feature = "metrics")]
    crate::metrics::record_step_launched(backend.as_ref(), kind.as_ref());
}

/// Record a batch submission that exited non-zero.
pub fn record_submission_failed(
    backend: impl AsRef<str>,
    step_name: impl AsRef<str>,
    code: Option<i32>,
) {
    tracing::error!(
        backend = %backend.as_ref(),
        step = %step_name.as_ref(),
        code = ?code,
        "batch submission failed"
    );

    #[cfg(feature = "metrics")]
    crate::metrics::record_submission_failed(backend.as_ref());
}

/// Record a cancel command that failed. Cancellation is best-effort, so this
/// only warns.
pub fn record_cancel_failed(
    backend: impl AsRef<str>,
    step_name: impl AsRef<str>,
    detail: impl AsRef<str>,
) {
    tracing::warn!(
        backend = %backend.as_ref(),
        step = %step_name.as_ref(),
        detail = %detail.as_ref(),
        "unable to cancel job step"
    );
}

/// Record a completed `stop`.
pub fn record_step_cancelled(backend: impl AsRef<str>, step_name: impl AsRef<str>, managed: bool) {
    tracing::info!(
        backend = %backend.as_ref(),
        step = %step_name.as_ref(),
        managed = managed,
        "step cancelled"
    );

    #[cfg(feature = "metrics")]
    crate::metrics::record_step_cancelled(backend.as_ref());
}

/// Record a supervised process exit seen by the monitoring loop.
pub fn record_task_exited(
    task_id: impl AsRef<str>,
    status: impl AsRef<str>,
    returncode: Option<i32>,
) {
    tracing::debug!(
        task_id = %task_id.as_ref(),
        status = %status.as_ref(),
        returncode = ?returncode,
        "task exited"
    );

    #[cfg(feature = "metrics")]
    crate::metrics::record_task_exited(status.as_ref());
}

/// Record the outcome of an identifier-resolution loop.
pub fn observe_id_resolution(step_name: impl AsRef<str>, attempts: u32, resolved: bool) {
    if resolved {
        tracing::debug!(
            step = %step_name.as_ref(),
            attempts = attempts,
            "resolved step id from scheduler listing"
        );
    } else {
        tracing::error!(
            step = %step_name.as_ref(),
            attempts = attempts,
            "could not resolve step id from scheduler listing"
        );
    }

    #[cfg(feature = "metrics")]
    crate::metrics::observe_id_resolution(attempts, resolved);
}
