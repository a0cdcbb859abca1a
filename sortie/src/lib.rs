//! Sortie - launch, poll and cancel jobs on HPC workload managers.
//!
//! A uniform control plane over batch schedulers (PBS Professional, Grid
//! Engine) and plain local processes. Callers create a step from launch
//! settings, run it, poll it by name and stop it; the launcher decides
//! whether the scheduler or the local task supervisor owns the job.
//!
//! # Core Concepts
//!
//! - **Step**: An immutable launch specification built by
//!   [`Launcher::create_step`]. [`StepKind::Batch`] steps are submitted to a
//!   scheduler; [`StepKind::DirectRun`] steps are spawned locally.
//!
//! - **Backend**: A [`WorkloadManager`] decides which [`LaunchSettings`] it
//!   accepts and exposes its scheduler CLI through [`SchedulerCli`].
//!
//! - **Supervisor**: The [`TaskSupervisor`] owns locally spawned processes and
//!   records their exit status from a background monitoring loop.
//!
//! - **Mapping**: The [`StepMapping`] resolves step names to scheduler job ids
//!   (managed steps) or supervisor task ids (unmanaged steps).
//!
//! - **Status**: Every poll yields a [`StepInfo`] carrying a canonical
//!   [`Status`].
//!
//! # Feature Flags
//!
//! - `metrics` - Prometheus metrics support
//!
//! # Example
//!
//! ```ignore
//! use sortie::*;
//!
//! let launcher = PbsLauncher::new(Pbs::new());
//! let settings = QsubBatchSettings::default().with_nodes(2).with_walltime("01:00:00");
//! let batch = launcher
//!     .create_step("ensemble", "/scratch/run", LaunchSettings::QsubBatch(settings))?
//!     .add_to_batch(&launcher.create_step("member", "/scratch/run", member_settings)?)?;
//! let id = launcher.run(&batch).await?;
//! let updates = launcher.get_step_update(&["ensemble"]).await;
//! ```

/// Workload manager backends.
///
/// [`Pbs`], [`Sge`] and [`Local`] implement [`WorkloadManager`]; the two
/// scheduler backends also implement [`SchedulerCli`].
pub mod backend;

/// Supervisor, retry and launcher configuration.
pub mod config;

/// Error types.
///
/// [`LaunchError`] covers every failure; [`ErrorCategory`] groups them into
/// configuration, launch and unsupported-operation failures.
pub mod error;

/// Step lifecycle events.
///
/// - [`EventBus`] for in-process broadcasting
/// - [`StepEvent`] and [`StepEventPayload`] for event data
pub mod events;

/// The launcher and its collaborators.
pub mod launcher;

/// Name to identifier registry.
pub mod mapping;

/// Prometheus collectors, compiled with the `metrics` feature.
pub mod metrics;

/// Local process supervision.
///
/// - [`TaskSupervisor`] - spawns and monitors local processes
/// - [`ShutdownToken`] - stops the monitoring loop
/// - [`Clock`] - time source for retry delays
pub mod runtime;

/// Launch settings for every supported launcher.
pub mod settings;

/// Canonical status model.
pub mod status;

/// Launch specifications and command construction.
pub mod step;

/// Tracing spans, log helpers and subscriber set-up.
pub mod telemetry;

pub use backend::{Local, Pbs, PbsCommands, SchedulerCli, Sge, SgeCommands, WorkloadManager};
pub use config::*;
pub use error::*;
pub use events::*;
pub use launcher::{
    CommandOutput, CommandRunner, Launcher, LauncherBuilder, LocalLauncher, PbsLauncher,
    ProcessRunner, SgeLauncher, ShellCommand, StepIdentifier,
};
pub use mapping::*;
pub use runtime::{
    Clock, OutputDest, ShutdownToken, TaskId, TaskSnapshot, TaskSupervisor, TokioClock,
    WaitOutput,
};
pub use settings::*;
pub use status::*;
pub use step::*;
pub use telemetry::TelemetryGuard;
