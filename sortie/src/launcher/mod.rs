//! The public control plane: create, run, poll and stop steps.

use std::fmt::{self, Display};
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{Instrument, Span};

use crate::backend::{Local, Pbs, SchedulerCli, Sge, WorkloadManager};
use crate::config::LauncherConfig;
use crate::error::{LaunchError, Result};
use crate::events::{EventBus, StepEventPayload};
use crate::mapping::{StepMapEntry, StepMapping, TrackingId};
use crate::runtime::{Clock, OutputDest, TaskId, TaskSupervisor};
use crate::settings::LaunchSettings;
use crate::status::{Status, StepInfo};
use crate::step::{Step, StepKind};
use crate::telemetry;

pub mod builder;
pub mod command;

pub use builder::LauncherBuilder;
pub use command::{CommandOutput, CommandRunner, ProcessRunner, ShellCommand};

/// What [`Launcher::run`] hands back for a launched step.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum StepIdentifier {
    /// Job id assigned by the scheduler.
    Scheduler(String),
    /// Supervisor task running the step locally.
    Task(TaskId),
}

impl StepIdentifier {
    pub fn step_id(&self) -> Option<&str> {
        match self {
            StepIdentifier::Scheduler(id) => Some(id),
            StepIdentifier::Task(_) => None,
        }
    }

    pub fn task_id(&self) -> Option<TaskId> {
        match self {
            StepIdentifier::Scheduler(_) => None,
            StepIdentifier::Task(id) => Some(*id),
        }
    }
}

impl Display for StepIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepIdentifier::Scheduler(id) => f.write_str(id),
            StepIdentifier::Task(id) => write!(f, "{id}"),
        }
    }
}

pub type PbsLauncher = Launcher<Pbs>;
pub type SgeLauncher = Launcher<Sge>;
pub type LocalLauncher = Launcher<Local>;

/// Launches steps on one workload manager and tracks them by name.
///
/// Managed steps are polled and cancelled through the backend's scheduler
/// CLI; unmanaged steps run under this launcher's own [`TaskSupervisor`].
/// The supervisor's monitoring loop starts on the first `run` and stops on
/// [`Launcher::shutdown`] or drop.
pub struct Launcher<W: WorkloadManager> {
    manager: W,
    config: LauncherConfig,
    supervisor: TaskSupervisor,
    mapping: StepMapping,
    runner: Arc<dyn CommandRunner>,
    clock: Arc<dyn Clock>,
    events: Option<Arc<EventBus>>,
    span: Span,
}

impl<W: WorkloadManager> fmt::Debug for Launcher<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Launcher")
            .field("backend", &self.manager.name())
            .field("config", &self.config)
            .field("supervisor", &self.supervisor)
            .field("steps", &self.mapping.len())
            .field("events", &self.events.is_some())
            .finish()
    }
}

impl<W: WorkloadManager> Launcher<W> {
    /// Launcher with default configuration and real process execution.
    pub fn new(manager: W) -> Self {
        LauncherBuilder::new(manager).build()
    }

    pub fn builder(manager: W) -> LauncherBuilder<W> {
        LauncherBuilder::new(manager)
    }

    pub(crate) fn from_parts(
        manager: W,
        config: LauncherConfig,
        supervisor: TaskSupervisor,
        runner: Arc<dyn CommandRunner>,
        clock: Arc<dyn Clock>,
        events: Option<Arc<EventBus>>,
    ) -> Self {
        let span = telemetry::launcher_span(manager.name());
        Self {
            manager,
            config,
            supervisor,
            mapping: StepMapping::new(),
            runner,
            clock,
            events,
            span,
        }
    }

    pub fn manager(&self) -> &W {
        &self.manager
    }

    pub fn config(&self) -> &LauncherConfig {
        &self.config
    }

    pub fn supervisor(&self) -> &TaskSupervisor {
        &self.supervisor
    }

    pub fn mapping(&self) -> &StepMapping {
        &self.mapping
    }

    /// Build a step for `settings`; fails fast on settings this backend
    /// cannot launch.
    pub fn create_step(
        &self,
        name: &str,
        cwd: impl AsRef<Path>,
        settings: LaunchSettings,
    ) -> Result<Step> {
        let _entered = self.span.enter();
        let kind = settings.kind();
        let step = self.manager.create_step(name, cwd.as_ref(), settings)?;
        tracing::debug!(step = %name, settings = %kind, "created step");
        Ok(step)
    }

    /// Launch `step` and register it under its name.
    ///
    /// Batch steps return once the scheduler has accepted the job and its id
    /// is known; direct-run steps return as soon as the process is spawned.
    pub async fn run(&self, step: &Step) -> Result<StepIdentifier> {
        let span = self
            .span
            .in_scope(|| telemetry::step_run_span(step.name(), step.kind().to_string()));
        self.run_step(step).instrument(span).await
    }

    async fn run_step(&self, step: &Step) -> Result<StepIdentifier> {
        // Held until the step is registered, so a concurrent run of the same
        // name fails here instead of submitting a second job.
        let reservation = self.mapping.reserve(step.name())?;
        self.supervisor.start();

        let command = step.launch_command()?;
        let identifier = match step.kind() {
            StepKind::Batch => {
                let scheduler = self.manager.scheduler().ok_or(LaunchError::UnsupportedSettings {
                    backend: self.manager.name(),
                    kind: step.spec().settings_kind(),
                })?;
                let step_id = self.submit(scheduler, step, &command).await?;
                StepIdentifier::Scheduler(step_id)
            }
            StepKind::DirectRun => {
                let (out, err) = step.output_files();
                let task_id = self.supervisor.start_task(
                    &command,
                    step.cwd(),
                    OutputDest::File(out),
                    OutputDest::File(err),
                )?;
                StepIdentifier::Task(task_id)
            }
        };

        reservation.commit(
            identifier.step_id().map(str::to_string),
            identifier.task_id(),
            step.managed(),
        )?;

        telemetry::record_step_launched(
            self.manager.name(),
            step.name(),
            step.kind().to_string(),
            identifier.to_string(),
        );
        if let Some(events) = &self.events {
            events.emit(StepEventPayload::Launched {
                name: step.name().to_string(),
                backend: self.manager.name().to_string(),
                identifier: identifier.clone(),
            });
        }
        Ok(identifier)
    }

    async fn submit(
        &self,
        scheduler: &dyn SchedulerCli,
        step: &Step,
        command: &[String],
    ) -> Result<String> {
        let output = self.supervisor.start_and_wait(command, step.cwd()).await?;
        if !output.success() {
            telemetry::record_submission_failed(self.manager.name(), step.name(), output.returncode);
            return Err(LaunchError::SubmissionFailed {
                command: command.join(" "),
                code: output.returncode,
                stdout: output.stdout,
                stderr: output.stderr,
            });
        }

        match scheduler.parse_submit_output(&output.stdout) {
            Some(step_id) => {
                tracing::debug!(step = %step.name(), step_id = %step_id, "gleaned batch job id");
                Ok(step_id)
            }
            None => self.resolve_step_id(scheduler, step.name()).await,
        }
    }

    /// Search the scheduler's listing for `name`, a fixed number of times
    /// with a fixed delay before each query.
    async fn resolve_step_id(&self, scheduler: &dyn SchedulerCli, name: &str) -> Result<String> {
        let retry = &self.config.id_resolution;
        let span = self
            .span
            .in_scope(|| telemetry::id_resolution_span(name, retry.attempts));

        async {
            let listing = scheduler.listing_command();
            for attempt in 1..=retry.attempts {
                self.clock.sleep(retry.interval()).await;
                match self.runner.run(&listing).await {
                    Ok(output) => {
                        if let Some(step_id) = scheduler.find_step_id(&output, name) {
                            telemetry::observe_id_resolution(name, attempt, true);
                            return Ok(step_id);
                        }
                        tracing::debug!(attempt = attempt, "step not in listing yet");
                    }
                    Err(err) => {
                        tracing::warn!(attempt = attempt, error = %err, "listing query failed");
                    }
                }
            }
            telemetry::observe_id_resolution(name, retry.attempts, false);
            Err(LaunchError::IdUnresolved {
                step: name.to_string(),
                attempts: retry.attempts,
            })
        }
        .instrument(span)
        .await
    }

    /// Current status of each named step, managed steps first.
    ///
    /// Names that are not registered are left out. A step whose status cannot
    /// be read is reported as [`Status::Unknown`] without affecting the others.
    pub async fn get_step_update<S: AsRef<str>>(&self, names: &[S]) -> Vec<(String, StepInfo)> {
        let span = self
            .span
            .in_scope(|| telemetry::step_poll_span(names.len()));
        self.poll(names).instrument(span).await
    }

    async fn poll<S: AsRef<str>>(&self, names: &[S]) -> Vec<(String, StepInfo)> {
        let mut updates = Vec::with_capacity(names.len());

        let (managed_names, managed_ids) = self.mapping.get_ids(names, true);
        if !managed_ids.is_empty() {
            let step_ids: Vec<String> = managed_ids.iter().map(ToString::to_string).collect();
            let infos = self.managed_update(&step_ids).await;
            for (name, info) in managed_names.into_iter().zip(infos) {
                let info = self.mapping.observe(&name, info);
                updates.push((name, info));
            }
        }

        let (unmanaged_names, task_ids) = self.mapping.get_ids(names, false);
        for (name, id) in unmanaged_names.into_iter().zip(task_ids) {
            let info = match id {
                TrackingId::Task(task_id) => self.unmanaged_update(&task_id),
                TrackingId::Step(_) => StepInfo::unknown(),
            };
            let info = self.mapping.observe(&name, info);
            updates.push((name, info));
        }

        updates
    }

    /// One query for every managed id.
    async fn managed_update(&self, step_ids: &[String]) -> Vec<StepInfo> {
        let unknown = || -> Vec<StepInfo> { step_ids.iter().map(|_| StepInfo::unknown()).collect() };
        let Some(scheduler) = self.manager.scheduler() else {
            return unknown();
        };

        let command = scheduler.query_command(step_ids);
        match self.runner.run(&command).await {
            Ok(output) => {
                let mut infos = scheduler.parse_query(&output, step_ids);
                infos.resize_with(step_ids.len(), StepInfo::unknown);
                infos
            }
            Err(err) => {
                tracing::warn!(command = %command, error = %err, "status query failed");
                unknown()
            }
        }
    }

    fn unmanaged_update(&self, task_id: &TaskId) -> StepInfo {
        match self.supervisor.get_task_update(task_id) {
            Some(snapshot) => StepInfo::new(snapshot.status, snapshot.returncode)
                .with_output(snapshot.stdout, snapshot.stderr),
            None => StepInfo::unknown(),
        }
    }

    /// Cancel a step and stop tracking it.
    ///
    /// The scheduler's cancel command is best-effort: a failure is logged and
    /// the step is still reported as [`Status::Cancelled`]. The reported
    /// status is `Cancelled` even when the final poll saw the step complete
    /// just before the cancel arrived; the return code from that poll is kept.
    pub async fn stop(&self, name: &str) -> Result<StepInfo> {
        let span = self.span.in_scope(|| telemetry::step_stop_span(name));
        self.stop_step(name).instrument(span).await
    }

    async fn stop_step(&self, name: &str) -> Result<StepInfo> {
        let entry = self
            .mapping
            .get(name)
            .ok_or_else(|| LaunchError::UnknownStep(name.to_string()))?;

        if entry.managed {
            self.cancel(name, &entry).await;
        }
        let removed = entry
            .task_id
            .and_then(|task_id| self.supervisor.remove_task(&task_id));

        let polled = if entry.managed {
            self.poll(&[name])
                .await
                .pop()
                .map_or_else(StepInfo::unknown, |(_, info)| info)
        } else {
            let info = removed.map_or_else(StepInfo::unknown, |snapshot| {
                StepInfo::new(snapshot.status, snapshot.returncode)
                    .with_output(snapshot.stdout, snapshot.stderr)
            });
            self.mapping.observe(name, info)
        };

        let mut info = polled;
        info.status = Status::Cancelled;
        self.mapping.remove(name);

        telemetry::record_step_cancelled(self.manager.name(), name, entry.managed);
        if let Some(events) = &self.events {
            events.emit(StepEventPayload::Cancelled {
                name: name.to_string(),
                managed: entry.managed,
            });
        }
        Ok(info)
    }

    async fn cancel(&self, name: &str, entry: &StepMapEntry) {
        let (Some(scheduler), Some(step_id)) = (self.manager.scheduler(), entry.step_id.as_deref())
        else {
            return;
        };
        let command = scheduler.cancel_command(step_id);
        match self.runner.run(&command).await {
            Ok(output) if output.success() => {}
            Ok(output) => {
                telemetry::record_cancel_failed(self.manager.name(), name, output.stderr.trim())
            }
            Err(err) => telemetry::record_cancel_failed(self.manager.name(), name, err.to_string()),
        }
    }

    /// Compute nodes assigned to a running step, where the backend can tell.
    pub fn get_step_nodes(&self, name: &str) -> Result<Vec<String>> {
        let _entered = self.span.enter();
        let entry = self
            .mapping
            .get(name)
            .ok_or_else(|| LaunchError::UnknownStep(name.to_string()))?;
        self.manager.step_nodes(&entry)
    }

    /// Drop a step from the registry without cancelling it, typically after
    /// its terminal status has been consumed.
    pub fn forget(&self, name: &str) -> Option<StepMapEntry> {
        let entry = self.mapping.remove(name)?;
        if let Some(task_id) = entry.task_id {
            self.supervisor.remove_task(&task_id);
        }
        Some(entry)
    }

    /// Stop the monitoring loop and kill every process still supervised.
    pub async fn shutdown(&self) -> anyhow::Result<()> {
        self.supervisor.shutdown().instrument(self.span.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SupervisorConfig;
    use crate::settings::RunSettings;
    use std::time::Duration;

    fn local_launcher() -> LocalLauncher {
        Launcher::builder(Local::new())
            .with_config(
                LauncherConfig::default()
                    .with_supervisor(SupervisorConfig::default().with_poll_interval(10)),
            )
            .build()
    }

    async fn wait_terminal(launcher: &LocalLauncher, name: &str) -> StepInfo {
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                let updates = launcher.get_step_update(&[name]).await;
                if let Some((_, info)) = updates.into_iter().next() {
                    if info.status.is_terminal() {
                        return info;
                    }
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("step did not finish")
    }

    #[test]
    fn identifier_accessors() {
        let id = StepIdentifier::Scheduler("42.server".into());
        assert_eq!(id.step_id(), Some("42.server"));
        assert_eq!(id.task_id(), None);
        assert_eq!(id.to_string(), "42.server");

        let task = TaskId::new();
        let id = StepIdentifier::Task(task);
        assert_eq!(id.task_id(), Some(task));
        assert_eq!(id.step_id(), None);
    }

    #[tokio::test]
    async fn direct_run_writes_output_files() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = local_launcher();
        let settings = RunSettings::new("sh").with_args(["-c", "echo hello; echo oops >&2"]);
        let step = launcher
            .create_step("hello", dir.path(), LaunchSettings::Local(settings))
            .unwrap();

        let identifier = launcher.run(&step).await.unwrap();
        assert!(identifier.task_id().is_some());
        assert!(launcher.supervisor().is_monitoring());

        let info = wait_terminal(&launcher, "hello").await;
        assert_eq!(info.status, Status::Completed);
        assert_eq!(info.returncode, Some(0));

        let (out, err) = step.output_files();
        assert_eq!(std::fs::read_to_string(out).unwrap(), "hello\n");
        assert_eq!(std::fs::read_to_string(err).unwrap(), "oops\n");
        launcher.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn duplicate_name_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = local_launcher();
        let step = launcher
            .create_step("dup", dir.path(), LaunchSettings::Local(RunSettings::new("true")))
            .unwrap();
        launcher.run(&step).await.unwrap();
        let err = launcher.run(&step).await.unwrap_err();
        assert!(matches!(err, LaunchError::DuplicateStep(name) if name == "dup"));
        launcher.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn stop_unmanaged_reports_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = local_launcher();
        let step = launcher
            .create_step(
                "sleeper",
                dir.path(),
                LaunchSettings::Local(RunSettings::new("sleep").with_args(["30"])),
            )
            .unwrap();
        let identifier = launcher.run(&step).await.unwrap();

        let info = launcher.stop("sleeper").await.unwrap();
        assert_eq!(info.status, Status::Cancelled);
        assert!(!launcher.mapping().contains("sleeper"));
        let task_id = identifier.task_id().unwrap();
        assert!(launcher.supervisor().get_task_update(&task_id).is_none());
        launcher.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn unknown_names_are_errors_or_skipped() {
        let launcher = local_launcher();
        assert!(matches!(
            launcher.stop("ghost").await,
            Err(LaunchError::UnknownStep(_))
        ));
        assert!(matches!(
            launcher.get_step_nodes("ghost"),
            Err(LaunchError::UnknownStep(_))
        ));
        assert!(launcher.get_step_update(&["ghost"]).await.is_empty());
        assert!(launcher.forget("ghost").is_none());
    }

    #[tokio::test]
    async fn batch_step_needs_a_scheduler() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = local_launcher();
        let step = Step::qsub_batch("batch", dir.path(), Default::default()).unwrap();
        let err = launcher.run(&step).await.unwrap_err();
        assert!(matches!(err, LaunchError::UnsupportedSettings { .. }));
        assert!(launcher.mapping().is_empty());
    }
}
