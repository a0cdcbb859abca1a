use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::Notify;
use tokio::task::{AbortHandle, JoinHandle};

use super::task::{OutputDest, TaskId, TaskSnapshot, WaitOutput, exit_code};
use crate::config::SupervisorConfig;
use crate::error::{LaunchError, Result};
use crate::events::{EventBus, StepEventPayload};
use crate::status::Status;
use crate::telemetry;

/// Token for signaling shutdown to the monitoring loop.
#[derive(Clone, Debug)]
pub struct ShutdownToken {
    inner: Arc<ShutdownTokenInner>,
}

#[derive(Debug)]
struct ShutdownTokenInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl ShutdownToken {
    /// Create a new shutdown token.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ShutdownTokenInner {
                cancelled: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    /// Signal cancellation.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// Check if cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Wait until cancelled.
    pub async fn cancelled(&self) {
        let notified = self.inner.notify.notified();
        tokio::pin!(notified);
        // Register before checking the flag so a concurrent cancel is not missed.
        notified.as_mut().enable();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}

impl Default for ShutdownToken {
    fn default() -> Self {
        Self::new()
    }
}

struct OutputReaders {
    stdout: Option<JoinHandle<String>>,
    stderr: Option<JoinHandle<String>>,
}

impl OutputReaders {
    fn abort_handles(&self) -> impl Iterator<Item = AbortHandle> + '_ {
        self.stdout.iter().chain(&self.stderr).map(JoinHandle::abort_handle)
    }

    async fn collect(self) -> (Option<String>, Option<String>) {
        (join_reader(self.stdout).await, join_reader(self.stderr).await)
    }
}

async fn join_reader(handle: Option<JoinHandle<String>>) -> Option<String> {
    match handle?.await {
        Ok(text) => Some(text),
        Err(err) => {
            tracing::warn!(error = %err, "output reader task failed");
            None
        }
    }
}

fn spawn_reader<R>(mut pipe: R) -> JoinHandle<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Err(err) = pipe.read_to_end(&mut buf).await {
            tracing::warn!(error = %err, "failed reading task output");
        }
        String::from_utf8_lossy(&buf).into_owned()
    })
}

struct Task {
    child: Child,
    /// Set once `try_wait` has reported an exit; output may still be draining.
    reaped: bool,
    readers: Option<OutputReaders>,
    /// Reader and drain tasks, aborted when the task stops being tracked.
    background: Vec<AbortHandle>,
    status: Status,
    returncode: Option<i32>,
    stdout: Option<String>,
    stderr: Option<String>,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
}

impl Task {
    fn abort_background(&mut self) {
        for handle in self.background.drain(..) {
            handle.abort();
        }
    }

    fn snapshot(&self, task_id: TaskId) -> TaskSnapshot {
        TaskSnapshot {
            task_id,
            status: self.status,
            returncode: self.returncode,
            stdout: self.stdout.clone(),
            stderr: self.stderr.clone(),
            started_at: self.started_at,
            finished_at: self.finished_at,
        }
    }
}

type TaskTable = Arc<Mutex<HashMap<TaskId, Task>>>;

struct Monitor {
    handle: JoinHandle<()>,
    shutdown: ShutdownToken,
}

/// Owns locally spawned processes and watches them from a background loop.
///
/// The table lock is never held across an `.await`, so callers reading a
/// snapshot and the monitoring loop only ever wait for one table scan.
pub struct TaskSupervisor {
    config: SupervisorConfig,
    tasks: TaskTable,
    monitor: Mutex<Option<Monitor>>,
    events: Option<Arc<EventBus>>,
}

impl fmt::Debug for TaskSupervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskSupervisor")
            .field("config", &self.config)
            .field("tasks", &self.tasks.lock().len())
            .field("monitoring", &self.is_monitoring())
            .finish()
    }
}

impl TaskSupervisor {
    pub fn new(config: SupervisorConfig) -> Self {
        Self {
            config,
            tasks: Arc::new(Mutex::new(HashMap::new())),
            monitor: Mutex::new(None),
            events: None,
        }
    }

    /// Publish [`StepEventPayload::TaskExited`] on `events` from the loop.
    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Start the monitoring loop. Calling this while the loop runs is a no-op.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        let mut monitor = self.monitor.lock();
        if monitor
            .as_ref()
            .is_some_and(|current| !current.handle.is_finished())
        {
            return;
        }

        let shutdown = ShutdownToken::new();
        let handle = tokio::spawn(monitor_loop(
            Arc::clone(&self.tasks),
            self.config.poll_interval(),
            shutdown.clone(),
            self.events.clone(),
        ));
        *monitor = Some(Monitor { handle, shutdown });
        tracing::debug!(
            poll_interval_ms = self.config.poll_interval_ms,
            "task monitor started"
        );
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitor
            .lock()
            .as_ref()
            .is_some_and(|monitor| !monitor.handle.is_finished())
    }

    /// Spawn `command` in `cwd` and return its id without waiting.
    pub fn start_task(
        &self,
        command: &[String],
        cwd: &Path,
        stdout: OutputDest,
        stderr: OutputDest,
    ) -> Result<TaskId> {
        let mut cmd = build_command(command, cwd)?;
        cmd.stdin(Stdio::null())
            .stdout(stdio_for(&stdout)?)
            .stderr(stdio_for(&stderr)?)
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|source| LaunchError::Spawn {
            command: command.join(" "),
            source,
        })?;

        let readers = match (&stdout, &stderr) {
            (OutputDest::Capture, _) | (_, OutputDest::Capture) => Some(OutputReaders {
                stdout: child.stdout.take().map(spawn_reader),
                stderr: child.stderr.take().map(spawn_reader),
            }),
            _ => None,
        };

        let background = readers
            .as_ref()
            .map(|readers| readers.abort_handles().collect())
            .unwrap_or_default();

        let task_id = TaskId::new();
        let task = Task {
            child,
            reaped: false,
            readers,
            background,
            status: Status::Running,
            returncode: None,
            stdout: None,
            stderr: None,
            started_at: Utc::now(),
            finished_at: None,
        };
        self.tasks.lock().insert(task_id, task);
        tracing::debug!(task_id = %task_id, command = %command.join(" "), "task started");
        Ok(task_id)
    }

    /// Spawn `command` and wait for it, capturing both output streams.
    pub async fn start_and_wait(&self, command: &[String], cwd: &Path) -> Result<WaitOutput> {
        let mut cmd = build_command(command, cwd)?;
        cmd.stdin(Stdio::null()).kill_on_drop(true);
        let output = cmd.output().await.map_err(|source| LaunchError::Spawn {
            command: command.join(" "),
            source,
        })?;
        Ok(WaitOutput {
            returncode: exit_code(output.status),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    /// Latest known state of a task, or `None` if it is not tracked.
    pub fn get_task_update(&self, task_id: &TaskId) -> Option<TaskSnapshot> {
        self.tasks
            .lock()
            .get(task_id)
            .map(|task| task.snapshot(*task_id))
    }

    /// Stop tracking a task, killing it first if it is still running.
    pub fn remove_task(&self, task_id: &TaskId) -> Option<TaskSnapshot> {
        let mut task = self.tasks.lock().remove(task_id)?;
        task.abort_background();
        if !task.reaped {
            if let Err(err) = task.child.start_kill() {
                tracing::debug!(task_id = %task_id, error = %err, "task already gone");
            }
        }
        tracing::debug!(task_id = %task_id, "task removed");
        Some(task.snapshot(*task_id))
    }

    pub fn task_count(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Stop the monitoring loop, then kill and drop every tracked task.
    pub async fn shutdown(&self) -> anyhow::Result<()> {
        let monitor = self.monitor.lock().take();
        if let Some(Monitor { handle, shutdown }) = monitor {
            shutdown.cancel();
            match tokio::time::timeout(self.config.shutdown_timeout(), handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!("task monitor failed: {:?}", e),
                Err(_) => tracing::warn!("task monitor timed out during shutdown"),
            }
        }

        let drained: Vec<(TaskId, Task)> = self.tasks.lock().drain().collect();
        for (task_id, mut task) in drained {
            task.abort_background();
            if !task.reaped {
                let _ = task.child.start_kill();
                tracing::debug!(task_id = %task_id, "killed task during shutdown");
            }
        }

        tracing::info!("task supervisor shutdown complete");
        Ok(())
    }
}

impl Drop for TaskSupervisor {
    fn drop(&mut self) {
        if let Some(monitor) = self.monitor.get_mut().take() {
            monitor.shutdown.cancel();
        }
    }
}

fn build_command(command: &[String], cwd: &Path) -> Result<Command> {
    let (program, args) = command
        .split_first()
        .ok_or_else(|| LaunchError::Configuration("empty command".to_string()))?;
    let mut cmd = Command::new(program);
    cmd.args(args).current_dir(cwd);
    Ok(cmd)
}

fn stdio_for(dest: &OutputDest) -> Result<Stdio> {
    Ok(match dest {
        OutputDest::File(path) => {
            let file = File::create(path).map_err(|source| LaunchError::io(path, source))?;
            Stdio::from(file)
        }
        OutputDest::Capture => Stdio::piped(),
        OutputDest::Null => Stdio::null(),
    })
}

async fn monitor_loop(
    tasks: TaskTable,
    interval: std::time::Duration,
    shutdown: ShutdownToken,
    events: Option<Arc<EventBus>>,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::debug!("task monitor shutting down");
                break;
            }
            _ = tokio::time::sleep(interval) => {
                scan_tasks(&tasks, events.as_deref());
            }
        }
    }
}

/// One liveness pass over the table.
///
/// Status and return code are recorded as soon as `try_wait` reports an exit.
/// Captured output is drained by a separate task per exited process, so a
/// descendant that keeps a pipe open never holds up the scan.
fn scan_tasks(tasks: &TaskTable, events: Option<&EventBus>) {
    let exited: Vec<(TaskId, Status, Option<i32>)> = {
        let mut table = tasks.lock();
        let mut exited = Vec::new();
        for (task_id, task) in table.iter_mut() {
            if task.reaped {
                continue;
            }
            match task.child.try_wait() {
                Ok(Some(exit)) => {
                    let returncode = exit_code(exit);
                    let status = returncode.map_or(Status::Failed, Status::from_exit_code);
                    task.reaped = true;
                    task.status = status;
                    task.returncode = returncode;
                    task.finished_at = Some(Utc::now());
                    if let Some(readers) = task.readers.take() {
                        let drain = spawn_drain(Arc::clone(tasks), *task_id, readers);
                        task.background.push(drain.abort_handle());
                    }
                    exited.push((*task_id, status, returncode));
                }
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(task_id = %task_id, error = %err, "unable to poll task");
                }
            }
        }
        exited
    };

    for (task_id, status, returncode) in exited {
        telemetry::record_task_exited(task_id.to_string(), status.as_str(), returncode);
        if let Some(events) = events {
            events.emit(StepEventPayload::TaskExited {
                task_id,
                status,
                returncode,
            });
        }
    }
}

/// Wait for an exited task's pipes to close, then store what they carried.
fn spawn_drain(tasks: TaskTable, task_id: TaskId, readers: OutputReaders) -> JoinHandle<()> {
    tokio::spawn(async move {
        let (stdout, stderr) = readers.collect().await;
        if let Some(task) = tasks.lock().get_mut(&task_id) {
            task.stdout = stdout;
            task.stderr = stderr;
        }
    })
}
