use std::any::type_name;
use std::fmt;
use std::sync::Arc;

use crate::backend::WorkloadManager;
use crate::config::LauncherConfig;
use crate::events::EventBus;
use crate::runtime::{Clock, TaskSupervisor, TokioClock};

use super::Launcher;
use super::command::{CommandRunner, ProcessRunner};

/// Builder for a [`Launcher`] with explicit collaborators.
///
/// Every collaborator has a production default, so only the backend is
/// required. Tests replace the command runner and clock.
///
/// # Example
///
/// ```ignore
/// use sortie::*;
///
/// let launcher = LauncherBuilder::new(Pbs::new())
///     .with_config(config)
///     .with_runner(Arc::new(runner))
///     .with_clock(Arc::new(clock))
///     .with_events(events)
///     .build();
/// ```
pub struct LauncherBuilder<W: WorkloadManager> {
    manager: W,
    config: LauncherConfig,
    runner: Option<Arc<dyn CommandRunner>>,
    clock: Option<Arc<dyn Clock>>,
    events: Option<Arc<EventBus>>,
}

impl<W: WorkloadManager> fmt::Debug for LauncherBuilder<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LauncherBuilder")
            .field("backend", &self.manager.name())
            .field("backend_type", &type_name::<W>())
            .field("config", &self.config)
            .field("runner_set", &self.runner.is_some())
            .field("clock_set", &self.clock.is_some())
            .field("events_set", &self.events.is_some())
            .finish()
    }
}

impl<W: WorkloadManager> LauncherBuilder<W> {
    pub fn new(manager: W) -> Self {
        Self {
            manager,
            config: LauncherConfig::default(),
            runner: None,
            clock: None,
            events: None,
        }
    }

    pub fn with_config(mut self, config: LauncherConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the runner for scheduler query and cancel commands.
    pub fn with_runner(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.runner = Some(runner);
        self
    }

    /// Set the clock used between identifier-resolution attempts.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Publish step events on `events`.
    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn build(self) -> Launcher<W> {
        let mut supervisor = TaskSupervisor::new(self.config.supervisor.clone());
        if let Some(events) = &self.events {
            supervisor = supervisor.with_events(Arc::clone(events));
        }
        Launcher::from_parts(
            self.manager,
            self.config,
            supervisor,
            self.runner.unwrap_or_else(|| Arc::new(ProcessRunner)),
            self.clock.unwrap_or_else(|| Arc::new(TokioClock)),
            self.events,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Local;
    use crate::config::RetryConfig;

    fn two_attempts() -> LauncherConfig {
        LauncherConfig::default().with_id_resolution(RetryConfig::default().with_attempts(2))
    }

    #[test]
    fn debug_reports_what_is_set() {
        let builder = LauncherBuilder::new(Local::new())
            .with_events(Arc::new(EventBus::new(4)))
            .with_config(two_attempts());
        let debug = format!("{builder:?}");
        assert!(debug.contains("backend: \"Local\""));
        assert!(debug.contains("events_set: true"));
        assert!(debug.contains("runner_set: false"));
    }

    #[tokio::test]
    async fn build_applies_config() {
        let launcher = LauncherBuilder::new(Local::new())
            .with_config(two_attempts())
            .build();
        assert_eq!(launcher.config().id_resolution.attempts, 2);
        assert!(launcher.mapping().is_empty());
    }
}
