//! Workload manager backends.
//!
//! A backend decides which settings kinds it can turn into steps and, when it
//! fronts a real scheduler, how to talk to that scheduler's CLI. The
//! [`Launcher`](crate::launcher::Launcher) drives both through the traits in
//! this module.

use std::path::Path;

use crate::error::{LaunchError, Result};
use crate::launcher::command::{CommandOutput, ShellCommand};
use crate::mapping::StepMapEntry;
use crate::settings::LaunchSettings;
use crate::status::StepInfo;
use crate::step::Step;

pub mod local;
pub mod pbs;
pub mod sge;

pub use local::Local;
pub use pbs::{Pbs, PbsCommands};
pub use sge::{Sge, SgeCommands};

/// Submit, query and cancel vocabulary of one external scheduler.
///
/// Every method is pure: it builds a command or parses a command's output.
/// Running the commands is the launcher's job.
pub trait SchedulerCli: Send + Sync {
    /// Job id printed by a successful submission, if any.
    fn parse_submit_output(&self, stdout: &str) -> Option<String>;

    /// Status query covering every id in `step_ids`.
    fn query_command(&self, step_ids: &[String]) -> ShellCommand;

    /// One snapshot per requested id, in the same order.
    ///
    /// Failures never abort the batch: an id whose status cannot be read is
    /// [`Status::Unknown`](crate::status::Status::Unknown).
    fn parse_query(&self, output: &CommandOutput, step_ids: &[String]) -> Vec<StepInfo>;

    /// Listing searched by name when a submission did not print its id.
    fn listing_command(&self) -> ShellCommand;

    fn find_step_id(&self, listing: &CommandOutput, step_name: &str) -> Option<String>;

    fn cancel_command(&self, step_id: &str) -> ShellCommand;
}

/// A workload manager the launcher can target.
pub trait WorkloadManager: Send + Sync + 'static {
    /// Display name used in logs, metrics and errors.
    fn name(&self) -> &'static str;

    /// Build a step for `settings`, or fail with
    /// [`LaunchError::UnsupportedSettings`] if this backend cannot run it.
    fn create_step(&self, name: &str, cwd: &Path, settings: LaunchSettings) -> Result<Step>;

    /// CLI of the scheduler behind this backend; `None` when there is none
    /// and only unmanaged steps exist.
    fn scheduler(&self) -> Option<&dyn SchedulerCli>;

    /// Compute nodes assigned to a launched step.
    fn step_nodes(&self, _entry: &StepMapEntry) -> Result<Vec<String>> {
        Err(LaunchError::Unsupported {
            backend: self.name(),
            operation: "node enumeration",
        })
    }
}

pub(crate) fn unsupported(backend: &'static str, settings: &LaunchSettings) -> LaunchError {
    LaunchError::UnsupportedSettings {
        backend,
        kind: settings.kind(),
    }
}

/// Leading numeric segment of a qualified job id (`42` for `42.server`).
pub(crate) fn job_number(id: &str) -> &str {
    id.split('.').next().unwrap_or(id)
}
