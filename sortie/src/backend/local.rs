use std::path::Path;

use super::{SchedulerCli, WorkloadManager, unsupported};
use crate::error::Result;
use crate::settings::LaunchSettings;
use crate::step::Step;

/// The local machine, with no workload manager at all.
///
/// Only plain processes run here and every step is unmanaged.
#[derive(Clone, Copy, Debug, Default)]
pub struct Local;

impl Local {
    pub fn new() -> Self {
        Self
    }
}

impl WorkloadManager for Local {
    fn name(&self) -> &'static str {
        "Local"
    }

    fn create_step(&self, name: &str, cwd: &Path, settings: LaunchSettings) -> Result<Step> {
        match settings {
            LaunchSettings::Local(run) => Step::local(name, cwd, run),
            other @ (LaunchSettings::QsubBatch(_)
            | LaunchSettings::SgeQsubBatch(_)
            | LaunchSettings::Aprun(_)
            | LaunchSettings::Mpirun(_)) => Err(unsupported(self.name(), &other)),
        }
    }

    fn scheduler(&self) -> Option<&dyn SchedulerCli> {
        None
    }
}
