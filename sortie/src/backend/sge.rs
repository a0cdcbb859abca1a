use std::path::Path;

use serde::{Deserialize, Serialize};

use super::{SchedulerCli, WorkloadManager, job_number, unsupported};
use crate::error::Result;
use crate::launcher::command::{CommandOutput, ShellCommand};
use crate::settings::LaunchSettings;
use crate::status::{Status, StepInfo};
use crate::step::Step;

/// Names of the Grid Engine client binaries.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SgeCommands {
    pub qstat: String,
    pub qdel: String,
}

impl Default for SgeCommands {
    fn default() -> Self {
        Self {
            qstat: "qstat".to_string(),
            qdel: "qdel".to_string(),
        }
    }
}

/// Sun/Univa Grid Engine.
#[derive(Clone, Debug, Default)]
pub struct Sge {
    commands: SgeCommands,
}

impl Sge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_commands(commands: SgeCommands) -> Self {
        Self { commands }
    }
}

impl WorkloadManager for Sge {
    fn name(&self) -> &'static str {
        "SGE"
    }

    fn create_step(&self, name: &str, cwd: &Path, settings: LaunchSettings) -> Result<Step> {
        match settings {
            LaunchSettings::SgeQsubBatch(batch) => Step::sge_qsub_batch(name, cwd, batch),
            LaunchSettings::Mpirun(run) => Step::mpirun(name, cwd, run),
            other @ (LaunchSettings::QsubBatch(_)
            | LaunchSettings::Aprun(_)
            | LaunchSettings::Local(_)) => Err(unsupported(self.name(), &other)),
        }
    }

    fn scheduler(&self) -> Option<&dyn SchedulerCli> {
        Some(self)
    }
}

impl SchedulerCli for Sge {
    /// Accepts `qsub -terse` output (`42`) as well as the default
    /// `Your job 42 ("name") has been submitted`.
    fn parse_submit_output(&self, stdout: &str) -> Option<String> {
        let line = stdout.lines().map(str::trim).find(|line| !line.is_empty())?;
        let candidate = if let Some(rest) = line
            .strip_prefix("Your job-array ")
            .or_else(|| line.strip_prefix("Your job "))
        {
            rest.split_whitespace().next()?
        } else {
            line
        };
        let number = job_number(candidate);
        (!number.is_empty() && number.chars().all(|c| c.is_ascii_digit()))
            .then(|| number.to_string())
    }

    /// `qstat -r` lists every job of the user; ids are picked out when
    /// parsing.
    fn query_command(&self, _step_ids: &[String]) -> ShellCommand {
        self.listing_command()
    }

    fn parse_query(&self, output: &CommandOutput, step_ids: &[String]) -> Vec<StepInfo> {
        parse_qstat_r(output, step_ids)
    }

    fn listing_command(&self) -> ShellCommand {
        ShellCommand::new(&self.commands.qstat).arg("-r")
    }

    fn find_step_id(&self, listing: &CommandOutput, step_name: &str) -> Option<String> {
        if !listing.success() {
            return None;
        }
        qstat_rows(&listing.stdout)
            .into_iter()
            .find(|row| row.name == step_name)
            .map(|row| row.id)
    }

    fn cancel_command(&self, step_id: &str) -> ShellCommand {
        ShellCommand::new(&self.commands.qdel).arg(step_id)
    }
}

#[derive(Debug, PartialEq)]
struct QstatRow {
    id: String,
    state: String,
    name: String,
}

fn qstat_rows(stdout: &str) -> Vec<QstatRow> {
    let mut rows: Vec<QstatRow> = Vec::new();
    for line in stdout.lines() {
        let trimmed = line.trim();
        if let Some(full_name) = trimmed.strip_prefix("Full jobname:") {
            if let Some(row) = rows.last_mut() {
                row.name = full_name.trim().to_string();
            }
            continue;
        }
        let fields: Vec<&str> = trimmed.split_whitespace().collect();
        if fields.len() >= 5 && fields[0].chars().all(|c| c.is_ascii_digit()) {
            rows.push(QstatRow {
                id: fields[0].to_string(),
                state: fields[4].to_string(),
                name: fields[2].to_string(),
            });
        }
    }
    rows
}

/// Map a Grid Engine state code to a canonical status.
pub fn sge_state(state: &str) -> StepInfo {
    let status = match state {
        "qw" | "hqw" | "hRwq" | "t" | "Rq" => Status::Pending,
        s if s.starts_with('d') => Status::Cancelled,
        s if s.contains('E') => Status::Failed,
        s if s.contains(['s', 'S', 'T']) => Status::Pending,
        "r" | "Rr" | "Rt" => Status::Running,
        _ => Status::Unknown,
    };
    StepInfo::new(status, None).with_raw_status(state)
}

/// Parse `qstat -r` output into one snapshot per requested id.
pub fn parse_qstat_r(output: &CommandOutput, step_ids: &[String]) -> Vec<StepInfo> {
    if !output.success() {
        tracing::warn!(code = ?output.code, stderr = %output.stderr.trim(), "qstat failed");
        return step_ids.iter().map(|_| StepInfo::unknown()).collect();
    }
    let rows = qstat_rows(&output.stdout);
    step_ids
        .iter()
        .map(|id| {
            rows.iter()
                .find(|row| row.id == job_number(id))
                .map_or_else(StepInfo::not_found, |row| sge_state(&row.state))
        })
        .collect()
}
