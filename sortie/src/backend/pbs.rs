use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::{SchedulerCli, WorkloadManager, job_number, unsupported};
use crate::error::Result;
use crate::launcher::command::{CommandOutput, ShellCommand};
use crate::settings::LaunchSettings;
use crate::status::{Status, StepInfo};
use crate::step::Step;

/// Names of the PBS client binaries.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PbsCommands {
    pub qstat: String,
    pub qdel: String,
}

impl Default for PbsCommands {
    fn default() -> Self {
        Self {
            qstat: "qstat".to_string(),
            qdel: "qdel".to_string(),
        }
    }
}

/// PBS Professional.
///
/// `qsub` batches are managed; `aprun` and `mpirun` steps run under the
/// local supervisor.
#[derive(Clone, Debug, Default)]
pub struct Pbs {
    commands: PbsCommands,
}

impl Pbs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_commands(commands: PbsCommands) -> Self {
        Self { commands }
    }

    pub fn commands(&self) -> &PbsCommands {
        &self.commands
    }
}

impl WorkloadManager for Pbs {
    fn name(&self) -> &'static str {
        "PBSPro"
    }

    fn create_step(&self, name: &str, cwd: &Path, settings: LaunchSettings) -> Result<Step> {
        match settings {
            LaunchSettings::QsubBatch(batch) => Step::qsub_batch(name, cwd, batch),
            LaunchSettings::Aprun(run) => Step::aprun(name, cwd, run),
            LaunchSettings::Mpirun(run) => Step::mpirun(name, cwd, run),
            other @ (LaunchSettings::SgeQsubBatch(_) | LaunchSettings::Local(_)) => {
                Err(unsupported(self.name(), &other))
            }
        }
    }

    fn scheduler(&self) -> Option<&dyn SchedulerCli> {
        Some(self)
    }
}

impl SchedulerCli for Pbs {
    fn parse_submit_output(&self, stdout: &str) -> Option<String> {
        stdout
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(str::to_string)
    }

    fn query_command(&self, step_ids: &[String]) -> ShellCommand {
        ShellCommand::new(&self.commands.qstat)
            .args(["-f", "-F", "json", "-x"])
            .args(step_ids.iter().cloned())
    }

    fn parse_query(&self, output: &CommandOutput, step_ids: &[String]) -> Vec<StepInfo> {
        parse_qstat_json(output, step_ids)
    }

    fn listing_command(&self) -> ShellCommand {
        ShellCommand::new(&self.commands.qstat).args(["-f", "-F", "json"])
    }

    fn find_step_id(&self, listing: &CommandOutput, step_name: &str) -> Option<String> {
        let parsed = decode(&listing.stdout)?;
        parsed
            .jobs
            .into_iter()
            .find(|(_, job)| job.job_name.as_deref() == Some(step_name))
            .map(|(id, _)| id)
    }

    fn cancel_command(&self, step_id: &str) -> ShellCommand {
        ShellCommand::new(&self.commands.qdel).arg(step_id)
    }
}

#[derive(Debug, Default, Deserialize)]
struct QstatJson {
    #[serde(rename = "Jobs", default)]
    jobs: BTreeMap<String, QstatJob>,
}

#[derive(Debug, Deserialize)]
struct QstatJob {
    #[serde(rename = "Job_Name")]
    job_name: Option<String>,
    job_state: Option<String>,
    #[serde(rename = "Exit_status")]
    exit_status: Option<i32>,
}

fn decode(stdout: &str) -> Option<QstatJson> {
    if stdout.trim().is_empty() {
        return Some(QstatJson::default());
    }
    match serde_json::from_str(stdout) {
        Ok(parsed) => Some(parsed),
        Err(err) => {
            tracing::warn!(error = %err, "unparseable qstat output");
            None
        }
    }
}

/// Map a PBS `job_state` to a canonical status.
pub fn pbs_state(state: &str, exit_status: Option<i32>) -> StepInfo {
    let info = match state {
        "Q" | "W" | "H" | "T" | "S" | "U" => StepInfo::new(Status::Pending, None),
        "R" | "B" | "E" => StepInfo::new(Status::Running, None),
        "F" | "X" => match exit_status.unwrap_or(0) {
            0 => StepInfo::new(Status::Completed, Some(0)),
            code => StepInfo::new(Status::Failed, Some(code)),
        },
        _ => StepInfo::unknown(),
    };
    info.with_raw_status(state)
}

/// Parse `qstat -f -F json -x` output into one snapshot per requested id.
pub fn parse_qstat_json(output: &CommandOutput, step_ids: &[String]) -> Vec<StepInfo> {
    if output.stdout.trim().is_empty() && !output.success() {
        // Nothing printed: qstat either rejected every id or failed outright.
        return step_ids
            .iter()
            .map(|id| {
                let mentioned = output
                    .stderr
                    .split_whitespace()
                    .any(|token| job_number(token) == job_number(id));
                if mentioned {
                    StepInfo::not_found()
                } else {
                    StepInfo::unknown()
                }
            })
            .collect();
    }

    let Some(parsed) = decode(&output.stdout) else {
        return step_ids.iter().map(|_| StepInfo::unknown()).collect();
    };

    step_ids
        .iter()
        .map(|id| {
            let job = parsed.jobs.get(id).or_else(|| {
                parsed
                    .jobs
                    .iter()
                    .find(|(key, _)| job_number(key) == job_number(id))
                    .map(|(_, job)| job)
            });
            match job {
                Some(QstatJob {
                    job_state: Some(state),
                    exit_status,
                    ..
                }) => pbs_state(state, *exit_status),
                Some(_) => StepInfo::unknown(),
                None => StepInfo::not_found(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LaunchError;
    use crate::settings::{QsubBatchSettings, RunSettings};
    use crate::step::StepKind;

    const QSTAT: &str = r#"{
        "timestamp": 1700000000,
        "pbs_version": "2022.1.1",
        "pbs_server": "server",
        "Jobs": {
            "41.server": {"Job_Name": "done", "job_state": "F", "Exit_status": 0},
            "42.server": {"Job_Name": "job_0", "job_state": "R"},
            "43.server": {"Job_Name": "queued", "job_state": "Q"},
            "44.server": {"Job_Name": "broken", "job_state": "F", "Exit_status": 271}
        }
    }"#;

    fn ids(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|id| id.to_string()).collect()
    }

    #[test]
    fn state_table() {
        assert_eq!(pbs_state("Q", None).status, Status::Pending);
        assert_eq!(pbs_state("H", None).status, Status::Pending);
        assert_eq!(pbs_state("R", None).status, Status::Running);
        assert_eq!(pbs_state("E", None).status, Status::Running);
        assert_eq!(pbs_state("F", None).returncode, Some(0));
        assert_eq!(pbs_state("X", Some(2)).status, Status::Failed);
        assert_eq!(pbs_state("Z", None).status, Status::Unknown);
        assert_eq!(pbs_state("R", None).raw_status.as_deref(), Some("R"));
    }

    #[test]
    fn parses_requested_ids_in_order() {
        let output = CommandOutput::ok(QSTAT);
        let infos = parse_qstat_json(&output, &ids(&["43.server", "42", "41.server", "44.server"]));
        let statuses: Vec<Status> = infos.iter().map(|info| info.status).collect();
        assert_eq!(
            statuses,
            vec![Status::Pending, Status::Running, Status::Completed, Status::Failed]
        );
        assert_eq!(infos[3].returncode, Some(271));
    }

    #[test]
    fn missing_job_counts_as_completed() {
        let output = CommandOutput::ok(QSTAT);
        let infos = parse_qstat_json(&output, &ids(&["99.server"]));
        assert_eq!(infos[0].status, Status::Completed);
        assert_eq!(infos[0].returncode, Some(0));
    }

    #[test]
    fn unknown_job_error_counts_as_completed() {
        let output = CommandOutput::failed(35, "qstat: Unknown Job Id 99.server\n");
        let infos = parse_qstat_json(&output, &ids(&["99.server", "100.server"]));
        assert_eq!(infos[0].status, Status::Completed);
        assert_eq!(infos[1].status, Status::Unknown);
    }

    #[test]
    fn garbage_output_is_unknown() {
        let output = CommandOutput::ok("not json at all");
        let infos = parse_qstat_json(&output, &ids(&["42.server", "43.server"]));
        assert!(infos.iter().all(|info| info.status == Status::Unknown));
    }

    #[test]
    fn submit_output_first_line() {
        let pbs = Pbs::new();
        assert_eq!(
            pbs.parse_submit_output("\n  42.server \n"),
            Some("42.server".to_string())
        );
        assert_eq!(pbs.parse_submit_output("  \n"), None);
    }

    #[test]
    fn finds_step_id_by_name() {
        let pbs = Pbs::new();
        let listing = CommandOutput::ok(QSTAT);
        assert_eq!(
            pbs.find_step_id(&listing, "job_0"),
            Some("42.server".to_string())
        );
        assert_eq!(pbs.find_step_id(&listing, "nope"), None);
        assert_eq!(pbs.find_step_id(&CommandOutput::ok("{"), "job_0"), None);
    }

    #[test]
    fn commands_use_configured_binaries() {
        let pbs = Pbs::with_commands(PbsCommands {
            qstat: "/opt/pbs/bin/qstat".into(),
            qdel: "/opt/pbs/bin/qdel".into(),
        });
        assert_eq!(
            pbs.query_command(&ids(&["1", "2"])).to_string(),
            "/opt/pbs/bin/qstat -f -F json -x 1 2"
        );
        assert_eq!(pbs.cancel_command("1").to_string(), "/opt/pbs/bin/qdel 1");
        assert_eq!(
            pbs.listing_command().to_string(),
            "/opt/pbs/bin/qstat -f -F json"
        );
    }

    #[test]
    fn create_step_dispatch() {
        let pbs = Pbs::new();
        let cwd = Path::new("/tmp");
        let step = pbs
            .create_step("b", cwd, LaunchSettings::QsubBatch(QsubBatchSettings::default()))
            .unwrap();
        assert_eq!(step.kind(), StepKind::Batch);
        assert!(step.managed());

        let step = pbs
            .create_step("r", cwd, LaunchSettings::Aprun(RunSettings::new("a.out")))
            .unwrap();
        assert_eq!(step.kind(), StepKind::DirectRun);
        assert!(!step.managed());

        let err = pbs
            .create_step("l", cwd, LaunchSettings::Local(RunSettings::new("a.out")))
            .unwrap_err();
        assert!(matches!(err, LaunchError::UnsupportedSettings { .. }));
    }
}
