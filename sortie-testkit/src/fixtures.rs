//! Scheduler output in the shapes the real tools print.

use serde_json::{Map, Value, json};
use sortie::CommandOutput;

/// One job row for the fixture builders.
#[derive(Clone, Debug)]
pub struct FakeJob {
    pub id: String,
    pub name: String,
    pub state: String,
    pub exit_status: Option<i32>,
}

impl FakeJob {
    pub fn new(id: &str, name: &str, state: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            state: state.to_string(),
            exit_status: None,
        }
    }

    pub fn exited(mut self, code: i32) -> Self {
        self.exit_status = Some(code);
        self
    }
}

/// `qstat -f -F json` output listing `jobs`.
pub fn pbs_qstat_json(jobs: &[FakeJob]) -> String {
    let mut map = Map::new();
    for job in jobs {
        let mut entry = json!({
            "Job_Name": job.name,
            "Job_Owner": "user@login1",
            "job_state": job.state,
            "queue": "workq",
        });
        if let (Some(code), Value::Object(fields)) = (job.exit_status, &mut entry) {
            fields.insert("Exit_status".to_string(), json!(code));
        }
        map.insert(job.id.clone(), entry);
    }
    json!({
        "timestamp": 1_700_000_000,
        "pbs_version": "2022.1.1",
        "pbs_server": "server",
        "Jobs": Value::Object(map),
    })
    .to_string()
}

/// Successful PBS query returning `jobs`.
pub fn pbs_query(jobs: &[FakeJob]) -> CommandOutput {
    CommandOutput::ok(pbs_qstat_json(jobs))
}

/// What `qstat -x` prints for an id PBS no longer knows.
pub fn pbs_unknown_job(id: &str) -> CommandOutput {
    CommandOutput::failed(35, format!("qstat: Unknown Job Id {id}\n"))
}

/// `qstat -r` output listing `jobs`.
pub fn sge_qstat_r(jobs: &[FakeJob]) -> String {
    let mut out = String::from(
        "job-ID  prior   name       user         state submit/start at     queue                          slots ja-task-ID\n\
         -----------------------------------------------------------------------------------------------------------------\n",
    );
    for job in jobs {
        let short: String = job.name.chars().take(10).collect();
        out.push_str(&format!(
            "{:>7} 0.55500 {:<10} alice        {:<5} 05/18/2024 10:00:00 all.q@node1                        1\n",
            job.id, short, job.state
        ));
        out.push_str(&format!("       Full jobname:     {}\n", job.name));
    }
    out
}

/// Successful Grid Engine query returning `jobs`.
pub fn sge_query(jobs: &[FakeJob]) -> CommandOutput {
    CommandOutput::ok(sge_qstat_r(jobs))
}
