use std::fmt::Display;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::status::Status;

/// Locally assigned identifier of a supervised process.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub Uuid);

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(TaskId)
    }
}

/// Where a supervised process writes one of its output streams.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum OutputDest {
    /// Truncate and write to this file.
    File(PathBuf),
    /// Buffer in memory; returned by `get_task_update` once the process exits.
    Capture,
    Null,
}

/// Latest known state of a supervised task.
#[derive(Clone, Debug, PartialEq)]
pub struct TaskSnapshot {
    pub task_id: TaskId,
    pub status: Status,
    pub returncode: Option<i32>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Result of a blocking spawn.
#[derive(Clone, Debug, PartialEq)]
pub struct WaitOutput {
    pub returncode: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl WaitOutput {
    pub fn success(&self) -> bool {
        self.returncode == Some(0)
    }
}

/// Exit code of a finished process; a signal `N` reports as `-N`.
pub fn exit_code(status: ExitStatus) -> Option<i32> {
    if let Some(code) = status.code() {
        return Some(code);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return Some(-signal);
        }
    }
    None
}
