use std::fmt::Display;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Canonical step status shared by every backend.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Status {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    Unknown,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Pending => "Pending",
            Status::Running => "Running",
            Status::Completed => "Completed",
            Status::Failed => "Failed",
            Status::Cancelled => "Cancelled",
            Status::Unknown => "Unknown",
        }
    }

    /// Completed, Failed and Cancelled never change once observed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Completed | Status::Failed | Status::Cancelled)
    }

    /// Status for a process that exited with `code`.
    pub fn from_exit_code(code: i32) -> Self {
        if code == 0 {
            Status::Completed
        } else {
            Status::Failed
        }
    }
}

impl Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time status snapshot for one step.
///
/// A fresh `StepInfo` is produced on every poll; it is never updated in
/// place.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StepInfo {
    pub status: Status,
    /// Present once the step is terminal (and the backend knows it).
    pub returncode: Option<i32>,
    /// Raw status code as reported by the backend (`"R"`, `"qw"`, ...).
    pub raw_status: Option<String>,
    /// Captured stdout, for supervisor tasks that captured it.
    pub output: Option<String>,
    /// Captured stderr, for supervisor tasks that captured it.
    pub error: Option<String>,
    pub observed_at: DateTime<Utc>,
}

impl StepInfo {
    pub fn new(status: Status, returncode: Option<i32>) -> Self {
        Self {
            status,
            returncode,
            raw_status: None,
            output: None,
            error: None,
            observed_at: Utc::now(),
        }
    }

    /// A job the scheduler no longer remembers, queried without error.
    ///
    /// Schedulers that drop finished jobs from their history are not
    /// reporting a failure, so the job counts as completed.
    pub fn not_found() -> Self {
        Self::new(Status::Completed, Some(0)).with_raw_status("NOTFOUND")
    }

    pub fn unknown() -> Self {
        Self::new(Status::Unknown, None)
    }

    pub fn with_raw_status(mut self, raw: impl Into<String>) -> Self {
        self.raw_status = Some(raw.into());
        self
    }

    pub fn with_output(mut self, output: Option<String>, error: Option<String>) -> Self {
        self.output = output;
        self.error = error;
        self
    }

    /// Merge a fresh snapshot over the previous one for the same step.
    ///
    /// The first terminal snapshot wins: later polls never change its status
    /// or return code. Output that arrives after the exit is still taken.
    pub fn supersede(previous: Option<&StepInfo>, fresh: StepInfo) -> StepInfo {
        match previous {
            Some(prev) if prev.status.is_terminal() => {
                let mut kept = prev.clone();
                kept.observed_at = fresh.observed_at;
                if fresh.status.is_terminal() {
                    kept.output = kept.output.or(fresh.output);
                    kept.error = kept.error.or(fresh.error);
                }
                kept
            }
            _ => fresh,
        }
    }
}
