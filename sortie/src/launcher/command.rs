use std::fmt::Display;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use crate::runtime::exit_code;

/// A scheduler CLI invocation: program plus arguments, no shell involved.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct ShellCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl ShellCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

impl Display for ShellCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Exit code and captured text of a finished command.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CommandOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Exit 0 with the given stdout.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Non-zero exit with the given stderr.
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }
}

/// Runs scheduler query and cancel commands.
///
/// Submissions go through the task supervisor instead; this seam exists so
/// status polling and cancellation can be exercised without a scheduler.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `command` to completion. An error means the command could not be
    /// run at all; a non-zero exit is reported in [`CommandOutput::code`].
    async fn run(&self, command: &ShellCommand) -> anyhow::Result<CommandOutput>;
}

/// [`CommandRunner`] that spawns real processes.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, command: &ShellCommand) -> anyhow::Result<CommandOutput> {
        let output = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| anyhow::anyhow!("failed to run `{command}`: {e}"))?;
        Ok(CommandOutput {
            code: exit_code(output.status),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_joins_arguments() {
        let command = ShellCommand::new("qstat").args(["-f", "-F", "json"]).arg("42");
        assert_eq!(command.to_string(), "qstat -f -F json 42");
    }

    #[tokio::test]
    async fn process_runner_reports_exit_code() {
        let output = ProcessRunner
            .run(&ShellCommand::new("sh").args(["-c", "echo out; echo err >&2; exit 4"]))
            .await
            .unwrap();
        assert_eq!(output.code, Some(4));
        assert!(!output.success());
        assert_eq!(output.stdout, "out\n");
        assert_eq!(output.stderr, "err\n");
    }

    #[tokio::test]
    async fn process_runner_errors_on_missing_program() {
        let result = ProcessRunner
            .run(&ShellCommand::new("sortie-no-such-binary"))
            .await;
        assert!(result.is_err());
    }
}
