//! Launch specifications and command construction.
//!
//! A [`Step`] is built by a backend's `create_step` from a name, a working
//! directory and [`LaunchSettings`]. It never changes after it is handed to
//! [`crate::Launcher::run`]; batch steps collect their member commands through
//! the consuming [`Step::add_to_batch`] before that point.

use std::fmt::Display;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{LaunchError, Result};
use crate::settings::{QsubBatchSettings, RunSettings, SettingsKind, SgeBatchSettings};

/// How a step reaches the machine.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum StepKind {
    /// Submitted to a scheduler, which owns the job once accepted.
    Batch,
    /// Spawned and watched by the local task supervisor.
    DirectRun,
}

impl Display for StepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepKind::Batch => f.write_str("batch"),
            StepKind::DirectRun => f.write_str("direct-run"),
        }
    }
}

/// Backend-specific launch payload of a [`Step`].
#[derive(Clone, Debug, PartialEq)]
pub enum StepSpec {
    QsubBatch {
        settings: QsubBatchSettings,
        members: Vec<Vec<String>>,
    },
    SgeQsubBatch {
        settings: SgeBatchSettings,
        members: Vec<Vec<String>>,
    },
    Aprun(RunSettings),
    Mpirun(RunSettings),
    Local(RunSettings),
}

impl StepSpec {
    pub fn settings_kind(&self) -> SettingsKind {
        match self {
            StepSpec::QsubBatch { .. } => SettingsKind::QsubBatch,
            StepSpec::SgeQsubBatch { .. } => SettingsKind::SgeQsubBatch,
            StepSpec::Aprun(_) => SettingsKind::Aprun,
            StepSpec::Mpirun(_) => SettingsKind::Mpirun,
            StepSpec::Local(_) => SettingsKind::Local,
        }
    }
}

/// Immutable launch specification for one named job.
#[derive(Clone, Debug, PartialEq)]
pub struct Step {
    name: String,
    cwd: PathBuf,
    managed: bool,
    spec: StepSpec,
}

impl Step {
    pub fn qsub_batch(
        name: impl Into<String>,
        cwd: impl Into<PathBuf>,
        settings: QsubBatchSettings,
    ) -> Result<Self> {
        require("batch_cmd", &settings.batch_cmd)?;
        Self::build(
            name,
            cwd,
            true,
            StepSpec::QsubBatch {
                settings,
                members: Vec::new(),
            },
        )
    }

    pub fn sge_qsub_batch(
        name: impl Into<String>,
        cwd: impl Into<PathBuf>,
        settings: SgeBatchSettings,
    ) -> Result<Self> {
        require("batch_cmd", &settings.batch_cmd)?;
        Self::build(
            name,
            cwd,
            true,
            StepSpec::SgeQsubBatch {
                settings,
                members: Vec::new(),
            },
        )
    }

    pub fn aprun(
        name: impl Into<String>,
        cwd: impl Into<PathBuf>,
        settings: RunSettings,
    ) -> Result<Self> {
        require("exe", &settings.exe)?;
        Self::build(name, cwd, false, StepSpec::Aprun(settings))
    }

    pub fn mpirun(
        name: impl Into<String>,
        cwd: impl Into<PathBuf>,
        settings: RunSettings,
    ) -> Result<Self> {
        require("exe", &settings.exe)?;
        Self::build(name, cwd, false, StepSpec::Mpirun(settings))
    }

    pub fn local(
        name: impl Into<String>,
        cwd: impl Into<PathBuf>,
        settings: RunSettings,
    ) -> Result<Self> {
        require("exe", &settings.exe)?;
        Self::build(name, cwd, false, StepSpec::Local(settings))
    }

    fn build(
        name: impl Into<String>,
        cwd: impl Into<PathBuf>,
        managed: bool,
        spec: StepSpec,
    ) -> Result<Self> {
        let name = name.into();
        require("step name", &name)?;
        Ok(Self {
            name,
            cwd: cwd.into(),
            managed,
            spec,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    /// Whether a workload manager tracks this step's lifetime.
    pub fn managed(&self) -> bool {
        self.managed
    }

    pub fn spec(&self) -> &StepSpec {
        &self.spec
    }

    pub fn kind(&self) -> StepKind {
        match self.spec {
            StepSpec::QsubBatch { .. } | StepSpec::SgeQsubBatch { .. } => StepKind::Batch,
            StepSpec::Aprun(_) | StepSpec::Mpirun(_) | StepSpec::Local(_) => StepKind::DirectRun,
        }
    }

    /// `<cwd>/<name><ending>`.
    pub fn step_file(&self, ending: &str) -> PathBuf {
        self.cwd.join(format!("{}{ending}", self.name))
    }

    /// Where the step's stdout and stderr end up.
    pub fn output_files(&self) -> (PathBuf, PathBuf) {
        (self.step_file(".out"), self.step_file(".err"))
    }

    /// Append a direct-run step's command to this batch step.
    pub fn add_to_batch(mut self, member: &Step) -> Result<Self> {
        if member.kind() != StepKind::DirectRun {
            return Err(LaunchError::Configuration(format!(
                "step `{}` is a batch step and cannot be added to batch `{}`",
                member.name, self.name
            )));
        }
        let command = member.launch_command()?;
        match &mut self.spec {
            StepSpec::QsubBatch { members, .. } | StepSpec::SgeQsubBatch { members, .. } => {
                members.push(command);
            }
            _ => {
                return Err(LaunchError::Configuration(format!(
                    "step `{}` is not a batch step",
                    self.name
                )));
            }
        }
        tracing::debug!(batch = %self.name, member = %member.name, "added step command to batch");
        Ok(self)
    }

    /// Build the command that launches this step.
    ///
    /// Batch steps write their submission script to [`Step::step_file`]
    /// first and return `[batch_cmd, script]`.
    pub fn launch_command(&self) -> Result<Vec<String>> {
        match &self.spec {
            StepSpec::QsubBatch { settings, members } => {
                let (output, error) = self.output_files();
                let mut directives = vec![
                    format!("-o {}", output.display()),
                    format!("-e {}", error.display()),
                    format!("-N {}", self.name),
                    "-V".to_string(),
                ];
                directives.extend(settings.format_batch_args());
                let script = self.write_script(
                    &settings.shebang,
                    "#PBS",
                    &directives,
                    &settings.preamble,
                    members,
                )?;
                Ok(vec![settings.batch_cmd.clone(), script.display().to_string()])
            }
            StepSpec::SgeQsubBatch { settings, members } => {
                let (output, error) = self.output_files();
                let mut directives = vec![
                    format!("-o {}", output.display()),
                    format!("-e {}", error.display()),
                    format!("-N {}", self.name),
                    "-V".to_string(),
                ];
                directives.extend(settings.format_batch_args());
                let script = self.write_script(
                    &settings.shebang,
                    "#$",
                    &directives,
                    &settings.preamble,
                    members,
                )?;
                Ok(vec![settings.batch_cmd.clone(), script.display().to_string()])
            }
            StepSpec::Aprun(settings) => {
                let mut command = vec!["aprun".to_string()];
                command.extend(settings.format_run_args());
                for (key, value) in &settings.env_vars {
                    command.push("-e".to_string());
                    command.push(format!("{key}={value}"));
                }
                command.extend(settings.exe_command());
                Ok(command)
            }
            StepSpec::Mpirun(settings) => {
                let mut command = vec!["mpirun".to_string()];
                command.extend(settings.format_run_args());
                for (key, value) in &settings.env_vars {
                    command.push("-x".to_string());
                    command.push(format!("{key}={value}"));
                }
                command.extend(settings.exe_command());
                Ok(command)
            }
            StepSpec::Local(settings) => {
                let mut command = Vec::new();
                if !settings.env_vars.is_empty() {
                    command.push("env".to_string());
                    command.extend(
                        settings
                            .env_vars
                            .iter()
                            .map(|(key, value)| format!("{key}={value}")),
                    );
                }
                command.extend(settings.exe_command());
                Ok(command)
            }
        }
    }

    fn write_script(
        &self,
        shebang: &str,
        directive: &str,
        options: &[String],
        preamble: &[String],
        members: &[Vec<String>],
    ) -> Result<PathBuf> {
        let path = self.step_file(".sh");
        let mut script = String::new();
        script.push_str(shebang);
        script.push_str("\n\n");
        for opt in options {
            script.push_str(&format!("{directive} {opt}\n"));
        }
        for line in preamble {
            script.push_str(line);
            script.push('\n');
        }
        for (i, member) in members.iter().enumerate() {
            script.push('\n');
            let words: Vec<String> = member.iter().map(|word| shell_quote(word)).collect();
            script.push_str(&format!("{} &\n", words.join(" ")));
            if i == members.len() - 1 {
                script.push_str("\nwait\n");
            }
        }

        let mut file = fs::File::create(&path).map_err(|err| LaunchError::io(&path, err))?;
        file.write_all(script.as_bytes())
            .map_err(|err| LaunchError::io(&path, err))?;
        Ok(path)
    }
}

/// Quote `word` for a POSIX shell unless it only holds characters the shell
/// passes through unchanged.
fn shell_quote(word: &str) -> String {
    let plain = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-./=:,+@%".contains(c));
    if plain {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(LaunchError::Configuration(format!("missing required {field}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_run_commands() {
        let settings = RunSettings::new("./sim")
            .with_args(["--steps", "10"])
            .with_run_arg("n", Some("4"))
            .with_env("OMP_NUM_THREADS", "2");

        let aprun = Step::aprun("a", "/tmp", settings.clone()).unwrap();
        assert_eq!(
            aprun.launch_command().unwrap(),
            vec!["aprun", "-n", "4", "-e", "OMP_NUM_THREADS=2", "./sim", "--steps", "10"]
        );

        let mpirun = Step::mpirun("m", "/tmp", settings.clone()).unwrap();
        assert_eq!(
            mpirun.launch_command().unwrap(),
            vec!["mpirun", "-n", "4", "-x", "OMP_NUM_THREADS=2", "./sim", "--steps", "10"]
        );

        let local = Step::local("l", "/tmp", settings).unwrap();
        assert_eq!(
            local.launch_command().unwrap(),
            vec!["env", "OMP_NUM_THREADS=2", "./sim", "--steps", "10"]
        );
        assert_eq!(local.kind(), StepKind::DirectRun);
        assert!(!local.managed());
    }

    #[test]
    fn missing_exe_is_rejected() {
        let err = Step::local("l", "/tmp", RunSettings::default()).unwrap_err();
        assert!(matches!(err, LaunchError::Configuration(_)));

        let err = Step::local("", "/tmp", RunSettings::new("true")).unwrap_err();
        assert!(matches!(err, LaunchError::Configuration(_)));
    }

    #[test]
    fn qsub_script_contents() {
        let dir = tempfile::tempdir().unwrap();
        let member = Step::aprun("member", dir.path(), RunSettings::new("./sim")).unwrap();
        let batch = Step::qsub_batch(
            "ens",
            dir.path(),
            QsubBatchSettings::default()
                .with_nodes(2)
                .with_preamble(["module load cray"]),
        )
        .unwrap()
        .add_to_batch(&member)
        .unwrap();

        assert_eq!(batch.kind(), StepKind::Batch);
        assert!(batch.managed());

        let command = batch.launch_command().unwrap();
        let script_path = dir.path().join("ens.sh");
        assert_eq!(command, vec!["qsub".to_string(), script_path.display().to_string()]);

        let script = fs::read_to_string(&script_path).unwrap();
        assert!(script.starts_with("#!/bin/bash\n\n"));
        assert!(script.contains(&format!("#PBS -o {}", dir.path().join("ens.out").display())));
        assert!(script.contains("#PBS -N ens\n"));
        assert!(script.contains("#PBS -V\n"));
        assert!(script.contains("#PBS -l select=2\n"));
        assert!(script.contains("module load cray\n"));
        assert!(script.contains("aprun ./sim &\n"));
        assert!(script.trim_end().ends_with("wait"));
    }

    #[test]
    fn batch_member_words_are_quoted() {
        let dir = tempfile::tempdir().unwrap();
        let member = Step::mpirun(
            "member",
            dir.path(),
            RunSettings::new("./sim")
                .with_args(["--label", "two words", "it's", "$HOME", ""])
                .with_env("MSG", "a b"),
        )
        .unwrap();
        let batch = Step::qsub_batch("ens", dir.path(), QsubBatchSettings::default())
            .unwrap()
            .add_to_batch(&member)
            .unwrap();
        batch.launch_command().unwrap();

        let script = fs::read_to_string(dir.path().join("ens.sh")).unwrap();
        assert!(script.contains(
            r#"mpirun -x 'MSG=a b' ./sim --label 'two words' 'it'\''s' '$HOME' '' &"#
        ));
    }

    #[test]
    fn shell_quote_leaves_plain_words() {
        assert_eq!(shell_quote("--nodes=2"), "--nodes=2");
        assert_eq!(shell_quote("/scratch/run.out"), "/scratch/run.out");
        assert_eq!(shell_quote("a;b"), "'a;b'");
    }

    #[test]
    fn sge_script_uses_sge_directives() {
        let dir = tempfile::tempdir().unwrap();
        let batch = Step::sge_qsub_batch("sge", dir.path(), SgeBatchSettings::default()).unwrap();
        batch.launch_command().unwrap();
        let script = fs::read_to_string(dir.path().join("sge.sh")).unwrap();
        assert!(script.contains("#$ -N sge\n"));
        assert!(!script.contains("wait"));
    }

    #[test]
    fn batch_membership_rules() {
        let batch = Step::qsub_batch("b", "/tmp", QsubBatchSettings::default()).unwrap();
        let other = batch.clone();
        assert!(matches!(
            batch.add_to_batch(&other),
            Err(LaunchError::Configuration(_))
        ));

        let local = Step::local("l", "/tmp", RunSettings::new("true")).unwrap();
        let member = local.clone();
        assert!(matches!(
            local.add_to_batch(&member),
            Err(LaunchError::Configuration(_))
        ));
    }
}
