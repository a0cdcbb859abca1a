use std::collections::BTreeMap;
use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// Launch settings handed to [`crate::Launcher::create_step`].
///
/// The variant decides which kind of step a backend builds. Backends match
/// on it exhaustively and reject the variants they cannot launch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LaunchSettings {
    /// PBS Professional `qsub` batch submission.
    QsubBatch(QsubBatchSettings),
    /// Grid Engine `qsub` batch submission.
    SgeQsubBatch(SgeBatchSettings),
    /// Cray ALPS `aprun` parallel launch.
    Aprun(RunSettings),
    /// `mpirun` parallel launch.
    Mpirun(RunSettings),
    /// Plain local process.
    Local(RunSettings),
}

impl LaunchSettings {
    pub fn kind(&self) -> SettingsKind {
        match self {
            LaunchSettings::QsubBatch(_) => SettingsKind::QsubBatch,
            LaunchSettings::SgeQsubBatch(_) => SettingsKind::SgeQsubBatch,
            LaunchSettings::Aprun(_) => SettingsKind::Aprun,
            LaunchSettings::Mpirun(_) => SettingsKind::Mpirun,
            LaunchSettings::Local(_) => SettingsKind::Local,
        }
    }
}

/// Fieldless mirror of [`LaunchSettings`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum SettingsKind {
    QsubBatch,
    SgeQsubBatch,
    Aprun,
    Mpirun,
    Local,
}

impl SettingsKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SettingsKind::QsubBatch => "qsub-batch",
            SettingsKind::SgeQsubBatch => "sge-qsub-batch",
            SettingsKind::Aprun => "aprun",
            SettingsKind::Mpirun => "mpirun",
            SettingsKind::Local => "local",
        }
    }
}

impl Display for SettingsKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Settings for a directly-run executable.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSettings {
    pub exe: String,
    #[serde(default)]
    pub exe_args: Vec<String>,
    /// Arguments for the parallel launcher. A `None` value renders the flag
    /// alone.
    #[serde(default)]
    pub run_args: BTreeMap<String, Option<String>>,
    #[serde(default)]
    pub env_vars: BTreeMap<String, String>,
}

impl RunSettings {
    pub fn new(exe: impl Into<String>) -> Self {
        Self {
            exe: exe.into(),
            ..Self::default()
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exe_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_run_arg(mut self, key: impl Into<String>, value: Option<&str>) -> Self {
        self.run_args.insert(key.into(), value.map(str::to_string));
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_vars.insert(key.into(), value.into());
        self
    }

    /// `-k v` for single-letter keys, `--key=v` otherwise.
    pub fn format_run_args(&self) -> Vec<String> {
        let mut formatted = Vec::new();
        for (key, value) in &self.run_args {
            let key = key.trim_start_matches('-');
            match value {
                Some(value) if key.len() == 1 => {
                    formatted.push(format!("-{key}"));
                    formatted.push(value.clone());
                }
                Some(value) => formatted.push(format!("--{key}={value}")),
                None if key.len() == 1 => formatted.push(format!("-{key}")),
                None => formatted.push(format!("--{key}")),
            }
        }
        formatted
    }

    /// The executable followed by its arguments.
    pub fn exe_command(&self) -> Vec<String> {
        let mut command = Vec::with_capacity(self.exe_args.len() + 1);
        command.push(self.exe.clone());
        command.extend(self.exe_args.iter().cloned());
        command
    }
}

fn default_batch_cmd() -> String {
    "qsub".to_string()
}

fn default_shebang() -> String {
    "#!/bin/bash".to_string()
}

/// Settings for a PBS Professional batch job.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QsubBatchSettings {
    #[serde(default = "default_batch_cmd")]
    pub batch_cmd: String,
    #[serde(default = "default_shebang")]
    pub shebang: String,
    #[serde(default)]
    pub nodes: Option<u32>,
    #[serde(default)]
    pub ncpus: Option<u32>,
    /// Walltime as `HH:MM:SS`.
    #[serde(default)]
    pub time: Option<String>,
    #[serde(default)]
    pub queue: Option<String>,
    #[serde(default)]
    pub account: Option<String>,
    /// Extra `-l key=value` resource requests.
    #[serde(default)]
    pub resources: BTreeMap<String, String>,
    #[serde(default)]
    pub batch_args: BTreeMap<String, Option<String>>,
    /// Lines written to the script before the step commands.
    #[serde(default)]
    pub preamble: Vec<String>,
}

impl Default for QsubBatchSettings {
    fn default() -> Self {
        Self {
            batch_cmd: default_batch_cmd(),
            shebang: default_shebang(),
            nodes: None,
            ncpus: None,
            time: None,
            queue: None,
            account: None,
            resources: BTreeMap::new(),
            batch_args: BTreeMap::new(),
            preamble: Vec::new(),
        }
    }
}

impl QsubBatchSettings {
    pub fn with_nodes(mut self, nodes: u32) -> Self {
        self.nodes = Some(nodes);
        self
    }

    pub fn with_ncpus(mut self, ncpus: u32) -> Self {
        self.ncpus = Some(ncpus);
        self
    }

    pub fn with_walltime(mut self, time: impl Into<String>) -> Self {
        self.time = Some(time.into());
        self
    }

    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    pub fn with_account(mut self, account: impl Into<String>) -> Self {
        self.account = Some(account.into());
        self
    }

    pub fn with_batch_cmd(mut self, batch_cmd: impl Into<String>) -> Self {
        self.batch_cmd = batch_cmd.into();
        self
    }

    pub fn with_preamble<I, S>(mut self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.preamble = lines.into_iter().map(Into::into).collect();
        self
    }

    /// Directive arguments, one per `#PBS` line.
    pub fn format_batch_args(&self) -> Vec<String> {
        let mut opts = Vec::new();
        match (self.nodes, self.ncpus) {
            (Some(nodes), Some(ncpus)) => opts.push(format!("-l select={nodes}:ncpus={ncpus}")),
            (Some(nodes), None) => opts.push(format!("-l select={nodes}")),
            (None, Some(ncpus)) => opts.push(format!("-l select=1:ncpus={ncpus}")),
            (None, None) => {}
        }
        if let Some(time) = &self.time {
            opts.push(format!("-l walltime={time}"));
        }
        if let Some(queue) = &self.queue {
            opts.push(format!("-q {queue}"));
        }
        if let Some(account) = &self.account {
            opts.push(format!("-A {account}"));
        }
        for (key, value) in &self.resources {
            opts.push(format!("-l {key}={value}"));
        }
        opts.extend(format_free_args(&self.batch_args));
        opts
    }
}

/// Settings for a Grid Engine batch job.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SgeBatchSettings {
    #[serde(default = "default_batch_cmd")]
    pub batch_cmd: String,
    #[serde(default = "default_shebang")]
    pub shebang: String,
    #[serde(default)]
    pub ncpus: Option<u32>,
    /// Parallel environment used together with `ncpus`.
    #[serde(default)]
    pub pe_type: Option<String>,
    #[serde(default)]
    pub time: Option<String>,
    #[serde(default)]
    pub queue: Option<String>,
    #[serde(default)]
    pub account: Option<String>,
    #[serde(default)]
    pub resources: BTreeMap<String, String>,
    #[serde(default)]
    pub batch_args: BTreeMap<String, Option<String>>,
    #[serde(default)]
    pub preamble: Vec<String>,
}

impl Default for SgeBatchSettings {
    fn default() -> Self {
        Self {
            batch_cmd: default_batch_cmd(),
            shebang: default_shebang(),
            ncpus: None,
            pe_type: None,
            time: None,
            queue: None,
            account: None,
            resources: BTreeMap::new(),
            batch_args: BTreeMap::new(),
            preamble: Vec::new(),
        }
    }
}

impl SgeBatchSettings {
    pub fn with_ncpus(mut self, pe_type: impl Into<String>, ncpus: u32) -> Self {
        self.pe_type = Some(pe_type.into());
        self.ncpus = Some(ncpus);
        self
    }

    pub fn with_walltime(mut self, time: impl Into<String>) -> Self {
        self.time = Some(time.into());
        self
    }

    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    pub fn with_batch_cmd(mut self, batch_cmd: impl Into<String>) -> Self {
        self.batch_cmd = batch_cmd.into();
        self
    }

    pub fn with_preamble<I, S>(mut self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.preamble = lines.into_iter().map(Into::into).collect();
        self
    }

    /// Directive arguments, one per `#$` line.
    pub fn format_batch_args(&self) -> Vec<String> {
        let mut opts = Vec::new();
        if let (Some(pe), Some(ncpus)) = (&self.pe_type, self.ncpus) {
            opts.push(format!("-pe {pe} {ncpus}"));
        }
        if let Some(time) = &self.time {
            opts.push(format!("-l h_rt={time}"));
        }
        if let Some(queue) = &self.queue {
            opts.push(format!("-q {queue}"));
        }
        if let Some(account) = &self.account {
            opts.push(format!("-A {account}"));
        }
        for (key, value) in &self.resources {
            opts.push(format!("-l {key}={value}"));
        }
        opts.extend(format_free_args(&self.batch_args));
        opts
    }
}

fn format_free_args(args: &BTreeMap<String, Option<String>>) -> Vec<String> {
    args.iter()
        .map(|(key, value)| {
            let key = key.trim_start_matches('-');
            match value {
                Some(value) => format!("-{key} {value}"),
                None => format!("-{key}"),
            }
        })
        .collect()
}
