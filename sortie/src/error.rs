use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::settings::SettingsKind;

/// Broad classes of launcher failure.
///
/// Callers that only care whether a failure is worth retrying, or whether it
/// points at bad settings, can branch on the category instead of matching
/// every [`LaunchError`] variant.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ErrorCategory {
    /// Bad or unsupported settings. Never retried.
    Configuration,
    /// A job could not be submitted or its identifier could not be found.
    Launch,
    /// The backend structurally cannot perform the request.
    Unsupported,
}

/// Errors raised by steps, backends, the supervisor and the launcher.
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("{backend} does not support {kind} settings")]
    UnsupportedSettings {
        backend: &'static str,
        kind: SettingsKind,
    },

    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("step `{0}` is already registered")]
    DuplicateStep(String),

    #[error("no step named `{0}` is registered")]
    UnknownStep(String),

    #[error(
        "batch submission `{command}` failed (exit {code:?})\nstdout: {stdout}\nstderr: {stderr}"
    )]
    SubmissionFailed {
        command: String,
        code: Option<i32>,
        stdout: String,
        stderr: String,
    },

    #[error("could not find id of launched step `{step}` after {attempts} attempts")]
    IdUnresolved { step: String, attempts: u32 },

    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("{backend} does not support {operation}")]
    Unsupported {
        backend: &'static str,
        operation: &'static str,
    },

    #[error("i/o error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl LaunchError {
    /// Classify this error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            LaunchError::UnsupportedSettings { .. }
            | LaunchError::Configuration(_)
            | LaunchError::DuplicateStep(_)
            | LaunchError::UnknownStep(_) => ErrorCategory::Configuration,
            LaunchError::SubmissionFailed { .. }
            | LaunchError::IdUnresolved { .. }
            | LaunchError::Spawn { .. }
            | LaunchError::Io { .. } => ErrorCategory::Launch,
            LaunchError::Unsupported { .. } => ErrorCategory::Unsupported,
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        LaunchError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result type for launcher operations.
pub type Result<T> = std::result::Result<T, LaunchError>;
