use std::path::PathBuf;
use thiserror::Error;

use impact_core::{DigestError, InputError, PropertyError};

/// Failures of a spawned Impact-T process in streaming mode.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("command is empty")]
    EmptyCommand,

    #[error("failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed reading output of '{command}': {source}")]
    Read {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{command}' exited with code {code}")]
    NonZeroExit { code: i32, command: String },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read run config '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse run config '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Failures surfaced by the run orchestrator. Errors raised while a run is
/// executing are recorded in `RunInfo` instead of being returned.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Input(#[from] InputError),

    #[error(transparent)]
    Property(#[from] PropertyError),

    #[error(transparent)]
    Digest(#[from] DigestError),

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("workspace error at '{path}': {source}")]
    Workspace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("archive error: {0}")]
    Archive(String),

    #[error("run is not configured")]
    NotConfigured,

    #[error("no workspace allocated")]
    NoWorkspace,

    #[error("workspace is in use by a running process")]
    Busy,

    #[error("no Impact-T executable configured (set impact_bin or $IMPACTT_BIN)")]
    MissingExecutable,

    #[error("Impact-T executable not found: {0}")]
    ExecutableNotFound(PathBuf),
}

impl RunError {
    pub fn workspace(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Workspace {
            path: path.into(),
            source,
        }
    }
}

impl From<zip::result::ZipError> for RunError {
    fn from(err: zip::result::ZipError) -> Self {
        Self::Archive(err.to_string())
    }
}

impl From<serde_json::Error> for RunError {
    fn from(err: serde_json::Error) -> Self {
        Self::Archive(err.to_string())
    }
}
