use std::io;

use thiserror::Error;

use crate::config::{ConfigError, PathsError};
use crate::server::ServerError;
use crate::sync::SyncError;

/// Process exit codes. Stable so scripts can tell fatal conditions apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Success = 0,
    Failure = 1,
    ConfigMissing = 2,
    ConfigInvalid = 3,
    DirsUnavailable = 4,
    BindFailed = 5,
    SyncFailed = 6,
}

impl ExitStatus {
    pub fn code(self) -> i32 {
        self as i32
    }
}

/// Top-level error of a command.
#[derive(Error, Debug)]
pub enum AppError {
    /// Per-user directories or the executable name are unavailable.
    #[error(transparent)]
    Paths(#[from] PathsError),
    /// The configuration is missing or invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The HTTP server could not bind or failed while running.
    #[error(transparent)]
    Server(#[from] ServerError),
    /// An explicit `sync` command failed.
    #[error("sync failed: {0}")]
    Sync(#[from] SyncError),
    /// The async runtime could not be started.
    #[error("failed to start async runtime: {0}")]
    Runtime(#[source] io::Error),
}

impl AppError {
    pub fn exit_status(&self) -> ExitStatus {
        match self {
            Self::Paths(_) => ExitStatus::DirsUnavailable,
            Self::Config(ConfigError::Missing(_)) => ExitStatus::ConfigMissing,
            Self::Config(_) => ExitStatus::ConfigInvalid,
            Self::Server(ServerError::Bind { .. }) => ExitStatus::BindFailed,
            Self::Server(ServerError::Serve(_)) => ExitStatus::Failure,
            Self::Sync(_) => ExitStatus::SyncFailed,
            Self::Runtime(_) => ExitStatus::Failure,
        }
    }
}
