//! Launch failures, one variant per step. Every variant is fatal; the
//! variant decides the launcher's exit code.

use std::path::PathBuf;

#[derive(thiserror::Error, Debug)]
pub enum LaunchError {
    #[error("Invalid configuration: {0:#}")]
    Config(anyhow::Error),

    #[error("Failed to create environment at {}: {reason}", .path.display())]
    EnvCreate { path: PathBuf, reason: String },

    #[error("Failed to activate environment at {}: {reason}", .path.display())]
    EnvActivate { path: PathBuf, reason: String },

    #[error("Dependency manifest not found: {}", .0.display())]
    ManifestMissing(PathBuf),

    #[error("Dependency install failed (exit code {code:?})")]
    Install { code: Option<i32> },

    #[error("Failed to start server '{program}': {reason}")]
    ServerSpawn { program: String, reason: String },

    #[error("{0}")]
    Internal(#[from] anyhow::Error),
}

impl LaunchError {
    /// Machine readable error code
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Config(_) => "INVALID_CONFIG",
            Self::EnvCreate { .. } => "ENV_CREATE_FAILED",
            Self::EnvActivate { .. } => "ENV_ACTIVATE_FAILED",
            Self::ManifestMissing(_) => "MANIFEST_MISSING",
            Self::Install { .. } => "INSTALL_FAILED",
            Self::ServerSpawn { .. } => "SERVER_SPAWN_FAILED",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Process exit code reported when the launch aborts with this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Internal(_) => 1,
            Self::Config(_) => 2,
            Self::EnvCreate { .. } => 3,
            Self::EnvActivate { .. } => 4,
            Self::ManifestMissing(_) => 5,
            Self::Install { .. } => 6,
            Self::ServerSpawn { .. } => 7,
        }
    }
}
