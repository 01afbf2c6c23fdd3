use std::path::PathBuf;

use crate::models::ProjectStatus;

#[derive(Debug, thiserror::Error)]
pub enum WharfError {
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("project '{id}' cannot move from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: ProjectStatus,
        to: ProjectStatus,
    },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("project '{0}' not found")]
    NotFound(String),

    #[error("no free port in range {start}-{end}")]
    PortExhaustion { start: u16, end: u16 },

    #[error("repository fetch failed: {0}")]
    Fetch(String),

    #[error("build failed: {0}")]
    Build(String),

    #[error("container runtime failed: {0}")]
    Runtime(String),

    #[error("registry operation failed: {0}")]
    Registry(String),

    #[error("config file not found at {0}")]
    ConfigNotFound(PathBuf),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, WharfError>;
