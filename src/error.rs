use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, OrchestratorError>;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Not a git repository: {0}")]
    NotAGitRepository(PathBuf),

    #[error("Git error: {0}")]
    Git(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Missing prerequisite: {0}")]
    MissingPrerequisite(String),

    #[error("Lock conflict: {0}")]
    LockConflict(String),

    #[error("State invariant: {0}")]
    StateInvariant(String),

    #[error("Merge failed: {0}")]
    MergeFailed(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Rejected: {0}")]
    Rejected(String),

    #[error("Worker launch failed: {0}")]
    WorkerLaunch(String),

    #[error("JSON error: {0}")]
    Json(String),
}

impl From<serde_json::Error> for OrchestratorError {
    fn from(err: serde_json::Error) -> Self {
        OrchestratorError::Json(err.to_string())
    }
}
