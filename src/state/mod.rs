pub mod kv;
pub mod lock;
pub mod pidmeta;
pub mod registry;
pub mod runlock;
pub mod updates;

pub use lock::ScopeLock;
pub use pidmeta::PidMeta;
pub use runlock::RunLockGuard;

use std::path::{Path, PathBuf};

/// Handle on the shared state directory. All orchestrator-visible paths are
/// derived here so every component agrees on the layout:
///
/// ```text
/// <state>/
///   orchestrator.toml
///   orchestrator/
///     run.lock/pid
///     <task_slug>.pid
///     active_pids.tsv
///     logs/
///   locks/<scope>.lock
///   LATEST_UPDATES.md
/// ```
#[derive(Debug, Clone)]
pub struct StateDir {
    root: PathBuf,
}

impl StateDir {
    pub fn new(root: PathBuf) -> Self {
        StateDir { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn orchestrator_dir(&self) -> PathBuf {
        self.root.join("orchestrator")
    }

    pub fn locks_dir(&self) -> PathBuf {
        self.root.join("locks")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.orchestrator_dir().join("logs")
    }

    pub fn run_lock_dir(&self) -> PathBuf {
        self.orchestrator_dir().join("run.lock")
    }

    pub fn lock_path(&self, scope: &str) -> PathBuf {
        self.locks_dir().join(format!("{}.lock", scope))
    }

    pub fn pid_path(&self, task_id: &str) -> PathBuf {
        self.orchestrator_dir()
            .join(format!("{}.pid", crate::git::slug(task_id)))
    }

    pub fn registry_path(&self) -> PathBuf {
        self.orchestrator_dir().join("active_pids.tsv")
    }

    pub fn updates_path(&self) -> PathBuf {
        self.root.join("LATEST_UPDATES.md")
    }
}

pub fn timestamp() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}
