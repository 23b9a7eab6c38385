//! Per-task pid metadata records.
//!
//! One file per task under `<state>/orchestrator/<task_slug>.pid`. A task
//! with a live recorded pid counts as an active worker; the record also
//! carries everything the cleanup paths need to converge state after the
//! worker exits.

use crate::error::{OrchestratorError, Result};
use crate::state::{kv, timestamp, StateDir};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PidMeta {
    pub pid: i32,
    pub task_id: String,
    pub owner: String,
    pub scope: String,
    pub worktree: String,
    pub started_at: String,
    pub launch_backend: String,
    pub tmux_session: String,
    pub log_file: String,
    pub trigger: String,
}

impl PidMeta {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pid: i32,
        task_id: &str,
        owner: &str,
        scope: &str,
        worktree: &str,
        launch_backend: &str,
        tmux_session: &str,
        log_file: &str,
        trigger: &str,
    ) -> Self {
        PidMeta {
            pid,
            task_id: task_id.to_string(),
            owner: owner.to_string(),
            scope: scope.to_string(),
            worktree: worktree.to_string(),
            started_at: timestamp(),
            launch_backend: launch_backend.to_string(),
            tmux_session: tmux_session.to_string(),
            log_file: log_file.to_string(),
            trigger: trigger.to_string(),
        }
    }

    fn from_file(path: &Path) -> Option<PidMeta> {
        if !path.is_file() {
            return None;
        }
        let pid: i32 = kv::read_field(path, "pid").parse().ok()?;
        Some(PidMeta {
            pid,
            task_id: kv::read_field(path, "task_id"),
            owner: kv::read_field(path, "owner"),
            scope: kv::read_field(path, "scope"),
            worktree: kv::read_field(path, "worktree"),
            started_at: kv::read_field(path, "started_at"),
            launch_backend: kv::read_field(path, "launch_backend"),
            tmux_session: kv::read_field(path, "tmux_session"),
            log_file: kv::read_field(path, "log_file"),
            trigger: kv::read_field(path, "trigger"),
        })
    }

    pub fn load(state: &StateDir, task_id: &str) -> Option<PidMeta> {
        PidMeta::from_file(&state.pid_path(task_id))
    }

    /// All pid records in the orchestrator directory, sorted by task id.
    pub fn load_all(state: &StateDir) -> Vec<PidMeta> {
        let dir = state.orchestrator_dir();
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(_) => return Vec::new(),
        };

        let mut metas = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().map(|e| e == "pid").unwrap_or(false) {
                if let Some(meta) = PidMeta::from_file(&path) {
                    metas.push(meta);
                }
            }
        }
        metas.sort_by(|a, b| a.task_id.cmp(&b.task_id));
        metas
    }

    /// Write the record atomically (temp file then rename). A directory
    /// squatting on the pid path is a launch failure the caller must treat
    /// as fatal for the spawned worker.
    pub fn store(&self, state: &StateDir) -> Result<()> {
        let path = state.pid_path(&self.task_id);
        if path.is_dir() {
            return Err(OrchestratorError::WorkerLaunch(format!(
                "pid metadata path {} is a directory",
                path.display()
            )));
        }

        let pid = self.pid.to_string();
        kv::write_pairs(
            &path,
            &[
                ("pid", pid.as_str()),
                ("task_id", &self.task_id),
                ("owner", &self.owner),
                ("scope", &self.scope),
                ("worktree", &self.worktree),
                ("started_at", &self.started_at),
                ("launch_backend", &self.launch_backend),
                ("tmux_session", &self.tmux_session),
                ("log_file", &self.log_file),
                ("trigger", &self.trigger),
            ],
        )
        .map_err(|e| {
            OrchestratorError::WorkerLaunch(format!(
                "failed to write pid metadata {}: {}",
                path.display(),
                e
            ))
        })
    }

    /// Remove the record. Missing file is not an error.
    pub fn remove(state: &StateDir, task_id: &str) -> Result<()> {
        let path = state.pid_path(task_id);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(OrchestratorError::Io(e)),
        }
    }

    pub fn is_alive(&self) -> bool {
        crate::process::pid_alive(self.pid)
    }
}
