//! Per-scope lock files.
//!
//! A scope is a mutex domain: at most one active lock per scope. The file
//! carries payload, so acquisition uses `O_EXCL` create semantics rather
//! than a lock directory.

use crate::error::{OrchestratorError, Result};
use crate::state::{kv, timestamp, StateDir};
use std::io::Write;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeLock {
    pub owner: String,
    pub scope: String,
    pub task_id: String,
    pub branch: String,
    pub worktree: String,
    pub created_at: String,
    pub heartbeat_at: String,
}

impl ScopeLock {
    pub fn new(owner: &str, scope: &str, task_id: &str, branch: &str, worktree: &str) -> Self {
        let now = timestamp();
        ScopeLock {
            owner: owner.to_string(),
            scope: scope.to_string(),
            task_id: task_id.to_string(),
            branch: branch.to_string(),
            worktree: worktree.to_string(),
            created_at: now.clone(),
            heartbeat_at: now,
        }
    }

    fn render(&self) -> String {
        format!(
            "owner={}\nscope={}\ntask_id={}\nbranch={}\nworktree={}\ncreated_at={}\nheartbeat_at={}\n",
            self.owner,
            self.scope,
            self.task_id,
            self.branch,
            self.worktree,
            self.created_at,
            self.heartbeat_at
        )
    }

    pub fn load(state: &StateDir, scope: &str) -> Option<ScopeLock> {
        let path = state.lock_path(scope);
        if !path.is_file() {
            return None;
        }
        Some(ScopeLock {
            owner: kv::read_field(&path, "owner"),
            scope: kv::read_field(&path, "scope"),
            task_id: kv::read_field(&path, "task_id"),
            branch: kv::read_field(&path, "branch"),
            worktree: kv::read_field(&path, "worktree"),
            created_at: kv::read_field(&path, "created_at"),
            heartbeat_at: kv::read_field(&path, "heartbeat_at"),
        })
    }

    pub fn load_all(state: &StateDir) -> Vec<ScopeLock> {
        let dir = state.locks_dir();
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(_) => return Vec::new(),
        };

        let mut locks = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(scope) = name.strip_suffix(".lock") {
                if let Some(lock) = ScopeLock::load(state, scope) {
                    locks.push(lock);
                }
            }
        }
        locks.sort_by(|a, b| a.scope.cmp(&b.scope));
        locks
    }

    /// Create the lock file, failing atomically when the scope is already
    /// held. A lock held by the same owner for the same task is kept as-is.
    pub fn acquire(&self, state: &StateDir) -> Result<()> {
        let path = state.lock_path(&self.scope);
        std::fs::create_dir_all(state.locks_dir()).map_err(|e| {
            OrchestratorError::Config(format!("Failed to create locks directory: {}", e))
        })?;

        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(mut file) => {
                file.write_all(self.render().as_bytes())?;
                file.sync_all()?;
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                match ScopeLock::load(state, &self.scope) {
                    Some(existing)
                        if existing.owner == self.owner && existing.task_id == self.task_id =>
                    {
                        tracing::debug!(
                            "Scope '{}' already locked by {} for {}, keeping existing lock",
                            self.scope,
                            self.owner,
                            self.task_id
                        );
                        Ok(())
                    }
                    Some(existing) => Err(OrchestratorError::LockConflict(format!(
                        "scope '{}' is held by {} for {}",
                        self.scope, existing.owner, existing.task_id
                    ))),
                    None => Err(OrchestratorError::LockConflict(format!(
                        "scope '{}' lock exists but is unreadable at {}",
                        self.scope,
                        path.display()
                    ))),
                }
            }
            Err(e) => Err(OrchestratorError::Io(e)),
        }
    }

    /// Rewrite `heartbeat_at`. The whole record is rewritten atomically.
    pub fn heartbeat(state: &StateDir, owner: &str, scope: &str) -> Result<()> {
        let mut lock = ScopeLock::load(state, scope).ok_or_else(|| {
            OrchestratorError::NotFound(format!("no lock for scope '{}'", scope))
        })?;

        if lock.owner != owner {
            return Err(OrchestratorError::StateInvariant(format!(
                "lock for scope '{}' is owned by {}, not {}",
                scope, lock.owner, owner
            )));
        }

        lock.heartbeat_at = timestamp();
        kv::write_atomic(&state.lock_path(scope), &lock.render())
    }

    /// Remove the lock for `scope` when owned by `owner`. Missing lock is an
    /// error; owner mismatch is a state invariant violation.
    pub fn release(state: &StateDir, owner: &str, scope: &str) -> Result<()> {
        let lock = ScopeLock::load(state, scope).ok_or_else(|| {
            OrchestratorError::NotFound(format!("no lock for scope '{}'", scope))
        })?;

        if lock.owner != owner {
            return Err(OrchestratorError::StateInvariant(format!(
                "lock for scope '{}' is owned by {}, not {}",
                scope, lock.owner, owner
            )));
        }

        std::fs::remove_file(state.lock_path(scope))?;
        Ok(())
    }

    /// Best-effort removal used by cleanup paths: removes the lock only when
    /// it still points at `task_id`. Returns whether a file was removed.
    pub fn release_if_task(state: &StateDir, scope: &str, task_id: &str) -> bool {
        match ScopeLock::load(state, scope) {
            Some(lock) if lock.task_id == task_id => {
                std::fs::remove_file(state.lock_path(scope)).is_ok()
            }
            _ => false,
        }
    }
}
