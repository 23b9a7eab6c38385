//! Scheduler run-lock.
//!
//! A directory-based mutex: `mkdir <state>/orchestrator/run.lock` is the
//! atomic acquire, a `pid` file inside names the owner. A dead owner is
//! reclaimed exactly once. Release happens on `Drop`, so every exit path of
//! the scheduler gives the lock back; a process killed before `Drop` runs is
//! reclaimed by the next invocation's stale-owner probe.

use crate::error::{OrchestratorError, Result};
use crate::state::StateDir;
use std::path::PathBuf;

#[derive(Debug)]
pub struct RunLockGuard {
    dir: PathBuf,
    released: bool,
}

impl RunLockGuard {
    pub fn acquire(state: &StateDir) -> Result<RunLockGuard> {
        let dir = state.run_lock_dir();
        if let Some(parent) = dir.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                OrchestratorError::Config(format!(
                    "Failed to create orchestrator directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        for attempt in 0..2 {
            match std::fs::create_dir(&dir) {
                Ok(()) => {
                    std::fs::write(dir.join("pid"), format!("{}\n", std::process::id()))?;
                    return Ok(RunLockGuard {
                        dir,
                        released: false,
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    let owner = std::fs::read_to_string(dir.join("pid"))
                        .ok()
                        .and_then(|s| s.trim().parse::<i32>().ok());

                    match owner {
                        Some(pid) if crate::process::pid_alive(pid) => {
                            return Err(OrchestratorError::LockConflict(format!(
                                "scheduler already running (pid {})",
                                pid
                            )));
                        }
                        _ => {
                            if attempt > 0 {
                                return Err(OrchestratorError::LockConflict(
                                    "run lock is contended".to_string(),
                                ));
                            }
                            tracing::warn!(
                                "Reclaiming stale run lock at {} (owner {:?})",
                                dir.display(),
                                owner
                            );
                            let _ = std::fs::remove_dir_all(&dir);
                        }
                    }
                }
                Err(e) => return Err(OrchestratorError::Io(e)),
            }
        }

        Err(OrchestratorError::LockConflict(
            "run lock is contended".to_string(),
        ))
    }

    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Err(e) = std::fs::remove_dir_all(&self.dir) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("Failed to release run lock {}: {}", self.dir.display(), e);
            }
        }
    }
}

impl Drop for RunLockGuard {
    fn drop(&mut self) {
        self.release_inner();
    }
}
