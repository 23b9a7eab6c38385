use std::path::{Path, PathBuf};

/// Overrides the state directory for agent-side calls made from a worktree.
pub const STATE_DIR_ENV: &str = "AI_STATE_DIR";

/// Set to `1` to permit running the scheduler from a non-primary worktree.
pub const ALLOW_WORKTREE_RUN_ENV: &str = "AI_ORCH_ALLOW_WORKTREE_RUN";

pub fn expand_tilde(path: &str) -> PathBuf {
    let path = path.trim();
    if let Some(rest) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(rest);
        }
    } else if path == "~" {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home);
        }
    }
    PathBuf::from(path)
}

/// Resolve the state directory: `--state-dir` flag, then `AI_STATE_DIR`,
/// then `<repo>/.state`. The directory may live outside the repository.
pub fn resolve_state_dir(flag: Option<&Path>, repo_root: &Path) -> PathBuf {
    if let Some(dir) = flag {
        return dir.to_path_buf();
    }
    if let Ok(env_dir) = std::env::var(STATE_DIR_ENV) {
        if !env_dir.trim().is_empty() {
            return expand_tilde(&env_dir);
        }
    }
    repo_root.join(".state")
}

/// Physical-path comparison. Symlinks in either argument are followed;
/// missing paths fall back to the lexical form.
pub fn same_physical_path(a: &Path, b: &Path) -> bool {
    let ca = a.canonicalize().unwrap_or_else(|_| a.to_path_buf());
    let cb = b.canonicalize().unwrap_or_else(|_| b.to_path_buf());
    ca == cb
}

pub fn allow_worktree_run() -> bool {
    std::env::var(ALLOW_WORKTREE_RUN_ENV)
        .map(|v| v == "1")
        .unwrap_or(false)
}
