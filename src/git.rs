use crate::config::paths::same_physical_path;
use crate::config::MergeStrategy;
use crate::error::{OrchestratorError, Result};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

const MAX_ATTEMPTS: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 100;

fn is_transient_git_error(error: &OrchestratorError) -> bool {
    match error {
        OrchestratorError::Config(msg) | OrchestratorError::Git(msg) => {
            let lower = msg.to_lowercase();
            lower.contains("index.lock")
                || lower.contains("unable to create")
                || lower.contains("file exists")
                || lower.contains("could not lock")
        }
        _ => false,
    }
}

fn with_retry<T, F>(operation: F, description: &str) -> Result<T>
where
    F: Fn() -> Result<T>,
{
    let mut last_error = None;

    for attempt in 0..MAX_ATTEMPTS {
        match operation() {
            Ok(result) => return Ok(result),
            Err(e) => {
                last_error = Some(e);

                if attempt < MAX_ATTEMPTS - 1
                    && is_transient_git_error(last_error.as_ref().unwrap())
                {
                    let backoff = INITIAL_BACKOFF_MS * 2_u64.pow(attempt);
                    tracing::warn!(
                        "{} failed (attempt {}/{}), retrying in {}ms...",
                        description,
                        attempt + 1,
                        MAX_ATTEMPTS,
                        backoff
                    );
                    thread::sleep(Duration::from_millis(backoff));
                } else {
                    break;
                }
            }
        }
    }

    Err(last_error.unwrap())
}

fn run_git(workdir: &Path, args: &[&str], error_prefix: &str) -> Result<std::process::Output> {
    let output = std::process::Command::new("git")
        .args(args)
        .current_dir(workdir)
        .output()
        .map_err(|e| {
            OrchestratorError::Config(format!(
                "Failed to execute 'git {}' in {}: {}",
                args.join(" "),
                workdir.display(),
                e
            ))
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(OrchestratorError::Git(format!(
            "{}: {}",
            error_prefix,
            stderr.trim()
        )));
    }

    Ok(output)
}

fn git_stdout(workdir: &Path, args: &[&str], error_prefix: &str) -> Result<String> {
    let output = run_git(workdir, args, error_prefix)?;
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Lowercase slug used in branch names, worktree directory names, and pid
/// file names: runs of non-alphanumeric characters collapse to `-`.
pub fn slug(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut pending_dash = false;

    for ch in input.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.push(ch.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }

    out
}

/// Task branches all live under this prefix; the completion pipeline refuses
/// to run from a branch outside it.
pub const BRANCH_PREFIX: &str = "codex/";

pub fn branch_name(agent: &str, task_id: &str) -> String {
    format!("{}{}-{}", BRANCH_PREFIX, slug(agent), slug(task_id))
}

#[derive(Clone)]
pub struct GitRepo {
    pub repo_name: String,
    pub workdir: PathBuf,
    pub git_dir: PathBuf,
}

impl GitRepo {
    pub fn discover() -> Result<Self> {
        let current_dir = std::env::current_dir().map_err(|e| {
            OrchestratorError::Config(format!("Failed to get current directory: {}", e))
        })?;
        Self::from_path(&current_dir)
    }

    pub fn from_path(start_dir: &Path) -> Result<Self> {
        let (git_dir, workdir) = find_git_dir(start_dir)?;

        let repo_name = workdir
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                OrchestratorError::Config("Could not determine repo name".to_string())
            })?
            .to_string();

        Ok(GitRepo {
            repo_name,
            workdir,
            git_dir,
        })
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    pub fn repo_name(&self) -> &str {
        &self.repo_name
    }

    /// Whether this checkout is the primary clone rather than a linked
    /// worktree. The primary has a `.git` directory; linked worktrees carry
    /// a `.git` file pointing into `<primary>/.git/worktrees/<name>`.
    pub fn is_primary(&self) -> bool {
        self.workdir.join(".git").is_dir()
    }

    /// Resolve the primary repository for this checkout. From the primary
    /// clone this is an identity operation.
    pub fn primary(&self) -> Result<GitRepo> {
        if self.is_primary() {
            return Ok(self.clone());
        }

        let common = git_stdout(
            &self.workdir,
            &["rev-parse", "--git-common-dir"],
            "Failed to resolve git common dir",
        )?;
        let common_path = if Path::new(&common).is_absolute() {
            PathBuf::from(&common)
        } else {
            self.workdir.join(&common)
        };
        let common_path = common_path
            .canonicalize()
            .unwrap_or(common_path);

        let primary_workdir = common_path.parent().ok_or_else(|| {
            OrchestratorError::Config(format!("Invalid git common dir: {}", common))
        })?;

        GitRepo::from_path(primary_workdir)
    }

    pub fn current_branch(&self) -> Result<String> {
        git_stdout(
            &self.workdir,
            &["symbolic-ref", "--short", "HEAD"],
            "Failed to resolve current branch",
        )
    }

    pub fn branch_exists(&self, branch: &str) -> bool {
        let branch_ref = format!("refs/heads/{}", branch);

        std::process::Command::new("git")
            .args(["show-ref", "--verify", "--quiet", &branch_ref])
            .current_dir(&self.workdir)
            .output()
            .map(|output| output.status.success())
            .unwrap_or(false)
    }

    pub fn create_branch(&self, branch: &str, start_point: &str) -> Result<()> {
        run_git(
            &self.workdir,
            &["branch", branch, start_point],
            "Failed to create branch",
        )?;
        Ok(())
    }

    pub fn delete_branch(&self, branch: &str, force: bool) -> Result<()> {
        let flag = if force { "-D" } else { "-d" };
        run_git(
            &self.workdir,
            &["branch", flag, branch],
            "Failed to delete branch",
        )?;
        Ok(())
    }

    /// `(branch, path)` pairs from `git worktree list --porcelain`. The
    /// primary checkout appears first with its own branch.
    pub fn list_worktrees(&self) -> Result<Vec<(String, PathBuf)>> {
        let output = git_stdout(
            &self.workdir,
            &["worktree", "list", "--porcelain"],
            "Failed to list worktrees",
        )?;

        let mut worktrees = Vec::new();
        let mut current_path: Option<PathBuf> = None;

        for line in output.lines() {
            if let Some(path) = line.strip_prefix("worktree ") {
                current_path = Some(PathBuf::from(path));
            } else if let Some(branch_ref) = line.strip_prefix("branch ") {
                if let Some(path) = current_path.take() {
                    let branch = branch_ref
                        .strip_prefix("refs/heads/")
                        .unwrap_or(branch_ref)
                        .to_string();
                    worktrees.push((branch, path));
                }
            } else if line == "detached" || line.starts_with("bare") {
                current_path = None;
            }
        }

        Ok(worktrees)
    }

    pub fn find_worktree_for_branch(&self, branch: &str) -> Result<Option<PathBuf>> {
        Ok(self
            .list_worktrees()?
            .into_iter()
            .find(|(b, _)| b == branch)
            .map(|(_, path)| path))
    }

    fn add_worktree(&self, path: &Path, branch: &str) -> Result<()> {
        let parent = path.parent().ok_or_else(|| {
            OrchestratorError::Config(format!("Invalid worktree path: {}", path.display()))
        })?;
        std::fs::create_dir_all(parent).map_err(|e| {
            OrchestratorError::Config(format!(
                "Failed to create parent directory {}: {}",
                parent.display(),
                e
            ))
        })?;

        let path_str = path.to_string_lossy();
        with_retry(
            || {
                run_git(
                    &self.workdir,
                    &["worktree", "add", &path_str, branch],
                    "Failed to create worktree",
                )?;
                Ok(())
            },
            "worktree add",
        )
    }

    /// Prune stale `.git/worktrees/<name>` entries whose directories are
    /// already gone.
    pub fn prune_worktrees(&self) -> Result<()> {
        run_git(
            &self.workdir,
            &["worktree", "prune"],
            "Failed to prune worktrees",
        )?;
        Ok(())
    }

    pub fn remove_worktree(&self, worktree_path: &Path, force: bool) -> Result<()> {
        let path_str = worktree_path.to_string_lossy();

        let mut args = vec!["worktree", "remove"];
        if force {
            args.push("--force");
        }
        args.push(&path_str);

        let output = std::process::Command::new("git")
            .args(&args)
            .current_dir(&self.workdir)
            .output()
            .map_err(|e| {
                OrchestratorError::Config(format!(
                    "Failed to execute 'git worktree remove' in {}: {}",
                    self.workdir.display(),
                    e
                ))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stderr_lower = stderr.to_lowercase();

            // The directory may already be gone from a previous partial
            // cleanup; prune clears the stale reference instead.
            if stderr_lower.contains("is not a working tree")
                || stderr_lower.contains("no such file or directory")
                || stderr_lower.contains("does not exist")
            {
                tracing::debug!("Worktree directory missing, falling back to git worktree prune");
                return self.prune_worktrees();
            }

            return Err(OrchestratorError::Git(format!(
                "Failed to remove worktree: {}",
                stderr.trim()
            )));
        }

        Ok(())
    }

    /// Tracked modifications only; untracked files do not count.
    pub fn has_tracked_changes(&self) -> Result<bool> {
        let output = run_git(
            &self.workdir,
            &["status", "--porcelain", "-uno"],
            "Failed to check for uncommitted changes",
        )?;
        Ok(!output.stdout.is_empty())
    }

    pub fn is_ancestor(&self, ancestor: &str, descendant: &str) -> Result<bool> {
        let status = std::process::Command::new("git")
            .args(["merge-base", "--is-ancestor", ancestor, descendant])
            .current_dir(&self.workdir)
            .status()
            .map_err(|e| {
                OrchestratorError::Config(format!("Failed to execute 'git merge-base': {}", e))
            })?;
        Ok(status.success())
    }
}

/// Canonical worktree path for an agent/task pair:
/// `<parent>/<repo_name>-<agent_slug>-<task_slug>`.
pub fn agent_worktree_path(
    repo: &GitRepo,
    parent_dir: &Path,
    agent: &str,
    task_id: &str,
) -> PathBuf {
    parent_dir.join(format!(
        "{}-{}-{}",
        repo.repo_name(),
        slug(agent),
        slug(task_id)
    ))
}

/// Create (or locate) the worktree/branch pair for a task.
///
/// A directory squatting on the canonical path that is not a worktree of
/// this repository is quarantined by an atomic rename to
/// `<path>.orphan-<timestamp>` and left for manual inspection.
pub fn ensure_agent_worktree(
    repo: &GitRepo,
    agent: &str,
    task_id: &str,
    base_branch: &str,
    parent_dir: &Path,
) -> Result<PathBuf> {
    let branch = branch_name(agent, task_id);
    let path = agent_worktree_path(repo, parent_dir, agent, task_id);

    if let Some(existing) = repo.find_worktree_for_branch(&branch)? {
        if same_physical_path(&existing, &path) {
            tracing::debug!("Reusing existing worktree at {}", existing.display());
            return Ok(existing);
        }
        return Err(OrchestratorError::StateInvariant(format!(
            "branch {} is checked out at {}, expected {}",
            branch,
            existing.display(),
            path.display()
        )));
    }

    if path.exists() {
        let quarantine = path.with_file_name(format!(
            "{}.orphan-{}",
            path.file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "worktree".to_string()),
            chrono::Utc::now().timestamp()
        ));
        std::fs::rename(&path, &quarantine).map_err(|e| {
            OrchestratorError::StateInvariant(format!(
                "cannot quarantine orphaned directory {}: {}",
                path.display(),
                e
            ))
        })?;
        println!(
            "quarantined stale worktree path: {} -> {}",
            path.display(),
            quarantine.display()
        );
    }

    if !repo.branch_exists(&branch) {
        repo.create_branch(&branch, base_branch)?;
    }
    repo.add_worktree(&path, &branch)?;

    Ok(path)
}

/// Merge `branch` into `base` in the primary repository.
///
/// Refuses when the primary has tracked uncommitted changes. Already-merged
/// branches are a no-op. A failed fast-forward under `rebase-then-ff`
/// rebases the branch in its worktree (aborting on conflict) and retries
/// fast-forward once.
pub fn merge_into(
    primary: &GitRepo,
    base: &str,
    branch: &str,
    worktree_path: &Path,
    strategy: MergeStrategy,
) -> Result<()> {
    if primary.has_tracked_changes()? {
        return Err(OrchestratorError::StateInvariant(format!(
            "primary repository {} has tracked uncommitted changes",
            primary.workdir().display()
        )));
    }

    if primary.is_ancestor(branch, base)? {
        tracing::debug!("Branch {} already merged into {}", branch, base);
        return Ok(());
    }

    match fast_forward(primary, base, branch) {
        Ok(()) => return Ok(()),
        Err(ff_err) => {
            if strategy == MergeStrategy::FfOnly {
                return Err(OrchestratorError::MergeFailed(format!(
                    "fast-forward of {} into {} failed: {}",
                    branch, base, ff_err
                )));
            }
            tracing::debug!(
                "Fast-forward failed ({}), rebasing {} onto {}",
                ff_err,
                branch,
                base
            );
        }
    }

    if let Err(rebase_err) = run_git(worktree_path, &["rebase", base], "Rebase failed") {
        let _ = std::process::Command::new("git")
            .args(["rebase", "--abort"])
            .current_dir(worktree_path)
            .output();
        return Err(OrchestratorError::MergeFailed(format!(
            "rebase of {} onto {} aborted: {}",
            branch, base, rebase_err
        )));
    }

    fast_forward(primary, base, branch).map_err(|e| {
        OrchestratorError::MergeFailed(format!(
            "fast-forward of {} into {} failed after rebase: {}",
            branch, base, e
        ))
    })
}

fn fast_forward(primary: &GitRepo, base: &str, branch: &str) -> Result<()> {
    let current = primary.current_branch()?;
    if current == base {
        run_git(
            &primary.workdir,
            &["merge", "--ff-only", branch],
            "Fast-forward failed",
        )?;
    } else {
        // Updating a non-checked-out base ref; `git fetch . <src>:<dst>`
        // refuses non-fast-forward updates by default.
        let refspec = format!("{}:{}", branch, base);
        run_git(
            &primary.workdir,
            &["fetch", ".", &refspec],
            "Fast-forward failed",
        )?;
    }
    Ok(())
}

/// Remove a task's worktree and branch. Refuses when the worktree path is
/// the primary repository itself. Missing pieces are skipped.
pub fn remove_worktree_and_branch(
    primary: &GitRepo,
    worktree_path: &Path,
    branch: &str,
) -> Result<()> {
    if same_physical_path(worktree_path, primary.workdir()) {
        return Err(OrchestratorError::StateInvariant(format!(
            "refusing to remove primary repository {}",
            worktree_path.display()
        )));
    }

    if worktree_path.exists() {
        primary.remove_worktree(worktree_path, true)?;
    } else {
        primary.prune_worktrees()?;
    }

    if primary.branch_exists(branch) {
        primary.delete_branch(branch, true)?;
    }

    Ok(())
}

fn find_git_dir(start_dir: &Path) -> Result<(PathBuf, PathBuf)> {
    let mut current = start_dir;

    loop {
        let git_dir_candidate = current.join(".git");

        if git_dir_candidate.is_dir() {
            return Ok((git_dir_candidate, current.to_path_buf()));
        }

        if git_dir_candidate.is_file() {
            let content = std::fs::read_to_string(&git_dir_candidate).map_err(|e| {
                OrchestratorError::Config(format!(
                    "Failed to read .git file {}: {}",
                    git_dir_candidate.display(),
                    e
                ))
            })?;

            if let Some(gitdir) = content.strip_prefix("gitdir: ") {
                let gitdir = gitdir.trim();
                // Worktree .git files can contain absolute or relative
                // paths; relative ones are relative to the worktree.
                let absolute_path = if gitdir.starts_with('/') {
                    PathBuf::from(gitdir)
                } else {
                    current.join(gitdir)
                };

                return Ok((absolute_path, current.to_path_buf()));
            }
        }

        match current.parent() {
            Some(parent) => current = parent,
            None => break,
        }
    }

    Err(OrchestratorError::NotAGitRepository(start_dir.to_path_buf()))
}
