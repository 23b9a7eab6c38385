//! Completion pipeline: invoked by a worker from its agent worktree once
//! the TODO row is DONE and all deliverables are committed.
//!
//! The pipeline never creates commits. Its steps are totally ordered
//! (merge, unlock, worktree/branch removal, pid cleanup); a crash between
//! any two leaves a state the cleanup paths recover.

use crate::config::MergeStrategy;
use crate::context::OrchestratorContext;
use crate::error::{OrchestratorError, Result};
use crate::git::{self, BRANCH_PREFIX};
use crate::scheduler::{self, RunStartOptions};
use crate::state::{updates, PidMeta, ScopeLock};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct CompleteOptions {
    pub agent: String,
    pub scope: String,
    pub task_id: String,
    pub summary: Option<String>,
    pub trigger: String,
    pub no_run_start: bool,
    pub merge_strategy: Option<MergeStrategy>,
}

const SUMMARY_FALLBACK: &str = "task complete";

pub fn run_complete(ctx: &OrchestratorContext, opts: &CompleteOptions) -> Result<()> {
    // Preconditions, in order, each failing loudly before any mutation.
    if ctx.repo.is_primary() {
        return Err(OrchestratorError::MissingPrerequisite(
            "task complete must run from an agent worktree, not the primary repository"
                .to_string(),
        ));
    }
    let branch = ctx.repo.current_branch()?;
    if !branch.starts_with(BRANCH_PREFIX) {
        return Err(OrchestratorError::MissingPrerequisite(format!(
            "worktree branch '{}' is not a {}* task branch",
            branch, BRANCH_PREFIX
        )));
    }

    let lock = ScopeLock::load(&ctx.state, &opts.scope).ok_or_else(|| {
        OrchestratorError::NotFound(format!("no lock for scope '{}'", opts.scope))
    })?;
    if lock.owner != opts.agent {
        return Err(OrchestratorError::StateInvariant(format!(
            "lock for scope '{}' is owned by {}, not {}",
            opts.scope, lock.owner, opts.agent
        )));
    }
    if lock.task_id != opts.task_id {
        return Err(OrchestratorError::StateInvariant(format!(
            "lock for scope '{}' is bound to {}, not {}",
            opts.scope, lock.task_id, opts.task_id
        )));
    }
    if lock.branch != branch {
        return Err(OrchestratorError::StateInvariant(format!(
            "lock records branch {} but the worktree is on {}",
            lock.branch, branch
        )));
    }

    if ctx.repo.has_tracked_changes()? {
        return Err(OrchestratorError::MissingPrerequisite(format!(
            "worktree {} has tracked uncommitted changes; commit them first",
            ctx.repo.workdir().display()
        )));
    }

    let board = ctx.load_board()?;
    let row = board.find(&opts.task_id).ok_or_else(|| {
        OrchestratorError::NotFound(format!("task {} in TODO board", opts.task_id))
    })?;
    if !row.is_done() {
        return Err(OrchestratorError::MissingPrerequisite(format!(
            "task {} status is {}; mark it DONE before completing",
            opts.task_id, row.status
        )));
    }

    // Step 1: durable DONE entry in the update log.
    let summary = opts
        .summary
        .clone()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| SUMMARY_FALLBACK.to_string());
    updates::append_update(&ctx.state, &opts.agent, &opts.task_id, "DONE", &summary);

    // Step 2: resolve the primary repo and the CLI binary for the
    // post-completion scheduler call before the worktree disappears.
    let primary = &ctx.primary;
    let cli = resolve_cli_binary(primary.workdir(), ctx.repo.workdir());

    // Step 3: merge.
    let strategy = opts
        .merge_strategy
        .unwrap_or_else(|| ctx.config.merge.get_strategy());
    let base = ctx.base_branch()?;
    git::merge_into(primary, &base, &branch, ctx.repo.workdir(), strategy)?;
    println!("Merged branch into primary: {} -> {}", branch, base);

    // Step 4: unlock.
    ScopeLock::release(&ctx.state, &opts.agent, &opts.scope)?;

    // Step 5: remove worktree and branch.
    git::remove_worktree_and_branch(primary, ctx.repo.workdir(), &branch)?;
    println!("Removed worktree and branch {}", branch);

    // Step 6: pid cleanup.
    PidMeta::remove(&ctx.state, &opts.task_id)?;

    // Step 7: hand back to the scheduler.
    if !opts.no_run_start {
        reenter_scheduler(ctx, &cli, &opts.trigger)?;
    }

    Ok(())
}

/// Binary used for the post-completion scheduler call: the primary repo's
/// copy when this invocation ran an in-worktree copy, the running binary
/// when it already lives outside the worktree, PATH as the last resort.
fn resolve_cli_binary(primary_workdir: &Path, worktree: &Path) -> PathBuf {
    let by_name = PathBuf::from(env!("CARGO_PKG_NAME"));

    let exe = match std::env::current_exe() {
        Ok(exe) => exe.canonicalize().unwrap_or(exe),
        Err(_) => return by_name,
    };
    let worktree = worktree
        .canonicalize()
        .unwrap_or_else(|_| worktree.to_path_buf());

    match exe.strip_prefix(&worktree) {
        Ok(relative) => {
            let candidate = primary_workdir.join(relative);
            if candidate.is_file() {
                candidate
            } else {
                by_name
            }
        }
        Err(_) => exe,
    }
}

/// Completion runs inside a soon-to-be-removed worktree, so the follow-up
/// scheduler pass is a child process rooted at the primary repo when the
/// resolved binary is external; the in-process path covers the common case
/// of the running binary living outside the worktree.
fn reenter_scheduler(ctx: &OrchestratorContext, cli: &Path, trigger: &str) -> Result<()> {
    let current = std::env::current_exe()
        .ok()
        .and_then(|p| p.canonicalize().ok());
    let resolved = cli.canonicalize().ok();

    if current.is_some() && current == resolved {
        let primary_ctx = OrchestratorContext::resolve(
            Some(ctx.primary.workdir()),
            Some(ctx.state.root()),
            None,
        )?;
        let opts = RunStartOptions {
            trigger: trigger.to_string(),
            ..RunStartOptions::default()
        };
        // Completion already succeeded; a contended or failed follow-up run
        // must not fail this command.
        if let Err(e) = scheduler::run_start(&primary_ctx, &opts) {
            tracing::warn!("Follow-up scheduler run failed: {}", e);
        }
        return Ok(());
    }

    let status = std::process::Command::new(cli)
        .arg("--repo")
        .arg(ctx.primary.workdir())
        .arg("--state-dir")
        .arg(ctx.state.root())
        .args(["run", "start", "--trigger", trigger])
        .current_dir(ctx.primary.workdir())
        .status()
        .map_err(|e| {
            OrchestratorError::MissingPrerequisite(format!(
                "cannot invoke {} for the follow-up scheduler run: {}",
                cli.display(),
                e
            ))
        })?;

    if !status.success() {
        tracing::warn!("Follow-up scheduler run exited with {}", status);
    }
    Ok(())
}
