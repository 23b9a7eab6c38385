//! The start pipeline: run-lock acquisition, readiness snapshot, and the
//! per-task start attempts with bounded rollback.

use crate::board::{TaskRow, STATUS_IN_PROGRESS, STATUS_TODO};
use crate::config::paths::allow_worktree_run;
use crate::context::{OrchestratorContext, ACTOR};
use crate::error::{OrchestratorError, Result};
use crate::launcher;
use crate::process;
use crate::readiness::{self, Readiness, RuntimeSnapshot};
use crate::git;
use crate::state::{updates, PidMeta, RunLockGuard, ScopeLock};
use std::time::Duration;

#[derive(Debug, Clone, Default)]
pub struct RunStartOptions {
    pub trigger: String,
    pub dry_run: bool,
    pub no_launch: bool,
    pub max_start: Option<usize>,
}

pub struct StartReport {
    pub started: Vec<String>,
    pub readiness: Readiness,
}

/// One `run start` invocation. Holds the run lock for the whole start loop;
/// non-scheduling readers never contend for it.
pub fn run_start(ctx: &OrchestratorContext, opts: &RunStartOptions) -> Result<StartReport> {
    if !ctx.repo.is_primary() && !allow_worktree_run() {
        return Err(OrchestratorError::MissingPrerequisite(format!(
            "run start must be invoked from the primary repository, not {} \
             (set AI_ORCH_ALLOW_WORKTREE_RUN=1 to override)",
            ctx.repo.workdir().display()
        )));
    }

    if !opts.no_launch && !opts.dry_run {
        launcher::validate_backend(ctx.config.runtime.get_launch_backend())?;
    }

    let run_lock = RunLockGuard::acquire(&ctx.state)?;
    process::install_interrupt_handler();

    let board = ctx.load_board()?;
    let snapshot = RuntimeSnapshot::collect(&ctx.state)?;
    let ready = readiness::evaluate(
        board.tasks(),
        &snapshot,
        &ctx.config,
        ctx.primary.workdir(),
        opts.max_start,
    );
    print_readiness(&ready);

    let mut started = Vec::new();
    let mut failure: Option<OrchestratorError> = None;

    for row in &ready.ready {
        if process::interrupted() {
            println!("Interrupted; stopping start loop");
            break;
        }
        match start_one(ctx, row, opts) {
            Ok(()) => started.push(row.id.clone()),
            Err(e) => {
                failure = Some(e);
                break;
            }
        }
    }

    println!("Started tasks: {}", started.len());
    run_lock.release();

    if let Some(e) = failure {
        return Err(e);
    }

    if !started.is_empty() && !opts.dry_run {
        crate::commands::status::print_status(ctx, false, opts.max_start)?;
    }

    Ok(StartReport {
        started,
        readiness: ready,
    })
}

fn print_readiness(ready: &Readiness) {
    println!("Ready tasks: {}", ready.ready.len());
    for row in &ready.ready {
        println!("  {} {} ({})", row.id, row.title, row.owner);
    }
    if !ready.excluded.is_empty() {
        println!("Excluded tasks: {}", ready.excluded.len());
        for excl in &ready.excluded {
            match excl.source {
                Some(source) => println!(
                    "  {} reason={} source={} {}",
                    excl.task_id,
                    excl.reason.as_str(),
                    source.as_str(),
                    excl.detail
                ),
                None => println!(
                    "  {} reason={} {}",
                    excl.task_id,
                    excl.reason.as_str(),
                    excl.detail
                ),
            }
        }
    }
}

/// What a start attempt has touched so far, for the rollback contract: a
/// failed attempt must leave state byte-equivalent to the pre-attempt state.
#[derive(Default)]
struct StartAttempt {
    branch_pre_existed: bool,
    worktree_pre_existed: bool,
    lock_pre_existed: bool,
    lock_acquired: bool,
    status_written: bool,
    launched: Option<PidMeta>,
}

fn start_one(ctx: &OrchestratorContext, row: &TaskRow, opts: &RunStartOptions) -> Result<()> {
    let scope = readiness::scope_for(&ctx.config, &row.owner);
    let branch = git::branch_name(&row.owner, &row.id);

    if opts.dry_run {
        println!(
            "[dry-run] would start {} ({} on scope {}, branch {})",
            row.id, row.owner, scope, branch
        );
        return Ok(());
    }

    let mut attempt = StartAttempt {
        branch_pre_existed: ctx.primary.branch_exists(&branch),
        worktree_pre_existed: ctx
            .primary
            .find_worktree_for_branch(&branch)?
            .is_some(),
        lock_pre_existed: ScopeLock::load(&ctx.state, &scope).is_some(),
        ..StartAttempt::default()
    };

    let result = try_start(ctx, row, &scope, &branch, opts, &mut attempt);
    if let Err(e) = result {
        eprintln!("Start of {} failed, rolling back: {}", row.id, e);
        rollback(ctx, row, &scope, &branch, &attempt);
        return Err(e);
    }
    Ok(())
}

fn try_start(
    ctx: &OrchestratorContext,
    row: &TaskRow,
    scope: &str,
    branch: &str,
    opts: &RunStartOptions,
    attempt: &mut StartAttempt,
) -> Result<()> {
    let base = ctx.base_branch()?;
    let worktree = git::ensure_agent_worktree(
        &ctx.primary,
        &row.owner,
        &row.id,
        &base,
        &ctx.worktree_parent(),
    )?;

    let lock = ScopeLock::new(
        &row.owner,
        scope,
        &row.id,
        branch,
        &worktree.to_string_lossy(),
    );
    lock.acquire(&ctx.state)?;
    attempt.lock_acquired = true;

    let mut board = ctx.load_board()?;
    board.update_status(&row.id, STATUS_IN_PROGRESS)?;
    attempt.status_written = true;
    updates::append_update(
        &ctx.state,
        ACTOR,
        &row.id,
        STATUS_IN_PROGRESS,
        &format!("started (trigger={})", opts.trigger),
    );

    if !opts.no_launch {
        let meta = launcher::launch_worker(ctx, row, scope, &worktree, &opts.trigger)?;
        println!(
            "Launched codex worker: task={} agent={} backend={} pid={}",
            row.id, row.owner, meta.launch_backend, meta.pid
        );
        attempt.launched = Some(meta);
    } else {
        println!("Prepared {} without launching a worker", row.id);
    }

    Ok(())
}

/// Undo a failed start attempt. Single bounded pass; each step is best
/// effort so a partial rollback still converges as far as possible.
fn rollback(
    ctx: &OrchestratorContext,
    row: &TaskRow,
    scope: &str,
    branch: &str,
    attempt: &StartAttempt,
) {
    if let Some(meta) = &attempt.launched {
        process::terminate_with_grace(meta.pid, Duration::from_secs(2));
        process::kill_tmux_session(&meta.tmux_session);
    }
    if let Err(e) = PidMeta::remove(&ctx.state, &row.id) {
        tracing::warn!("Rollback: failed to remove pid metadata for {}: {}", row.id, e);
    }

    if attempt.lock_acquired && !attempt.lock_pre_existed {
        ScopeLock::release_if_task(&ctx.state, scope, &row.id);
    }

    if attempt.status_written {
        match ctx.load_board() {
            Ok(mut board) => {
                if let Err(e) = board.update_status(&row.id, STATUS_TODO) {
                    tracing::warn!("Rollback: failed to reset {} to TODO: {}", row.id, e);
                } else {
                    updates::append_update(
                        &ctx.state,
                        ACTOR,
                        &row.id,
                        STATUS_TODO,
                        "Stopped by codex-teams: start rollback",
                    );
                }
            }
            Err(e) => tracing::warn!("Rollback: cannot load TODO board: {}", e),
        }
    }

    if !attempt.worktree_pre_existed {
        if let Ok(Some(path)) = ctx.primary.find_worktree_for_branch(branch) {
            if let Err(e) = ctx.primary.remove_worktree(&path, true) {
                tracing::warn!("Rollback: failed to remove worktree {}: {}", path.display(), e);
            }
        }
    }
    if !attempt.branch_pre_existed && ctx.primary.branch_exists(branch) {
        if let Err(e) = ctx.primary.delete_branch(branch, true) {
            tracing::warn!("Rollback: failed to delete branch {}: {}", branch, e);
        }
    }
}
