//! Convergence paths for dead or stopped workers.
//!
//! `auto_cleanup_exit` is the worker-exit path: idempotent, best effort,
//! and it never regresses a DONE row. `stop_tasks` is the operator path:
//! same teardown, but an operator stop may regress any status back to TODO.

use crate::board::STATUS_TODO;
use crate::context::{OrchestratorContext, ACTOR};
use crate::error::{OrchestratorError, Result};
use crate::git;
use crate::process;
use crate::state::{updates, PidMeta, ScopeLock};
use std::path::Path;
use std::time::Duration;

const STOP_GRACE: Duration = Duration::from_secs(5);
const WATCH_POLL: Duration = Duration::from_secs(2);

/// Worker-exit convergence. Every step tolerates prior partial cleanup;
/// failures are logged to the update log and never surface to the caller.
pub fn auto_cleanup_exit(
    ctx: &OrchestratorContext,
    task_id: &str,
    expected_pid: i32,
    reason: Option<&str>,
) -> Result<()> {
    let meta = match PidMeta::load(&ctx.state, task_id) {
        Some(meta) => meta,
        None => {
            println!("No pid metadata for {}; state already converged", task_id);
            return Ok(());
        }
    };
    if meta.pid != expected_pid {
        println!(
            "Pid metadata for {} records pid {}, not {}; another actor owns this task",
            task_id, meta.pid, expected_pid
        );
        return Ok(());
    }

    process::kill_tmux_session(&meta.tmux_session);

    let rollback_reason = reason.map(|r| r.to_string()).unwrap_or_else(|| {
        format!(
            "Stopped by {}: worker exited (backend={})",
            ACTOR, meta.launch_backend
        )
    });
    rollback_status_unless_done(ctx, task_id, &rollback_reason);

    if ScopeLock::release_if_task(&ctx.state, &meta.scope, task_id) {
        println!("Removed lock for scope {}", meta.scope);
    }

    remove_runtime_worktree(ctx, &meta);

    if let Err(e) = PidMeta::remove(&ctx.state, task_id) {
        warn_step(ctx, task_id, &format!("pid metadata removal failed: {}", e));
    }

    println!("Auto-cleanup finished for {}", task_id);
    Ok(())
}

/// Roll the TODO row back to TODO unless the worker finished normally. A
/// DONE row is never regressed by worker-exit cleanup.
fn rollback_status_unless_done(ctx: &OrchestratorContext, task_id: &str, reason: &str) {
    let mut board = match ctx.load_board() {
        Ok(board) => board,
        Err(e) => {
            warn_step(ctx, task_id, &format!("TODO board unavailable: {}", e));
            return;
        }
    };

    let row = match board.find(task_id) {
        Some(row) => row.clone(),
        None => {
            warn_step(ctx, task_id, "task row missing from TODO board");
            return;
        }
    };

    if row.is_done() {
        println!("TODO rollback skipped: task status is DONE");
        return;
    }
    if row.is_todo() {
        return;
    }

    match board.update_status(task_id, STATUS_TODO) {
        Ok(()) => {
            updates::append_update(&ctx.state, ACTOR, task_id, STATUS_TODO, reason);
            println!("Rolled {} back to TODO", task_id);
        }
        Err(e) => warn_step(ctx, task_id, &format!("status rollback failed: {}", e)),
    }
}

fn remove_runtime_worktree(ctx: &OrchestratorContext, meta: &PidMeta) {
    let branch = git::branch_name(&meta.owner, &meta.task_id);
    let worktree = Path::new(&meta.worktree);

    match git::remove_worktree_and_branch(&ctx.primary, worktree, &branch) {
        Ok(()) => println!("Removed worktree and branch {}", branch),
        Err(e) => warn_step(
            ctx,
            &meta.task_id,
            &format!("worktree/branch removal failed: {}", e),
        ),
    }
}

fn warn_step(ctx: &OrchestratorContext, task_id: &str, detail: &str) {
    tracing::warn!("Auto-cleanup for {}: {}", task_id, detail);
    updates::append_update(
        &ctx.state,
        ACTOR,
        task_id,
        "CLEANUP",
        &format!("auto-cleanup step skipped: {}", detail),
    );
}

/// Detached exit watcher: poll until the worker pid is gone, then re-exec
/// this binary with `task auto-cleanup-exit` so the cleanup does not depend
/// on any state held in this process.
pub fn watch_exit(ctx: &OrchestratorContext, task_id: &str, pid: i32) -> Result<()> {
    tracing::info!("Watching worker pid {} for {}", pid, task_id);
    while process::pid_alive(pid) {
        std::thread::sleep(WATCH_POLL);
    }

    let cli = std::env::current_exe()?;
    let status = std::process::Command::new(cli)
        .arg("--repo")
        .arg(ctx.primary.workdir())
        .arg("--state-dir")
        .arg(ctx.state.root())
        .args(["task", "auto-cleanup-exit", task_id])
        .arg(pid.to_string())
        .current_dir(ctx.primary.workdir())
        .status()?;

    if !status.success() {
        tracing::warn!("auto-cleanup-exit for {} exited with {}", task_id, status);
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub enum StopFilter {
    Task(String),
    Owner(String),
    All,
}

impl StopFilter {
    fn matches(&self, meta: &PidMeta) -> bool {
        match self {
            StopFilter::Task(task) => meta.task_id == *task,
            StopFilter::Owner(owner) => meta.owner == *owner,
            StopFilter::All => true,
        }
    }
}

/// Operator stop: SIGTERM with a five second grace, then SIGKILL, then the
/// auto-cleanup teardown. Unlike worker-exit cleanup this rolls the row
/// back to TODO even from DONE.
pub fn stop_tasks(
    ctx: &OrchestratorContext,
    filter: &StopFilter,
    reason: Option<&str>,
    apply: bool,
) -> Result<usize> {
    let targets: Vec<PidMeta> = PidMeta::load_all(&ctx.state)
        .into_iter()
        .filter(|m| filter.matches(m))
        .collect();

    if targets.is_empty() {
        println!("No matching workers");
        return Ok(0);
    }

    for meta in &targets {
        let alive = meta.is_alive();
        if !apply {
            println!(
                "[dry-run] would stop {} (pid {}, owner {}, alive={})",
                meta.task_id, meta.pid, meta.owner, alive
            );
            continue;
        }

        println!("Stopping {} (pid {})", meta.task_id, meta.pid);
        if alive && !process::terminate_with_grace(meta.pid, STOP_GRACE) {
            tracing::warn!("Worker pid {} survived SIGKILL", meta.pid);
        }
        process::kill_tmux_session(&meta.tmux_session);

        let stop_reason = format!(
            "Stopped by {}: {}",
            ACTOR,
            reason.unwrap_or("operator stop")
        );
        force_status_todo(ctx, &meta.task_id, &stop_reason);

        ScopeLock::release_if_task(&ctx.state, &meta.scope, &meta.task_id);
        remove_runtime_worktree(ctx, meta);
        if let Err(e) = PidMeta::remove(&ctx.state, &meta.task_id) {
            warn_step(ctx, &meta.task_id, &format!("pid metadata removal failed: {}", e));
        }
    }

    if !apply {
        println!("Pass --apply to stop {} worker(s)", targets.len());
    }
    Ok(targets.len())
}

/// Board row whose agent/task pair maps to this branch name, if any.
fn task_for_branch(ctx: &OrchestratorContext, branch: &str) -> Option<String> {
    let board = ctx.load_board().ok()?;
    board
        .tasks()
        .iter()
        .find(|row| git::branch_name(&row.owner, &row.id) == branch)
        .map(|row| row.id.clone())
}

fn force_status_todo(ctx: &OrchestratorContext, task_id: &str, reason: &str) {
    match ctx.load_board() {
        Ok(mut board) => {
            if board.find(task_id).is_none() {
                warn_step(ctx, task_id, "task row missing from TODO board");
                return;
            }
            match board.update_status(task_id, STATUS_TODO) {
                Ok(()) => updates::append_update(&ctx.state, ACTOR, task_id, STATUS_TODO, reason),
                Err(e) => warn_step(ctx, task_id, &format!("status rollback failed: {}", e)),
            }
        }
        Err(e) => warn_step(ctx, task_id, &format!("TODO board unavailable: {}", e)),
    }
}

/// Reconcile divergent state: locks with no live worker, dead pid records,
/// and codex worktrees with no runtime signals. Dry run unless `apply`.
pub fn cleanup_stale(ctx: &OrchestratorContext, apply: bool) -> Result<usize> {
    let mut findings = 0usize;

    let pids = PidMeta::load_all(&ctx.state);

    for meta in &pids {
        if meta.is_alive() {
            continue;
        }
        findings += 1;
        if apply {
            println!("Cleaning dead worker record for {}", meta.task_id);
            auto_cleanup_exit(ctx, &meta.task_id, meta.pid, None)?;
        } else {
            println!(
                "[dry-run] dead worker record: {} (pid {})",
                meta.task_id, meta.pid
            );
        }
    }

    for lock in ScopeLock::load_all(&ctx.state) {
        let has_record = pids.iter().any(|m| m.task_id == lock.task_id);
        if has_record {
            continue;
        }
        findings += 1;
        if apply {
            println!("Removing orphaned lock for scope {}", lock.scope);
            ScopeLock::release_if_task(&ctx.state, &lock.scope, &lock.task_id);
            let worktree = Path::new(&lock.worktree);
            if !lock.branch.is_empty() {
                if let Err(e) =
                    git::remove_worktree_and_branch(&ctx.primary, worktree, &lock.branch)
                {
                    warn_step(
                        ctx,
                        &lock.task_id,
                        &format!("worktree/branch removal failed: {}", e),
                    );
                }
            }
            rollback_status_unless_done(
                ctx,
                &lock.task_id,
                &format!("Stopped by {}: stale lock reclaimed", ACTOR),
            );
        } else {
            println!(
                "[dry-run] orphaned lock: scope {} task {} owner {}",
                lock.scope, lock.task_id, lock.owner
            );
        }
    }

    // Worktree/branch pairs with no lock at all: a lock removed by hand, or
    // a crash between worktree creation and lock acquisition. Loaded fresh
    // so pairs already torn down by the passes above are not re-reported.
    let locks = ScopeLock::load_all(&ctx.state);
    let pid_branches: Vec<String> = PidMeta::load_all(&ctx.state)
        .iter()
        .map(|m| git::branch_name(&m.owner, &m.task_id))
        .collect();
    for (branch, path) in ctx.primary.list_worktrees()? {
        if !branch.starts_with(git::BRANCH_PREFIX) {
            continue;
        }
        if locks.iter().any(|l| l.branch == branch) || pid_branches.contains(&branch) {
            continue;
        }
        findings += 1;
        if apply {
            println!("Removing orphaned worktree {} ({})", path.display(), branch);
            if let Err(e) = git::remove_worktree_and_branch(&ctx.primary, &path, &branch) {
                tracing::warn!(
                    "Failed to remove orphaned worktree {}: {}",
                    path.display(),
                    e
                );
            }
            if let Some(task_id) = task_for_branch(ctx, &branch) {
                rollback_status_unless_done(
                    ctx,
                    &task_id,
                    &format!("Stopped by {}: orphaned worktree reclaimed", ACTOR),
                );
            }
        } else {
            println!("[dry-run] orphaned worktree: {} {}", branch, path.display());
        }
    }

    // A run lock whose owner died wedges every future scheduler pass.
    let run_lock_pid = std::fs::read_to_string(ctx.state.run_lock_dir().join("pid"))
        .ok()
        .and_then(|s| s.trim().parse::<i32>().ok());
    if let Some(pid) = run_lock_pid {
        if !process::pid_alive(pid) {
            findings += 1;
            if apply {
                println!("Removing stale run lock (owner pid {})", pid);
                let _ = std::fs::remove_dir_all(ctx.state.run_lock_dir());
            } else {
                println!("[dry-run] stale run lock: owner pid {}", pid);
            }
        }
    }

    if findings == 0 {
        println!("No stale state found");
    } else if !apply {
        println!("Pass --apply to clean {} finding(s)", findings);
    }
    Ok(findings)
}

/// Stop everything and clear the run lock. Requires confirmation unless
/// `--yes` or stdin is not a terminal.
pub fn emergency_stop(ctx: &OrchestratorContext, reason: Option<&str>, yes: bool) -> Result<()> {
    use std::io::IsTerminal;

    if !yes {
        if !std::io::stdin().is_terminal() {
            return Err(OrchestratorError::Rejected(
                "emergency-stop requires --yes when not run interactively".to_string(),
            ));
        }
        if !prompt_yes_no("Stop ALL workers and clear orchestrator state?")? {
            println!("Aborted");
            return Ok(());
        }
    }

    let reason = reason.unwrap_or("emergency stop");
    stop_tasks(ctx, &StopFilter::All, Some(reason), true)?;
    let _ = std::fs::remove_dir_all(ctx.state.run_lock_dir());
    println!("Emergency stop complete");
    Ok(())
}

fn prompt_yes_no(question: &str) -> Result<bool> {
    use std::io::Write;

    print!("{} [y/N]: ", question);
    std::io::stdout().flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    Ok(matches!(input.trim().to_lowercase().as_str(), "y" | "yes"))
}
