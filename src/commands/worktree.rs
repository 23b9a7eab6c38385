//! Worktree subcommands: the building blocks of the start pipeline, also
//! usable directly by operators.

use crate::board::STATUS_IN_PROGRESS;
use crate::context::{OrchestratorContext, ACTOR};
use crate::error::{OrchestratorError, Result};
use crate::git;
use crate::readiness;
use crate::state::{updates, ScopeLock};

/// `worktree create`: materialize the worktree/branch pair only.
pub fn worktree_create(ctx: &OrchestratorContext, agent: &str, task_id: &str) -> Result<()> {
    let base = ctx.base_branch()?;
    let path = git::ensure_agent_worktree(
        &ctx.primary,
        agent,
        task_id,
        &base,
        &ctx.worktree_parent(),
    )?;
    println!("Worktree: {}", path.display());
    Ok(())
}

/// `worktree start`: worktree plus scope lock plus IN_PROGRESS, without a
/// worker launch. The scheduler drives this same path.
pub fn worktree_start(ctx: &OrchestratorContext, agent: &str, task_id: &str) -> Result<()> {
    let board = ctx.load_board()?;
    let row = board
        .find(task_id)
        .ok_or_else(|| OrchestratorError::NotFound(format!("task {} in TODO board", task_id)))?
        .clone();
    if row.owner != agent {
        return Err(OrchestratorError::Rejected(format!(
            "task {} is owned by {}, not {}",
            task_id, row.owner, agent
        )));
    }

    let scope = readiness::scope_for(&ctx.config, agent);
    let base = ctx.base_branch()?;
    let branch = git::branch_name(agent, task_id);
    let worktree = git::ensure_agent_worktree(
        &ctx.primary,
        agent,
        task_id,
        &base,
        &ctx.worktree_parent(),
    )?;

    let lock = ScopeLock::new(agent, &scope, task_id, &branch, &worktree.to_string_lossy());
    lock.acquire(&ctx.state)?;

    let mut board = ctx.load_board()?;
    board.update_status(task_id, STATUS_IN_PROGRESS)?;
    updates::append_update(&ctx.state, ACTOR, task_id, STATUS_IN_PROGRESS, "worktree start");

    println!("Started {} in {}", task_id, worktree.display());
    Ok(())
}

/// `worktree list`: every codex task worktree of the primary repo.
pub fn list_worktrees(ctx: &OrchestratorContext) -> Result<()> {
    let worktrees = ctx.primary.list_worktrees()?;
    let task_worktrees: Vec<_> = worktrees
        .iter()
        .filter(|(branch, _)| branch.starts_with(git::BRANCH_PREFIX))
        .collect();

    if task_worktrees.is_empty() {
        println!("No task worktrees");
        return Ok(());
    }

    for (branch, path) in task_worktrees {
        println!("{}\t{}", branch, path.display());
    }
    Ok(())
}
