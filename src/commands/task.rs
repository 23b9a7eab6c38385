//! Operator- and worker-facing task commands: board authoring, spec
//! scaffolding, and direct lock manipulation.

use crate::board::{self, STATUS_TODO};
use crate::context::OrchestratorContext;
use crate::error::{OrchestratorError, Result};
use crate::git;
use crate::specs::{self, SpecStatus};
use crate::state::{updates, ScopeLock};

/// `task new`: append a board row and scaffold its spec file.
pub fn new_task(
    ctx: &OrchestratorContext,
    task_id: &str,
    deps: Option<&str>,
    summary: &str,
) -> Result<()> {
    if task_id.contains('|') {
        return Err(OrchestratorError::Rejected(format!(
            "task id '{}' must not contain '|'",
            task_id
        )));
    }

    let deps: Vec<String> = match deps {
        None => Vec::new(),
        Some(raw) if raw.trim() == board::DEPS_NONE => Vec::new(),
        Some(raw) => raw
            .split(',')
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty())
            .collect(),
    };

    // The default owner is the first configured agent; authoring without
    // any owners configured is an operator error.
    let owner = ctx
        .config
        .owners
        .keys()
        .next()
        .cloned()
        .ok_or_else(|| {
            OrchestratorError::MissingPrerequisite(
                "no [owners] configured; add agents to orchestrator.toml first".to_string(),
            )
        })?;

    let mut board = ctx.load_board()?;
    board.append_row(task_id, summary, &owner, &deps, STATUS_TODO)?;
    println!("Added {} to TODO board (owner {})", task_id, owner);

    let spec = specs::scaffold(
        ctx.primary.workdir(),
        &ctx.config.todo.get_specs_dir(),
        task_id,
        summary,
    )?;
    println!("Scaffolded spec: {}", spec.display());

    Ok(())
}

/// `task scaffold-specs`: create missing spec files for board rows.
pub fn scaffold_specs(
    ctx: &OrchestratorContext,
    only_task: Option<&str>,
    dry_run: bool,
    force: bool,
) -> Result<usize> {
    let board = ctx.load_board()?;
    let specs_dir = ctx.config.todo.get_specs_dir();
    let mut created = 0usize;

    for row in board.tasks() {
        if let Some(task) = only_task {
            if row.id != task {
                continue;
            }
        }

        let status = specs::validate(ctx.primary.workdir(), &specs_dir, &row.id);
        let exists = !matches!(status, SpecStatus::Missing);
        if exists && !force {
            continue;
        }

        if dry_run {
            println!("[dry-run] would scaffold spec for {}", row.id);
            created += 1;
            continue;
        }

        let path = specs::scaffold(ctx.primary.workdir(), &specs_dir, &row.id, &row.title)?;
        println!("Scaffolded spec: {}", path.display());
        created += 1;
    }

    if created == 0 {
        println!("All tasks have spec files");
    }
    Ok(created)
}

/// `task lock`: direct scope lock acquisition (operator/worker escape
/// hatch; the start pipeline uses the same primitive).
pub fn lock_scope(
    ctx: &OrchestratorContext,
    agent: &str,
    scope: &str,
    task_id: Option<&str>,
) -> Result<()> {
    let task_id = task_id.unwrap_or("");
    let (branch, worktree) = match task_id {
        "" => (String::new(), String::new()),
        task => {
            let branch = git::branch_name(agent, task);
            let worktree = ctx
                .primary
                .find_worktree_for_branch(&branch)?
                .map(|p| p.to_string_lossy().to_string())
                .unwrap_or_default();
            (branch, worktree)
        }
    };

    let lock = ScopeLock::new(agent, scope, task_id, &branch, &worktree);
    lock.acquire(&ctx.state)?;
    println!("Locked scope {} for {} ({})", scope, agent, task_id);
    Ok(())
}

pub fn unlock_scope(ctx: &OrchestratorContext, agent: &str, scope: &str) -> Result<()> {
    ScopeLock::release(&ctx.state, agent, scope)?;
    println!("Unlocked scope {} for {}", scope, agent);
    Ok(())
}

pub fn heartbeat_scope(ctx: &OrchestratorContext, agent: &str, scope: &str) -> Result<()> {
    ScopeLock::heartbeat(&ctx.state, agent, scope)?;
    println!("Heartbeat recorded for scope {}", scope);
    Ok(())
}

/// `task update`: the worker-side status write. Status mutations come only
/// from agent worktrees or the orchestrator itself, never hand-edited rows.
pub fn update_task_status(
    ctx: &OrchestratorContext,
    agent: &str,
    task_id: &str,
    status: &str,
    summary: &str,
) -> Result<()> {
    if !board::is_valid_status(status) && !board::is_done_status(status) {
        return Err(OrchestratorError::Rejected(format!(
            "invalid status '{}' (expected TODO, IN_PROGRESS, BLOCKED, or DONE)",
            status
        )));
    }

    let mut board = ctx.load_board()?;
    board.update_status(task_id, status)?;
    updates::append_update(&ctx.state, agent, task_id, status, summary);
    println!("Updated {} to {}", task_id, status);
    Ok(())
}
