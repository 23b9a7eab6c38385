//! Unified status snapshot: ready queue, exclusions, running locks, and
//! live workers. Lock-free; reads may observe transient inconsistency, the
//! evaluator classifies such states explicitly.

use crate::context::OrchestratorContext;
use crate::error::Result;
use crate::readiness::{self, RuntimeSnapshot};

pub fn print_status(
    ctx: &OrchestratorContext,
    json: bool,
    max_start: Option<usize>,
) -> Result<()> {
    if json {
        return print_status_json(ctx, max_start);
    }

    let board = ctx.load_board()?;
    let snapshot = RuntimeSnapshot::collect(&ctx.state)?;
    let readiness = readiness::evaluate(
        board.tasks(),
        &snapshot,
        &ctx.config,
        ctx.primary.workdir(),
        max_start,
    );

    println!("Repository: {}", ctx.primary.workdir().display());
    println!("State dir: {}", ctx.state.root().display());
    println!();

    println!("Ready tasks: {}", readiness.ready.len());
    for row in &readiness.ready {
        println!("  {} {} ({})", row.id, row.title, row.owner);
    }

    println!("Excluded tasks: {}", readiness.excluded.len());
    for excl in &readiness.excluded {
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

    println!("Running locks: {}", readiness.running_locks.len());
    for lock in &readiness.running_locks {
        println!(
            "  {} {} owner={} since={}",
            lock.scope, lock.task_id, lock.owner, lock.created_at
        );
    }

    println!("Active workers: {}", snapshot.pids.iter().filter(|(_, a)| *a).count());
    for (meta, alive) in &snapshot.pids {
        println!(
            "  {} pid={} owner={} backend={} alive={}",
            meta.task_id, meta.pid, meta.owner, meta.launch_backend, alive
        );
    }

    Ok(())
}

pub fn print_status_json(ctx: &OrchestratorContext, max_start: Option<usize>) -> Result<()> {
    let board = ctx.load_board()?;
    let snapshot = RuntimeSnapshot::collect(&ctx.state)?;
    let readiness = readiness::evaluate(
        board.tasks(),
        &snapshot,
        &ctx.config,
        ctx.primary.workdir(),
        max_start,
    );

    let payload = serde_json::json!({
        "repo": ctx.primary.workdir().to_string_lossy(),
        "state_dir": ctx.state.root().to_string_lossy(),
        "ready": readiness.ready.iter().map(|row| serde_json::json!({
            "id": row.id,
            "title": row.title,
            "owner": row.owner,
            "deps": row.deps,
        })).collect::<Vec<_>>(),
        "excluded": readiness.excluded.iter().map(|excl| serde_json::json!({
            "id": excl.task_id,
            "owner": excl.owner,
            "reason": excl.reason.as_str(),
            "source": excl.source.map(|s| s.as_str()),
            "detail": excl.detail,
        })).collect::<Vec<_>>(),
        "running_locks": readiness.running_locks.iter().map(|lock| serde_json::json!({
            "scope": lock.scope,
            "task_id": lock.task_id,
            "owner": lock.owner,
            "branch": lock.branch,
            "worktree": lock.worktree,
            "created_at": lock.created_at,
            "heartbeat_at": lock.heartbeat_at,
        })).collect::<Vec<_>>(),
        "workers": snapshot.pids.iter().map(|(meta, alive)| serde_json::json!({
            "task_id": meta.task_id,
            "pid": meta.pid,
            "owner": meta.owner,
            "scope": meta.scope,
            "backend": meta.launch_backend,
            "alive": alive,
        })).collect::<Vec<_>>(),
    });

    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(())
}
