//! Read-only diagnostics over the git environment and the state directory.

use crate::context::OrchestratorContext;
use crate::error::Result;
use crate::git;
use crate::process;
use crate::state::{PidMeta, ScopeLock};
use std::process::Command;

struct Check {
    name: &'static str,
    ok: bool,
    detail: String,
}

fn check(name: &'static str, ok: bool, detail: String) -> Check {
    Check { name, ok, detail }
}

pub fn run_doctor(ctx: &OrchestratorContext) -> Result<()> {
    let mut checks = Vec::new();

    let git_version = Command::new("git")
        .arg("--version")
        .output()
        .ok()
        .filter(|o| o.status.success())
        .map(|o| String::from_utf8_lossy(&o.stdout).trim().to_string());
    checks.push(check(
        "git",
        git_version.is_some(),
        git_version.unwrap_or_else(|| "git binary not found".to_string()),
    ));

    let tmux_version = Command::new("tmux")
        .arg("-V")
        .output()
        .ok()
        .filter(|o| o.status.success())
        .map(|o| String::from_utf8_lossy(&o.stdout).trim().to_string());
    checks.push(check(
        "tmux",
        tmux_version.is_some(),
        tmux_version
            .unwrap_or_else(|| "tmux not found (launches require it or codex_exec)".to_string()),
    ));

    checks.push(check(
        "primary repo",
        ctx.repo.is_primary(),
        ctx.primary.workdir().display().to_string(),
    ));

    let state_root = ctx.state.root();
    let (state_ok, state_detail) = if state_root.is_dir() {
        (true, state_root.display().to_string())
    } else {
        (
            false,
            format!("{} missing; run 'init' first", state_root.display()),
        )
    };
    checks.push(check("state dir", state_ok, state_detail));

    checks.push(check(
        "TODO board",
        ctx.board_path().is_file(),
        ctx.board_path().display().to_string(),
    ));

    let run_lock_pid = std::fs::read_to_string(ctx.state.run_lock_dir().join("pid"))
        .ok()
        .and_then(|s| s.trim().parse::<i32>().ok());
    let (run_ok, run_detail) = match run_lock_pid {
        None => (true, "no scheduler running".to_string()),
        Some(pid) if process::pid_alive(pid) => (true, format!("scheduler running (pid {})", pid)),
        Some(pid) => (
            false,
            format!("stale run lock (dead pid {}); run 'task cleanup-stale'", pid),
        ),
    };
    checks.push(check("run lock", run_ok, run_detail));

    let pids = PidMeta::load_all(&ctx.state);
    let dead: Vec<&PidMeta> = pids.iter().filter(|m| !m.is_alive()).collect();
    checks.push(check(
        "workers",
        dead.is_empty(),
        if dead.is_empty() {
            format!("{} recorded, all alive", pids.len())
        } else {
            format!(
                "{} dead record(s): {}",
                dead.len(),
                dead.iter()
                    .map(|m| m.task_id.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            )
        },
    ));

    let locks = ScopeLock::load_all(&ctx.state);
    let orphaned: Vec<&ScopeLock> = locks
        .iter()
        .filter(|l| !pids.iter().any(|m| m.task_id == l.task_id && m.is_alive()))
        .collect();
    checks.push(check(
        "locks",
        orphaned.is_empty(),
        if orphaned.is_empty() {
            format!("{} active", locks.len())
        } else {
            format!(
                "{} lock(s) without live workers: {}",
                orphaned.len(),
                orphaned
                    .iter()
                    .map(|l| l.scope.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            )
        },
    ));

    let board = ctx.load_board().ok();
    let stray: Vec<String> = ctx
        .primary
        .list_worktrees()?
        .into_iter()
        .filter(|(branch, _)| branch.starts_with(git::BRANCH_PREFIX))
        .filter(|(branch, _)| {
            board
                .as_ref()
                .map(|b| {
                    !b.tasks()
                        .iter()
                        .any(|row| git::branch_name(&row.owner, &row.id) == *branch)
                })
                .unwrap_or(false)
        })
        .map(|(branch, _)| branch)
        .collect();
    checks.push(check(
        "worktrees",
        stray.is_empty(),
        if stray.is_empty() {
            "no strays".to_string()
        } else {
            format!("stray task branches: {}", stray.join(", "))
        },
    ));

    let mut failures = 0;
    for c in &checks {
        let mark = if c.ok { "ok" } else { "FAIL" };
        println!("[{:>4}] {:<14} {}", mark, c.name, c.detail);
        if !c.ok {
            failures += 1;
        }
    }

    println!();
    if failures == 0 {
        println!("All checks passed");
    } else {
        println!("{} check(s) need attention", failures);
    }
    Ok(())
}
