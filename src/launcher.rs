//! Worker launch: prompt rendering, detached spawn (tmux or direct exec),
//! pid metadata, and the exit watcher.

use crate::board::TaskRow;
use crate::config::LaunchBackend;
use crate::context::OrchestratorContext;
use crate::error::{OrchestratorError, Result};
use crate::git;
use crate::process;
use crate::state::PidMeta;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

/// Default worker prompt. The lifecycle contract is part of the prompt so a
/// worker cannot claim ignorance of how a task must end.
const PROMPT_TEMPLATE: &str = "\
You are {agent}, an autonomous coding worker assigned task {task_id}: {title}.

Workspace rules:
- Work only inside your worktree at {worktree}. The shared state directory is {state_dir}.
- Record progress with: {cli} task update {agent} {task_id} <STATUS> <summary>

Finishing the task:
1. Commit all deliverable files in the worktree.
2. Mark the TODO row DONE: {cli} task update {agent} {task_id} DONE <summary>
3. Commit the DONE marker (for example: chore: mark {task_id} done).
4. End the task with: {cli} task complete {agent} {scope} {task_id} --summary <summary>

Never end a task with lock or update shortcuts, never report a generic
summary without delivered files, and never mark DONE without the files that
satisfy the task spec.
";

/// Probe the configured backend before any state mutation. tmux must answer
/// `tmux -V`; there is no silent fallback to the direct backend.
pub fn validate_backend(backend: LaunchBackend) -> Result<()> {
    match backend {
        LaunchBackend::Tmux => {
            let probe = Command::new("tmux").arg("-V").output();
            match probe {
                Ok(output) if output.status.success() => Ok(()),
                _ => Err(OrchestratorError::MissingPrerequisite(
                    "tmux is not available (install tmux, configure launch_backend = \
                     \"codex_exec\", or pass --no-launch)"
                        .to_string(),
                )),
            }
        }
        LaunchBackend::CodexExec => Ok(()),
    }
}

fn render_prompt(ctx: &OrchestratorContext, row: &TaskRow, scope: &str, worktree: &Path) -> String {
    let template = ctx
        .config
        .runtime
        .prompt_template
        .clone()
        .unwrap_or_else(|| PROMPT_TEMPLATE.to_string());

    let cli = std::env::current_exe()
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_else(|_| env!("CARGO_PKG_NAME").to_string());

    template
        .replace("{task_id}", &row.id)
        .replace("{title}", &row.title)
        .replace("{agent}", &row.owner)
        .replace("{scope}", scope)
        .replace("{worktree}", &worktree.to_string_lossy())
        .replace("{state_dir}", &ctx.state.root().to_string_lossy())
        .replace("{cli}", &cli)
}

/// Worker argv: the configured codex flags with sandbox handling applied,
/// plus writable roots for the state dir and the primary repo (workers must
/// be able to finalize their task from inside the worktree).
fn worker_args(ctx: &OrchestratorContext, prompt: &str) -> Vec<String> {
    let mut flags = ctx.config.runtime.get_codex_flags();

    let has_sandbox_flag = flags
        .iter()
        .any(|f| f.starts_with("--sandbox") || f == "--dangerously-bypass-approvals-and-sandbox");
    if !has_sandbox_flag {
        // Workers write git lock files under the primary's .git/worktrees,
        // which workspace-write sandboxing refuses.
        for flag in flags.iter_mut() {
            if flag == "--full-auto" {
                *flag = "--dangerously-bypass-approvals-and-sandbox".to_string();
            }
        }
    }

    flags.push("-c".to_string());
    flags.push(format!(
        "sandbox_workspace_write.writable_roots=[\"{}\", \"{}\"]",
        ctx.state.root().display(),
        ctx.primary.workdir().display()
    ));
    flags.push(prompt.to_string());
    flags
}

fn log_file_path(ctx: &OrchestratorContext, task_id: &str) -> PathBuf {
    ctx.state.logs_dir().join(format!(
        "{}-{}.log",
        git::slug(task_id),
        chrono::Utc::now().format("%Y%m%d%H%M%S")
    ))
}

fn tmux_session_name(row: &TaskRow) -> String {
    format!("codex-{}-{}", git::slug(&row.owner), git::slug(&row.id))
}

fn launch_tmux(
    ctx: &OrchestratorContext,
    row: &TaskRow,
    worktree: &Path,
    prompt: &str,
    log_file: &Path,
) -> Result<(i32, String)> {
    let session = tmux_session_name(row);

    let has_session = Command::new("tmux")
        .args(["has-session", "-t", &session])
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false);
    if has_session {
        return Err(OrchestratorError::WorkerLaunch(format!(
            "tmux session {} already exists",
            session
        )));
    }

    if let Some(parent) = log_file.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let bin = ctx.config.runtime.get_codex_bin();
    let mut args: Vec<String> = vec![
        "new-session".to_string(),
        "-d".to_string(),
        "-s".to_string(),
        session.clone(),
        "-c".to_string(),
        worktree.to_string_lossy().to_string(),
        bin,
    ];
    args.extend(worker_args(ctx, prompt));

    let output = Command::new("tmux").args(&args).output().map_err(|e| {
        OrchestratorError::WorkerLaunch(format!("failed to invoke tmux: {}", e))
    })?;
    if !output.status.success() {
        return Err(OrchestratorError::WorkerLaunch(format!(
            "tmux new-session failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    let pipe = Command::new("tmux")
        .args([
            "pipe-pane",
            "-o",
            "-t",
            &session,
            &format!("cat >> '{}'", log_file.display()),
        ])
        .output();
    if let Err(e) = pipe {
        tracing::warn!("Failed to pipe tmux output to {}: {}", log_file.display(), e);
    }

    let pane_pid = Command::new("tmux")
        .args(["list-panes", "-t", &session, "-F", "#{pane_pid}"])
        .output()
        .map_err(|e| {
            OrchestratorError::WorkerLaunch(format!("failed to query tmux pane pid: {}", e))
        })?;
    let pid: i32 = String::from_utf8_lossy(&pane_pid.stdout)
        .lines()
        .next()
        .unwrap_or("")
        .trim()
        .parse()
        .map_err(|_| {
            process::kill_tmux_session(&session);
            OrchestratorError::WorkerLaunch(format!(
                "could not determine worker pid for tmux session {}",
                session
            ))
        })?;

    Ok((pid, session))
}

fn launch_direct(
    ctx: &OrchestratorContext,
    worktree: &Path,
    prompt: &str,
    log_file: &Path,
) -> Result<i32> {
    let bin = ctx.config.runtime.get_codex_bin();
    let mut cmd = Command::new(bin);
    cmd.args(worker_args(ctx, prompt)).current_dir(worktree);
    process::spawn_detached(&mut cmd, log_file)
}

fn spawn_exit_watcher(ctx: &OrchestratorContext, task_id: &str, pid: i32, log_file: &Path) {
    let cli = match std::env::current_exe() {
        Ok(path) => path,
        Err(e) => {
            tracing::warn!("Cannot resolve own binary for exit watcher: {}", e);
            return;
        }
    };

    let mut cmd = Command::new(cli);
    cmd.arg("--repo")
        .arg(ctx.primary.workdir())
        .arg("--state-dir")
        .arg(ctx.state.root())
        .args(["task", "watch-exit", task_id])
        .arg(pid.to_string())
        .current_dir(ctx.primary.workdir());

    match process::spawn_detached(&mut cmd, log_file) {
        Ok(watcher_pid) => {
            tracing::debug!("Spawned exit watcher pid {} for {}", watcher_pid, task_id)
        }
        Err(e) => tracing::warn!("Failed to spawn exit watcher for {}: {}", task_id, e),
    }
}

/// Spawn the worker for an already-locked task and record its pid metadata.
/// Any failure after the worker process exists kills it again before the
/// error surfaces, so a failed launch leaves no live worker behind.
pub fn launch_worker(
    ctx: &OrchestratorContext,
    row: &TaskRow,
    scope: &str,
    worktree: &Path,
    trigger: &str,
) -> Result<PidMeta> {
    let backend = ctx.config.runtime.get_launch_backend();
    validate_backend(backend)?;

    let prompt = render_prompt(ctx, row, scope, worktree);
    let log_file = log_file_path(ctx, &row.id);

    let (pid, tmux_session) = match backend {
        LaunchBackend::Tmux => launch_tmux(ctx, row, worktree, &prompt, &log_file)?,
        LaunchBackend::CodexExec => {
            (launch_direct(ctx, worktree, &prompt, &log_file)?, String::new())
        }
    };

    // A worker that dies immediately (bad binary, bad flags) must fail the
    // start, not linger as a dead pid record.
    std::thread::sleep(Duration::from_millis(200));
    if process::worker_exited(pid) {
        process::kill_tmux_session(&tmux_session);
        return Err(OrchestratorError::WorkerLaunch(format!(
            "worker for {} exited immediately (see {})",
            row.id,
            log_file.display()
        )));
    }

    let meta = PidMeta::new(
        pid,
        &row.id,
        &row.owner,
        scope,
        &worktree.to_string_lossy(),
        &backend.to_string(),
        &tmux_session,
        &log_file.to_string_lossy(),
        trigger,
    );

    if let Err(e) = meta.store(&ctx.state) {
        process::terminate_with_grace(pid, Duration::from_secs(2));
        process::kill_tmux_session(&tmux_session);
        return Err(e);
    }

    spawn_exit_watcher(ctx, &row.id, pid, &log_file);

    Ok(meta)
}
