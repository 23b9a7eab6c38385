//! Process-level primitives: liveness probes, graceful termination, and
//! detached child spawning.

use crate::error::{OrchestratorError, Result};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Probe whether a pid is alive. `EPERM` counts as alive: the process
/// exists, we just may not signal it.
pub fn pid_alive(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    match signal::kill(Pid::from_raw(pid), None) {
        Ok(()) => true,
        Err(nix::errno::Errno::EPERM) => true,
        Err(_) => false,
    }
}

/// Whether a just-spawned worker is already gone. Our own children must be
/// reaped with WNOHANG first: an exited, unreaped child still answers
/// `kill(pid, 0)`. Non-child pids (tmux panes) fall back to the probe.
pub fn worker_exited(pid: i32) -> bool {
    use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
    match waitpid(Pid::from_raw(pid), Some(WaitPidFlag::WNOHANG)) {
        Ok(WaitStatus::StillAlive) => false,
        Ok(_) => true,
        Err(_) => !pid_alive(pid),
    }
}

/// SIGTERM, wait up to `grace`, then SIGKILL. Returns whether the process
/// is gone afterwards.
pub fn terminate_with_grace(pid: i32, grace: Duration) -> bool {
    if !pid_alive(pid) {
        return true;
    }

    let target = Pid::from_raw(pid);
    let _ = signal::kill(target, Signal::SIGTERM);

    let deadline = Instant::now() + grace;
    while Instant::now() < deadline {
        if !pid_alive(pid) {
            return true;
        }
        std::thread::sleep(Duration::from_millis(100));
    }

    tracing::warn!("pid {} did not exit within {:?}, sending SIGKILL", pid, grace);
    let _ = signal::kill(target, Signal::SIGKILL);
    std::thread::sleep(Duration::from_millis(100));
    !pid_alive(pid)
}

/// Spawn a child in its own session so it survives this CLI's exit, with
/// stdout and stderr appended to `log_file`. Returns the child pid.
pub fn spawn_detached(cmd: &mut Command, log_file: &Path) -> Result<i32> {
    if let Some(parent) = log_file.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let log = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)?;
    let log_err = log.try_clone()?;

    let child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::from(log))
        .stderr(Stdio::from(log_err))
        .process_group(0)
        .spawn()
        .map_err(|e| OrchestratorError::WorkerLaunch(format!("failed to spawn: {}", e)))?;

    Ok(child.id() as i32)
}

/// Kill a tmux session if it exists. Missing tmux or a missing session is
/// not an error on cleanup paths.
pub fn kill_tmux_session(session: &str) {
    if session.is_empty() {
        return;
    }
    let result = Command::new("tmux")
        .args(["kill-session", "-t", session])
        .output();
    match result {
        Ok(output) if output.status.success() => {
            tracing::debug!("Killed tmux session {}", session);
        }
        Ok(_) => tracing::debug!("tmux session {} not present", session),
        Err(e) => tracing::debug!("tmux unavailable while killing {}: {}", session, e),
    }
}

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

extern "C" fn mark_interrupted(_signum: i32) {
    INTERRUPTED.store(true, Ordering::SeqCst);
}

/// Install SIGINT/SIGTERM handlers that set a flag instead of killing the
/// process. The scheduler polls [`interrupted`] between tasks so a run
/// stops cleanly with its run-lock guard released by `Drop`.
pub fn install_interrupt_handler() {
    let action = signal::SigAction::new(
        signal::SigHandler::Handler(mark_interrupted),
        signal::SaFlags::empty(),
        signal::SigSet::empty(),
    );
    unsafe {
        let _ = signal::sigaction(Signal::SIGINT, &action);
        let _ = signal::sigaction(Signal::SIGTERM, &action);
    }
}

pub fn interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}
