mod common;

use common::{create_test_repo, get_cli_path, TestWorkspace};

#[test]
fn init_scaffolds_state_and_board() {
    let (_temp, repo_path) = create_test_repo();
    let state_dir = repo_path.join(".state");

    let mut cmd = assert_cmd::Command::new(get_cli_path());
    cmd.current_dir(&repo_path)
        .arg("--repo")
        .arg(&repo_path)
        .arg("--state-dir")
        .arg(&state_dir)
        .args(["init", "--gitignore", "yes"]);
    cmd.assert().success();

    assert!(state_dir.join("orchestrator.toml").is_file());
    assert!(state_dir.join("orchestrator").is_dir());
    assert!(state_dir.join("locks").is_dir());
    assert!(repo_path.join("tasks").join("TODO.md").is_file());
    assert!(repo_path.join("tasks").join("specs").is_dir());

    let gitignore = std::fs::read_to_string(repo_path.join(".gitignore")).unwrap();
    assert!(gitignore.lines().any(|l| l.trim() == ".state/"));
}

#[test]
fn init_rejects_bad_gitignore_mode() {
    let workspace = TestWorkspace::new();
    let output = workspace
        .cli()
        .args(["init", "--gitignore", "maybe"])
        .assert()
        .failure();
    let stderr = String::from_utf8_lossy(&output.get_output().stderr).to_string();
    assert!(stderr.contains("Rejected:"), "{}", stderr);
}

#[test]
fn no_launch_start_prepares_the_full_tuple() {
    let workspace = TestWorkspace::new();
    workspace.write_board(&[("T1-001", "App shell bootstrap", "AgentA", "-", "TODO")]);
    workspace.write_spec("T1-001");

    let output = workspace
        .cli()
        .args(["run", "start", "--no-launch"])
        .assert()
        .success();
    let stdout = String::from_utf8_lossy(&output.get_output().stdout).to_string();
    assert!(stdout.contains("Ready tasks: 1"), "{}", stdout);
    assert!(stdout.contains("Started tasks: 1"), "{}", stdout);

    // Lock, worktree, branch, and board status all in place.
    assert!(workspace.lock_path("app-shell").is_file());
    assert!(workspace.worktree_path("agenta", "t1-001").is_dir());
    assert!(workspace.branch_exists("codex/agenta-t1-001"));
    assert!(workspace.board_content().contains("IN_PROGRESS"));
    assert!(workspace.updates_content().contains("T1-001 IN_PROGRESS"));

    // No worker, so no pid metadata.
    assert!(!workspace.pid_path("t1-001").exists());

    // The run lock is released on exit.
    assert!(!workspace
        .state_dir
        .join("orchestrator")
        .join("run.lock")
        .exists());
}

#[test]
fn dependency_gating_starts_only_the_root_task() {
    let workspace = TestWorkspace::new();
    workspace.write_board(&[
        ("T1-001", "App shell bootstrap", "AgentA", "-", "TODO"),
        ("T1-002", "API layer", "AgentB", "T1-001", "TODO"),
    ]);
    workspace.write_spec("T1-001");
    workspace.write_spec("T1-002");

    let output = workspace
        .cli()
        .args(["run", "start", "--no-launch"])
        .assert()
        .success();
    let stdout = String::from_utf8_lossy(&output.get_output().stdout).to_string();

    assert!(stdout.contains("Started tasks: 1"), "{}", stdout);
    assert!(stdout.contains("reason=deps_not_ready"), "{}", stdout);
    assert!(workspace.lock_path("app-shell").is_file());
    assert!(!workspace.lock_path("api").exists());
}

#[test]
fn run_start_with_nothing_ready_is_a_noop() {
    let workspace = TestWorkspace::new();
    let board_before = workspace.board_content();

    let output = workspace
        .cli()
        .args(["run", "start", "--no-launch"])
        .assert()
        .success();
    let stdout = String::from_utf8_lossy(&output.get_output().stdout).to_string();

    assert!(stdout.contains("Ready tasks: 0"), "{}", stdout);
    assert!(stdout.contains("Started tasks: 0"), "{}", stdout);
    assert_eq!(workspace.board_content(), board_before);
    assert!(!workspace
        .state_dir
        .join("orchestrator")
        .join("run.lock")
        .exists());
}

#[test]
fn dry_run_mutates_nothing() {
    let workspace = TestWorkspace::new();
    workspace.write_board(&[("T1-001", "App shell bootstrap", "AgentA", "-", "TODO")]);
    workspace.write_spec("T1-001");
    let board_before = workspace.board_content();

    let output = workspace
        .cli()
        .args(["run", "start", "--dry-run"])
        .assert()
        .success();
    let stdout = String::from_utf8_lossy(&output.get_output().stdout).to_string();
    assert!(stdout.contains("[dry-run] would start T1-001"), "{}", stdout);

    assert_eq!(workspace.board_content(), board_before);
    assert!(!workspace.lock_path("app-shell").exists());
    assert!(!workspace.worktree_path("agenta", "t1-001").exists());
    assert!(!workspace.branch_exists("codex/agenta-t1-001"));
}

#[test]
fn unmapped_owner_is_excluded() {
    let workspace = TestWorkspace::new();
    workspace.write_board(&[("T1-001", "Orphan task", "Ghost", "-", "TODO")]);
    workspace.write_spec("T1-001");

    let output = workspace
        .cli()
        .args(["run", "start", "--no-launch"])
        .assert()
        .success();
    let stdout = String::from_utf8_lossy(&output.get_output().stdout).to_string();

    assert!(stdout.contains("Started tasks: 0"), "{}", stdout);
    assert!(stdout.contains("reason=unmapped_owner"), "{}", stdout);
}

#[test]
fn max_start_limits_the_batch() {
    let workspace = TestWorkspace::new();
    workspace.write_board(&[
        ("T1-001", "First", "AgentA", "-", "TODO"),
        ("T1-002", "Second", "AgentB", "-", "TODO"),
    ]);
    workspace.write_spec("T1-001");
    workspace.write_spec("T1-002");

    let output = workspace
        .cli()
        .args(["run", "start", "--no-launch", "--max-start", "1"])
        .assert()
        .success();
    let stdout = String::from_utf8_lossy(&output.get_output().stdout).to_string();

    assert!(stdout.contains("Started tasks: 1"), "{}", stdout);
    assert!(workspace.lock_path("app-shell").is_file());
    assert!(!workspace.lock_path("api").exists());
}

#[test]
fn run_start_refuses_worktrees_without_override() {
    let workspace = TestWorkspace::new();
    workspace.write_board(&[("T1-001", "First", "AgentA", "-", "TODO")]);
    workspace.write_spec("T1-001");

    workspace
        .cli()
        .args(["worktree", "create", "AgentA", "T1-001"])
        .assert()
        .success();
    let worktree = workspace.worktree_path("agenta", "t1-001");

    let output = workspace
        .cli_from(&worktree)
        .args(["run", "start", "--no-launch"])
        .assert()
        .failure();
    let stderr = String::from_utf8_lossy(&output.get_output().stderr).to_string();
    assert!(stderr.contains("Missing prerequisite:"), "{}", stderr);

    workspace
        .cli_from(&worktree)
        .env("AI_ORCH_ALLOW_WORKTREE_RUN", "1")
        .args(["run", "start", "--no-launch"])
        .assert()
        .success();
}

#[test]
fn launch_failure_rolls_back_to_pristine_state() {
    let workspace = TestWorkspace::new();
    workspace.write_config_with_worker(
        &[("AgentA", "app-shell")],
        "/nonexistent/codex-binary",
    );
    workspace.write_board(&[("T1-001", "App shell bootstrap", "AgentA", "-", "TODO")]);
    workspace.write_spec("T1-001");

    let output = workspace.cli().args(["run", "start"]).assert().failure();
    let stderr = String::from_utf8_lossy(&output.get_output().stderr).to_string();
    assert!(stderr.contains("Worker launch failed:"), "{}", stderr);

    // Byte-equivalent rollback: no lock, no worktree, no branch, row TODO.
    assert!(!workspace.lock_path("app-shell").exists());
    assert!(!workspace.worktree_path("agenta", "t1-001").exists());
    assert!(!workspace.branch_exists("codex/agenta-t1-001"));
    assert!(workspace.board_content().contains("| TODO"));
    assert!(!workspace.board_content().contains("IN_PROGRESS"));
    assert!(!workspace.pid_path("t1-001").exists());
}

#[test]
fn immediately_exiting_worker_is_a_launch_failure() {
    let workspace = TestWorkspace::new();
    workspace.write_config_with_worker(&[("AgentA", "app-shell")], "/bin/false");
    workspace.write_board(&[("T1-001", "App shell bootstrap", "AgentA", "-", "TODO")]);
    workspace.write_spec("T1-001");

    let output = workspace.cli().args(["run", "start"]).assert().failure();
    let stderr = String::from_utf8_lossy(&output.get_output().stderr).to_string();
    assert!(stderr.contains("Worker launch failed:"), "{}", stderr);
    assert!(stderr.contains("exited immediately"), "{}", stderr);

    assert!(!workspace.lock_path("app-shell").exists());
    assert!(workspace.board_content().contains("| TODO"));
}

#[test]
fn successful_launch_records_pid_metadata() {
    let workspace = TestWorkspace::new();
    let worker = workspace.write_sleep_worker();
    workspace.write_config_with_worker(
        &[("AgentA", "app-shell")],
        &worker.to_string_lossy(),
    );
    workspace.write_board(&[("T1-001", "App shell bootstrap", "AgentA", "-", "TODO")]);
    workspace.write_spec("T1-001");

    let output = workspace.cli().args(["run", "start"]).assert().success();
    let stdout = String::from_utf8_lossy(&output.get_output().stdout).to_string();
    assert!(stdout.contains("Started tasks: 1"), "{}", stdout);
    assert!(
        stdout.contains("Launched codex worker: task=T1-001 agent=AgentA backend=codex_exec"),
        "{}",
        stdout
    );

    let pid_file = workspace.pid_path("t1-001");
    assert!(pid_file.is_file());
    let meta = std::fs::read_to_string(&pid_file).unwrap();
    assert!(meta.contains("task_id=T1-001"));
    assert!(meta.contains("owner=AgentA"));
    assert!(meta.contains("launch_backend=codex_exec"));

    // Registry snapshot sees the live worker.
    let registry = std::fs::read_to_string(
        workspace.state_dir.join("orchestrator").join("active_pids.tsv"),
    )
    .unwrap();
    assert!(registry.contains("T1-001"), "{}", registry);
    assert!(registry.contains("true"), "{}", registry);

    // Stop it again so nothing outlives the test.
    workspace
        .cli()
        .args(["task", "stop", "--all", "--apply", "--reason", "test teardown"])
        .assert()
        .success();
    assert!(!pid_file.exists());
}

#[test]
fn status_json_reports_the_snapshot() {
    let workspace = TestWorkspace::new();
    workspace.write_board(&[
        ("T1-001", "First", "AgentA", "-", "TODO"),
        ("T1-002", "Second", "AgentB", "T1-001", "TODO"),
    ]);
    workspace.write_spec("T1-001");
    workspace.write_spec("T1-002");

    let output = workspace
        .cli()
        .args(["status", "--json"])
        .assert()
        .success();
    let stdout = String::from_utf8_lossy(&output.get_output().stdout).to_string();
    let parsed: serde_json::Value = serde_json::from_str(&stdout).expect("valid JSON");

    assert_eq!(parsed["ready"].as_array().unwrap().len(), 1);
    assert_eq!(parsed["ready"][0]["id"], "T1-001");
    assert_eq!(parsed["excluded"][0]["reason"], "deps_not_ready");
}

#[test]
fn concurrent_scheduler_is_refused_by_the_run_lock() {
    let workspace = TestWorkspace::new();

    // Simulate a live scheduler by planting our own pid in the run lock.
    let run_lock = workspace.state_dir.join("orchestrator").join("run.lock");
    std::fs::create_dir_all(&run_lock).unwrap();
    std::fs::write(run_lock.join("pid"), format!("{}\n", std::process::id())).unwrap();

    let output = workspace
        .cli()
        .args(["run", "start", "--no-launch"])
        .assert()
        .failure();
    let stderr = String::from_utf8_lossy(&output.get_output().stderr).to_string();
    assert!(stderr.contains("Lock conflict:"), "{}", stderr);
    assert!(stderr.contains("already running"), "{}", stderr);

    // A dead owner is reclaimed instead.
    std::fs::write(run_lock.join("pid"), "2147483647\n").unwrap();
    workspace
        .cli()
        .args(["run", "start", "--no-launch"])
        .assert()
        .success();
}

#[test]
fn task_new_appends_row_and_spec() {
    let workspace = TestWorkspace::new();
    workspace.write_board(&[("T1-001", "First", "AgentA", "-", "DONE")]);

    workspace
        .cli()
        .args(["task", "new", "T1-002", "--deps", "T1-001", "Second task"])
        .assert()
        .success();

    let content = workspace.board_content();
    assert!(content.contains("T1-002"), "{}", content);
    assert!(workspace
        .repo_path
        .join("tasks/specs/T1-002.md")
        .is_file());

    // Duplicate ids are rejected.
    let output = workspace
        .cli()
        .args(["task", "new", "T1-002", "Duplicate"])
        .assert()
        .failure();
    let stderr = String::from_utf8_lossy(&output.get_output().stderr).to_string();
    assert!(stderr.contains("Rejected:"), "{}", stderr);
}

#[test]
fn lock_cli_round_trip_and_conflict() {
    let workspace = TestWorkspace::new();

    workspace
        .cli()
        .args(["task", "lock", "AgentA", "app-shell", "T1-001"])
        .assert()
        .success();

    let lock_content = std::fs::read_to_string(workspace.lock_path("app-shell")).unwrap();
    assert!(lock_content.contains("owner=AgentA"));
    assert!(lock_content.contains("task_id=T1-001"));

    let output = workspace
        .cli()
        .args(["task", "lock", "AgentB", "app-shell", "T1-002"])
        .assert()
        .failure();
    let stderr = String::from_utf8_lossy(&output.get_output().stderr).to_string();
    assert!(stderr.contains("Lock conflict:"), "{}", stderr);

    // Heartbeat rewrites heartbeat_at, wrong-owner unlock is refused.
    workspace
        .cli()
        .args(["task", "heartbeat", "AgentA", "app-shell"])
        .assert()
        .success();

    let output = workspace
        .cli()
        .args(["task", "unlock", "AgentB", "app-shell"])
        .assert()
        .failure();
    let stderr = String::from_utf8_lossy(&output.get_output().stderr).to_string();
    assert!(stderr.contains("State invariant:"), "{}", stderr);

    workspace
        .cli()
        .args(["task", "unlock", "AgentA", "app-shell"])
        .assert()
        .success();
    assert!(!workspace.lock_path("app-shell").exists());

    let output = workspace
        .cli()
        .args(["task", "unlock", "AgentA", "app-shell"])
        .assert()
        .failure();
    let stderr = String::from_utf8_lossy(&output.get_output().stderr).to_string();
    assert!(stderr.contains("Not found:"), "{}", stderr);
}

#[test]
fn doctor_runs_clean_on_a_fresh_workspace() {
    let workspace = TestWorkspace::new();
    let output = workspace.cli().arg("doctor").assert().success();
    let stdout = String::from_utf8_lossy(&output.get_output().stdout).to_string();
    assert!(stdout.contains("git"), "{}", stdout);
    assert!(stdout.contains("state dir"), "{}", stdout);
}

/// The readiness snapshot must not hold the run lock; status works while a
/// scheduler appears to be running.
#[test]
fn status_is_lock_free() {
    let workspace = TestWorkspace::new();

    let run_lock = workspace.state_dir.join("orchestrator").join("run.lock");
    std::fs::create_dir_all(&run_lock).unwrap();
    std::fs::write(run_lock.join("pid"), format!("{}\n", std::process::id())).unwrap();

    workspace.cli().arg("status").assert().success();

    // Unchanged: status did not reclaim or release the lock.
    assert!(run_lock.is_dir());
}
