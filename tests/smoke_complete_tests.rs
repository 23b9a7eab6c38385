mod common;

use common::{commit_file, TestWorkspace};

/// Prepare a started task (no worker) and return its worktree path.
fn start_task(workspace: &TestWorkspace, task_id: &str, agent_slug: &str, task_slug: &str) {
    workspace
        .cli()
        .args(["run", "start", "--no-launch"])
        .assert()
        .success();
    assert!(workspace.worktree_path(agent_slug, task_slug).is_dir(), "{} did not start", task_id);
}

#[test]
fn happy_path_merges_and_cleans_up() {
    let workspace = TestWorkspace::new();
    workspace.write_board(&[("T1-001", "App shell bootstrap", "AgentA", "-", "TODO")]);
    workspace.write_spec("T1-001");
    let base = workspace.current_branch();

    start_task(&workspace, "T1-001", "agenta", "t1-001");
    let worktree = workspace.worktree_path("agenta", "t1-001");

    // The worker delivers a commit, marks the row DONE, and completes.
    commit_file(&worktree, "shell.rs", "fn main() {}\n", "feat: app shell bootstrap");

    workspace
        .cli_from(&worktree)
        .args(["task", "update", "AgentA", "T1-001", "DONE", "shell delivered"])
        .assert()
        .success();
    assert!(workspace.board_content().contains("DONE"));

    let output = workspace
        .cli_from(&worktree)
        .args([
            "task",
            "complete",
            "AgentA",
            "app-shell",
            "T1-001",
            "--summary",
            "app shell bootstrap done",
            "--no-run-start",
        ])
        .assert()
        .success();
    let stdout = String::from_utf8_lossy(&output.get_output().stdout).to_string();
    assert!(stdout.contains("Merged branch into primary"), "{}", stdout);

    // Merge landed on base; every runtime artifact is gone; the row stays DONE.
    assert_eq!(workspace.head_subject(&base), "feat: app shell bootstrap");
    assert!(!workspace.lock_path("app-shell").exists());
    assert!(!worktree.exists());
    assert!(!workspace.branch_exists("codex/agenta-t1-001"));
    assert!(!workspace.pid_path("t1-001").exists());
    assert!(workspace.board_content().contains("DONE"));
    assert!(workspace
        .updates_content()
        .contains("T1-001 DONE app shell bootstrap done"));
}

#[test]
fn completion_reenters_the_scheduler() {
    let workspace = TestWorkspace::new();
    let worker = workspace.write_sleep_worker();
    workspace.write_config_with_worker(
        &[("AgentA", "app-shell"), ("AgentB", "api")],
        &worker.to_string_lossy(),
    );
    workspace.write_board(&[
        ("T1-001", "App shell bootstrap", "AgentA", "-", "TODO"),
        ("T1-002", "API layer", "AgentB", "T1-001", "TODO"),
    ]);
    workspace.write_spec("T1-001");
    workspace.write_spec("T1-002");

    // Start T1-001 without a worker; T1-002 is dep-gated.
    workspace
        .cli()
        .args(["run", "start", "--no-launch", "--max-start", "1"])
        .assert()
        .success();
    let worktree = workspace.worktree_path("agenta", "t1-001");

    commit_file(&worktree, "shell.rs", "fn main() {}\n", "feat: app shell");
    workspace
        .cli_from(&worktree)
        .args(["task", "update", "AgentA", "T1-001", "DONE", "delivered"])
        .assert()
        .success();

    // Completion without --no-run-start starts the released dependent.
    let output = workspace
        .cli_from(&worktree)
        .args([
            "task",
            "complete",
            "AgentA",
            "app-shell",
            "T1-001",
            "--summary",
            "done",
            "--trigger",
            "t1-001-complete",
        ])
        .assert()
        .success();
    let stdout = String::from_utf8_lossy(&output.get_output().stdout).to_string();
    assert!(stdout.contains("Merged branch into primary"), "{}", stdout);
    assert!(stdout.contains("Started tasks: 1"), "{}", stdout);
    assert!(
        stdout.contains("Launched codex worker: task=T1-002"),
        "{}",
        stdout
    );

    assert!(workspace.lock_path("api").is_file());
    assert!(workspace.pid_path("t1-002").is_file());

    workspace
        .cli()
        .args(["task", "stop", "--all", "--apply", "--reason", "test teardown"])
        .assert()
        .success();
}

#[test]
fn complete_refuses_primary_repo() {
    let workspace = TestWorkspace::new();
    workspace.write_board(&[("T1-001", "Task", "AgentA", "-", "DONE")]);

    let output = workspace
        .cli()
        .args(["task", "complete", "AgentA", "app-shell", "T1-001"])
        .assert()
        .failure();
    let stderr = String::from_utf8_lossy(&output.get_output().stderr).to_string();
    assert!(stderr.contains("Missing prerequisite:"), "{}", stderr);
    assert!(stderr.contains("primary repository"), "{}", stderr);
}

#[test]
fn complete_requires_a_lock() {
    let workspace = TestWorkspace::new();
    workspace.write_board(&[("T1-001", "Task", "AgentA", "-", "DONE")]);
    workspace.write_spec("T1-001");

    workspace
        .cli()
        .args(["worktree", "create", "AgentA", "T1-001"])
        .assert()
        .success();
    let worktree = workspace.worktree_path("agenta", "t1-001");

    let output = workspace
        .cli_from(&worktree)
        .args(["task", "complete", "AgentA", "app-shell", "T1-001"])
        .assert()
        .failure();
    let stderr = String::from_utf8_lossy(&output.get_output().stderr).to_string();
    assert!(stderr.contains("Not found:"), "{}", stderr);
    assert!(stderr.contains("no lock for scope"), "{}", stderr);
}

#[test]
fn complete_requires_matching_lock_owner_and_task() {
    let workspace = TestWorkspace::new();
    workspace.write_board(&[("T1-001", "Task", "AgentA", "-", "DONE")]);
    workspace.write_spec("T1-001");

    workspace
        .cli()
        .args(["worktree", "create", "AgentA", "T1-001"])
        .assert()
        .success();
    workspace
        .cli()
        .args(["task", "lock", "AgentB", "app-shell", "T9-999"])
        .assert()
        .success();
    let worktree = workspace.worktree_path("agenta", "t1-001");

    let output = workspace
        .cli_from(&worktree)
        .args(["task", "complete", "AgentA", "app-shell", "T1-001"])
        .assert()
        .failure();
    let stderr = String::from_utf8_lossy(&output.get_output().stderr).to_string();
    assert!(stderr.contains("State invariant:"), "{}", stderr);
}

#[test]
fn complete_refuses_uncommitted_tracked_changes() {
    let workspace = TestWorkspace::new();
    workspace.write_board(&[("T1-001", "Task", "AgentA", "-", "TODO")]);
    workspace.write_spec("T1-001");

    start_task(&workspace, "T1-001", "agenta", "t1-001");
    let worktree = workspace.worktree_path("agenta", "t1-001");

    workspace
        .cli_from(&worktree)
        .args(["task", "update", "AgentA", "T1-001", "DONE", "done"])
        .assert()
        .success();

    // Tracked modification left uncommitted in the worktree.
    std::fs::write(worktree.join("README.md"), "# dirty\n").unwrap();

    let output = workspace
        .cli_from(&worktree)
        .args(["task", "complete", "AgentA", "app-shell", "T1-001"])
        .assert()
        .failure();
    let stderr = String::from_utf8_lossy(&output.get_output().stderr).to_string();
    assert!(stderr.contains("Missing prerequisite:"), "{}", stderr);
    assert!(stderr.contains("uncommitted"), "{}", stderr);

    // Nothing was torn down.
    assert!(workspace.lock_path("app-shell").is_file());
    assert!(worktree.is_dir());
}

#[test]
fn complete_requires_done_status() {
    let workspace = TestWorkspace::new();
    workspace.write_board(&[("T1-001", "Task", "AgentA", "-", "TODO")]);
    workspace.write_spec("T1-001");

    start_task(&workspace, "T1-001", "agenta", "t1-001");
    let worktree = workspace.worktree_path("agenta", "t1-001");

    let output = workspace
        .cli_from(&worktree)
        .args(["task", "complete", "AgentA", "app-shell", "T1-001"])
        .assert()
        .failure();
    let stderr = String::from_utf8_lossy(&output.get_output().stderr).to_string();
    assert!(stderr.contains("Missing prerequisite:"), "{}", stderr);
    assert!(stderr.contains("mark it DONE"), "{}", stderr);
}

#[test]
fn localized_done_is_accepted_by_the_guard() {
    let workspace = TestWorkspace::new();
    workspace.write_board(&[("T1-001", "Task", "AgentA", "-", "TODO")]);
    workspace.write_spec("T1-001");
    let base = workspace.current_branch();

    start_task(&workspace, "T1-001", "agenta", "t1-001");
    let worktree = workspace.worktree_path("agenta", "t1-001");
    commit_file(&worktree, "done.txt", "delivered\n", "feat: deliver");

    workspace
        .cli_from(&worktree)
        .args(["task", "update", "AgentA", "T1-001", "완료", "finished"])
        .assert()
        .success();

    workspace
        .cli_from(&worktree)
        .args(["task", "complete", "AgentA", "app-shell", "T1-001", "--no-run-start"])
        .assert()
        .success();
    assert_eq!(workspace.head_subject(&base), "feat: deliver");

    // Summary falls back to "task complete" when not given.
    assert!(workspace.updates_content().contains("T1-001 DONE task complete"));
}

#[test]
fn ff_only_strategy_fails_on_divergence() {
    let workspace = TestWorkspace::new();
    workspace.write_board(&[("T1-001", "Task", "AgentA", "-", "TODO")]);
    workspace.write_spec("T1-001");

    start_task(&workspace, "T1-001", "agenta", "t1-001");
    let worktree = workspace.worktree_path("agenta", "t1-001");
    commit_file(&worktree, "feature.txt", "x\n", "feat: work");
    // Base drifts so fast-forward is impossible.
    commit_file(&workspace.repo_path, "drift.txt", "y\n", "chore: drift");

    workspace
        .cli_from(&worktree)
        .args(["task", "update", "AgentA", "T1-001", "DONE", "done"])
        .assert()
        .success();

    let output = workspace
        .cli_from(&worktree)
        .args([
            "task",
            "complete",
            "AgentA",
            "app-shell",
            "T1-001",
            "--no-run-start",
            "--merge-strategy",
            "ff-only",
        ])
        .assert()
        .failure();
    let stderr = String::from_utf8_lossy(&output.get_output().stderr).to_string();
    assert!(stderr.contains("Merge failed:"), "{}", stderr);

    // Pre-merge failure is non-destructive: lock and worktree survive.
    assert!(workspace.lock_path("app-shell").is_file());
    assert!(worktree.is_dir());

    // rebase-then-ff succeeds on the same state.
    workspace
        .cli_from(&worktree)
        .args([
            "task",
            "complete",
            "AgentA",
            "app-shell",
            "T1-001",
            "--no-run-start",
            "--merge-strategy",
            "rebase-then-ff",
        ])
        .assert()
        .success();
    assert!(!workspace.lock_path("app-shell").exists());
    assert!(!worktree.exists());
}
