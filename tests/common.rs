use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use tempfile::TempDir;

/// Get the path to the codex-teams binary for testing.
#[allow(dead_code)]
pub fn get_cli_path() -> PathBuf {
    assert_cmd::cargo::cargo_bin!("codex-teams").to_path_buf()
}

/// Test workspace providing an isolated git repo, state dir, and config.
/// Used by various test files - #[allow(dead_code)] because not all tests
/// use all fields.
#[allow(dead_code)]
pub struct TestWorkspace {
    pub temp_dir: TempDir,
    pub repo_path: PathBuf,
    pub state_dir: PathBuf,
}

#[allow(dead_code)]
impl TestWorkspace {
    /// Repo with one commit, a default-owner config, and an empty board.
    pub fn new() -> Self {
        let (temp_dir, repo_path) = create_test_repo();
        let state_dir = repo_path.join(".state");

        let workspace = TestWorkspace {
            temp_dir,
            repo_path,
            state_dir,
        };
        workspace.write_config(&[("AgentA", "app-shell"), ("AgentB", "api")]);
        workspace.write_board(&[]);
        workspace
    }

    pub fn write_config(&self, owners: &[(&str, &str)]) {
        let mut content = String::from("[owners]\n");
        for (agent, scope) in owners {
            content.push_str(&format!("{} = \"{}\"\n", agent, scope));
        }
        fs::create_dir_all(&self.state_dir).expect("Failed to create state dir");
        fs::write(self.state_dir.join("orchestrator.toml"), content)
            .expect("Failed to write config");
    }

    /// Config with an explicit worker command (codex_exec backend), so
    /// launch tests do not depend on tmux or a real codex binary.
    pub fn write_config_with_worker(&self, owners: &[(&str, &str)], worker_bin: &str) {
        let mut content = String::from("[owners]\n");
        for (agent, scope) in owners {
            content.push_str(&format!("{} = \"{}\"\n", agent, scope));
        }
        content.push_str(&format!(
            "\n[runtime]\nlaunch_backend = \"codex_exec\"\ncodex_bin = \"{}\"\ncodex_flags = []\n",
            worker_bin
        ));
        fs::create_dir_all(&self.state_dir).expect("Failed to create state dir");
        fs::write(self.state_dir.join("orchestrator.toml"), content)
            .expect("Failed to write config");
    }

    /// Executable script that ignores its arguments and sleeps, standing in
    /// for a long-running worker.
    pub fn write_sleep_worker(&self) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = self.temp_dir.path().join("fake-worker.sh");
        fs::write(&path, "#!/bin/sh\nsleep 60\n").expect("Failed to write worker script");
        let mut perms = fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&path, perms).unwrap();
        path
    }

    /// Write the TODO board. Rows are (id, title, owner, deps, status).
    pub fn write_board(&self, rows: &[(&str, &str, &str, &str, &str)]) {
        let mut content = String::from(
            "# TODO\n\n\
             | ID | Title | Owner | Deps | Notes | Status |\n\
             |----|-------|-------|------|-------|--------|\n",
        );
        for (id, title, owner, deps, status) in rows {
            content.push_str(&format!(
                "| {} | {} | {} | {} | - | {} |\n",
                id, title, owner, deps, status
            ));
        }
        let board_path = self.repo_path.join("tasks").join("TODO.md");
        fs::create_dir_all(board_path.parent().unwrap()).expect("Failed to create tasks dir");
        fs::write(&board_path, content).expect("Failed to write board");
    }

    pub fn board_path(&self) -> PathBuf {
        self.repo_path.join("tasks").join("TODO.md")
    }

    pub fn board_content(&self) -> String {
        fs::read_to_string(self.board_path()).expect("Failed to read board")
    }

    /// Valid spec file for a task.
    pub fn write_spec(&self, task_id: &str) {
        let path = self
            .repo_path
            .join("tasks")
            .join("specs")
            .join(format!("{}.md", task_id));
        fs::create_dir_all(path.parent().unwrap()).expect("Failed to create specs dir");
        fs::write(
            &path,
            format!(
                "# {}\n\n## Goal\n\nShip it.\n\n## In Scope\n\n- everything\n\n\
                 ## Acceptance Criteria\n\n- it works\n",
                task_id
            ),
        )
        .expect("Failed to write spec");
    }

    /// Invoke the CLI against this workspace from the primary repo.
    pub fn cli(&self) -> assert_cmd::Command {
        let mut cmd = assert_cmd::Command::new(get_cli_path());
        cmd.current_dir(&self.repo_path)
            .arg("--repo")
            .arg(&self.repo_path)
            .arg("--state-dir")
            .arg(&self.state_dir);
        cmd
    }

    /// Invoke the CLI from inside a worktree (repo discovered from cwd).
    pub fn cli_from(&self, dir: &Path) -> assert_cmd::Command {
        let mut cmd = assert_cmd::Command::new(get_cli_path());
        cmd.current_dir(dir).arg("--state-dir").arg(&self.state_dir);
        cmd
    }

    pub fn lock_path(&self, scope: &str) -> PathBuf {
        self.state_dir.join("locks").join(format!("{}.lock", scope))
    }

    pub fn pid_path(&self, task_slug: &str) -> PathBuf {
        self.state_dir
            .join("orchestrator")
            .join(format!("{}.pid", task_slug))
    }

    pub fn updates_content(&self) -> String {
        fs::read_to_string(self.state_dir.join("LATEST_UPDATES.md")).unwrap_or_default()
    }

    /// Canonical worktree path for an agent/task pair (sibling of the repo).
    pub fn worktree_path(&self, agent_slug: &str, task_slug: &str) -> PathBuf {
        self.repo_path
            .parent()
            .unwrap()
            .join(format!("test-repo-{}-{}", agent_slug, task_slug))
    }

    pub fn branch_exists(&self, branch: &str) -> bool {
        Command::new("git")
            .args([
                "show-ref",
                "--verify",
                "--quiet",
                &format!("refs/heads/{}", branch),
            ])
            .current_dir(&self.repo_path)
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    pub fn current_branch(&self) -> String {
        let output = Command::new("git")
            .args(["symbolic-ref", "--short", "HEAD"])
            .current_dir(&self.repo_path)
            .output()
            .expect("Failed to resolve branch");
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    }

    /// Head commit subject of a branch in the primary repo.
    pub fn head_subject(&self, branch: &str) -> String {
        let output = Command::new("git")
            .args(["log", "-1", "--format=%s", branch])
            .current_dir(&self.repo_path)
            .output()
            .expect("Failed to read log");
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    }
}

#[allow(dead_code)]
pub fn create_test_repo() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let repo_path = temp_dir.path().join("test-repo");

    fs::create_dir_all(&repo_path).expect("Failed to create repo dir");

    let output = Command::new("git")
        .args(["init", &repo_path.to_string_lossy()])
        .output()
        .expect("Failed to init git repo");
    assert!(output.status.success(), "Failed to init git repo");

    // Git requires user.email and user.name for commits. Setting them
    // per-repo avoids depending on the user's global git config.
    for (key, value) in [("user.email", "test@example.com"), ("user.name", "Test User")] {
        let output = Command::new("git")
            .args(["config", key, value])
            .current_dir(&repo_path)
            .output()
            .expect("Failed to set git config");
        assert!(output.status.success(), "Failed to set {}", key);
    }

    fs::write(repo_path.join("README.md"), "# Test Repo\n").expect("Failed to write README");

    let output = Command::new("git")
        .args(["add", "README.md"])
        .current_dir(&repo_path)
        .output()
        .expect("Failed to git add");
    assert!(output.status.success(), "Failed to git add");

    let output = Command::new("git")
        .args(["commit", "-m", "Initial commit"])
        .current_dir(&repo_path)
        .output()
        .expect("Failed to git commit");
    assert!(output.status.success(), "Failed to git commit");

    (temp_dir, repo_path)
}

/// Commit a file inside a checkout (primary repo or worktree).
#[allow(dead_code)]
pub fn commit_file(checkout: &Path, filename: &str, content: &str, message: &str) {
    fs::write(checkout.join(filename), content).expect("Failed to write file");

    let output = Command::new("git")
        .args(["add", filename])
        .current_dir(checkout)
        .output()
        .expect("Failed to git add");
    assert!(output.status.success(), "Failed to git add {}", filename);

    let output = Command::new("git")
        .args(["commit", "-m", message])
        .current_dir(checkout)
        .output()
        .expect("Failed to git commit");
    assert!(output.status.success(), "Failed to commit: {}", message);
}
