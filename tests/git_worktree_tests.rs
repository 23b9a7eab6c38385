mod common;

use codex_teams::config::MergeStrategy;
use codex_teams::git::{self, GitRepo};
use common::{commit_file, TestWorkspace};

#[test]
fn ensure_creates_branch_and_worktree() {
    let workspace = TestWorkspace::new();
    let repo = GitRepo::from_path(&workspace.repo_path).unwrap();
    let base = workspace.current_branch();

    let path = git::ensure_agent_worktree(
        &repo,
        "AgentA",
        "T1-001",
        &base,
        workspace.repo_path.parent().unwrap(),
    )
    .unwrap();

    assert_eq!(path, workspace.worktree_path("agenta", "t1-001"));
    assert!(path.is_dir());
    assert!(workspace.branch_exists("codex/agenta-t1-001"));

    // The worktree is a checkout of the task branch.
    let worktree_repo = GitRepo::from_path(&path).unwrap();
    assert_eq!(worktree_repo.current_branch().unwrap(), "codex/agenta-t1-001");
    assert!(!worktree_repo.is_primary());
    assert!(repo.is_primary());
}

#[test]
fn ensure_is_idempotent() {
    let workspace = TestWorkspace::new();
    let repo = GitRepo::from_path(&workspace.repo_path).unwrap();
    let base = workspace.current_branch();
    let parent = workspace.repo_path.parent().unwrap().to_path_buf();

    let first = git::ensure_agent_worktree(&repo, "AgentA", "T1-001", &base, &parent).unwrap();
    let second = git::ensure_agent_worktree(&repo, "AgentA", "T1-001", &base, &parent).unwrap();
    assert_eq!(first, second);
}

#[test]
fn orphaned_directory_is_quarantined() {
    let workspace = TestWorkspace::new();
    let repo = GitRepo::from_path(&workspace.repo_path).unwrap();
    let base = workspace.current_branch();
    let parent = workspace.repo_path.parent().unwrap().to_path_buf();

    // Squat a plain directory on the canonical path.
    let canonical = workspace.worktree_path("agenta", "t9-501");
    std::fs::create_dir_all(&canonical).unwrap();
    std::fs::write(canonical.join("keep-me.txt"), "evidence\n").unwrap();

    let path = git::ensure_agent_worktree(&repo, "AgentA", "T9-501", &base, &parent).unwrap();
    assert_eq!(path, canonical);
    assert!(path.join(".git").exists());

    // The squatter is preserved next to the fresh worktree.
    let quarantined: Vec<_> = std::fs::read_dir(&parent)
        .unwrap()
        .flatten()
        .filter(|e| {
            e.file_name()
                .to_string_lossy()
                .starts_with("test-repo-agenta-t9-501.orphan-")
        })
        .collect();
    assert_eq!(quarantined.len(), 1);
    assert!(quarantined[0].path().join("keep-me.txt").exists());
}

#[test]
fn merge_fast_forwards_when_base_has_not_moved() {
    let workspace = TestWorkspace::new();
    let repo = GitRepo::from_path(&workspace.repo_path).unwrap();
    let base = workspace.current_branch();
    let parent = workspace.repo_path.parent().unwrap().to_path_buf();

    let worktree =
        git::ensure_agent_worktree(&repo, "AgentA", "T1-001", &base, &parent).unwrap();
    commit_file(&worktree, "feature.txt", "delivered\n", "feat: deliver T1-001");

    git::merge_into(
        &repo,
        &base,
        "codex/agenta-t1-001",
        &worktree,
        MergeStrategy::FfOnly,
    )
    .unwrap();

    assert_eq!(workspace.head_subject(&base), "feat: deliver T1-001");
}

#[test]
fn merge_is_noop_when_already_merged() {
    let workspace = TestWorkspace::new();
    let repo = GitRepo::from_path(&workspace.repo_path).unwrap();
    let base = workspace.current_branch();
    let parent = workspace.repo_path.parent().unwrap().to_path_buf();

    // Branch with no commits of its own is an ancestor of base.
    let worktree =
        git::ensure_agent_worktree(&repo, "AgentA", "T1-001", &base, &parent).unwrap();

    git::merge_into(
        &repo,
        &base,
        "codex/agenta-t1-001",
        &worktree,
        MergeStrategy::FfOnly,
    )
    .unwrap();
}

#[test]
fn diverged_base_fails_ff_only_but_rebases() {
    let workspace = TestWorkspace::new();
    let repo = GitRepo::from_path(&workspace.repo_path).unwrap();
    let base = workspace.current_branch();
    let parent = workspace.repo_path.parent().unwrap().to_path_buf();

    let worktree =
        git::ensure_agent_worktree(&repo, "AgentA", "T1-001", &base, &parent).unwrap();
    commit_file(&worktree, "feature.txt", "delivered\n", "feat: deliver T1-001");
    // Base moves independently.
    commit_file(&workspace.repo_path, "other.txt", "drift\n", "chore: drift");

    let err = git::merge_into(
        &repo,
        &base,
        "codex/agenta-t1-001",
        &worktree,
        MergeStrategy::FfOnly,
    )
    .unwrap_err();
    assert!(err.to_string().starts_with("Merge failed:"), "{}", err);

    git::merge_into(
        &repo,
        &base,
        "codex/agenta-t1-001",
        &worktree,
        MergeStrategy::RebaseThenFf,
    )
    .unwrap();
    assert_eq!(workspace.head_subject(&base), "feat: deliver T1-001");
}

#[test]
fn merge_refuses_dirty_primary() {
    let workspace = TestWorkspace::new();
    let repo = GitRepo::from_path(&workspace.repo_path).unwrap();
    let base = workspace.current_branch();
    let parent = workspace.repo_path.parent().unwrap().to_path_buf();

    let worktree =
        git::ensure_agent_worktree(&repo, "AgentA", "T1-001", &base, &parent).unwrap();
    commit_file(&worktree, "feature.txt", "delivered\n", "feat: deliver T1-001");

    // Tracked modification in the primary.
    std::fs::write(workspace.repo_path.join("README.md"), "# Changed\n").unwrap();

    let err = git::merge_into(
        &repo,
        &base,
        "codex/agenta-t1-001",
        &worktree,
        MergeStrategy::RebaseThenFf,
    )
    .unwrap_err();
    assert!(err.to_string().starts_with("State invariant:"), "{}", err);
}

#[test]
fn remove_deletes_worktree_and_branch() {
    let workspace = TestWorkspace::new();
    let repo = GitRepo::from_path(&workspace.repo_path).unwrap();
    let base = workspace.current_branch();
    let parent = workspace.repo_path.parent().unwrap().to_path_buf();

    let worktree =
        git::ensure_agent_worktree(&repo, "AgentA", "T1-001", &base, &parent).unwrap();

    git::remove_worktree_and_branch(&repo, &worktree, "codex/agenta-t1-001").unwrap();
    assert!(!worktree.exists());
    assert!(!workspace.branch_exists("codex/agenta-t1-001"));

    // A second pass over already-clean state stays quiet.
    git::remove_worktree_and_branch(&repo, &worktree, "codex/agenta-t1-001").unwrap();
}

#[test]
fn remove_refuses_primary_repo_path() {
    let workspace = TestWorkspace::new();
    let repo = GitRepo::from_path(&workspace.repo_path).unwrap();

    let err = git::remove_worktree_and_branch(&repo, &workspace.repo_path, "codex/x").unwrap_err();
    assert!(err.to_string().starts_with("State invariant:"), "{}", err);
}

#[test]
fn find_worktree_for_branch_round_trips() {
    let workspace = TestWorkspace::new();
    let repo = GitRepo::from_path(&workspace.repo_path).unwrap();
    let base = workspace.current_branch();
    let parent = workspace.repo_path.parent().unwrap().to_path_buf();

    assert!(repo
        .find_worktree_for_branch("codex/agenta-t1-001")
        .unwrap()
        .is_none());

    let created =
        git::ensure_agent_worktree(&repo, "AgentA", "T1-001", &base, &parent).unwrap();
    let found = repo
        .find_worktree_for_branch("codex/agenta-t1-001")
        .unwrap()
        .expect("worktree should be listed");
    assert_eq!(
        found.canonicalize().unwrap(),
        created.canonicalize().unwrap()
    );
}

#[test]
fn primary_resolution_from_worktree() {
    let workspace = TestWorkspace::new();
    let repo = GitRepo::from_path(&workspace.repo_path).unwrap();
    let base = workspace.current_branch();
    let parent = workspace.repo_path.parent().unwrap().to_path_buf();

    let worktree =
        git::ensure_agent_worktree(&repo, "AgentA", "T1-001", &base, &parent).unwrap();
    let worktree_repo = GitRepo::from_path(&worktree).unwrap();

    let primary = worktree_repo.primary().unwrap();
    assert_eq!(
        primary.workdir().canonicalize().unwrap(),
        workspace.repo_path.canonicalize().unwrap()
    );
}
