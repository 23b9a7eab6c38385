//! Shared resolution of repo, state directory, and config for every
//! subcommand.

use crate::board::TodoBoard;
use crate::config::{self, Config};
use crate::error::Result;
use crate::git::GitRepo;
use crate::state::StateDir;
use std::path::{Path, PathBuf};

/// Actor name recorded in the update log for orchestrator-initiated events.
pub const ACTOR: &str = "codex-teams";

pub struct OrchestratorContext {
    /// The checkout the CLI was invoked from (may be an agent worktree).
    pub repo: GitRepo,
    /// The primary clone. Identical to `repo` outside worktrees.
    pub primary: GitRepo,
    pub state: StateDir,
    pub config: Config,
    pub config_path: PathBuf,
}

impl OrchestratorContext {
    pub fn resolve(
        repo_flag: Option<&Path>,
        state_flag: Option<&Path>,
        config_flag: Option<&Path>,
    ) -> Result<OrchestratorContext> {
        let repo = match repo_flag {
            Some(path) => GitRepo::from_path(path)?,
            None => GitRepo::discover()?,
        };
        let primary = repo.primary()?;

        let state_root = config::resolve_state_dir(state_flag, primary.workdir());
        let state = StateDir::new(state_root);

        let config_path = config::config_path(state.root(), config_flag);
        let config = config::load_config(&config_path)?;

        Ok(OrchestratorContext {
            repo,
            primary,
            state,
            config,
            config_path,
        })
    }

    pub fn board_path(&self) -> PathBuf {
        self.primary.workdir().join(self.config.todo.get_path())
    }

    pub fn load_board(&self) -> Result<TodoBoard> {
        TodoBoard::load(&self.board_path())
    }

    /// Parent directory for agent worktrees: configured override, else the
    /// primary repository's parent.
    pub fn worktree_parent(&self) -> PathBuf {
        if let Some(parent) = &self.config.paths.worktree_parent {
            return config::expand_tilde(parent);
        }
        self.primary
            .workdir()
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| self.primary.workdir().to_path_buf())
    }

    /// Merge base: configured, else whatever branch the primary clone has
    /// checked out.
    pub fn base_branch(&self) -> Result<String> {
        if let Some(base) = &self.config.merge.base_branch {
            return Ok(base.clone());
        }
        self.primary.current_branch()
    }
}
