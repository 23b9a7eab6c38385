//! Workspace initialization: state directory skeleton, default config,
//! TODO board, and spec directory.

use crate::board;
use crate::config::{self, Config};
use crate::context::OrchestratorContext;
use crate::error::{OrchestratorError, Result};
use std::io::{IsTerminal, Write};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GitignoreMode {
    #[default]
    Ask,
    Yes,
    No,
}

impl std::str::FromStr for GitignoreMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ask" => Ok(GitignoreMode::Ask),
            "yes" => Ok(GitignoreMode::Yes),
            "no" => Ok(GitignoreMode::No),
            _ => Err(format!(
                "Invalid gitignore mode '{}'. Must be one of: ask, yes, no",
                s
            )),
        }
    }
}

pub fn run_init(ctx: &OrchestratorContext, gitignore: GitignoreMode) -> Result<()> {
    if !ctx.repo.is_primary() {
        return Err(OrchestratorError::MissingPrerequisite(
            "init must run from the primary repository".to_string(),
        ));
    }

    std::fs::create_dir_all(ctx.state.orchestrator_dir())?;
    std::fs::create_dir_all(ctx.state.locks_dir())?;
    std::fs::create_dir_all(ctx.state.logs_dir())?;
    println!("State dir: {}", ctx.state.root().display());

    if !ctx.config_path.exists() {
        config::save_config(&ctx.config_path, &Config::default())?;
        println!("Created config: {}", ctx.config_path.display());
        println!("Add your agents under [owners] before starting tasks");
    }

    let board_path = ctx.board_path();
    if !board_path.exists() {
        if let Some(parent) = board_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&board_path, board::default_board())?;
        println!("Created TODO board: {}", board_path.display());
    }

    let specs_dir = ctx
        .primary
        .workdir()
        .join(ctx.config.todo.get_specs_dir());
    std::fs::create_dir_all(&specs_dir)?;

    maybe_ignore_state_dir(ctx, gitignore)?;

    println!("Initialized orchestrator workspace");
    Ok(())
}

/// Append the state dir to `.gitignore` when it lives inside the repo.
/// `ask` only prompts on a terminal and defaults to yes otherwise.
fn maybe_ignore_state_dir(ctx: &OrchestratorContext, mode: GitignoreMode) -> Result<()> {
    let repo_root = ctx.primary.workdir();
    let state_rel = match ctx.state.root().strip_prefix(repo_root) {
        Ok(rel) => rel.to_path_buf(),
        Err(_) => return Ok(()),
    };
    let entry = format!("{}/", state_rel.display());

    let gitignore_path = repo_root.join(".gitignore");
    if gitignore_contains(&gitignore_path, &entry) {
        return Ok(());
    }

    let should_write = match mode {
        GitignoreMode::Yes => true,
        GitignoreMode::No => false,
        GitignoreMode::Ask => {
            if std::io::stdin().is_terminal() {
                prompt_yes_no(&format!("Add '{}' to .gitignore?", entry))?
            } else {
                true
            }
        }
    };

    if should_write {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&gitignore_path)?;
        writeln!(file, "{}", entry)?;
        println!("Added '{}' to .gitignore", entry);
    }

    Ok(())
}

fn gitignore_contains(path: &Path, entry: &str) -> bool {
    std::fs::read_to_string(path)
        .map(|content| {
            content
                .lines()
                .any(|line| line.trim() == entry || line.trim() == entry.trim_end_matches('/'))
        })
        .unwrap_or(false)
}

fn prompt_yes_no(question: &str) -> Result<bool> {
    print!("{} [Y/n]: ", question);
    std::io::stdout().flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    Ok(!matches!(input.trim().to_lowercase().as_str(), "n" | "no"))
}
