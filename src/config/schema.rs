use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Default mutex domain for scope-less invocations.
pub const DEFAULT_SCOPE: &str = "app-shell";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LaunchBackend {
    #[default]
    Tmux,
    CodexExec,
}

impl std::fmt::Display for LaunchBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LaunchBackend::Tmux => write!(f, "tmux"),
            LaunchBackend::CodexExec => write!(f, "codex_exec"),
        }
    }
}

impl std::str::FromStr for LaunchBackend {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "tmux" => Ok(LaunchBackend::Tmux),
            "codex_exec" => Ok(LaunchBackend::CodexExec),
            _ => Err(format!(
                "Invalid launch backend '{}'. Must be one of: tmux, codex_exec",
                s
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum MergeStrategy {
    FfOnly,
    #[default]
    RebaseThenFf,
}

impl std::fmt::Display for MergeStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MergeStrategy::FfOnly => write!(f, "ff-only"),
            MergeStrategy::RebaseThenFf => write!(f, "rebase-then-ff"),
        }
    }
}

impl std::str::FromStr for MergeStrategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ff-only" => Ok(MergeStrategy::FfOnly),
            "rebase-then-ff" => Ok(MergeStrategy::RebaseThenFf),
            _ => Err(format!(
                "Invalid merge strategy '{}'. Must be one of: ff-only, rebase-then-ff",
                s
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RuntimeConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub launch_backend: Option<LaunchBackend>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codex_bin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codex_flags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_template: Option<String>,
}

impl RuntimeConfig {
    pub fn get_launch_backend(&self) -> LaunchBackend {
        self.launch_backend.unwrap_or_default()
    }

    pub fn get_codex_bin(&self) -> String {
        self.codex_bin.clone().unwrap_or_else(super::default_codex_bin)
    }

    pub fn get_codex_flags(&self) -> Vec<String> {
        self.codex_flags
            .clone()
            .unwrap_or_else(super::default_codex_flags)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MergeConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<MergeStrategy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_branch: Option<String>,
}

impl MergeConfig {
    pub fn get_strategy(&self) -> MergeStrategy {
        self.strategy.unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TodoConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub specs_dir: Option<String>,
}

impl TodoConfig {
    pub fn get_path(&self) -> String {
        self.path.clone().unwrap_or_else(super::default_todo_path)
    }

    pub fn get_specs_dir(&self) -> String {
        self.specs_dir
            .clone()
            .unwrap_or_else(super::default_specs_dir)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PathsConfig {
    /// Directory where agent worktrees are created. Defaults to the parent
    /// directory of the primary repository.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worktree_parent: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Agent name to default scope. An owner absent from this map never
    /// enters the ready queue (`unmapped_owner`).
    #[serde(default)]
    pub owners: BTreeMap<String, String>,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub merge: MergeConfig,
    #[serde(default)]
    pub todo: TodoConfig,
    #[serde(default)]
    pub paths: PathsConfig,
}

impl Config {
    pub fn scope_for_owner(&self, owner: &str) -> Option<&str> {
        self.owners.get(owner).map(|s| s.as_str())
    }
}
