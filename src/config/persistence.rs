use crate::config::schema::Config;
use crate::error::{OrchestratorError, Result};
use std::path::Path;

/// Name of the config file directly under the state directory.
pub const CONFIG_FILE_NAME: &str = "orchestrator.toml";

pub fn config_path(state_dir: &Path, flag: Option<&Path>) -> std::path::PathBuf {
    match flag {
        Some(p) => p.to_path_buf(),
        None => state_dir.join(CONFIG_FILE_NAME),
    }
}

/// Load the orchestrator config. A missing file yields the defaults so that
/// read-only commands work before `init` has run.
pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }

    let toml_content = std::fs::read_to_string(path).map_err(|e| {
        OrchestratorError::Config(format!(
            "Failed to read config file {}: {}",
            path.display(),
            e
        ))
    })?;

    toml::from_str(&toml_content)
        .map_err(|e| OrchestratorError::Config(format!("Failed to parse config: {}", e)))
}

pub fn save_config(path: &Path, config: &Config) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            OrchestratorError::Config(format!(
                "Failed to create config directory {}: {}",
                parent.display(),
                e
            ))
        })?;
    }

    let toml_str = toml::to_string_pretty(config)
        .map_err(|e| OrchestratorError::Config(format!("Failed to serialize config: {}", e)))?;

    std::fs::write(path, toml_str)
        .map_err(|e| OrchestratorError::Config(format!("Failed to write config file: {}", e)))?;

    Ok(())
}
