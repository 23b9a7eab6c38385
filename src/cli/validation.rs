//! Parsing of string-typed CLI inputs into domain values. Everything here
//! fails with the `Rejected` error kind so invalid operator input is
//! distinguishable from runtime failures.

use crate::commands::init::GitignoreMode;
use crate::config::MergeStrategy;
use crate::error::{OrchestratorError, Result};

pub fn parse_gitignore_mode(raw: &str) -> Result<GitignoreMode> {
    raw.parse::<GitignoreMode>()
        .map_err(OrchestratorError::Rejected)
}

pub fn parse_merge_strategy(raw: Option<&str>) -> Result<Option<MergeStrategy>> {
    match raw {
        None => Ok(None),
        Some(raw) => raw
            .parse::<MergeStrategy>()
            .map(Some)
            .map_err(OrchestratorError::Rejected),
    }
}

pub fn validate_task_id(id: &str) -> Result<()> {
    if crate::board::is_valid_task_id(id) {
        Ok(())
    } else {
        Err(OrchestratorError::Rejected(format!(
            "invalid task id '{}' (expected T<digits>-<digits>)",
            id
        )))
    }
}
