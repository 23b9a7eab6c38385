//! Append-only status log.
//!
//! Every status transition and cleanup event appends one line to
//! `<state>/LATEST_UPDATES.md`. The log is advisory: append failures are
//! logged and never abort the caller.

use crate::state::{timestamp, StateDir};
use std::io::Write;

pub fn append_update(state: &StateDir, actor: &str, task: &str, status: &str, reason: &str) {
    let line = format!("- [{}] {} {} {} {}\n", timestamp(), actor, task, status, reason);

    let path = state.updates_path();
    let result = (|| -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        file.write_all(line.as_bytes())
    })();

    if let Err(e) = result {
        tracing::warn!("Failed to append update log {}: {}", path.display(), e);
    }
}
