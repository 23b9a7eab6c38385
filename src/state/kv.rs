//! Line-oriented `key=value` files and atomic write helpers.
//!
//! Lock and pid metadata files share this format. Writes go to a temp file
//! in the same directory followed by a rename, so readers never observe a
//! partial record.

use crate::error::{OrchestratorError, Result};
use std::io::Write;
use std::path::Path;

/// Read one field from a `key=value` file. Returns an empty string when the
/// file or the key is absent; never errors on a missing file.
pub fn read_field(path: &Path, key: &str) -> String {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(_) => return String::new(),
    };

    for line in content.lines() {
        if let Some((k, v)) = line.split_once('=') {
            if k == key {
                return v.to_string();
            }
        }
    }

    String::new()
}

/// Read all pairs in file order. Lines without `=` are skipped.
pub fn read_pairs(path: &Path) -> Vec<(String, String)> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(_) => return Vec::new(),
    };

    content
        .lines()
        .filter_map(|line| {
            line.split_once('=')
                .map(|(k, v)| (k.to_string(), v.to_string()))
        })
        .collect()
}

/// Atomically replace `path` with the given content (write temp, rename).
/// Parent directories are created lazily.
pub fn write_atomic(path: &Path, content: &str) -> Result<()> {
    let parent = path.parent().ok_or_else(|| {
        OrchestratorError::Config(format!("Invalid state path: {}", path.display()))
    })?;

    std::fs::create_dir_all(parent).map_err(|e| {
        OrchestratorError::Config(format!(
            "Failed to create state directory {}: {}",
            parent.display(),
            e
        ))
    })?;

    let tmp = parent.join(format!(
        ".{}.tmp.{}",
        path.file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "state".to_string()),
        std::process::id()
    ));

    {
        let mut file = std::fs::File::create(&tmp)?;
        file.write_all(content.as_bytes())?;
        file.sync_all()?;
    }

    std::fs::rename(&tmp, path).map_err(|e| {
        let _ = std::fs::remove_file(&tmp);
        OrchestratorError::Io(e)
    })?;

    Ok(())
}

/// Atomically write a `key=value` file from the given pairs.
pub fn write_pairs(path: &Path, pairs: &[(&str, &str)]) -> Result<()> {
    let mut content = String::new();
    for (k, v) in pairs {
        content.push_str(k);
        content.push('=');
        content.push_str(v);
        content.push('\n');
    }
    write_atomic(path, &content)
}
