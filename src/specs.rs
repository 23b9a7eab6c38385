//! Per-task spec files under `tasks/specs/<id>.md`.
//!
//! A spec is valid when each required H2 section appears exactly once with
//! at least one non-blank body line before the next `##`. Validation is a
//! pure function of the filesystem.

use crate::error::Result;
use std::path::{Path, PathBuf};

pub const REQUIRED_SECTIONS: [&str; 3] = ["## Goal", "## In Scope", "## Acceptance Criteria"];

const SUMMARY_MAX_LEN: usize = 120;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecSummary {
    pub goal: String,
    pub in_scope: String,
    pub acceptance: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpecStatus {
    Valid(SpecSummary),
    Missing,
    Invalid(String),
}

impl SpecStatus {
    pub fn is_valid(&self) -> bool {
        matches!(self, SpecStatus::Valid(_))
    }
}

pub fn spec_path(repo_root: &Path, specs_dir: &str, task_id: &str) -> PathBuf {
    repo_root.join(specs_dir).join(format!("{}.md", task_id))
}

fn truncate_summary(line: &str) -> String {
    let trimmed = line.trim();
    if trimmed.len() <= SUMMARY_MAX_LEN {
        return trimmed.to_string();
    }
    let mut cut = SUMMARY_MAX_LEN;
    while !trimmed.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}...", &trimmed[..cut])
}

/// First non-blank line under `heading`, or None when the section is missing
/// or empty. Errs with the duplicate count when the heading repeats.
fn section_summary(content: &str, heading: &str) -> std::result::Result<Option<String>, String> {
    let mut found = 0usize;
    let mut summary: Option<String> = None;
    let mut in_section = false;

    for line in content.lines() {
        let trimmed = line.trim_end();
        if trimmed.trim() == heading {
            found += 1;
            in_section = true;
            continue;
        }
        if trimmed.starts_with("##") {
            in_section = false;
            continue;
        }
        if in_section && summary.is_none() && !trimmed.trim().is_empty() {
            summary = Some(truncate_summary(trimmed));
        }
    }

    match found {
        0 => Ok(None),
        1 => Ok(summary),
        n => Err(format!("section '{}' appears {} times", heading, n)),
    }
}

pub fn validate(repo_root: &Path, specs_dir: &str, task_id: &str) -> SpecStatus {
    let path = spec_path(repo_root, specs_dir, task_id);
    let content = match std::fs::read_to_string(&path) {
        Ok(c) => c,
        Err(_) => return SpecStatus::Missing,
    };

    let mut summaries = Vec::new();
    for heading in REQUIRED_SECTIONS {
        match section_summary(&content, heading) {
            Err(reason) => return SpecStatus::Invalid(reason),
            Ok(None) => {
                // Distinguish a missing heading from a present-but-empty one.
                let present = content.lines().any(|l| l.trim() == heading);
                let reason = if present {
                    format!("section '{}' has no body", heading)
                } else {
                    format!("section '{}' is missing", heading)
                };
                return SpecStatus::Invalid(reason);
            }
            Ok(Some(summary)) => summaries.push(summary),
        }
    }

    let mut iter = summaries.into_iter();
    SpecStatus::Valid(SpecSummary {
        goal: iter.next().unwrap_or_default(),
        in_scope: iter.next().unwrap_or_default(),
        acceptance: iter.next().unwrap_or_default(),
    })
}

/// Scaffold template used by `task new` and `scaffold-specs`.
pub fn template(task_id: &str, title: &str) -> String {
    format!(
        "# {}: {}\n\n\
         ## Goal\n\n{}\n\n\
         ## In Scope\n\n- TBD\n\n\
         ## Acceptance Criteria\n\n- TBD\n",
        task_id, title, title
    )
}

pub fn scaffold(repo_root: &Path, specs_dir: &str, task_id: &str, title: &str) -> Result<PathBuf> {
    let path = spec_path(repo_root, specs_dir, task_id);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, template(task_id, title))?;
    Ok(path)
}
