//! TODO board: a markdown pipe table treated as the durable task queue.
//!
//! The header row names the columns (`ID|Title|Owner|Deps|Notes|Status` in
//! any order); the parsed schema records their positions. Mutations are
//! surgical: only the targeted cell's bytes change, every other byte of the
//! file is preserved, and the rewrite is atomic (write temp then rename).

use crate::error::{OrchestratorError, Result};
use crate::state::kv;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

pub const STATUS_TODO: &str = "TODO";
pub const STATUS_IN_PROGRESS: &str = "IN_PROGRESS";
pub const STATUS_BLOCKED: &str = "BLOCKED";
pub const STATUS_DONE: &str = "DONE";

/// The dependency sentinel for "no dependencies".
pub const DEPS_NONE: &str = "-";

fn task_id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^T\d+-\d+$").expect("task id regex"))
}

pub fn is_valid_task_id(id: &str) -> bool {
    task_id_regex().is_match(id)
}

pub fn is_valid_status(status: &str) -> bool {
    matches!(
        status,
        STATUS_TODO | STATUS_IN_PROGRESS | STATUS_BLOCKED | STATUS_DONE
    )
}

/// Localized spellings accepted as "done" by the completion guard and the
/// dependency evaluator. Kept to the literal set.
pub fn is_done_status(status: &str) -> bool {
    matches!(status, "DONE" | "완료" | "Complete" | "complete")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRow {
    pub id: String,
    pub title: String,
    pub owner: String,
    pub deps: Vec<String>,
    pub notes: String,
    pub status: String,
    line_index: usize,
}

impl TaskRow {
    pub fn is_todo(&self) -> bool {
        self.status == STATUS_TODO
    }

    pub fn is_done(&self) -> bool {
        is_done_status(&self.status)
    }

    pub fn has_deps(&self) -> bool {
        !self.deps.is_empty()
    }
}

#[derive(Debug, Clone)]
struct ColumnSchema {
    id: usize,
    title: usize,
    owner: usize,
    deps: usize,
    notes: usize,
    status: usize,
    count: usize,
}

impl ColumnSchema {
    fn from_header(cells: &[String]) -> Option<ColumnSchema> {
        let mut id = None;
        let mut title = None;
        let mut owner = None;
        let mut deps = None;
        let mut notes = None;
        let mut status = None;

        for (i, cell) in cells.iter().enumerate() {
            match cell.trim().to_lowercase().as_str() {
                "id" => id = Some(i),
                "title" => title = Some(i),
                "owner" => owner = Some(i),
                "deps" => deps = Some(i),
                "notes" => notes = Some(i),
                "status" => status = Some(i),
                _ => {}
            }
        }

        Some(ColumnSchema {
            id: id?,
            title: title?,
            owner: owner?,
            deps: deps?,
            notes: notes?,
            status: status?,
            count: cells.len(),
        })
    }
}

pub struct TodoBoard {
    path: PathBuf,
    lines: Vec<String>,
    trailing_newline: bool,
    schema: ColumnSchema,
    rows: Vec<TaskRow>,
    /// Line index of the last table row (separator when the table is empty).
    last_table_line: usize,
}

/// Byte ranges of table cells, splitting on pipes not preceded by a
/// backslash. Text before the first pipe and after a trailing pipe is not a
/// cell.
fn cell_ranges(line: &str) -> Vec<(usize, usize)> {
    let mut ranges = Vec::new();
    let mut start: Option<usize> = None;
    let mut escape = false;

    for (i, ch) in line.char_indices() {
        if escape {
            escape = false;
            continue;
        }
        match ch {
            '\\' => escape = true,
            '|' => {
                if let Some(s) = start {
                    ranges.push((s, i));
                }
                start = Some(i + 1);
            }
            _ => {}
        }
    }

    if let Some(s) = start {
        if s < line.len() {
            ranges.push((s, line.len()));
        }
    }

    ranges
}

fn raw_cells(line: &str) -> Vec<String> {
    cell_ranges(line)
        .into_iter()
        .map(|(s, e)| line[s..e].to_string())
        .collect()
}

fn unescape_cell(raw: &str) -> String {
    raw.trim().replace("\\|", "|")
}

fn escape_cell(value: &str) -> String {
    value.replace('|', "\\|")
}

fn is_table_line(line: &str) -> bool {
    line.trim_start().starts_with('|')
}

fn is_separator_line(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.starts_with('|')
        && trimmed
            .chars()
            .all(|c| matches!(c, '|' | '-' | ':' | ' '))
        && trimmed.contains('-')
}

fn parse_deps(raw: &str) -> Vec<String> {
    if raw.trim() == DEPS_NONE || raw.trim().is_empty() {
        return Vec::new();
    }
    raw.split(',')
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty())
        .collect()
}

impl TodoBoard {
    pub fn load(path: &Path) -> Result<TodoBoard> {
        let content = std::fs::read_to_string(path).map_err(|_| {
            OrchestratorError::NotFound(format!("TODO board at {}", path.display()))
        })?;

        let trailing_newline = content.ends_with('\n');
        let lines: Vec<String> = content.lines().map(|l| l.to_string()).collect();

        let mut header_index = None;
        let mut schema = None;
        for (i, line) in lines.iter().enumerate() {
            if !is_table_line(line) {
                continue;
            }
            let cells = raw_cells(line);
            if let Some(parsed) = ColumnSchema::from_header(&cells) {
                header_index = Some(i);
                schema = Some(parsed);
                break;
            }
        }

        let (header_index, schema) = match (header_index, schema) {
            (Some(h), Some(s)) => (h, s),
            _ => {
                return Err(OrchestratorError::Config(format!(
                    "TODO board {} has no header row naming ID/Title/Owner/Deps/Notes/Status",
                    path.display()
                )))
            }
        };

        let mut rows = Vec::new();
        let mut last_table_line = header_index;
        for (i, line) in lines.iter().enumerate().skip(header_index + 1) {
            if !is_table_line(line) {
                break;
            }
            last_table_line = i;
            if is_separator_line(line) {
                continue;
            }

            let cells = raw_cells(line);
            if cells.len() < schema.count {
                tracing::warn!(
                    "Skipping malformed TODO row at {}:{}",
                    path.display(),
                    i + 1
                );
                continue;
            }

            rows.push(TaskRow {
                id: unescape_cell(&cells[schema.id]),
                title: unescape_cell(&cells[schema.title]),
                owner: unescape_cell(&cells[schema.owner]),
                deps: parse_deps(&unescape_cell(&cells[schema.deps])),
                notes: unescape_cell(&cells[schema.notes]),
                status: unescape_cell(&cells[schema.status]),
                line_index: i,
            });
        }

        Ok(TodoBoard {
            path: path.to_path_buf(),
            lines,
            trailing_newline,
            schema,
            rows,
            last_table_line,
        })
    }

    /// Rows in file order.
    pub fn tasks(&self) -> &[TaskRow] {
        &self.rows
    }

    pub fn find(&self, id: &str) -> Option<&TaskRow> {
        self.rows.iter().find(|r| r.id == id)
    }

    fn render(&self) -> String {
        let mut content = self.lines.join("\n");
        if self.trailing_newline {
            content.push('\n');
        }
        content
    }

    fn save(&self) -> Result<()> {
        kv::write_atomic(&self.path, &self.render())
    }

    /// Rewrite only the Status cell of the row with this id. The new cell is
    /// padded to the old cell's width when shorter so the table keeps its
    /// alignment; all other bytes of the file are untouched.
    pub fn update_status(&mut self, id: &str, new_status: &str) -> Result<()> {
        if !is_valid_status(new_status) && !is_done_status(new_status) {
            return Err(OrchestratorError::Rejected(format!(
                "invalid status '{}'",
                new_status
            )));
        }

        let row = self
            .rows
            .iter()
            .position(|r| r.id == id)
            .ok_or_else(|| OrchestratorError::NotFound(format!("task {} in TODO board", id)))?;

        let line_index = self.rows[row].line_index;
        let line = self.lines[line_index].clone();
        let ranges = cell_ranges(&line);
        let (start, end) = ranges[self.schema.status];

        let old_width = end - start;
        let mut cell = format!(" {} ", escape_cell(new_status));
        while cell.len() < old_width {
            cell.push(' ');
        }

        let mut new_line = String::with_capacity(line.len());
        new_line.push_str(&line[..start]);
        new_line.push_str(&cell);
        new_line.push_str(&line[end..]);

        self.lines[line_index] = new_line;
        self.rows[row].status = new_status.to_string();
        self.save()
    }

    /// Append a task row after the last table row.
    pub fn append_row(
        &mut self,
        id: &str,
        title: &str,
        owner: &str,
        deps: &[String],
        status: &str,
    ) -> Result<()> {
        if !is_valid_task_id(id) {
            return Err(OrchestratorError::Rejected(format!(
                "invalid task id '{}' (expected T<digits>-<digits>)",
                id
            )));
        }
        if self.find(id).is_some() {
            return Err(OrchestratorError::Rejected(format!(
                "task id '{}' already present",
                id
            )));
        }
        if !is_valid_status(status) {
            return Err(OrchestratorError::Rejected(format!(
                "invalid status '{}'",
                status
            )));
        }
        for dep in deps {
            if self.find(dep).is_none() {
                return Err(OrchestratorError::Rejected(format!(
                    "dependency '{}' is not a known task id",
                    dep
                )));
            }
        }

        let deps_cell = if deps.is_empty() {
            DEPS_NONE.to_string()
        } else {
            deps.join(",")
        };

        let mut cells = vec![String::new(); self.schema.count];
        cells[self.schema.id] = id.to_string();
        cells[self.schema.title] = escape_cell(title);
        cells[self.schema.owner] = owner.to_string();
        cells[self.schema.deps] = deps_cell;
        cells[self.schema.notes] = DEPS_NONE.to_string();
        cells[self.schema.status] = status.to_string();

        let line = format!("| {} |", cells.join(" | "));
        let insert_at = self.last_table_line + 1;
        self.lines.insert(insert_at, line);
        self.last_table_line = insert_at;

        for row in &mut self.rows {
            if row.line_index >= insert_at {
                row.line_index += 1;
            }
        }
        self.rows.push(TaskRow {
            id: id.to_string(),
            title: title.to_string(),
            owner: owner.to_string(),
            deps: deps.to_vec(),
            notes: DEPS_NONE.to_string(),
            status: status.to_string(),
            line_index: insert_at,
        });

        self.save()
    }

    /// Rewrite the file from the parsed lines. With no mutations this is a
    /// byte-for-byte no-op.
    pub fn rewrite(&self) -> Result<()> {
        self.save()
    }
}

/// Default board content written by `init`.
pub fn default_board() -> String {
    "# TODO\n\n\
     | ID | Title | Owner | Deps | Notes | Status |\n\
     |----|-------|-------|------|-------|--------|\n"
        .to_string()
}
