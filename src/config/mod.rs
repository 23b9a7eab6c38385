pub mod paths;
pub mod persistence;
pub mod schema;

pub use paths::*;
pub use persistence::*;
pub use schema::*;

fn default_codex_bin() -> String {
    "codex".to_string()
}

fn default_codex_flags() -> Vec<String> {
    vec!["exec".to_string(), "--full-auto".to_string()]
}

fn default_todo_path() -> String {
    "tasks/TODO.md".to_string()
}

fn default_specs_dir() -> String {
    "tasks/specs".to_string()
}
