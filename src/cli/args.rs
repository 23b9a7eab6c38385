use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "codex-teams")]
#[command(
    about = "Orchestrate parallel codex workers over a TODO board, one git worktree per task"
)]
pub struct Args {
    /// Repository to operate on (defaults to the one containing the cwd)
    #[arg(long, global = true, value_name = "PATH")]
    pub repo: Option<PathBuf>,

    /// Shared state directory (defaults to AI_STATE_DIR, then <repo>/.state)
    #[arg(long, global = true, value_name = "PATH")]
    pub state_dir: Option<PathBuf>,

    /// Config file (defaults to <state>/orchestrator.toml)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(about = "Initialize the state directory, config, and TODO board")]
    Init {
        #[arg(long, default_value = "ask", help = "Add the state dir to .gitignore")]
        gitignore: String,
    },
    #[command(about = "Task lifecycle commands")]
    Task {
        #[command(subcommand)]
        action: TaskAction,
    },
    #[command(about = "Worktree building blocks of the start pipeline")]
    Worktree {
        #[command(subcommand)]
        action: WorktreeAction,
    },
    #[command(about = "Scheduler commands")]
    Run {
        #[command(subcommand)]
        action: RunAction,
    },
    #[command(about = "Unified snapshot: ready queue, exclusions, locks, workers")]
    Status {
        #[arg(long, help = "JSON output")]
        json: bool,

        #[arg(long, help = "Plain snapshot (interactive dashboard is external)")]
        tui: bool,

        #[arg(long, value_name = "LABEL")]
        trigger: Option<String>,

        #[arg(long, value_name = "N")]
        max_start: Option<usize>,
    },
    #[command(about = "Alias for the plain status snapshot")]
    Dashboard,
    #[command(about = "Diagnose common issues and orchestrator state")]
    Doctor,
}

#[derive(Subcommand, Debug)]
pub enum TaskAction {
    #[command(about = "Initialize the state directory (same as top-level init)")]
    Init {
        #[arg(long, default_value = "ask")]
        gitignore: String,
    },
    #[command(about = "Add a task row and scaffold its spec")]
    New {
        task_id: String,
        #[arg(long, value_name = "ID[,ID...]")]
        deps: Option<String>,
        summary: String,
    },
    #[command(about = "Create missing spec files for TODO rows")]
    ScaffoldSpecs {
        #[arg(long, value_name = "ID")]
        task: Option<String>,
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        force: bool,
    },
    #[command(about = "Acquire a scope lock")]
    Lock {
        agent: String,
        scope: String,
        task_id: Option<String>,
    },
    #[command(about = "Release a scope lock")]
    Unlock { agent: String, scope: String },
    #[command(about = "Refresh a scope lock heartbeat")]
    Heartbeat { agent: String, scope: String },
    #[command(about = "Write a task status (worker-side)")]
    Update {
        agent: String,
        task_id: String,
        status: String,
        summary: String,
    },
    #[command(about = "Finalize a task: merge, unlock, remove worktree")]
    Complete {
        agent: String,
        scope: String,
        task_id: String,
        #[arg(long)]
        summary: Option<String>,
        #[arg(long, value_name = "LABEL")]
        trigger: Option<String>,
        #[arg(long)]
        no_run_start: bool,
        #[arg(long, value_name = "STRATEGY", help = "ff-only or rebase-then-ff")]
        merge_strategy: Option<String>,
    },
    #[command(about = "Stop running workers (dry run without --apply)")]
    Stop {
        #[arg(long, value_name = "ID")]
        task: Option<String>,
        #[arg(long, value_name = "NAME")]
        owner: Option<String>,
        #[arg(long)]
        all: bool,
        #[arg(long)]
        reason: Option<String>,
        #[arg(long)]
        apply: bool,
    },
    #[command(about = "Reconcile locks, pid records, and worktrees with reality")]
    CleanupStale {
        #[arg(long)]
        apply: bool,
    },
    #[command(about = "Stop all workers and clear the run lock")]
    EmergencyStop {
        #[arg(long)]
        reason: Option<String>,
        #[arg(short = 'y', long)]
        yes: bool,
    },
    #[command(about = "Converge state after a worker exit (idempotent)")]
    AutoCleanupExit {
        task_id: String,
        expected_pid: i32,
        #[arg(long)]
        reason: Option<String>,
    },
    #[command(hide = true, about = "Internal: wait for a worker pid, then clean up")]
    WatchExit { task_id: String, pid: i32 },
}

#[derive(Subcommand, Debug)]
pub enum WorktreeAction {
    #[command(about = "Create the worktree/branch pair for a task")]
    Create { agent: String, task_id: String },
    #[command(about = "Worktree + scope lock + IN_PROGRESS, without a worker")]
    Start { agent: String, task_id: String },
    #[command(about = "List task worktrees")]
    List,
}

#[derive(Subcommand, Debug)]
pub enum RunAction {
    #[command(about = "Evaluate readiness and start ready tasks")]
    Start {
        #[arg(long, help = "Evaluate and print only; mutate nothing")]
        dry_run: bool,

        #[arg(long, help = "Prepare worktrees and locks but launch no workers")]
        no_launch: bool,

        #[arg(long, value_name = "LABEL")]
        trigger: Option<String>,

        #[arg(long, value_name = "N")]
        max_start: Option<usize>,
    },
}
