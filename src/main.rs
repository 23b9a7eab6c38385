use clap::Parser;

mod autocleanup;
mod board;
mod cli;
mod commands;
mod complete;
mod config;
mod context;
mod error;
mod git;
mod launcher;
mod process;
mod readiness;
mod scheduler;
mod specs;
mod state;

use autocleanup::StopFilter;
use cli::{Args, Commands, RunAction, TaskAction, WorktreeAction};
use complete::CompleteOptions;
use context::OrchestratorContext;
use error::OrchestratorError;
use scheduler::RunStartOptions;

const DEFAULT_TRIGGER: &str = "cli";

fn main() {
    match run() {
        Ok(code) => {
            std::process::exit(code);
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

fn run() -> error::Result<i32> {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("CODEX_TEAMS_LOG").unwrap_or_else(|_| "info".to_string()))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let ctx = OrchestratorContext::resolve(
        args.repo.as_deref(),
        args.state_dir.as_deref(),
        args.config.as_deref(),
    )?;

    match args.command {
        Commands::Init { gitignore } => {
            let mode = cli::validation::parse_gitignore_mode(&gitignore)?;
            commands::init::run_init(&ctx, mode)?;
            Ok(0)
        }
        Commands::Task { action } => run_task(&ctx, action),
        Commands::Worktree { action } => {
            match action {
                WorktreeAction::Create { agent, task_id } => {
                    cli::validation::validate_task_id(&task_id)?;
                    commands::worktree::worktree_create(&ctx, &agent, &task_id)?;
                }
                WorktreeAction::Start { agent, task_id } => {
                    cli::validation::validate_task_id(&task_id)?;
                    commands::worktree::worktree_start(&ctx, &agent, &task_id)?;
                }
                WorktreeAction::List => commands::worktree::list_worktrees(&ctx)?,
            }
            Ok(0)
        }
        Commands::Run { action } => match action {
            RunAction::Start {
                dry_run,
                no_launch,
                trigger,
                max_start,
            } => {
                let opts = RunStartOptions {
                    trigger: trigger.unwrap_or_else(|| DEFAULT_TRIGGER.to_string()),
                    dry_run,
                    no_launch,
                    max_start,
                };
                scheduler::run_start(&ctx, &opts)?;
                Ok(0)
            }
        },
        Commands::Status {
            json,
            tui: _,
            trigger: _,
            max_start,
        } => {
            commands::status::print_status(&ctx, json, max_start)?;
            Ok(0)
        }
        Commands::Dashboard => {
            commands::status::print_status(&ctx, false, None)?;
            Ok(0)
        }
        Commands::Doctor => {
            commands::doctor::run_doctor(&ctx)?;
            Ok(0)
        }
    }
}

fn run_task(ctx: &OrchestratorContext, action: TaskAction) -> error::Result<i32> {
    match action {
        TaskAction::Init { gitignore } => {
            let mode = cli::validation::parse_gitignore_mode(&gitignore)?;
            commands::init::run_init(ctx, mode)?;
        }
        TaskAction::New {
            task_id,
            deps,
            summary,
        } => {
            commands::task::new_task(ctx, &task_id, deps.as_deref(), &summary)?;
        }
        TaskAction::ScaffoldSpecs {
            task,
            dry_run,
            force,
        } => {
            commands::task::scaffold_specs(ctx, task.as_deref(), dry_run, force)?;
        }
        TaskAction::Lock {
            agent,
            scope,
            task_id,
        } => {
            commands::task::lock_scope(ctx, &agent, &scope, task_id.as_deref())?;
        }
        TaskAction::Unlock { agent, scope } => {
            commands::task::unlock_scope(ctx, &agent, &scope)?;
        }
        TaskAction::Heartbeat { agent, scope } => {
            commands::task::heartbeat_scope(ctx, &agent, &scope)?;
        }
        TaskAction::Update {
            agent,
            task_id,
            status,
            summary,
        } => {
            commands::task::update_task_status(ctx, &agent, &task_id, &status, &summary)?;
        }
        TaskAction::Complete {
            agent,
            scope,
            task_id,
            summary,
            trigger,
            no_run_start,
            merge_strategy,
        } => {
            let opts = CompleteOptions {
                agent,
                scope,
                task_id,
                summary,
                trigger: trigger.unwrap_or_else(|| "task-complete".to_string()),
                no_run_start,
                merge_strategy: cli::validation::parse_merge_strategy(merge_strategy.as_deref())?,
            };
            complete::run_complete(ctx, &opts)?;
        }
        TaskAction::Stop {
            task,
            owner,
            all,
            reason,
            apply,
        } => {
            let filter = match (task, owner, all) {
                (Some(task), None, false) => StopFilter::Task(task),
                (None, Some(owner), false) => StopFilter::Owner(owner),
                (None, None, true) => StopFilter::All,
                _ => {
                    return Err(OrchestratorError::Rejected(
                        "task stop needs exactly one of --task, --owner, --all".to_string(),
                    ))
                }
            };
            autocleanup::stop_tasks(ctx, &filter, reason.as_deref(), apply)?;
        }
        TaskAction::CleanupStale { apply } => {
            autocleanup::cleanup_stale(ctx, apply)?;
        }
        TaskAction::EmergencyStop { reason, yes } => {
            autocleanup::emergency_stop(ctx, reason.as_deref(), yes)?;
        }
        TaskAction::AutoCleanupExit {
            task_id,
            expected_pid,
            reason,
        } => {
            autocleanup::auto_cleanup_exit(ctx, &task_id, expected_pid, reason.as_deref())?;
        }
        TaskAction::WatchExit { task_id, pid } => {
            autocleanup::watch_exit(ctx, &task_id, pid)?;
        }
    }
    Ok(0)
}
