//! Readiness evaluation: TODO rows ranked against live runtime signals.
//!
//! Evaluation is a pure function of a snapshot taken from the state
//! directory; with identical inputs the output is deterministic. The
//! scheduler takes the snapshot while holding the run lock and re-verifies
//! each start by attempting atomic lock creation.

use crate::board::TaskRow;
use crate::config::Config;
use crate::error::Result;
use crate::specs::{self, SpecStatus};
use crate::state::{registry, PidMeta, ScopeLock, StateDir};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExclusionReason {
    UnmappedOwner,
    ActiveWorker,
    ActiveLock,
    ActiveSignalConflict,
    OwnerBusy,
    MissingTaskSpec,
    InvalidTaskSpec,
    DepsNotReady,
}

impl ExclusionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExclusionReason::UnmappedOwner => "unmapped_owner",
            ExclusionReason::ActiveWorker => "active_worker",
            ExclusionReason::ActiveLock => "active_lock",
            ExclusionReason::ActiveSignalConflict => "active_signal_conflict",
            ExclusionReason::OwnerBusy => "owner_busy",
            ExclusionReason::MissingTaskSpec => "missing_task_spec",
            ExclusionReason::InvalidTaskSpec => "invalid_task_spec",
            ExclusionReason::DepsNotReady => "deps_not_ready",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalSource {
    Pid,
    Lock,
    Both,
}

impl SignalSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalSource::Pid => "pid",
            SignalSource::Lock => "lock",
            SignalSource::Both => "both",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Exclusion {
    pub task_id: String,
    pub owner: String,
    pub reason: ExclusionReason,
    pub source: Option<SignalSource>,
    pub detail: String,
}

#[derive(Debug, Clone)]
pub struct Readiness {
    pub ready: Vec<TaskRow>,
    pub excluded: Vec<Exclusion>,
    pub running_locks: Vec<ScopeLock>,
}

/// Point-in-time view of the runtime signals: every scope lock plus every
/// pid record with its liveness.
#[derive(Debug, Clone)]
pub struct RuntimeSnapshot {
    pub locks: Vec<ScopeLock>,
    pub pids: Vec<(PidMeta, bool)>,
}

impl RuntimeSnapshot {
    pub fn collect(state: &StateDir) -> Result<RuntimeSnapshot> {
        let locks = ScopeLock::load_all(state);
        let pids = registry::refresh_registry(state)?;
        Ok(RuntimeSnapshot { locks, pids })
    }

    pub fn pid_record(&self, task_id: &str) -> Option<&(PidMeta, bool)> {
        self.pids.iter().find(|(m, _)| m.task_id == task_id)
    }

    pub fn live_pid(&self, task_id: &str) -> Option<&PidMeta> {
        self.pids
            .iter()
            .filter(|(_, alive)| *alive)
            .map(|(m, _)| m)
            .find(|m| m.task_id == task_id)
    }

    pub fn lock_for_task(&self, task_id: &str) -> Option<&ScopeLock> {
        self.locks.iter().find(|l| l.task_id == task_id)
    }

    pub fn lock_for_scope(&self, scope: &str) -> Option<&ScopeLock> {
        self.locks.iter().find(|l| l.scope == scope)
    }

    /// Owner of every active task: live workers plus lock holders.
    fn busy_owners(&self) -> BTreeMap<String, String> {
        let mut owners = BTreeMap::new();
        for lock in &self.locks {
            owners.insert(lock.owner.clone(), lock.task_id.clone());
        }
        for (meta, alive) in &self.pids {
            if *alive {
                owners.insert(meta.owner.clone(), meta.task_id.clone());
            }
        }
        owners
    }
}

fn classify(
    row: &TaskRow,
    all_rows: &[TaskRow],
    snapshot: &RuntimeSnapshot,
    config: &Config,
    repo_root: &Path,
) -> Option<(ExclusionReason, Option<SignalSource>, String)> {
    // Fixed priority: the first matching reason wins.
    let scope = match config.scope_for_owner(&row.owner) {
        Some(scope) => scope,
        None => {
            return Some((
                ExclusionReason::UnmappedOwner,
                None,
                format!("owner '{}' has no [owners] entry", row.owner),
            ))
        }
    };

    if let Some(meta) = snapshot.live_pid(&row.id) {
        let source = if snapshot.lock_for_task(&row.id).is_some() {
            SignalSource::Both
        } else {
            SignalSource::Pid
        };
        return Some((
            ExclusionReason::ActiveWorker,
            Some(source),
            format!("worker pid {} is alive", meta.pid),
        ));
    }

    if let Some(lock) = snapshot.lock_for_task(&row.id) {
        let source = if snapshot.pid_record(&row.id).is_some() {
            SignalSource::Both
        } else {
            SignalSource::Lock
        };
        return Some((
            ExclusionReason::ActiveLock,
            Some(source),
            format!("scope '{}' lock held by {}", lock.scope, lock.owner),
        ));
    }

    if let Some(lock) = snapshot.lock_for_scope(scope) {
        let conflicting = snapshot
            .pids
            .iter()
            .filter(|(_, alive)| *alive)
            .map(|(m, _)| m)
            .find(|m| m.scope == scope && m.task_id != lock.task_id);
        if let Some(meta) = conflicting {
            return Some((
                ExclusionReason::ActiveSignalConflict,
                Some(SignalSource::Both),
                format!(
                    "scope '{}' lock names {} but live worker pid {} runs {}",
                    scope, lock.task_id, meta.pid, meta.task_id
                ),
            ));
        }
    }

    if let Some(busy_task) = snapshot.busy_owners().get(&row.owner) {
        if busy_task != &row.id {
            return Some((
                ExclusionReason::OwnerBusy,
                None,
                format!("owner '{}' is busy with {}", row.owner, busy_task),
            ));
        }
    }

    match specs::validate(repo_root, &config.todo.get_specs_dir(), &row.id) {
        SpecStatus::Missing => {
            return Some((
                ExclusionReason::MissingTaskSpec,
                None,
                format!("no spec file for {}", row.id),
            ))
        }
        SpecStatus::Invalid(reason) => {
            return Some((ExclusionReason::InvalidTaskSpec, None, reason))
        }
        SpecStatus::Valid(_) => {}
    }

    if row.has_deps() {
        for dep in &row.deps {
            let done = all_rows
                .iter()
                .find(|r| &r.id == dep)
                .map(|r| r.is_done())
                .unwrap_or(false);
            if !done {
                return Some((
                    ExclusionReason::DepsNotReady,
                    None,
                    format!("dependency {} is not DONE", dep),
                ));
            }
        }
    }

    None
}

/// Evaluate all TODO rows against the snapshot, in file order.
pub fn evaluate(
    rows: &[TaskRow],
    snapshot: &RuntimeSnapshot,
    config: &Config,
    repo_root: &Path,
    max_start: Option<usize>,
) -> Readiness {
    let mut ready = Vec::new();
    let mut excluded = Vec::new();

    for row in rows.iter().filter(|r| r.is_todo()) {
        match classify(row, rows, snapshot, config, repo_root) {
            Some((reason, source, detail)) => excluded.push(Exclusion {
                task_id: row.id.clone(),
                owner: row.owner.clone(),
                reason,
                source,
                detail,
            }),
            None => ready.push(row.clone()),
        }
    }

    if let Some(max) = max_start {
        ready.truncate(max);
    }

    Readiness {
        ready,
        excluded,
        running_locks: snapshot.locks.clone(),
    }
}

/// Derive the scope for an owner via the config map, falling back to the
/// default mutex domain.
pub fn scope_for(config: &Config, owner: &str) -> String {
    config
        .scope_for_owner(owner)
        .unwrap_or(crate::config::DEFAULT_SCOPE)
        .to_string()
}
