//! Derived `active_pids.tsv` snapshot.
//!
//! A non-authoritative view of all pid records plus liveness, rebuilt on
//! demand. The rebuild holds an exclusive advisory lock so concurrent
//! refreshes cannot interleave partial writes; readers of the TSV must
//! treat it as a point-in-time snapshot only.

use crate::error::{OrchestratorError, Result};
use crate::state::{PidMeta, StateDir};
use fs2::FileExt;
use std::io::Write;

pub fn refresh_registry(state: &StateDir) -> Result<Vec<(PidMeta, bool)>> {
    let metas = PidMeta::load_all(state);
    let with_liveness: Vec<(PidMeta, bool)> = metas
        .into_iter()
        .map(|m| {
            let alive = m.is_alive();
            (m, alive)
        })
        .collect();

    let path = state.registry_path();
    std::fs::create_dir_all(state.orchestrator_dir()).map_err(|e| {
        OrchestratorError::Config(format!("Failed to create orchestrator directory: {}", e))
    })?;

    let file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&path)
        .map_err(|e| {
            OrchestratorError::Config(format!("Failed to open registry {}: {}", path.display(), e))
        })?;

    file.try_lock_exclusive()
        .map_err(|e| OrchestratorError::Config(format!("Failed to lock registry: {}", e)))?;

    let mut writer = std::io::BufWriter::new(&file);
    let result = (|| -> std::io::Result<()> {
        writeln!(writer, "TASK\tPID\tOWNER\tSCOPE\tALIVE\tBACKEND")?;
        for (meta, alive) in &with_liveness {
            writeln!(
                writer,
                "{}\t{}\t{}\t{}\t{}\t{}",
                meta.task_id, meta.pid, meta.owner, meta.scope, alive, meta.launch_backend
            )?;
        }
        writer.flush()
    })();

    if let Err(e) = FileExt::unlock(&file) {
        tracing::warn!("Failed to release registry lock: {}", e);
    }

    result.map_err(OrchestratorError::Io)?;
    Ok(with_liveness)
}
