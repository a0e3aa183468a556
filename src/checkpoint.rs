//! Checkpoint persistence and restore.
//!
//! One JSON snapshot per archive, keyed by a hash of the archive path.
//! Writes go through a sibling temp file and an atomic rename, so a crash
//! mid-save can never destroy the previous snapshot. Corrupt files are
//! quarantined and the attack starts fresh.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::workers::{WorkerAllocation, WorkerConfig};
use crate::CrackError;

/// Serialized attack state, sufficient to resume at the exact positions
/// where a run stopped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttackState {
    pub archive_path: String,
    pub variant_tag: String,
    pub plan_fingerprint: String,

    pub cpu_attempts: u64,
    pub dictionary_line_position: u64,
    pub cpu_current_position: u64,

    /// 1-indexed phase the GPU worker is in.
    pub gpu_current_phase: u32,
    pub gpu_total_phases: u32,
    pub gpu_in_phase_progress_percent: f64,
    pub gpu_accumulated_attempts: u64,
    /// Monotone non-decreasing across saves for a fixed plan.
    pub gpu_overall_progress_percent: f64,

    pub elapsed_seconds: u64,
    pub worker_config: WorkerConfig,
    pub worker_allocation: WorkerAllocation,
    pub total_search_space: u64,
    pub last_saved: DateTime<Utc>,
}

impl AttackState {
    pub fn fresh(
        archive_path: &Path,
        variant_tag: &str,
        plan_fingerprint: String,
        worker_config: WorkerConfig,
        total_search_space: u64,
    ) -> Self {
        Self {
            archive_path: archive_path.display().to_string(),
            variant_tag: variant_tag.to_string(),
            plan_fingerprint,
            cpu_attempts: 0,
            dictionary_line_position: 0,
            cpu_current_position: 0,
            gpu_current_phase: 1,
            gpu_total_phases: 0,
            gpu_in_phase_progress_percent: 0.0,
            gpu_accumulated_attempts: 0,
            gpu_overall_progress_percent: 0.0,
            elapsed_seconds: 0,
            worker_config,
            worker_allocation: WorkerAllocation::default(),
            total_search_space,
            last_saved: Utc::now(),
        }
    }

    /// Whether a loaded snapshot belongs to the given attack identity.
    pub fn matches(&self, archive_path: &Path, plan_fingerprint: &str) -> bool {
        self.archive_path == archive_path.display().to_string()
            && self.plan_fingerprint == plan_fingerprint
    }
}

pub struct CheckpointManager {
    dir: PathBuf,
}

impl CheckpointManager {
    pub fn new(dir: &Path) -> Result<Self, CrackError> {
        std::fs::create_dir_all(dir).map_err(|e| CrackError::io_at(e, dir))?;
        Ok(Self { dir: dir.to_path_buf() })
    }

    /// Checkpoint file for an archive, keyed by its path hash.
    pub fn file_for(&self, archive_path: &Path) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(archive_path.display().to_string().as_bytes());
        let digest = hasher.finalize();
        let key: String = digest[..8].iter().map(|b| format!("{:02x}", b)).collect();
        self.dir.join(format!("attack-{key}.json"))
    }

    /// Atomically persists the snapshot, stamping `last_saved`.
    pub fn save(&self, state: &mut AttackState) -> Result<(), CrackError> {
        state.last_saved = Utc::now();
        let target = self.file_for(Path::new(&state.archive_path));

        let write = || -> Result<(), CrackError> {
            let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
            serde_json::to_writer_pretty(&mut tmp, state)
                .map_err(|e| CrackError::CheckpointWriteFailed { detail: e.to_string() })?;
            tmp.flush()?;
            tmp.persist(&target)
                .map_err(|e| CrackError::io_at(e.error, &target))?;
            Ok(())
        };
        write().map_err(|e| {
            warn!(error = %e, "checkpoint save failed");
            CrackError::CheckpointWriteFailed { detail: e.to_string() }
        })?;
        debug!(path = %target.display(), "checkpoint saved");
        Ok(())
    }

    /// Loads the snapshot for an archive. A corrupt file is renamed aside
    /// and reported as absent; the caller starts from scratch.
    pub fn load(&self, archive_path: &Path) -> Option<AttackState> {
        let target = self.file_for(archive_path);
        let bytes = std::fs::read(&target).ok()?;
        match serde_json::from_slice::<AttackState>(&bytes) {
            Ok(state) => Some(state),
            Err(e) => {
                warn!(path = %target.display(), error = %e, "quarantining corrupt checkpoint");
                let _ = std::fs::rename(&target, target.with_extension("json.corrupt"));
                None
            }
        }
    }

    pub fn delete(&self, archive_path: &Path) {
        let target = self.file_for(archive_path);
        let _ = std::fs::remove_file(target);
    }
}
