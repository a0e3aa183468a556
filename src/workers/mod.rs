//! Worker infrastructure shared by the CPU engine and the GPU driver:
//! event types, worker configuration and search-space allocation.

mod cpu;
mod gpu;

pub use cpu::{CpuConfig, CpuProgressSnapshot, CpuSource, CpuWorker};
pub use gpu::{GpuConfig, GpuOutputParser, GpuPhaseOutcome, GpuStatusUpdate, GpuWorker};

use serde::{Deserialize, Serialize};

/// Which worker produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerKind {
    Cpu,
    Gpu,
}

/// Events funneled from both workers into the orchestrator. Soft errors
/// arrive here too; only `Fatal` aborts an attack.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    /// CPU batch boundary: cumulative totals, published atomically.
    CpuProgress { tested_total: u64, last_password: String, dictionary_line: u64, position: u64 },
    /// The CPU worker ran out of candidates.
    CpuExhausted { tested_total: u64 },
    /// A parsed GPU status line.
    GpuStatus {
        /// 1-indexed phase the status belongs to.
        phase: u32,
        speed_hps: f64,
        in_phase_percent: f64,
        in_phase_attempts: u64,
        temp_c: Option<u32>,
    },
    /// One GPU phase finished.
    GpuPhaseFinished { phase: u32, outcome: GpuPhaseOutcome },
    /// All GPU phases are done without a hit.
    GpuExhausted,
    /// A candidate survived a worker's fast path. `verified` is true only
    /// for the CPU worker, which verifies synchronously before reporting.
    HitCandidate { origin: WorkerKind, password: String, verified: bool },
    /// Recoverable trouble: bad stdout line, transient I/O, failed verify.
    SoftError { origin: WorkerKind, detail: String },
    /// The worker is gone and will produce nothing further.
    Fatal { origin: WorkerKind, detail: String },
}

/// Which workers run, and with how many CPU threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerConfig {
    pub cpu_enabled: bool,
    pub gpu_enabled: bool,
    /// 0 = one thread per logical CPU.
    pub cpu_threads: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self { cpu_enabled: true, gpu_enabled: false, cpu_threads: 0 }
    }
}

/// Half-open ranges `[start, end)` over the linearized search space.
/// Only used for accounting and checkpoint restoration; the workers
/// enumerate their own candidate streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct WorkerAllocation {
    pub cpu_start: u64,
    pub cpu_end: u64,
    pub gpu_start: u64,
    pub gpu_end: u64,
}

impl WorkerAllocation {
    pub fn cpu_len(&self) -> u64 {
        self.cpu_end - self.cpu_start
    }

    pub fn gpu_len(&self) -> u64 {
        self.gpu_end - self.gpu_start
    }
}

/// Assumed GPU:CPU speed ratio before any GPU measurement exists.
pub const DEFAULT_GPU_SPEED_FACTOR: f64 = 20.0;

/// Splits the remaining range `[progress, total)` between the enabled
/// workers by their speed ratio. The CPU always gets the lower half so its
/// dictionary pass is front-loaded; a sole worker owns everything.
pub fn allocate(
    progress: u64,
    total: u64,
    config: &WorkerConfig,
    cpu_speed: f64,
    gpu_speed: Option<f64>,
) -> WorkerAllocation {
    let start = progress.min(total);
    match (config.cpu_enabled, config.gpu_enabled) {
        (true, false) => WorkerAllocation { cpu_start: start, cpu_end: total, gpu_start: total, gpu_end: total },
        (false, true) => WorkerAllocation { cpu_start: start, cpu_end: start, gpu_start: start, gpu_end: total },
        (false, false) => WorkerAllocation { cpu_start: start, cpu_end: start, gpu_start: start, gpu_end: start },
        (true, true) => {
            let cpu = cpu_speed.max(1.0);
            let gpu = gpu_speed.unwrap_or(cpu * DEFAULT_GPU_SPEED_FACTOR).max(1.0);
            let remaining = total - start;
            let cpu_share = ((remaining as f64) * cpu / (cpu + gpu)) as u64;
            let split = start + cpu_share;
            WorkerAllocation { cpu_start: start, cpu_end: split, gpu_start: split, gpu_end: total }
        }
    }
}
