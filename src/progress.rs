//! Progress aggregation for a running attack.
//!
//! The orchestrator folds worker events into an [`AttackProgressState`]
//! and publishes it through a rate-limited callback. GPU percentages are
//! smoothed across phase transitions and max-reduced so the number shown
//! to the user (and written to checkpoints) never goes backwards.

use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Aggregated progress, published to the UI callback and mirrored into
/// checkpoints.
#[derive(Debug, Clone, Default)]
pub struct AttackProgressState {
    pub cpu_tested: u64,
    pub cpu_speed: f64,
    pub last_password: String,
    pub dictionary_line: u64,
    pub gpu_phase: u32,
    pub gpu_total_phases: u32,
    pub gpu_in_phase_percent: f64,
    pub gpu_overall_percent: f64,
    pub gpu_speed_hps: f64,
    pub gpu_temp_c: Option<u32>,
    /// Combined progress over the whole search space, 0..=100.
    pub overall_percent: f64,
    pub elapsed_seconds: u64,
}

pub type ProgressCallback = dyn Fn(AttackProgressState) + Send + Sync;

/// Phase-smoothed overall percentage:
/// `(phase-1 + inPhase/100) / totalPhases * 100`.
pub fn smooth_overall(phase: u32, total_phases: u32, in_phase_percent: f64) -> f64 {
    if total_phases == 0 || phase == 0 {
        return 0.0;
    }
    let done = f64::from(phase - 1) + (in_phase_percent / 100.0).clamp(0.0, 1.0);
    (done / f64::from(total_phases) * 100.0).min(100.0)
}

/// A percentage that can only rise. Phase transitions briefly report a
/// lower smoothed value; the max-reduce hides that.
#[derive(Debug, Clone, Copy, Default)]
pub struct MonotonePercent {
    value: f64,
}

impl MonotonePercent {
    pub fn starting_at(value: f64) -> Self {
        Self { value }
    }

    /// Folds in a new observation and returns the (non-decreasing) value.
    pub fn update(&mut self, observed: f64) -> f64 {
        if observed > self.value {
            self.value = observed;
        }
        self.value
    }

    pub fn get(&self) -> f64 {
        self.value
    }
}

/// Rate-limited callback wrapper, one emit per `min_interval` plus forced
/// emits for terminal states.
pub struct ProgressPublisher {
    callback: Option<Box<ProgressCallback>>,
    min_interval: Duration,
    last_emit: Mutex<Option<Instant>>,
}

impl ProgressPublisher {
    pub fn new(callback: Option<Box<ProgressCallback>>, min_interval: Duration) -> Self {
        Self { callback, min_interval, last_emit: Mutex::new(None) }
    }

    pub fn maybe_emit(&self, state: &AttackProgressState) {
        let Some(callback) = &self.callback else { return };
        let now = Instant::now();
        {
            let mut last = self.last_emit.lock().unwrap();
            if let Some(last_instant) = *last {
                if now.duration_since(last_instant) < self.min_interval {
                    return;
                }
            }
            *last = Some(now);
        }
        callback(state.clone());
    }

    pub fn force_emit(&self, state: &AttackProgressState) {
        if let Some(callback) = &self.callback {
            *self.last_emit.lock().unwrap() = Some(Instant::now());
            callback(state.clone());
        }
    }
}
