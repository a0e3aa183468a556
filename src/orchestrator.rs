//! Attack orchestration.
//!
//! One orchestrator per attack: it computes the search space, allocates it
//! to the enabled workers, drives them in parallel, folds their events into
//! the observable attack state, arbitrates the first verified hit and owns
//! the checkpoint cadence. All state transitions happen on this one thread.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{select, tick, unbounded, Receiver, Sender};
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::checkpoint::{AttackState, CheckpointManager};
use crate::fingerprint::ArchiveDescriptor;
use crate::plan::{AttackPlan, PlanRequest};
use crate::progress::{
    smooth_overall, AttackProgressState, MonotonePercent, ProgressCallback, ProgressPublisher,
};
use crate::skipset::SkipSet;
use crate::tools::ToolRegistry;
use crate::verify::Verifier;
use crate::workers::{
    allocate, CpuConfig, CpuSource, CpuWorker, GpuConfig, GpuPhaseOutcome, GpuWorker, WorkerConfig,
    WorkerEvent, WorkerKind,
};
use crate::CrackError;

/// Routine checkpoint cadence.
const SAVE_INTERVAL: Duration = Duration::from_secs(10);
/// Forced save from the heartbeat while a worker is running.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(60);
/// Progress callback rate limit.
const EMIT_INTERVAL: Duration = Duration::from_millis(100);

/// Orchestrator lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Running,
    Paused,
    Found,
    Exhausted,
    Cancelled,
    Failed,
}

/// Terminal result of an attack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttackOutcome {
    Found { password: String },
    Exhausted,
    Cancelled,
    Failed { detail: String },
}

#[derive(Debug, Clone, Copy)]
enum Command {
    Pause,
    Resume,
    Stop,
}

/// Clonable remote control for a running attack. Pause and resume are
/// idempotent; stop is terminal.
#[derive(Clone)]
pub struct AttackController {
    tx: Sender<Command>,
    cancel: CancelToken,
}

impl AttackController {
    pub fn pause(&self) {
        let _ = self.tx.send(Command::Pause);
    }

    pub fn resume(&self) {
        let _ = self.tx.send(Command::Resume);
    }

    pub fn stop(&self) {
        self.cancel.cancel();
        let _ = self.tx.send(Command::Stop);
    }
}

/// Everything an attack needs beyond the descriptor.
pub struct AttackOptions {
    pub plan_request: PlanRequest,
    /// Dictionary pass for the CPU worker before brute force.
    pub dictionary: Option<PathBuf>,
    pub worker_config: WorkerConfig,
    pub checkpoint_dir: PathBuf,
    /// Working directory for GPU hash files and outfiles.
    pub gpu_work_dir: PathBuf,
    pub progress: Option<Box<ProgressCallback>>,
}

pub struct Orchestrator {
    descriptor: Arc<ArchiveDescriptor>,
    plan: Arc<AttackPlan>,
    options: AttackOptions,
    tools: ToolRegistry,
    checkpoints: CheckpointManager,
    skip: Arc<SkipSet>,
    publisher: ProgressPublisher,
    command_tx: Sender<Command>,
    command_rx: Receiver<Command>,
    cancel: CancelToken,
    state: SessionState,
}

impl Orchestrator {
    pub fn new(
        descriptor: ArchiveDescriptor,
        mut options: AttackOptions,
        tools: ToolRegistry,
    ) -> Result<Self, CrackError> {
        let plan = AttackPlan::build(options.plan_request)?;
        let checkpoints = CheckpointManager::new(&options.checkpoint_dir)?;
        let publisher = ProgressPublisher::new(options.progress.take(), EMIT_INTERVAL);
        let (command_tx, command_rx) = unbounded();
        Ok(Self {
            descriptor: Arc::new(descriptor),
            plan: Arc::new(plan),
            options,
            tools,
            checkpoints,
            skip: Arc::new(SkipSet::new()),
            publisher,
            command_tx,
            command_rx,
            cancel: CancelToken::new(),
            state: SessionState::Idle,
        })
    }

    pub fn controller(&self) -> AttackController {
        AttackController { tx: self.command_tx.clone(), cancel: self.cancel.clone() }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn plan(&self) -> &AttackPlan {
        &self.plan
    }

    /// Runs the attack to a terminal outcome. Blocks the calling thread;
    /// control arrives through [`AttackController`].
    pub fn run(&mut self) -> Result<AttackOutcome, CrackError> {
        let archive_path = self.descriptor.path.clone();
        let plan_fp = self.plan.fingerprint();
        let dictionary_lines = match &self.options.dictionary {
            Some(path) => count_lines(path)?,
            None => 0,
        };
        let total_space = self.plan.total_keyspace().saturating_add(dictionary_lines);

        // Restore a matching checkpoint, or start fresh. A snapshot from a
        // different plan must not leak positions into this attack.
        let restored = self
            .checkpoints
            .load(&archive_path)
            .filter(|s| s.matches(&archive_path, &plan_fp));
        let resumed = restored.is_some();
        let mut attack = restored.unwrap_or_else(|| {
            AttackState::fresh(
                &archive_path,
                self.descriptor.variant_tag(),
                plan_fp.clone(),
                self.options.worker_config,
                total_space,
            )
        });
        if attack.variant_tag != self.descriptor.variant_tag() {
            return Err(CrackError::UnrecoverableState(format!(
                "checkpoint variant '{}' does not match archive '{}'",
                attack.variant_tag,
                self.descriptor.variant_tag()
            )));
        }
        let reconfigured = attack.worker_config != self.options.worker_config;
        attack.worker_config = self.options.worker_config;
        attack.gpu_total_phases = self.plan.phases.len() as u32;
        attack.total_search_space = total_space;

        // Allocation: fresh attacks and reconfigured resumes split the
        // still-remaining range; an unchanged resume keeps its ranges, so
        // positions restore exactly.
        if !resumed || reconfigured {
            let progress = global_progress(&attack);
            let (cpu_speed, gpu_speed) = measured_speeds(&attack);
            attack.worker_allocation =
                allocate(progress, total_space, &attack.worker_config, cpu_speed, gpu_speed);
            if reconfigured {
                info!(allocation = ?attack.worker_allocation, "re-allocated after worker reconfiguration");
            }
        }

        let verifier = Arc::new(Verifier::new(Arc::clone(&self.descriptor), self.tools.clone()));
        let (events_tx, events_rx) = unbounded::<WorkerEvent>();

        // Variants without an in-process check (7-Zip, compressed
        // data-only RAR3) are GPU-only.
        let cpu_wanted =
            attack.worker_config.cpu_enabled && CpuWorker::supports(&self.descriptor);
        let cpu_worker = if cpu_wanted {
            let source = match &self.options.dictionary {
                Some(path) => CpuSource::Dictionary {
                    path: path.clone(),
                    resume_from_line: attack.dictionary_line_position,
                },
                None => CpuSource::BruteForce {
                    alphabet: self.options.plan_request.charsets.alphabet(),
                    min_len: self.options.plan_request.min_len,
                    max_len: self.options.plan_request.max_len,
                    resume_from: attack
                        .cpu_current_position
                        .max(attack.worker_allocation.cpu_start),
                    end: Some(attack.worker_allocation.cpu_end),
                },
            };
            Some(CpuWorker::spawn(
                Arc::clone(&self.descriptor),
                Arc::clone(&verifier),
                Arc::clone(&self.skip),
                source,
                CpuConfig { threads: attack.worker_config.cpu_threads, ..Default::default() },
                events_tx.clone(),
            )?)
        } else {
            None
        };

        let gpu_worker = if attack.worker_config.gpu_enabled {
            match self.tools.require_hashcat() {
                Ok(hashcat) => Some(GpuWorker::spawn(
                    Arc::clone(&self.plan),
                    self.descriptor.hash_line(),
                    self.descriptor.hashcat_mode(),
                    attack.gpu_current_phase,
                    GpuConfig {
                        hashcat: hashcat.to_path_buf(),
                        work_dir: self.options.gpu_work_dir.clone(),
                    },
                    events_tx.clone(),
                )?),
                Err(e) if cpu_worker.is_some() => {
                    warn!(error = %e, "GPU worker unavailable, continuing CPU-only");
                    None
                }
                Err(e) => return Err(e),
            }
        } else {
            None
        };

        if cpu_worker.is_none() && gpu_worker.is_none() {
            return Err(CrackError::Config("no worker is able to attack this archive".into()));
        }
        drop(events_tx);

        self.state = SessionState::Running;
        let outcome = self.event_loop(
            &mut attack,
            events_rx,
            cpu_worker.as_ref(),
            gpu_worker.as_ref(),
            &verifier,
        );

        // Teardown: both workers are stopped regardless of outcome.
        if let Some(cpu) = &cpu_worker {
            cpu.stop();
        }
        if let Some(gpu) = &gpu_worker {
            gpu.stop();
        }
        if let Some(cpu) = cpu_worker {
            cpu.join();
        }
        if let Some(gpu) = gpu_worker {
            gpu.join();
        }

        self.state = match &outcome {
            AttackOutcome::Found { .. } => SessionState::Found,
            AttackOutcome::Exhausted => SessionState::Exhausted,
            AttackOutcome::Cancelled => SessionState::Cancelled,
            AttackOutcome::Failed { .. } => SessionState::Failed,
        };
        match &outcome {
            AttackOutcome::Found { .. } | AttackOutcome::Cancelled | AttackOutcome::Exhausted => {
                self.checkpoints.delete(&archive_path);
            }
            AttackOutcome::Failed { .. } => {
                // Clean-shutdown save so the attack can resume.
                if let Err(e) = self.checkpoints.save(&mut attack) {
                    warn!(error = %e, "final checkpoint save failed");
                }
            }
        }
        Ok(outcome)
    }

    #[allow(clippy::too_many_lines)]
    fn event_loop(
        &mut self,
        attack: &mut AttackState,
        events_rx: Receiver<WorkerEvent>,
        cpu_worker: Option<&CpuWorker>,
        gpu_worker: Option<&GpuWorker>,
        verifier: &Verifier,
    ) -> AttackOutcome {
        let archive_path = self.descriptor.path.clone();
        let command_rx = self.command_rx.clone();
        let save_tick = tick(SAVE_INTERVAL);
        let heartbeat = tick(HEARTBEAT_INTERVAL);
        let started = Instant::now();
        let elapsed_base = attack.elapsed_seconds;

        let cpu_attempts_base = attack.cpu_attempts;
        let mut overall = MonotonePercent::starting_at(attack.gpu_overall_progress_percent);
        let mut accumulated = attack.gpu_accumulated_attempts;
        let mut phase_base_attempts = attack.gpu_accumulated_attempts;
        let mut in_phase_attempts = 0u64;
        let mut gpu_speed = 0f64;
        let mut gpu_temp = None;

        let mut cpu_done = cpu_worker.is_none();
        let mut gpu_done = gpu_worker.is_none();
        let mut found_latch = false;
        let mut progress_view = AttackProgressState {
            gpu_total_phases: attack.gpu_total_phases,
            gpu_overall_percent: overall.get(),
            ..Default::default()
        };

        loop {
            let mut terminal: Option<AttackOutcome> = None;

            select! {
                recv(command_rx) -> cmd => match cmd {
                    Ok(Command::Pause) => {
                        if self.state == SessionState::Running {
                            if let Some(cpu) = cpu_worker { cpu.pause(); }
                            if let Some(gpu) = gpu_worker { gpu.pause(); }
                            self.state = SessionState::Paused;
                            info!("attack paused");
                        }
                    }
                    Ok(Command::Resume) => {
                        if self.state == SessionState::Paused {
                            if let Some(cpu) = cpu_worker { cpu.resume(); }
                            if let Some(gpu) = gpu_worker { gpu.resume(); }
                            self.state = SessionState::Running;
                            info!("attack resumed");
                        }
                    }
                    Ok(Command::Stop) => {
                        if let Some(cpu) = cpu_worker { cpu.stop(); }
                        if let Some(gpu) = gpu_worker { gpu.stop(); }
                        self.checkpoints.delete(&archive_path);
                        terminal = Some(AttackOutcome::Cancelled);
                    }
                    Err(_) => {}
                },
                recv(events_rx) -> event => match event {
                    Ok(WorkerEvent::CpuProgress { tested_total, last_password, dictionary_line, position }) => {
                        attack.cpu_attempts = cpu_attempts_base + tested_total;
                        attack.dictionary_line_position = attack.dictionary_line_position.max(dictionary_line);
                        attack.cpu_current_position = attack.cpu_current_position.max(position);
                        progress_view.cpu_tested = attack.cpu_attempts;
                        progress_view.last_password = last_password;
                        progress_view.dictionary_line = attack.dictionary_line_position;
                    }
                    Ok(WorkerEvent::CpuExhausted { tested_total }) => {
                        attack.cpu_attempts = cpu_attempts_base + tested_total;
                        cpu_done = true;
                        debug!(tested = tested_total, "CPU worker exhausted its range");
                    }
                    Ok(WorkerEvent::GpuStatus { phase, speed_hps, in_phase_percent, in_phase_attempts: cur, temp_c }) => {
                        attack.gpu_current_phase = attack.gpu_current_phase.max(phase);
                        // Speed-only and temp-only lines carry no progress;
                        // the in-phase numbers must not flap back to zero.
                        if in_phase_percent > 0.0 || cur > 0 {
                            attack.gpu_in_phase_progress_percent = in_phase_percent;
                            in_phase_attempts = cur;
                            accumulated = accumulated.max(phase_base_attempts + cur);
                            attack.gpu_accumulated_attempts = accumulated;
                            attack.gpu_overall_progress_percent = overall.update(smooth_overall(
                                phase,
                                attack.gpu_total_phases,
                                in_phase_percent,
                            ));
                        }
                        if speed_hps > 0.0 { gpu_speed = speed_hps; }
                        if temp_c.is_some() { gpu_temp = temp_c; }
                    }
                    Ok(WorkerEvent::GpuPhaseFinished { phase, outcome }) => {
                        let phase_space = self
                            .plan
                            .phases
                            .get(phase as usize - 1)
                            .map(|p| p.keyspace())
                            .unwrap_or(0);
                        phase_base_attempts += match outcome {
                            GpuPhaseOutcome::Exhausted => phase_space,
                            _ => in_phase_attempts,
                        };
                        in_phase_attempts = 0;
                        accumulated = accumulated.max(phase_base_attempts);
                        attack.gpu_accumulated_attempts = accumulated;
                        attack.gpu_in_phase_progress_percent = 0.0;
                        attack.gpu_current_phase =
                            (phase + 1).min(attack.gpu_total_phases.max(1));
                        if matches!(outcome, GpuPhaseOutcome::Exhausted) {
                            attack.gpu_overall_progress_percent = overall.update(smooth_overall(
                                phase,
                                attack.gpu_total_phases,
                                100.0,
                            ));
                        }
                    }
                    Ok(WorkerEvent::GpuExhausted) => {
                        gpu_done = true;
                        debug!("GPU worker exhausted all phases");
                    }
                    Ok(WorkerEvent::HitCandidate { origin, password, verified }) => {
                        if found_latch {
                            // A hit was already confirmed; late candidates lose.
                        } else if verified {
                            found_latch = true;
                            terminal = Some(AttackOutcome::Found { password });
                        } else if origin == WorkerKind::Gpu && !verifier.confirmable() {
                            // No in-process check exists for this variant;
                            // the cracker's own full test is the
                            // authoritative path and its verdict stands.
                            info!(candidate = %password, "accepting cracker-confirmed candidate");
                            found_latch = true;
                            terminal = Some(AttackOutcome::Found { password });
                        } else {
                            match verifier.verify(&password) {
                                Ok(true) => {
                                    found_latch = true;
                                    terminal = Some(AttackOutcome::Found { password });
                                }
                                Ok(false) => {
                                    info!(?origin, candidate = %password, "candidate failed verification, continuing");
                                    self.skip.add(&password);
                                }
                                Err(e) => {
                                    warn!(error = %e, "verifier unavailable for candidate");
                                }
                            }
                        }
                    }
                    Ok(WorkerEvent::SoftError { origin, detail }) => {
                        warn!(?origin, detail = %detail, "worker soft error");
                    }
                    Ok(WorkerEvent::Fatal { origin, detail }) => {
                        warn!(?origin, detail = %detail, "worker died");
                        match origin {
                            WorkerKind::Cpu => cpu_done = true,
                            WorkerKind::Gpu => gpu_done = true,
                        }
                        if cpu_done && gpu_done {
                            terminal = Some(AttackOutcome::Failed { detail });
                        }
                    }
                    Err(_) => {
                        // All workers hung up without a verdict.
                        cpu_done = true;
                        gpu_done = true;
                    }
                },
                recv(save_tick) -> _ => {
                    if self.state == SessionState::Running {
                        attack.elapsed_seconds = elapsed_base + started.elapsed().as_secs();
                        if let Err(e) = self.checkpoints.save(attack) {
                            warn!(error = %e, "periodic checkpoint save failed");
                        }
                    }
                }
                recv(heartbeat) -> _ => {
                    // Forced save while any worker is running, even if the
                    // regular tick was starved.
                    if self.state != SessionState::Paused && (!cpu_done || !gpu_done) {
                        attack.elapsed_seconds = elapsed_base + started.elapsed().as_secs();
                        if let Err(e) = self.checkpoints.save(attack) {
                            warn!(error = %e, "heartbeat checkpoint save failed");
                        }
                    }
                }
            }

            progress_view.cpu_speed = if started.elapsed().as_secs_f64() > 0.0 {
                (attack.cpu_attempts - cpu_attempts_base) as f64 / started.elapsed().as_secs_f64()
            } else {
                0.0
            };
            progress_view.gpu_phase = attack.gpu_current_phase;
            progress_view.gpu_in_phase_percent = attack.gpu_in_phase_progress_percent;
            progress_view.gpu_overall_percent = attack.gpu_overall_progress_percent;
            progress_view.gpu_speed_hps = gpu_speed;
            progress_view.gpu_temp_c = gpu_temp;
            progress_view.elapsed_seconds = elapsed_base + started.elapsed().as_secs();
            progress_view.overall_percent = combined_percent(attack);
            self.publisher.maybe_emit(&progress_view);

            if let Some(outcome) = terminal {
                if let AttackOutcome::Found { password } = &outcome {
                    info!(password = %password, "password found");
                    if let Some(cpu) = cpu_worker { cpu.stop(); }
                    if let Some(gpu) = gpu_worker { gpu.stop(); }
                    self.checkpoints.delete(&archive_path);
                }
                self.publisher.force_emit(&progress_view);
                return outcome;
            }
            if cpu_done && gpu_done {
                self.publisher.force_emit(&progress_view);
                return AttackOutcome::Exhausted;
            }
        }
    }
}

/// Positions already covered, on the notional linearization.
fn global_progress(state: &AttackState) -> u64 {
    state
        .cpu_attempts
        .saturating_add(state.gpu_accumulated_attempts)
        .min(state.total_search_space)
}

/// Worker speeds from a previous session, for re-allocation.
fn measured_speeds(state: &AttackState) -> (f64, Option<f64>) {
    if state.elapsed_seconds == 0 {
        return (1.0, None);
    }
    let cpu = state.cpu_attempts as f64 / state.elapsed_seconds as f64;
    let gpu = state.gpu_accumulated_attempts as f64 / state.elapsed_seconds as f64;
    (cpu.max(1.0), (gpu > 0.0).then_some(gpu))
}

/// Combined progress over the whole search space.
fn combined_percent(state: &AttackState) -> f64 {
    if state.total_search_space == 0 {
        return 0.0;
    }
    let covered = global_progress(state);
    (covered as f64 / state.total_search_space as f64 * 100.0).min(100.0)
}

fn count_lines(path: &Path) -> Result<u64, CrackError> {
    use std::io::Read;
    let mut file = std::fs::File::open(path).map_err(|e| CrackError::io_at(e, path))?;
    let mut buf = [0u8; 64 * 1024];
    let mut lines = 0u64;
    let mut last_byte = b'\n';
    loop {
        let n = file.read(&mut buf).map_err(|e| CrackError::io_at(e, path))?;
        if n == 0 {
            break;
        }
        lines += buf[..n].iter().filter(|&&b| b == b'\n').count() as u64;
        last_byte = buf[n - 1];
    }
    if last_byte != b'\n' {
        lines += 1;
    }
    Ok(lines)
}
