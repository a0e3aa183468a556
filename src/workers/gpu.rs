//! Supervision of the external GPU cracker process.
//!
//! Each attack phase becomes one hashcat invocation. The driver keeps the
//! child's stdin open for `p`/`r` pause control, streams stdout/stderr
//! through two reader threads, parses status lines with regexes, and reads
//! the outfile after exit. A non-empty outfile always wins over the exit
//! code: the hit-vs-kill race resolves in favour of the candidate.

use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use regex::Regex;
use tracing::{debug, warn};

use crate::plan::{AttackPlan, Phase};
use crate::workers::{WorkerEvent, WorkerKind};
use crate::CrackError;

/// Grace period for reaping a killed child.
const KILL_DEADLINE: Duration = Duration::from_secs(5);
/// Child poll interval while a phase runs.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct GpuConfig {
    pub hashcat: PathBuf,
    /// Directory for the hash file and per-phase outfiles.
    pub work_dir: PathBuf,
}

/// How one phase ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GpuPhaseOutcome {
    Cracked(String),
    Exhausted,
    /// Killed on request (stop, or a hit elsewhere).
    Aborted,
    Failed(String),
}

/// Fields recognised on one stdout line. Unknown lines parse to an empty
/// update and are ignored.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GpuStatusUpdate {
    pub speed_hps: Option<f64>,
    /// (current, total, percent)
    pub progress: Option<(u64, u64, f64)>,
    pub temp_c: Option<u32>,
    pub cracked: bool,
    pub exhausted: bool,
}

impl GpuStatusUpdate {
    pub fn is_empty(&self) -> bool {
        self.speed_hps.is_none()
            && self.progress.is_none()
            && self.temp_c.is_none()
            && !self.cracked
            && !self.exhausted
    }
}

/// Line-oriented parser for the cracker's status output. Resilient to
/// banner noise: anything that does not match is simply skipped.
pub struct GpuOutputParser {
    speed: Regex,
    progress: Regex,
    temp: Regex,
}

impl GpuOutputParser {
    pub fn new() -> Self {
        Self {
            speed: Regex::new(r"(?i)(\d+\.?\d*)\s*(k|M|G)?H/s").expect("speed regex"),
            progress: Regex::new(r"(?i)Progress[.\s]*:\s*(\d+)/(\d+)\s*\((\d+\.?\d*)%\)")
                .expect("progress regex"),
            temp: Regex::new(r"(?i)Temp[.\s:]*(\d+)\s*[c°]").expect("temp regex"),
        }
    }

    pub fn parse_line(&self, line: &str) -> GpuStatusUpdate {
        let mut update = GpuStatusUpdate::default();

        if let Some(caps) = self.speed.captures(line) {
            if let Ok(value) = caps[1].parse::<f64>() {
                let factor = match caps.get(2).map(|m| m.as_str()) {
                    Some("k") | Some("K") => 1e3,
                    Some("M") | Some("m") => 1e6,
                    Some("G") | Some("g") => 1e9,
                    _ => 1.0,
                };
                update.speed_hps = Some(value * factor);
            }
        }
        if let Some(caps) = self.progress.captures(line) {
            let current = caps[1].parse::<u64>().unwrap_or(0);
            let total = caps[2].parse::<u64>().unwrap_or(0);
            let percent = caps[3].parse::<f64>().unwrap_or(0.0);
            update.progress = Some((current, total, percent));
        }
        if let Some(caps) = self.temp.captures(line) {
            update.temp_c = caps[1].parse::<u32>().ok();
        }
        let lower = line.to_ascii_lowercase();
        if lower.contains("cracked") {
            update.cracked = true;
        }
        if lower.contains("exhausted") {
            update.exhausted = true;
        }
        update
    }
}

impl Default for GpuOutputParser {
    fn default() -> Self {
        Self::new()
    }
}

struct GpuShared {
    stop: AtomicBool,
    paused: AtomicBool,
    stdin: Mutex<Option<ChildStdin>>,
}

impl GpuShared {
    fn send_control(&self, byte: &[u8]) {
        if let Ok(mut slot) = self.stdin.lock() {
            if let Some(stdin) = slot.as_mut() {
                let _ = stdin.write_all(byte);
                let _ = stdin.flush();
            }
        }
    }
}

pub struct GpuWorker {
    shared: Arc<GpuShared>,
    supervisor: Option<JoinHandle<()>>,
}

impl GpuWorker {
    /// Starts the per-phase supervisor at `start_phase` (1-indexed).
    pub fn spawn(
        plan: Arc<AttackPlan>,
        hash_line: String,
        mode: u32,
        start_phase: u32,
        config: GpuConfig,
        events: Sender<WorkerEvent>,
    ) -> Result<Self, CrackError> {
        std::fs::create_dir_all(&config.work_dir)
            .map_err(|e| CrackError::io_at(e, &config.work_dir))?;
        let hash_file = config.work_dir.join("blitzcrack.hash");
        std::fs::write(&hash_file, format!("{hash_line}\n"))
            .map_err(|e| CrackError::io_at(e, &hash_file))?;

        let shared = Arc::new(GpuShared {
            stop: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            stdin: Mutex::new(None),
        });

        let supervisor = {
            let shared = Arc::clone(&shared);
            std::thread::spawn(move || {
                let total = plan.phases.len() as u32;
                for (index, phase) in plan.phases.iter().enumerate() {
                    let phase_no = index as u32 + 1;
                    if phase_no < start_phase {
                        continue;
                    }
                    if shared.stop.load(Ordering::SeqCst) {
                        break;
                    }
                    debug!(phase = phase_no, total, mask = %phase.mask, "starting GPU phase");
                    let outcome = run_phase(
                        &config,
                        &hash_file,
                        mode,
                        phase,
                        phase_no,
                        &shared,
                        &events,
                    );
                    match &outcome {
                        GpuPhaseOutcome::Cracked(password) => {
                            let _ = events.send(WorkerEvent::HitCandidate {
                                origin: WorkerKind::Gpu,
                                password: password.clone(),
                                verified: false,
                            });
                        }
                        GpuPhaseOutcome::Failed(detail) => {
                            let _ = events.send(WorkerEvent::SoftError {
                                origin: WorkerKind::Gpu,
                                detail: detail.clone(),
                            });
                        }
                        _ => {}
                    }
                    let aborted = outcome == GpuPhaseOutcome::Aborted;
                    let _ = events.send(WorkerEvent::GpuPhaseFinished { phase: phase_no, outcome });
                    if aborted {
                        break;
                    }
                }
                if !shared.stop.load(Ordering::SeqCst) {
                    let _ = events.send(WorkerEvent::GpuExhausted);
                }
            })
        };

        Ok(Self { shared, supervisor: Some(supervisor) })
    }

    /// Pauses the running child with `p\n`; sticky across phase starts.
    pub fn pause(&self) {
        self.shared.paused.store(true, Ordering::SeqCst);
        self.shared.send_control(b"p\n");
    }

    pub fn resume(&self) {
        self.shared.paused.store(false, Ordering::SeqCst);
        self.shared.send_control(b"r\n");
    }

    /// Stops the supervisor and kills the current child.
    pub fn stop(&self) {
        self.shared.stop.store(true, Ordering::SeqCst);
    }

    pub fn join(mut self) {
        if let Some(handle) = self.supervisor.take() {
            let _ = handle.join();
        }
    }
}

/// Builds the hashcat argument list for one phase.
fn phase_args(hash_file: &Path, mode: u32, phase: &Phase, outfile: &Path) -> Vec<String> {
    let mut args = vec!["-m".into(), mode.to_string(), "-a".into(), "3".into()];
    if phase.needs_custom_charset() {
        args.push("-1".into());
        args.push(phase.charset.clone());
    }
    args.extend([
        "--increment".into(),
        "--increment-min".into(),
        phase.min_len.to_string(),
        "--increment-max".into(),
        phase.max_len.to_string(),
        "-w".into(),
        "3".into(),
        "-O".into(),
        "-o".into(),
        outfile.display().to_string(),
        "--potfile-disable".into(),
        "--status".into(),
        "--status-timer=1".into(),
        hash_file.display().to_string(),
        phase.mask.clone(),
    ]);
    args
}

fn run_phase(
    config: &GpuConfig,
    hash_file: &Path,
    mode: u32,
    phase: &Phase,
    phase_no: u32,
    shared: &GpuShared,
    events: &Sender<WorkerEvent>,
) -> GpuPhaseOutcome {
    let outfile = config.work_dir.join(format!("phase-{phase_no}.out"));
    let _ = std::fs::remove_file(&outfile);

    let mut child = match Command::new(&config.hashcat)
        .args(phase_args(hash_file, mode, phase, &outfile))
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
    {
        Ok(child) => child,
        Err(e) => return GpuPhaseOutcome::Failed(format!("launch failed: {e}")),
    };

    // Keep stdin for pause/resume; re-assert a sticky pause immediately.
    *shared.stdin.lock().unwrap() = child.stdin.take();
    if shared.paused.load(Ordering::SeqCst) {
        shared.send_control(b"p\n");
    }

    let readers = spawn_readers(&mut child, phase_no, events);

    // Poll for exit, stop requests and pause edges.
    let mut was_paused = shared.paused.load(Ordering::SeqCst);
    let mut killed = false;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break Some(status),
            Ok(None) => {}
            Err(e) => {
                warn!(error = %e, "lost track of GPU child");
                break None;
            }
        }
        if shared.stop.load(Ordering::SeqCst) && !killed {
            let _ = child.kill();
            killed = true;
        }
        let paused = shared.paused.load(Ordering::SeqCst);
        if paused != was_paused {
            shared.send_control(if paused { b"p\n" } else { b"r\n" });
            was_paused = paused;
        }
        std::thread::sleep(POLL_INTERVAL);
    };
    let status = match status {
        Some(status) => Some(status),
        None => reap(&mut child, killed),
    };

    *shared.stdin.lock().unwrap() = None;
    for reader in readers {
        let _ = reader.join();
    }

    // Hit-vs-kill: an outfile hit takes precedence over any exit code.
    let hit = read_outfile(&outfile);
    let _ = std::fs::remove_file(&outfile);
    if let Some(password) = hit {
        return GpuPhaseOutcome::Cracked(password);
    }

    if killed {
        return GpuPhaseOutcome::Aborted;
    }
    match status.and_then(|s| s.code()) {
        Some(0) => GpuPhaseOutcome::Failed("cracker reported a hit but wrote no outfile".into()),
        Some(1) => GpuPhaseOutcome::Exhausted,
        Some(-2) => GpuPhaseOutcome::Aborted,
        Some(code @ (-1 | 255)) => GpuPhaseOutcome::Failed(format!("cracker exited with {code}")),
        Some(code) => GpuPhaseOutcome::Failed(format!("cracker exited with {code}")),
        None => GpuPhaseOutcome::Failed("cracker terminated by signal".into()),
    }
}

/// Kills (if needed) and reaps the child within the 5 s deadline.
fn reap(child: &mut Child, already_killed: bool) -> Option<std::process::ExitStatus> {
    if !already_killed {
        let _ = child.kill();
    }
    let deadline = Instant::now() + KILL_DEADLINE;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Some(status),
            Ok(None) => {
                if Instant::now() >= deadline {
                    warn!("GPU child did not reap within deadline");
                    return None;
                }
                std::thread::sleep(Duration::from_millis(50));
            }
            Err(_) => return None,
        }
    }
}

fn spawn_readers(child: &mut Child, phase_no: u32, events: &Sender<WorkerEvent>) -> Vec<JoinHandle<()>> {
    let mut readers = Vec::with_capacity(2);

    if let Some(stdout) = child.stdout.take() {
        let events = events.clone();
        readers.push(std::thread::spawn(move || {
            let parser = GpuOutputParser::new();
            for line in BufReader::new(stdout).lines() {
                let line = match line {
                    Ok(line) => line,
                    Err(_) => break,
                };
                let update = parser.parse_line(&line);
                if update.is_empty() {
                    continue;
                }
                let (attempts, percent) = update
                    .progress
                    .map(|(cur, _, pct)| (cur, pct))
                    .unwrap_or((0, 0.0));
                let _ = events.send(WorkerEvent::GpuStatus {
                    phase: phase_no,
                    speed_hps: update.speed_hps.unwrap_or(0.0),
                    in_phase_percent: percent,
                    in_phase_attempts: attempts,
                    temp_c: update.temp_c,
                });
            }
        }));
    }
    if let Some(stderr) = child.stderr.take() {
        readers.push(std::thread::spawn(move || {
            for line in BufReader::new(stderr).lines().map_while(Result::ok) {
                debug!(target: "gpu-stderr", "{line}");
            }
        }));
    }
    readers
}

/// Reads the cracked password from the outfile: one `<hash>:<password>`
/// line where the hash may itself contain colons, so the password is
/// whatever follows the **last** colon.
fn read_outfile(outfile: &Path) -> Option<String> {
    let content = std::fs::read_to_string(outfile).ok()?;
    let line = content.lines().rev().find(|l| !l.trim().is_empty())?;
    line.rsplit_once(':').map(|(_, password)| password.to_string())
}
