//! The in-process CPU password-testing engine.
//!
//! A feeder thread slices the candidate stream (dictionary file or
//! brute-force generator) into contiguous batches; a fixed pool of worker
//! threads pulls batches, applies the variant's fast rejection test and
//! escalates survivors to the verifier. No two threads ever test the same
//! candidate.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, Sender};
use tracing::{debug, warn};

use crate::crypto;
use crate::fingerprint::{ArchiveDescriptor, ArchiveVariant, Rar3Encryption};
use crate::skipset::SkipSet;
use crate::verify::Verifier;
use crate::workers::{WorkerEvent, WorkerKind};
use crate::CrackError;

/// Candidates per batch; pause and stop take effect at batch boundaries.
pub const BATCH_SIZE: usize = 1000;

/// How long a paused worker sleeps between flag polls.
const PAUSE_POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
pub enum CpuSource {
    /// Line-oriented UTF-8 dictionary; blank lines are skipped but still
    /// counted, so `resume_from_line` is a raw line offset.
    Dictionary { path: PathBuf, resume_from_line: u64 },
    /// Exhaustive generation over `alphabet` for each length in
    /// `min_len..=max_len`, starting at linear index `resume_from` and
    /// stopping before `end` when one is given.
    BruteForce {
        alphabet: String,
        min_len: u32,
        max_len: u32,
        resume_from: u64,
        end: Option<u64>,
    },
}

#[derive(Debug, Clone, Copy)]
pub struct CpuConfig {
    /// 0 = one thread per logical CPU.
    pub threads: usize,
    pub batch_size: usize,
}

impl Default for CpuConfig {
    fn default() -> Self {
        Self { threads: 0, batch_size: BATCH_SIZE }
    }
}

/// One contiguous slice of the candidate stream.
struct Batch {
    passwords: Vec<String>,
    /// Raw dictionary line number after this batch (0 for brute force).
    line_after: u64,
    /// Linear candidate position after this batch.
    position_after: u64,
}

/// Atomically published progress counters. `tested` never decreases.
#[derive(Debug)]
struct ProgressCells {
    tested: AtomicU64,
    dictionary_line: AtomicU64,
    position: AtomicU64,
    last_password: Mutex<String>,
}

/// A snapshot of `(totalTested, lastPassword, dictionaryLinePosition)`.
#[derive(Debug, Clone, Default)]
pub struct CpuProgressSnapshot {
    pub tested: u64,
    pub last_password: String,
    pub dictionary_line: u64,
    pub position: u64,
}

#[derive(Debug)]
pub struct CpuWorker {
    pause_flag: Arc<AtomicBool>,
    stop_flag: Arc<AtomicBool>,
    found_flag: Arc<AtomicBool>,
    progress: Arc<ProgressCells>,
    threads: Vec<JoinHandle<()>>,
}

impl CpuWorker {
    /// Whether the in-process engine can confirm candidates for this
    /// archive. 7-Zip testing is delegated to external tooling, and a
    /// compressed data-only RAR3 entry has no in-process check at all.
    pub fn supports(descriptor: &ArchiveDescriptor) -> bool {
        match &descriptor.variant {
            ArchiveVariant::SevenZip(_) => false,
            ArchiveVariant::Rar3(d) => {
                d.encryption == Rar3Encryption::HeadersEncrypted || d.method == 0x30
            }
            _ => true,
        }
    }

    /// Starts the feeder and the worker pool. Events flow into `events`
    /// until a hit, exhaustion or `stop()`.
    pub fn spawn(
        descriptor: Arc<ArchiveDescriptor>,
        verifier: Arc<Verifier>,
        skip: Arc<SkipSet>,
        source: CpuSource,
        config: CpuConfig,
        events: Sender<WorkerEvent>,
    ) -> Result<Self, CrackError> {
        if !Self::supports(&descriptor) {
            return Err(CrackError::Config(
                "candidates for this archive can only be tested by the GPU worker".into(),
            ));
        }

        let thread_count = if config.threads == 0 { num_cpus::get() } else { config.threads };
        let batch_size = config.batch_size.max(1);
        debug!(threads = thread_count, ?source, "starting CPU worker");

        let pause_flag = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::new(AtomicBool::new(false));
        let found_flag = Arc::new(AtomicBool::new(false));
        let progress = Arc::new(ProgressCells {
            tested: AtomicU64::new(0),
            dictionary_line: AtomicU64::new(match &source {
                CpuSource::Dictionary { resume_from_line, .. } => *resume_from_line,
                _ => 0,
            }),
            position: AtomicU64::new(match &source {
                CpuSource::BruteForce { resume_from, .. } => *resume_from,
                _ => 0,
            }),
            last_password: Mutex::new(String::new()),
        });

        let (batch_tx, batch_rx) = bounded::<Batch>(thread_count * 2);

        // Feeder thread: slices the source into contiguous batches.
        let feeder_stop = Arc::clone(&stop_flag);
        let feeder = {
            let source = source.clone();
            let events = events.clone();
            std::thread::spawn(move || {
                if let Err(e) = feed(source, batch_size, &batch_tx, &feeder_stop) {
                    warn!(error = %e, "CPU feeder stopped early");
                    let _ = events.send(WorkerEvent::Fatal {
                        origin: WorkerKind::Cpu,
                        detail: e.to_string(),
                    });
                }
                // Channel close signals exhaustion to the pool.
            })
        };

        let mut threads = Vec::with_capacity(thread_count + 1);
        for _ in 0..thread_count {
            let batch_rx = batch_rx.clone();
            let descriptor = Arc::clone(&descriptor);
            let verifier = Arc::clone(&verifier);
            let skip = Arc::clone(&skip);
            let events = events.clone();
            let pause_flag = Arc::clone(&pause_flag);
            let stop_flag = Arc::clone(&stop_flag);
            let found_flag = Arc::clone(&found_flag);
            let progress = Arc::clone(&progress);

            threads.push(std::thread::spawn(move || {
                for batch in batch_rx.iter() {
                    if stop_flag.load(Ordering::Relaxed) {
                        break;
                    }
                    while pause_flag.load(Ordering::Relaxed) && !stop_flag.load(Ordering::Relaxed) {
                        std::thread::sleep(PAUSE_POLL);
                    }

                    let mut last = String::new();
                    for password in &batch.passwords {
                        if stop_flag.load(Ordering::Relaxed) {
                            break;
                        }
                        last.clone_from(password);
                        if skip.contains(password) {
                            continue;
                        }
                        if !fast_reject_survives(&descriptor, password) {
                            continue;
                        }
                        match verifier.verify(password) {
                            Ok(true) => {
                                found_flag.store(true, Ordering::SeqCst);
                                stop_flag.store(true, Ordering::SeqCst);
                                let _ = events.send(WorkerEvent::HitCandidate {
                                    origin: WorkerKind::Cpu,
                                    password: password.clone(),
                                    verified: true,
                                });
                                break;
                            }
                            Ok(false) => {
                                // Fast-path collision: remember and move on.
                                skip.add(password);
                            }
                            Err(e) => {
                                let _ = events.send(WorkerEvent::SoftError {
                                    origin: WorkerKind::Cpu,
                                    detail: format!("verify '{password}': {e}"),
                                });
                            }
                        }
                    }

                    // Publish progress once per batch, monotonically.
                    progress.tested.fetch_add(batch.passwords.len() as u64, Ordering::Relaxed);
                    progress.dictionary_line.fetch_max(batch.line_after, Ordering::Relaxed);
                    progress.position.fetch_max(batch.position_after, Ordering::Relaxed);
                    if !last.is_empty() {
                        if let Ok(mut slot) = progress.last_password.lock() {
                            *slot = last;
                        }
                    }
                    let _ = events.send(WorkerEvent::CpuProgress {
                        tested_total: progress.tested.load(Ordering::Relaxed),
                        last_password: progress
                            .last_password
                            .lock()
                            .map(|s| s.clone())
                            .unwrap_or_default(),
                        dictionary_line: progress.dictionary_line.load(Ordering::Relaxed),
                        position: progress.position.load(Ordering::Relaxed),
                    });
                }
            }));
        }

        // Monitor thread: declares exhaustion once the pool drains.
        {
            let threads_done: Vec<JoinHandle<()>> = std::mem::take(&mut threads);
            let stop_flag = Arc::clone(&stop_flag);
            let found_flag = Arc::clone(&found_flag);
            let progress = Arc::clone(&progress);
            let monitor = std::thread::spawn(move || {
                let _ = feeder.join();
                for handle in threads_done {
                    let _ = handle.join();
                }
                if !found_flag.load(Ordering::SeqCst) && !stop_flag.load(Ordering::SeqCst) {
                    let _ = events.send(WorkerEvent::CpuExhausted {
                        tested_total: progress.tested.load(Ordering::Relaxed),
                    });
                }
            });
            threads = vec![monitor];
        }

        Ok(Self { pause_flag, stop_flag, found_flag, progress, threads })
    }

    /// Cooperative pause; takes effect within one batch.
    pub fn pause(&self) {
        self.pause_flag.store(true, Ordering::Relaxed);
    }

    pub fn resume(&self) {
        self.pause_flag.store(false, Ordering::Relaxed);
    }

    /// Cooperative stop; workers cease publishing within one batch.
    pub fn stop(&self) {
        self.stop_flag.store(true, Ordering::SeqCst);
    }

    pub fn found(&self) -> bool {
        self.found_flag.load(Ordering::SeqCst)
    }

    pub fn progress(&self) -> CpuProgressSnapshot {
        CpuProgressSnapshot {
            tested: self.progress.tested.load(Ordering::Relaxed),
            last_password: self
                .progress
                .last_password
                .lock()
                .map(|s| s.clone())
                .unwrap_or_default(),
            dictionary_line: self.progress.dictionary_line.load(Ordering::Relaxed),
            position: self.progress.position.load(Ordering::Relaxed),
        }
    }

    /// Waits for all worker threads to finish.
    pub fn join(mut self) {
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
    }
}

/// Variant-specific fast rejection. `true` means the candidate survives
/// and must go to the verifier.
fn fast_reject_survives(descriptor: &ArchiveDescriptor, password: &str) -> bool {
    match &descriptor.variant {
        ArchiveVariant::Pkzip(d) => {
            crypto::ZipCryptoKeys::from_password(password.as_bytes())
                .check_header(&d.header, d.check_byte)
        }
        ArchiveVariant::WinZipAes(d) => crypto::winzip_verifier_matches(
            password.as_bytes(),
            &d.salt,
            crypto::winzip_key_len(d.strength),
            &d.verifier,
        ),
        ArchiveVariant::Rar5(d) => {
            let check = crypto::rar5_password_check(password.as_bytes(), &d.salt, d.kdf_log);
            crypto::rar5_check_matches(&check, &d.check_value)
        }
        // RAR3 has no cheap pre-check; confirmable entries (encrypted
        // headers, stored data) go straight to the full-KDF verifier.
        ArchiveVariant::Rar3(d) => {
            d.encryption == Rar3Encryption::HeadersEncrypted || d.method == 0x30
        }
        ArchiveVariant::SevenZip(_) => false,
    }
}

fn feed(
    source: CpuSource,
    batch_size: usize,
    batch_tx: &Sender<Batch>,
    stop: &AtomicBool,
) -> Result<(), CrackError> {
    match source {
        CpuSource::Dictionary { path, resume_from_line } => {
            let file = File::open(&path).map_err(|e| CrackError::io_at(e, &path))?;
            let reader = BufReader::new(file);
            let mut line_no = 0u64;
            let mut batch = Vec::with_capacity(batch_size);
            for line in reader.lines() {
                if stop.load(Ordering::Relaxed) {
                    return Ok(());
                }
                let line = line?;
                line_no += 1;
                if line_no <= resume_from_line {
                    continue;
                }
                let candidate = line.trim_end_matches('\r');
                if candidate.is_empty() {
                    continue;
                }
                batch.push(candidate.to_string());
                if batch.len() >= batch_size {
                    let out = Batch {
                        passwords: std::mem::replace(&mut batch, Vec::with_capacity(batch_size)),
                        line_after: line_no,
                        position_after: 0,
                    };
                    if batch_tx.send(out).is_err() {
                        return Ok(());
                    }
                }
            }
            if !batch.is_empty() {
                let _ = batch_tx.send(Batch { passwords: batch, line_after: line_no, position_after: 0 });
            }
            Ok(())
        }
        CpuSource::BruteForce { alphabet, min_len, max_len, resume_from, end } => {
            let mut gen = BruteForceGen::new(alphabet.as_bytes(), min_len, max_len, resume_from)?;
            let end = end.unwrap_or(u64::MAX);
            let mut batch = Vec::with_capacity(batch_size);
            loop {
                if stop.load(Ordering::Relaxed) {
                    return Ok(());
                }
                // `index` is the next unproduced candidate; the range is
                // half-open, so anything at or past `end` is discarded.
                if gen.index() >= end {
                    break;
                }
                let Some(candidate) = gen.next_candidate() else {
                    break;
                };
                batch.push(candidate);
                if batch.len() >= batch_size {
                    let out = Batch {
                        passwords: std::mem::replace(&mut batch, Vec::with_capacity(batch_size)),
                        line_after: 0,
                        position_after: gen.index(),
                    };
                    if batch_tx.send(out).is_err() {
                        return Ok(());
                    }
                }
            }
            if !batch.is_empty() {
                let _ = batch_tx.send(Batch { passwords: batch, line_after: 0, position_after: gen.index() });
            }
            Ok(())
        }
    }
}

/// Sequential generator over `alphabet^len` for each length, addressable
/// by a linear index so a checkpoint can resume mid-stream.
struct BruteForceGen {
    alphabet: Vec<u8>,
    max_len: u32,
    len: u32,
    /// Candidates remaining in the current length.
    remaining_in_len: u64,
    buffer: Vec<u8>,
    index: u64,
    primed: bool,
}

impl BruteForceGen {
    fn new(alphabet: &[u8], min_len: u32, max_len: u32, resume_from: u64) -> Result<Self, CrackError> {
        if alphabet.is_empty() || min_len < 1 || min_len > max_len {
            return Err(CrackError::Config("empty alphabet or bad length range".into()));
        }
        let base = alphabet.len() as u64;

        // Locate the length and in-length offset for the resume index.
        let mut skip = resume_from;
        let mut len = min_len;
        let mut offset = 0u64;
        let mut exhausted = false;
        loop {
            let count = base.saturating_pow(len);
            if skip < count {
                offset = skip;
                break;
            }
            skip -= count;
            if len == max_len {
                exhausted = true;
                break;
            }
            len += 1;
        }

        let mut gen = Self {
            alphabet: alphabet.to_vec(),
            max_len,
            len,
            remaining_in_len: if exhausted { 0 } else { base.saturating_pow(len) - offset },
            buffer: vec![0u8; len as usize],
            index: resume_from,
            primed: false,
        };
        if !exhausted {
            gen.seed(offset);
        }
        Ok(gen)
    }

    /// Linear index of the next unproduced candidate.
    fn index(&self) -> u64 {
        self.index
    }

    fn seed(&mut self, mut offset: u64) {
        let base = self.alphabet.len() as u64;
        self.buffer.resize(self.len as usize, 0);
        for slot in self.buffer.iter_mut().rev() {
            *slot = self.alphabet[(offset % base) as usize];
            offset /= base;
        }
        self.primed = true;
    }

    fn advance(&mut self) {
        let base = self.alphabet.len();
        for i in (0..self.buffer.len()).rev() {
            let pos = self.alphabet.iter().position(|&c| c == self.buffer[i]).unwrap_or(0);
            if pos + 1 < base {
                self.buffer[i] = self.alphabet[pos + 1];
                return;
            }
            self.buffer[i] = self.alphabet[0];
        }
    }

    fn next_candidate(&mut self) -> Option<String> {
        loop {
            if self.remaining_in_len == 0 {
                if self.len >= self.max_len {
                    return None;
                }
                self.len += 1;
                self.remaining_in_len = (self.alphabet.len() as u64).saturating_pow(self.len);
                self.seed(0);
            }
            if !self.primed {
                self.seed(0);
            }
            let candidate = String::from_utf8_lossy(&self.buffer).into_owned();
            self.advance();
            self.remaining_in_len -= 1;
            self.index += 1;
            return Some(candidate);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(alphabet: &str, min_len: u32, max_len: u32, resume: u64, take: usize) -> Vec<String> {
        let mut gen = BruteForceGen::new(alphabet.as_bytes(), min_len, max_len, resume).unwrap();
        let mut out = Vec::new();
        while out.len() < take {
            match gen.next_candidate() {
                Some(c) => out.push(c),
                None => break,
            }
        }
        out
    }

    #[test]
    fn generator_orders_candidates() {
        let got = collect("ab", 1, 2, 0, 10);
        assert_eq!(got, vec!["a", "b", "aa", "ab", "ba", "bb"]);
    }

    #[test]
    fn generator_resumes_mid_stream() {
        let all = collect("abc", 1, 3, 0, 100);
        let resumed = collect("abc", 1, 3, 5, 100);
        assert_eq!(resumed.as_slice(), &all[5..]);
    }

    #[test]
    fn generator_index_tracks_linear_position() {
        let mut gen = BruteForceGen::new(b"01", 1, 2, 0).unwrap();
        assert_eq!(gen.index(), 0);
        gen.next_candidate().unwrap();
        gen.next_candidate().unwrap();
        gen.next_candidate().unwrap();
        assert_eq!(gen.index(), 3);
    }

    #[test]
    fn generator_exhausts_exactly() {
        // 3 + 9 candidates for base 3, lengths 1..=2.
        let got = collect("xyz", 1, 2, 0, 100);
        assert_eq!(got.len(), 12);
        let tail = collect("xyz", 1, 2, 12, 100);
        assert!(tail.is_empty());
    }
}
