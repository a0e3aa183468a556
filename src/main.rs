//! Main entry point for the BlitzCrack CLI.
//!
//! Usage:
//!   blitzcrack identify secret.zip        → fingerprint the archive
//!   blitzcrack hash secret.zip            → print the cracker hash string
//!   blitzcrack plan --strategy smart-mix  → preview the attack phases
//!   blitzcrack crack secret.zip           → run the attack

use blitzcrack::cli::{self, Commands};
use blitzcrack::fingerprint::{self, FingerprintOptions};
use blitzcrack::orchestrator::{AttackOptions, AttackOutcome, Orchestrator};
use blitzcrack::progress::AttackProgressState;
use blitzcrack::settings::JsonFileSettings;
use blitzcrack::tools::{self, ToolRegistry};
use blitzcrack::workers::WorkerConfig;
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

fn main() -> std::process::ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run_cli_app() {
        if e.downcast_ref::<clap::Error>().is_none() {
            eprintln!("Error: {}", e);
        }
        return std::process::ExitCode::FAILURE;
    }
    std::process::ExitCode::SUCCESS
}

fn run_cli_app() -> Result<(), Box<dyn std::error::Error>> {
    let args = cli::run()?;
    let settings = JsonFileSettings::load(&args.settings);
    let registry = ToolRegistry::detect(&settings);

    match args.command {
        Commands::Identify { archive, timeout } => {
            let opts = FingerprintOptions {
                timeout: Duration::from_secs(timeout),
                ..Default::default()
            };
            let descriptor = fingerprint::fingerprint_with_retry(&archive, &opts, &registry, 3)?;
            println!("variant:  {}", descriptor.variant_tag());
            if let Some(entry) = &descriptor.entry_name {
                println!("entry:    {}", entry);
            }
            println!("mode:     -m {}", descriptor.hashcat_mode());
        }
        Commands::Hash { archive } => {
            let descriptor =
                fingerprint::fingerprint(&archive, &FingerprintOptions::default(), &registry)?;
            println!("{}", descriptor.hash_line());
        }
        Commands::Plan { attack } => {
            let plan = blitzcrack::plan::AttackPlan::build(attack.to_plan_request())?;
            println!(
                "{} phases, keyspace {} (fingerprint {})",
                plan.phases.len(),
                plan.total_keyspace(),
                plan.fingerprint()
            );
            for (i, phase) in plan.phases.iter().enumerate() {
                println!(
                    "  {:>2}. {:<20} charset {:<10} mask {:<22} lengths {}..={}",
                    i + 1,
                    phase.name,
                    phase.charset,
                    phase.mask,
                    phase.min_len,
                    phase.max_len
                );
            }
        }
        Commands::Crack {
            archive,
            attack,
            dictionary,
            cpu,
            gpu,
            threads,
            state_dir,
            progress,
        } => {
            // A crashed session must not leave a GPU burner running.
            if gpu {
                let killed = tools::kill_orphan_crackers("hashcat");
                if killed > 0 {
                    eprintln!("Killed {} orphaned cracker process(es) from a previous run.", killed);
                }
            }

            let descriptor =
                fingerprint::fingerprint(&archive, &FingerprintOptions::default(), &registry)?;
            eprintln!(
                "Attacking {} ({}, -m {})",
                archive.display(),
                descriptor.variant_tag(),
                descriptor.hashcat_mode()
            );

            let options = AttackOptions {
                plan_request: attack.to_plan_request(),
                dictionary,
                worker_config: WorkerConfig {
                    cpu_enabled: cpu,
                    gpu_enabled: gpu,
                    cpu_threads: threads,
                },
                checkpoint_dir: state_dir.join("checkpoints"),
                gpu_work_dir: state_dir.join("gpu"),
                progress: progress.then(|| create_cli_progress_callback()),
            };
            let mut orchestrator = Orchestrator::new(descriptor, options, registry)?;
            match orchestrator.run()? {
                AttackOutcome::Found { password } => {
                    eprintln!();
                    println!("Password found: {}", password);
                }
                AttackOutcome::Exhausted => {
                    eprintln!();
                    return Err("search space exhausted without a hit".into());
                }
                AttackOutcome::Cancelled => {
                    eprintln!();
                    return Err("attack cancelled".into());
                }
                AttackOutcome::Failed { detail } => {
                    eprintln!();
                    return Err(format!("attack failed: {detail}").into());
                }
            }
        }
    }
    Ok(())
}

/// Creates a progress callback for single-line CLI display.
fn create_cli_progress_callback() -> Box<dyn Fn(AttackProgressState) + Send + Sync> {
    let start_time = Instant::now();
    let last_update = Arc::new(Mutex::new(Instant::now()));
    let prev_len = Arc::new(Mutex::new(0usize));
    let done = Arc::new(AtomicBool::new(false));

    Box::new(move |state: AttackProgressState| {
        if done.load(Ordering::Relaxed) {
            return;
        }
        let now = Instant::now();
        // Update every 100ms to avoid terminal spam, but always show completion.
        let should_update = state.overall_percent >= 100.0 || {
            let mut last = last_update.lock().unwrap();
            if now.duration_since(*last).as_millis() >= 100 {
                *last = now;
                true
            } else {
                false
            }
        };
        if !should_update {
            return;
        }

        let term_width = term_size::dimensions().map(|(w, _)| w).unwrap_or(80);
        let bar_width: usize = 30;
        let filled = ((state.overall_percent / 100.0) * bar_width as f64) as usize;
        let bar = format!("[{}{}]", "█".repeat(filled), "░".repeat(bar_width - filled));

        let gpu_part = if state.gpu_total_phases > 0 && state.gpu_phase > 0 {
            format!(
                " | GPU {}/{} {:.1}%",
                state.gpu_phase, state.gpu_total_phases, state.gpu_overall_percent
            )
        } else {
            String::new()
        };
        let elapsed = start_time.elapsed().as_secs_f64();
        let eta = if state.overall_percent > 0.0 && state.overall_percent < 100.0 && elapsed > 1.0 {
            let remaining = elapsed * (100.0 - state.overall_percent) / state.overall_percent;
            if remaining > 60.0 {
                format!(" | ETA {:.1}m", remaining / 60.0)
            } else {
                format!(" | ETA {:.0}s", remaining)
            }
        } else {
            String::new()
        };

        let mut line = format!(
            "{} {:.1}% | {} tested | {:.0}/s | {}{}{}",
            bar,
            state.overall_percent,
            state.cpu_tested,
            state.cpu_speed,
            truncate(&state.last_password, 16),
            gpu_part,
            eta
        );
        if line.len() > term_width {
            line.truncate(term_width);
        }

        // Pad with spaces if the new line is shorter, to fully overwrite.
        {
            let mut prev = prev_len.lock().unwrap();
            if *prev > line.len() {
                line.push_str(&" ".repeat(*prev - line.len()));
            }
            *prev = line.len();
        }
        eprint!("\r\x1B[2K{}", line);
        io::stderr().flush().ok();

        if state.overall_percent >= 100.0 {
            eprintln!();
            done.store(true, Ordering::Relaxed);
        }
    })
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{cut}…")
    }
}
