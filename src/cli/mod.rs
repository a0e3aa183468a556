use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::plan::{CharsetSelection, PlanRequest, Strategy};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Path of the JSON settings store.
    #[arg(long, global = true, default_value = ".blitzcrack/settings.json")]
    pub settings: PathBuf,
}

#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
    /// Identify an archive's encryption variant.
    #[command(alias = "id")]
    Identify {
        /// The archive file to inspect.
        #[arg(required = true)]
        archive: PathBuf,

        /// Detection wall-clock budget in seconds.
        #[arg(long, default_value_t = 8)]
        timeout: u64,
    },

    /// Print the canonical hash string for an archive.
    Hash {
        /// The archive file to extract from.
        #[arg(required = true)]
        archive: PathBuf,
    },

    /// Print the phase plan for a charset/length/strategy selection.
    Plan {
        #[command(flatten)]
        attack: AttackArgs,
    },

    /// Recover the password of an encrypted archive.
    #[command(alias = "c")]
    Crack {
        /// The archive file to attack.
        #[arg(required = true)]
        archive: PathBuf,

        #[command(flatten)]
        attack: AttackArgs,

        /// Dictionary file tried by the CPU worker before brute force.
        #[arg(long)]
        dictionary: Option<PathBuf>,

        /// Disable the CPU worker.
        #[arg(long = "no-cpu", action = clap::ArgAction::SetFalse, default_value_t = true)]
        cpu: bool,

        /// Enable the GPU worker (requires hashcat).
        #[arg(long)]
        gpu: bool,

        /// Number of CPU worker threads. [0 = one per logical CPU]
        #[arg(long, default_value_t = 0)]
        threads: usize,

        /// Directory for checkpoints and GPU work files.
        #[arg(long, default_value = ".blitzcrack")]
        state_dir: PathBuf,

        /// Show a live progress line.
        #[arg(long)]
        progress: bool,
    },
}

/// Charset, length range and strategy flags shared by `plan` and `crack`.
#[derive(clap::Args, Clone, Copy, Debug)]
pub struct AttackArgs {
    /// Include digits 0-9.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub numbers: bool,

    /// Include lowercase letters.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub lower: bool,

    /// Include uppercase letters.
    #[arg(long, default_value_t = false, action = clap::ArgAction::Set)]
    pub upper: bool,

    /// Include symbols.
    #[arg(long, default_value_t = false, action = clap::ArgAction::Set)]
    pub special: bool,

    /// Minimum password length.
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..=10))]
    pub min_len: u32,

    /// Maximum password length.
    #[arg(long, default_value_t = 6, value_parser = clap::value_parser!(u32).range(1..=10))]
    pub max_len: u32,

    /// Phase ordering strategy.
    #[arg(long, value_enum, default_value_t = StrategyArg::SmartMix)]
    pub strategy: StrategyArg,
}

impl AttackArgs {
    pub fn to_plan_request(self) -> PlanRequest {
        PlanRequest {
            charsets: CharsetSelection {
                numbers: self.numbers,
                lower: self.lower,
                upper: self.upper,
                special: self.special,
            },
            min_len: self.min_len,
            max_len: self.max_len,
            strategy: self.strategy.into(),
        }
    }
}

#[derive(ValueEnum, Copy, Clone, Debug, PartialEq, Eq)]
pub enum StrategyArg {
    /// One phase per length over the full charset.
    LengthFirst,
    /// One phase per pattern family.
    PatternFirst,
    /// Short/medium/long rounds with growing charsets.
    SmartMix,
    /// PINs and common word shapes first.
    CommonFirst,
}

impl From<StrategyArg> for Strategy {
    fn from(value: StrategyArg) -> Self {
        match value {
            StrategyArg::LengthFirst => Strategy::LengthFirst,
            StrategyArg::PatternFirst => Strategy::PatternFirst,
            StrategyArg::SmartMix => Strategy::SmartMix,
            StrategyArg::CommonFirst => Strategy::CommonFirst,
        }
    }
}

/// Parses command-line arguments using `clap` and returns them.
///
/// This is the main entry point for the CLI logic.
pub fn run() -> Result<Args, Box<dyn std::error::Error>> {
    Ok(Args::parse())
}
