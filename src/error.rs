use std::path::PathBuf;

/// The primary error type for all operations in the `blitzcrack` crate.
#[derive(Debug)]
pub enum CrackError {
    /// The archive file does not exist or could not be opened.
    NotFound { path: PathBuf },

    /// The file is too small to carry any archive signature (< 4 bytes).
    TooSmall { path: PathBuf, size: u64 },

    /// The file carries a signature we recognise but cannot attack
    /// (plain/compressed TAR), or no signature at all.
    Unsupported { detail: String },

    /// The archive is valid but contains no encrypted entry to attack.
    NoEncryptedEntry,

    /// The archive ended in the middle of a structure we were reading.
    Truncated { context: &'static str },

    /// A header field contradicts the container format.
    MalformedHeader { context: String },

    /// An external helper (7-Zip hash extractor, hashcat, ...) is required
    /// but was not found. `remedy` names the fix for the user.
    ExternalToolRequired { tool: String, remedy: String },

    /// An external helper was found but failed to produce usable output.
    ExternalToolFailed { tool: String, detail: String },

    /// Fingerprinting exceeded its wall-clock budget.
    DetectionTimeout { budget_secs: u64 },

    /// The operation was cancelled through its cancellation token.
    Cancelled,

    /// A worker process or thread could not be started.
    WorkerLaunchFailed { worker: &'static str, detail: String },

    /// A worker died unexpectedly mid-attack.
    WorkerCrashed { worker: &'static str, detail: String },

    /// A checkpoint could not be written. Soft: the orchestrator retries on
    /// the next tick.
    CheckpointWriteFailed { detail: String },

    /// Invalid attack parameters (charset selection, length range, ...).
    Config(String),

    /// An invariant was violated; the attack cannot continue safely.
    UnrecoverableState(String),

    /// An I/O error outside the categories above.
    Io { source: std::io::Error, path: PathBuf },
}

impl std::fmt::Display for CrackError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CrackError::NotFound { path } => write!(f, "File not found: '{}'", path.display()),
            CrackError::TooSmall { path, size } => {
                write!(f, "File '{}' is too small to be an archive ({} bytes)", path.display(), size)
            }
            CrackError::Unsupported { detail } => write!(f, "Unsupported format: {}", detail),
            CrackError::NoEncryptedEntry => write!(f, "The archive contains no encrypted entries"),
            CrackError::Truncated { context } => write!(f, "Truncated archive while reading {}", context),
            CrackError::MalformedHeader { context } => write!(f, "Malformed header: {}", context),
            CrackError::ExternalToolRequired { tool, remedy } => {
                write!(f, "External tool '{}' is required: {}", tool, remedy)
            }
            CrackError::ExternalToolFailed { tool, detail } => {
                write!(f, "External tool '{}' failed: {}", tool, detail)
            }
            CrackError::DetectionTimeout { budget_secs } => {
                write!(f, "Archive detection timed out after {} s", budget_secs)
            }
            CrackError::Cancelled => write!(f, "Operation cancelled"),
            CrackError::WorkerLaunchFailed { worker, detail } => {
                write!(f, "Could not launch {} worker: {}", worker, detail)
            }
            CrackError::WorkerCrashed { worker, detail } => {
                write!(f, "{} worker crashed: {}", worker, detail)
            }
            CrackError::CheckpointWriteFailed { detail } => {
                write!(f, "Checkpoint write failed: {}", detail)
            }
            CrackError::Config(msg) => write!(f, "Invalid configuration: {}", msg),
            CrackError::UnrecoverableState(msg) => write!(f, "Unrecoverable state: {}", msg),
            CrackError::Io { source, path } => {
                write!(f, "I/O error on path '{}': {}", path.display(), source)
            }
        }
    }
}

impl std::error::Error for CrackError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CrackError::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<std::io::Error> for CrackError {
    fn from(err: std::io::Error) -> Self {
        CrackError::Io { source: err, path: PathBuf::new() } // Generic path
    }
}

impl CrackError {
    /// Attach a path to a bare I/O error, mapping `NotFound` to its own kind.
    pub fn io_at(err: std::io::Error, path: &std::path::Path) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            CrackError::NotFound { path: path.to_path_buf() }
        } else {
            CrackError::Io { source: err, path: path.to_path_buf() }
        }
    }

    /// Soft errors are logged and survived; hard errors abort the attack.
    pub fn is_soft(&self) -> bool {
        matches!(self, CrackError::CheckpointWriteFailed { .. })
    }
}
