//! Discovery and supervision of the external helper binaries.
//!
//! The engine itself never hard-depends on any of them: hashcat powers the
//! GPU worker, `7z2hashcat` extracts 7-Zip hashes and `7z` verifies 7-Zip
//! candidates. A missing tool surfaces as an actionable
//! `ExternalToolRequired`, never a crash.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::settings::{keys, SettingsStore};
use crate::CrackError;

/// How long a `--version` probe may take before the tool is declared broken.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Fallback search lists, tried in order after the configured path.
const HASHCAT_CANDIDATES: &[&str] = &["hashcat", "/usr/bin/hashcat", "/usr/local/bin/hashcat"];
const SEVENZIP_HASH_CANDIDATES: &[&str] = &["7z2hashcat.pl", "7z2hashcat"];
const SEVENZIP_CANDIDATES: &[&str] = &["7z", "/usr/bin/7z", "7za"];
const RAR_HASH_CANDIDATES: &[&str] = &["rar2john", "/usr/bin/rar2john"];

/// Resolved helper binaries. `None` means absent, not an error; the error is
/// raised at the point of use, with the remedy.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    pub hashcat: Option<PathBuf>,
    pub seven_zip_hash: Option<PathBuf>,
    pub seven_zip: Option<PathBuf>,
    pub rar_hash: Option<PathBuf>,
}

impl ToolRegistry {
    /// Probes configured paths first, then the fixed search lists.
    pub fn detect(settings: &dyn SettingsStore) -> Self {
        Self {
            hashcat: resolve(settings.get(keys::HASHCAT_PATH), HASHCAT_CANDIDATES),
            seven_zip_hash: resolve(
                settings.get(keys::SEVENZIP_HASH_TOOL_PATH),
                SEVENZIP_HASH_CANDIDATES,
            ),
            seven_zip: resolve(settings.get(keys::SEVENZIP_PATH), SEVENZIP_CANDIDATES),
            rar_hash: resolve(settings.get(keys::RAR_HASH_TOOL_PATH), RAR_HASH_CANDIDATES),
        }
    }

    /// The hashcat binary, or the actionable error naming the remedy.
    pub fn require_hashcat(&self) -> Result<&Path, CrackError> {
        self.hashcat.as_deref().ok_or_else(|| CrackError::ExternalToolRequired {
            tool: "hashcat".into(),
            remedy: format!("install hashcat or set '{}' to its location", keys::HASHCAT_PATH),
        })
    }

    pub fn require_seven_zip_hash(&self) -> Result<&Path, CrackError> {
        self.seven_zip_hash.as_deref().ok_or_else(|| CrackError::ExternalToolRequired {
            tool: "7z2hashcat".into(),
            remedy: format!(
                "install the 7z2hashcat extractor or set '{}' to its location",
                keys::SEVENZIP_HASH_TOOL_PATH
            ),
        })
    }

    pub fn require_seven_zip(&self) -> Result<&Path, CrackError> {
        self.seven_zip.as_deref().ok_or_else(|| CrackError::ExternalToolRequired {
            tool: "7z".into(),
            remedy: format!("install p7zip or set '{}' to its location", keys::SEVENZIP_PATH),
        })
    }
}

fn resolve(configured: Option<String>, candidates: &[&str]) -> Option<PathBuf> {
    if let Some(path) = configured {
        let path = PathBuf::from(path);
        if probe_version(&path) {
            return Some(path);
        }
        warn!(path = %path.display(), "configured tool path failed its --version probe");
    }
    candidates
        .iter()
        .map(PathBuf::from)
        .find(|candidate| probe_version(candidate))
}

/// Runs `<tool> --version` and reports whether it exited within the probe
/// timeout. The exit status itself is not inspected: some helpers exit
/// non-zero on `--version` yet are perfectly usable.
fn probe_version(path: &Path) -> bool {
    let child = Command::new(path)
        .arg("--version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn();
    let mut child = match child {
        Ok(c) => c,
        Err(_) => return false,
    };

    let deadline = Instant::now() + PROBE_TIMEOUT;
    loop {
        match child.try_wait() {
            Ok(Some(_)) => return true,
            Ok(None) => {
                if Instant::now() >= deadline {
                    let _ = child.kill();
                    let _ = child.wait();
                    debug!(path = %path.display(), "tool probe timed out");
                    return false;
                }
                std::thread::sleep(Duration::from_millis(50));
            }
            Err(_) => return false,
        }
    }
}

/// Kills lingering cracker children from previous runs. Called once at
/// startup; a crashed session must not leave a GPU burner behind.
pub fn kill_orphan_crackers(image_name: &str) -> usize {
    use sysinfo::System;

    let mut sys = System::new();
    sys.refresh_processes();
    let mut killed = 0;
    for process in sys.processes().values() {
        if process.name().to_ascii_lowercase().contains(image_name) {
            warn!(pid = %process.pid(), name = process.name(), "killing orphan cracker process");
            if process.kill() {
                killed += 1;
            }
        }
    }
    killed
}
