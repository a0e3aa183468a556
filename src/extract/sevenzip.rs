//! 7-Zip extraction, delegated to an external hash extractor.
//!
//! 7-Zip keeps its encryption parameters inside a compressed header; rather
//! than reimplement that parser we shell out to the community extractor and
//! adopt its hash line.

use std::path::Path;
use std::process::Command;

use tracing::debug;

use crate::fingerprint::{ArchiveDescriptor, ArchiveVariant, SevenZipData};
use crate::tools::ToolRegistry;
use crate::CrackError;

pub(crate) fn extract(path: &Path, tools: &ToolRegistry) -> Result<ArchiveDescriptor, CrackError> {
    let tool = tools.require_seven_zip_hash()?;
    debug!(tool = %tool.display(), archive = %path.display(), "running 7-Zip hash extractor");

    let output = Command::new(tool).arg(path).output().map_err(|e| {
        CrackError::ExternalToolFailed {
            tool: tool.display().to_string(),
            detail: format!("could not run: {e}"),
        }
    })?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    let hash_line = parse_helper_output(&stdout).ok_or_else(|| CrackError::ExternalToolFailed {
        tool: tool.display().to_string(),
        detail: if output.status.success() {
            "no $7z$ hash in output".to_string()
        } else {
            format!("exited with {}", output.status)
        },
    })?;

    Ok(ArchiveDescriptor {
        path: path.to_path_buf(),
        entry_name: None,
        variant: ArchiveVariant::SevenZip(SevenZipData { hash_line }),
    })
}

/// The extractor prints `filename:$7z$...`; the hash is everything after
/// the last colon (the filename itself may contain colons).
fn parse_helper_output(stdout: &str) -> Option<String> {
    stdout
        .lines()
        .filter(|line| line.contains("$7z$"))
        .filter_map(|line| line.rsplit_once(':').map(|(_, hash)| hash.trim().to_string()))
        .find(|hash| hash.starts_with("$7z$"))
}
