//! Process-wide settings, modelled as an injected key-value store.
//!
//! The engine only ever asks for string values by key; what backs the store
//! (a JSON file here, a database in the desktop shell) is the caller's
//! business. Services receive a `&dyn SettingsStore`, never a global.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::CrackError;

/// Well-known settings keys.
pub mod keys {
    /// Absolute path to the hashcat binary.
    pub const HASHCAT_PATH: &str = "tools.hashcat_path";
    /// Absolute path to the 7-Zip hash extractor (7z2hashcat-style script).
    pub const SEVENZIP_HASH_TOOL_PATH: &str = "tools.7z2hashcat_path";
    /// Absolute path to the 7z binary used for candidate verification.
    pub const SEVENZIP_PATH: &str = "tools.7z_path";
    /// Absolute path to the native RAR hash extractor.
    pub const RAR_HASH_TOOL_PATH: &str = "tools.rar2hashcat_path";
    /// Default CPU worker thread count ("0" = logical CPU count).
    pub const DEFAULT_THREADS: &str = "attack.default_threads";
    /// Default charset selection, e.g. "dl" for digits+lowercase.
    pub const DEFAULT_CHARSETS: &str = "attack.default_charsets";
    /// "true" once the user dismissed the optional-tool download prompt.
    pub const DISMISS_TOOL_PROMPT: &str = "ui.dismiss_tool_prompt";
}

/// A string key-value store. Implementations must persist `put` before
/// returning when they are durable at all; the engine never batches.
pub trait SettingsStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn put(&mut self, key: &str, value: &str) -> Result<(), CrackError>;
}

/// In-memory store for tests and one-shot CLI runs.
#[derive(Debug, Default)]
pub struct MemorySettings {
    values: BTreeMap<String, String>,
}

impl MemorySettings {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SettingsStore for MemorySettings {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }

    fn put(&mut self, key: &str, value: &str) -> Result<(), CrackError> {
        self.values.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// JSON-file backed store. The whole map is rewritten on every `put`
/// (settings are tiny) through a sibling temp file.
pub struct JsonFileSettings {
    path: PathBuf,
    values: BTreeMap<String, String>,
}

impl JsonFileSettings {
    /// Loads the store, starting empty if the file is missing or corrupt.
    pub fn load(path: &Path) -> Self {
        let values = std::fs::read(path)
            .ok()
            .and_then(|bytes| serde_json::from_slice(&bytes).ok())
            .unwrap_or_default();
        Self { path: path.to_path_buf(), values }
    }

    fn flush(&self) -> Result<(), CrackError> {
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir).map_err(|e| CrackError::io_at(e, dir))?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut tmp, &self.values)
            .map_err(|e| CrackError::Io { source: e.into(), path: self.path.clone() })?;
        tmp.flush()?;
        tmp.persist(&self.path)
            .map_err(|e| CrackError::io_at(e.error, &self.path))?;
        Ok(())
    }
}

impl SettingsStore for JsonFileSettings {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }

    fn put(&mut self, key: &str, value: &str) -> Result<(), CrackError> {
        self.values.insert(key.to_string(), value.to_string());
        self.flush()
    }
}
