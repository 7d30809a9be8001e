//! Per-module JSON documents
//!
//! Each module owns `<state_dir>/<module>/<module>.json`. Reads fall back
//! to defaults when the document is absent; writes are atomic
//! (temp file, fsync, rename).

use crate::error::{Error, Result};
use crate::gate::Module;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Activation status recorded in every module document
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleStatus {
    Active,
    /// Started, waiting for background confirmation
    Pending,
    #[default]
    Inactive,
}

impl ModuleStatus {
    pub fn is_active(self) -> bool {
        self == ModuleStatus::Active
    }
}

impl fmt::Display for ModuleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ModuleStatus::Active => "active",
            ModuleStatus::Pending => "pending",
            ModuleStatus::Inactive => "inactive",
        };
        f.write_str(s)
    }
}

/// Other subsystems still write the legacy `1`/`0` flags
#[derive(Deserialize)]
#[serde(untagged)]
enum RawStatus {
    Flag(i64),
    Bool(bool),
    Text(String),
}

impl<'de> Deserialize<'de> for ModuleStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        match RawStatus::deserialize(deserializer)? {
            RawStatus::Flag(1) | RawStatus::Bool(true) => Ok(ModuleStatus::Active),
            RawStatus::Flag(_) | RawStatus::Bool(false) => Ok(ModuleStatus::Inactive),
            RawStatus::Text(s) => match s.to_ascii_lowercase().as_str() {
                "active" | "1" => Ok(ModuleStatus::Active),
                "pending" => Ok(ModuleStatus::Pending),
                "inactive" | "0" => Ok(ModuleStatus::Inactive),
                other => Err(serde::de::Error::custom(format!(
                    "unknown module status '{}'",
                    other
                ))),
            },
        }
    }
}

#[derive(Deserialize)]
struct StatusOnly {
    #[serde(default)]
    status: ModuleStatus,
}

/// Root of the per-module documents
#[derive(Debug, Clone)]
pub struct ConfigStore {
    root: PathBuf,
}

impl ConfigStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Location of a module's document
    pub fn path(&self, module: Module) -> PathBuf {
        let name = module.as_str();
        self.root.join(name).join(format!("{}.json", name))
    }

    /// Read a document, `None` if it does not exist
    pub fn load_optional<T: DeserializeOwned>(&self, module: Module) -> Result<Option<T>> {
        let path = self.path(module);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(Error::ConfigRead { path, source: e });
            }
        };
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|source| Error::DocumentParse { path, source })
    }

    /// Read a document, falling back to its default when absent
    pub fn load<T: DeserializeOwned + Default>(&self, module: Module) -> Result<T> {
        Ok(self.load_optional(module)?.unwrap_or_default())
    }

    /// Atomically replace a document
    pub fn save<T: Serialize>(&self, module: Module, doc: &T) -> Result<()> {
        let path = self.path(module);
        let content = serde_json::to_string_pretty(doc).map_err(|e| Error::DocumentWrite {
            path: path.clone(),
            message: format!("failed to serialize: {}", e),
        })?;
        write_atomic(&path, content.as_bytes()).map_err(|e| Error::DocumentWrite {
            path: path.clone(),
            message: e.to_string(),
        })?;
        tracing::debug!(path = %path.display(), "document written");
        Ok(())
    }

    /// Save, degrading a failure to a warning
    ///
    /// Returns whether the document reached disk.
    pub fn save_or_warn<T: Serialize>(&self, module: Module, doc: &T) -> bool {
        match self.save(module, doc) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(module = %module, error = %e, "failed to persist document");
                false
            }
        }
    }

    /// Status of any module; missing or unreadable documents are inactive
    pub fn module_status(&self, module: Module) -> ModuleStatus {
        match self.load_optional::<StatusOnly>(module) {
            Ok(Some(doc)) => doc.status,
            Ok(None) => ModuleStatus::Inactive,
            Err(e) => {
                tracing::debug!(module = %module, error = %e, "unreadable status, treating as inactive");
                ModuleStatus::Inactive
            }
        }
    }
}

fn write_atomic(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;

    let mut temp = path.as_os_str().to_owned();
    temp.push(".tmp");
    let temp = PathBuf::from(temp);

    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&temp)?;
    file.write_all(content)?;
    file.sync_all()?;
    drop(file);

    if let Err(e) = fs::rename(&temp, path) {
        let _ = fs::remove_file(&temp);
        return Err(e);
    }

    // The new document is in place; a failed directory sync only loses durability
    if let Err(e) = File::open(parent).and_then(|dir| dir.sync_all()) {
        tracing::warn!(path = %parent.display(), error = %e, "directory sync failed after rename");
    }
    Ok(())
}
