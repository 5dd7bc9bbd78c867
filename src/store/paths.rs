use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::model::ChatId;

/// Explicit storage configuration, threaded through constructors instead of
/// living in process-wide state, so the engine stays testable against a
/// temp directory.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub base_dir: PathBuf,
}

impl StoreConfig {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }
}

/// Resolved paths for all storage artifacts.
/// Pure data structure with no I/O.
#[derive(Debug, Clone)]
pub struct StorePaths {
    base: PathBuf,
}

impl StorePaths {
    /// Resolves all paths under the configured base directory.
    ///
    /// Pure function: only performs path concatenation. Does NOT create
    /// directories - that is deferred to the first write.
    pub fn resolve(config: &StoreConfig) -> Self {
        Self {
            base: config.base_dir.clone(),
        }
    }

    /// The installation-wide project index file.
    pub fn index(&self) -> PathBuf {
        self.base.join("projects.json")
    }

    /// Backup written before every index overwrite.
    pub fn index_backup(&self) -> PathBuf {
        self.base.join("projects.json.bak")
    }

    /// Storage directory for one project, keyed by its deterministic id.
    pub fn project_dir(&self, project_root: &Path) -> PathBuf {
        self.base.join("projects").join(project_id(project_root))
    }

    pub fn chat_dir(&self, project_root: &Path, chat_id: &ChatId) -> PathBuf {
        self.project_dir(project_root)
            .join("chats")
            .join(chat_id.as_str())
    }

    /// Append-only history log for one chat.
    pub fn history(&self, project_root: &Path, chat_id: &ChatId) -> PathBuf {
        self.chat_dir(project_root, chat_id).join("history.jsonl")
    }

    /// Metadata snapshot for one chat.
    pub fn metadata(&self, project_root: &Path, chat_id: &ChatId) -> PathBuf {
        self.chat_dir(project_root, chat_id).join("metadata.json")
    }
}

/// Deterministic project id: truncated SHA-256 of the absolute project root
/// path. The same project always maps to the same storage directory across
/// restarts, regardless of access order.
pub fn project_id(project_root: &Path) -> String {
    let digest = Sha256::digest(project_root.to_string_lossy().as_bytes());
    digest[..8].iter().map(|b| format!("{b:02x}")).collect()
}
