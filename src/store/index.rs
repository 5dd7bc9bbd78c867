//! Installation-wide project index.
//!
//! One JSON file mapping project roots to their registered worktrees and
//! chats. Every overwrite first copies the current file to a backup path;
//! a corrupt index restores from that backup, and failing that the caller
//! gets an empty index — the UI can always re-discover projects, so no
//! load path here ever raises.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::error::StoreError;
use crate::model::ChatId;

use super::paths::StorePaths;

pub type ProjectIndex = BTreeMap<String, ProjectRecord>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub worktrees: BTreeMap<String, WorktreeRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorktreeRecord {
    #[serde(rename = "type")]
    pub kind: WorktreeKind,
    pub name: String,
    #[serde(default)]
    pub chats: Vec<ChatRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_override: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorktreeKind {
    Primary,
    Linked,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRecord {
    pub name: String,
    pub chat_id: ChatId,
    #[serde(default)]
    pub last_session_id: Option<String>,
}

/// Manages the index file and its backup.
#[derive(Debug, Clone)]
pub struct IndexManager {
    path: PathBuf,
    backup: PathBuf,
}

impl IndexManager {
    pub fn new(paths: &StorePaths) -> Self {
        Self {
            path: paths.index(),
            backup: paths.index_backup(),
        }
    }

    /// Load the index. Never errors: a corrupt primary falls back to the
    /// backup, and a corrupt (or missing) backup yields an empty index.
    pub async fn load(&self) -> ProjectIndex {
        match read_index(&self.path).await {
            Ok(Some(index)) => return index,
            Ok(None) => return ProjectIndex::new(),
            Err(error) => {
                tracing::warn!(
                    path = %self.path.display(),
                    %error,
                    "index unreadable, attempting backup restore"
                );
            }
        }
        match read_index(&self.backup).await {
            Ok(Some(index)) => index,
            _ => {
                tracing::warn!(
                    path = %self.backup.display(),
                    "backup restore failed, returning empty index"
                );
                ProjectIndex::new()
            }
        }
    }

    /// Save the index, backing up the current file first and writing via a
    /// temp file + rename so a crash never leaves a half-written index.
    pub async fn save(&self, index: &ProjectIndex) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::io(parent, e))?;
        }

        if fs::try_exists(&self.path)
            .await
            .map_err(|e| StoreError::io(&self.path, e))?
        {
            fs::copy(&self.path, &self.backup)
                .await
                .map_err(|e| StoreError::io(&self.backup, e))?;
        }

        let json = serde_json::to_string_pretty(index)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)
            .await
            .map_err(|e| StoreError::io(&tmp, e))?;
        fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| StoreError::io(&self.path, e))?;
        Ok(())
    }
}

/// Read and parse one index file. `Ok(None)` means the file does not exist;
/// a parse failure is an error so the caller can try the backup.
async fn read_index(path: &PathBuf) -> Result<Option<ProjectIndex>, StoreError> {
    let content = match fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StoreError::io(path, e)),
    };
    Ok(Some(serde_json::from_str(&content)?))
}
