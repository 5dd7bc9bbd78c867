//! Persistence engine: index, history log, and metadata snapshots.
//!
//! `SessionStore` is an explicit composition of the index manager and the
//! history writer behind chat-level operations. It consumes finalized
//! entries and a metadata snapshot, and reconstructs entries on load
//! without depending on live dispatcher state.

pub mod history;
pub mod index;
pub mod metadata;
pub mod paths;

pub use history::{encode_entry, load_history, AppendReceipt, HistoryWriter, LoadedHistory};
pub use index::{
    ChatRecord, IndexManager, ProjectIndex, ProjectRecord, WorktreeKind, WorktreeRecord,
};
pub use paths::{project_id, StoreConfig, StorePaths};

use std::path::Path;

use crate::error::StoreError;
use crate::model::{ChatId, ChatMetadata, Entry};

/// Storage façade for one installation.
#[derive(Debug)]
pub struct SessionStore {
    paths: StorePaths,
    index: IndexManager,
    history: HistoryWriter,
}

impl SessionStore {
    pub fn new(config: StoreConfig) -> Self {
        let paths = StorePaths::resolve(&config);
        let index = IndexManager::new(&paths);
        Self {
            paths,
            index,
            history: HistoryWriter::new(),
        }
    }

    pub fn paths(&self) -> &StorePaths {
        &self.paths
    }

    pub async fn load_index(&self) -> ProjectIndex {
        self.index.load().await
    }

    pub async fn save_index(&self, index: &ProjectIndex) -> Result<(), StoreError> {
        self.index.save(index).await
    }

    /// Enqueue one finalized entry for durable append to the chat's history.
    pub async fn append_entry(
        &self,
        project_root: &Path,
        chat_id: &ChatId,
        entry: &Entry,
    ) -> AppendReceipt {
        let path = self.paths.history(project_root, chat_id);
        self.history.append(&path, entry).await
    }

    /// Wait until every append enqueued so far for this chat has hit disk.
    pub async fn flush_history(&self, project_root: &Path, chat_id: &ChatId) {
        let path = self.paths.history(project_root, chat_id);
        self.history.flush(&path).await;
    }

    pub async fn load_chat_history(
        &self,
        project_root: &Path,
        chat_id: &ChatId,
    ) -> Result<LoadedHistory, StoreError> {
        let path = self.paths.history(project_root, chat_id);
        load_history(&path).await
    }

    pub async fn save_chat_metadata(
        &self,
        project_root: &Path,
        chat_id: &ChatId,
        meta: &ChatMetadata,
    ) -> Result<(), StoreError> {
        let path = self.paths.metadata(project_root, chat_id);
        metadata::save_metadata(&path, meta).await
    }

    pub async fn load_chat_metadata(
        &self,
        project_root: &Path,
        chat_id: &ChatId,
    ) -> Option<ChatMetadata> {
        let path = self.paths.metadata(project_root, chat_id);
        metadata::load_metadata(&path).await
    }
}
