//! Wiring between the message handler and the persistence engine.
//!
//! `ChatSession` owns one chat, feeds it inbound messages, appends every
//! newly finalized primary-conversation entry to the durable log, and
//! snapshots metadata on a debounced schedule. Subagent conversations are
//! live-only: their detail is viewable while the chat runs, and the `Task`
//! invocation that spawned them (with its paired result) is what history
//! retains.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::Value;

use crate::error::StoreError;
use crate::event::ChatEvent;
use crate::handler::{ChatHandler, PermissionRegistry};
use crate::model::{Chat, ChatId, Entry, ToolResultEntry};
use crate::store::SessionStore;

/// Minimum interval between metadata snapshot writes.
pub const SNAPSHOT_INTERVAL: Duration = Duration::from_secs(1);

/// Check if a metadata snapshot should be written.
/// Pure function: time comparison only.
pub fn should_snapshot(last: Option<Instant>, now: Instant, min_interval: Duration) -> bool {
    match last {
        None => true,
        Some(last) => now.duration_since(last) >= min_interval,
    }
}

/// One live chat bound to its storage.
pub struct ChatSession {
    chat: Chat,
    handler: ChatHandler,
    store: Arc<SessionStore>,
    project_root: PathBuf,
    last_snapshot: Option<Instant>,
    metadata_dirty: bool,
}

impl ChatSession {
    pub fn new(chat: Chat, store: Arc<SessionStore>, project_root: impl Into<PathBuf>) -> Self {
        Self {
            chat,
            handler: ChatHandler::new(),
            store,
            project_root: project_root.into(),
            last_snapshot: None,
            metadata_dirty: false,
        }
    }

    pub fn with_permissions(mut self, permissions: Box<dyn PermissionRegistry>) -> Self {
        self.handler = ChatHandler::with_permissions(permissions);
        self
    }

    /// Reconstruct a session from disk. History is authoritative; a missing
    /// or corrupt metadata snapshot falls back to defaults. Returns the
    /// session and the number of history lines skipped during load.
    pub async fn resume(
        chat_id: ChatId,
        store: Arc<SessionStore>,
        project_root: impl Into<PathBuf>,
    ) -> Result<(Self, usize), StoreError> {
        let project_root = project_root.into();
        let loaded = store.load_chat_history(&project_root, &chat_id).await?;
        let metadata = store
            .load_chat_metadata(&project_root, &chat_id)
            .await
            .unwrap_or_default();

        let mut chat = Chat::new(chat_id);
        let primary = chat.primary().id().clone();
        for entry in loaded.entries {
            chat.conversation_mut(&primary).push(entry);
        }
        chat.metadata = metadata;

        Ok((Self::new(chat, store, project_root), loaded.skipped))
    }

    pub fn chat(&self) -> &Chat {
        &self.chat
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    /// Feed one inbound message through the handler, persist what it
    /// finalized, and return the change events.
    pub async fn ingest(&mut self, raw: Value) -> Vec<ChatEvent> {
        let events = self.handler.handle(&mut self.chat, raw);
        self.persist(&events).await;
        events
    }

    /// Record the user's own prompt into the primary conversation and the
    /// durable log. Returns the entry index.
    pub async fn record_user_prompt(&mut self, text: impl Into<String>) -> usize {
        let primary = self.chat.primary().id().clone();
        let index = self
            .chat
            .conversation_mut(&primary)
            .push(Entry::user_message(text));
        if let Some(entry) = self.chat.primary().entry(index) {
            let _ = self
                .store
                .append_entry(&self.project_root, self.chat.id(), entry)
                .await;
        }
        index
    }

    /// Force all pending history appends to disk and write a metadata
    /// snapshot if one is outstanding.
    pub async fn flush(&mut self) {
        self.store
            .flush_history(&self.project_root, self.chat.id())
            .await;
        if self.metadata_dirty {
            self.write_snapshot().await;
        }
    }

    /// Stop consuming messages and abandon outstanding correlations.
    /// On-disk state is left exactly as already flushed.
    pub fn dispose(&mut self) {
        self.handler.dispose();
    }

    async fn persist(&mut self, events: &[ChatEvent]) {
        let primary = self.chat.primary().id().clone();
        for event in events {
            match event {
                ChatEvent::EntryFinalized {
                    conversation,
                    index,
                } if *conversation == primary => {
                    if let Some(entry) = self.chat.primary().entry(*index) {
                        let _ = self
                            .store
                            .append_entry(&self.project_root, self.chat.id(), entry)
                            .await;
                    }
                }
                ChatEvent::ToolResultPaired {
                    conversation,
                    index,
                    call_id,
                } if *conversation == primary => {
                    let Some(inv) = self
                        .chat
                        .primary()
                        .entry(*index)
                        .and_then(Entry::as_tool_invocation)
                    else {
                        continue;
                    };
                    let result = Entry::ToolResult(ToolResultEntry {
                        call_id: call_id.clone(),
                        result: inv.result.clone().unwrap_or(Value::Null),
                        is_error: inv.is_error,
                        at: Utc::now(),
                    });
                    let _ = self
                        .store
                        .append_entry(&self.project_root, self.chat.id(), &result)
                        .await;
                }
                ChatEvent::MetadataChanged => self.metadata_dirty = true,
                _ => {}
            }
        }

        if self.metadata_dirty
            && should_snapshot(self.last_snapshot, Instant::now(), SNAPSHOT_INTERVAL)
        {
            self.write_snapshot().await;
        }
    }

    async fn write_snapshot(&mut self) {
        if let Err(error) = self
            .store
            .save_chat_metadata(&self.project_root, self.chat.id(), &self.chat.metadata)
            .await
        {
            tracing::warn!(%error, "metadata snapshot failed; will retry on next change");
            return;
        }
        self.last_snapshot = Some(Instant::now());
        self.metadata_dirty = false;
    }
}
