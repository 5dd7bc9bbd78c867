//! Append-only history log, one line-delimited JSON file per chat.
//!
//! Appends to the same path are serialized through a per-file queue so
//! concurrent producers can never interleave bytes mid-line; a failed write
//! is logged and the queue keeps draining. Loading tolerates torn writes:
//! bytes decode with replacement, each line parses independently, and an
//! unparseable line is skipped and counted rather than aborting the load.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot, Mutex};

use crate::error::StoreError;
use crate::model::{
    AutoCompactionEntry, ContextSummaryEntry, Entry, SystemNotificationEntry, TextEntry, TextKind,
    ToolCallId, ToolInvocationEntry, ToolName, ToolResultEntry, UserMessageEntry,
};

// ============================================================================
// Line codec
// ============================================================================

/// On-disk shape of one history line, discriminated by `type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum HistoryLine {
    User {
        at: DateTime<Utc>,
        text: String,
        #[serde(default)]
        context_summary: bool,
    },
    Assistant {
        at: DateTime<Utc>,
        text: String,
        #[serde(default)]
        thinking: bool,
        #[serde(default)]
        model: Option<String>,
    },
    ToolUse {
        at: DateTime<Utc>,
        name: ToolName,
        call_id: ToolCallId,
        #[serde(default)]
        input: Map<String, Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(default)]
        is_error: bool,
        #[serde(default)]
        model: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        raw: Vec<Value>,
    },
    ToolResult {
        at: DateTime<Utc>,
        call_id: ToolCallId,
        result: Value,
        #[serde(default)]
        is_error: bool,
    },
    System {
        at: DateTime<Utc>,
        #[serde(flatten)]
        payload: SystemLine,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "subtype", rename_all = "snake_case")]
enum SystemLine {
    Notification { text: String },
    Compaction { pre_tokens: u64, is_manual: bool },
}

impl HistoryLine {
    fn from_entry(entry: &Entry) -> Option<Self> {
        match entry {
            Entry::Text(e) => Some(HistoryLine::Assistant {
                at: e.at,
                text: e.text.clone(),
                thinking: e.kind == TextKind::Thinking,
                model: e.model.clone(),
            }),
            Entry::ToolInvocation(e) => Some(HistoryLine::ToolUse {
                at: e.at,
                name: e.name.clone(),
                call_id: e.call_id.clone(),
                input: e.input.clone(),
                result: e.result.clone(),
                is_error: e.is_error,
                model: e.model.clone(),
                raw: e.raw.clone(),
            }),
            Entry::ToolResult(e) => Some(HistoryLine::ToolResult {
                at: e.at,
                call_id: e.call_id.clone(),
                result: e.result.clone(),
                is_error: e.is_error,
            }),
            Entry::ContextSummary(e) => Some(HistoryLine::User {
                at: e.at,
                text: e.text.clone(),
                context_summary: true,
            }),
            Entry::UserMessage(e) => Some(HistoryLine::User {
                at: e.at,
                text: e.text.clone(),
                context_summary: false,
            }),
            Entry::AutoCompaction(e) => Some(HistoryLine::System {
                at: e.at,
                payload: SystemLine::Compaction {
                    pre_tokens: e.pre_tokens,
                    is_manual: e.is_manual,
                },
            }),
            Entry::SystemNotification(e) => Some(HistoryLine::System {
                at: e.at,
                payload: SystemLine::Notification {
                    text: e.text.clone(),
                },
            }),
            Entry::Unknown(_) => None,
        }
    }

    fn into_entry(self) -> Entry {
        match self {
            HistoryLine::User {
                at,
                text,
                context_summary,
            } => {
                if context_summary {
                    Entry::ContextSummary(ContextSummaryEntry { text, at })
                } else {
                    Entry::UserMessage(UserMessageEntry { text, at })
                }
            }
            HistoryLine::Assistant {
                at,
                text,
                thinking,
                model,
            } => Entry::Text(TextEntry {
                kind: if thinking {
                    TextKind::Thinking
                } else {
                    TextKind::Text
                },
                text,
                model,
                is_streaming: false,
                at,
            }),
            HistoryLine::ToolUse {
                at,
                name,
                call_id,
                input,
                result,
                is_error,
                model,
                raw,
            } => Entry::ToolInvocation(ToolInvocationEntry {
                name,
                call_id,
                input,
                result,
                is_error,
                model,
                raw,
                is_streaming: false,
                at,
            }),
            HistoryLine::ToolResult {
                at,
                call_id,
                result,
                is_error,
            } => Entry::ToolResult(ToolResultEntry {
                call_id,
                result,
                is_error,
                at,
            }),
            HistoryLine::System { at, payload } => match payload {
                SystemLine::Notification { text } => {
                    Entry::SystemNotification(SystemNotificationEntry { text, at })
                }
                SystemLine::Compaction {
                    pre_tokens,
                    is_manual,
                } => Entry::AutoCompaction(AutoCompactionEntry {
                    pre_tokens,
                    is_manual,
                    at,
                }),
            },
        }
    }
}

/// Serialize one entry to its history line (without the trailing newline).
/// Unknown entries round-trip as their original raw payload.
pub fn encode_entry(entry: &Entry) -> Result<String, serde_json::Error> {
    match HistoryLine::from_entry(entry) {
        Some(line) => serde_json::to_string(&line),
        None => match entry {
            Entry::Unknown(unknown) => serde_json::to_string(&unknown.raw),
            // from_entry covers every other variant
            _ => unreachable!("entry without a history line shape"),
        },
    }
}

/// Reconstruct one entry from a parsed history line. A recognized `type`
/// whose payload does not match its shape degrades to an Unknown entry so
/// it stays visible instead of being dropped.
pub fn decode_value(value: Value) -> Entry {
    let tag = value
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    let known = matches!(
        tag.as_str(),
        "user" | "assistant" | "tool_use" | "tool_result" | "system"
    );
    if known {
        if let Ok(line) = HistoryLine::deserialize(&value) {
            return line.into_entry();
        }
    }
    Entry::unknown(tag, value)
}

// ============================================================================
// Load
// ============================================================================

/// Result of loading one chat's history.
#[derive(Debug, Default)]
pub struct LoadedHistory {
    pub entries: Vec<Entry>,
    /// Lines that were not valid JSON (torn writes), skipped during load.
    pub skipped: usize,
}

/// Load and reconstruct one chat's history.
///
/// A missing file is an empty history. Corrupt bytes decode with
/// replacement, unparseable lines are skipped and counted, and persisted
/// tool results are merged into their invocations so the returned list
/// matches what the live handler would have produced.
pub async fn load_history(path: &Path) -> Result<LoadedHistory, StoreError> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(LoadedHistory::default())
        }
        Err(e) => return Err(StoreError::io(path, e)),
    };
    let content = String::from_utf8_lossy(&bytes);

    let mut entries = Vec::new();
    let mut skipped = 0usize;
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(trimmed) {
            Ok(value) => entries.push(decode_value(value)),
            Err(_) => skipped += 1,
        }
    }
    if skipped > 0 {
        tracing::warn!(
            path = %path.display(),
            skipped,
            "skipped unparseable history lines"
        );
    }

    Ok(LoadedHistory {
        entries: merge_tool_results(entries),
        skipped,
    })
}

/// Merge standalone tool results into their invocations by call id and drop
/// them from the list. Pairing is an intrinsic property of an invocation,
/// not a separate record; the last result for a call id wins, matching live
/// pairing semantics. Results with no matching invocation are dropped.
fn merge_tool_results(entries: Vec<Entry>) -> Vec<Entry> {
    let mut results: HashMap<ToolCallId, (Value, bool)> = HashMap::new();
    for entry in &entries {
        if let Entry::ToolResult(result) = entry {
            results.insert(
                result.call_id.clone(),
                (result.result.clone(), result.is_error),
            );
        }
    }

    entries
        .into_iter()
        .filter_map(|entry| match entry {
            Entry::ToolResult(_) => None,
            Entry::ToolInvocation(mut inv) => {
                if let Some((result, is_error)) = results.remove(&inv.call_id) {
                    inv.set_result(result, is_error);
                }
                Some(Entry::ToolInvocation(inv))
            }
            other => Some(other),
        })
        .collect()
}

// ============================================================================
// Write queue
// ============================================================================

struct WriteJob {
    /// Bytes to append, or `None` for a flush marker.
    payload: Option<Vec<u8>>,
    ack: oneshot::Sender<bool>,
}

/// Resolves once the corresponding write reached disk (true) or failed.
#[derive(Debug)]
pub struct AppendReceipt {
    rx: oneshot::Receiver<bool>,
}

impl AppendReceipt {
    pub async fn done(self) -> bool {
        self.rx.await.unwrap_or(false)
    }
}

/// Serializes appends per file path.
///
/// Each path gets its own queue draining in FIFO order, so appends from
/// concurrent producers land whole-line and in call order, and chats never
/// contend with each other's queues.
#[derive(Debug, Default)]
pub struct HistoryWriter {
    queues: Mutex<HashMap<PathBuf, mpsc::UnboundedSender<WriteJob>>>,
}

impl HistoryWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue one entry for append. Encoding failures resolve the receipt
    /// immediately; write failures are logged by the queue and the chain
    /// continues for subsequent appends.
    pub async fn append(&self, path: &Path, entry: &Entry) -> AppendReceipt {
        let (ack_tx, ack_rx) = oneshot::channel();
        match encode_entry(entry) {
            Ok(line) => {
                let mut bytes = line.into_bytes();
                bytes.push(b'\n');
                self.enqueue(
                    path,
                    WriteJob {
                        payload: Some(bytes),
                        ack: ack_tx,
                    },
                )
                .await;
            }
            Err(error) => {
                tracing::warn!(%error, "failed to encode history entry");
                let _ = ack_tx.send(false);
            }
        }
        AppendReceipt { rx: ack_rx }
    }

    /// Wait until every append enqueued before this call has hit disk.
    pub async fn flush(&self, path: &Path) {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.enqueue(
            path,
            WriteJob {
                payload: None,
                ack: ack_tx,
            },
        )
        .await;
        let _ = ack_rx.await;
    }

    async fn enqueue(&self, path: &Path, job: WriteJob) {
        let mut queues = self.queues.lock().await;
        let mut job = job;
        if let Some(tx) = queues.get(path) {
            match tx.send(job) {
                Ok(()) => return,
                // Queue task is gone; respawn below.
                Err(mpsc::error::SendError(returned)) => job = returned,
            }
        }
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(drain_queue(path.to_path_buf(), rx));
        let _ = tx.send(job);
        queues.insert(path.to_path_buf(), tx);
    }
}

async fn drain_queue(path: PathBuf, mut rx: mpsc::UnboundedReceiver<WriteJob>) {
    while let Some(job) = rx.recv().await {
        let ok = match &job.payload {
            Some(bytes) => match append_bytes(&path, bytes).await {
                Ok(()) => true,
                Err(error) => {
                    tracing::warn!(
                        path = %path.display(),
                        %error,
                        "history append failed; continuing"
                    );
                    false
                }
            },
            None => true,
        };
        let _ = job.ack.send(ok);
    }
}

async fn append_bytes(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(bytes).await?;
    file.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn encode_decode_round_trip_each_variant() {
        let mut input = Map::new();
        input.insert("command".into(), json!("ls"));
        let mut invocation = Entry::tool_invocation("Bash", "t1", input, Some("opus".into()));
        invocation
            .as_tool_invocation_mut()
            .unwrap()
            .set_result(json!("ok"), false);

        let entries = vec![
            Entry::user_message("run the tests"),
            Entry::text(TextKind::Text, "on it", Some("opus".into())),
            Entry::text(TextKind::Thinking, "hmm", None),
            invocation,
            Entry::context_summary("earlier we discussed tests"),
            Entry::auto_compaction(123_456, true),
            Entry::system_notification("session resumed"),
            Entry::unknown("telemetry", json!({"type": "telemetry", "n": 1})),
        ];

        for entry in entries {
            let line = encode_entry(&entry).unwrap();
            let value: Value = serde_json::from_str(&line).unwrap();
            let decoded = decode_value(value);
            assert_eq!(decoded, entry);
        }
    }

    #[test]
    fn disk_type_tags_match_wire_vocabulary() {
        let tag = |entry: &Entry| -> String {
            let line = encode_entry(entry).unwrap();
            let value: Value = serde_json::from_str(&line).unwrap();
            value["type"].as_str().unwrap().to_string()
        };

        assert_eq!(tag(&Entry::user_message("hi")), "user");
        assert_eq!(tag(&Entry::context_summary("sum")), "user");
        assert_eq!(tag(&Entry::text(TextKind::Text, "a", None)), "assistant");
        assert_eq!(
            tag(&Entry::tool_invocation("Bash", "t1", Map::new(), None)),
            "tool_use"
        );
        assert_eq!(tag(&Entry::system_notification("n")), "system");
        assert_eq!(tag(&Entry::auto_compaction(1, false)), "system");
    }

    #[test]
    fn malformed_known_tag_decodes_to_unknown_entry() {
        let value = json!({"type": "assistant", "bogus": true});
        match decode_value(value.clone()) {
            Entry::Unknown(unknown) => {
                assert_eq!(unknown.type_tag, "assistant");
                assert_eq!(unknown.raw, value);
            }
            other => panic!("expected unknown, got {:?}", other),
        }
    }

    #[test]
    fn merge_pairs_result_into_invocation() {
        let invocation = Entry::tool_invocation("Bash", "t1", Map::new(), None);
        let result = Entry::ToolResult(ToolResultEntry {
            call_id: ToolCallId::new("t1"),
            result: json!("ok"),
            is_error: false,
            at: Utc::now(),
        });

        let merged = merge_tool_results(vec![invocation, result]);
        assert_eq!(merged.len(), 1);
        let inv = merged[0].as_tool_invocation().unwrap();
        assert_eq!(inv.result, Some(json!("ok")));
        assert!(!inv.is_error);
    }

    #[test]
    fn merge_drops_orphan_results() {
        let result = Entry::ToolResult(ToolResultEntry {
            call_id: ToolCallId::new("orphan"),
            result: json!("x"),
            is_error: true,
            at: Utc::now(),
        });
        assert!(merge_tool_results(vec![result]).is_empty());
    }

    #[test]
    fn merge_last_result_wins() {
        let invocation = Entry::tool_invocation("Bash", "t1", Map::new(), None);
        let first = Entry::ToolResult(ToolResultEntry {
            call_id: ToolCallId::new("t1"),
            result: json!("first"),
            is_error: false,
            at: Utc::now(),
        });
        let second = Entry::ToolResult(ToolResultEntry {
            call_id: ToolCallId::new("t1"),
            result: json!("second"),
            is_error: true,
            at: Utc::now(),
        });

        let merged = merge_tool_results(vec![invocation, first, second]);
        let inv = merged[0].as_tool_invocation().unwrap();
        assert_eq!(inv.result, Some(json!("second")));
        assert!(inv.is_error);
    }

    #[tokio::test]
    async fn load_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let loaded = load_history(&dir.path().join("nope.jsonl")).await.unwrap();
        assert!(loaded.entries.is_empty());
        assert_eq!(loaded.skipped, 0);
    }

    #[tokio::test]
    async fn append_then_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("history.jsonl");
        let writer = HistoryWriter::new();

        let entries = vec![
            Entry::user_message("hello"),
            Entry::text(TextKind::Text, "hi there", Some("opus".into())),
        ];
        for entry in &entries {
            assert!(writer.append(&path, entry).await.done().await);
        }

        let loaded = load_history(&path).await.unwrap();
        assert_eq!(loaded.entries, entries);
    }

    #[tokio::test]
    async fn corrupted_line_is_skipped_and_counted() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("history.jsonl");
        let writer = HistoryWriter::new();

        writer.append(&path, &Entry::user_message("one")).await.done().await;
        writer.append(&path, &Entry::user_message("two")).await.done().await;

        // Simulate a torn write between two valid lines.
        let mut content = std::fs::read_to_string(&path).unwrap();
        content.push_str("{\"type\":\"assist\n");
        std::fs::write(&path, content).unwrap();
        writer.append(&path, &Entry::user_message("three")).await.done().await;

        let loaded = load_history(&path).await.unwrap();
        assert_eq!(loaded.entries.len(), 3);
        assert_eq!(loaded.skipped, 1);
    }

    #[tokio::test]
    async fn invalid_utf8_bytes_do_not_abort_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("history.jsonl");
        let writer = HistoryWriter::new();
        writer.append(&path, &Entry::user_message("fine")).await.done().await;

        // Raw invalid bytes on their own line: decoded with replacement,
        // then skipped as unparseable.
        let mut bytes = std::fs::read(&path).unwrap();
        bytes.extend_from_slice(&[0xFF, 0xFE, 0xFD, b'\n']);
        std::fs::write(&path, bytes).unwrap();

        let loaded = load_history(&path).await.unwrap();
        assert_eq!(loaded.entries.len(), 1);
        assert_eq!(loaded.skipped, 1);
    }

    #[tokio::test]
    async fn concurrent_appends_never_interleave() {
        use std::sync::Arc;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("history.jsonl");
        let writer = Arc::new(HistoryWriter::new());

        let mut handles = Vec::new();
        for i in 0..64 {
            let writer = writer.clone();
            let path = path.clone();
            handles.push(tokio::spawn(async move {
                let entry = Entry::user_message(format!("message {i} {}", "x".repeat(512)));
                writer.append(&path, &entry).await.done().await
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap());
        }

        let loaded = load_history(&path).await.unwrap();
        assert_eq!(loaded.skipped, 0);
        assert_eq!(loaded.entries.len(), 64);
    }

    #[tokio::test]
    async fn appends_to_same_path_are_fifo() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("history.jsonl");
        let writer = HistoryWriter::new();

        // Issue without awaiting in between; receipts awaited after.
        let mut receipts = Vec::new();
        for i in 0..10 {
            receipts.push(writer.append(&path, &Entry::user_message(format!("{i}"))).await);
        }
        for receipt in receipts {
            assert!(receipt.done().await);
        }

        let loaded = load_history(&path).await.unwrap();
        let texts: Vec<String> = loaded
            .entries
            .iter()
            .map(|e| match e {
                Entry::UserMessage(m) => m.text.clone(),
                other => panic!("unexpected entry {:?}", other),
            })
            .collect();
        let expected: Vec<String> = (0..10).map(|i| i.to_string()).collect();
        assert_eq!(texts, expected);
    }

    #[tokio::test]
    async fn flush_waits_for_prior_appends() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("history.jsonl");
        let writer = HistoryWriter::new();

        for i in 0..5 {
            // Receipts intentionally dropped.
            let _ = writer.append(&path, &Entry::user_message(format!("{i}"))).await;
        }
        writer.flush(&path).await;

        let loaded = load_history(&path).await.unwrap();
        assert_eq!(loaded.entries.len(), 5);
    }
}
