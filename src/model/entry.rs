use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::ids::{ToolCallId, ToolName};

/// Kind of assistant-produced text content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextKind {
    Text,
    Thinking,
}

/// One unit of conversation content.
///
/// Entries are appended to a [`Conversation`](super::Conversation) and never
/// removed or reordered. While `is_streaming` is true an entry may be mutated
/// in place by delta events; once finalized it is immutable except for
/// result pairing on tool invocations.
#[derive(Debug, Clone, PartialEq)]
pub enum Entry {
    Text(TextEntry),
    ToolInvocation(ToolInvocationEntry),
    /// Exists only transiently on disk; merged into its invocation at load
    /// time and never retained in a live conversation.
    ToolResult(ToolResultEntry),
    ContextSummary(ContextSummaryEntry),
    AutoCompaction(AutoCompactionEntry),
    SystemNotification(SystemNotificationEntry),
    UserMessage(UserMessageEntry),
    Unknown(UnknownEntry),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextEntry {
    pub kind: TextKind,
    pub text: String,
    pub model: Option<String>,
    pub is_streaming: bool,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocationEntry {
    pub name: ToolName,
    pub call_id: ToolCallId,
    pub input: Map<String, Value>,
    pub result: Option<Value>,
    pub is_error: bool,
    pub model: Option<String>,
    /// Raw protocol messages that shaped this invocation, kept for diagnosis.
    pub raw: Vec<Value>,
    pub is_streaming: bool,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolResultEntry {
    pub call_id: ToolCallId,
    pub result: Value,
    pub is_error: bool,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContextSummaryEntry {
    pub text: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AutoCompactionEntry {
    pub pre_tokens: u64,
    pub is_manual: bool,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SystemNotificationEntry {
    pub text: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UserMessageEntry {
    pub text: String,
    pub at: DateTime<Utc>,
}

/// Unrecognized message type, preserved verbatim so new upstream message
/// kinds stay visible instead of being silently dropped.
#[derive(Debug, Clone, PartialEq)]
pub struct UnknownEntry {
    pub type_tag: String,
    pub raw: Value,
}

impl Entry {
    /// New streaming text entry, attached before any content has arrived.
    pub fn streaming_text(kind: TextKind) -> Self {
        Entry::Text(TextEntry {
            kind,
            text: String::new(),
            model: None,
            is_streaming: true,
            at: Utc::now(),
        })
    }

    /// New finalized text entry from an authoritative content block.
    pub fn text(kind: TextKind, text: impl Into<String>, model: Option<String>) -> Self {
        Entry::Text(TextEntry {
            kind,
            text: text.into(),
            model,
            is_streaming: false,
            at: Utc::now(),
        })
    }

    /// New streaming tool invocation; input accumulates as JSON fragments
    /// and is parsed when the block stops.
    pub fn streaming_tool(name: impl Into<ToolName>, call_id: impl Into<ToolCallId>) -> Self {
        Entry::ToolInvocation(ToolInvocationEntry {
            name: name.into(),
            call_id: call_id.into(),
            input: Map::new(),
            result: None,
            is_error: false,
            model: None,
            raw: Vec::new(),
            is_streaming: true,
            at: Utc::now(),
        })
    }

    /// New finalized tool invocation from an authoritative content block.
    pub fn tool_invocation(
        name: impl Into<ToolName>,
        call_id: impl Into<ToolCallId>,
        input: Map<String, Value>,
        model: Option<String>,
    ) -> Self {
        Entry::ToolInvocation(ToolInvocationEntry {
            name: name.into(),
            call_id: call_id.into(),
            input,
            result: None,
            is_error: false,
            model,
            raw: Vec::new(),
            is_streaming: false,
            at: Utc::now(),
        })
    }

    pub fn context_summary(text: impl Into<String>) -> Self {
        Entry::ContextSummary(ContextSummaryEntry {
            text: text.into(),
            at: Utc::now(),
        })
    }

    pub fn auto_compaction(pre_tokens: u64, is_manual: bool) -> Self {
        Entry::AutoCompaction(AutoCompactionEntry {
            pre_tokens,
            is_manual,
            at: Utc::now(),
        })
    }

    pub fn system_notification(text: impl Into<String>) -> Self {
        Entry::SystemNotification(SystemNotificationEntry {
            text: text.into(),
            at: Utc::now(),
        })
    }

    pub fn user_message(text: impl Into<String>) -> Self {
        Entry::UserMessage(UserMessageEntry {
            text: text.into(),
            at: Utc::now(),
        })
    }

    pub fn unknown(type_tag: impl Into<String>, raw: Value) -> Self {
        Entry::Unknown(UnknownEntry {
            type_tag: type_tag.into(),
            raw,
        })
    }

    /// Whether this entry is still under incremental construction.
    pub fn is_streaming(&self) -> bool {
        match self {
            Entry::Text(e) => e.is_streaming,
            Entry::ToolInvocation(e) => e.is_streaming,
            _ => false,
        }
    }

    /// Mark the entry as no longer streaming. No-op for variants that are
    /// never streamed.
    pub fn finalize(&mut self) {
        match self {
            Entry::Text(e) => e.is_streaming = false,
            Entry::ToolInvocation(e) => e.is_streaming = false,
            _ => {}
        }
    }

    pub fn as_tool_invocation(&self) -> Option<&ToolInvocationEntry> {
        match self {
            Entry::ToolInvocation(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_tool_invocation_mut(&mut self) -> Option<&mut ToolInvocationEntry> {
        match self {
            Entry::ToolInvocation(e) => Some(e),
            _ => None,
        }
    }
}

impl ToolInvocationEntry {
    /// Attach the paired result. Overwrites any previous result so a
    /// re-delivered result wins, matching load-time merge semantics.
    pub fn set_result(&mut self, result: Value, is_error: bool) {
        self.result = Some(result);
        self.is_error = is_error;
    }
}
