use crate::model::{AgentStatus, ConversationId, ToolCallId};

/// Typed change notifications emitted by the message handler.
///
/// Each handled message yields one batch of events describing every mutation
/// it made to the chat, so observers refresh once per logically atomic
/// change instead of once per field write.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    /// A new entry was attached to a conversation (it may still be
    /// streaming and grow in place).
    EntryAppended {
        conversation: ConversationId,
        index: usize,
    },

    /// An existing entry was mutated in place.
    EntryUpdated {
        conversation: ConversationId,
        index: usize,
    },

    /// An entry reached its final content and should be appended to the
    /// durable log.
    EntryFinalized {
        conversation: ConversationId,
        index: usize,
    },

    /// A tool result was paired into the invocation at `index`.
    ToolResultPaired {
        conversation: ConversationId,
        index: usize,
        call_id: ToolCallId,
    },

    /// A `Task` invocation spawned a subagent conversation.
    AgentSpawned {
        call_id: ToolCallId,
        conversation: ConversationId,
    },

    /// A subagent reached a new (terminal) status.
    AgentStatusChanged {
        call_id: ToolCallId,
        status: AgentStatus,
    },

    /// The backend started or finished compacting its context.
    CompactingChanged { active: bool },

    /// Usage, context window, or model metadata changed; callers snapshot
    /// it on a debounced schedule.
    MetadataChanged,
}
