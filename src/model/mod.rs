pub mod conversation;
pub mod entry;
pub mod ids;
pub mod metadata;

pub use conversation::{Agent, AgentStatus, Chat, Conversation};
pub use entry::{
    AutoCompactionEntry, ContextSummaryEntry, Entry, SystemNotificationEntry, TextEntry, TextKind,
    ToolInvocationEntry, ToolResultEntry, UnknownEntry, UserMessageEntry,
};
pub use ids::{ChatId, ConversationId, ToolCallId, ToolName};
pub use metadata::{ChatMetadata, ContextWindow, TokenUsage, UsageTotals, DEFAULT_MAX_TOKENS};
