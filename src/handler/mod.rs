//! Message dispatcher and tool pairing.
//!
//! `ChatHandler::handle` is the single entry point for inbound messages: it
//! classifies one JSON object, mutates the chat in place, and returns the
//! batch of change events for that message. Nothing in here is fatal —
//! malformed or unknown input degrades to a visible entry or a no-op so the
//! conversation stream keeps moving.

pub mod stream;

pub use stream::{BlockClosed, StreamAssembler, TaskSpawn};

use std::collections::HashMap;

use serde_json::Value;

use crate::event::ChatEvent;
use crate::model::{AgentStatus, Chat, ConversationId, Entry, TextKind, ToolCallId};
use crate::protocol::{
    tool_input_map, AssistantMessage, ContentBlock, Inbound, ResultMessage, StreamEvent,
    SystemMessage, UserMessage,
};

/// Pending permission requests, looked up by tool call id.
///
/// Implemented outside this core; a paired tool result clears any pending
/// request for its call id so an SDK-side permission timeout cannot leave a
/// stale prompt behind.
pub trait PermissionRegistry: Send {
    /// Remove a pending request for this call, returning whether one existed.
    fn remove_pending(&mut self, call_id: &ToolCallId) -> bool;
}

/// Default registry that tracks no pending requests.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPendingPermissions;

impl PermissionRegistry for NoPendingPermissions {
    fn remove_pending(&mut self, _call_id: &ToolCallId) -> bool {
        false
    }
}

/// Per-chat message handler: stream assembly, dispatch, and tool pairing.
///
/// Registries are private to one handler instance and never shared across
/// chats. Disposing the handler stops consumption and abandons outstanding
/// correlations without error.
pub struct ChatHandler {
    stream: StreamAssembler,
    /// Tool call id → (conversation, entry index) of the invocation.
    pairing: HashMap<ToolCallId, (ConversationId, usize)>,
    permissions: Box<dyn PermissionRegistry>,
    /// Set by `compact_boundary`: the next genuine user message is a
    /// context summary.
    summary_armed: bool,
    /// Whether the assistant produced output this turn; consulted and reset
    /// by a parentless `result` message.
    assistant_spoke: bool,
    disposed: bool,
}

impl Default for ChatHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatHandler {
    pub fn new() -> Self {
        Self::with_permissions(Box::new(NoPendingPermissions))
    }

    pub fn with_permissions(permissions: Box<dyn PermissionRegistry>) -> Self {
        Self {
            stream: StreamAssembler::new(),
            pairing: HashMap::new(),
            permissions,
            summary_armed: false,
            assistant_spoke: false,
            disposed: false,
        }
    }

    /// Handle one inbound message and return the change events it produced.
    pub fn handle(&mut self, chat: &mut Chat, raw: Value) -> Vec<ChatEvent> {
        if self.disposed {
            return Vec::new();
        }

        let mut events = Vec::new();
        match Inbound::decode(&raw) {
            Inbound::System(msg) => self.apply_system(chat, &msg, &mut events),
            Inbound::Assistant(msg) => self.apply_assistant(chat, &msg, &raw, &mut events),
            Inbound::User(msg) => self.apply_user(chat, &msg, &mut events),
            Inbound::Result(msg) => self.apply_result(chat, &msg, &mut events),
            Inbound::StreamEvent(msg) => {
                let parent = msg.parent_tool_use_id.clone();
                self.apply_stream(chat, parent.as_ref(), &msg.event, &mut events);
            }
            Inbound::Unknown { type_tag } => {
                tracing::debug!(%type_tag, "wrapping unknown message type");
                let parent = raw
                    .get("parent_tool_use_id")
                    .and_then(Value::as_str)
                    .filter(|s| !s.is_empty())
                    .map(ToolCallId::new);
                let conversation = chat.resolve_target(parent.as_ref());
                let index = chat
                    .conversation_mut(&conversation)
                    .push(Entry::unknown(type_tag, raw));
                events.push(ChatEvent::EntryAppended {
                    conversation: conversation.clone(),
                    index,
                });
                events.push(ChatEvent::EntryFinalized {
                    conversation,
                    index,
                });
            }
        }
        events
    }

    /// Drop all pairing state. Pending results for forgotten invocations
    /// become no-ops.
    pub fn clear_pairing(&mut self) {
        self.pairing.clear();
    }

    /// Stop consuming messages and abandon outstanding correlations. On-disk
    /// state is left exactly as already flushed.
    pub fn dispose(&mut self) {
        self.disposed = true;
        self.pairing.clear();
        self.stream.clear();
    }

    fn apply_system(&mut self, chat: &mut Chat, msg: &SystemMessage, events: &mut Vec<ChatEvent>) {
        match msg.subtype.as_str() {
            "init" => {}
            "compact_boundary" => {
                let (pre_tokens, is_manual) = msg
                    .compact_metadata
                    .as_ref()
                    .map(|m| (m.pre_tokens, m.trigger == "manual"))
                    .unwrap_or((0, false));
                let conversation = chat.resolve_target(msg.parent_tool_use_id.as_ref());
                let index = chat
                    .conversation_mut(&conversation)
                    .push(Entry::auto_compaction(pre_tokens, is_manual));
                self.summary_armed = true;
                events.push(ChatEvent::EntryAppended {
                    conversation: conversation.clone(),
                    index,
                });
                events.push(ChatEvent::EntryFinalized {
                    conversation,
                    index,
                });
            }
            "status" => {
                let active = msg.status.as_deref() == Some("compacting");
                if chat.is_compacting != active {
                    chat.is_compacting = active;
                    events.push(ChatEvent::CompactingChanged { active });
                }
            }
            other => {
                tracing::debug!(subtype = other, "ignoring unhandled system message");
            }
        }
    }

    fn apply_stream(
        &mut self,
        chat: &mut Chat,
        parent: Option<&ToolCallId>,
        event: &Value,
        events: &mut Vec<ChatEvent>,
    ) {
        let Some(event) = StreamEvent::decode(event) else {
            tracing::debug!("ignoring unconsumed stream sub-event");
            return;
        };
        let conversation = chat.resolve_target(parent);

        match event {
            StreamEvent::MessageStart => self.stream.message_start(&conversation),
            StreamEvent::ContentBlockStart {
                index,
                content_block,
            } => {
                if let Some(entry_index) =
                    self.stream
                        .block_start(chat, &conversation, index, &content_block)
                {
                    if let Some(inv) = chat
                        .conversation(&conversation)
                        .entry(entry_index)
                        .and_then(Entry::as_tool_invocation)
                    {
                        self.pairing
                            .insert(inv.call_id.clone(), (conversation.clone(), entry_index));
                    }
                    events.push(ChatEvent::EntryAppended {
                        conversation,
                        index: entry_index,
                    });
                }
            }
            StreamEvent::ContentBlockDelta { index, delta } => {
                if let Some(entry_index) =
                    self.stream.block_delta(chat, &conversation, index, &delta)
                {
                    events.push(ChatEvent::EntryUpdated {
                        conversation,
                        index: entry_index,
                    });
                }
            }
            StreamEvent::ContentBlockStop { index } => {
                if let Some(closed) = self.stream.block_stop(chat, &conversation, index) {
                    events.push(ChatEvent::EntryUpdated {
                        conversation,
                        index: closed.index,
                    });
                    if let Some(task) = closed.task {
                        self.spawn_agent(chat, task, events);
                    }
                }
            }
            StreamEvent::MessageStop => self.stream.message_stop(&conversation),
        }
    }

    fn apply_assistant(
        &mut self,
        chat: &mut Chat,
        msg: &AssistantMessage,
        raw: &Value,
        events: &mut Vec<ChatEvent>,
    ) {
        self.assistant_spoke = true;

        let conversation = chat.resolve_target(msg.parent_tool_use_id.as_ref());
        chat.metadata
            .observe_assistant(msg.message.model.as_deref(), msg.message.usage.as_ref());
        events.push(ChatEvent::MetadataChanged);

        let model = msg.message.model.clone();
        let retained = self.stream.take_retained(&conversation);
        let blocks: Vec<ContentBlock> = msg
            .message
            .content
            .iter()
            .filter_map(ContentBlock::decode)
            .collect();

        for (pos, block) in blocks.iter().enumerate() {
            match retained.get(pos) {
                Some(&entry_index) => self.finalize_retained(
                    chat,
                    &conversation,
                    entry_index,
                    pos,
                    block,
                    model.clone(),
                    raw,
                    events,
                ),
                None => self.append_authoritative(
                    chat,
                    &conversation,
                    pos,
                    block,
                    model.clone(),
                    raw,
                    events,
                ),
            }
        }
        // Retained entries beyond the authoritative block count are left
        // as-is; their references were dropped with take_retained.
    }

    /// Update a retained streamed entry in place from its authoritative
    /// block. A mismatched shape overwrites the slot with a fresh entry.
    #[allow(clippy::too_many_arguments)]
    fn finalize_retained(
        &mut self,
        chat: &mut Chat,
        conversation: &ConversationId,
        entry_index: usize,
        pos: usize,
        block: &ContentBlock,
        model: Option<String>,
        raw: &Value,
        events: &mut Vec<ChatEvent>,
    ) {
        let mut task = None;
        let matched = match chat.conversation_mut(conversation).entry_mut(entry_index) {
            Some(Entry::Text(entry)) if matches!(block, ContentBlock::Text { .. }) => {
                if entry.kind != TextKind::Text {
                    false
                } else {
                    if let ContentBlock::Text { text } = block {
                        entry.text = text.clone();
                    }
                    entry.model = model.clone();
                    entry.is_streaming = false;
                    true
                }
            }
            Some(Entry::Text(entry)) if matches!(block, ContentBlock::Thinking { .. }) => {
                if entry.kind != TextKind::Thinking {
                    false
                } else {
                    if let ContentBlock::Thinking { thinking } = block {
                        entry.text = thinking.clone();
                    }
                    entry.model = model.clone();
                    entry.is_streaming = false;
                    true
                }
            }
            Some(Entry::ToolInvocation(inv)) => match block {
                ContentBlock::ToolUse { id, name, input }
                    if inv.call_id.as_str() == id.as_str() =>
                {
                    inv.name = name.as_str().into();
                    inv.input = tool_input_map(input);
                    inv.model = model.clone();
                    inv.raw.push(raw.clone());
                    inv.is_streaming = false;
                    if name.as_str() == "Task" {
                        task = Some(TaskSpawn {
                            call_id: inv.call_id.clone(),
                            label: stream::task_label(&inv.input),
                        });
                    }
                    true
                }
                _ => false,
            },
            _ => false,
        };

        if matched {
            if let Some(task) = task {
                self.spawn_agent(chat, task, events);
            }
            events.push(ChatEvent::EntryUpdated {
                conversation: conversation.clone(),
                index: entry_index,
            });
            events.push(ChatEvent::EntryFinalized {
                conversation: conversation.clone(),
                index: entry_index,
            });
            return;
        }

        // Shape mismatch: the authoritative block wins the slot.
        let Some(entry) = entry_from_block(block, pos, model, raw) else {
            return;
        };
        if let Some(slot) = chat.conversation_mut(conversation).entry_mut(entry_index) {
            *slot = entry;
        }
        self.index_invocation(chat, conversation, entry_index, events);
        events.push(ChatEvent::EntryUpdated {
            conversation: conversation.clone(),
            index: entry_index,
        });
        events.push(ChatEvent::EntryFinalized {
            conversation: conversation.clone(),
            index: entry_index,
        });
    }

    /// Append a fresh entry for an authoritative block with no retained
    /// counterpart — the common, non-streaming path.
    fn append_authoritative(
        &mut self,
        chat: &mut Chat,
        conversation: &ConversationId,
        pos: usize,
        block: &ContentBlock,
        model: Option<String>,
        raw: &Value,
        events: &mut Vec<ChatEvent>,
    ) {
        let Some(entry) = entry_from_block(block, pos, model, raw) else {
            return;
        };
        let index = chat.conversation_mut(conversation).push(entry);
        events.push(ChatEvent::EntryAppended {
            conversation: conversation.clone(),
            index,
        });
        self.index_invocation(chat, conversation, index, events);
        events.push(ChatEvent::EntryFinalized {
            conversation: conversation.clone(),
            index,
        });
    }

    /// Register pairing for the invocation at `index` and spawn a subagent
    /// if it is a `Task` call. No-op for non-invocation entries.
    fn index_invocation(
        &mut self,
        chat: &mut Chat,
        conversation: &ConversationId,
        index: usize,
        events: &mut Vec<ChatEvent>,
    ) {
        let Some((call_id, task)) = chat
            .conversation(conversation)
            .entry(index)
            .and_then(Entry::as_tool_invocation)
            .map(|inv| {
                let task = (inv.name.as_str() == "Task").then(|| TaskSpawn {
                    call_id: inv.call_id.clone(),
                    label: stream::task_label(&inv.input),
                });
                (inv.call_id.clone(), task)
            })
        else {
            return;
        };
        self.pairing
            .insert(call_id, (conversation.clone(), index));
        if let Some(task) = task {
            self.spawn_agent(chat, task, events);
        }
    }

    fn apply_user(&mut self, chat: &mut Chat, msg: &UserMessage, events: &mut Vec<ChatEvent>) {
        let blocks = msg.message.content.blocks();
        let tool_results: Vec<&ContentBlock> = blocks
            .iter()
            .filter(|b| matches!(b, ContentBlock::ToolResult { .. }))
            .collect();

        if !tool_results.is_empty() {
            let single = tool_results.len() == 1;
            for block in tool_results {
                let ContentBlock::ToolResult {
                    tool_use_id,
                    content,
                    is_error,
                } = block
                else {
                    continue;
                };
                if tool_use_id.is_empty() {
                    continue;
                }
                let call_id = ToolCallId::new(tool_use_id.clone());
                let payload = if single {
                    msg.tool_use_result
                        .clone()
                        .unwrap_or_else(|| content.clone())
                } else {
                    content.clone()
                };

                if let Some((conv_id, index)) = self.pairing.get(&call_id).cloned() {
                    if let Some(inv) = chat
                        .conversation_mut(&conv_id)
                        .entry_mut(index)
                        .and_then(Entry::as_tool_invocation_mut)
                    {
                        inv.set_result(payload, *is_error);
                        events.push(ChatEvent::EntryUpdated {
                            conversation: conv_id.clone(),
                            index,
                        });
                        events.push(ChatEvent::ToolResultPaired {
                            conversation: conv_id,
                            index,
                            call_id: call_id.clone(),
                        });
                    }
                }
                // Pending permission requests for this call are resolved
                // whether or not the invocation is known (SDK-side
                // permission timeouts deliver results for abandoned calls).
                self.permissions.remove_pending(&call_id);
            }
            return;
        }

        if msg.is_replay {
            // Replays are consumed silently; an armed summary flag survives
            // until a genuine message arrives.
            return;
        }

        if msg.is_synthetic || self.summary_armed {
            self.summary_armed = false;
            let text = msg.message.content.joined_text();
            if !text.is_empty() {
                let conversation = chat.resolve_target(msg.parent_tool_use_id.as_ref());
                let index = chat
                    .conversation_mut(&conversation)
                    .push(Entry::context_summary(text));
                events.push(ChatEvent::EntryAppended {
                    conversation: conversation.clone(),
                    index,
                });
                events.push(ChatEvent::EntryFinalized {
                    conversation,
                    index,
                });
            }
        }
        // Plain user echoes are ignored: the owning layer records the
        // user's prompts itself.
    }

    fn apply_result(&mut self, chat: &mut Chat, msg: &ResultMessage, events: &mut Vec<ChatEvent>) {
        if let Some(parent) = msg.parent_tool_use_id.as_ref() {
            if chat.agent(parent).is_some() {
                let status = agent_status_for(&msg.subtype);
                if chat.transition_agent(parent, status) {
                    events.push(ChatEvent::AgentStatusChanged {
                        call_id: parent.clone(),
                        status,
                    });
                }
                return;
            }
        }

        // Parentless (or unmatched): a top-level banner, but only when the
        // assistant produced no output this turn.
        let spoke = std::mem::replace(&mut self.assistant_spoke, false);
        if !spoke {
            if let Some(text) = msg.result.as_deref().filter(|t| !t.is_empty()) {
                let conversation = chat.primary().id().clone();
                let index = chat
                    .conversation_mut(&conversation)
                    .push(Entry::system_notification(text));
                events.push(ChatEvent::EntryAppended {
                    conversation: conversation.clone(),
                    index,
                });
                events.push(ChatEvent::EntryFinalized {
                    conversation,
                    index,
                });
            }
        }

        if msg.usage.is_some() || msg.total_cost_usd.is_some() {
            chat.metadata
                .observe_result(msg.usage.as_ref(), msg.total_cost_usd);
            events.push(ChatEvent::MetadataChanged);
        }
    }

    fn spawn_agent(&mut self, chat: &mut Chat, spawn: TaskSpawn, events: &mut Vec<ChatEvent>) {
        if let Some(conversation) = chat.register_agent(spawn.call_id.clone(), spawn.label) {
            events.push(ChatEvent::AgentSpawned {
                call_id: spawn.call_id,
                conversation,
            });
        }
    }
}

/// Build a finalized entry from an authoritative content block.
/// `pos` synthesizes a call id for the rare tool_use block without one.
fn entry_from_block(
    block: &ContentBlock,
    pos: usize,
    model: Option<String>,
    raw: &Value,
) -> Option<Entry> {
    match block {
        ContentBlock::Text { text } => Some(Entry::text(TextKind::Text, text.clone(), model)),
        ContentBlock::Thinking { thinking } => {
            Some(Entry::text(TextKind::Thinking, thinking.clone(), model))
        }
        ContentBlock::ToolUse { id, name, input } => {
            let call_id = if id.is_empty() {
                format!("tool-{pos}")
            } else {
                id.clone()
            };
            let mut entry =
                Entry::tool_invocation(name.clone(), call_id, tool_input_map(input), model);
            if let Entry::ToolInvocation(inv) = &mut entry {
                inv.raw.push(raw.clone());
            }
            Some(entry)
        }
        ContentBlock::ToolResult { .. } => None,
    }
}

fn agent_status_for(subtype: &str) -> AgentStatus {
    match subtype {
        "error_max_turns" | "error_tool" | "error_api" | "error_budget" => AgentStatus::Error,
        _ => AgentStatus::Completed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ChatId;
    use serde_json::json;

    fn chat() -> Chat {
        Chat::new(ChatId::new("c1"))
    }

    #[test]
    fn init_message_is_acknowledged_only() {
        let mut chat = chat();
        let mut handler = ChatHandler::new();
        let events = handler.handle(&mut chat, json!({"type": "system", "subtype": "init"}));
        assert!(events.is_empty());
        assert!(chat.primary().is_empty());
    }

    #[test]
    fn status_toggles_compacting_once() {
        let mut chat = chat();
        let mut handler = ChatHandler::new();

        let on = json!({"type": "system", "subtype": "status", "status": "compacting"});
        let events = handler.handle(&mut chat, on.clone());
        assert_eq!(events, vec![ChatEvent::CompactingChanged { active: true }]);
        assert!(chat.is_compacting);

        // Same status again: no event.
        assert!(handler.handle(&mut chat, on).is_empty());

        let off = json!({"type": "system", "subtype": "status", "status": null});
        let events = handler.handle(&mut chat, off);
        assert_eq!(events, vec![ChatEvent::CompactingChanged { active: false }]);
    }

    #[test]
    fn unknown_message_becomes_visible_entry() {
        let mut chat = chat();
        let mut handler = ChatHandler::new();
        let raw = json!({"type": "telemetry", "data": {"k": 1}});
        let events = handler.handle(&mut chat, raw.clone());
        assert_eq!(events.len(), 2);
        match chat.primary().entry(0).unwrap() {
            Entry::Unknown(entry) => {
                assert_eq!(entry.type_tag, "telemetry");
                assert_eq!(entry.raw, raw);
            }
            other => panic!("expected unknown entry, got {:?}", other),
        }
    }

    #[test]
    fn assistant_text_appends_finalized_entry() {
        let mut chat = chat();
        let mut handler = ChatHandler::new();
        let events = handler.handle(
            &mut chat,
            json!({
                "type": "assistant",
                "message": {
                    "model": "claude-sonnet-4-5",
                    "content": [{"type": "text", "text": "hello"}]
                }
            }),
        );

        assert_eq!(chat.primary().len(), 1);
        match chat.primary().entry(0).unwrap() {
            Entry::Text(entry) => {
                assert_eq!(entry.text, "hello");
                assert_eq!(entry.model.as_deref(), Some("claude-sonnet-4-5"));
                assert!(!entry.is_streaming);
            }
            other => panic!("expected text entry, got {:?}", other),
        }
        assert!(events.iter().any(|e| matches!(e, ChatEvent::EntryFinalized { index: 0, .. })));
    }

    #[test]
    fn task_invocation_spawns_agent_and_routes_parent() {
        let mut chat = chat();
        let mut handler = ChatHandler::new();
        handler.handle(
            &mut chat,
            json!({
                "type": "assistant",
                "message": {"content": [
                    {"type": "tool_use", "id": "t1", "name": "Task",
                     "input": {"description": "explore", "prompt": "look around"}}
                ]}
            }),
        );

        let call_id = ToolCallId::new("t1");
        let agent = chat.agent(&call_id).expect("agent registered");
        assert_eq!(agent.status, AgentStatus::Working);
        let sub_conv = agent.conversation_id.clone();
        assert_eq!(chat.subagent(&sub_conv).unwrap().label(), Some("explore"));

        // A message carrying the parent id lands in the subagent conversation.
        handler.handle(
            &mut chat,
            json!({
                "type": "assistant",
                "parent_tool_use_id": "t1",
                "message": {"content": [{"type": "text", "text": "inside"}]}
            }),
        );
        assert_eq!(chat.subagent(&sub_conv).unwrap().len(), 1);
        assert_eq!(chat.primary().len(), 1);
    }

    #[test]
    fn agent_result_subtypes_map_to_status() {
        for (subtype, expected) in [
            ("success", AgentStatus::Completed),
            ("error_max_turns", AgentStatus::Error),
            ("error_tool", AgentStatus::Error),
            ("error_api", AgentStatus::Error),
            ("error_budget", AgentStatus::Error),
            ("something_new", AgentStatus::Completed),
        ] {
            let mut chat = chat();
            let mut handler = ChatHandler::new();
            handler.handle(
                &mut chat,
                json!({
                    "type": "assistant",
                    "message": {"content": [
                        {"type": "tool_use", "id": "t1", "name": "Task", "input": {}}
                    ]}
                }),
            );
            handler.handle(
                &mut chat,
                json!({"type": "result", "subtype": subtype, "parent_tool_use_id": "t1"}),
            );
            assert_eq!(
                chat.agent(&ToolCallId::new("t1")).unwrap().status,
                expected,
                "subtype {subtype}"
            );
        }
    }

    #[test]
    fn parentless_result_banner_suppressed_after_assistant_output() {
        let mut chat = chat();
        let mut handler = ChatHandler::new();
        handler.handle(
            &mut chat,
            json!({
                "type": "assistant",
                "message": {"content": [{"type": "text", "text": "answer"}]}
            }),
        );
        handler.handle(
            &mut chat,
            json!({"type": "result", "subtype": "success", "result": "answer"}),
        );
        // Only the assistant text; no duplicate banner.
        assert_eq!(chat.primary().len(), 1);

        // The flag was reset, so a result on a turn with no assistant
        // output does produce a notification.
        handler.handle(
            &mut chat,
            json!({"type": "result", "subtype": "success", "result": "standalone"}),
        );
        assert_eq!(chat.primary().len(), 2);
        assert!(matches!(
            chat.primary().entry(1).unwrap(),
            Entry::SystemNotification(n) if n.text == "standalone"
        ));
    }

    #[test]
    fn result_with_empty_text_emits_nothing() {
        let mut chat = chat();
        let mut handler = ChatHandler::new();
        handler.handle(&mut chat, json!({"type": "result", "subtype": "success", "result": ""}));
        assert!(chat.primary().is_empty());
    }

    #[test]
    fn result_usage_updates_metadata() {
        let mut chat = chat();
        let mut handler = ChatHandler::new();
        let events = handler.handle(
            &mut chat,
            json!({
                "type": "result",
                "subtype": "success",
                "total_cost_usd": 0.25,
                "usage": {"input_tokens": 100, "output_tokens": 40}
            }),
        );
        assert!(events.contains(&ChatEvent::MetadataChanged));
        assert_eq!(chat.metadata.usage.input_tokens, 100);
        assert!((chat.metadata.usage.cost_usd - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn tool_result_unknown_call_id_is_silent() {
        let mut chat = chat();
        let mut handler = ChatHandler::new();
        let events = handler.handle(
            &mut chat,
            json!({
                "type": "user",
                "message": {"content": [
                    {"type": "tool_result", "tool_use_id": "nope", "content": "x"}
                ]}
            }),
        );
        assert!(events.is_empty());
        assert!(chat.primary().is_empty());
    }

    #[test]
    fn out_of_band_result_preferred_over_inline() {
        let mut chat = chat();
        let mut handler = ChatHandler::new();
        handler.handle(
            &mut chat,
            json!({
                "type": "assistant",
                "message": {"content": [
                    {"type": "tool_use", "id": "t1", "name": "Read", "input": {"file_path": "a.rs"}}
                ]}
            }),
        );
        handler.handle(
            &mut chat,
            json!({
                "type": "user",
                "toolUseResult": {"file": {"content": "structured"}},
                "message": {"content": [
                    {"type": "tool_result", "tool_use_id": "t1", "content": "inline fallback"}
                ]}
            }),
        );

        let inv = chat.primary().entry(0).unwrap().as_tool_invocation().unwrap();
        assert_eq!(inv.result, Some(json!({"file": {"content": "structured"}})));
    }

    #[test]
    fn paired_result_clears_pending_permission() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        struct Counting(Arc<AtomicUsize>);
        impl PermissionRegistry for Counting {
            fn remove_pending(&mut self, _call_id: &ToolCallId) -> bool {
                self.0.fetch_add(1, Ordering::SeqCst);
                true
            }
        }

        let removed = Arc::new(AtomicUsize::new(0));
        let mut chat = chat();
        let mut handler = ChatHandler::with_permissions(Box::new(Counting(removed.clone())));

        handler.handle(
            &mut chat,
            json!({
                "type": "user",
                "message": {"content": [
                    {"type": "tool_result", "tool_use_id": "t1", "content": "late"}
                ]}
            }),
        );
        assert_eq!(removed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn disposed_handler_consumes_nothing() {
        let mut chat = chat();
        let mut handler = ChatHandler::new();
        handler.dispose();
        let events = handler.handle(
            &mut chat,
            json!({
                "type": "assistant",
                "message": {"content": [{"type": "text", "text": "late"}]}
            }),
        );
        assert!(events.is_empty());
        assert!(chat.primary().is_empty());
    }

    #[test]
    fn unmatched_parent_falls_back_to_primary() {
        let mut chat = chat();
        let mut handler = ChatHandler::new();
        handler.handle(
            &mut chat,
            json!({
                "type": "assistant",
                "parent_tool_use_id": "never-registered",
                "message": {"content": [{"type": "text", "text": "orphan"}]}
            }),
        );
        assert_eq!(chat.primary().len(), 1);
    }
}
