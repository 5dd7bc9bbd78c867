//! Incremental assembly of entries from partial stream events.
//!
//! Streaming entries are attached to their conversation as soon as the
//! block starts, so observers see incremental growth; the registry here
//! only tracks which entry each block index maps to while the message is
//! in flight.

use std::collections::{BTreeMap, HashMap};

use serde_json::Map;
use serde_json::Value;

use crate::model::{Chat, ConversationId, Entry, TextKind, ToolCallId};
use crate::protocol::{ContentBlockStart, StreamDelta};

/// A `Task` invocation finished streaming and should spawn a subagent.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskSpawn {
    pub call_id: ToolCallId,
    pub label: Option<String>,
}

/// Outcome of a `content_block_stop`.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockClosed {
    /// Index of the finalized entry in its conversation.
    pub index: usize,
    pub task: Option<TaskSpawn>,
}

/// Per-conversation streaming state for the in-flight assistant message.
#[derive(Debug, Default)]
struct TurnState {
    /// Block index → entry index, for the message currently streaming.
    live: BTreeMap<u64, usize>,
    /// Accumulated input-JSON fragments per tool_use block, parsed at stop.
    buffers: HashMap<u64, String>,
    /// Entries produced by the most recent turn, in block order; consumed
    /// when the authoritative assistant message arrives.
    retained: Vec<usize>,
}

/// Streaming block registry, private to one handler instance.
#[derive(Debug, Default)]
pub struct StreamAssembler {
    turns: HashMap<ConversationId, TurnState>,
}

impl StreamAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop all streaming state (handler dispose).
    pub fn clear(&mut self) {
        self.turns.clear();
    }

    /// A new assistant message started: reset the block registry for this
    /// conversation. Entries from the previous turn stay in the
    /// conversation; only the references are dropped.
    pub fn message_start(&mut self, conversation: &ConversationId) {
        self.turns
            .insert(conversation.clone(), TurnState::default());
    }

    /// Attach a new streaming entry for a starting content block. Returns
    /// the entry index, or `None` for block types the model does not carry.
    pub fn block_start(
        &mut self,
        chat: &mut Chat,
        conversation: &ConversationId,
        block_index: u64,
        block: &ContentBlockStart,
    ) -> Option<usize> {
        let entry = match block.kind.as_str() {
            "text" => Entry::streaming_text(TextKind::Text),
            "thinking" => Entry::streaming_text(TextKind::Thinking),
            "tool_use" => {
                let name = block.name.clone().unwrap_or_else(|| "unknown".to_string());
                let call_id = block
                    .id
                    .clone()
                    .filter(|id| !id.is_empty())
                    .unwrap_or_else(|| format!("tool-{block_index}"));
                Entry::streaming_tool(name, call_id)
            }
            _ => return None,
        };

        let index = chat.conversation_mut(conversation).push(entry);
        let turn = self.turns.entry(conversation.clone()).or_default();
        turn.live.insert(block_index, index);
        turn.retained.push(index);
        Some(index)
    }

    /// Apply a delta to the entry at `block_index`. Returns the entry index
    /// when something was mutated.
    pub fn block_delta(
        &mut self,
        chat: &mut Chat,
        conversation: &ConversationId,
        block_index: u64,
        delta: &StreamDelta,
    ) -> Option<usize> {
        let turn = self.turns.get_mut(conversation)?;
        let index = *turn.live.get(&block_index)?;

        match delta {
            StreamDelta::TextDelta { text } | StreamDelta::ThinkingDelta { thinking: text } => {
                match chat.conversation_mut(conversation).entry_mut(index)? {
                    Entry::Text(entry) => {
                        entry.text.push_str(text);
                        Some(index)
                    }
                    _ => None,
                }
            }
            StreamDelta::InputJsonDelta { partial_json } => {
                match chat.conversation(conversation).entry(index) {
                    Some(Entry::ToolInvocation(_)) => {
                        turn.buffers.entry(block_index).or_default().push_str(partial_json);
                        Some(index)
                    }
                    _ => None,
                }
            }
        }
    }

    /// Finalize the entry at `block_index`. Tool invocations parse their
    /// accumulated input fragment here — never incrementally.
    pub fn block_stop(
        &mut self,
        chat: &mut Chat,
        conversation: &ConversationId,
        block_index: u64,
    ) -> Option<BlockClosed> {
        let turn = self.turns.get_mut(conversation)?;
        let index = *turn.live.get(&block_index)?;
        let buffer = turn.buffers.remove(&block_index);

        let entry = chat.conversation_mut(conversation).entry_mut(index)?;
        entry.finalize();

        let task = entry.as_tool_invocation_mut().and_then(|inv| {
            if let Some(buffer) = buffer {
                inv.input = parse_input_fragment(&buffer);
            }
            if inv.name.as_str() == "Task" {
                Some(TaskSpawn {
                    call_id: inv.call_id.clone(),
                    label: task_label(&inv.input),
                })
            } else {
                None
            }
        });

        Some(BlockClosed { index, task })
    }

    /// The in-flight message ended: clear the block registry. Entries stay
    /// in the conversation and the turn's entry list is retained for
    /// finalization against the authoritative message.
    pub fn message_stop(&mut self, conversation: &ConversationId) {
        if let Some(turn) = self.turns.get_mut(conversation) {
            turn.live.clear();
            turn.buffers.clear();
        }
    }

    /// Take the entries produced by the most recent turn, dropping the
    /// retained reference.
    pub fn take_retained(&mut self, conversation: &ConversationId) -> Vec<usize> {
        self.turns
            .get_mut(conversation)
            .map(|turn| std::mem::take(&mut turn.retained))
            .unwrap_or_default()
    }
}

/// Parse an accumulated input-JSON fragment. Anything that is not a JSON
/// object (including an empty or torn fragment) yields an empty input map.
fn parse_input_fragment(buffer: &str) -> Map<String, Value> {
    match serde_json::from_str::<Value>(buffer) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    }
}

/// Subagent label from a `Task` invocation's input.
pub(crate) fn task_label(input: &Map<String, Value>) -> Option<String> {
    input
        .get("description")
        .or_else(|| input.get("subagent_type"))
        .and_then(Value::as_str)
        .map(str::to_string)
}
