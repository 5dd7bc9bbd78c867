//! Inbound message envelopes from the agent backend.
//!
//! The backend delivers already-deserialized JSON objects, one at a time,
//! discriminated by a top-level `type` tag. Decoding goes through explicit
//! tagged unions with an unknown fallback so a new upstream message type
//! degrades to visible-but-inert instead of being silently mis-parsed.

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::model::{TokenUsage, ToolCallId};

/// One classified inbound message.
#[derive(Debug, Clone)]
pub enum Inbound {
    System(SystemMessage),
    Assistant(AssistantMessage),
    User(UserMessage),
    Result(ResultMessage),
    StreamEvent(StreamEventMessage),
    /// Unrecognized `type` tag, or a known tag whose payload did not decode.
    Unknown { type_tag: String },
}

impl Inbound {
    /// Classify one inbound JSON object by its `type` discriminator.
    pub fn decode(value: &Value) -> Self {
        let tag = value.get("type").and_then(Value::as_str).unwrap_or("");
        let decoded = match tag {
            "system" => SystemMessage::deserialize(value).map(Inbound::System),
            "assistant" => AssistantMessage::deserialize(value).map(Inbound::Assistant),
            "user" => UserMessage::deserialize(value).map(Inbound::User),
            "result" => ResultMessage::deserialize(value).map(Inbound::Result),
            "stream_event" => StreamEventMessage::deserialize(value).map(Inbound::StreamEvent),
            _ => {
                return Inbound::Unknown {
                    type_tag: tag.to_string(),
                }
            }
        };
        decoded.unwrap_or(Inbound::Unknown {
            type_tag: tag.to_string(),
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SystemMessage {
    #[serde(default)]
    pub subtype: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub compact_metadata: Option<CompactMetadata>,
    #[serde(default)]
    pub parent_tool_use_id: Option<ToolCallId>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CompactMetadata {
    #[serde(default)]
    pub trigger: String,
    #[serde(default)]
    pub pre_tokens: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AssistantMessage {
    #[serde(default)]
    pub message: MessagePayload,
    #[serde(default)]
    pub parent_tool_use_id: Option<ToolCallId>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessagePayload {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub content: Vec<Value>,
    #[serde(default)]
    pub usage: Option<TokenUsage>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserMessage {
    #[serde(default)]
    pub message: UserPayload,
    #[serde(default)]
    pub parent_tool_use_id: Option<ToolCallId>,
    #[serde(default, alias = "isSynthetic")]
    pub is_synthetic: bool,
    #[serde(default, alias = "isReplay")]
    pub is_replay: bool,
    /// Structured result delivered out of band, preferred over the inline
    /// fallback content when pairing a tool result.
    #[serde(default, alias = "toolUseResult")]
    pub tool_use_result: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserPayload {
    #[serde(default)]
    pub content: UserContent,
}

/// User message content arrives either as a bare string or as an array of
/// content blocks.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum UserContent {
    Text(String),
    Blocks(Vec<Value>),
}

impl Default for UserContent {
    fn default() -> Self {
        UserContent::Text(String::new())
    }
}

impl UserContent {
    /// Concatenated text of all text blocks (or the bare string itself).
    pub fn joined_text(&self) -> String {
        match self {
            UserContent::Text(text) => text.clone(),
            UserContent::Blocks(blocks) => {
                let mut parts = Vec::new();
                for block in blocks {
                    if let Some(ContentBlock::Text { text }) = ContentBlock::decode(block) {
                        if !text.is_empty() {
                            parts.push(text);
                        }
                    }
                }
                parts.join("\n")
            }
        }
    }

    /// Decoded content blocks; a bare string yields none.
    pub fn blocks(&self) -> Vec<ContentBlock> {
        match self {
            UserContent::Text(_) => Vec::new(),
            UserContent::Blocks(blocks) => {
                blocks.iter().filter_map(ContentBlock::decode).collect()
            }
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResultMessage {
    #[serde(default)]
    pub subtype: String,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub total_cost_usd: Option<f64>,
    #[serde(default)]
    pub usage: Option<TokenUsage>,
    #[serde(default)]
    pub parent_tool_use_id: Option<ToolCallId>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StreamEventMessage {
    /// Raw inner event; decoded separately so unknown sub-events can be
    /// ignored without discarding the envelope.
    #[serde(default)]
    pub event: Value,
    #[serde(default)]
    pub parent_tool_use_id: Option<ToolCallId>,
}

/// Streaming sub-events that drive the stream-event state machine.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    MessageStart,
    ContentBlockStart {
        index: u64,
        content_block: ContentBlockStart,
    },
    ContentBlockDelta {
        index: u64,
        delta: StreamDelta,
    },
    ContentBlockStop {
        index: u64,
    },
    MessageStop,
}

impl StreamEvent {
    /// Decode the inner event of a `stream_event` envelope. Sub-events the
    /// state machine does not consume (pings, message deltas) return `None`.
    pub fn decode(event: &Value) -> Option<Self> {
        Self::deserialize(event).ok()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContentBlockStart {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamDelta {
    TextDelta {
        #[serde(default)]
        text: String,
    },
    ThinkingDelta {
        #[serde(default)]
        thinking: String,
    },
    InputJsonDelta {
        #[serde(default)]
        partial_json: String,
    },
}

/// Content blocks of authoritative `assistant` and `user` messages.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        #[serde(default)]
        text: String,
    },
    Thinking {
        #[serde(default)]
        thinking: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        #[serde(default)]
        content: Value,
        #[serde(default)]
        is_error: bool,
    },
}

impl ContentBlock {
    /// Decode one content block; unrecognized block types return `None`.
    pub fn decode(block: &Value) -> Option<Self> {
        Self::deserialize(block).ok()
    }
}

/// Interpret a tool input payload as an input map. Anything that is not a
/// JSON object is treated as an empty map.
pub fn tool_input_map(input: &Value) -> Map<String, Value> {
    match input {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    }
}
