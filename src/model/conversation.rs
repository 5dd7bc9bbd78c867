use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::entry::Entry;
use super::ids::{ChatId, ConversationId, ToolCallId};
use super::metadata::ChatMetadata;

/// An ordered, append-only sequence of entries belonging to one chat or one
/// subagent. Entries are never reordered or deleted; streaming entries are
/// mutated in place until finalized.
#[derive(Debug, Clone, PartialEq)]
pub struct Conversation {
    id: ConversationId,
    label: Option<String>,
    entries: Vec<Entry>,
}

impl Conversation {
    pub fn new() -> Self {
        Self {
            id: ConversationId::generate(),
            label: None,
            entries: Vec::new(),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn id(&self) -> &ConversationId {
        &self.id
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// Append an entry and return its index. Indexes are stable: entries are
    /// never removed, so they can be held as long-lived references.
    pub fn push(&mut self, entry: Entry) -> usize {
        self.entries.push(entry);
        self.entries.len() - 1
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn entry(&self, index: usize) -> Option<&Entry> {
        self.entries.get(index)
    }

    pub fn entry_mut(&mut self, index: usize) -> Option<&mut Entry> {
        self.entries.get_mut(index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}

/// Lifecycle status of a spawned subagent. Transitions only move forward:
/// once terminal, a status never changes again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Working,
    Completed,
    Error,
}

impl AgentStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, AgentStatus::Working)
    }
}

/// A nested agent conversation spawned by a `Task` tool invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct Agent {
    /// Equal to the tool call id that spawned this agent.
    pub id: ToolCallId,
    pub conversation_id: ConversationId,
    pub status: AgentStatus,
}

/// One chat: a primary conversation plus any subagent conversations spawned
/// from it, and the agents tracking their lifecycle.
#[derive(Debug)]
pub struct Chat {
    id: ChatId,
    primary: Conversation,
    subagents: HashMap<ConversationId, Conversation>,
    agents: HashMap<ToolCallId, Agent>,
    pub is_compacting: bool,
    pub metadata: ChatMetadata,
    subagent_seq: u32,
}

impl Chat {
    pub fn new(id: ChatId) -> Self {
        Self {
            id,
            primary: Conversation::new(),
            subagents: HashMap::new(),
            agents: HashMap::new(),
            is_compacting: false,
            metadata: ChatMetadata::new(),
            subagent_seq: 0,
        }
    }

    pub fn id(&self) -> &ChatId {
        &self.id
    }

    pub fn primary(&self) -> &Conversation {
        &self.primary
    }

    pub fn agent(&self, call_id: &ToolCallId) -> Option<&Agent> {
        self.agents.get(call_id)
    }

    pub fn agents(&self) -> impl Iterator<Item = &Agent> {
        self.agents.values()
    }

    pub fn subagent(&self, id: &ConversationId) -> Option<&Conversation> {
        self.subagents.get(id)
    }

    /// Resolve the conversation a message targets. A `parent_tool_use_id`
    /// matching a registered agent routes to that agent's conversation;
    /// anything else falls back to the primary conversation.
    pub fn resolve_target(&self, parent: Option<&ToolCallId>) -> ConversationId {
        parent
            .and_then(|p| self.agents.get(p))
            .map(|a| a.conversation_id.clone())
            .unwrap_or_else(|| self.primary.id.clone())
    }

    /// Look up a conversation by id. Never fails: an unknown id resolves to
    /// the primary conversation so content is surfaced rather than dropped.
    pub fn conversation(&self, id: &ConversationId) -> &Conversation {
        if *id == self.primary.id {
            &self.primary
        } else {
            self.subagents.get(id).unwrap_or(&self.primary)
        }
    }

    pub fn conversation_mut(&mut self, id: &ConversationId) -> &mut Conversation {
        if *id == self.primary.id || !self.subagents.contains_key(id) {
            &mut self.primary
        } else {
            self.subagents.get_mut(id).unwrap_or(&mut self.primary)
        }
    }

    /// Register a new agent for a `Task` invocation. Returns the new
    /// subagent conversation id, or `None` if the call id is already
    /// registered — an agent is created at most once and terminal agents
    /// are never re-added.
    pub fn register_agent(
        &mut self,
        call_id: ToolCallId,
        label: Option<String>,
    ) -> Option<ConversationId> {
        if self.agents.contains_key(&call_id) {
            return None;
        }
        self.subagent_seq += 1;
        let label = label.unwrap_or_else(|| format!("Subagent #{}", self.subagent_seq));
        let conversation = Conversation::new().with_label(label);
        let conversation_id = conversation.id().clone();
        self.subagents.insert(conversation_id.clone(), conversation);
        self.agents.insert(
            call_id.clone(),
            Agent {
                id: call_id,
                conversation_id: conversation_id.clone(),
                status: AgentStatus::Working,
            },
        );
        Some(conversation_id)
    }

    /// Advance an agent to a terminal status. Returns false when the agent
    /// is unknown, already terminal, or the target status is not terminal.
    pub fn transition_agent(&mut self, call_id: &ToolCallId, status: AgentStatus) -> bool {
        if !status.is_terminal() {
            return false;
        }
        match self.agents.get_mut(call_id) {
            Some(agent) if !agent.status.is_terminal() => {
                agent.status = status;
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::entry::TextKind;

    #[test]
    fn push_returns_stable_indexes() {
        let mut conversation = Conversation::new();
        let a = conversation.push(Entry::user_message("hi"));
        let b = conversation.push(Entry::streaming_text(TextKind::Text));
        assert_eq!(a, 0);
        assert_eq!(b, 1);
        assert_eq!(conversation.len(), 2);
    }

    #[test]
    fn resolve_target_unmatched_parent_falls_back_to_primary() {
        let chat = Chat::new(ChatId::new("c1"));
        let parent = ToolCallId::new("t-unknown");
        assert_eq!(chat.resolve_target(Some(&parent)), *chat.primary().id());
    }

    #[test]
    fn register_agent_routes_parent_to_subagent() {
        let mut chat = Chat::new(ChatId::new("c1"));
        let call_id = ToolCallId::new("t1");
        let conv_id = chat.register_agent(call_id.clone(), None).unwrap();
        assert_eq!(chat.resolve_target(Some(&call_id)), conv_id);
        assert_eq!(chat.agent(&call_id).unwrap().status, AgentStatus::Working);
    }

    #[test]
    fn register_agent_is_idempotent_by_call_id() {
        let mut chat = Chat::new(ChatId::new("c1"));
        let call_id = ToolCallId::new("t1");
        assert!(chat.register_agent(call_id.clone(), None).is_some());
        assert!(chat.register_agent(call_id, None).is_none());
    }

    #[test]
    fn missing_label_defaults_to_numbered_subagent() {
        let mut chat = Chat::new(ChatId::new("c1"));
        let first = chat.register_agent(ToolCallId::new("t1"), None).unwrap();
        let second = chat
            .register_agent(ToolCallId::new("t2"), Some("explore".into()))
            .unwrap();
        assert_eq!(chat.subagent(&first).unwrap().label(), Some("Subagent #1"));
        assert_eq!(chat.subagent(&second).unwrap().label(), Some("explore"));
    }

    #[test]
    fn terminal_status_is_final() {
        let mut chat = Chat::new(ChatId::new("c1"));
        let call_id = ToolCallId::new("t1");
        chat.register_agent(call_id.clone(), None);

        assert!(chat.transition_agent(&call_id, AgentStatus::Completed));
        assert!(!chat.transition_agent(&call_id, AgentStatus::Error));
        assert_eq!(chat.agent(&call_id).unwrap().status, AgentStatus::Completed);
    }

    #[test]
    fn transition_to_working_is_rejected() {
        let mut chat = Chat::new(ChatId::new("c1"));
        let call_id = ToolCallId::new("t1");
        chat.register_agent(call_id.clone(), None);
        assert!(!chat.transition_agent(&call_id, AgentStatus::Working));
    }

    #[test]
    fn transition_unknown_agent_is_noop() {
        let mut chat = Chat::new(ChatId::new("c1"));
        assert!(!chat.transition_agent(&ToolCallId::new("nope"), AgentStatus::Completed));
    }

    #[test]
    fn conversation_lookup_unknown_id_falls_back_to_primary() {
        let mut chat = Chat::new(ChatId::new("c1"));
        chat.primary.push(Entry::user_message("hello"));
        let stray = ConversationId::generate();
        assert_eq!(chat.conversation(&stray).len(), 1);
    }
}
