// ABOUTME: In-memory conversation transcripts with character-budget trimming.
// ABOUTME: Oldest non-system messages drop first; the first user message is pinned for continuity.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

use switchyard_core::{ConversationKey, ToolCall, ToolResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One transcript entry. Assistant entries may carry tool calls; tool
/// entries bundle the results of a whole turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_results: Vec<ToolResult>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_results: Vec::new(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_results: Vec::new(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_results: Vec::new(),
        }
    }

    pub fn assistant_with_tools(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls,
            tool_results: Vec::new(),
        }
    }

    /// Single tool-role message bundling all results of one turn.
    pub fn tool_results(results: Vec<ToolResult>) -> Self {
        Self {
            role: Role::Tool,
            content: String::new(),
            tool_calls: Vec::new(),
            tool_results: results,
        }
    }

    fn char_cost(&self) -> usize {
        let mut cost = self.content.chars().count();
        for call in &self.tool_calls {
            cost += call.name.len() + call.arguments.to_string().len();
        }
        for result in &self.tool_results {
            cost += result.output.to_string().len();
        }
        cost
    }
}

/// One conversation's transcript.
#[derive(Debug, Clone, Default)]
pub struct ConversationHistory {
    messages: Vec<ChatMessage>,
}

impl ConversationHistory {
    pub fn with_system_prompt(prompt: &str) -> Self {
        Self {
            messages: vec![ChatMessage::system(prompt)],
        }
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Copy of the transcript trimmed to `char_budget`.
    ///
    /// System messages never drop. Among the rest, the very first one is
    /// preserved for context continuity and the oldest of the remainder
    /// drop first until the transcript fits.
    pub fn trimmed(&self, char_budget: usize) -> Vec<ChatMessage> {
        let total: usize = self.messages.iter().map(|m| m.char_cost()).sum();
        if total <= char_budget {
            return self.messages.clone();
        }

        let mut over = total.saturating_sub(char_budget);
        let first_conversational = self
            .messages
            .iter()
            .position(|m| m.role != Role::System);

        let mut drop = vec![false; self.messages.len()];
        for (i, message) in self.messages.iter().enumerate() {
            if over == 0 {
                break;
            }
            if message.role == Role::System {
                continue;
            }
            if Some(i) == first_conversational {
                continue;
            }
            drop[i] = true;
            over = over.saturating_sub(message.char_cost());
        }

        let kept: Vec<ChatMessage> = self
            .messages
            .iter()
            .zip(drop.iter())
            .filter(|(_, dropped)| !**dropped)
            .map(|(m, _)| m.clone())
            .collect();
        tracing::debug!(
            before = self.messages.len(),
            after = kept.len(),
            "Trimmed history to character budget"
        );
        kept
    }
}

/// Per-conversation transcript store, touched only from the gateway's own
/// tasks. Long-term memory is an external collaborator; this holds the
/// working transcript only.
pub struct HistoryStore {
    conversations: Mutex<HashMap<ConversationKey, ConversationHistory>>,
    char_budget: usize,
}

impl HistoryStore {
    pub fn new(char_budget: usize) -> Self {
        Self {
            conversations: Mutex::new(HashMap::new()),
            char_budget,
        }
    }

    /// Append a message, creating the transcript with the given system
    /// prompt on first touch.
    pub fn append(&self, key: &ConversationKey, system_prompt: &str, message: ChatMessage) {
        let mut conversations = self
            .conversations
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        conversations
            .entry(key.clone())
            .or_insert_with(|| ConversationHistory::with_system_prompt(system_prompt))
            .push(message);
    }

    /// Trimmed snapshot for the next provider call.
    pub fn snapshot(&self, key: &ConversationKey) -> Vec<ChatMessage> {
        let conversations = self
            .conversations
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        conversations
            .get(key)
            .map(|h| h.trimmed(self.char_budget))
            .unwrap_or_default()
    }

    pub fn message_count(&self, key: &ConversationKey) -> usize {
        let conversations = self
            .conversations
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        conversations.get(key).map(|h| h.len()).unwrap_or(0)
    }

    pub fn clear(&self, key: &ConversationKey) {
        let mut conversations = self
            .conversations
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        conversations.remove(key);
    }
}
