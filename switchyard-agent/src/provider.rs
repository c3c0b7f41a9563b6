// ABOUTME: Provider contract the agent loop depends on -- a streamed chat call, nothing vendor-specific.
// ABOUTME: Includes the accumulator that folds tool-call fragments into complete ToolCalls.

use anyhow::Result;
use futures_util::future::BoxFuture;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;

use switchyard_core::{ToolCall, ToolCallId, ToolDefinition};

use crate::history::ChatMessage;

/// One element of a provider's streamed response.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Incremental text to surface immediately.
    TextDelta(String),
    /// Fragment of a structured tool call; accumulated until `Done`.
    ToolCallDelta {
        /// Provider-side slot so parallel tool calls interleave safely.
        index: usize,
        id: Option<String>,
        name: Option<String>,
        arguments_fragment: String,
    },
    /// The turn is complete.
    Done,
}

/// Per-call provider settings resolved from the agent profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            model: "default".to_string(),
            max_tokens: None,
            temperature: None,
        }
    }
}

/// Everything a provider needs for one streamed turn.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub history: Vec<ChatMessage>,
    pub config: ProviderConfig,
    pub tools: Vec<ToolDefinition>,
}

/// Streaming chat interface, one implementation per configured vendor.
///
/// The agent loop depends only on this shape. The cancellation token is the
/// run's; implementations should stop producing promptly once it fires, but
/// the loop re-checks it per chunk regardless.
pub trait ChatProvider: Send + Sync {
    fn name(&self) -> &'static str;

    fn chat_stream<'a>(
        &'a self,
        request: ChatRequest,
        cancel: CancellationToken,
    ) -> BoxFuture<'a, Result<BoxStream<'static, StreamEvent>>>;
}

/// Folds `ToolCallDelta` fragments into complete [`ToolCall`]s.
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    slots: BTreeMap<usize, PartialCall>,
}

#[derive(Debug, Default)]
struct PartialCall {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

impl ToolCallAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(
        &mut self,
        index: usize,
        id: Option<String>,
        name: Option<String>,
        arguments_fragment: &str,
    ) {
        let slot = self.slots.entry(index).or_default();
        if id.is_some() {
            slot.id = id;
        }
        if name.is_some() {
            slot.name = name;
        }
        slot.arguments.push_str(arguments_fragment);
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Finish the turn. Slots missing a name are dropped with a warning;
    /// unparseable argument text is preserved as a raw string so the tool
    /// still sees what the model produced.
    pub fn finish(self) -> Vec<ToolCall> {
        let mut calls = Vec::with_capacity(self.slots.len());
        for (index, slot) in self.slots {
            let Some(name) = slot.name else {
                tracing::warn!(index, "Discarding tool-call fragment without a name");
                continue;
            };
            let id = slot
                .id
                .unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4()));
            let arguments = if slot.arguments.trim().is_empty() {
                Value::Object(Default::default())
            } else {
                serde_json::from_str(&slot.arguments)
                    .unwrap_or_else(|_| Value::String(slot.arguments))
            };
            calls.push(ToolCall {
                id: ToolCallId::new(id),
                name,
                arguments,
            });
        }
        calls
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_accumulator_single_call() {
        let mut acc = ToolCallAccumulator::new();
        acc.push(0, Some("t1".to_string()), Some("search".to_string()), "{\"q\":");
        acc.push(0, None, None, "\"rust\"}");
        let calls = acc.finish();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "search");
        assert_eq!(calls[0].id, ToolCallId::new("t1"));
        assert_eq!(calls[0].arguments, json!({"q": "rust"}));
    }

    #[test]
    fn test_accumulator_interleaved_calls() {
        let mut acc = ToolCallAccumulator::new();
        acc.push(1, Some("t2".to_string()), Some("b".to_string()), "{}");
        acc.push(0, Some("t1".to_string()), Some("a".to_string()), "{}");
        let calls = acc.finish();
        // Ordered by provider slot, not arrival.
        assert_eq!(calls[0].name, "a");
        assert_eq!(calls[1].name, "b");
    }

    #[test]
    fn test_accumulator_bad_json_preserved_raw() {
        let mut acc = ToolCallAccumulator::new();
        acc.push(0, Some("t1".to_string()), Some("x".to_string()), "{broken");
        let calls = acc.finish();
        assert_eq!(calls[0].arguments, json!("{broken"));
    }

    #[test]
    fn test_accumulator_empty_arguments_become_object() {
        let mut acc = ToolCallAccumulator::new();
        acc.push(0, Some("t1".to_string()), Some("x".to_string()), "");
        let calls = acc.finish();
        assert_eq!(calls[0].arguments, json!({}));
    }

    #[test]
    fn test_accumulator_nameless_slot_dropped() {
        let mut acc = ToolCallAccumulator::new();
        acc.push(0, Some("t1".to_string()), None, "{}");
        assert!(acc.finish().is_empty());
    }
}
