// ABOUTME: Scripted provider for tests -- match on prompt text, stream back a canned script.
// ABOUTME: Scripts can interleave deltas, tool-call fragments, delays, and a hang that only cancellation ends.

use anyhow::Result;
use futures_util::future::BoxFuture;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::history::Role;
use crate::provider::{ChatProvider, ChatRequest, StreamEvent};

/// One step of a scripted response.
#[derive(Debug, Clone)]
pub enum ScriptedItem {
    Event(StreamEvent),
    Delay(Duration),
    /// Never produce another item. The consumer's cancellation path is the
    /// only way out.
    Hang,
}

#[derive(Debug, Clone, Default)]
struct Script {
    items: Vec<ScriptedItem>,
}

struct Rule {
    needle: String,
    scripts: VecDeque<Script>,
}

#[derive(Default)]
struct MockState {
    rules: Vec<Rule>,
    requests: Vec<ChatRequest>,
}

/// Scripted [`ChatProvider`] for tests.
///
/// Rules match on a substring of the most recent user message; repeated
/// matches consume queued scripts in order, so multi-iteration runs can be
/// scripted turn by turn.
///
/// ```ignore
/// let mock = MockProvider::new();
/// mock.on_prompt("weather")
///     .respond_tool_call("get_weather", json!({"city": "Oslo"}))
///     .respond_text("It's sunny in Oslo.");
/// ```
pub struct MockProvider {
    state: Arc<Mutex<MockState>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    /// Start a rule matching any user message containing `needle`.
    pub fn on_prompt(&self, needle: impl Into<String>) -> ScriptBuilder<'_> {
        let needle = needle.into();
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state.rules.push(Rule {
                needle: needle.clone(),
                scripts: VecDeque::new(),
            });
        }
        ScriptBuilder {
            provider: self,
            needle,
        }
    }

    /// Every request received so far, in arrival order.
    pub fn requests(&self) -> Vec<ChatRequest> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.requests.clone()
    }

    pub fn request_count(&self) -> usize {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.requests.len()
    }

    fn push_script(&self, needle: &str, script: Script) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(rule) = state.rules.iter_mut().rev().find(|r| r.needle == needle) {
            rule.scripts.push_back(script);
        }
    }

    fn take_script(&self, request: &ChatRequest) -> Script {
        let latest_user = request
            .history
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.clone())
            .unwrap_or_default();

        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        for rule in state.rules.iter_mut() {
            if latest_user.contains(&rule.needle) {
                if let Some(script) = rule.scripts.pop_front() {
                    return script;
                }
            }
        }
        tracing::warn!(prompt = %latest_user, "No mock script matched; responding empty");
        Script {
            items: vec![ScriptedItem::Event(StreamEvent::Done)],
        }
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatProvider for MockProvider {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn chat_stream<'a>(
        &'a self,
        request: ChatRequest,
        _cancel: CancellationToken,
    ) -> BoxFuture<'a, Result<BoxStream<'static, StreamEvent>>> {
        let script = self.take_script(&request);
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state.requests.push(request);
        }
        Box::pin(async move {
            let stream = futures_util::stream::unfold(
                script.items.into_iter(),
                |mut items| async move {
                    loop {
                        match items.next() {
                            None => return None,
                            Some(ScriptedItem::Event(event)) => return Some((event, items)),
                            Some(ScriptedItem::Delay(duration)) => {
                                tokio::time::sleep(duration).await;
                            }
                            Some(ScriptedItem::Hang) => {
                                futures_util::future::pending::<()>().await;
                                return None;
                            }
                        }
                    }
                },
            );
            Ok(stream.boxed())
        })
    }
}

/// Fluent script builder returned by [`MockProvider::on_prompt`]. Each
/// `respond_*` call queues one whole turn.
pub struct ScriptBuilder<'a> {
    provider: &'a MockProvider,
    needle: String,
}

impl ScriptBuilder<'_> {
    /// Queue a turn that streams `text` as one delta and finishes.
    pub fn respond_text(self, text: impl Into<String>) -> Self {
        self.respond_script(vec![
            ScriptedItem::Event(StreamEvent::TextDelta(text.into())),
            ScriptedItem::Event(StreamEvent::Done),
        ])
    }

    /// Queue a turn that streams `text` word by word.
    pub fn respond_streamed(self, text: &str) -> Self {
        let mut items: Vec<ScriptedItem> = text
            .split_inclusive(' ')
            .map(|chunk| ScriptedItem::Event(StreamEvent::TextDelta(chunk.to_string())))
            .collect();
        items.push(ScriptedItem::Event(StreamEvent::Done));
        self.respond_script(items)
    }

    /// Queue a turn requesting one tool call, no accompanying text.
    pub fn respond_tool_call(self, name: &str, arguments: serde_json::Value) -> Self {
        self.respond_text_and_tool_call("", name, arguments)
    }

    /// Queue a turn with free text followed by a tool call, the shape the
    /// narration heuristic has to judge.
    pub fn respond_text_and_tool_call(
        self,
        text: &str,
        name: &str,
        arguments: serde_json::Value,
    ) -> Self {
        let mut items = Vec::new();
        if !text.is_empty() {
            items.push(ScriptedItem::Event(StreamEvent::TextDelta(
                text.to_string(),
            )));
        }
        let args = arguments.to_string();
        let mut mid = args.len() / 2;
        while !args.is_char_boundary(mid) {
            mid -= 1;
        }
        let (head, tail) = args.split_at(mid);
        items.push(ScriptedItem::Event(StreamEvent::ToolCallDelta {
            index: 0,
            id: Some(format!("call_{}", uuid::Uuid::new_v4())),
            name: Some(name.to_string()),
            arguments_fragment: head.to_string(),
        }));
        items.push(ScriptedItem::Event(StreamEvent::ToolCallDelta {
            index: 0,
            id: None,
            name: None,
            arguments_fragment: tail.to_string(),
        }));
        items.push(ScriptedItem::Event(StreamEvent::Done));
        self.respond_script(items)
    }

    /// Queue a turn that produces nothing until cancelled.
    pub fn hang(self) -> Self {
        self.respond_script(vec![ScriptedItem::Hang])
    }

    /// Queue a fully custom turn.
    pub fn respond_script(self, items: Vec<ScriptedItem>) -> Self {
        self.provider.push_script(&self.needle, Script { items });
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::ChatMessage;
    use crate::provider::ProviderConfig;
    use serde_json::json;

    fn request(prompt: &str) -> ChatRequest {
        ChatRequest {
            history: vec![ChatMessage::user(prompt)],
            config: ProviderConfig::default(),
            tools: Vec::new(),
        }
    }

    async fn collect(provider: &MockProvider, prompt: &str) -> Vec<StreamEvent> {
        let mut stream = provider
            .chat_stream(request(prompt), CancellationToken::new())
            .await
            .unwrap();
        let mut events = Vec::new();
        while let Some(event) = stream.next().await {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_text_script() {
        let mock = MockProvider::new();
        mock.on_prompt("hello").respond_text("hi there");

        let events = collect(&mock, "well hello").await;
        assert_eq!(
            events,
            vec![
                StreamEvent::TextDelta("hi there".to_string()),
                StreamEvent::Done
            ]
        );
    }

    #[tokio::test]
    async fn test_scripts_consumed_in_order() {
        let mock = MockProvider::new();
        mock.on_prompt("weather")
            .respond_tool_call("get_weather", json!({"city": "Oslo"}))
            .respond_text("Sunny.");

        let first = collect(&mock, "weather please").await;
        assert!(matches!(first[0], StreamEvent::ToolCallDelta { .. }));

        let second = collect(&mock, "weather please").await;
        assert_eq!(second[0], StreamEvent::TextDelta("Sunny.".to_string()));
    }

    #[tokio::test]
    async fn test_unmatched_prompt_yields_done_only() {
        let mock = MockProvider::new();
        let events = collect(&mock, "anything").await;
        assert_eq!(events, vec![StreamEvent::Done]);
    }

    #[tokio::test]
    async fn test_requests_recorded() {
        let mock = MockProvider::new();
        mock.on_prompt("x").respond_text("y");
        collect(&mock, "x").await;
        assert_eq!(mock.request_count(), 1);
        assert_eq!(mock.requests()[0].history[0].content, "x");
    }
}
