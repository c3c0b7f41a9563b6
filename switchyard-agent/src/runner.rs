// ABOUTME: The agent loop -- streams provider turns, dispatches tool calls, and emits lifecycle events.
// ABOUTME: Every run ends in exactly one terminal event; errors become user-facing messages, never silent exits.

use anyhow::Result;
use futures_util::StreamExt;
use serde_json::json;
use std::sync::Arc;

use switchyard_core::{
    metrics, Event, EventBus, EventKind, OutboundMessage, QueuedMessage, RunTicket, ToolResult,
    ToolRegistry,
};

use crate::directory::{AgentDirectory, AgentProfile};
use crate::history::{ChatMessage, HistoryStore};
use crate::narration::NarrationClassifier;
use crate::provider::{ChatRequest, StreamEvent, ToolCallAccumulator};

/// How a run ended. Purely informational; the dispatcher completes the
/// governor run the same way in every case.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// A final response was delivered (including the iteration-cap message).
    Completed,
    /// Cancellation fired before a final response.
    Aborted,
    /// The provider or configuration failed; the user got an error message.
    Failed,
}

/// Drives one message through the think/stream/tool loop.
pub struct AgentRunner {
    bus: Arc<EventBus>,
    registry: Arc<ToolRegistry>,
    history: Arc<HistoryStore>,
    directory: Arc<AgentDirectory>,
    classifier: Arc<dyn NarrationClassifier>,
    max_iterations: usize,
}

impl AgentRunner {
    pub fn new(
        bus: Arc<EventBus>,
        registry: Arc<ToolRegistry>,
        history: Arc<HistoryStore>,
        directory: Arc<AgentDirectory>,
        classifier: Arc<dyn NarrationClassifier>,
        max_iterations: usize,
    ) -> Self {
        Self {
            bus,
            registry,
            history,
            directory,
            classifier,
            max_iterations,
        }
    }

    /// Run one dispatched message to completion. Never returns early without
    /// emitting a terminal event; the caller still owns `complete_run`.
    pub async fn run(&self, job: QueuedMessage, ticket: &RunTicket) -> RunOutcome {
        let outcome = self.run_inner(&job, ticket).await;
        metrics::record_run_duration(ticket.started_at.elapsed().as_secs_f64());
        tracing::info!(
            key = %ticket.key,
            msg_id = %job.id,
            outcome = ?outcome,
            elapsed = ?ticket.started_at.elapsed(),
            "Run finished"
        );
        outcome
    }

    async fn run_inner(&self, job: &QueuedMessage, ticket: &RunTicket) -> RunOutcome {
        let Some(profile) = self.directory.resolve(&job.target_agent) else {
            tracing::error!(agent = %job.target_agent, "No agent configured, dropping run");
            metrics::record_error("agent_missing");
            self.publish(
                job,
                EventKind::SystemError,
                json!({
                    "error": format!("no agent configured for '{}'", job.target_agent),
                }),
            );
            let notice = format!(
                "No agent named '{}' is configured to handle this message.",
                job.target_agent
            );
            self.publish(
                job,
                EventKind::AgentResponse,
                json!({ "agent": job.target_agent, "content": notice }),
            );
            self.publish_outbound(job, &notice);
            return RunOutcome::Failed;
        };

        let key = job.message.conversation_key();
        self.history.append(
            &key,
            &profile.system_prompt,
            ChatMessage::user(&job.message.content),
        );

        self.publish(
            job,
            EventKind::AgentThinking,
            json!({ "agent": profile.id, "conversation": key.to_string() }),
        );

        for iteration in 1..=self.max_iterations {
            if ticket.cancel.is_cancelled() {
                return self.finish_aborted(job, &profile, iteration);
            }

            let request = ChatRequest {
                history: self.history.snapshot(&key),
                config: profile.provider_config.clone(),
                tools: self.registry.list_for(&profile.tool_filter),
            };

            let mut stream = match profile
                .provider
                .chat_stream(request, ticket.cancel.clone())
                .await
            {
                Ok(stream) => stream,
                Err(error) => {
                    tracing::error!(agent = %profile.id, error = %error, "Provider call failed");
                    metrics::record_error("provider");
                    self.publish(
                        job,
                        EventKind::SystemError,
                        json!({ "error": error.to_string(), "agent": profile.id }),
                    );
                    self.send_outbound(
                        job,
                        &profile,
                        EventKind::AgentResponse,
                        "Sorry, something went wrong while processing that. Please try again.",
                    );
                    return RunOutcome::Failed;
                }
            };

            self.publish(
                job,
                EventKind::AgentStreamStart,
                json!({ "agent": profile.id, "iteration": iteration }),
            );

            let mut text = String::new();
            let mut accumulator = ToolCallAccumulator::new();
            let mut cancelled = false;
            loop {
                tokio::select! {
                    _ = ticket.cancel.cancelled() => {
                        cancelled = true;
                        break;
                    }
                    item = stream.next() => match item {
                        None | Some(StreamEvent::Done) => break,
                        Some(StreamEvent::TextDelta(delta)) => {
                            text.push_str(&delta);
                            self.publish(
                                job,
                                EventKind::AgentStreamDelta,
                                json!({ "agent": profile.id, "delta": delta }),
                            );
                        }
                        Some(StreamEvent::ToolCallDelta { index, id, name, arguments_fragment }) => {
                            accumulator.push(index, id, name, &arguments_fragment);
                        }
                    }
                }
            }

            self.publish(
                job,
                EventKind::AgentStreamEnd,
                json!({ "agent": profile.id, "chars": text.chars().count() }),
            );

            if cancelled {
                return self.finish_aborted(job, &profile, iteration);
            }

            let calls = accumulator.finish();
            if calls.is_empty() {
                self.history.append(&key, &profile.system_prompt, ChatMessage::assistant(&text));
                self.send_outbound(job, &profile, EventKind::AgentResponse, &text);
                return RunOutcome::Completed;
            }

            // Free text on a tool-calling turn is either narration to drop or
            // a progress update worth forwarding.
            if !text.trim().is_empty() && !self.classifier.is_narration(&text) {
                self.send_outbound(job, &profile, EventKind::AgentIntermediate, &text);
            }

            self.history.append(
                &key,
                &profile.system_prompt,
                ChatMessage::assistant_with_tools(&text, calls.clone()),
            );

            let mut results = Vec::with_capacity(calls.len());
            for call in calls {
                if ticket.cancel.is_cancelled() {
                    results.push(ToolResult::error(
                        call.id.clone(),
                        "run aborted before this tool executed",
                    ));
                    continue;
                }

                self.publish(
                    job,
                    EventKind::AgentToolUse,
                    json!({ "agent": profile.id, "tool": call.name, "arguments": call.arguments }),
                );
                metrics::record_tool_call(&call.name);

                let result = match self.registry.get(&call.name) {
                    Some(entry) if profile.tool_filter.permits(&call.name) => {
                        match entry
                            .handler
                            .invoke(call.arguments.clone(), ticket.cancel.clone())
                            .await
                        {
                            Ok(output) => ToolResult::ok(call.id.clone(), output),
                            Err(error) => {
                                tracing::warn!(tool = %call.name, error = %error, "Tool invocation failed");
                                ToolResult::error(call.id.clone(), error.to_string())
                            }
                        }
                    }
                    _ => {
                        tracing::warn!(tool = %call.name, "Tool not available");
                        ToolResult::error(
                            call.id.clone(),
                            format!("tool '{}' is not available", call.name),
                        )
                    }
                };
                results.push(result);
            }

            self.history
                .append(&key, &profile.system_prompt, ChatMessage::tool_results(results));

            if ticket.cancel.is_cancelled() {
                return self.finish_aborted(job, &profile, iteration);
            }
        }

        tracing::warn!(
            key = %ticket.key,
            max_iterations = self.max_iterations,
            "Iteration cap reached without a final response"
        );
        let capped =
            "I couldn't finish that within my step limit. Here's where I stopped; ask again to continue.";
        self.history
            .append(&key, &profile.system_prompt, ChatMessage::assistant(capped));
        self.send_outbound(job, &profile, EventKind::AgentResponse, capped);
        RunOutcome::Completed
    }

    fn finish_aborted(
        &self,
        job: &QueuedMessage,
        profile: &AgentProfile,
        iteration: usize,
    ) -> RunOutcome {
        metrics::record_run_aborted();
        self.publish(
            job,
            EventKind::AgentAborted,
            json!({ "agent": profile.id, "iteration": iteration }),
        );
        RunOutcome::Aborted
    }

    /// Publish both the agent lifecycle event and the matching outbound
    /// message so channel routers need only one subscription.
    fn send_outbound(
        &self,
        job: &QueuedMessage,
        profile: &AgentProfile,
        kind: EventKind,
        content: &str,
    ) {
        self.publish(
            job,
            kind,
            json!({ "agent": profile.id, "content": content }),
        );
        self.publish_outbound(job, content);
    }

    fn publish_outbound(&self, job: &QueuedMessage, content: &str) {
        let outbound = OutboundMessage {
            channel_kind: job.message.channel_kind.clone(),
            channel_id: job.message.channel_id.clone(),
            content: content.to_string(),
            correlation_id: Some(job.correlation_id.clone()),
        };
        match serde_json::to_value(&outbound) {
            Ok(payload) => self.publish(job, EventKind::MessageOutbound, payload),
            Err(error) => {
                tracing::error!(error = %error, "Failed to serialize outbound message");
            }
        }
    }

    fn publish(&self, job: &QueuedMessage, kind: EventKind, payload: serde_json::Value) {
        self.bus.publish(
            Event::new(kind, payload, "agent").with_correlation(job.correlation_id.clone()),
        );
    }
}
