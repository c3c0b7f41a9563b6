// ABOUTME: Tool registry shared between bootstrap, the plugin host, and the agent loop.
// ABOUTME: Maps tool names to async handlers; plugin-owned tools can be removed atomically on crash.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::ids::ToolCallId;

/// Tool surface description handed to providers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

/// A model-requested function invocation, produced by the provider's
/// structured output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    /// Provider-assigned id; must be echoed back unchanged in the result.
    pub id: ToolCallId,
    pub name: String,
    pub arguments: Value,
}

/// Outcome of one tool invocation, local or plugin-routed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolResult {
    pub tool_call_id: ToolCallId,
    pub output: Value,
    pub is_error: bool,
}

impl ToolResult {
    pub fn ok(tool_call_id: ToolCallId, output: Value) -> Self {
        Self {
            tool_call_id,
            output,
            is_error: false,
        }
    }

    pub fn error(tool_call_id: ToolCallId, message: impl Into<String>) -> Self {
        Self {
            tool_call_id,
            output: Value::String(message.into()),
            is_error: true,
        }
    }
}

/// Async tool implementation. Handlers receive the run's cancellation token;
/// honoring it is cooperative.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn invoke(&self, arguments: Value, cancel: CancellationToken) -> Result<Value>;
}

/// Who contributed a tool. Plugin tools are bulk-removed when their worker
/// stops or crashes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolOrigin {
    Builtin,
    Plugin(String),
}

/// A registered tool: definition plus handler plus origin.
#[derive(Clone)]
pub struct RegisteredTool {
    pub definition: ToolDefinition,
    pub origin: ToolOrigin,
    pub handler: Arc<dyn ToolHandler>,
}

/// Per-agent tool visibility. `None` allows every registered tool.
#[derive(Debug, Clone, Default)]
pub struct ToolFilter {
    pub allow: Option<HashSet<String>>,
}

impl ToolFilter {
    pub fn allow_all() -> Self {
        Self { allow: None }
    }

    pub fn allow_only<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allow: Some(names.into_iter().map(Into::into).collect()),
        }
    }

    pub fn permits(&self, name: &str) -> bool {
        match &self.allow {
            None => true,
            Some(allowed) => allowed.contains(name),
        }
    }
}

/// Single mutable map from tool name to handler. Written by the plugin host
/// (on worker start/stop/crash) and the bootstrap sequence, read by the
/// agent loop.
pub struct ToolRegistry {
    tools: Mutex<HashMap<String, RegisteredTool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: Mutex::new(HashMap::new()),
        }
    }

    pub fn register(&self, tool: RegisteredTool) {
        let mut tools = self.tools.lock().unwrap_or_else(|e| e.into_inner());
        let name = tool.definition.name.clone();
        if tools.insert(name.clone(), tool).is_some() {
            tracing::warn!(tool = %name, "Replacing existing tool registration");
        } else {
            tracing::debug!(tool = %name, "Registered tool");
        }
    }

    pub fn unregister(&self, name: &str) -> bool {
        let mut tools = self.tools.lock().unwrap_or_else(|e| e.into_inner());
        tools.remove(name).is_some()
    }

    /// Remove every tool contributed by the named plugin in one step, so the
    /// agent loop sees "tool not found" immediately after a crash rather
    /// than hanging. Returns the removed tool names.
    pub fn unregister_plugin(&self, plugin: &str) -> Vec<String> {
        let mut tools = self.tools.lock().unwrap_or_else(|e| e.into_inner());
        let removed: Vec<String> = tools
            .iter()
            .filter(|(_, t)| t.origin == ToolOrigin::Plugin(plugin.to_string()))
            .map(|(name, _)| name.clone())
            .collect();
        for name in &removed {
            tools.remove(name);
        }
        if !removed.is_empty() {
            tracing::info!(plugin = %plugin, tools = ?removed, "Unregistered plugin tools");
        }
        removed
    }

    pub fn get(&self, name: &str) -> Option<RegisteredTool> {
        let tools = self.tools.lock().unwrap_or_else(|e| e.into_inner());
        tools.get(name).cloned()
    }

    /// Definitions visible to an agent, sorted by name for stable provider
    /// requests.
    pub fn list_for(&self, filter: &ToolFilter) -> Vec<ToolDefinition> {
        let tools = self.tools.lock().unwrap_or_else(|e| e.into_inner());
        let mut defs: Vec<ToolDefinition> = tools
            .values()
            .filter(|t| filter.permits(&t.definition.name))
            .map(|t| t.definition.clone())
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    pub fn names(&self) -> Vec<String> {
        let tools = self.tools.lock().unwrap_or_else(|e| e.into_inner());
        let mut names: Vec<String> = tools.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
