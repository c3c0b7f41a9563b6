// ABOUTME: The plugin_admin builtin tool -- the agent-facing surface for plugin lifecycle operations.
// ABOUTME: One structured call covers list/info/start/stop/restart/install/uninstall/remove.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use switchyard_core::{RegisteredTool, ToolDefinition, ToolHandler, ToolOrigin};

use super::host::PluginHost;

pub const PLUGIN_ADMIN_TOOL: &str = "plugin_admin";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum AdminAction {
    List,
    Info,
    Start,
    Stop,
    Restart,
    Install,
    Uninstall,
    Remove,
}

#[derive(Debug, Deserialize)]
struct AdminArgs {
    action: AdminAction,
    #[serde(default)]
    name: Option<String>,
}

/// Builtin tool handler wrapping the plugin host.
pub struct PluginAdminTool {
    host: Arc<PluginHost>,
}

impl PluginAdminTool {
    pub fn new(host: Arc<PluginHost>) -> Self {
        Self { host }
    }

    /// The registry entry for this tool.
    pub fn registered(host: Arc<PluginHost>) -> RegisteredTool {
        RegisteredTool {
            definition: definition(),
            origin: ToolOrigin::Builtin,
            handler: Arc::new(Self::new(host)),
        }
    }
}

fn definition() -> ToolDefinition {
    ToolDefinition {
        name: PLUGIN_ADMIN_TOOL.to_string(),
        description: "Manage tool plugins: list them, inspect one, start, stop, restart, \
                      install or uninstall dependencies, or remove a plugin entirely."
            .to_string(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ["list", "info", "start", "stop", "restart",
                             "install", "uninstall", "remove"],
                    "description": "Lifecycle action to perform"
                },
                "name": {
                    "type": "string",
                    "description": "Plugin name; required for every action except 'list'"
                }
            },
            "required": ["action"]
        }),
    }
}

#[async_trait]
impl ToolHandler for PluginAdminTool {
    async fn invoke(&self, arguments: Value, _cancel: CancellationToken) -> Result<Value> {
        let args: AdminArgs =
            serde_json::from_value(arguments).context("invalid plugin_admin arguments")?;

        let named = |name: &Option<String>| -> Result<String> {
            name.clone()
                .filter(|n| !n.trim().is_empty())
                .context("this action requires a plugin 'name'")
        };

        match args.action {
            AdminAction::List => {
                let plugins = self.host.discover();
                Ok(json!({ "plugins": plugins }))
            }
            AdminAction::Info => {
                let name = named(&args.name)?;
                let info = self
                    .host
                    .info(&name)
                    .with_context(|| format!("unknown plugin '{}'", name))?;
                Ok(serde_json::to_value(info)?)
            }
            AdminAction::Start => {
                let name = named(&args.name)?;
                let tools = self.host.start(&name).await?;
                Ok(json!({ "plugin": name, "state": "running", "tools": tools }))
            }
            AdminAction::Stop => {
                let name = named(&args.name)?;
                self.host.stop(&name).await?;
                Ok(json!({ "plugin": name, "state": "stopped" }))
            }
            AdminAction::Restart => {
                let name = named(&args.name)?;
                let tools = self.host.restart(&name).await?;
                Ok(json!({ "plugin": name, "state": "running", "tools": tools }))
            }
            AdminAction::Install => {
                let name = named(&args.name)?;
                self.host.install(&name).await?;
                Ok(json!({ "plugin": name, "installed": true }))
            }
            AdminAction::Uninstall => {
                let name = named(&args.name)?;
                self.host.uninstall(&name).await?;
                Ok(json!({ "plugin": name, "installed": false }))
            }
            AdminAction::Remove => {
                let name = named(&args.name)?;
                self.host.remove(&name).await?;
                Ok(json!({ "plugin": name, "removed": true }))
            }
        }
    }
}
