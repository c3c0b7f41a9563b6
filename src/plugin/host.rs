// ABOUTME: Plugin lifecycle management -- discovery, install, start/stop/restart/remove, crash repair.
// ABOUTME: Makes a remote worker's tools look local to the agent loop; a crash never leaves this module.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use switchyard_core::config::PluginsConfig;
use switchyard_core::{
    metrics, Event, EventBus, EventKind, RegisteredTool, ToolHandler, ToolOrigin, ToolRegistry,
};

use super::manifest::{self, PluginManifest};
use super::worker::{WorkerHandle, WorkerSignal};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginState {
    Discovered,
    Installing,
    Starting,
    Running,
    Stopped,
    Crashed,
}

impl std::fmt::Display for PluginState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Discovered => "discovered",
            Self::Installing => "installing",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Crashed => "crashed",
        };
        f.write_str(s)
    }
}

/// Snapshot of one plugin for listings and the admin tool.
#[derive(Debug, Clone, Serialize)]
pub struct PluginInfo {
    pub name: String,
    pub version: String,
    pub state: PluginState,
    pub tools: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

struct PluginRecord {
    dir: PathBuf,
    manifest: PluginManifest,
    state: PluginState,
    last_error: Option<String>,
    tools: Vec<String>,
    worker: Option<Arc<WorkerHandle>>,
    /// Bumped on every start so a stale monitor task cannot act on a
    /// record that has since been restarted.
    epoch: u64,
}

impl PluginRecord {
    fn info(&self, name: &str) -> PluginInfo {
        PluginInfo {
            name: name.to_string(),
            version: self.manifest.version.clone(),
            state: self.state,
            tools: self.tools.clone(),
            last_error: self.last_error.clone(),
        }
    }
}

/// Owns every plugin's lifecycle and the bridge between worker processes
/// and the tool registry.
pub struct PluginHost {
    bus: Arc<EventBus>,
    registry: Arc<ToolRegistry>,
    plugins_dir: PathBuf,
    plugins: Mutex<HashMap<String, PluginRecord>>,
    ready_timeout: Duration,
    call_timeout: Duration,
    install_timeout: Duration,
}

impl PluginHost {
    pub fn new(
        bus: Arc<EventBus>,
        registry: Arc<ToolRegistry>,
        plugins_dir: PathBuf,
        config: &PluginsConfig,
    ) -> Self {
        Self {
            bus,
            registry,
            plugins_dir,
            plugins: Mutex::new(HashMap::new()),
            ready_timeout: Duration::from_secs(config.ready_timeout_secs),
            call_timeout: Duration::from_secs(config.call_timeout_secs),
            install_timeout: Duration::from_secs(config.install_timeout_secs),
        }
    }

    /// Scan the plugins directory. Cheap, repeatable, starts nothing. Live
    /// plugins keep their state; idle ones pick up manifest changes.
    pub fn discover(&self) -> Vec<PluginInfo> {
        let found = manifest::discover(&self.plugins_dir);
        let mut plugins = self.plugins.lock().unwrap_or_else(|e| e.into_inner());
        for (dir, manifest) in found {
            match plugins.get_mut(&manifest.name) {
                Some(record) => {
                    if !matches!(
                        record.state,
                        PluginState::Installing | PluginState::Starting | PluginState::Running
                    ) {
                        record.dir = dir;
                        record.manifest = manifest;
                    }
                }
                None => {
                    tracing::info!(plugin = %manifest.name, version = %manifest.version, "Discovered plugin");
                    plugins.insert(
                        manifest.name.clone(),
                        PluginRecord {
                            dir,
                            manifest,
                            state: PluginState::Discovered,
                            last_error: None,
                            tools: Vec::new(),
                            worker: None,
                            epoch: 0,
                        },
                    );
                }
            }
        }
        let mut infos: Vec<PluginInfo> = plugins.iter().map(|(n, r)| r.info(n)).collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    pub fn list(&self) -> Vec<PluginInfo> {
        let plugins = self.plugins.lock().unwrap_or_else(|e| e.into_inner());
        let mut infos: Vec<PluginInfo> = plugins.iter().map(|(n, r)| r.info(n)).collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    pub fn info(&self, name: &str) -> Option<PluginInfo> {
        let plugins = self.plugins.lock().unwrap_or_else(|e| e.into_inner());
        plugins.get(name).map(|r| r.info(name))
    }

    /// Start a plugin: install dependencies if needed, spawn the worker,
    /// await its `ready` handshake, register its tools. Returns the
    /// registered tool names.
    pub async fn start(self: &Arc<Self>, name: &str) -> Result<Vec<String>> {
        let (dir, manifest, epoch) = {
            let mut plugins = self.plugins.lock().unwrap_or_else(|e| e.into_inner());

            if let Some((active, _)) = plugins.iter().find(|(n, r)| {
                n.as_str() != name
                    && matches!(
                        r.state,
                        PluginState::Installing | PluginState::Starting | PluginState::Running
                    )
            }) {
                anyhow::bail!(
                    "plugin '{}' is already running; stop it before starting '{}'",
                    active,
                    name
                );
            }

            let record = plugins
                .get_mut(name)
                .with_context(|| format!("unknown plugin '{}'; run discovery first", name))?;
            if matches!(
                record.state,
                PluginState::Installing | PluginState::Starting | PluginState::Running
            ) {
                anyhow::bail!("plugin '{}' is already {}", name, record.state);
            }

            record.epoch += 1;
            record.last_error = None;
            record.state = if record.manifest.needs_install(&record.dir) {
                PluginState::Installing
            } else {
                PluginState::Starting
            };
            (record.dir.clone(), record.manifest.clone(), record.epoch)
        };

        if manifest.needs_install(&dir) {
            if let Err(error) = self.run_install(name, &dir, &manifest).await {
                self.mark_crashed(name, epoch, &format!("install failed: {error:#}"));
                return Err(error.context(format!("install failed for plugin '{}'", name)));
            }
            self.set_state(name, epoch, PluginState::Starting);
        }

        let (worker, mut signals) = match WorkerHandle::spawn(&manifest, &dir, self.call_timeout) {
            Ok(pair) => pair,
            Err(error) => {
                self.mark_crashed(name, epoch, &format!("spawn failed: {error:#}"));
                return Err(error);
            }
        };

        let tools = match tokio::time::timeout(self.ready_timeout, signals.recv()).await {
            Ok(Some(WorkerSignal::Ready(tools))) => tools,
            Ok(Some(WorkerSignal::Fatal(message))) => {
                worker.kill().await;
                self.mark_crashed(name, epoch, &message);
                anyhow::bail!("plugin '{}' failed to load: {}", name, message);
            }
            Ok(Some(WorkerSignal::Exited)) | Ok(None) => {
                self.mark_crashed(name, epoch, "worker exited during handshake");
                anyhow::bail!("plugin '{}' exited before announcing ready", name);
            }
            Ok(Some(other)) => {
                worker.kill().await;
                let detail = format!("expected ready handshake, got {:?}", other);
                self.mark_crashed(name, epoch, &detail);
                anyhow::bail!("plugin '{}' broke protocol: {}", name, detail);
            }
            Err(_) => {
                worker.kill().await;
                let detail = format!("no ready within {:?}", self.ready_timeout);
                self.mark_crashed(name, epoch, &detail);
                anyhow::bail!("plugin '{}' timed out during handshake", name);
            }
        };

        let mut names = Vec::with_capacity(tools.len());
        for definition in tools {
            names.push(definition.name.clone());
            self.register_worker_tool(name, &worker, definition);
        }

        {
            let mut plugins = self.plugins.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(record) = plugins.get_mut(name) {
                record.state = PluginState::Running;
                record.tools = names.clone();
                record.worker = Some(Arc::clone(&worker));
            }
        }

        tracing::info!(plugin = %name, tools = ?names, "Plugin running");
        self.bus.publish(Event::new(
            EventKind::PluginStarted,
            json!({ "plugin": name, "tools": names }),
            "plugin_host",
        ));

        let host = Arc::clone(self);
        let plugin = name.to_string();
        tokio::spawn(async move {
            host.monitor(plugin, epoch, worker, &mut signals).await;
        });

        Ok(names)
    }

    /// Kill the worker and unregister its tools; on-disk state is kept.
    pub async fn stop(&self, name: &str) -> Result<()> {
        let worker = {
            let mut plugins = self.plugins.lock().unwrap_or_else(|e| e.into_inner());
            let record = plugins
                .get_mut(name)
                .with_context(|| format!("unknown plugin '{}'", name))?;
            if !matches!(record.state, PluginState::Running | PluginState::Starting) {
                anyhow::bail!("plugin '{}' is not running (state: {})", name, record.state);
            }
            record.state = PluginState::Stopped;
            record.tools.clear();
            record.worker.take()
        };

        self.registry.unregister_plugin(name);
        if let Some(worker) = worker {
            worker.fail_pending(&format!("plugin '{}' stopped", name));
            worker.kill().await;
        }

        tracing::info!(plugin = %name, "Plugin stopped");
        self.bus.publish(Event::new(
            EventKind::PluginStopped,
            json!({ "plugin": name }),
            "plugin_host",
        ));
        Ok(())
    }

    pub async fn restart(self: &Arc<Self>, name: &str) -> Result<Vec<String>> {
        let running = self
            .info(name)
            .map(|i| matches!(i.state, PluginState::Running | PluginState::Starting))
            .unwrap_or(false);
        if running {
            self.stop(name).await?;
        }
        self.start(name).await
    }

    /// Materialize dependencies without starting the worker.
    pub async fn install(&self, name: &str) -> Result<()> {
        let (dir, manifest) = self.idle_record(name)?;
        if manifest.install.is_none() {
            anyhow::bail!("plugin '{}' declares no install step", name);
        }
        if !manifest.needs_install(&dir) {
            tracing::info!(plugin = %name, "Dependencies already materialized");
            return Ok(());
        }
        self.run_install(name, &dir, &manifest).await
    }

    /// Delete the install marker so the next start reinstalls from scratch.
    pub async fn uninstall(&self, name: &str) -> Result<()> {
        let (dir, manifest) = self.idle_record(name)?;
        let install = manifest
            .install
            .as_ref()
            .with_context(|| format!("plugin '{}' declares no install step", name))?;
        let marker = dir.join(&install.marker);
        if marker.is_dir() {
            tokio::fs::remove_dir_all(&marker)
                .await
                .with_context(|| format!("Failed to remove {}", marker.display()))?;
        } else if marker.exists() {
            tokio::fs::remove_file(&marker)
                .await
                .with_context(|| format!("Failed to remove {}", marker.display()))?;
        }
        tracing::info!(plugin = %name, marker = %marker.display(), "Uninstalled dependencies");
        Ok(())
    }

    /// Stop the plugin if needed, then delete its files and forget it.
    pub async fn remove(&self, name: &str) -> Result<()> {
        let running = self
            .info(name)
            .map(|i| matches!(i.state, PluginState::Running | PluginState::Starting))
            .unwrap_or(false);
        if running {
            self.stop(name).await?;
        }

        let dir = {
            let mut plugins = self.plugins.lock().unwrap_or_else(|e| e.into_inner());
            let record = plugins
                .remove(name)
                .with_context(|| format!("unknown plugin '{}'", name))?;
            record.dir
        };
        tokio::fs::remove_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to delete plugin files: {}", dir.display()))?;
        tracing::info!(plugin = %name, dir = %dir.display(), "Plugin removed");
        Ok(())
    }

    /// Stop whichever plugin is running, if any. Used at shutdown.
    pub async fn stop_all(&self) {
        let running: Vec<String> = self
            .list()
            .into_iter()
            .filter(|i| matches!(i.state, PluginState::Running | PluginState::Starting))
            .map(|i| i.name)
            .collect();
        for name in running {
            if let Err(error) = self.stop(&name).await {
                tracing::warn!(plugin = %name, error = %error, "Failed to stop plugin at shutdown");
            }
        }
    }

    fn idle_record(&self, name: &str) -> Result<(PathBuf, PluginManifest)> {
        let plugins = self.plugins.lock().unwrap_or_else(|e| e.into_inner());
        let record = plugins
            .get(name)
            .with_context(|| format!("unknown plugin '{}'", name))?;
        if matches!(
            record.state,
            PluginState::Installing | PluginState::Starting | PluginState::Running
        ) {
            anyhow::bail!("plugin '{}' is {}; stop it first", name, record.state);
        }
        Ok((record.dir.clone(), record.manifest.clone()))
    }

    async fn run_install(&self, name: &str, dir: &std::path::Path, manifest: &PluginManifest) -> Result<()> {
        let install = manifest
            .install
            .as_ref()
            .context("no install step declared")?;
        tracing::info!(
            plugin = %name,
            command = %install.command,
            timeout = ?self.install_timeout,
            "Installing plugin dependencies"
        );

        let output = tokio::time::timeout(
            self.install_timeout,
            tokio::process::Command::new(&install.command)
                .args(&install.args)
                .current_dir(dir)
                .output(),
        )
        .await
        .map_err(|_| {
            anyhow::anyhow!(
                "install for plugin '{}' timed out after {:?}",
                name,
                self.install_timeout
            )
        })?
        .with_context(|| format!("Failed to run install command '{}'", install.command))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!(
                "install command exited with {:?}: {}",
                output.status.code(),
                stderr.chars().take(500).collect::<String>()
            );
        }
        tracing::info!(plugin = %name, "Install complete");
        Ok(())
    }

    fn register_worker_tool(
        &self,
        plugin: &str,
        worker: &Arc<WorkerHandle>,
        definition: switchyard_core::ToolDefinition,
    ) {
        let tool_name = definition.name.clone();
        self.registry.register(RegisteredTool {
            definition,
            origin: ToolOrigin::Plugin(plugin.to_string()),
            handler: Arc::new(PluginToolHandler {
                worker: Arc::clone(worker),
                tool: tool_name.clone(),
            }),
        });
        self.bus.publish(Event::new(
            EventKind::PluginToolRegistered,
            json!({ "plugin": plugin, "tool": tool_name }),
            "plugin_host",
        ));
    }

    /// Consume a running worker's out-of-band signals until its process goes
    /// away. Runs as its own task per start.
    async fn monitor(
        self: Arc<Self>,
        plugin: String,
        epoch: u64,
        worker: Arc<WorkerHandle>,
        signals: &mut mpsc::UnboundedReceiver<WorkerSignal>,
    ) {
        while let Some(signal) = signals.recv().await {
            match signal {
                WorkerSignal::RegisterTool(definition) => {
                    if !self.is_current(&plugin, epoch) {
                        continue;
                    }
                    let tool_name = definition.name.clone();
                    self.register_worker_tool(&plugin, &worker, definition);
                    let mut plugins = self.plugins.lock().unwrap_or_else(|e| e.into_inner());
                    if let Some(record) = plugins.get_mut(&plugin) {
                        record.tools.push(tool_name);
                    }
                }
                WorkerSignal::EmitEvent { event, payload } => {
                    match event.parse::<EventKind>() {
                        Ok(kind) => {
                            self.bus.publish(Event::new(
                                kind,
                                payload,
                                format!("plugin:{}", plugin),
                            ));
                        }
                        Err(error) => {
                            tracing::warn!(plugin = %plugin, event = %event, error = %error, "Rejecting worker event with unknown kind");
                        }
                    }
                }
                WorkerSignal::Fatal(message) => {
                    tracing::warn!(plugin = %plugin, message = %message, "Worker reported fatal error");
                    let mut plugins = self.plugins.lock().unwrap_or_else(|e| e.into_inner());
                    if let Some(record) = plugins.get_mut(&plugin) {
                        record.last_error = Some(message);
                    }
                }
                WorkerSignal::Ready(_) => {
                    tracing::warn!(plugin = %plugin, "Ignoring duplicate ready handshake");
                }
                WorkerSignal::Exited => {
                    self.handle_exit(&plugin, epoch, &worker);
                    break;
                }
            }
        }
    }

    fn is_current(&self, plugin: &str, epoch: u64) -> bool {
        let plugins = self.plugins.lock().unwrap_or_else(|e| e.into_inner());
        plugins
            .get(plugin)
            .map(|r| r.epoch == epoch && r.state == PluginState::Running)
            .unwrap_or(false)
    }

    /// Crash repair: registry cleaned atomically, pending calls resolved as
    /// errors, state recorded, event published. No automatic restart.
    fn handle_exit(&self, plugin: &str, epoch: u64, worker: &Arc<WorkerHandle>) {
        {
            let mut plugins = self.plugins.lock().unwrap_or_else(|e| e.into_inner());
            let Some(record) = plugins.get_mut(plugin) else {
                return;
            };
            if record.epoch != epoch || record.state != PluginState::Running {
                // Intentional stop or a newer incarnation owns this record.
                return;
            }
            record.state = PluginState::Crashed;
            record.last_error = Some("worker exited unexpectedly".to_string());
            record.tools.clear();
            record.worker = None;
        }

        let removed = self.registry.unregister_plugin(plugin);
        worker.fail_pending(&format!("plugin '{}' crashed", plugin));
        metrics::record_plugin_crash(plugin);
        tracing::error!(plugin = %plugin, tools = ?removed, "Plugin worker crashed");
        self.bus.publish(Event::new(
            EventKind::PluginCrashed,
            json!({ "plugin": plugin, "tools": removed }),
            "plugin_host",
        ));
    }

    fn set_state(&self, plugin: &str, epoch: u64, state: PluginState) {
        let mut plugins = self.plugins.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(record) = plugins.get_mut(plugin) {
            if record.epoch == epoch {
                record.state = state;
            }
        }
    }

    fn mark_crashed(&self, plugin: &str, epoch: u64, detail: &str) {
        tracing::error!(plugin = %plugin, detail = %detail, "Plugin failed to start");
        let mut plugins = self.plugins.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(record) = plugins.get_mut(plugin) {
            if record.epoch == epoch {
                record.state = PluginState::Crashed;
                record.last_error = Some(detail.to_string());
                record.worker = None;
            }
        }
    }
}

/// Registry-facing adapter: one plugin tool as an async handler.
struct PluginToolHandler {
    worker: Arc<WorkerHandle>,
    tool: String,
}

#[async_trait]
impl ToolHandler for PluginToolHandler {
    async fn invoke(&self, arguments: Value, cancel: CancellationToken) -> Result<Value> {
        tokio::select! {
            _ = cancel.cancelled() => {
                anyhow::bail!("tool '{}' cancelled", self.tool)
            }
            outcome = self.worker.call(&self.tool, arguments) => {
                let output = outcome?;
                if output.is_error {
                    match output.output {
                        Value::String(message) => anyhow::bail!("{}", message),
                        other => anyhow::bail!("{}", other),
                    }
                }
                Ok(output.output)
            }
        }
    }
}
