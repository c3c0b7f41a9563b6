// ABOUTME: Configuration parsing from TOML file with environment variable overrides.
// ABOUTME: Validates required fields and provides sensible defaults for optional ones.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::governor::GovernorConfig;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GatewayConfig {
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub plugins: PluginsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_queue_cap")]
    pub cap: usize,
    #[serde(default = "default_dedup_window_ms")]
    pub dedup_window_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Provider kind for the default agent: "mock" until a real provider is
    /// wired by the embedding application.
    #[serde(rename = "type", default = "default_provider_type")]
    pub provider_type: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    #[serde(default = "default_history_char_budget")]
    pub history_char_budget: usize,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginsConfig {
    /// Directory scanned for plugin bundles. Defaults under the platform
    /// data dir.
    #[serde(default)]
    pub dir: Option<PathBuf>,
    #[serde(default = "default_ready_timeout_secs")]
    pub ready_timeout_secs: u64,
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
    #[serde(default = "default_install_timeout_secs")]
    pub install_timeout_secs: u64,
}

fn default_queue_cap() -> usize {
    20
}

fn default_dedup_window_ms() -> u64 {
    2_000
}

fn default_provider_type() -> String {
    "mock".to_string()
}

fn default_model() -> String {
    "default".to_string()
}

fn default_max_iterations() -> usize {
    10
}

fn default_history_char_budget() -> usize {
    32_000
}

fn default_system_prompt() -> String {
    "You are a helpful assistant reachable over chat.".to_string()
}

fn default_ready_timeout_secs() -> u64 {
    10
}

fn default_call_timeout_secs() -> u64 {
    30
}

fn default_install_timeout_secs() -> u64 {
    300
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            cap: default_queue_cap(),
            dedup_window_ms: default_dedup_window_ms(),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            provider_type: default_provider_type(),
            model: default_model(),
            max_iterations: default_max_iterations(),
            history_char_budget: default_history_char_budget(),
            system_prompt: default_system_prompt(),
        }
    }
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            dir: None,
            ready_timeout_secs: default_ready_timeout_secs(),
            call_timeout_secs: default_call_timeout_secs(),
            install_timeout_secs: default_install_timeout_secs(),
        }
    }
}

impl GatewayConfig {
    /// Load from a TOML file, then apply environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let mut config: GatewayConfig = toml::from_str(&raw)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment overrides; used when no config file exists.
    pub fn from_env() -> Self {
        let mut config = GatewayConfig::default();
        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(dir) = std::env::var("SWITCHYARD_PLUGINS_DIR") {
            if !dir.is_empty() {
                self.plugins.dir = Some(PathBuf::from(dir));
            }
        }
        if let Ok(cap) = std::env::var("SWITCHYARD_QUEUE_CAP") {
            if let Ok(cap) = cap.parse() {
                self.queue.cap = cap;
            }
        }
    }

    fn validate(&self) -> Result<()> {
        if self.queue.cap == 0 {
            anyhow::bail!("queue.cap must be at least 1");
        }
        if self.agent.max_iterations == 0 {
            anyhow::bail!("agent.max_iterations must be at least 1");
        }
        Ok(())
    }

    pub fn governor(&self) -> GovernorConfig {
        GovernorConfig {
            queue_cap: self.queue.cap,
            dedup_window: Duration::from_millis(self.queue.dedup_window_ms),
        }
    }

    /// Resolved plugins directory, falling back to the platform data dir.
    pub fn plugins_dir(&self) -> PathBuf {
        if let Some(dir) = &self.plugins.dir {
            return dir.clone();
        }
        directories::ProjectDirs::from("", "", "switchyard")
            .map(|dirs| dirs.data_dir().join("plugins"))
            .unwrap_or_else(|| PathBuf::from("plugins"))
    }
}
