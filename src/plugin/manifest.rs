// ABOUTME: Plugin manifest (plugin.toml) parsing and plugins-directory discovery.
// ABOUTME: Discovery never starts a process; invalid bundles are logged and skipped.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const MANIFEST_FILE: &str = "plugin.toml";

/// On-disk description of one plugin bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginManifest {
    pub name: String,
    pub version: String,
    /// Interpreter or launcher, e.g. "python3" or "node".
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Entry module, relative to the plugin directory. Handed to the worker
    /// as its single positional argument.
    pub entry: String,
    #[serde(default)]
    pub install: Option<InstallSpec>,
}

/// Optional dependency-materialization step run before first start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallSpec {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Path relative to the plugin directory whose existence means the
    /// dependencies are already materialized (e.g. "node_modules").
    pub marker: String,
}

impl PluginManifest {
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(MANIFEST_FILE);
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read manifest: {}", path.display()))?;
        let manifest: PluginManifest = toml::from_str(&raw)
            .with_context(|| format!("Failed to parse manifest: {}", path.display()))?;
        manifest.validate(dir)?;
        Ok(manifest)
    }

    fn validate(&self, dir: &Path) -> Result<()> {
        if self.name.trim().is_empty() {
            anyhow::bail!("manifest name must not be empty");
        }
        if self.name.contains(['/', '\\', '\0']) {
            anyhow::bail!("manifest name contains path separators: {}", self.name);
        }
        let entry = dir.join(&self.entry);
        if !entry.exists() {
            anyhow::bail!("entry point does not exist: {}", entry.display());
        }
        Ok(())
    }

    pub fn entry_path(&self, dir: &Path) -> PathBuf {
        dir.join(&self.entry)
    }

    /// Whether the install step still needs to run.
    pub fn needs_install(&self, dir: &Path) -> bool {
        match &self.install {
            Some(install) => !dir.join(&install.marker).exists(),
            None => false,
        }
    }
}

/// Scan `dir` for plugin bundles. Entries without a valid manifest are
/// skipped with a warning. Sorted by name for stable listings.
pub fn discover(dir: &Path) -> Vec<(PathBuf, PluginManifest)> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(error) => {
            tracing::debug!(dir = %dir.display(), error = %error, "Plugins directory not readable");
            return Vec::new();
        }
    };

    let mut found = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        if !path.join(MANIFEST_FILE).exists() {
            continue;
        }
        match PluginManifest::load(&path) {
            Ok(manifest) => {
                tracing::debug!(plugin = %manifest.name, dir = %path.display(), "Discovered plugin");
                found.push((path, manifest));
            }
            Err(error) => {
                tracing::warn!(dir = %path.display(), error = %error, "Skipping invalid plugin bundle");
            }
        }
    }
    found.sort_by(|(_, a), (_, b)| a.name.cmp(&b.name));
    found
}
