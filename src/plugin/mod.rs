// ABOUTME: Plugin subsystem -- manifest discovery, worker processes, lifecycle host, admin tool.
// ABOUTME: Workers are separate OS processes speaking line-delimited JSON; nothing loads in-process.

pub mod admin_tool;
pub mod host;
pub mod manifest;
pub mod protocol;
pub mod worker;

pub use admin_tool::{PluginAdminTool, PLUGIN_ADMIN_TOOL};
pub use host::{PluginHost, PluginInfo, PluginState};
pub use manifest::{InstallSpec, PluginManifest, MANIFEST_FILE};
pub use protocol::{HostMessage, WorkerMessage};
pub use worker::{CallOutput, WorkerHandle, WorkerSignal};
