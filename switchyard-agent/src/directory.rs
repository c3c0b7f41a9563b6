// ABOUTME: Directory of configured agents -- provider handle, system prompt, and tool visibility per agent.
// ABOUTME: Inbound messages name a target agent; unknown targets fall back to the default.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use switchyard_core::{AgentId, ToolFilter};

use crate::provider::{ChatProvider, ProviderConfig};

/// Everything the run loop needs to drive one configured agent.
#[derive(Clone)]
pub struct AgentProfile {
    pub id: AgentId,
    pub provider: Arc<dyn ChatProvider>,
    pub provider_config: ProviderConfig,
    pub system_prompt: String,
    pub tool_filter: ToolFilter,
}

/// Registry of configured agents keyed by id, with a designated default.
pub struct AgentDirectory {
    agents: Mutex<HashMap<AgentId, Arc<AgentProfile>>>,
    default_agent: AgentId,
}

impl AgentDirectory {
    pub fn new(default_agent: AgentId) -> Self {
        Self {
            agents: Mutex::new(HashMap::new()),
            default_agent,
        }
    }

    pub fn register(&self, profile: AgentProfile) {
        let mut agents = self.agents.lock().unwrap_or_else(|e| e.into_inner());
        tracing::info!(agent = %profile.id, provider = profile.provider.name(), "Registered agent");
        agents.insert(profile.id.clone(), Arc::new(profile));
    }

    pub fn get(&self, id: &AgentId) -> Option<Arc<AgentProfile>> {
        let agents = self.agents.lock().unwrap_or_else(|e| e.into_inner());
        agents.get(id).cloned()
    }

    /// Profile for the named agent, falling back to the default. `None` only
    /// when not even the default is registered.
    pub fn resolve(&self, id: &AgentId) -> Option<Arc<AgentProfile>> {
        let agents = self.agents.lock().unwrap_or_else(|e| e.into_inner());
        agents
            .get(id)
            .or_else(|| {
                if *id != self.default_agent {
                    tracing::debug!(agent = %id, fallback = %self.default_agent, "Unknown agent, using default");
                }
                agents.get(&self.default_agent)
            })
            .cloned()
    }

    pub fn ids(&self) -> Vec<AgentId> {
        let agents = self.agents.lock().unwrap_or_else(|e| e.into_inner());
        let mut ids: Vec<AgentId> = agents.keys().cloned().collect();
        ids.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        ids
    }
}
