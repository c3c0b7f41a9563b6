// ABOUTME: Gateway assembly and the inbound-message dispatcher.
// ABOUTME: Everything is explicitly constructed and owned here; tests build isolated instances.

use anyhow::{Context, Result};
use serde_json::json;
use std::sync::Arc;

use switchyard_agent::{
    AgentDirectory, AgentProfile, AgentRunner, ChatProvider, HistoryStore, MockProvider,
    ProviderConfig, RegexNarrationClassifier,
};
use switchyard_core::{
    metrics, AgentId, CorrelationId, Event, EventBus, EventKind, GatewayConfig, Governor,
    InboundMessage, QueuedMessage, RunTicket, SubmitOutcome, ToolRegistry, Topic,
};

use crate::plugin::{PluginAdminTool, PluginHost};

pub const DEFAULT_AGENT: &str = "assistant";

/// The assembled gateway: bus, governor, registry, history, agents, plugins.
/// No globals; construct as many as you like side by side.
pub struct Gateway {
    pub bus: Arc<EventBus>,
    pub governor: Arc<Governor>,
    pub registry: Arc<ToolRegistry>,
    pub history: Arc<HistoryStore>,
    pub directory: Arc<AgentDirectory>,
    pub plugin_host: Arc<PluginHost>,
    runner: Arc<AgentRunner>,
    config: GatewayConfig,
}

impl Gateway {
    /// Build with the provider named in the config. Only "mock" is wired
    /// here; embedders supply real providers via [`Gateway::with_provider`].
    pub fn build(config: GatewayConfig) -> Result<Arc<Self>> {
        let provider: Arc<dyn ChatProvider> = match config.agent.provider_type.as_str() {
            "mock" => Arc::new(MockProvider::new()),
            other => anyhow::bail!(
                "unknown provider type '{}'; pass a provider with Gateway::with_provider",
                other
            ),
        };
        Ok(Self::with_provider(config, provider))
    }

    pub fn with_provider(config: GatewayConfig, provider: Arc<dyn ChatProvider>) -> Arc<Self> {
        let bus = Arc::new(EventBus::new());
        let governor = Arc::new(Governor::new(config.governor()));
        let registry = Arc::new(ToolRegistry::new());
        let history = Arc::new(HistoryStore::new(config.agent.history_char_budget));

        let directory = Arc::new(AgentDirectory::new(AgentId::new(DEFAULT_AGENT)));
        directory.register(AgentProfile {
            id: AgentId::new(DEFAULT_AGENT),
            provider,
            provider_config: ProviderConfig {
                model: config.agent.model.clone(),
                max_tokens: None,
                temperature: None,
            },
            system_prompt: config.agent.system_prompt.clone(),
            tool_filter: switchyard_core::ToolFilter::allow_all(),
        });

        let plugin_host = Arc::new(PluginHost::new(
            Arc::clone(&bus),
            Arc::clone(&registry),
            config.plugins_dir(),
            &config.plugins,
        ));
        registry.register(PluginAdminTool::registered(Arc::clone(&plugin_host)));

        let runner = Arc::new(AgentRunner::new(
            Arc::clone(&bus),
            Arc::clone(&registry),
            Arc::clone(&history),
            Arc::clone(&directory),
            Arc::new(RegexNarrationClassifier::new()),
            config.agent.max_iterations,
        ));

        Arc::new(Self {
            bus,
            governor,
            registry,
            history,
            directory,
            plugin_host,
            runner,
            config,
        })
    }

    /// Subscribe the dispatcher to `message:inbound`. Call once after build.
    pub fn wire(self: &Arc<Self>) {
        let gateway = Arc::clone(self);
        self.bus
            .subscribe(Topic::Kind(EventKind::MessageInbound), move |event| {
                let gateway = Arc::clone(&gateway);
                async move { gateway.handle_inbound(event).await }
            });
    }

    /// Announce startup and pick up on-disk plugins.
    pub fn startup(&self) {
        let plugins = self.plugin_host.discover();
        tracing::info!(plugins = plugins.len(), "Gateway starting");
        self.bus.publish(Event::new(
            EventKind::SystemStartup,
            json!({ "version": env!("CARGO_PKG_VERSION"), "plugins": plugins.len() }),
            "gateway",
        ));
    }

    /// Stop any running plugin and announce shutdown.
    pub async fn shutdown(&self) {
        self.plugin_host.stop_all().await;
        self.bus.publish(Event::new(
            EventKind::SystemShutdown,
            json!({}),
            "gateway",
        ));
    }

    /// Cancel the active run for a conversation and drop its queue.
    pub fn abort_conversation(&self, key: &switchyard_core::ConversationKey) {
        self.governor.abort(key);
    }

    async fn handle_inbound(self: Arc<Self>, event: Event) -> Result<()> {
        let message: InboundMessage = serde_json::from_value(event.payload["message"].clone())
            .context("message:inbound payload missing a valid 'message'")?;
        let target_agent = event.payload["target_agent"]
            .as_str()
            .map(AgentId::new)
            .unwrap_or_else(|| AgentId::new(DEFAULT_AGENT));
        let correlation_id = event
            .correlation_id
            .clone()
            .unwrap_or_else(CorrelationId::generate);

        metrics::record_message_inbound();
        tracing::info!(
            msg_id = %message.id,
            channel = %message.channel_kind,
            agent = %target_agent,
            "Inbound message"
        );

        match self.governor.submit(message, target_agent, correlation_id.clone()) {
            SubmitOutcome::Dispatched(job, ticket) => {
                let gateway = Arc::clone(&self);
                tokio::spawn(async move {
                    gateway.run_and_drain(job, ticket).await;
                });
            }
            SubmitOutcome::Queued { depth } => {
                metrics::record_message_queued();
                self.bus.publish(
                    Event::new(
                        EventKind::MessageQueued,
                        json!({ "queue_depth": depth }),
                        "governor",
                    )
                    .with_correlation(correlation_id),
                );
            }
            SubmitOutcome::Duplicate => {}
        }
        Ok(())
    }

    /// Run the dispatched message, then keep draining the lane's FIFO until
    /// it is empty. The governor is completed on every exit path.
    async fn run_and_drain(self: Arc<Self>, job: QueuedMessage, ticket: RunTicket) {
        let mut current = Some((job, ticket));
        while let Some((job, ticket)) = current.take() {
            let key = ticket.key.clone();
            self.runner.run(job, &ticket).await;
            current = self.governor.complete_run(&key);
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }
}
