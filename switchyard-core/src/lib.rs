// ABOUTME: Core orchestration primitives for the switchyard gateway.
// ABOUTME: Event bus, per-conversation governor, tool registry, typed ids, config, metrics.

pub mod bus;
pub mod config;
pub mod event;
pub mod governor;
pub mod ids;
pub mod message;
pub mod metrics;
pub mod registry;

pub use bus::{EventBus, EventPredicate, SubscriptionId, Topic};
pub use config::GatewayConfig;
pub use event::{Event, EventKind};
pub use governor::{Governor, GovernorConfig, QueuedMessage, RunTicket, SubmitOutcome};
pub use ids::{AgentId, ChannelId, ConversationKey, CorrelationId, ToolCallId, UserId};
pub use message::{InboundMessage, OutboundMessage};
pub use registry::{
    RegisteredTool, ToolCall, ToolDefinition, ToolFilter, ToolHandler, ToolOrigin, ToolRegistry,
    ToolResult,
};
