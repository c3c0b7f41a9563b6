// ABOUTME: Event model for the gateway bus -- a closed set of event kinds plus an immutable envelope.
// ABOUTME: Kinds use colon-separated wire names ("message:inbound") shared with external transports.

use chrono::{DateTime, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::ids::CorrelationId;

/// Closed set of event kinds carried on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    // Message lifecycle
    MessageInbound,
    MessageOutbound,
    MessageDelivered,
    MessageFailed,
    MessageQueued,
    // Session lifecycle
    SessionStarted,
    SessionEnded,
    // Agent lifecycle
    AgentThinking,
    AgentStreamStart,
    AgentStreamDelta,
    AgentStreamEnd,
    AgentIntermediate,
    AgentResponse,
    AgentToolUse,
    AgentAborted,
    // Channel lifecycle
    ChannelConnected,
    ChannelDisconnected,
    // Plugin lifecycle
    PluginStarted,
    PluginStopped,
    PluginCrashed,
    PluginToolRegistered,
    // System lifecycle
    SystemStartup,
    SystemShutdown,
    SystemError,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MessageInbound => "message:inbound",
            Self::MessageOutbound => "message:outbound",
            Self::MessageDelivered => "message:delivered",
            Self::MessageFailed => "message:failed",
            Self::MessageQueued => "message:queued",
            Self::SessionStarted => "session:started",
            Self::SessionEnded => "session:ended",
            Self::AgentThinking => "agent:thinking",
            Self::AgentStreamStart => "agent:stream_start",
            Self::AgentStreamDelta => "agent:stream_delta",
            Self::AgentStreamEnd => "agent:stream_end",
            Self::AgentIntermediate => "agent:intermediate",
            Self::AgentResponse => "agent:response",
            Self::AgentToolUse => "agent:tool_use",
            Self::AgentAborted => "agent:aborted",
            Self::ChannelConnected => "channel:connected",
            Self::ChannelDisconnected => "channel:disconnected",
            Self::PluginStarted => "plugin:started",
            Self::PluginStopped => "plugin:stopped",
            Self::PluginCrashed => "plugin:crashed",
            Self::PluginToolRegistered => "plugin:tool_registered",
            Self::SystemStartup => "system:startup",
            Self::SystemShutdown => "system:shutdown",
            Self::SystemError => "system:error",
        }
    }

    /// All kinds, for exhaustive wire-name checks.
    pub const ALL: &'static [EventKind] = &[
        Self::MessageInbound,
        Self::MessageOutbound,
        Self::MessageDelivered,
        Self::MessageFailed,
        Self::MessageQueued,
        Self::SessionStarted,
        Self::SessionEnded,
        Self::AgentThinking,
        Self::AgentStreamStart,
        Self::AgentStreamDelta,
        Self::AgentStreamEnd,
        Self::AgentIntermediate,
        Self::AgentResponse,
        Self::AgentToolUse,
        Self::AgentAborted,
        Self::ChannelConnected,
        Self::ChannelDisconnected,
        Self::PluginStarted,
        Self::PluginStopped,
        Self::PluginCrashed,
        Self::PluginToolRegistered,
        Self::SystemStartup,
        Self::SystemShutdown,
        Self::SystemError,
    ];
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| anyhow::anyhow!("unknown event kind: {}", s))
    }
}

impl Serialize for EventKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EventKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}

/// An event published on the bus. Immutable once published; subscribers
/// receive clones and never a shared mutable view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub kind: EventKind,
    pub payload: Value,
    /// Which component published this (e.g. "governor", "agent", "plugin:weather").
    pub source: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<CorrelationId>,
}

impl Event {
    pub fn new(kind: EventKind, payload: Value, source: impl Into<String>) -> Self {
        Self {
            kind,
            payload,
            source: source.into(),
            timestamp: Utc::now(),
            correlation_id: None,
        }
    }

    pub fn with_correlation(mut self, correlation_id: CorrelationId) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_kind_roundtrip() {
        for kind in EventKind::ALL {
            let parsed: EventKind = kind.as_str().parse().unwrap();
            assert_eq!(parsed, *kind);
        }
    }

    #[test]
    fn test_event_kind_unknown() {
        assert!("message:bogus".parse::<EventKind>().is_err());
        assert!("".parse::<EventKind>().is_err());
    }

    #[test]
    fn test_event_kind_serde_uses_wire_name() {
        let json = serde_json::to_string(&EventKind::AgentStreamDelta).unwrap();
        assert_eq!(json, "\"agent:stream_delta\"");
        let back: EventKind = serde_json::from_str(&json).unwrap();
        assert_eq!(back, EventKind::AgentStreamDelta);
    }

    #[test]
    fn test_event_construction() {
        let correlation = CorrelationId::generate();
        let event = Event::new(
            EventKind::MessageInbound,
            json!({"content": "hello"}),
            "gateway",
        )
        .with_correlation(correlation.clone());

        assert_eq!(event.kind, EventKind::MessageInbound);
        assert_eq!(event.source, "gateway");
        assert_eq!(event.correlation_id, Some(correlation));
        assert_eq!(event.payload["content"], "hello");
    }
}
