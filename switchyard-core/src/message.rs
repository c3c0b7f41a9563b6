// ABOUTME: Inbound and outbound message types exchanged with channel adapters over the bus.
// ABOUTME: The core never inspects how a message arrived; adapters publish and deliver these.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{ChannelId, ConversationKey, CorrelationId, UserId};

/// A message entering the gateway from any source (channel adapter,
/// scheduled job, HTTP endpoint). Carried as the payload of a
/// `message:inbound` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Channel-assigned event id, used for deduplication.
    pub id: String,
    /// Channel kind (e.g. "matrix", "telegram", "web").
    pub channel_kind: String,
    /// Channel-scoped conversation id.
    pub channel_id: ChannelId,
    /// Who sent the message.
    pub sender: UserId,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl InboundMessage {
    /// Derive the governor key for this message.
    pub fn conversation_key(&self) -> ConversationKey {
        ConversationKey::new(
            self.channel_kind.clone(),
            self.channel_id.clone(),
            self.sender.clone(),
        )
    }
}

/// A message leaving the gateway toward a channel. Carried as the payload
/// of a `message:outbound` event; an external channel router performs the
/// platform-specific delivery and reports back with `message:delivered` or
/// `message:failed`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub channel_kind: String,
    pub channel_id: ChannelId,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<CorrelationId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> InboundMessage {
        InboundMessage {
            id: "evt-1".to_string(),
            channel_kind: "matrix".to_string(),
            channel_id: ChannelId::new("!room:example.org"),
            sender: UserId::new("@user:example.org"),
            content: "hello".to_string(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_conversation_key_derivation() {
        let msg = sample();
        let key = msg.conversation_key();
        assert_eq!(key.channel_kind, "matrix");
        assert_eq!(key.channel_id.as_str(), "!room:example.org");
        assert_eq!(key.user_id.as_str(), "@user:example.org");
    }

    #[test]
    fn test_same_conversation_same_key() {
        let a = sample();
        let mut b = sample();
        b.id = "evt-2".to_string();
        b.content = "another".to_string();
        assert_eq!(a.conversation_key(), b.conversation_key());
    }

    #[test]
    fn test_inbound_message_serde() {
        let msg = sample();
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["channel_kind"], "matrix");
        let back: InboundMessage = serde_json::from_value(json).unwrap();
        assert_eq!(back.id, msg.id);
        assert_eq!(back.conversation_key(), msg.conversation_key());
    }
}
