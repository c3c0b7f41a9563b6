// ABOUTME: Branded identifier newtypes so channel, user, agent, and call ids can't be mixed up.
// ABOUTME: All are zero-cost wrappers over String with serde transparency.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(
    /// Channel-scoped conversation identifier (room id, chat id, connection id).
    ChannelId
);
string_id!(
    /// Platform-scoped user identifier.
    UserId
);
string_id!(
    /// Name of a configured agent.
    AgentId
);
string_id!(
    /// Provider-assigned tool invocation id, echoed back unchanged in results.
    ToolCallId
);

/// Correlation id threading one inbound message and everything it causes
/// through the whole system. Generated once per inbound message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of one ongoing exchange: (channel kind, channel-scoped id, user).
///
/// The governor keys its per-conversation state on this; at most one run may
/// be active per key at any instant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationKey {
    pub channel_kind: String,
    pub channel_id: ChannelId,
    pub user_id: UserId,
}

impl ConversationKey {
    pub fn new(
        channel_kind: impl Into<String>,
        channel_id: impl Into<ChannelId>,
        user_id: impl Into<UserId>,
    ) -> Self {
        Self {
            channel_kind: channel_kind.into(),
            channel_id: channel_id.into(),
            user_id: user_id.into(),
        }
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.channel_kind, self.channel_id, self.user_id
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_distinct_types() {
        let channel = ChannelId::new("!room:example.org");
        let user = UserId::new("@user:example.org");
        assert_eq!(channel.as_str(), "!room:example.org");
        assert_eq!(user.as_str(), "@user:example.org");
    }

    #[test]
    fn test_conversation_key_display() {
        let key = ConversationKey::new("matrix", "!room:example.org", "@user:example.org");
        assert_eq!(key.to_string(), "matrix:!room:example.org:@user:example.org");
    }

    #[test]
    fn test_conversation_key_equality() {
        let a = ConversationKey::new("telegram", "12345", "67890");
        let b = ConversationKey::new("telegram", "12345", "67890");
        let c = ConversationKey::new("telegram", "12345", "99999");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_correlation_id_unique() {
        let a = CorrelationId::generate();
        let b = CorrelationId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn test_id_serde_transparent() {
        let id = AgentId::new("assistant");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"assistant\"");
        let back: AgentId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
