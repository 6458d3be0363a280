use crate::types::constants::{channel_events, phoenix_events};
use serde::{Deserialize, Serialize};

/// Type-safe channel events.
///
/// Serialized as the bare event string used on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ChannelEvent {
    /// PostgreSQL database changes
    PostgresChanges,

    /// Broadcast envelope (the user event name lives in the payload)
    Broadcast,

    /// Presence track/untrack requests
    Presence,

    /// Full presence snapshot
    PresenceState,

    /// Incremental presence joins/leaves
    PresenceDiff,

    /// Access token refresh
    AccessToken,

    /// System events (phx_*)
    System(SystemEvent),

    /// Custom user-defined event
    Custom(String),
}

impl ChannelEvent {
    /// Parse a string into a ChannelEvent
    pub fn parse(s: &str) -> Self {
        match s {
            channel_events::POSTGRES_CHANGES => Self::PostgresChanges,
            channel_events::BROADCAST => Self::Broadcast,
            channel_events::PRESENCE => Self::Presence,
            channel_events::PRESENCE_STATE => Self::PresenceState,
            channel_events::PRESENCE_DIFF => Self::PresenceDiff,
            channel_events::ACCESS_TOKEN => Self::AccessToken,
            _ => match SystemEvent::parse(s) {
                Some(sys) => Self::System(sys),
                None => Self::Custom(s.to_string()),
            },
        }
    }

    /// Convert event to string representation
    pub fn as_str(&self) -> &str {
        match self {
            Self::PostgresChanges => channel_events::POSTGRES_CHANGES,
            Self::Broadcast => channel_events::BROADCAST,
            Self::Presence => channel_events::PRESENCE,
            Self::PresenceState => channel_events::PRESENCE_STATE,
            Self::PresenceDiff => channel_events::PRESENCE_DIFF,
            Self::AccessToken => channel_events::ACCESS_TOKEN,
            Self::System(sys) => sys.as_str(),
            Self::Custom(s) => s,
        }
    }
}

impl From<&str> for ChannelEvent {
    fn from(s: &str) -> Self {
        Self::parse(s)
    }
}

impl From<String> for ChannelEvent {
    fn from(s: String) -> Self {
        Self::parse(&s)
    }
}

impl From<ChannelEvent> for String {
    fn from(event: ChannelEvent) -> Self {
        match event {
            ChannelEvent::Custom(s) => s,
            other => other.as_str().to_string(),
        }
    }
}

impl std::fmt::Display for ChannelEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Phoenix system events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SystemEvent {
    Join,
    Leave,
    Reply,
    Close,
    Error,
    Heartbeat,
}

impl SystemEvent {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            phoenix_events::JOIN => Some(Self::Join),
            phoenix_events::LEAVE => Some(Self::Leave),
            phoenix_events::REPLY => Some(Self::Reply),
            phoenix_events::CLOSE => Some(Self::Close),
            phoenix_events::ERROR => Some(Self::Error),
            phoenix_events::HEARTBEAT => Some(Self::Heartbeat),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Join => phoenix_events::JOIN,
            Self::Leave => phoenix_events::LEAVE,
            Self::Reply => phoenix_events::REPLY,
            Self::Close => phoenix_events::CLOSE,
            Self::Error => phoenix_events::ERROR,
            Self::Heartbeat => phoenix_events::HEARTBEAT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_event_parse() {
        assert_eq!(
            ChannelEvent::parse("postgres_changes"),
            ChannelEvent::PostgresChanges
        );
        assert_eq!(ChannelEvent::parse("broadcast"), ChannelEvent::Broadcast);
        assert_eq!(ChannelEvent::parse("presence"), ChannelEvent::Presence);
        assert_eq!(
            ChannelEvent::parse("presence_diff"),
            ChannelEvent::PresenceDiff
        );
        assert_eq!(
            ChannelEvent::parse("phx_join"),
            ChannelEvent::System(SystemEvent::Join)
        );
        assert_eq!(
            ChannelEvent::parse("my_custom_event"),
            ChannelEvent::Custom("my_custom_event".to_string())
        );
    }

    #[test]
    fn test_unknown_phx_event_is_custom() {
        assert_eq!(
            ChannelEvent::parse("phx_unknown"),
            ChannelEvent::Custom("phx_unknown".to_string())
        );
    }

    #[test]
    fn test_system_event_strings() {
        let events = [
            SystemEvent::Join,
            SystemEvent::Leave,
            SystemEvent::Reply,
            SystemEvent::Close,
            SystemEvent::Error,
            SystemEvent::Heartbeat,
        ];

        for event in events {
            assert_eq!(SystemEvent::parse(event.as_str()), Some(event));
        }
    }

    #[test]
    fn test_serializes_as_plain_string() {
        let json = serde_json::to_string(&ChannelEvent::System(SystemEvent::Reply)).unwrap();
        assert_eq!(json, r#""phx_reply""#);

        let event: ChannelEvent = serde_json::from_str(r#""presence_state""#).unwrap();
        assert_eq!(event, ChannelEvent::PresenceState);
    }
}
