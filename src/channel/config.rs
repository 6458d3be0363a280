use super::postgres_changes::{PostgresChangeEvent, PostgresChangesFilter};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BroadcastConfig {
    /// Enable client to receive messages it broadcast
    #[serde(rename = "self")]
    pub self_: bool,
    /// Instruct server to acknowledge broadcast receipt
    pub ack: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PresenceConfig {
    /// Track presence payload across clients
    pub key: String,
    /// Enable presence tracking
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresChangesConfig {
    pub event: PostgresChangeEvent,
    pub schema: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
}

impl From<&PostgresChangesFilter> for PostgresChangesConfig {
    fn from(filter: &PostgresChangesFilter) -> Self {
        Self {
            event: filter.event.clone(),
            schema: filter.schema.clone(),
            table: filter.table.clone(),
            filter: filter.filter.clone(),
        }
    }
}

/// Channel join payload configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChannelJoinConfig {
    pub broadcast: BroadcastConfig,
    pub presence: PresenceConfig,
    #[serde(rename = "private")]
    pub is_private: bool,
    #[serde(default)]
    pub postgres_changes: Vec<PostgresChangesConfig>,
}

/// Full join payload sent to server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinPayload {
    pub config: ChannelJoinConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
}
