// Module declarations
mod binding;
mod config;
mod core;
mod postgres_changes;
mod presence;
mod push;
mod state;

// Public API exports
pub use binding::{
    BroadcastCallback, EventCallback, PostgresChangesCallback, PresenceChangeCallback,
    PresenceSyncCallback, SubscribeCallback,
};
pub(crate) use self::core::ChannelContext;
pub use self::core::{RealtimeChannel, RealtimeChannelOptions};
pub use config::{
    BroadcastConfig, ChannelJoinConfig, JoinPayload, PostgresChangesConfig, PresenceConfig,
};
pub use postgres_changes::{
    ColumnInfo, PostgresChangeEvent, PostgresChangesFilter, PostgresChangesPayload,
    PostgresChangesPayloadBase, PostgresDeletePayload, PostgresInsertPayload,
    PostgresUpdatePayload, Record,
};
pub use presence::{
    Presence, PresenceChanges, PresenceMeta, PresenceState, RawPresenceDiff, RawPresenceState,
};
pub use push::Push;
pub use state::{ChannelStatus, SubscriptionStatus};
