use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use serde_json::Value;

use super::postgres_changes::{PostgresChangesFilter, PostgresChangesPayload};
use super::presence::{PresenceMeta, PresenceState};
use super::state::SubscriptionStatus;
use crate::messaging::ChannelEvent;
use crate::types::{RealtimeError, WILDCARD};

// ── Callback type aliases ─────────────────────────────────────────────────────

pub type SubscribeCallback =
    Box<dyn FnOnce(SubscriptionStatus, Option<RealtimeError>) + Send + 'static>;

pub type EventCallback = Arc<dyn Fn(Value) + Send + Sync + 'static>;

pub type BroadcastCallback = Arc<dyn Fn(Value) + Send + Sync + 'static>;

pub type PostgresChangesCallback = Arc<dyn Fn(PostgresChangesPayload) + Send + Sync + 'static>;

pub type PresenceSyncCallback = Arc<dyn Fn(&PresenceState) + Send + Sync + 'static>;

/// Receives the presence key and the metas that joined or left under it.
pub type PresenceChangeCallback = Arc<dyn Fn(String, Vec<PresenceMeta>) + Send + Sync + 'static>;

// ── Binding ───────────────────────────────────────────────────────────────────

/// A registered interest on a channel. Immutable once registered.
#[derive(Clone)]
pub(crate) enum Binding {
    Event {
        event: ChannelEvent,
        callback: EventCallback,
    },
    Broadcast {
        event: String,
        callback: BroadcastCallback,
    },
    PostgresChanges {
        filter: PostgresChangesFilter,
        callback: PostgresChangesCallback,
    },
    PresenceSync(PresenceSyncCallback),
    PresenceJoin(PresenceChangeCallback),
    PresenceLeave(PresenceChangeCallback),
}

impl Binding {
    pub fn matches_broadcast(&self, event: &str) -> Option<&BroadcastCallback> {
        match self {
            Self::Broadcast { event: bound, callback } if bound == event || bound == WILDCARD => {
                Some(callback)
            }
            _ => None,
        }
    }

    pub fn matches_postgres(
        &self,
        payload: &PostgresChangesPayload,
    ) -> Option<&PostgresChangesCallback> {
        match self {
            Self::PostgresChanges { filter, callback } if filter.matches(payload) => Some(callback),
            _ => None,
        }
    }

    pub fn matches_event(&self, event: &ChannelEvent) -> Option<&EventCallback> {
        match self {
            Self::Event { event: bound, callback } if bound == event => Some(callback),
            _ => None,
        }
    }
}

/// Runs one listener. A panicking listener is logged and does not stop the others.
pub(crate) fn invoke_isolated<F: FnOnce()>(topic: &str, kind: &str, listener: F) {
    if catch_unwind(AssertUnwindSafe(listener)).is_err() {
        tracing::error!(
            "Listener for '{}' on channel {} panicked; continuing",
            kind,
            topic
        );
    }
}
