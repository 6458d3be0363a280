use super::binding::{Binding, SubscribeCallback};
use super::presence::Presence;
use super::push::Push;
use std::collections::HashMap;
use std::sync::Arc;

/// Channel status enum
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
    Closed,
    Errored,
    Joined,
    Joining,
    Leaving,
}

impl ChannelStatus {
    /// Statuses re-joined after the socket reconnects
    pub fn is_rejoin_eligible(self) -> bool {
        matches!(self, Self::Joined | Self::Joining)
    }
}

/// Outcome reported to the `subscribe` callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionStatus {
    Subscribed,
    TimedOut,
    Closed,
    ChannelError,
}

/// Mutable state for a RealtimeChannel
pub(crate) struct ChannelState {
    pub status: ChannelStatus,
    pub bindings: Vec<Binding>,
    pub pending_pushes: HashMap<String, Arc<Push>>,
    pub presence: Presence,
    pub join_ref: Option<String>,
    /// The current join frame sits in the send buffer and goes out with the next flush
    pub join_buffered: bool,
    pub subscribe_callback: Option<SubscribeCallback>,
    pub access_token: Option<String>,
}

impl ChannelState {
    pub fn new(access_token: Option<String>) -> Self {
        Self {
            status: ChannelStatus::Closed,
            bindings: Vec::new(),
            pending_pushes: HashMap::new(),
            presence: Presence::default(),
            join_ref: None,
            join_buffered: false,
            subscribe_callback: None,
            access_token,
        }
    }

    /// Drops every outstanding push and cancels their timeouts
    pub fn clear_pending_pushes(&mut self) {
        for (_, push) in self.pending_pushes.drain() {
            push.cancel_timeout();
        }
    }
}

impl Default for ChannelState {
    fn default() -> Self {
        Self::new(None)
    }
}
