use super::binding::{Binding, SubscribeCallback, invoke_isolated};
use super::config::{
    BroadcastConfig, ChannelJoinConfig, JoinPayload, PostgresChangesConfig, PresenceConfig,
};
use super::postgres_changes::{PostgresChangesFilter, PostgresChangesPayload};
use super::presence::{
    PresenceChanges, PresenceMeta, PresenceState, RawPresenceDiff, RawPresenceState,
};
use super::push::Push;
use super::state::{ChannelState, ChannelStatus, SubscriptionStatus};
use crate::client::ConnectionManager;
use crate::client::connection::{Delivery, lock};
use crate::infrastructure::HttpBroadcaster;
use crate::messaging::{ChannelEvent, SystemEvent};
use crate::types::{RealtimeError, RealtimeMessage, Result, reply_status};
use serde_json::Value;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

/// Configuration options for a realtime channel.
///
/// These options control broadcasting behavior, presence tracking, and access control.
#[derive(Debug, Clone, Default)]
pub struct RealtimeChannelOptions {
    /// Whether to receive your own broadcast messages. Default: `false`.
    pub broadcast_self: bool,
    /// Whether to receive acknowledgments for broadcast messages. Default: `false`.
    pub broadcast_ack: bool,
    /// Unique key for presence tracking. If `Some`, enables presence tracking.
    pub presence_key: Option<String>,
    /// Whether this is a private channel requiring authorization. Default: `false`.
    pub is_private: bool,
}

/// Settings a channel inherits from the client that created it
#[derive(Debug, Clone)]
pub(crate) struct ChannelContext {
    pub http_endpoint: String,
    pub api_key: String,
    pub push_timeout: Duration,
    pub access_token: Option<String>,
}

/// One subscription to a server-side topic.
///
/// A channel owns the join/leave state machine, its bindings and the presence
/// map of the topic. Frames are delivered to it by the client's router.
///
/// # Example
///
/// ```no_run
/// use phoenix_realtime_rs::{RealtimeChannelOptions, RealtimeClient, RealtimeClientOptions};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = RealtimeClient::new(
///     "wss://your-project.supabase.co/realtime/v1",
///     RealtimeClientOptions {
///         api_key: "your-anon-key".to_string(),
///         ..Default::default()
///     },
/// )?;
/// client.connect().await;
///
/// let channel = client.channel("room1", RealtimeChannelOptions::default());
/// channel.on_broadcast("move", |payload| println!("move: {payload}"));
/// channel.subscribe()?;
/// # Ok(())
/// # }
/// ```
pub struct RealtimeChannel {
    topic: String,
    connection: Weak<ConnectionManager>,
    state: Arc<Mutex<ChannelState>>,
    options: RealtimeChannelOptions,
    http_endpoint: String,
    api_key: String,
    push_timeout: Duration,
}

impl RealtimeChannel {
    pub(crate) fn new(
        topic: String,
        connection: Weak<ConnectionManager>,
        options: RealtimeChannelOptions,
        context: ChannelContext,
    ) -> Self {
        Self {
            topic,
            connection,
            state: Arc::new(Mutex::new(ChannelState::new(context.access_token))),
            options,
            http_endpoint: context.http_endpoint,
            api_key: context.api_key,
            push_timeout: context.push_timeout,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn options(&self) -> &RealtimeChannelOptions {
        &self.options
    }

    pub fn status(&self) -> ChannelStatus {
        lock(&self.state).status
    }

    /// Reference of the current join attempt
    pub fn join_ref(&self) -> Option<String> {
        lock(&self.state).join_ref.clone()
    }

    fn connection(&self) -> Result<Arc<ConnectionManager>> {
        self.connection.upgrade().ok_or(RealtimeError::NotConnected)
    }

    fn add_binding(&self, binding: Binding) -> &Self {
        lock(&self.state).bindings.push(binding);
        self
    }

    /// Calls `callback` with the payload of every frame named `event` that is not
    /// a broadcast, presence or postgres_changes frame.
    pub fn on<F>(&self, event: impl Into<ChannelEvent>, callback: F) -> &Self
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        self.add_binding(Binding::Event {
            event: event.into(),
            callback: Arc::new(callback),
        })
    }

    /// Calls `callback` with the inner payload of broadcasts named `event`
    /// (`"*"` receives every broadcast).
    pub fn on_broadcast<F>(&self, event: impl Into<String>, callback: F) -> &Self
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        self.add_binding(Binding::Broadcast {
            event: event.into(),
            callback: Arc::new(callback),
        })
    }

    /// Subscribes to database changes matching `filter`.
    ///
    /// Filters are sent with the join, so bindings registered after `subscribe`
    /// take effect on the next (re)join.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use phoenix_realtime_rs::{
    ///     PostgresChangeEvent, PostgresChangesFilter, RealtimeChannelOptions, RealtimeClient,
    ///     RealtimeClientOptions,
    /// };
    ///
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// # let client = RealtimeClient::new(
    /// #     "wss://your-project.supabase.co/realtime/v1",
    /// #     RealtimeClientOptions {
    /// #         api_key: "your-anon-key".to_string(),
    /// #         ..Default::default()
    /// #     },
    /// # )?;
    /// # client.connect().await;
    /// let channel = client.channel("db-changes", RealtimeChannelOptions::default());
    /// channel.on_postgres_changes(
    ///     PostgresChangesFilter::new(PostgresChangeEvent::Insert, "public").table("users"),
    ///     |change| println!("new user: {:?}", change.new_record()),
    /// );
    /// channel.subscribe()?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn on_postgres_changes<F>(&self, filter: PostgresChangesFilter, callback: F) -> &Self
    where
        F: Fn(PostgresChangesPayload) + Send + Sync + 'static,
    {
        if lock(&self.state).status.is_rejoin_eligible() {
            tracing::debug!(
                "postgres_changes binding on {} applies from the next join",
                self.topic
            );
        }
        self.add_binding(Binding::PostgresChanges {
            filter,
            callback: Arc::new(callback),
        })
    }

    pub fn on_presence_sync<F>(&self, callback: F) -> &Self
    where
        F: Fn(&PresenceState) + Send + Sync + 'static,
    {
        self.add_binding(Binding::PresenceSync(Arc::new(callback)))
    }

    pub fn on_presence_join<F>(&self, callback: F) -> &Self
    where
        F: Fn(String, Vec<PresenceMeta>) + Send + Sync + 'static,
    {
        self.add_binding(Binding::PresenceJoin(Arc::new(callback)))
    }

    pub fn on_presence_leave<F>(&self, callback: F) -> &Self
    where
        F: Fn(String, Vec<PresenceMeta>) + Send + Sync + 'static,
    {
        self.add_binding(Binding::PresenceLeave(Arc::new(callback)))
    }

    /// Joins the topic without an outcome callback.
    pub fn subscribe(&self) -> Result<()> {
        self.subscribe_with(|_, _| {})
    }

    /// Joins the topic. `callback` fires exactly once from the reply path with
    /// `Subscribed`, `ChannelError`, `TimedOut` or `Closed`.
    ///
    /// # Errors
    ///
    /// Fails when the channel is already joined or joining, or when the client
    /// that created it is gone.
    pub fn subscribe_with<F>(&self, callback: F) -> Result<()>
    where
        F: FnOnce(SubscriptionStatus, Option<RealtimeError>) + Send + 'static,
    {
        if lock(&self.state).status.is_rejoin_eligible() {
            return Err(RealtimeError::Channel(format!(
                "tried to subscribe to {} more than once",
                self.topic
            )));
        }
        tracing::info!("Subscribing to channel: {}", self.topic);
        self.join(Some(Box::new(callback)))
    }

    /// Re-issues the join after the socket reopened. No-op unless the channel is
    /// joined or joining.
    pub(crate) fn rejoin(&self) -> Result<()> {
        let buffered_join = {
            let mut state = lock(&self.state);
            if !state.status.is_rejoin_eligible() {
                return Ok(());
            }
            if state.join_buffered {
                state.join_buffered = false;
                state
                    .join_ref
                    .as_ref()
                    .and_then(|join_ref| state.pending_pushes.get(join_ref).cloned())
            } else {
                None
            }
        };

        // The buffered join was just flushed by the open; only its timeout is missing.
        if let Some(push) = buffered_join {
            self.arm_timeout(&push);
            return Ok(());
        }

        tracing::info!("Rejoining channel: {}", self.topic);
        self.join(None)
    }

    fn join(&self, callback: Option<SubscribeCallback>) -> Result<()> {
        let connection = self.connection()?;
        let join_ref = connection.make_ref();

        let payload = {
            let mut state = lock(&self.state);
            state.status = ChannelStatus::Joining;
            if let Some(callback) = callback {
                state.subscribe_callback = Some(callback);
            }
            if let Some(previous) = state.join_ref.replace(join_ref.clone())
                && let Some(stale) = state.pending_pushes.remove(&previous)
            {
                stale.cancel_timeout();
            }
            self.join_payload(&state)?
        };

        let push = Arc::new(Push::new(
            self.topic.clone(),
            ChannelEvent::System(SystemEvent::Join),
            payload,
            self.push_timeout,
        ));
        self.register_join_handlers(&push, &join_ref);

        lock(&self.state)
            .pending_pushes
            .insert(join_ref.clone(), push.clone());

        let delivery = push.send_with_ref(&connection, join_ref.clone(), Some(join_ref))?;
        if delivery == Delivery::Buffered {
            lock(&self.state).join_buffered = true;
        } else {
            self.arm_timeout(&push);
        }
        Ok(())
    }

    fn join_payload(&self, state: &ChannelState) -> Result<Value> {
        let postgres_changes: Vec<PostgresChangesConfig> = state
            .bindings
            .iter()
            .filter_map(|binding| match binding {
                Binding::PostgresChanges { filter, .. } => {
                    Some(PostgresChangesConfig::from(filter))
                }
                _ => None,
            })
            .collect();
        let has_presence_bindings = state.bindings.iter().any(|binding| {
            matches!(
                binding,
                Binding::PresenceSync(_) | Binding::PresenceJoin(_) | Binding::PresenceLeave(_)
            )
        });

        let payload = JoinPayload {
            config: ChannelJoinConfig {
                broadcast: BroadcastConfig {
                    self_: self.options.broadcast_self,
                    ack: self.options.broadcast_ack,
                },
                presence: PresenceConfig {
                    key: self.options.presence_key.clone().unwrap_or_default(),
                    enabled: self.options.presence_key.is_some() || has_presence_bindings,
                },
                is_private: self.options.is_private,
                postgres_changes,
            },
            access_token: state.access_token.clone(),
        };
        Ok(serde_json::to_value(&payload)?)
    }

    /// Wires the join outcome into channel state. Every handler first checks that
    /// `join_ref` is still the current join.
    fn register_join_handlers(&self, push: &Push, join_ref: &str) {
        let on_ok = self.join_outcome(join_ref, |state, topic, _| {
            state.status = ChannelStatus::Joined;
            state.join_buffered = false;
            tracing::info!("Joined channel: {}", topic);
            (SubscriptionStatus::Subscribed, None)
        });
        let on_error = self.join_outcome(join_ref, |state, topic, response| {
            state.status = ChannelStatus::Errored;
            let reason = response
                .get("reason")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| response.to_string());
            tracing::warn!("Join rejected on {}: {}", topic, reason);
            (
                SubscriptionStatus::ChannelError,
                Some(RealtimeError::Subscription {
                    topic: topic.to_string(),
                    reason,
                }),
            )
        });
        let on_timeout = self.join_outcome(join_ref, |_, topic, _| {
            tracing::warn!("Join timed out on {}", topic);
            (SubscriptionStatus::TimedOut, Some(RealtimeError::Timeout))
        });

        push.receive(reply_status::OK, on_ok)
            .receive(reply_status::ERROR, on_error)
            .receive(reply_status::TIMEOUT, on_timeout);
    }

    fn join_outcome<F>(&self, join_ref: &str, apply: F) -> impl FnOnce(Value) + Send + 'static
    where
        F: FnOnce(&mut ChannelState, &str, &Value) -> (SubscriptionStatus, Option<RealtimeError>)
            + Send
            + 'static,
    {
        let state = Arc::downgrade(&self.state);
        let topic = self.topic.clone();
        let join_ref = join_ref.to_string();

        move |response| {
            let Some(state) = state.upgrade() else {
                return;
            };
            let (callback, status, error) = {
                let mut state = lock(&state);
                if state.join_ref.as_deref() != Some(join_ref.as_str()) {
                    tracing::debug!("Ignoring stale join reply {} on {}", join_ref, topic);
                    return;
                }
                let (status, error) = apply(&mut state, &topic, &response);
                (state.subscribe_callback.take(), status, error)
            };
            if let Some(callback) = callback {
                invoke_isolated(&topic, "subscribe", || callback(status, error));
            }
        }
    }

    /// Starts the reply timeout of `push` on the current runtime, or on the one
    /// that opened the socket when called from a plain thread. Without either the
    /// push stays pending until its reply or the next unsubscribe.
    fn arm_timeout(&self, push: &Arc<Push>) {
        let runtime = tokio::runtime::Handle::try_current()
            .ok()
            .or_else(|| self.connection.upgrade().and_then(|c| c.runtime()));
        let Some(runtime) = runtime else {
            tracing::debug!("No tokio runtime, push timeout not armed on {}", self.topic);
            return;
        };
        let Some(ref_id) = push.ref_id() else {
            return;
        };
        let state = Arc::downgrade(&self.state);
        let weak_push = Arc::downgrade(push);
        let timeout = push.timeout();

        let task = runtime.spawn(async move {
            tokio::time::sleep(timeout).await;
            let mut pending = None;
            if let Some(state) = state.upgrade() {
                pending = lock(&state).pending_pushes.remove(&ref_id);
            }
            if let Some(push) = pending.or_else(|| weak_push.upgrade()) {
                push.trigger(reply_status::TIMEOUT, Value::Null);
            }
        });
        push.set_timeout_task(task);
    }

    /// Leaves the topic. The channel is closed right after the leave frame is
    /// pushed, without waiting for the server acknowledgment.
    pub fn unsubscribe(&self) -> Result<()> {
        let join_ref = {
            let mut state = lock(&self.state);
            if state.status == ChannelStatus::Closed {
                return Ok(());
            }
            state.status = ChannelStatus::Leaving;
            state.join_ref.clone()
        };

        tracing::info!("Unsubscribing from channel: {}", self.topic);
        let sent = self.connection().and_then(|connection| {
            let leave = Push::new(
                self.topic.clone(),
                ChannelEvent::System(SystemEvent::Leave),
                serde_json::json!({}),
                self.push_timeout,
            );
            leave.send(&connection, join_ref).map(|_| ())
        });

        let callback = {
            let mut state = lock(&self.state);
            state.status = ChannelStatus::Closed;
            state.join_buffered = false;
            state.clear_pending_pushes();
            state.subscribe_callback.take()
        };
        if let Some(callback) = callback {
            invoke_isolated(&self.topic, "subscribe", || {
                callback(SubscriptionStatus::Closed, None)
            });
        }
        sent
    }

    /// Pushes a custom event and returns the push for reply correlation.
    ///
    /// # Errors
    ///
    /// Fails unless the channel is joined or joining.
    pub fn push(&self, event: impl Into<ChannelEvent>, payload: Value) -> Result<Arc<Push>> {
        let connection = self.connection()?;
        let join_ref = {
            let state = lock(&self.state);
            if !state.status.is_rejoin_eligible() {
                return Err(RealtimeError::Channel(format!(
                    "tried to push to {} before subscribing",
                    self.topic
                )));
            }
            state.join_ref.clone()
        };

        let push = Arc::new(Push::new(
            self.topic.clone(),
            event.into(),
            payload,
            self.push_timeout,
        ));
        let ref_id = connection.make_ref();
        lock(&self.state)
            .pending_pushes
            .insert(ref_id.clone(), push.clone());
        push.send_with_ref(&connection, ref_id, join_ref)?;
        self.arm_timeout(&push);
        Ok(push)
    }

    /// Sends a broadcast. Uses the socket when joined and connected, the HTTP
    /// endpoint otherwise.
    pub async fn send(&self, event: &str, payload: Value) -> Result<()> {
        let joined = self.status() == ChannelStatus::Joined;
        let connected = self
            .connection
            .upgrade()
            .is_some_and(|connection| connection.is_connected());

        if joined && connected {
            self.push(
                ChannelEvent::Broadcast,
                serde_json::json!({
                    "type": "broadcast",
                    "event": event,
                    "payload": payload,
                }),
            )?;
            tracing::debug!("Sent broadcast via WebSocket: {}", event);
            Ok(())
        } else {
            self.send_http(event, payload).await
        }
    }

    /// Sends a broadcast through the HTTP endpoint regardless of socket state.
    pub async fn send_http(&self, event: &str, payload: Value) -> Result<()> {
        let access_token = lock(&self.state).access_token.clone();
        let broadcaster =
            HttpBroadcaster::new(self.http_endpoint.clone(), self.api_key.clone(), access_token);

        broadcaster
            .broadcast(&self.topic, event, payload, self.options.is_private)
            .await
    }

    /// Publishes `meta` as this client's presence on the topic.
    pub fn track(&self, meta: Value) -> Result<Arc<Push>> {
        self.push(
            ChannelEvent::Presence,
            serde_json::json!({
                "type": "presence",
                "event": "track",
                "payload": meta,
            }),
        )
    }

    /// Removes this client's presence from the topic.
    pub fn untrack(&self) -> Result<Arc<Push>> {
        self.push(
            ChannelEvent::Presence,
            serde_json::json!({
                "type": "presence",
                "event": "untrack",
            }),
        )
    }

    pub fn presence_state(&self) -> PresenceState {
        lock(&self.state).presence.state().clone()
    }

    pub fn presence_list(&self) -> Vec<(String, Vec<PresenceMeta>)> {
        lock(&self.state).presence.list()
    }

    /// Stores a new bearer token and, when joined on an open socket, sends it to
    /// the server.
    pub(crate) fn set_access_token(&self, token: Option<String>) {
        let join_ref = {
            let mut state = lock(&self.state);
            state.access_token = token.clone();
            if state.status != ChannelStatus::Joined {
                return;
            }
            state.join_ref.clone()
        };
        let (Some(token), Ok(connection)) = (token, self.connection()) else {
            return;
        };
        if !connection.is_connected() {
            return;
        }

        let mut message = RealtimeMessage::new(
            self.topic.clone(),
            ChannelEvent::AccessToken,
            serde_json::json!({ "access_token": token }),
        )
        .with_ref(connection.make_ref());
        message.join_ref = join_ref;
        if let Err(e) = connection.push(&message) {
            tracing::warn!("Failed to push access token on {}: {}", self.topic, e);
        }
    }

    /// Classifies one inbound frame: system events first, then broadcast,
    /// presence and postgres_changes, then generic bindings.
    pub(crate) fn handle_message(&self, message: RealtimeMessage) {
        match &message.event {
            ChannelEvent::System(SystemEvent::Reply) => self.handle_reply(&message),
            ChannelEvent::System(SystemEvent::Close) => self.handle_close(&message),
            ChannelEvent::System(SystemEvent::Error) => self.handle_error(&message),
            ChannelEvent::Broadcast => self.dispatch_broadcast(&message.payload),
            ChannelEvent::PresenceState => self.handle_presence_state(message.payload),
            ChannelEvent::PresenceDiff => self.handle_presence_diff(message.payload),
            ChannelEvent::PostgresChanges => self.dispatch_postgres_changes(&message.payload),
            event => self.dispatch_event(event, message.payload.clone()),
        }
    }

    fn handle_reply(&self, message: &RealtimeMessage) {
        let Some(ref_id) = message.r#ref.as_deref() else {
            tracing::debug!("Dropping reply without ref on {}", self.topic);
            return;
        };
        let (status, response) = message.reply_parts();

        let pending = {
            let mut state = lock(&self.state);
            let pending = state.pending_pushes.remove(ref_id);
            // A join that already timed out can still be confirmed by a late reply.
            if pending.is_none()
                && state.status == ChannelStatus::Joining
                && state.join_ref.as_deref() == Some(ref_id)
                && status == reply_status::OK
            {
                state.status = ChannelStatus::Joined;
                tracing::info!("Joined channel: {} (late reply)", self.topic);
            }
            pending
        };

        match pending {
            Some(push) => push.trigger(&status, response),
            None => tracing::debug!("No pending push for ref {} on {}", ref_id, self.topic),
        }
    }

    /// Close and error frames from another join attempt are ignored.
    fn is_current_member(&self, state: &ChannelState, message: &RealtimeMessage) -> bool {
        match (&message.join_ref, &state.join_ref) {
            (Some(incoming), Some(current)) if incoming != current => {
                tracing::debug!(
                    "Ignoring {} for outdated join {} on {}",
                    message.event,
                    incoming,
                    self.topic
                );
                false
            }
            _ => true,
        }
    }

    fn handle_close(&self, message: &RealtimeMessage) {
        let callback = {
            let mut state = lock(&self.state);
            if !self.is_current_member(&state, message) {
                return;
            }
            tracing::info!("Channel closed by server: {}", self.topic);
            state.status = ChannelStatus::Closed;
            state.join_buffered = false;
            state.clear_pending_pushes();
            state.subscribe_callback.take()
        };
        if let Some(callback) = callback {
            invoke_isolated(&self.topic, "subscribe", || {
                callback(SubscriptionStatus::Closed, None)
            });
        }
    }

    fn handle_error(&self, message: &RealtimeMessage) {
        let callback = {
            let mut state = lock(&self.state);
            if !self.is_current_member(&state, message) {
                return;
            }
            tracing::warn!("Channel error on {}: {}", self.topic, message.payload);
            state.status = ChannelStatus::Errored;
            state.join_buffered = false;
            state.clear_pending_pushes();
            state.subscribe_callback.take()
        };
        if let Some(callback) = callback {
            let error = RealtimeError::Subscription {
                topic: self.topic.clone(),
                reason: message.payload.to_string(),
            };
            invoke_isolated(&self.topic, "subscribe", || {
                callback(SubscriptionStatus::ChannelError, Some(error))
            });
        }
    }

    fn dispatch_broadcast(&self, payload: &Value) {
        let Some(event) = payload.get("event").and_then(Value::as_str) else {
            tracing::warn!("Dropping broadcast without event on {}", self.topic);
            return;
        };
        let inner = payload.get("payload").cloned().unwrap_or(Value::Null);

        let callbacks: Vec<_> = lock(&self.state)
            .bindings
            .iter()
            .filter_map(|binding| binding.matches_broadcast(event).cloned())
            .collect();
        for callback in callbacks {
            let inner = inner.clone();
            invoke_isolated(&self.topic, event, || callback(inner));
        }
    }

    fn dispatch_postgres_changes(&self, payload: &Value) {
        let change = match PostgresChangesPayload::from_frame(payload) {
            Ok(change) => change,
            Err(e) => {
                tracing::warn!("Dropping malformed postgres_changes on {}: {}", self.topic, e);
                return;
            }
        };

        let callbacks: Vec<_> = lock(&self.state)
            .bindings
            .iter()
            .filter_map(|binding| binding.matches_postgres(&change).cloned())
            .collect();
        for callback in callbacks {
            let change = change.clone();
            invoke_isolated(&self.topic, "postgres_changes", || callback(change));
        }
    }

    fn dispatch_event(&self, event: &ChannelEvent, payload: Value) {
        let callbacks: Vec<_> = lock(&self.state)
            .bindings
            .iter()
            .filter_map(|binding| binding.matches_event(event).cloned())
            .collect();
        if callbacks.is_empty() {
            tracing::debug!("No binding for '{}' on {}", event, self.topic);
        }
        for callback in callbacks {
            let payload = payload.clone();
            invoke_isolated(&self.topic, event.as_str(), || callback(payload));
        }
    }

    fn handle_presence_state(&self, payload: Value) {
        let raw: RawPresenceState = match serde_json::from_value(payload) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!("Dropping malformed presence_state on {}: {}", self.topic, e);
                return;
            }
        };

        let (changes, bindings, snapshot) = {
            let mut state = lock(&self.state);
            let join_ref = state.join_ref.clone().unwrap_or_default();
            let mut changes = vec![state.presence.sync_state(raw, &join_ref)];
            changes.extend(state.presence.flush_pending_diffs());
            (changes, state.bindings.clone(), state.presence.state().clone())
        };
        self.notify_presence(&changes, &bindings, &snapshot);
    }

    fn handle_presence_diff(&self, payload: Value) {
        let diff: RawPresenceDiff = match serde_json::from_value(payload) {
            Ok(diff) => diff,
            Err(e) => {
                tracing::warn!("Dropping malformed presence_diff on {}: {}", self.topic, e);
                return;
            }
        };

        let (changes, bindings, snapshot) = {
            let mut state = lock(&self.state);
            if state.presence.in_pending_sync_state(state.join_ref.as_deref()) {
                state.presence.add_pending_diff(diff);
                return;
            }
            let changes = state.presence.sync_diff(diff);
            (vec![changes], state.bindings.clone(), state.presence.state().clone())
        };
        self.notify_presence(&changes, &bindings, &snapshot);
    }

    /// Join listeners, then leave listeners, then sync listeners.
    fn notify_presence(
        &self,
        changes: &[PresenceChanges],
        bindings: &[Binding],
        snapshot: &PresenceState,
    ) {
        for change in changes {
            for (key, metas) in &change.joins {
                for binding in bindings {
                    if let Binding::PresenceJoin(callback) = binding {
                        invoke_isolated(&self.topic, "presence join", || {
                            callback(key.clone(), metas.clone())
                        });
                    }
                }
            }
            for (key, metas) in &change.leaves {
                for binding in bindings {
                    if let Binding::PresenceLeave(callback) = binding {
                        invoke_isolated(&self.topic, "presence leave", || {
                            callback(key.clone(), metas.clone())
                        });
                    }
                }
            }
        }
        for binding in bindings {
            if let Binding::PresenceSync(callback) = binding {
                invoke_isolated(&self.topic, "presence sync", || callback(snapshot));
            }
        }
    }
}

impl std::fmt::Debug for RealtimeChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeChannel")
            .field("topic", &self.topic)
            .field("status", &self.status())
            .finish()
    }
}
