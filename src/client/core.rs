use super::connection::{ConnectionState, lock};
use super::{ClientState, ConnectionManager, RealtimeClientBuilder, RealtimeClientOptions};
use crate::channel::{ChannelContext, RealtimeChannel, RealtimeChannelOptions};
use crate::infrastructure::{HeartbeatManager, Timer};
use crate::messaging::MessageRouter;
use crate::types::{RealtimeMessage, Result, TOPIC_PREFIX};
use crate::websocket::{WebSocketConnector, WsConnection, WsEvent, WsFrame};
use futures::FutureExt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// The main entry point: one multiplexed socket shared by every channel.
///
/// `RealtimeClient` owns the connection, the heartbeat and the reconnection
/// backoff, and keeps the registry of channels that frames are routed to.
/// Cloning is cheap and every clone drives the same socket.
///
/// # Example
///
/// ```no_run
/// use phoenix_realtime_rs::{RealtimeClient, RealtimeClientOptions};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = RealtimeClient::new(
///     "wss://your-project.supabase.co/realtime/v1",
///     RealtimeClientOptions {
///         api_key: "your-anon-key".to_string(),
///         ..Default::default()
///     }
/// )?;
///
/// client.connect().await;
/// // Use the client...
/// client.disconnect();
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct RealtimeClient {
    pub(crate) endpoint: String,
    pub(crate) endpoint_url: String,
    pub(crate) http_endpoint: String,
    pub(crate) push_timeout: Duration,
    pub(crate) options: RealtimeClientOptions,

    // Connection manager
    pub(crate) connection: Arc<ConnectionManager>,

    // Consolidated mutable state
    pub(crate) state: Arc<Mutex<ClientState>>,

    pub(crate) heartbeat: Arc<HeartbeatManager>,
    pub(crate) reconnect_timer: Arc<Timer>,
    pub(crate) connector: Arc<dyn WebSocketConnector>,
}

impl RealtimeClient {
    /// Creates a client using the tungstenite transport.
    ///
    /// This does not connect; call [`connect()`](Self::connect).
    ///
    /// # Errors
    ///
    /// Returns [`RealtimeError::Auth`](crate::types::RealtimeError::Auth) for an
    /// empty API key and [`RealtimeError::UrlParse`](crate::types::RealtimeError::UrlParse)
    /// if the endpoint URL cannot be parsed.
    pub fn new(endpoint: impl Into<String>, options: RealtimeClientOptions) -> Result<Self> {
        RealtimeClientBuilder::new(endpoint, options)?.build()
    }

    pub fn builder(
        endpoint: impl Into<String>,
        options: RealtimeClientOptions,
    ) -> Result<RealtimeClientBuilder> {
        RealtimeClientBuilder::new(endpoint, options)
    }

    /// Full socket URL, query parameters included
    pub fn endpoint_url(&self) -> &str {
        &self.endpoint_url
    }

    /// HTTP base derived from the socket endpoint
    pub fn http_endpoint(&self) -> &str {
        &self.http_endpoint
    }

    pub fn api_key(&self) -> &str {
        &self.options.api_key
    }

    pub fn access_token(&self) -> Option<String> {
        lock(&self.state).access_token.clone()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Checks whether the client is currently connected to the server.
    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    /// Generate next message reference
    pub fn make_ref(&self) -> String {
        self.connection.make_ref()
    }

    /// Opens the socket.
    ///
    /// No-op while already open or connecting. Transport failures are never
    /// returned: they are logged and a reconnect is scheduled with backoff. On
    /// open the send buffer is flushed, the heartbeat starts and every joined or
    /// joining channel is rejoined.
    pub async fn connect(&self) {
        {
            let mut state = lock(&self.state);
            if !self.connection.begin_connect() {
                return;
            }
            state.was_manual_disconnect = false;
        }
        self.establish().await;
    }

    /// Backoff-driven connect. Unlike [`connect()`](Self::connect) it keeps the
    /// manual-disconnect flag, checked under the same lock `disconnect` takes, so a
    /// timer that already fired cannot reopen a socket the user closed.
    async fn reconnect(&self) {
        {
            let state = lock(&self.state);
            if state.was_manual_disconnect {
                tracing::info!("Manual disconnect detected, dropping scheduled reconnect");
                return;
            }
            if !self.connection.begin_connect() {
                return;
            }
        }
        self.establish().await;
    }

    async fn establish(&self) {
        tracing::info!("Connecting to {}", self.endpoint);
        match self.connector.connect(&self.endpoint_url).await {
            Ok(socket) => {
                if self.connection.state() != ConnectionState::Connecting {
                    tracing::info!("Disconnected while connecting, dropping new socket");
                    let _ = socket.outbound.send(WsFrame::Close);
                    self.connection.set_state(ConnectionState::Closed);
                    return;
                }
                self.on_open(socket);
            }
            Err(e) => {
                tracing::error!("Connection to {} failed: {}", self.endpoint, e);
                self.connection.set_state(ConnectionState::Closed);
                self.schedule_reconnect();
            }
        }
    }

    fn on_open(&self, socket: WsConnection) {
        let WsConnection { outbound, inbound } = socket;

        self.reconnect_timer.reset();
        let generation = self.connection.open(outbound);
        tracing::info!("Connected to WebSocket server");

        let router = MessageRouter::new(Arc::clone(&self.heartbeat), Arc::clone(&self.state));
        let client = self.clone();
        lock(&self.state)
            .task_manager
            .spawn(client.read_loop(inbound, router, generation));

        let client = self.clone();
        self.heartbeat.start(Arc::downgrade(&self.connection), move || {
            client.handle_connection_lost(generation, "heartbeat timeout");
        });

        self.rejoin_channels();
    }

    async fn read_loop(
        self,
        mut inbound: mpsc::UnboundedReceiver<WsEvent>,
        router: MessageRouter,
        generation: u64,
    ) {
        tracing::info!("Starting read task");
        let reason = loop {
            match inbound.recv().await {
                Some(WsEvent::Text(text)) => match RealtimeMessage::decode(&text) {
                    Ok(message) => router.route(message),
                    Err(e) => tracing::warn!("Dropping malformed frame: {} - Raw: {}", e, text),
                },
                Some(WsEvent::Closed(reason)) => {
                    break format!(
                        "server closed connection ({})",
                        reason.as_deref().unwrap_or("no close frame")
                    );
                }
                Some(WsEvent::Error(e)) => break format!("read error: {e}"),
                None => break "transport ended".to_string(),
            }
        };
        tracing::info!("Read task finished");
        self.handle_connection_lost(generation, &reason);
    }

    fn rejoin_channels(&self) {
        let channels = lock(&self.state).channels.clone();
        for channel in channels {
            if let Err(e) = channel.rejoin() {
                tracing::error!("Failed to rejoin {}: {}", channel.topic(), e);
            }
        }
    }

    /// Tears down socket `generation` once, then schedules a reconnect unless the
    /// disconnect was requested.
    fn handle_connection_lost(&self, generation: u64, reason: &str) {
        if !self.connection.mark_lost(generation) {
            return;
        }
        tracing::warn!("Connection lost: {}", reason);
        self.heartbeat.stop();
        lock(&self.state).task_manager.abort_all();
        self.schedule_reconnect();
    }

    fn schedule_reconnect(&self) {
        if lock(&self.state).was_manual_disconnect {
            tracing::info!("Manual disconnect detected, will not attempt to reconnect");
            return;
        }
        if self.connection.state() == ConnectionState::Connecting {
            return;
        }

        let client = self.clone();
        let delay = self
            .reconnect_timer
            .schedule_timeout(move || async move { client.reconnect().await }.boxed());
        tracing::info!(
            "Reconnecting in {:?} (attempt {})",
            delay,
            self.reconnect_timer.tries()
        );
    }

    /// Closes the socket and cancels the heartbeat and any pending reconnect.
    /// Idempotent. After a manual disconnect no reconnect is attempted until
    /// [`connect()`](Self::connect) is called again.
    pub fn disconnect(&self) {
        let mut state = lock(&self.state);
        state.was_manual_disconnect = true;
        self.reconnect_timer.reset();
        self.heartbeat.stop();

        if self.connection.state() == ConnectionState::Closed {
            return;
        }
        tracing::info!("Disconnecting from WebSocket server");
        self.connection.set_state(ConnectionState::Closing);
        state.task_manager.abort_all();
        drop(state);

        self.connection.close();
        tracing::info!("Disconnected from WebSocket server");
    }

    /// Creates or retrieves the channel for `topic` (`realtime:` is prefixed).
    ///
    /// A second call with the same topic returns the registered channel and
    /// ignores `options`.
    pub fn channel(&self, topic: &str, options: RealtimeChannelOptions) -> Arc<RealtimeChannel> {
        let full_topic = if topic.starts_with(TOPIC_PREFIX) {
            topic.to_string()
        } else {
            format!("{TOPIC_PREFIX}{topic}")
        };

        let mut state = lock(&self.state);
        if let Some(existing) = state.find_channel(&full_topic) {
            return existing;
        }

        let context = ChannelContext {
            http_endpoint: self.http_endpoint.clone(),
            api_key: self.options.api_key.clone(),
            push_timeout: self.push_timeout,
            access_token: state.access_token.clone(),
        };
        let channel = Arc::new(RealtimeChannel::new(
            full_topic,
            Arc::downgrade(&self.connection),
            options,
            context,
        ));
        state.channels.push(Arc::clone(&channel));
        channel
    }

    pub fn channels(&self) -> Vec<Arc<RealtimeChannel>> {
        lock(&self.state).channels.clone()
    }

    /// Unsubscribes `channel` if needed and drops it from the registry.
    pub fn remove_channel(&self, channel: &RealtimeChannel) -> Result<()> {
        let removed = {
            let mut state = lock(&self.state);
            let before = state.channels.len();
            state
                .channels
                .retain(|registered| registered.topic() != channel.topic());
            before != state.channels.len()
        };
        if removed {
            tracing::debug!("Removed channel {}", channel.topic());
        }
        channel.unsubscribe()
    }

    /// Unsubscribes and drops every channel.
    pub fn remove_all_channels(&self) -> Result<()> {
        let channels = std::mem::take(&mut lock(&self.state).channels);
        let mut first_error = None;
        for channel in channels {
            if let Err(e) = channel.unsubscribe() {
                tracing::warn!("Failed to unsubscribe {}: {}", channel.topic(), e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Sets the bearer token used by joins and HTTP broadcasts. Joined channels
    /// on an open socket receive it right away.
    pub fn set_auth(&self, token: Option<String>) {
        let channels = {
            let mut state = lock(&self.state);
            state.access_token = token.clone();
            state.channels.clone()
        };
        for channel in channels {
            channel.set_access_token(token.clone());
        }
    }
}

impl std::fmt::Debug for RealtimeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeClient")
            .field("endpoint", &self.endpoint)
            .field("state", &self.connection.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RealtimeError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone, Default)]
    struct RefusingConnector {
        attempts: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl WebSocketConnector for RefusingConnector {
        async fn connect(&self, _url: &str) -> Result<WsConnection> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(RealtimeError::Connection("refused".to_string()))
        }
    }

    fn client(connector: &RefusingConnector) -> RealtimeClient {
        RealtimeClient::builder(
            "ws://localhost:4000/socket/websocket",
            RealtimeClientOptions {
                api_key: "k1".to_string(),
                ..Default::default()
            },
        )
        .unwrap()
        .connector(connector.clone())
        .build()
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_after_disconnect_is_dropped() {
        let connector = RefusingConnector::default();
        let client = client(&connector);

        // A timer that already released its slot when disconnect ran.
        client.disconnect();
        client.reconnect().await;

        assert_eq!(connector.attempts.load(Ordering::SeqCst), 0);
        assert_eq!(client.connection_state(), ConnectionState::Closed);
        assert!(!client.reconnect_timer.is_scheduled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_clears_manual_disconnect() {
        let connector = RefusingConnector::default();
        let client = client(&connector);

        client.disconnect();
        client.connect().await;

        assert_eq!(connector.attempts.load(Ordering::SeqCst), 1);
        assert!(!lock(&client.state).was_manual_disconnect);
        assert!(client.reconnect_timer.is_scheduled());
        client.disconnect();
    }
}
