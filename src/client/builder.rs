use super::{ClientState, ConnectionManager, RealtimeClient};
use crate::infrastructure::{HeartbeatManager, ReconnectAfter, Timer, ws_to_http_endpoint};
use crate::types::{DEFAULT_TIMEOUT, HEARTBEAT_INTERVAL, RealtimeError, Result, SOCKET_PATH, VSN};
use crate::websocket::{WebSocketConnector, WebSocketFactory};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;

#[derive(Clone, Default)]
pub struct RealtimeClientOptions {
    pub api_key: String,
    /// Push reply timeout in milliseconds (default 10 000)
    pub timeout: Option<u64>,
    /// Heartbeat interval in milliseconds (default 25 000, must be non-zero)
    pub heartbeat_interval: Option<u64>,
    pub access_token: Option<String>,
    /// Backoff schedule for reconnects; defaults to 1s, 2s, 5s, 10s
    pub reconnect_after: Option<ReconnectAfter>,
    /// Extra query parameters for the socket URL
    pub params: Vec<(String, String)>,
}

impl std::fmt::Debug for RealtimeClientOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeClientOptions")
            .field("api_key", &"<redacted>")
            .field("timeout", &self.timeout)
            .field("heartbeat_interval", &self.heartbeat_interval)
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .field("reconnect_after", &self.reconnect_after.as_ref().map(|_| "<custom>"))
            .field("params", &self.params)
            .finish()
    }
}

/// Builder for RealtimeClient that handles initialization
pub struct RealtimeClientBuilder {
    endpoint: String,
    options: RealtimeClientOptions,
    connector: Arc<dyn WebSocketConnector>,
}

impl RealtimeClientBuilder {
    /// Create a new builder
    pub fn new(endpoint: impl Into<String>, options: RealtimeClientOptions) -> Result<Self> {
        let endpoint = endpoint.into();

        // Validate API key is provided
        if options.api_key.is_empty() {
            return Err(RealtimeError::Auth("API key is required".to_string()));
        }
        if options.heartbeat_interval == Some(0) {
            return Err(RealtimeError::Connection(
                "heartbeat_interval must be greater than zero".to_string(),
            ));
        }
        Url::parse(&endpoint)?;

        Ok(Self {
            endpoint,
            options,
            connector: Arc::new(WebSocketFactory),
        })
    }

    /// Replaces the tungstenite transport
    pub fn connector(mut self, connector: impl WebSocketConnector) -> Self {
        self.connector = Arc::new(connector);
        self
    }

    /// Build the client. Nothing is spawned until `connect`.
    pub fn build(self) -> Result<RealtimeClient> {
        let endpoint_url = build_endpoint_url(&self.endpoint, &self.options)?;
        let http_endpoint = ws_to_http_endpoint(&self.endpoint);

        let heartbeat_interval =
            Duration::from_millis(self.options.heartbeat_interval.unwrap_or(HEARTBEAT_INTERVAL));
        let reconnect_timer = match &self.options.reconnect_after {
            Some(reconnect_after) => Timer::new(reconnect_after.clone()),
            None => Timer::default(),
        };
        let push_timeout = Duration::from_millis(self.options.timeout.unwrap_or(DEFAULT_TIMEOUT));
        let client_state = ClientState::new(self.options.access_token.clone());

        Ok(RealtimeClient {
            endpoint: self.endpoint,
            endpoint_url,
            http_endpoint,
            push_timeout,
            options: self.options,
            connection: Arc::new(ConnectionManager::new()),
            state: Arc::new(Mutex::new(client_state)),
            heartbeat: Arc::new(HeartbeatManager::new(heartbeat_interval)),
            reconnect_timer: Arc::new(reconnect_timer),
            connector: self.connector,
        })
    }
}

/// `{endpoint}/socket/websocket?apikey=..&vsn=1.0.0` plus any extra params. An
/// endpoint already ending in `/websocket` is used as is.
fn build_endpoint_url(endpoint: &str, options: &RealtimeClientOptions) -> Result<String> {
    let mut url = Url::parse(endpoint)?;

    if !url.path().trim_end_matches('/').ends_with("/websocket") {
        let path = format!("{}/{}", url.path().trim_end_matches('/'), SOCKET_PATH);
        url.set_path(&path);
    }

    // Add required query parameters
    url.query_pairs_mut()
        .append_pair("apikey", &options.api_key)
        .append_pair("vsn", VSN);
    for (key, value) in &options.params {
        url.query_pairs_mut().append_pair(key, value);
    }

    Ok(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> RealtimeClientOptions {
        RealtimeClientOptions {
            api_key: "k1".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_endpoint_url_has_socket_path_key_and_version() {
        let url = build_endpoint_url("wss://example.supabase.co/realtime/v1", &options()).unwrap();
        assert_eq!(
            url,
            "wss://example.supabase.co/realtime/v1/socket/websocket?apikey=k1&vsn=1.0.0"
        );
    }

    #[test]
    fn test_endpoint_url_keeps_existing_websocket_path_and_adds_params() {
        let mut options = options();
        options.params = vec![("log_level".to_string(), "info".to_string())];
        let url = build_endpoint_url("ws://localhost:4000/socket/websocket", &options).unwrap();
        assert_eq!(
            url,
            "ws://localhost:4000/socket/websocket?apikey=k1&vsn=1.0.0&log_level=info"
        );
    }

    #[test]
    fn test_builder_validates_key_and_endpoint() {
        let missing_key = RealtimeClientBuilder::new(
            "ws://localhost:4000",
            RealtimeClientOptions::default(),
        );
        assert!(matches!(missing_key, Err(RealtimeError::Auth(_))));

        let bad_url = RealtimeClientBuilder::new("not a url", options());
        assert!(matches!(bad_url, Err(RealtimeError::UrlParse(_))));
    }

    #[test]
    fn test_builder_rejects_zero_heartbeat_interval() {
        let mut options = options();
        options.heartbeat_interval = Some(0);
        let result = RealtimeClientBuilder::new("ws://localhost:4000", options);
        assert!(matches!(result, Err(RealtimeError::Connection(_))));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let mut options = options();
        options.access_token = Some("secret-token".to_string());
        let printed = format!("{:?}", options);
        assert!(!printed.contains("k1"));
        assert!(!printed.contains("secret-token"));
    }
}
