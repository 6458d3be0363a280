use crate::types::{RealtimeError, SOCKET_PATH, TOPIC_PREFIX, error::Result};
use serde_json::Value;

/// Handles HTTP broadcast fallback when WebSocket is unavailable
pub struct HttpBroadcaster {
    base_endpoint: String,
    api_key: String,
    access_token: Option<String>,
    http_client: reqwest::Client,
}

impl HttpBroadcaster {
    pub fn new(base_endpoint: String, api_key: String, access_token: Option<String>) -> Self {
        Self {
            base_endpoint,
            api_key,
            access_token,
            http_client: reqwest::Client::new(),
        }
    }

    pub fn endpoint(&self) -> String {
        format!("{}/api/broadcast", self.base_endpoint.trim_end_matches('/'))
    }

    /// Sends a broadcast message via HTTP POST
    pub async fn broadcast(
        &self,
        topic: &str,
        event: &str,
        payload: Value,
        is_private: bool,
    ) -> Result<()> {
        let url = self.endpoint();
        let sub_topic = topic.strip_prefix(TOPIC_PREFIX).unwrap_or(topic);

        let body = serde_json::json!({
            "messages": [{
                "topic": sub_topic,
                "event": event,
                "payload": payload,
                "private": is_private,
            }]
        });

        let mut request = self
            .http_client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("apikey", &self.api_key)
            .json(&body);

        if let Some(token) = &self.access_token {
            request = request.header("Authorization", format!("Bearer {}", token));
        }

        let response = request
            .send()
            .await
            .map_err(|e| RealtimeError::Connection(format!("HTTP broadcast failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(RealtimeError::Connection(format!(
                "HTTP broadcast failed for topic '{}' event '{}' with status: {}",
                sub_topic,
                event,
                response.status()
            )));
        }

        tracing::debug!("Sent broadcast via HTTP: {}", event);
        Ok(())
    }
}

/// Converts the WebSocket endpoint to the HTTP base used for REST calls
pub fn ws_to_http_endpoint(ws_endpoint: &str) -> String {
    let http = ws_endpoint
        .replacen("ws://", "http://", 1)
        .replacen("wss://", "https://", 1);
    let base = http.split('?').next().unwrap_or(&http).trim_end_matches('/');
    let base = base
        .strip_suffix(&format!("/{SOCKET_PATH}"))
        .or_else(|| base.strip_suffix("/websocket"))
        .unwrap_or(base);
    base.trim_end_matches('/').to_string()
}
