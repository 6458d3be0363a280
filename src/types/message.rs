use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::constants::{PHOENIX_TOPIC, reply_status};
use super::error::Result;
use crate::messaging::{ChannelEvent, SystemEvent};

/// One Phoenix protocol envelope: `{topic, event, payload, ref, join_ref?}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RealtimeMessage {
    pub topic: String,
    pub event: ChannelEvent,
    #[serde(default)]
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r#ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join_ref: Option<String>,
}

impl RealtimeMessage {
    pub fn new(topic: String, event: ChannelEvent, payload: Value) -> Self {
        Self {
            topic,
            event,
            payload,
            r#ref: None,
            join_ref: None,
        }
    }

    /// Keepalive frame on the reserved `phoenix` topic
    pub fn heartbeat(r#ref: String) -> Self {
        Self::new(
            PHOENIX_TOPIC.to_string(),
            ChannelEvent::System(SystemEvent::Heartbeat),
            serde_json::json!({}),
        )
        .with_ref(r#ref)
    }

    pub fn with_ref(mut self, r#ref: String) -> Self {
        self.r#ref = Some(r#ref);
        self
    }

    pub fn with_join_ref(mut self, join_ref: String) -> Self {
        self.join_ref = Some(join_ref);
        self
    }

    /// Encodes the envelope as a text frame.
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decodes a text frame. Callers drop frames that fail here.
    pub fn decode(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn is_reply(&self) -> bool {
        self.event == ChannelEvent::System(SystemEvent::Reply)
    }

    /// Splits a `phx_reply` payload into `(status, response)`.
    ///
    /// A reply without a status is treated as an error reply.
    pub fn reply_parts(&self) -> (String, Value) {
        let status = self
            .payload
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or(reply_status::ERROR)
            .to_string();
        let response = self.payload.get("response").cloned().unwrap_or(Value::Null);
        (status, response)
    }
}
