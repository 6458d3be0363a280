use super::binding::invoke_isolated;
use crate::client::ConnectionManager;
use crate::client::connection::{Delivery, lock};
use crate::messaging::ChannelEvent;
use crate::types::{RealtimeMessage, Result};
use serde_json::Value;
use std::sync::Mutex;
use std::time::Duration;
use tokio::task::JoinHandle;

type ReplyCallback = Box<dyn FnOnce(Value) + Send + 'static>;

enum ReplyState {
    Pending {
        waiters: Vec<(String, ReplyCallback)>,
    },
    Replied {
        status: String,
        response: Value,
    },
}

struct PushInner {
    ref_id: Option<String>,
    reply: ReplyState,
    timeout_task: Option<JoinHandle<()>>,
}

/// One outgoing message awaiting its correlated reply.
///
/// `receive` and `trigger` commute: a callback fires exactly once for its status,
/// whether it was registered before or after the reply arrived.
pub struct Push {
    topic: String,
    event: ChannelEvent,
    payload: Value,
    timeout: Duration,
    inner: Mutex<PushInner>,
}

impl Push {
    pub fn new(topic: String, event: ChannelEvent, payload: Value, timeout: Duration) -> Self {
        Self {
            topic,
            event,
            payload,
            timeout,
            inner: Mutex::new(PushInner {
                ref_id: None,
                reply: ReplyState::Pending {
                    waiters: Vec::new(),
                },
                timeout_task: None,
            }),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn event(&self) -> &ChannelEvent {
        &self.event
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Reference assigned when the push was sent
    pub fn ref_id(&self) -> Option<String> {
        lock(&self.inner).ref_id.clone()
    }

    /// The recorded reply, if any
    pub fn reply(&self) -> Option<(String, Value)> {
        match &lock(&self.inner).reply {
            ReplyState::Replied { status, response } => Some((status.clone(), response.clone())),
            ReplyState::Pending { .. } => None,
        }
    }

    /// Registers `callback` for replies with `status`. Fires immediately when that
    /// reply has already been recorded.
    pub fn receive<F>(&self, status: &str, callback: F) -> &Self
    where
        F: FnOnce(Value) + Send + 'static,
    {
        let mut inner = lock(&self.inner);
        match &mut inner.reply {
            ReplyState::Pending { waiters } => {
                waiters.push((status.to_string(), Box::new(callback)));
            }
            ReplyState::Replied {
                status: replied,
                response,
            } => {
                if replied == status {
                    let response = response.clone();
                    drop(inner);
                    invoke_isolated(&self.topic, status, || callback(response));
                }
            }
        }
        self
    }

    /// Records the reply and fires the callbacks waiting on its status. Only the
    /// first reply counts.
    pub fn trigger(&self, status: &str, response: Value) {
        let mut inner = lock(&self.inner);
        let ReplyState::Pending { waiters } = &mut inner.reply else {
            tracing::debug!(
                "Ignoring '{}' reply for already answered push on {}",
                status,
                self.topic
            );
            return;
        };
        let waiters = std::mem::take(waiters);
        inner.reply = ReplyState::Replied {
            status: status.to_string(),
            response: response.clone(),
        };
        if let Some(handle) = inner.timeout_task.take() {
            handle.abort();
        }
        drop(inner);

        for (waiting_status, callback) in waiters {
            if waiting_status == status {
                let response = response.clone();
                invoke_isolated(&self.topic, status, || callback(response));
            }
        }
    }

    /// Assigns a fresh reference from `connection` and pushes the envelope.
    pub fn send(
        &self,
        connection: &ConnectionManager,
        join_ref: Option<String>,
    ) -> Result<Delivery> {
        let ref_id = connection.make_ref();
        self.send_with_ref(connection, ref_id, join_ref)
    }

    pub(crate) fn send_with_ref(
        &self,
        connection: &ConnectionManager,
        ref_id: String,
        join_ref: Option<String>,
    ) -> Result<Delivery> {
        lock(&self.inner).ref_id = Some(ref_id.clone());

        let mut message =
            RealtimeMessage::new(self.topic.clone(), self.event.clone(), self.payload.clone())
                .with_ref(ref_id);
        message.join_ref = join_ref;
        connection.push(&message)
    }

    pub(crate) fn set_timeout_task(&self, handle: JoinHandle<()>) {
        let mut inner = lock(&self.inner);
        if matches!(inner.reply, ReplyState::Replied { .. }) {
            handle.abort();
            return;
        }
        if let Some(previous) = inner.timeout_task.replace(handle) {
            previous.abort();
        }
    }

    pub(crate) fn cancel_timeout(&self) {
        if let Some(handle) = lock(&self.inner).timeout_task.take() {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for Push {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Push")
            .field("topic", &self.topic)
            .field("event", &self.event)
            .field("ref", &self.ref_id())
            .finish()
    }
}
