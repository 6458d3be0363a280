use crate::channel::RealtimeChannel;
use crate::client::ClientState;
use crate::client::connection::lock;
use crate::infrastructure::HeartbeatManager;
use crate::types::constants::PHOENIX_TOPIC;
use crate::types::message::RealtimeMessage;
use std::sync::{Arc, Mutex};

/// Routes incoming messages to appropriate handlers
pub struct MessageRouter {
    heartbeat: Arc<HeartbeatManager>,
    state: Arc<Mutex<ClientState>>,
}

impl MessageRouter {
    pub fn new(heartbeat: Arc<HeartbeatManager>, state: Arc<Mutex<ClientState>>) -> Self {
        Self { heartbeat, state }
    }

    /// Replies on the `phoenix` topic acknowledge heartbeats and stop here.
    /// Everything else goes to the channels registered for the frame's topic.
    pub fn route(&self, message: RealtimeMessage) {
        if message.topic == PHOENIX_TOPIC {
            if message.is_reply()
                && let Some(msg_ref) = message.r#ref.as_deref()
            {
                self.heartbeat.acknowledge(msg_ref);
            }
            return;
        }

        tracing::debug!(
            "Routing message: topic={}, event={}, ref={:?}",
            message.topic,
            message.event,
            message.r#ref
        );

        let channels: Vec<Arc<RealtimeChannel>> = lock(&self.state)
            .channels
            .iter()
            .filter(|channel| channel.topic() == message.topic)
            .cloned()
            .collect();

        match channels.as_slice() {
            [] => tracing::debug!("No channel for topic {}", message.topic),
            [channel] => channel.handle_message(message),
            _ => {
                for channel in &channels {
                    channel.handle_message(message.clone());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{ChannelContext, RealtimeChannelOptions};
    use crate::client::ConnectionManager;
    use crate::infrastructure::HeartbeatTick;
    use crate::messaging::{ChannelEvent, SystemEvent};
    use crate::websocket::WsFrame;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct Fixture {
        connection: Arc<ConnectionManager>,
        heartbeat: Arc<HeartbeatManager>,
        state: Arc<Mutex<ClientState>>,
        router: MessageRouter,
        _socket: mpsc::UnboundedReceiver<WsFrame>,
    }

    fn setup() -> Fixture {
        let connection = Arc::new(ConnectionManager::new());
        let (tx, rx) = mpsc::unbounded_channel();
        connection.open(tx);
        let heartbeat = Arc::new(HeartbeatManager::new(Duration::from_secs(25)));
        let state = Arc::new(Mutex::new(ClientState::new(None)));
        let router = MessageRouter::new(heartbeat.clone(), state.clone());
        Fixture {
            connection,
            heartbeat,
            state,
            router,
            _socket: rx,
        }
    }

    fn add_channel(
        connection: &Arc<ConnectionManager>,
        state: &Arc<Mutex<ClientState>>,
        topic: &str,
    ) -> Arc<RealtimeChannel> {
        let channel = Arc::new(RealtimeChannel::new(
            topic.to_string(),
            Arc::downgrade(connection),
            RealtimeChannelOptions::default(),
            ChannelContext {
                http_endpoint: "http://localhost:4000".to_string(),
                api_key: "k1".to_string(),
                push_timeout: Duration::from_secs(10),
                access_token: None,
            },
        ));
        lock(state).channels.push(channel.clone());
        channel
    }

    #[test]
    fn test_heartbeat_reply_acknowledges_and_is_not_routed() {
        let Fixture {
            connection,
            heartbeat,
            router,
            _socket,
            ..
        } = setup();
        let HeartbeatTick::Sent(heartbeat_ref) = heartbeat.tick(&connection) else {
            panic!("expected a heartbeat");
        };

        router.route(
            RealtimeMessage::new(
                PHOENIX_TOPIC.to_string(),
                ChannelEvent::System(SystemEvent::Reply),
                serde_json::json!({"status": "ok", "response": {}}),
            )
            .with_ref(heartbeat_ref),
        );

        assert_eq!(heartbeat.pending_ref(), None);
    }

    #[test]
    fn test_frames_reach_only_the_matching_topic() {
        let Fixture {
            connection,
            state,
            router,
            _socket,
            ..
        } = setup();
        let room1 = add_channel(&connection, &state, "realtime:room1");
        let room2 = add_channel(&connection, &state, "realtime:room2");

        let room1_calls = Arc::new(AtomicUsize::new(0));
        let count = room1_calls.clone();
        room1.on("ping", move |_| {
            count.fetch_add(1, Ordering::SeqCst);
        });
        let room2_calls = Arc::new(AtomicUsize::new(0));
        let count = room2_calls.clone();
        room2.on("ping", move |_| {
            count.fetch_add(1, Ordering::SeqCst);
        });

        router.route(RealtimeMessage::new(
            "realtime:room1".to_string(),
            ChannelEvent::parse("ping"),
            serde_json::json!({}),
        ));
        router.route(RealtimeMessage::new(
            "realtime:unknown".to_string(),
            ChannelEvent::parse("ping"),
            serde_json::json!({}),
        ));

        assert_eq!(room1_calls.load(Ordering::SeqCst), 1);
        assert_eq!(room2_calls.load(Ordering::SeqCst), 0);
    }
}
