use crate::client::ConnectionManager;
use crate::client::connection::lock;
use crate::types::message::RealtimeMessage;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time;

const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Result of one heartbeat tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatTick {
    /// A heartbeat went out with this ref.
    Sent(String),
    /// The previous heartbeat was never answered.
    TimedOut,
    /// Socket not open; nothing to do.
    Skipped,
}

/// Periodic keepalive with a single in-flight heartbeat.
pub struct HeartbeatManager {
    interval: Duration,
    pending_ref: Mutex<Option<String>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl HeartbeatManager {
    /// An interval below 1ms is raised to 1ms; tokio intervals need a non-zero period.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval: interval.max(MIN_INTERVAL),
            pending_ref: Mutex::new(None),
            task: Mutex::new(None),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn pending_ref(&self) -> Option<String> {
        lock(&self.pending_ref).clone()
    }

    /// One heartbeat step. A tick that finds the previous heartbeat still pending
    /// clears the marker and reports a timeout instead of sending.
    pub fn tick(&self, connection: &ConnectionManager) -> HeartbeatTick {
        if !connection.is_connected() {
            return HeartbeatTick::Skipped;
        }

        let mut pending = lock(&self.pending_ref);
        if pending.take().is_some() {
            return HeartbeatTick::TimedOut;
        }

        let new_ref = connection.make_ref();
        *pending = Some(new_ref.clone());
        drop(pending);

        match connection.push(&RealtimeMessage::heartbeat(new_ref.clone())) {
            Ok(_) => tracing::debug!("Sent heartbeat with ref {}", new_ref),
            Err(e) => tracing::error!("[Heartbeat] Failed to send: {}", e),
        }
        HeartbeatTick::Sent(new_ref)
    }

    /// Clears the pending marker when `msg_ref` answers the in-flight heartbeat.
    pub fn acknowledge(&self, msg_ref: &str) -> bool {
        let mut pending = lock(&self.pending_ref);
        if pending.as_deref() == Some(msg_ref) {
            *pending = None;
            tracing::debug!("Received heartbeat ack for ref {}", msg_ref);
            true
        } else {
            false
        }
    }

    /// Spawns the heartbeat task, replacing any running one.
    ///
    /// `on_timeout` runs once when a heartbeat goes unanswered; the task ends after it.
    pub fn start<F>(self: &Arc<Self>, connection: Weak<ConnectionManager>, on_timeout: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.stop();

        let manager = Arc::downgrade(self);
        let period = self.interval;
        let mut task = lock(&self.task);
        *task = Some(tokio::spawn(async move {
            let mut interval_timer = time::interval_at(time::Instant::now() + period, period);
            interval_timer.set_missed_tick_behavior(time::MissedTickBehavior::Skip);

            loop {
                interval_timer.tick().await;

                // Client dropped, exit heartbeat task
                let (Some(manager), Some(connection)) = (manager.upgrade(), connection.upgrade())
                else {
                    break;
                };

                if manager.tick(&connection) == HeartbeatTick::TimedOut {
                    tracing::warn!("[Heartbeat] Timeout detected, closing connection");
                    drop(manager);
                    on_timeout();
                    break;
                }
            }
        }));
    }

    /// Cancels the heartbeat task and forgets any in-flight heartbeat.
    pub fn stop(&self) {
        if let Some(handle) = lock(&self.task).take() {
            handle.abort();
        }
        *lock(&self.pending_ref) = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::WsFrame;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    fn open_connection() -> (Arc<ConnectionManager>, mpsc::UnboundedReceiver<WsFrame>) {
        let connection = Arc::new(ConnectionManager::new());
        let (tx, rx) = mpsc::unbounded_channel();
        connection.open(tx);
        (connection, rx)
    }

    #[test]
    fn test_tick_skips_when_closed() {
        let heartbeat = HeartbeatManager::new(Duration::from_millis(100));
        let connection = ConnectionManager::new();
        assert_eq!(heartbeat.tick(&connection), HeartbeatTick::Skipped);
        assert_eq!(connection.buffered_len(), 0);
    }

    #[test]
    fn test_second_tick_without_reply_is_timeout() {
        let heartbeat = HeartbeatManager::new(Duration::from_millis(100));
        let (connection, mut rx) = open_connection();

        let HeartbeatTick::Sent(first) = heartbeat.tick(&connection) else {
            panic!("expected a heartbeat to be sent");
        };
        assert_eq!(heartbeat.pending_ref(), Some(first.clone()));

        let Ok(WsFrame::Text(text)) = rx.try_recv() else {
            panic!("expected a heartbeat frame");
        };
        let frame = RealtimeMessage::decode(&text).unwrap();
        assert_eq!(frame.topic, "phoenix");
        assert_eq!(frame.event.as_str(), "heartbeat");
        assert_eq!(frame.r#ref, Some(first));

        assert_eq!(heartbeat.tick(&connection), HeartbeatTick::TimedOut);
        assert_eq!(heartbeat.pending_ref(), None);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_acknowledged_heartbeat_allows_next_send() {
        let heartbeat = HeartbeatManager::new(Duration::from_millis(100));
        let (connection, _rx) = open_connection();

        let HeartbeatTick::Sent(first) = heartbeat.tick(&connection) else {
            panic!("expected a heartbeat to be sent");
        };
        assert!(!heartbeat.acknowledge("not-the-ref"));
        assert!(heartbeat.acknowledge(&first));

        assert!(matches!(heartbeat.tick(&connection), HeartbeatTick::Sent(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_reports_timeout_once() {
        let heartbeat = Arc::new(HeartbeatManager::new(Duration::from_millis(100)));
        let (connection, _rx) = open_connection();
        let timeouts = Arc::new(AtomicUsize::new(0));

        let counter = timeouts.clone();
        heartbeat.start(Arc::downgrade(&connection), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(heartbeat.pending_ref().is_some());
        assert_eq!(timeouts.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(timeouts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_still_sends_heartbeats() {
        let heartbeat = Arc::new(HeartbeatManager::new(Duration::ZERO));
        assert_eq!(heartbeat.interval(), Duration::from_millis(1));
        let (connection, mut rx) = open_connection();

        heartbeat.start(Arc::downgrade(&connection), || {});
        tokio::time::sleep(Duration::from_millis(2)).await;

        let Ok(WsFrame::Text(text)) = rx.try_recv() else {
            panic!("expected a heartbeat frame");
        };
        assert_eq!(RealtimeMessage::decode(&text).unwrap().topic, "phoenix");
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_task_and_clears_pending() {
        let heartbeat = Arc::new(HeartbeatManager::new(Duration::from_millis(100)));
        let (connection, mut rx) = open_connection();

        heartbeat.start(Arc::downgrade(&connection), || panic!("no timeout expected"));
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(heartbeat.pending_ref().is_some());

        heartbeat.stop();
        assert_eq!(heartbeat.pending_ref(), None);

        while rx.try_recv().is_ok() {}
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(rx.try_recv().is_err());
    }
}
