use crate::types::{MAX_PUSH_BUFFER_SIZE, RealtimeMessage, Result};
use crate::websocket::WsFrame;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::runtime::Handle;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Closed,
    Connecting,
    Open,
    Closing,
}

/// Outcome of [`ConnectionManager::push`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Handed to the open socket.
    Sent,
    /// Queued until the next open.
    Buffered,
}

/// Writer and send buffer share one lock so a flush can never interleave with a push.
struct Outbound {
    writer: Option<mpsc::UnboundedSender<WsFrame>>,
    buffer: VecDeque<String>,
}

/// Owns the socket write side, the send buffer and message references.
pub struct ConnectionManager {
    state: Mutex<ConnectionState>,
    outbound: Mutex<Outbound>,
    ref_counter: AtomicU64,
    generation: AtomicU64,
    runtime: Mutex<Option<Handle>>,
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ConnectionState::Closed),
            outbound: Mutex::new(Outbound {
                writer: None,
                buffer: VecDeque::new(),
            }),
            ref_counter: AtomicU64::new(0),
            generation: AtomicU64::new(0),
            runtime: Mutex::new(None),
        }
    }

    /// Gets the current connection state
    pub fn state(&self) -> ConnectionState {
        *lock(&self.state)
    }

    /// Sets the connection state
    pub fn set_state(&self, new_state: ConnectionState) {
        *lock(&self.state) = new_state;
    }

    /// Moves to `Connecting` unless a connect is already underway or done.
    pub(crate) fn begin_connect(&self) -> bool {
        let mut state = lock(&self.state);
        if matches!(*state, ConnectionState::Open | ConnectionState::Connecting) {
            return false;
        }
        *state = ConnectionState::Connecting;
        true
    }

    /// Checks if currently connected
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Generate next message reference. Unique and increasing for the manager's lifetime.
    pub fn make_ref(&self) -> String {
        (self.ref_counter.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    /// Identifier of the current socket; bumped on every open.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Runtime of the last open socket, for work started from threads outside it.
    pub fn runtime(&self) -> Option<Handle> {
        lock(&self.runtime).clone()
    }

    /// Encodes `message` and sends it, or buffers it while the socket is down.
    pub fn push(&self, message: &RealtimeMessage) -> Result<Delivery> {
        let text = message.encode()?;
        tracing::debug!(
            "Pushing topic={}, event={}, ref={:?}",
            message.topic,
            message.event,
            message.r#ref
        );

        let mut outbound = lock(&self.outbound);
        if let Some(writer) = outbound.writer.as_ref() {
            match writer.send(WsFrame::Text(text)) {
                Ok(()) => return Ok(Delivery::Sent),
                Err(mpsc::error::SendError(frame)) => {
                    tracing::warn!("Socket writer gone, buffering frame");
                    outbound.writer = None;
                    if let WsFrame::Text(text) = frame {
                        Self::enqueue(&mut outbound.buffer, text);
                    }
                    return Ok(Delivery::Buffered);
                }
            }
        }

        Self::enqueue(&mut outbound.buffer, text);
        Ok(Delivery::Buffered)
    }

    fn enqueue(buffer: &mut VecDeque<String>, text: String) {
        if buffer.len() >= MAX_PUSH_BUFFER_SIZE {
            buffer.pop_front();
            tracing::warn!(
                "Send buffer full ({} frames), dropping oldest frame",
                MAX_PUSH_BUFFER_SIZE
            );
        }
        buffer.push_back(text);
    }

    /// Number of frames waiting for the next open.
    pub fn buffered_len(&self) -> usize {
        lock(&self.outbound).buffer.len()
    }

    /// Installs the writer of a freshly opened socket, flushes the send buffer in
    /// FIFO order and marks the connection open. Returns the new socket generation.
    pub(crate) fn open(&self, writer: mpsc::UnboundedSender<WsFrame>) -> u64 {
        let mut state = lock(&self.state);
        let mut outbound = lock(&self.outbound);

        let pending = outbound.buffer.len();
        while let Some(text) = outbound.buffer.pop_front() {
            if let Err(mpsc::error::SendError(WsFrame::Text(text))) =
                writer.send(WsFrame::Text(text))
            {
                outbound.buffer.push_front(text);
                break;
            }
        }
        if pending > 0 {
            tracing::debug!("Flushed {} buffered frames", pending - outbound.buffer.len());
        }

        outbound.writer = Some(writer);
        if let Ok(handle) = Handle::try_current() {
            *lock(&self.runtime) = Some(handle);
        }
        *state = ConnectionState::Open;
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Handles a lost socket. Only the first signal for the current generation
    /// wins; later or stale signals return `false`.
    pub(crate) fn mark_lost(&self, generation: u64) -> bool {
        let mut state = lock(&self.state);
        if self.generation() != generation || *state != ConnectionState::Open {
            return false;
        }
        *state = ConnectionState::Closed;
        drop(state);

        if let Some(writer) = lock(&self.outbound).writer.take() {
            let _ = writer.send(WsFrame::Close);
        }
        true
    }

    /// Closes the socket and moves to `Closed`.
    pub fn close(&self) {
        self.set_state(ConnectionState::Closing);

        if let Some(writer) = lock(&self.outbound).writer.take() {
            let _ = writer.send(WsFrame::Close);
        }

        self.set_state(ConnectionState::Closed);
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::ChannelEvent;

    fn message(n: usize) -> RealtimeMessage {
        RealtimeMessage::new(
            "realtime:room1".to_string(),
            ChannelEvent::Custom("note".to_string()),
            serde_json::json!({ "n": n }),
        )
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<WsFrame>) -> Vec<WsFrame> {
        let mut frames = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            frames.push(frame);
        }
        frames
    }

    #[test]
    fn test_make_ref_is_unique_and_increasing() {
        let connection = ConnectionManager::new();
        let refs: Vec<u64> = (0..5)
            .map(|_| connection.make_ref().parse().unwrap())
            .collect();
        assert_eq!(refs, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_make_ref_under_concurrent_callers() {
        let connection = std::sync::Arc::new(ConnectionManager::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let connection = connection.clone();
                std::thread::spawn(move || {
                    (0..100).map(|_| connection.make_ref()).collect::<Vec<_>>()
                })
            })
            .collect();

        let mut all: Vec<String> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        all.sort();
        all.dedup();
        assert_eq!(all.len(), 800);
    }

    #[test]
    fn test_buffered_frames_flush_in_push_order() {
        let connection = ConnectionManager::new();
        for n in 0..5 {
            assert_eq!(connection.push(&message(n)).unwrap(), Delivery::Buffered);
        }
        assert_eq!(connection.buffered_len(), 5);

        let (tx, mut rx) = mpsc::unbounded_channel();
        connection.open(tx);
        assert_eq!(connection.push(&message(5)).unwrap(), Delivery::Sent);

        let ns: Vec<u64> = drain(&mut rx)
            .into_iter()
            .map(|frame| match frame {
                WsFrame::Text(text) => {
                    RealtimeMessage::decode(&text).unwrap().payload["n"]
                        .as_u64()
                        .unwrap()
                }
                WsFrame::Close => panic!("unexpected close"),
            })
            .collect();
        assert_eq!(ns, vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(connection.buffered_len(), 0);
        assert!(connection.is_connected());
    }

    #[test]
    fn test_mark_lost_only_honours_current_generation() {
        let connection = ConnectionManager::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let generation = connection.open(tx);

        assert!(!connection.mark_lost(generation + 1));
        assert!(connection.mark_lost(generation));
        assert!(!connection.mark_lost(generation));
        assert_eq!(connection.state(), ConnectionState::Closed);
        assert_eq!(drain(&mut rx), vec![WsFrame::Close]);

        // Pushes after a loss go back to the buffer.
        assert_eq!(connection.push(&message(0)).unwrap(), Delivery::Buffered);
    }

    #[test]
    fn test_push_after_writer_dropped_is_buffered() {
        let connection = ConnectionManager::new();
        let (tx, rx) = mpsc::unbounded_channel();
        connection.open(tx);
        drop(rx);

        assert_eq!(connection.push(&message(0)).unwrap(), Delivery::Buffered);
        assert_eq!(connection.buffered_len(), 1);
    }

    #[test]
    fn test_buffer_drops_oldest_when_full() {
        let connection = ConnectionManager::new();
        for n in 0..=MAX_PUSH_BUFFER_SIZE {
            connection.push(&message(n)).unwrap();
        }
        assert_eq!(connection.buffered_len(), MAX_PUSH_BUFFER_SIZE);

        let (tx, mut rx) = mpsc::unbounded_channel();
        connection.open(tx);
        let first = match drain(&mut rx).remove(0) {
            WsFrame::Text(text) => RealtimeMessage::decode(&text).unwrap(),
            WsFrame::Close => panic!("unexpected close"),
        };
        assert_eq!(first.payload["n"], 1);
    }

    #[test]
    fn test_begin_connect_is_noop_when_open_or_connecting() {
        let connection = ConnectionManager::new();
        assert!(connection.begin_connect());
        assert!(!connection.begin_connect());

        let (tx, _rx) = mpsc::unbounded_channel();
        connection.open(tx);
        assert!(!connection.begin_connect());

        connection.close();
        assert_eq!(connection.state(), ConnectionState::Closed);
        assert!(connection.begin_connect());
    }
}
