use crate::client::connection::lock;
use crate::types::{DEFAULT_RECONNECT_FALLBACK, RECONNECT_INTERVALS};
use futures::future::BoxFuture;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Maps the 1-based attempt number of a failure streak to the delay before that attempt.
pub type ReconnectAfter = Arc<dyn Fn(u32) -> Duration + Send + Sync + 'static>;

/// Default backoff: 1s, 2s, 5s, 10s, then 10s for every further attempt.
pub fn default_reconnect_after(tries: u32) -> Duration {
    let index = tries.saturating_sub(1) as usize;
    let millis = RECONNECT_INTERVALS
        .get(index)
        .copied()
        .unwrap_or(DEFAULT_RECONNECT_FALLBACK);
    Duration::from_millis(millis)
}

struct TimerState {
    tries: u32,
    scheduled: Option<(u64, JoinHandle<()>)>,
    next_id: u64,
}

/// One-shot timer with exponential backoff, used for reconnection.
///
/// At most one callback is scheduled at a time; scheduling again replaces the
/// pending one and `reset` cancels it.
pub struct Timer {
    reconnect_after: ReconnectAfter,
    state: Mutex<TimerState>,
}

impl Timer {
    pub fn new(reconnect_after: ReconnectAfter) -> Self {
        Self {
            reconnect_after,
            state: Mutex::new(TimerState {
                tries: 0,
                scheduled: None,
                next_id: 0,
            }),
        }
    }

    /// Get the next delay duration and count the attempt
    pub fn next_delay(&self) -> Duration {
        let mut state = lock(&self.state);
        state.tries += 1;
        (self.reconnect_after)(state.tries)
    }

    /// Attempts counted since the last reset
    pub fn tries(&self) -> u32 {
        lock(&self.state).tries
    }

    pub fn is_scheduled(&self) -> bool {
        lock(&self.state).scheduled.is_some()
    }

    /// Reset the attempt counter and cancel any scheduled callback
    pub fn reset(&self) {
        let mut state = lock(&self.state);
        state.tries = 0;
        if let Some((_, handle)) = state.scheduled.take() {
            handle.abort();
        }
    }

    /// Runs `callback` after the next backoff delay. Returns the delay used.
    pub fn schedule_timeout<F>(self: &Arc<Self>, callback: F) -> Duration
    where
        F: FnOnce() -> BoxFuture<'static, ()> + Send + 'static,
    {
        let mut state = lock(&self.state);
        if let Some((_, handle)) = state.scheduled.take() {
            handle.abort();
        }

        state.tries += 1;
        let delay = (self.reconnect_after)(state.tries);
        state.next_id += 1;
        let id = state.next_id;

        let timer = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Release our slot first so the callback may reset or reschedule.
            let Some(timer) = timer.upgrade() else {
                return;
            };
            if !timer.release(id) {
                return;
            }
            drop(timer);
            callback().await;
        });
        state.scheduled = Some((id, handle));

        delay
    }

    fn release(&self, id: u64) -> bool {
        let mut state = lock(&self.state);
        match &state.scheduled {
            Some((scheduled_id, _)) if *scheduled_id == id => {
                state.scheduled = None;
                true
            }
            _ => false,
        }
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new(Arc::new(default_reconnect_after))
    }
}
