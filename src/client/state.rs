use crate::channel::RealtimeChannel;
use crate::infrastructure::TaskManager;
use std::sync::Arc;

/// Consolidated mutable state for RealtimeClient
/// Using a single struct reduces lock contention
pub struct ClientState {
    /// All channels managed by this client
    pub channels: Vec<Arc<RealtimeChannel>>,

    /// Bearer token sent with joins and HTTP broadcasts
    pub access_token: Option<String>,

    /// Socket reader task
    pub task_manager: TaskManager,

    /// Whether the disconnect was manual (prevents auto-reconnect)
    pub was_manual_disconnect: bool,
}

impl ClientState {
    pub fn new(access_token: Option<String>) -> Self {
        Self {
            channels: Vec::new(),
            access_token,
            task_manager: TaskManager::new(),
            was_manual_disconnect: false,
        }
    }

    pub fn find_channel(&self, topic: &str) -> Option<Arc<RealtimeChannel>> {
        self.channels
            .iter()
            .find(|channel| channel.topic() == topic)
            .cloned()
    }
}

impl Default for ClientState {
    fn default() -> Self {
        Self::new(None)
    }
}
