// Infrastructure module - Core background services and utilities
pub mod heartbeat;
pub mod http;
pub mod task_manager;
pub mod timer;

pub use heartbeat::{HeartbeatManager, HeartbeatTick};
pub use http::{HttpBroadcaster, ws_to_http_endpoint};
pub use task_manager::TaskManager;
pub use timer::{ReconnectAfter, Timer, default_reconnect_after};
