//! # Phoenix Realtime Rust
//!
//! A client for Phoenix-protocol realtime servers such as Supabase Realtime:
//! broadcast messaging, presence tracking and Postgres change feeds,
//! multiplexed over a single WebSocket.
//!
//! ## Example
//!
//! ```no_run
//! use phoenix_realtime_rs::{RealtimeChannelOptions, RealtimeClient, RealtimeClientOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = RealtimeClient::new(
//!         "wss://your-project.supabase.co/realtime/v1",
//!         RealtimeClientOptions {
//!             api_key: "your-anon-key".to_string(),
//!             ..Default::default()
//!         }
//!     )?;
//!
//!     client.connect().await;
//!
//!     let channel = client.channel("room1", RealtimeChannelOptions::default());
//!     channel.on_broadcast("move", |payload| println!("move: {payload}"));
//!     channel.subscribe_with(|status, error| println!("{status:?} {error:?}"))?;
//!     Ok(())
//! }
//! ```

pub mod channel;
pub mod client;
pub mod infrastructure;
pub mod messaging;
pub mod types;
pub mod websocket;

pub use channel::{
    ChannelStatus, PostgresChangeEvent, PostgresChangesFilter, PostgresChangesPayload,
    PresenceMeta, PresenceState, Push, RealtimeChannel, RealtimeChannelOptions,
    SubscriptionStatus,
};
pub use client::{ConnectionState, RealtimeClient, RealtimeClientBuilder, RealtimeClientOptions};
pub use infrastructure::{ReconnectAfter, default_reconnect_after};
pub use messaging::{ChannelEvent, SystemEvent};
pub use types::{RealtimeError, RealtimeMessage, Result};
pub use websocket::{WebSocketConnector, WebSocketFactory, WsConnection, WsEvent, WsFrame};
