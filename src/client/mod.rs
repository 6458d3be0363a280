// Module declarations
mod builder;
pub mod connection;
mod core;
mod state;

// Public API exports
pub use self::core::RealtimeClient;
pub use builder::{RealtimeClientBuilder, RealtimeClientOptions};
pub use connection::{ConnectionManager, ConnectionState, Delivery};
pub use state::ClientState;
