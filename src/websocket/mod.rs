// WebSocket module - transport seam and the tungstenite-backed default
pub mod factory;

pub use factory::{WebSocketConnector, WebSocketFactory, WsConnection, WsEvent, WsFrame};
