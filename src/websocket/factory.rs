use async_trait::async_trait;
use futures::stream::SplitStream;
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::types::Result;

const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Frames the client hands to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WsFrame {
    Text(String),
    Close,
}

/// Events the transport reports back to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WsEvent {
    Text(String),
    Closed(Option<String>),
    Error(String),
}

/// An established socket, expressed as a pair of channels.
///
/// Dropping `outbound` or sending [`WsFrame::Close`] closes the socket. The
/// transport ends `inbound` (or sends `Closed`/`Error`) when the socket goes away.
pub struct WsConnection {
    pub outbound: mpsc::UnboundedSender<WsFrame>,
    pub inbound: mpsc::UnboundedReceiver<WsEvent>,
}

/// Opens sockets for the client. Swap this out to run against an in-memory server.
#[async_trait]
pub trait WebSocketConnector: Send + Sync + 'static {
    async fn connect(&self, url: &str) -> Result<WsConnection>;
}

/// Default connector backed by `tokio-tungstenite`.
#[derive(Debug, Default, Clone, Copy)]
pub struct WebSocketFactory;

#[async_trait]
impl WebSocketConnector for WebSocketFactory {
    async fn connect(&self, url: &str) -> Result<WsConnection> {
        tracing::debug!("Creating WebSocket connection to: {}", url);
        let (ws_stream, _) = tokio_tungstenite::connect_async(url).await?;
        let (mut write_half, read_half) = ws_stream.split();

        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<WsFrame>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<WsEvent>();

        // Fired when the writer stops so the reader releases its half even if the
        // peer never answers the close (half-open socket).
        let (writer_done_tx, writer_done_rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                match frame {
                    WsFrame::Text(text) => {
                        if let Err(e) = write_half.send(Message::Text(text.into())).await {
                            tracing::error!("WebSocket write error: {}", e);
                            break;
                        }
                    }
                    WsFrame::Close => break,
                }
            }
            let _ = writer_done_tx.send(());
            match tokio::time::timeout(CLOSE_TIMEOUT, write_half.close()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::debug!("WebSocket close handshake failed: {}", e),
                Err(_) => tracing::debug!("WebSocket close handshake timed out"),
            }
            tracing::debug!("Write task finished");
        });

        tokio::spawn(read_pump(read_half, inbound_tx, writer_done_rx));

        Ok(WsConnection {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}

type ReadHalf = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Forwards socket reads to `inbound` until the socket ends, the client stops
/// listening or the writer has shut down.
async fn read_pump(
    mut read_half: ReadHalf,
    inbound_tx: mpsc::UnboundedSender<WsEvent>,
    mut writer_done: oneshot::Receiver<()>,
) {
    loop {
        let msg_result = tokio::select! {
            _ = &mut writer_done => {
                tracing::debug!("Writer stopped, ending read task");
                return;
            }
            next = read_half.next() => match next {
                Some(msg_result) => msg_result,
                None => break,
            },
        };

        let event = match msg_result {
            Ok(Message::Text(text)) => WsEvent::Text(text.to_string()),
            Ok(Message::Close(frame)) => {
                let reason = frame.map(|close_frame| {
                    format!("code={:?}, reason='{}'", close_frame.code, close_frame.reason)
                });
                let _ = inbound_tx.send(WsEvent::Closed(reason));
                return;
            }
            Ok(Message::Ping(data)) => {
                tracing::debug!("Received ping ({} bytes)", data.len());
                continue;
            }
            Ok(Message::Pong(data)) => {
                tracing::debug!("Received pong ({} bytes)", data.len());
                continue;
            }
            Ok(Message::Binary(data)) => {
                tracing::warn!("Received unexpected binary message ({} bytes)", data.len());
                continue;
            }
            Ok(Message::Frame(_)) => continue,
            Err(e) => {
                let _ = inbound_tx.send(WsEvent::Error(e.to_string()));
                return;
            }
        };
        if inbound_tx.send(event).is_err() {
            return;
        }
    }
    let _ = inbound_tx.send(WsEvent::Closed(None));
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    /// Accepts one socket and then never reads from it, so a close is never answered.
    async fn silent_server() -> (String, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let _socket = tokio_tungstenite::accept_async(tcp).await.unwrap();
            tokio::time::sleep(Duration::from_secs(60)).await;
        });
        (url, server)
    }

    #[tokio::test]
    async fn test_text_frames_reach_the_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut socket = tokio_tungstenite::accept_async(tcp).await.unwrap();
            match socket.next().await {
                Some(Ok(Message::Text(text))) => text.to_string(),
                other => panic!("unexpected frame: {:?}", other),
            }
        });

        let connection = WebSocketFactory.connect(&url).await.unwrap();
        connection
            .outbound
            .send(WsFrame::Text("hello".to_string()))
            .unwrap();
        assert_eq!(server.await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn test_close_releases_reader_on_unresponsive_peer() {
        let (url, server) = silent_server().await;
        let mut connection = WebSocketFactory.connect(&url).await.unwrap();

        connection.outbound.send(WsFrame::Close).unwrap();
        let ended = tokio::time::timeout(Duration::from_secs(2), connection.inbound.recv()).await;
        assert!(matches!(ended, Ok(None)), "reader still running: {:?}", ended);
        server.abort();
    }
}
