// WebSocket transport — plain ws:// links between relays and clients

use super::link::{pump, Link, LinkEvent, LinkEvents, Transport};
use super::TransportError;
use crate::store::NodeAddress;
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

/// Give up on a WebSocket handshake after this long
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub type ClientStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[async_trait]
impl<S> Transport for WebSocketStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        SinkExt::send(self, WsMessage::Text(text))
            .await
            .map_err(|e| TransportError::WebSocket(e.to_string()))
    }

    async fn next_text(&mut self) -> Option<Result<String, TransportError>> {
        loop {
            match StreamExt::next(self).await? {
                Ok(WsMessage::Text(text)) => return Some(Ok(text)),
                Ok(WsMessage::Binary(bytes)) => match String::from_utf8(bytes) {
                    Ok(text) => return Some(Ok(text)),
                    Err(_) => tracing::warn!("Dropping non-UTF-8 binary frame"),
                },
                Ok(WsMessage::Close(_)) => return None,
                // Ping/pong are answered by tungstenite itself
                Ok(_) => {}
                Err(e) => return Some(Err(TransportError::WebSocket(e.to_string()))),
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = WebSocketStream::close(self, None).await {
            tracing::debug!("WebSocket close: {}", e);
        }
    }
}

/// Open a WebSocket to `node`
pub async fn connect(node: &NodeAddress) -> Result<ClientStream, TransportError> {
    let url = format!("ws://{}/", node);
    let (stream, _response) = tokio::time::timeout(CONNECT_TIMEOUT, tokio_tungstenite::connect_async(url))
        .await
        .map_err(|_| TransportError::Timeout)?
        .map_err(|e| TransportError::Connect(format!("{}: {}", node, e)))?;
    Ok(stream)
}

/// Start dialing `node` and return its link immediately.
///
/// Frames sent before the socket opens are buffered and flushed once it
/// does. A failed dial yields `Closed` without `Opened`.
pub fn dial(node: NodeAddress) -> (Link, LinkEvents) {
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let link = Link::new(command_tx);
    let id = link.id();

    tokio::spawn(async move {
        match connect(&node).await {
            Ok(stream) => {
                tracing::debug!("{} connected to {}", id, node);
                let _ = event_tx.send(LinkEvent::Opened);
                pump(id, stream, command_rx, &event_tx).await;
            }
            Err(e) => tracing::debug!("{} dial failed: {}", id, e),
        }
        let _ = event_tx.send(LinkEvent::Closed);
    });

    (link, event_rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Frame, Whoami};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_dial_unreachable_node_closes() {
        // Bind then drop to get a port with nobody listening
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let node = NodeAddress::from_parts("127.0.0.1", port).unwrap();
        let (_link, mut events) = dial(node);
        assert_eq!(events.recv().await, Some(LinkEvent::Closed));
    }

    #[tokio::test]
    async fn test_dial_flushes_buffered_frames() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            ws.next_text().await.unwrap().unwrap()
        });

        let frame = Frame::Whoami(Whoami::Server {
            port: 3000,
            address: None,
        });
        let (link, mut events) = dial(NodeAddress::from_parts("127.0.0.1", port).unwrap());
        link.send(&frame).unwrap();

        assert_eq!(events.recv().await, Some(LinkEvent::Opened));
        assert_eq!(server.await.unwrap(), frame.encode());
    }
}
