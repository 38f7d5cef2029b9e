//! Authenticated message channel to the relay.

use crate::{Result, SwapenvError};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header::AUTHORIZATION, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

pub const SHARE_PATH: &str = "/share";
pub const RECEIVE_PATH: &str = "/receive";

/// One data frame exchanged with the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

impl Frame {
    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Self::Text(text) => text.into_bytes(),
            Self::Binary(data) => data,
        }
    }
}

/// Ordered, bidirectional frame transport.
#[async_trait]
pub trait RelayChannel: Send {
    async fn send(&mut self, frame: Frame) -> Result<()>;

    /// Next data frame, or `None` once the relay closed the connection.
    async fn recv(&mut self) -> Result<Option<Frame>>;
}

/// `http(s)://host` to `ws(s)://host{path}`.
pub fn relay_url(server_url: &str, path: &str) -> String {
    let base = server_url.trim_end_matches('/');
    let base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        base.to_string()
    };
    format!("{}{}", base, path)
}

/// WebSocket connection to the relay, authenticated with a bearer token.
pub struct WsChannel {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl WsChannel {
    pub async fn connect(server_url: &str, path: &str, token: &str) -> Result<Self> {
        let url = relay_url(server_url, path);
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| SwapenvError::Relay(format!("Invalid relay URL {}: {}", url, e)))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|_| SwapenvError::InvalidInput("Token is not a valid header".to_string()))?;
        request.headers_mut().insert(AUTHORIZATION, bearer);

        let (stream, response) = connect_async(request)
            .await
            .map_err(|e| SwapenvError::Relay(format!("Failed to connect to {}: {}", url, e)))?;
        debug!("Connected to relay {} ({})", url, response.status());

        Ok(Self { stream })
    }

    pub async fn close(&mut self) -> Result<()> {
        self.stream
            .close(None)
            .await
            .map_err(|e| SwapenvError::Relay(format!("Close failed: {}", e)))
    }
}

#[async_trait]
impl RelayChannel for WsChannel {
    async fn send(&mut self, frame: Frame) -> Result<()> {
        let message = match frame {
            Frame::Text(text) => Message::Text(text),
            Frame::Binary(data) => Message::Binary(data),
        };
        self.stream
            .send(message)
            .await
            .map_err(|e| SwapenvError::Relay(format!("Send failed: {}", e)))
    }

    async fn recv(&mut self) -> Result<Option<Frame>> {
        while let Some(message) = self.stream.next().await {
            let message =
                message.map_err(|e| SwapenvError::Relay(format!("Receive failed: {}", e)))?;
            match message {
                Message::Text(text) => return Ok(Some(Frame::Text(text))),
                Message::Binary(data) => return Ok(Some(Frame::Binary(data))),
                Message::Close(_) => return Ok(None),
                // tungstenite answers pings itself
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
            }
        }
        Ok(None)
    }
}

/// In-process channel pair for exercising the protocol without a relay.
#[cfg(test)]
pub(crate) mod memory {
    use super::*;
    use tokio::sync::mpsc;

    pub struct MemoryChannel {
        tx: mpsc::UnboundedSender<Frame>,
        rx: mpsc::UnboundedReceiver<Frame>,
    }

    /// Two connected ends.
    pub fn pair() -> (MemoryChannel, MemoryChannel) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        (
            MemoryChannel { tx: a_tx, rx: b_rx },
            MemoryChannel { tx: b_tx, rx: a_rx },
        )
    }

    #[async_trait]
    impl RelayChannel for MemoryChannel {
        async fn send(&mut self, frame: Frame) -> Result<()> {
            self.tx
                .send(frame)
                .map_err(|_| SwapenvError::Relay("peer hung up".to_string()))
        }

        async fn recv(&mut self) -> Result<Option<Frame>> {
            Ok(self.rx.recv().await)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relay_url_switches_scheme() {
        assert_eq!(
            relay_url("https://swapenv.sh", SHARE_PATH),
            "wss://swapenv.sh/share"
        );
        assert_eq!(
            relay_url("http://localhost:8080/", RECEIVE_PATH),
            "ws://localhost:8080/receive"
        );
        assert_eq!(relay_url("wss://relay", SHARE_PATH), "wss://relay/share");
    }

    #[test]
    fn frame_bytes() {
        assert_eq!(Frame::Text("ab".to_string()).into_bytes(), b"ab".to_vec());
        assert_eq!(Frame::Binary(vec![1, 2]).into_bytes(), vec![1, 2]);
    }

    #[tokio::test]
    async fn memory_pair_is_connected() {
        let (mut a, mut b) = memory::pair();
        a.send(Frame::Text("hi".to_string())).await.unwrap();
        assert_eq!(b.recv().await.unwrap(), Some(Frame::Text("hi".to_string())));

        drop(a);
        assert_eq!(b.recv().await.unwrap(), None);
    }
}
