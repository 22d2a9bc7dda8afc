//! Socket seam between the supervisor and the network.

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use pairwatch_core::error::WatchError;

/// Opens fresh connections to one endpoint.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self) -> Result<Box<dyn Connection>, WatchError>;

    fn url(&self) -> &str;
}

/// One open, text-framed duplex connection.
#[async_trait]
pub trait Connection: Send {
    async fn send_text(&mut self, text: String) -> Result<(), WatchError>;

    /// Next text frame. `None` once the peer has closed the connection.
    async fn next_text(&mut self) -> Option<Result<String, WatchError>>;

    async fn close(&mut self);
}

/// tokio-tungstenite connector.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
    connect_timeout: Duration,
}

impl WsConnector {
    pub fn new(url: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            url: url.into(),
            connect_timeout,
        }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self) -> Result<Box<dyn Connection>, WatchError> {
        tracing::info!(url = %self.url, "connecting via WebSocket");
        let (stream, _) =
            tokio::time::timeout(self.connect_timeout, tokio_tungstenite::connect_async(self.url.as_str()))
                .await
                .map_err(|_| WatchError::ConnectTimeout {
                    ms: self.connect_timeout.as_millis() as u64,
                })?
                .map_err(|e| WatchError::WebSocket(e.to_string()))?;
        Ok(Box::new(WsConnection { stream }))
    }

    fn url(&self) -> &str {
        &self.url
    }
}

struct WsConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Connection for WsConnection {
    async fn send_text(&mut self, text: String) -> Result<(), WatchError> {
        self.stream
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| WatchError::WebSocket(e.to_string()))
    }

    async fn next_text(&mut self) -> Option<Result<String, WatchError>> {
        loop {
            let msg = match self.stream.next().await? {
                Ok(msg) => msg,
                Err(e) => return Some(Err(WatchError::WebSocket(e.to_string()))),
            };
            match msg {
                Message::Text(text) => return Some(Ok(text.as_str().to_owned())),
                Message::Binary(bytes) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => return Some(Ok(text)),
                    Err(_) => tracing::debug!("dropping non-UTF-8 binary frame"),
                },
                Message::Ping(payload) => {
                    if let Err(e) = self.stream.send(Message::Pong(payload)).await {
                        return Some(Err(WatchError::WebSocket(e.to_string())));
                    }
                }
                Message::Close(frame) => {
                    tracing::debug!(frame = ?frame, "peer closed the connection");
                    return None;
                }
                _ => {}
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            tracing::debug!(error = %e, "error while closing WebSocket");
        }
    }
}
