//! WsPushConnector - tokio-tungstenite による push channel
//!
//! 接続先は `{ws_url}/ws/{credential}`。テキストフレームだけを上位へ渡し、
//! ping/pong は tungstenite に任せます。

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::debug;

use crate::domain::TransportError;
use crate::ports::{PushConnection, PushConnector, PushFrame};

/// Close code reported for a close frame without a status.
const NO_STATUS: u16 = 1005;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone)]
pub struct WsPushConnector {
    ws_url: String,
}

impl WsPushConnector {
    pub fn new(ws_url: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn endpoint(&self, credential: &str) -> String {
        format!("{}/ws/{credential}", self.ws_url)
    }
}

#[async_trait]
impl PushConnector for WsPushConnector {
    async fn connect(&self, credential: &str) -> Result<Box<dyn PushConnection>, TransportError> {
        let (stream, response) = connect_async(self.endpoint(credential))
            .await
            .map_err(|e| TransportError::Network(format!("websocket connect failed: {e}")))?;
        debug!(status = response.status().as_u16(), "websocket handshake completed");
        Ok(Box::new(WsPushConnection { stream }))
    }
}

struct WsPushConnection {
    stream: WsStream,
}

#[async_trait]
impl PushConnection for WsPushConnection {
    async fn recv(&mut self) -> Option<PushFrame> {
        loop {
            let message = match self.stream.next().await? {
                Ok(message) => message,
                Err(err) => {
                    debug!(error = %err, "websocket read failed");
                    return None;
                }
            };
            match message {
                Message::Text(text) => return Some(PushFrame::Text(text)),
                Message::Binary(bytes) => match String::from_utf8(bytes) {
                    Ok(text) => return Some(PushFrame::Text(text)),
                    Err(_) => debug!("dropping non-UTF-8 binary frame"),
                },
                Message::Close(frame) => {
                    let (code, reason) = frame
                        .map(|f| (u16::from(f.code), f.reason.into_owned()))
                        .unwrap_or((NO_STATUS, String::new()));
                    return Some(PushFrame::Closed { code, reason });
                }
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
            }
        }
    }

    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        self.stream
            .send(Message::Text(text))
            .await
            .map_err(|e| TransportError::Network(format!("websocket send failed: {e}")))
    }

    async fn close(&mut self, code: u16, reason: &str) -> Result<(), TransportError> {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: reason.to_string().into(),
        };
        self.stream
            .close(Some(frame))
            .await
            .map_err(|e| TransportError::Network(format!("websocket close failed: {e}")))
    }
}
