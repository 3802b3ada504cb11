//! Push port - サーバからの変更通知ストリーム
//!
//! ChangeChannel はこの trait を通してだけ接続を扱います。

use async_trait::async_trait;

use crate::domain::TransportError;

/// Close code of an intentional, normal closure.
pub const NORMAL_CLOSURE: u16 = 1000;

/// Close code reported when a stream ends without a close frame.
pub const ABNORMAL_CLOSURE: u16 = 1006;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushFrame {
    Text(String),
    Closed { code: u16, reason: String },
}

/// PushConnector は credential 付きの接続を開く
#[async_trait]
pub trait PushConnector: Send + Sync {
    async fn connect(&self, credential: &str) -> Result<Box<dyn PushConnection>, TransportError>;
}

/// One live bidirectional connection.
#[async_trait]
pub trait PushConnection: Send {
    /// Next inbound frame. `None` when the stream ended without a close frame.
    async fn recv(&mut self) -> Option<PushFrame>;

    async fn send(&mut self, text: String) -> Result<(), TransportError>;

    async fn close(&mut self, code: u16, reason: &str) -> Result<(), TransportError>;
}
