//! ResourceFetcher port - ResilientLoader が呼び出す取得処理
//!
//! # キャンセル
//! 渡される CancellationToken は協調的なキャンセル信号です。新しい ticket が
//! 発行されると前の token がキャンセルされるので、実装は token を見て通信を
//! 中断します（ソケットのクローズやリクエストの破棄）。中断できない実装でも
//! ticket の鮮度チェックで古い結果は捨てられます。

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::domain::TransportError;

#[async_trait]
pub trait ResourceFetcher<T>: Send + Sync {
    async fn fetch(&self, cancel: CancellationToken) -> Result<Vec<T>, TransportError>;
}
