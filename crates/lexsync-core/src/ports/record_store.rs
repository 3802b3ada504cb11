//! RecordStore port - REST CRUD コラボレータ
//!
//! 各エンティティに対する list / get / search / create / update / delete。
//!
//! # 設計原則
//! - update の body には必ず `version` が入る。不一致なら 409（Status { status: 409 }）
//! - create の body には `version` を入れない
//! - 401 を受けた実装は資格情報を破棄して `TransportError::Unauthorized` を返す
//! - list は CancellationToken を受け取り、キャンセルされたら通信を中断する

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::domain::{EntityType, TransportError};

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn list(
        &self,
        entity: EntityType,
        cancel: &CancellationToken,
    ) -> Result<Vec<Value>, TransportError>;

    async fn get(&self, entity: EntityType, id: &str) -> Result<Value, TransportError>;

    /// Filtered list (`/api/cases/search?...` for cases).
    async fn search(
        &self,
        entity: EntityType,
        params: &[(String, String)],
    ) -> Result<Vec<Value>, TransportError>;

    async fn create(&self, entity: EntityType, body: Value) -> Result<Value, TransportError>;

    async fn update(
        &self,
        entity: EntityType,
        id: &str,
        body: Value,
    ) -> Result<Value, TransportError>;

    async fn delete(&self, entity: EntityType, id: &str) -> Result<(), TransportError>;
}
