//! ListFetcher - RecordStore の一覧を型付きレコードに変換する ResourceFetcher
//!
//! ResilientLoader<T> に渡す取得処理の標準実装です。
//! 1 件でもデコードに失敗したら、その回の取得全体を Decode エラーにします。

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::entity::Entity;
use crate::domain::TransportError;
use crate::ports::{RecordStore, ResourceFetcher};

pub struct ListFetcher<T> {
    store: Arc<dyn RecordStore>,
    filter: Option<Vec<(String, String)>>,
    _entity: PhantomData<fn() -> T>,
}

impl<T: Entity> ListFetcher<T> {
    /// Full collection of `T`.
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self {
            store,
            filter: None,
            _entity: PhantomData,
        }
    }

    /// Filtered collection through the search endpoint.
    pub fn search(store: Arc<dyn RecordStore>, params: Vec<(String, String)>) -> Self {
        Self {
            store,
            filter: Some(params),
            _entity: PhantomData,
        }
    }
}

#[async_trait]
impl<T: Entity> ResourceFetcher<T> for ListFetcher<T> {
    async fn fetch(&self, cancel: CancellationToken) -> Result<Vec<T>, TransportError> {
        let values = match &self.filter {
            None => self.store.list(T::TYPE, &cancel).await?,
            Some(params) => {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(TransportError::Cancelled),
                    found = self.store.search(T::TYPE, params) => found?,
                }
            }
        };
        values.into_iter().map(decode::<T>).collect()
    }
}

fn decode<T: Entity>(value: Value) -> Result<T, TransportError> {
    serde_json::from_value(value).map_err(|err| TransportError::Decode(format!("{}: {err}", T::TYPE)))
}
