//! HttpRecordStore - reqwest による REST コラボレータ
//!
//! # エンドポイント
//! - `GET    {api_url}{collection}`            list
//! - `GET    {api_url}{collection}/{id}`       get
//! - `GET    {api_url}/api/cases/search?...`   search（case 以外は `{collection}?...`）
//! - `POST   {api_url}{collection}`            create
//! - `PUT    {api_url}{collection}/{id}`       update（body に version）
//! - `DELETE {api_url}{collection}/{id}`       delete
//!
//! # 設計原則
//! - 保存済みの credential があれば `Authorization: Bearer` を付ける
//! - 401 を受けたら credential を破棄して `TransportError::Unauthorized`
//! - エラー本文の `detail` をメッセージとして使う
//! - list はキャンセルされたらリクエストの future を破棄して通信を中断する

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::domain::{EntityType, TransportError};
use crate::ports::{CredentialStore, RecordStore};

pub struct HttpRecordStore {
    client: Client,
    api_url: String,
    credentials: Arc<dyn CredentialStore>,
}

impl HttpRecordStore {
    /// `request_timeout` bounds each request at the transport level; the
    /// loader's own timeout race is separate.
    pub fn new(
        api_url: impl Into<String>,
        credentials: Arc<dyn CredentialStore>,
        request_timeout: Option<Duration>,
    ) -> Result<Self, TransportError> {
        let mut builder = Client::builder();
        if let Some(timeout) = request_timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| TransportError::Network(format!("failed to create HTTP client: {e}")))?;
        let api_url = api_url.into().trim_end_matches('/').to_string();
        debug!(api_url = %api_url, "REST collaborator configured");
        Ok(Self {
            client,
            api_url,
            credentials,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.client.request(method, format!("{}{path}", self.api_url));
        match self.credentials.token() {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn execute(&self, builder: RequestBuilder) -> Result<Value, TransportError> {
        let response = builder.send().await.map_err(transport_error)?;
        let status = response.status();
        let body = response.text().await.map_err(transport_error)?;

        if status == StatusCode::UNAUTHORIZED {
            warn!("credential rejected, discarding it");
            self.credentials.discard();
            return Err(TransportError::Unauthorized);
        }
        if !status.is_success() {
            let message = error_message(status, &body);
            debug!(status = status.as_u16(), message = %message, "REST request rejected");
            return Err(TransportError::Status {
                status: status.as_u16(),
                message,
            });
        }
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body).map_err(|e| TransportError::Decode(e.to_string()))
    }

    async fn execute_list(&self, builder: RequestBuilder) -> Result<Vec<Value>, TransportError> {
        match self.execute(builder).await? {
            Value::Array(items) => Ok(items),
            other => Err(TransportError::Decode(format!(
                "expected a JSON array, got {}",
                kind_of(&other)
            ))),
        }
    }
}

fn item_path(entity: EntityType, id: &str) -> String {
    format!("{}/{id}", entity.collection_path())
}

fn search_path(entity: EntityType) -> String {
    match entity {
        EntityType::Case => format!("{}/search", entity.collection_path()),
        _ => entity.collection_path().to_string(),
    }
}

fn transport_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Network(format!("request timed out: {err}"))
    } else if err.is_decode() {
        TransportError::Decode(err.to_string())
    } else {
        TransportError::Network(err.to_string())
    }
}

/// `detail` from a JSON error body, else the raw body, else the reason phrase.
fn error_message(status: StatusCode, body: &str) -> String {
    if let Ok(Value::Object(fields)) = serde_json::from_str::<Value>(body)
        && let Some(Value::String(detail)) = fields.get("detail")
    {
        return detail.clone();
    }
    if !body.trim().is_empty() {
        return body.to_string();
    }
    status.canonical_reason().unwrap_or("request failed").to_string()
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[async_trait]
impl RecordStore for HttpRecordStore {
    async fn list(
        &self,
        entity: EntityType,
        cancel: &CancellationToken,
    ) -> Result<Vec<Value>, TransportError> {
        let request = self.request(Method::GET, entity.collection_path());
        tokio::select! {
            _ = cancel.cancelled() => Err(TransportError::Cancelled),
            listed = self.execute_list(request) => listed,
        }
    }

    async fn get(&self, entity: EntityType, id: &str) -> Result<Value, TransportError> {
        self.execute(self.request(Method::GET, &item_path(entity, id)))
            .await
    }

    async fn search(
        &self,
        entity: EntityType,
        params: &[(String, String)],
    ) -> Result<Vec<Value>, TransportError> {
        let request = self.request(Method::GET, &search_path(entity)).query(params);
        self.execute_list(request).await
    }

    async fn create(&self, entity: EntityType, body: Value) -> Result<Value, TransportError> {
        let request = self.request(Method::POST, entity.collection_path()).json(&body);
        self.execute(request).await
    }

    async fn update(
        &self,
        entity: EntityType,
        id: &str,
        body: Value,
    ) -> Result<Value, TransportError> {
        let request = self.request(Method::PUT, &item_path(entity, id)).json(&body);
        self.execute(request).await
    }

    async fn delete(&self, entity: EntityType, id: &str) -> Result<(), TransportError> {
        self.execute(self.request(Method::DELETE, &item_path(entity, id)))
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_message_prefers_detail() {
        assert_eq!(
            error_message(StatusCode::CONFLICT, r#"{"detail": "Version conflict"}"#),
            "Version conflict"
        );
        assert_eq!(error_message(StatusCode::BAD_GATEWAY, "upstream down"), "upstream down");
        assert_eq!(error_message(StatusCode::NOT_FOUND, ""), "Not Found");
    }

    #[test]
    fn test_case_search_has_its_own_endpoint() {
        assert_eq!(search_path(EntityType::Case), "/api/cases/search");
        assert_eq!(search_path(EntityType::Execution), "/api/executions");
        assert_eq!(
            item_path(EntityType::CompensationLetter, "cl-1"),
            "/api/compensation-letters/cl-1"
        );
    }
}
