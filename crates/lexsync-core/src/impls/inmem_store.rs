//! InMemoryRecordStore - テスト・デモ用の REST コラボレータ
//!
//! サーバ側の version 不変条件をそのまま実装します。
//!
//! # 不変条件
//! - create は version 1 で作成（body の id / version は無視）
//! - update は body の version が保存済みと一致したときだけ受理し +1
//! - 不一致は 409。部分的な適用はしない
//! - update は部分更新（body にあるフィールドだけ上書き）

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use ulid::Ulid;

use crate::domain::{EntityType, TransportError, Version, VersionedRecord};
use crate::ports::RecordStore;

#[derive(Default)]
struct State {
    records: HashMap<EntityType, Vec<VersionedRecord>>,
    fail_lists: bool,
    fail_writes: Option<TransportError>,
}

/// InMemoryRecordStore はプロセス内の versioned store
///
/// # 使用例
/// ```ignore
/// let store = InMemoryRecordStore::new();
/// let client = store.seed(EntityType::Client, json!({"name": "Ada"}));
/// assert_eq!(client.version, Version::INITIAL);
/// ```
#[derive(Default)]
pub struct InMemoryRecordStore {
    state: Mutex<State>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a record directly, as if created by another client.
    pub fn seed(&self, entity: EntityType, fields: Value) -> VersionedRecord {
        let record = new_record(fields);
        self.lock()
            .records
            .entry(entity)
            .or_default()
            .push(record.clone());
        record
    }

    /// Makes every `list` fail with a network error while set.
    pub fn fail_lists(&self, fail: bool) {
        self.lock().fail_lists = fail;
    }

    /// Makes every create/update/delete fail with `err` while set.
    pub fn fail_writes_with(&self, err: Option<TransportError>) {
        self.lock().fail_writes = err;
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn new_record(fields: Value) -> VersionedRecord {
    let mut fields = into_fields(fields);
    fields.remove("id");
    fields.remove("version");
    VersionedRecord::new(Ulid::new().to_string(), Version::INITIAL, fields)
}

fn into_fields(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn not_found(entity: EntityType, id: &str) -> TransportError {
    TransportError::Status {
        status: 404,
        message: format!("{} {id} not found", entity.display_name()),
    }
}

fn encode(record: &VersionedRecord) -> Result<Value, TransportError> {
    serde_json::to_value(record).map_err(|err| TransportError::Decode(err.to_string()))
}

fn matches_params(record: &VersionedRecord, params: &[(String, String)]) -> bool {
    params.iter().all(|(name, expected)| match record.field(name) {
        Some(Value::String(actual)) => actual == expected,
        Some(other) => other.to_string() == *expected,
        None => false,
    })
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn list(
        &self,
        entity: EntityType,
        cancel: &CancellationToken,
    ) -> Result<Vec<Value>, TransportError> {
        if cancel.is_cancelled() {
            return Err(TransportError::Cancelled);
        }
        let state = self.lock();
        if state.fail_lists {
            return Err(TransportError::Network("connection refused".into()));
        }
        state
            .records
            .get(&entity)
            .map(|records| records.iter().map(encode).collect())
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn get(&self, entity: EntityType, id: &str) -> Result<Value, TransportError> {
        let state = self.lock();
        let record = state
            .records
            .get(&entity)
            .and_then(|records| records.iter().find(|r| r.id == id))
            .ok_or_else(|| not_found(entity, id))?;
        encode(record)
    }

    async fn search(
        &self,
        entity: EntityType,
        params: &[(String, String)],
    ) -> Result<Vec<Value>, TransportError> {
        let state = self.lock();
        state
            .records
            .get(&entity)
            .into_iter()
            .flatten()
            .filter(|record| matches_params(record, params))
            .map(encode)
            .collect()
    }

    async fn create(&self, entity: EntityType, body: Value) -> Result<Value, TransportError> {
        let mut state = self.lock();
        if let Some(err) = state.fail_writes.clone() {
            return Err(err);
        }
        let record = new_record(body);
        let encoded = encode(&record)?;
        state.records.entry(entity).or_default().push(record);
        Ok(encoded)
    }

    async fn update(
        &self,
        entity: EntityType,
        id: &str,
        body: Value,
    ) -> Result<Value, TransportError> {
        let mut state = self.lock();
        if let Some(err) = state.fail_writes.clone() {
            return Err(err);
        }
        let mut fields = into_fields(body);
        let submitted = fields
            .remove("version")
            .and_then(|v| v.as_u64())
            .and_then(|v| u32::try_from(v).ok())
            .and_then(Version::new)
            .ok_or_else(|| TransportError::Status {
                status: 422,
                message: "version is required".into(),
            })?;
        fields.remove("id");

        let record = state
            .records
            .get_mut(&entity)
            .and_then(|records| records.iter_mut().find(|r| r.id == id))
            .ok_or_else(|| not_found(entity, id))?;
        if record.version != submitted {
            return Err(TransportError::Status {
                status: TransportError::CONFLICT,
                message: format!(
                    "Version conflict: submitted {submitted}, stored {}",
                    record.version
                ),
            });
        }
        record.fields.extend(fields);
        record.version = record.version.next();
        encode(record)
    }

    async fn delete(&self, entity: EntityType, id: &str) -> Result<(), TransportError> {
        let mut state = self.lock();
        if let Some(err) = state.fail_writes.clone() {
            return Err(err);
        }
        let records = state.records.entry(entity).or_default();
        let before = records.len();
        records.retain(|r| r.id != id);
        if records.len() == before {
            return Err(not_found(entity, id));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_update_requires_the_stored_version() {
        let store = InMemoryRecordStore::new();
        let seeded = store.seed(EntityType::Case, json!({"title": "A", "court": "X"}));

        let updated = store
            .update(EntityType::Case, &seeded.id, json!({"title": "B", "version": 1}))
            .await
            .unwrap();
        assert_eq!(updated["version"], json!(2));
        assert_eq!(updated["court"], json!("X"));

        let err = store
            .update(EntityType::Case, &seeded.id, json!({"title": "C", "version": 1}))
            .await
            .unwrap_err();
        assert!(err.is_conflict());

        let stored = store.get(EntityType::Case, &seeded.id).await.unwrap();
        assert_eq!(stored["title"], json!("B"));
        assert_eq!(stored["version"], json!(2));
    }

    #[tokio::test]
    async fn test_update_without_version_is_rejected() {
        let store = InMemoryRecordStore::new();
        let seeded = store.seed(EntityType::Client, json!({"name": "Ada"}));

        let err = store
            .update(EntityType::Client, &seeded.id, json!({"name": "B"}))
            .await
            .unwrap_err();

        assert!(matches!(err, TransportError::Status { status: 422, .. }));
    }

    #[tokio::test]
    async fn test_cancelled_list_returns_cancelled() {
        let store = InMemoryRecordStore::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = store.list(EntityType::Client, &cancel).await.unwrap_err();
        assert_eq!(err, TransportError::Cancelled);
    }

    #[tokio::test]
    async fn test_delete_removes_the_record() {
        let store = InMemoryRecordStore::new();
        let seeded = store.seed(EntityType::Execution, json!({}));

        store.delete(EntityType::Execution, &seeded.id).await.unwrap();

        let err = store.get(EntityType::Execution, &seeded.id).await.unwrap_err();
        assert!(matches!(err, TransportError::Status { status: 404, .. }));
        assert!(store.delete(EntityType::Execution, &seeded.id).await.is_err());
    }
}
