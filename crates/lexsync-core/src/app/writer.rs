//! ConflictAwareWriter - version 付きの書き込み
//!
//! # 設計原則
//! - update は直近に読み込んだ version を必ず載せる
//! - クライアント側で version を加算しない。次の update の前に再読み込みする
//! - version 不一致（409）は ConflictError として他の失敗と区別する。
//!   同じ version での自動再送はしない
//! - create は version を載せない（新規レコードは version 1 から）

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::domain::{ConflictError, EntityType, TransportError, Version, VersionedRecord, WriteError};
use crate::ports::RecordStore;

const VERSION_FIELD: &str = "version";
const ID_FIELD: &str = "id";

#[derive(Clone)]
pub struct ConflictAwareWriter {
    store: Arc<dyn RecordStore>,
}

impl ConflictAwareWriter {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// Authoritative read of one record, including its current version.
    pub async fn fetch(&self, entity: EntityType, id: &str) -> Result<VersionedRecord, WriteError> {
        let value = self
            .store
            .get(entity, id)
            .await
            .map_err(|err| classify(entity, id, None, err))?;
        decode(value)
    }

    pub async fn create(
        &self,
        entity: EntityType,
        mut fields: Map<String, Value>,
    ) -> Result<VersionedRecord, WriteError> {
        fields.remove(VERSION_FIELD);
        fields.remove(ID_FIELD);
        let value = self
            .store
            .create(entity, Value::Object(fields))
            .await
            .map_err(|err| classify(entity, "new", None, err))?;
        let record = decode(value)?;
        debug!(entity_type = %entity, entity_id = %record.id, "record created");
        Ok(record)
    }

    /// Submits `fields` against the version the caller last loaded.
    pub async fn update(
        &self,
        entity: EntityType,
        id: &str,
        version: Version,
        mut fields: Map<String, Value>,
    ) -> Result<VersionedRecord, WriteError> {
        fields.remove(ID_FIELD);
        fields.insert(VERSION_FIELD.to_string(), Value::from(version.get()));
        let value = self
            .store
            .update(entity, id, Value::Object(fields))
            .await
            .map_err(|err| classify(entity, id, Some(version), err))?;
        let record = decode(value)?;
        debug!(entity_type = %entity, entity_id = %id, version = %record.version, "record updated");
        Ok(record)
    }

    pub async fn delete(&self, entity: EntityType, id: &str) -> Result<(), WriteError> {
        self.store
            .delete(entity, id)
            .await
            .map_err(|err| classify(entity, id, None, err))
    }
}

fn classify(entity: EntityType, id: &str, submitted: Option<Version>, err: TransportError) -> WriteError {
    match (err, submitted) {
        (TransportError::Status { status, .. }, Some(submitted)) if status == TransportError::CONFLICT => {
            warn!(entity_type = %entity, entity_id = %id, version = %submitted, "version conflict");
            WriteError::Conflict(ConflictError {
                entity,
                id: id.to_string(),
                submitted,
            })
        }
        (TransportError::Unauthorized | TransportError::MissingCredential, _) => WriteError::Unauthorized,
        (TransportError::Status { status, message }, _) => WriteError::Rejected {
            entity,
            status,
            message,
        },
        (TransportError::Decode(message), _) => WriteError::Decode(message),
        (other, _) => WriteError::Transport(other),
    }
}

fn decode(value: Value) -> Result<VersionedRecord, WriteError> {
    serde_json::from_value(value).map_err(|err| WriteError::Decode(err.to_string()))
}
