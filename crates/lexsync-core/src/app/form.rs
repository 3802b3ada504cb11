//! FormSession - 1 つの作成/編集フォームの状態
//!
//! # フロー
//! 1. mount: 編集なら権威あるレコードを読み込み version を保持。新鮮な Draft があれば初期値にする
//! 2. edit: 入力ごとに Autosaver と UnloadGuard を更新
//! 3. submit:
//!    - 参照データのローダが読み込み中/エラーなら送信しない
//!    - 作成: 成功したら Draft を削除
//!    - 更新: 保持している version を載せる。成功後は再読み込みするまで次の更新はできない
//!    - 競合: レコードを再読み込みして version だけ差し替え、入力値は残す

use std::sync::Arc;

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{info, warn};

use super::drafts::{Autosaver, DraftStore, UnloadGuard};
use super::loader::ReferenceGate;
use super::writer::ConflictAwareWriter;
use crate::domain::{ConflictError, Draft, DraftKey, EntityType, Version, VersionedRecord, WriteError};

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("reference data is still loading or failed to load")]
    ReferenceDataUnavailable,

    #[error("the record must be reloaded before it can be updated again")]
    ReloadRequired,

    /// The record was reloaded; the form keeps the user's values on top of
    /// the new version.
    #[error("{conflict}; the latest version was loaded and your changes were kept, review them and submit again")]
    Conflict {
        conflict: ConflictError,
        current: Box<VersionedRecord>,
    },

    /// Conflict detected, but the authoritative reload failed as well.
    #[error("{conflict}; reloading the latest version failed: {reload}")]
    ConflictReloadFailed {
        conflict: ConflictError,
        reload: WriteError,
    },

    #[error(transparent)]
    Write(#[from] WriteError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum FormMode {
    Create,
    Edit { id: String },
}

/// What `mount` found.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MountOutcome {
    pub record: Option<VersionedRecord>,
    pub restored_draft: Option<Draft>,
}

pub struct FormSession {
    entity: EntityType,
    mode: FormMode,
    key: DraftKey,
    writer: ConflictAwareWriter,
    drafts: Arc<DraftStore>,
    autosaver: Autosaver,
    guard: UnloadGuard,
    gates: Vec<Arc<dyn ReferenceGate>>,
    fields: Map<String, Value>,
    working_version: Option<Version>,
}

impl FormSession {
    pub fn new(
        entity: EntityType,
        record_id: Option<&str>,
        writer: ConflictAwareWriter,
        drafts: Arc<DraftStore>,
    ) -> Self {
        let key = DraftKey::new(entity, record_id);
        let mode = match record_id {
            Some(id) => FormMode::Edit { id: id.to_string() },
            None => FormMode::Create,
        };
        Self {
            entity,
            mode,
            autosaver: Autosaver::spawn(Arc::clone(&drafts), key.clone()),
            key,
            writer,
            drafts,
            guard: UnloadGuard::new(),
            gates: Vec::new(),
            fields: Map::new(),
            working_version: None,
        }
    }

    /// Submission is blocked while `gate` is loading or failed.
    pub fn with_gate(mut self, gate: Arc<dyn ReferenceGate>) -> Self {
        self.gates.push(gate);
        self
    }

    pub fn entity(&self) -> EntityType {
        self.entity
    }

    pub fn mode(&self) -> &FormMode {
        &self.mode
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn working_version(&self) -> Option<Version> {
        self.working_version
    }

    pub fn should_block_unload(&self) -> bool {
        self.guard.should_block()
    }

    pub fn can_submit(&self) -> bool {
        !self.gates.iter().any(|gate| gate.blocks_submission())
    }

    pub async fn mount(&mut self) -> Result<MountOutcome, WriteError> {
        let mut outcome = MountOutcome::default();
        if let FormMode::Edit { id } = &self.mode {
            let record = self.writer.fetch(self.entity, id).await?;
            self.fields = record.fields.clone();
            self.working_version = Some(record.version);
            outcome.record = Some(record);
        }

        match self.drafts.load(&self.key) {
            Ok(Some(draft)) => {
                if let Value::Object(data) = &draft.data {
                    self.fields = data.clone();
                    self.fields.remove("id");
                    self.fields.remove("version");
                }
                info!(draft = %self.key, saved_at = %draft.saved_at, "restored form draft");
                outcome.restored_draft = Some(draft);
            }
            Ok(None) => {}
            Err(err) => warn!(draft = %self.key, error = %err, "failed to load form draft"),
        }
        self.guard.update(&Value::Object(self.fields.clone()));
        Ok(outcome)
    }

    pub fn edit(&mut self, field: impl Into<String>, value: Value) {
        self.fields.insert(field.into(), value);
        let snapshot = Value::Object(self.fields.clone());
        self.guard.update(&snapshot);
        self.autosaver.edit(snapshot);
    }

    pub async fn submit(&mut self) -> Result<VersionedRecord, SubmitError> {
        if !self.can_submit() {
            return Err(SubmitError::ReferenceDataUnavailable);
        }
        match self.mode.clone() {
            FormMode::Create => self.submit_create().await,
            FormMode::Edit { id } => self.submit_update(&id).await,
        }
    }

    /// Re-reads the authoritative record, replacing fields and version.
    /// A create form has nothing to reload.
    pub async fn reload(&mut self) -> Result<Option<VersionedRecord>, WriteError> {
        let FormMode::Edit { id } = &self.mode else {
            return Ok(None);
        };
        let record = self.writer.fetch(self.entity, id).await?;
        self.fields = record.fields.clone();
        self.working_version = Some(record.version);
        Ok(Some(record))
    }

    async fn submit_create(&mut self) -> Result<VersionedRecord, SubmitError> {
        let record = self.writer.create(self.entity, self.fields.clone()).await?;
        self.autosaver.cancel_pending();
        if let Err(err) = self.drafts.clear(&self.key) {
            warn!(draft = %self.key, error = %err, "failed to clear form draft");
        }
        self.guard.disarm();
        Ok(record)
    }

    async fn submit_update(&mut self, id: &str) -> Result<VersionedRecord, SubmitError> {
        let version = self.working_version.ok_or(SubmitError::ReloadRequired)?;
        match self.writer.update(self.entity, id, version, self.fields.clone()).await {
            Ok(record) => {
                // The draft for this key survives a successful update.
                self.working_version = None;
                self.guard.disarm();
                Ok(record)
            }
            Err(WriteError::Conflict(conflict)) => Err(self.recover_from_conflict(id, conflict).await),
            Err(err) => Err(err.into()),
        }
    }

    async fn recover_from_conflict(&mut self, id: &str, conflict: ConflictError) -> SubmitError {
        match self.writer.fetch(self.entity, id).await {
            Ok(current) => {
                info!(
                    entity_type = %self.entity,
                    entity_id = %id,
                    submitted = %conflict.submitted,
                    current = %current.version,
                    "reloaded record after version conflict"
                );
                self.working_version = Some(current.version);
                SubmitError::Conflict {
                    conflict,
                    current: Box::new(current),
                }
            }
            Err(reload) => {
                self.working_version = None;
                SubmitError::ConflictReloadFailed { conflict, reload }
            }
        }
    }
}
