//! Draft - 保存前のフォーム状態
//!
//! # ライフサイクル
//! - フォームを開いている間、debounce された autosave で作成・上書き
//! - フォームのマウント時に一度だけ読み込む
//! - 新規作成の成功時に明示的に削除（更新の成功時は削除しない）
//! - 24 時間を過ぎたものは期限切れとして破棄

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use super::entity::EntityType;

/// Prefix of the local-store key a draft is persisted under.
pub const DRAFT_KEY_PREFIX: &str = "form_draft_";

/// `entityKind + ":" + (recordId ?? "new")`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DraftKey(String);

impl DraftKey {
    pub fn new(kind: EntityType, record_id: Option<&str>) -> Self {
        Self(format!("{}:{}", kind.as_str(), record_id.unwrap_or("new")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn storage_key(&self) -> String {
        format!("{DRAFT_KEY_PREFIX}{}", self.0)
    }
}

impl fmt::Display for DraftKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Persisted form snapshot. `timestamp` is milliseconds since the epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Draft {
    pub data: Value,
    #[serde(rename = "timestamp", with = "chrono::serde::ts_milliseconds")]
    pub saved_at: DateTime<Utc>,
}

impl Draft {
    pub fn new(data: Value, saved_at: DateTime<Utc>) -> Self {
        Self { data, saved_at }
    }

    /// Loadable iff `now - saved_at < ttl`.
    pub fn is_fresh(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now - self.saved_at < ttl
    }
}
