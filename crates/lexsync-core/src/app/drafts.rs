//! Drafts - フォーム入力の自動保存
//!
//! # 構成
//! - **DraftStore**: KeyValueStore 上の Draft の保存・読み込み・削除
//! - **Autosaver**: 最後の編集から debounce 時間（2000 ms）静かになったら保存
//! - **UnloadGuard**: 空でない入力があるうちは離脱を止める
//!
//! # 設計原則
//! - 読み込めるのは `now - saved_at < ttl`（24h）のものだけ。期限切れは破棄
//! - 新規作成の成功時だけ clear する。clear は一覧・ダッシュボードのキャッシュキーも消す
//! - ローカルストアの失敗でフォーム操作を止めない（呼び出し側はログに残すだけ）

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::domain::{Draft, DraftKey};
use crate::ports::{Clock, KeyValueStore, KvError};

/// List and dashboard caches that go stale once a new record exists.
pub const DEFAULT_INVALIDATE_KEYS: [&str; 5] = [
    "dashboard_data",
    "cases_cache",
    "clients_cache",
    "executions_cache",
    "compensation_letters_cache",
];

#[derive(Debug, Clone)]
pub struct DraftPolicy {
    pub debounce: Duration,
    pub ttl: chrono::Duration,
    pub invalidate_keys: Vec<String>,
}

impl Default for DraftPolicy {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(2000),
            ttl: chrono::Duration::hours(24),
            invalidate_keys: DEFAULT_INVALIDATE_KEYS.iter().map(|k| k.to_string()).collect(),
        }
    }
}

#[derive(Debug, Error)]
pub enum DraftError {
    #[error(transparent)]
    Store(#[from] KvError),

    #[error("draft encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

pub struct DraftStore {
    kv: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    policy: DraftPolicy,
}

impl DraftStore {
    pub fn new(kv: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>, policy: DraftPolicy) -> Self {
        Self { kv, clock, policy }
    }

    pub fn policy(&self) -> &DraftPolicy {
        &self.policy
    }

    pub fn save(&self, key: &DraftKey, data: &Value) -> Result<Draft, DraftError> {
        let draft = Draft::new(data.clone(), self.clock.now());
        let encoded = serde_json::to_string(&draft)?;
        self.kv.set(&key.storage_key(), &encoded)?;
        debug!(draft = %key, "draft saved");
        Ok(draft)
    }

    /// The stored draft if it is younger than the TTL. Expired drafts are
    /// removed; unreadable ones are left alone and reported as absent.
    pub fn load(&self, key: &DraftKey) -> Result<Option<Draft>, DraftError> {
        let storage_key = key.storage_key();
        let Some(raw) = self.kv.get(&storage_key)? else {
            return Ok(None);
        };
        let draft: Draft = match serde_json::from_str(&raw) {
            Ok(draft) => draft,
            Err(err) => {
                warn!(draft = %key, error = %err, "ignoring unreadable draft");
                return Ok(None);
            }
        };
        if draft.is_fresh(self.clock.now(), self.policy.ttl) {
            return Ok(Some(draft));
        }
        debug!(draft = %key, saved_at = %draft.saved_at, "purging expired draft");
        self.kv.remove(&storage_key)?;
        Ok(None)
    }

    /// Removes the draft, then every configured cache key.
    pub fn clear(&self, key: &DraftKey) -> Result<(), DraftError> {
        self.kv.remove(&key.storage_key())?;
        for cache_key in &self.policy.invalidate_keys {
            if let Err(err) = self.kv.remove(cache_key) {
                warn!(cache_key = %cache_key, error = %err, "failed to invalidate cache");
            }
        }
        debug!(draft = %key, "draft cleared");
        Ok(())
    }
}

/// Debounced background save of the latest form snapshot.
///
/// Dropping the autosaver discards a pending save.
pub struct Autosaver {
    key: DraftKey,
    store: Arc<DraftStore>,
    pending: watch::Sender<Option<Value>>,
    handle: JoinHandle<()>,
}

impl Autosaver {
    pub fn spawn(store: Arc<DraftStore>, key: DraftKey) -> Self {
        let (pending, rx) = watch::channel(None);
        let debounce = store.policy().debounce;
        let handle = tokio::spawn(debounce_saves(rx, Arc::clone(&store), key.clone(), debounce));
        Self {
            key,
            store,
            pending,
            handle,
        }
    }

    pub fn key(&self) -> &DraftKey {
        &self.key
    }

    /// Restarts the quiet period with `data` as the snapshot to save.
    pub fn edit(&self, data: Value) {
        self.pending.send_replace(Some(data));
    }

    /// Drops a pending save without writing it.
    pub fn cancel_pending(&self) {
        self.pending.send_replace(None);
    }

    /// Saves the latest snapshot now.
    pub fn flush(&self) -> Result<Option<Draft>, DraftError> {
        let latest = self.pending.borrow().clone();
        latest.map(|data| self.store.save(&self.key, &data)).transpose()
    }
}

impl Drop for Autosaver {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn debounce_saves(
    mut rx: watch::Receiver<Option<Value>>,
    store: Arc<DraftStore>,
    key: DraftKey,
    debounce: Duration,
) {
    while rx.changed().await.is_ok() {
        let mut open = true;
        while open {
            tokio::select! {
                changed = rx.changed() => open = changed.is_ok(),
                _ = tokio::time::sleep(debounce) => break,
            }
        }
        let latest = rx.borrow_and_update().clone();
        if let Some(data) = latest {
            if let Err(err) = store.save(&key, &data) {
                warn!(draft = %key, error = %err, "failed to save form draft");
            }
        }
        if !open {
            return;
        }
    }
}

/// JavaScript-style truthiness of a form field value.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// True when any field of the snapshot holds a truthy value.
pub fn has_unsaved_input(data: &Value) -> bool {
    match data {
        Value::Object(fields) => fields.values().any(is_truthy),
        Value::Array(items) => items.iter().any(is_truthy),
        _ => false,
    }
}

/// Blocks navigation away while the form holds non-empty input.
#[derive(Debug, Default)]
pub struct UnloadGuard {
    armed: AtomicBool,
}

impl UnloadGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&self, data: &Value) {
        self.armed.store(has_unsaved_input(data), Ordering::Relaxed);
    }

    pub fn disarm(&self) {
        self.armed.store(false, Ordering::Relaxed);
    }

    pub fn should_block(&self) -> bool {
        self.armed.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::EntityType;
    use crate::impls::InMemoryKeyValueStore;
    use crate::ports::FixedClock;
    use chrono::{TimeZone, Utc};
    use rstest::rstest;
    use serde_json::json;

    fn fixture() -> (Arc<InMemoryKeyValueStore>, Arc<FixedClock>, Arc<DraftStore>) {
        let kv = Arc::new(InMemoryKeyValueStore::new());
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap(),
        ));
        let store = Arc::new(DraftStore::new(kv.clone(), clock.clone(), DraftPolicy::default()));
        (kv, clock, store)
    }

    #[rstest]
    #[case(23 * 60 + 59, true)]
    #[case(24 * 60 + 1, false)]
    fn test_draft_expiry_boundary(#[case] minutes_later: i64, #[case] loadable: bool) {
        let (kv, clock, store) = fixture();
        let key = DraftKey::new(EntityType::Case, None);
        store.save(&key, &json!({"title": "A v. B"})).unwrap();

        clock.advance(chrono::Duration::minutes(minutes_later));
        let loaded = store.load(&key).unwrap();

        assert_eq!(loaded.is_some(), loadable);
        assert_eq!(kv.get(&key.storage_key()).unwrap().is_some(), loadable);
    }

    #[test]
    fn test_clear_also_invalidates_caches() {
        let (kv, _clock, store) = fixture();
        let key = DraftKey::new(EntityType::Client, None);
        store.save(&key, &json!({"name": "Ada"})).unwrap();
        kv.set("clients_cache", "[]").unwrap();
        kv.set("unrelated", "keep").unwrap();

        store.clear(&key).unwrap();

        assert!(kv.get("form_draft_client:new").unwrap().is_none());
        assert!(kv.get("clients_cache").unwrap().is_none());
        assert_eq!(kv.get("unrelated").unwrap().as_deref(), Some("keep"));
    }

    #[test]
    fn test_unreadable_draft_is_absent() {
        let (kv, _clock, store) = fixture();
        let key = DraftKey::new(EntityType::Execution, Some("e-1"));
        kv.set(&key.storage_key(), "{not json").unwrap();

        assert!(store.load(&key).unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_autosave_waits_for_a_quiet_period() {
        let (kv, _clock, store) = fixture();
        let key = DraftKey::new(EntityType::Case, Some("c-1"));
        let autosaver = Autosaver::spawn(store, key.clone());

        autosaver.edit(json!({"title": "A"}));
        tokio::time::sleep(Duration::from_millis(1000)).await;
        autosaver.edit(json!({"title": "AB"}));
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(kv.get(&key.storage_key()).unwrap().is_none());

        tokio::time::sleep(Duration::from_millis(600)).await;
        let saved: Draft = serde_json::from_str(&kv.get(&key.storage_key()).unwrap().unwrap()).unwrap();
        assert_eq!(saved.data, json!({"title": "AB"}));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_or_dropped_saves_never_land() {
        let (kv, _clock, store) = fixture();
        let key = DraftKey::new(EntityType::Case, None);

        let autosaver = Autosaver::spawn(store.clone(), key.clone());
        autosaver.edit(json!({"title": "A"}));
        tokio::time::sleep(Duration::from_millis(10)).await;
        autosaver.cancel_pending();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(kv.get(&key.storage_key()).unwrap().is_none());

        autosaver.edit(json!({"title": "B"}));
        drop(autosaver);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(kv.get(&key.storage_key()).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_flush_saves_immediately() {
        let (_kv, _clock, store) = fixture();
        let key = DraftKey::new(EntityType::Client, Some("7"));
        let autosaver = Autosaver::spawn(store.clone(), key.clone());

        assert!(autosaver.flush().unwrap().is_none());
        autosaver.edit(json!({"name": "Ada"}));
        autosaver.flush().unwrap();

        assert_eq!(store.load(&key).unwrap().unwrap().data, json!({"name": "Ada"}));
    }

    #[rstest]
    #[case(json!(null), false)]
    #[case(json!(false), false)]
    #[case(json!(0), false)]
    #[case(json!(0.0), false)]
    #[case(json!(""), false)]
    #[case(json!("x"), true)]
    #[case(json!(3), true)]
    #[case(json!([]), true)]
    #[case(json!({}), true)]
    fn test_truthiness(#[case] value: Value, #[case] expected: bool) {
        assert_eq!(is_truthy(&value), expected);
    }

    #[test]
    fn test_guard_arms_only_for_non_empty_input() {
        let guard = UnloadGuard::new();
        guard.update(&json!({"name": "", "notes": null, "amount": 0}));
        assert!(!guard.should_block());

        guard.update(&json!({"name": "", "amount": 12}));
        assert!(guard.should_block());

        guard.disarm();
        assert!(!guard.should_block());
    }
}
