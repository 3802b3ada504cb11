//! ChangeAggregator - 変更通知のバッファ
//!
//! 各ビューは「自分のエンティティに変更があったか」を問い合わせ、あれば全件を
//! 再読み込みしてからバッファをクリアします。
//!
//! # 設計原則
//! - 到着順に追記。`arrival_order` はバッファ内で振り直す
//! - 問い合わせは副作用なし
//! - clear は冪等。空のバッファを clear しても通知しない
//! - 同じ到着を 2 つのエンティティ向けの問い合わせで同時に消費してもよい
//!   （clear は全体に効くので、後続の再読み込みが 1 回余計に走るだけ）

use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;
use tracing::debug;

use crate::domain::{ChangeEvent, EntityType};
use crate::ports::EventSink;

struct Buffer {
    events: Vec<ChangeEvent>,
    next_order: u64,
}

pub struct ChangeAggregator {
    buffer: Mutex<Buffer>,
    /// Bumped on every record and every effective clear.
    generation: watch::Sender<u64>,
}

impl Default for ChangeAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeAggregator {
    pub fn new() -> Self {
        let (generation, _) = watch::channel(0);
        Self {
            buffer: Mutex::new(Buffer {
                events: Vec::new(),
                next_order: 1,
            }),
            generation,
        }
    }

    /// Appends `event`, stamping its position in arrival order.
    pub fn record(&self, mut event: ChangeEvent) {
        {
            let mut buffer = self.lock();
            event.arrival_order = buffer.next_order;
            buffer.next_order += 1;
            debug!(
                entity_type = %event.entity_type,
                change_type = ?event.change_type,
                arrival = event.arrival_order,
                "change buffered"
            );
            buffer.events.push(event);
        }
        self.generation.send_modify(|g| *g += 1);
    }

    pub fn has_changes_for_entity(&self, entity: EntityType) -> bool {
        self.lock().events.iter().any(|e| e.entity_type == entity)
    }

    /// Buffered events for `entity`, in arrival order.
    pub fn changes_for_entity(&self, entity: EntityType) -> Vec<ChangeEvent> {
        self.lock()
            .events
            .iter()
            .filter(|e| e.entity_type == entity)
            .cloned()
            .collect()
    }

    pub fn pending(&self) -> Vec<ChangeEvent> {
        self.lock().events.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().events.is_empty()
    }

    pub fn clear(&self) {
        let cleared = {
            let mut buffer = self.lock();
            let had_events = !buffer.events.is_empty();
            buffer.events.clear();
            had_events
        };
        if cleared {
            self.generation.send_modify(|g| *g += 1);
        }
    }

    /// Change notification for views that want to re-check their entity.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.generation.subscribe()
    }

    /// Runs `reload` and clears the buffer when `entity` has pending changes.
    ///
    /// The buffer is only cleared after a successful reload, so a failed
    /// reload leaves the signal in place for the next check.
    pub async fn consume<F, Fut, E>(&self, entity: EntityType, reload: F) -> Result<bool, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), E>>,
    {
        if !self.has_changes_for_entity(entity) {
            return Ok(false);
        }
        reload().await?;
        self.clear();
        Ok(true)
    }

    fn lock(&self) -> MutexGuard<'_, Buffer> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl EventSink for ChangeAggregator {
    fn emit(&self, event: ChangeEvent) {
        self.record(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ChangeType;
    use serde_json::json;

    fn event(entity: EntityType, id: &str) -> ChangeEvent {
        ChangeEvent::new(entity, ChangeType::Update, id, json!({"id": id}))
    }

    #[test]
    fn test_records_in_arrival_order() {
        let aggregator = ChangeAggregator::new();
        aggregator.record(event(EntityType::Case, "a"));
        aggregator.record(event(EntityType::Client, "b"));
        aggregator.record(event(EntityType::Case, "c"));

        let cases = aggregator.changes_for_entity(EntityType::Case);
        let ids: Vec<_> = cases.iter().map(|e| (e.entity_id.as_str(), e.arrival_order)).collect();
        assert_eq!(ids, [("a", 1), ("c", 3)]);
        assert!(aggregator.has_changes_for_entity(EntityType::Client));
        assert!(!aggregator.has_changes_for_entity(EntityType::Execution));
        assert_eq!(aggregator.len(), 3);
    }

    #[test]
    fn test_clear_is_idempotent() {
        let aggregator = ChangeAggregator::new();
        let rx = aggregator.subscribe();
        aggregator.record(event(EntityType::Case, "a"));

        aggregator.clear();
        let after_first = *rx.borrow();
        aggregator.clear();

        assert!(aggregator.is_empty());
        assert_eq!(*rx.borrow(), after_first);
        assert_eq!(after_first, 2);
    }

    #[tokio::test]
    async fn test_consume_reloads_then_clears() {
        let aggregator = ChangeAggregator::new();
        aggregator.emit(event(EntityType::Client, "x"));

        let untouched = aggregator
            .consume(EntityType::Case, || async { Ok::<_, ()>(()) })
            .await
            .unwrap();
        assert!(!untouched);
        assert_eq!(aggregator.len(), 1);

        let failed = aggregator
            .consume(EntityType::Client, || async { Err("offline") })
            .await;
        assert_eq!(failed, Err("offline"));
        assert_eq!(aggregator.len(), 1);

        let reloaded = aggregator
            .consume(EntityType::Client, || async { Ok::<_, ()>(()) })
            .await
            .unwrap();
        assert!(reloaded);
        assert!(aggregator.is_empty());
    }

    #[test]
    fn test_arrival_order_continues_after_clear() {
        let aggregator = ChangeAggregator::new();
        aggregator.record(event(EntityType::Case, "a"));
        aggregator.clear();
        aggregator.record(event(EntityType::Case, "b"));

        assert_eq!(aggregator.pending()[0].arrival_order, 2);
    }
}
