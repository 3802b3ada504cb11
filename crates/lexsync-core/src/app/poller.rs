//! FallbackPoller - push が使えない間の定期ポーリング
//!
//! # フロー
//! 1. ChangeChannel の状態が Connected 以外になったら有効化
//! 2. すぐに 1 回、その後 interval ごとに 4 つのコレクションを全件取得
//! 3. 取得できたら汎用の ChangeEvent（client / update）を EventSink へ流す
//! 4. Connected になった瞬間にタイマーを破棄し、取得中の回はキャンセルして待機に戻る
//!
//! 取得に失敗した回はイベントを出しません（ログのみ）。

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use serde_json::{Map, Value};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::channel::ChannelState;
use crate::domain::{ChangeEvent, EntityType, TransportError};
use crate::ports::{Clock, EventSink, RecordStore};

/// Full snapshots of every entity collection, taken at `polled_at`.
#[derive(Debug, Clone)]
pub struct PollSnapshot {
    pub collections: Vec<(EntityType, Vec<Value>)>,
    pub polled_at: DateTime<Utc>,
}

impl PollSnapshot {
    pub fn records(&self, entity: EntityType) -> &[Value] {
        self.collections
            .iter()
            .find(|(e, _)| *e == entity)
            .map(|(_, records)| records.as_slice())
            .unwrap_or_default()
    }

    fn to_payload(&self) -> Value {
        let collections: Map<String, Value> = self
            .collections
            .iter()
            .map(|(entity, records)| (entity.as_str().to_string(), Value::from(records.len())))
            .collect();
        serde_json::json!({ "counts": collections })
    }
}

enum RoundEnd {
    Polled(Result<PollSnapshot, TransportError>),
    Connected,
    Stopped,
}

pub struct FallbackPoller {
    store: Arc<dyn RecordStore>,
    sink: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
    interval: Duration,
}

impl FallbackPoller {
    pub fn new(
        store: Arc<dyn RecordStore>,
        sink: Arc<dyn EventSink>,
        clock: Arc<dyn Clock>,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            sink,
            clock,
            interval,
        }
    }

    /// Pulls every collection concurrently.
    pub async fn poll_once(&self, cancel: &CancellationToken) -> Result<PollSnapshot, TransportError> {
        let fetches = EntityType::ALL.iter().map(|&entity| async move {
            let records = self.store.list(entity, cancel).await?;
            Ok::<_, TransportError>((entity, records))
        });
        let collections = try_join_all(fetches).await?;
        Ok(PollSnapshot {
            collections,
            polled_at: self.clock.now(),
        })
    }

    /// Spawns the poller; it follows `state` until `stop` is cancelled.
    pub fn spawn(self, state: watch::Receiver<ChannelState>, stop: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(state, stop))
    }

    pub async fn run(self, mut state: watch::Receiver<ChannelState>, stop: CancellationToken) {
        loop {
            let connected = state.borrow_and_update().is_connected();
            if connected {
                tokio::select! {
                    _ = stop.cancelled() => return,
                    changed = state.changed() => {
                        if changed.is_err() {
                            return;
                        }
                    }
                }
                continue;
            }

            info!(interval_ms = self.interval.as_millis() as u64, "push channel down, polling fallback active");
            if !self.poll_while_disconnected(&mut state, &stop).await {
                return;
            }
            info!("push channel connected, polling fallback stopped");
        }
    }

    /// Returns `false` when the poller should exit entirely.
    async fn poll_while_disconnected(
        &self,
        state: &mut watch::Receiver<ChannelState>,
        stop: &CancellationToken,
    ) -> bool {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = stop.cancelled() => return false,
                changed = state.changed() => {
                    if changed.is_err() {
                        return false;
                    }
                    if state.borrow_and_update().is_connected() {
                        return true;
                    }
                }
                _ = ticker.tick() => {
                    if state.borrow_and_update().is_connected() {
                        return true;
                    }
                    match self.poll_round(state, stop).await {
                        RoundEnd::Polled(polled) => self.publish(polled, state),
                        RoundEnd::Connected => return true,
                        RoundEnd::Stopped => return false,
                    }
                }
            }
        }
    }

    /// One poll of every collection, abandoned as soon as the channel connects.
    async fn poll_round(
        &self,
        state: &mut watch::Receiver<ChannelState>,
        stop: &CancellationToken,
    ) -> RoundEnd {
        let round = stop.child_token();
        let poll = self.poll_once(&round);
        tokio::pin!(poll);

        loop {
            tokio::select! {
                _ = stop.cancelled() => return RoundEnd::Stopped,
                polled = &mut poll => return RoundEnd::Polled(polled),
                changed = state.changed() => {
                    if changed.is_err() {
                        return RoundEnd::Stopped;
                    }
                    if state.borrow_and_update().is_connected() {
                        break;
                    }
                }
            }
        }

        // Stores abort their requests on cancellation; wait for them to unwind.
        debug!("channel connected mid-poll, cancelling the round");
        round.cancel();
        tokio::select! {
            _ = stop.cancelled() => RoundEnd::Stopped,
            _ = &mut poll => RoundEnd::Connected,
        }
    }

    fn publish(&self, polled: Result<PollSnapshot, TransportError>, state: &watch::Receiver<ChannelState>) {
        match polled {
            Ok(snapshot) => {
                if state.borrow().is_connected() {
                    debug!("channel reconnected during poll, dropping snapshot");
                    return;
                }
                debug!(polled_at = %snapshot.polled_at, "fallback poll completed");
                self.sink
                    .emit(ChangeEvent::polling_fallback(snapshot.to_payload(), snapshot.polled_at));
            }
            Err(err) => {
                warn!(error = %err, "fallback poll failed");
            }
        }
    }
}
