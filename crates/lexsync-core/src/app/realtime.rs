//! RealtimeSync - push channel + fallback poller + aggregator の配線
//!
//! # フロー
//! - ChangeChannel の last message を転送タスクが ChangeAggregator へ流す
//! - FallbackPoller は channel の状態を監視し、Connected 以外のときだけポーリング
//! - ビューは aggregator に問い合わせ、変更があれば全件再読み込み → clear

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::aggregator::ChangeAggregator;
use super::channel::{ChangeChannel, ChannelState};
use super::poller::FallbackPoller;
use super::status::SyncStatus;
use crate::domain::ChangeEvent;
use crate::ports::EventSink;

pub struct RealtimeSync {
    channel: ChangeChannel,
    aggregator: Arc<ChangeAggregator>,
    stop: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl RealtimeSync {
    /// Spawns the forwarder and the poller, then starts the channel.
    ///
    /// Without a stored credential the channel is not started and the poller
    /// covers alone. After storing one, call `channel().reconnect()`.
    pub fn start(channel: ChangeChannel, poller: FallbackPoller, aggregator: Arc<ChangeAggregator>) -> Self {
        let stop = CancellationToken::new();
        let sink: Arc<dyn EventSink> = aggregator.clone();
        let forwarder = tokio::spawn(forward(channel.subscribe_messages(), sink, stop.clone()));
        let poller = poller.spawn(channel.subscribe_state(), stop.clone());
        if !channel.start() {
            info!("no stored credential, change channel not started");
        }
        Self {
            channel,
            aggregator,
            stop,
            tasks: vec![forwarder, poller],
        }
    }

    pub fn channel(&self) -> &ChangeChannel {
        &self.channel
    }

    pub fn aggregator(&self) -> &Arc<ChangeAggregator> {
        &self.aggregator
    }

    pub fn is_connected(&self) -> bool {
        self.channel.is_connected()
    }

    /// True while the poller stands in for the push channel.
    pub fn is_polling_fallback(&self) -> bool {
        !self.is_connected()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ChannelState> {
        self.channel.subscribe_state()
    }

    pub fn status(&self) -> SyncStatus {
        SyncStatus::new(self.channel.state(), &self.aggregator.pending())
    }

    /// Closes the channel and waits for the background tasks to finish.
    pub async fn shutdown(self) {
        self.channel.close().await;
        self.stop.cancel();
        for task in self.tasks {
            if let Err(err) = task.await {
                warn!(error = %err, "realtime task ended abnormally");
            }
        }
    }
}

async fn forward(
    mut messages: watch::Receiver<Option<ChangeEvent>>,
    sink: Arc<dyn EventSink>,
    stop: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = stop.cancelled() => return,
            changed = messages.changed() => {
                if changed.is_err() {
                    return;
                }
            }
        }
        let latest = messages.borrow_and_update().clone();
        if let Some(event) = latest {
            info!(
                entity_type = %event.entity_type,
                entity_id = %event.entity_id,
                notice = %event.describe(),
                "server change"
            );
            sink.emit(event);
        }
    }
}
