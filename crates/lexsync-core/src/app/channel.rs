//! ChangeChannel - push 接続の状態機械
//!
//! # 状態遷移
//! - Disconnected → Connecting → Connected → Reconnecting → Connecting → ...
//! - 終端の Disconnected は、意図的なクローズ（normal closure, 1000）か、
//!   連続 maxReconnectAttempts 回の再接続失敗のときだけ
//!
//! # 設計原則
//! - 接続には保存済みの credential が必要。無ければ接続しない（エラーではない）
//! - 再接続の待ち時間は `min(1000 * 2^attempts, 30000)` ms、接続成功で attempts = 0
//! - 生きているタイマーは常に 1 つ（ドライバタスク内の sleep だけ）
//! - 消費者に見せるのは最後に受け取ったメッセージだけ（last-message semantics）。
//!   途中のイベントが上書きで失われることは許容する。受け手は常に全件を再読み込みするため

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::retry::RetryPolicy;
use crate::domain::{ChangeEvent, InboundMessage};
use crate::ports::push::{ABNORMAL_CLOSURE, NORMAL_CLOSURE};
use crate::ports::{CredentialStore, PushConnection, PushConnector, PushFrame};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Connected,
    /// Waiting `delay` before reconnect number `attempt` (1-indexed).
    Reconnecting { attempt: u32, delay: Duration },
}

impl ChannelState {
    pub fn is_connected(self) -> bool {
        self == ChannelState::Connected
    }
}

enum Closure {
    Intentional,
    Lost { code: u16, reason: String },
}

enum PumpStep {
    Stop,
    Send(String),
    Frame(Option<PushFrame>),
}

struct Driver {
    stop: CancellationToken,
    handle: JoinHandle<()>,
}

struct ChannelInner {
    connector: Arc<dyn PushConnector>,
    credentials: Arc<dyn CredentialStore>,
    policy: RetryPolicy,
    state: watch::Sender<ChannelState>,
    last_message: watch::Sender<Option<ChangeEvent>>,
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    driver: Mutex<Option<Driver>>,
    arrivals: AtomicU64,
}

/// Long-lived push connection with reconnect backoff.
#[derive(Clone)]
pub struct ChangeChannel {
    inner: Arc<ChannelInner>,
}

impl ChangeChannel {
    pub fn new(
        connector: Arc<dyn PushConnector>,
        credentials: Arc<dyn CredentialStore>,
        policy: RetryPolicy,
    ) -> Self {
        let (state, _) = watch::channel(ChannelState::Disconnected);
        let (last_message, _) = watch::channel(None);
        Self {
            inner: Arc::new(ChannelInner {
                connector,
                credentials,
                policy,
                state,
                last_message,
                outbound: Mutex::new(None),
                driver: Mutex::new(None),
                arrivals: AtomicU64::new(0),
            }),
        }
    }

    pub fn state(&self) -> ChannelState {
        *self.inner.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ChannelState> {
        self.inner.state.subscribe()
    }

    /// The most recently received change event, if any.
    pub fn last_message(&self) -> Option<ChangeEvent> {
        self.inner.last_message.borrow().clone()
    }

    pub fn subscribe_messages(&self) -> watch::Receiver<Option<ChangeEvent>> {
        self.inner.last_message.subscribe()
    }

    /// Starts the state machine. Returns `false` when there is no stored
    /// credential or the machine is already running.
    pub fn start(&self) -> bool {
        if self.inner.credentials.token().is_none() {
            debug!("no credential available, change channel not started");
            return false;
        }
        let mut driver = lock(&self.inner.driver);
        if driver.as_ref().is_some_and(|d| !d.handle.is_finished()) {
            return false;
        }
        let stop = CancellationToken::new();
        let handle = tokio::spawn(drive(Arc::clone(&self.inner), stop.clone()));
        *driver = Some(Driver { stop, handle });
        true
    }

    /// Queues `message` for the live connection. Dropped when not connected.
    pub fn send(&self, message: &serde_json::Value) -> bool {
        let outbound = lock(&self.inner.outbound);
        match outbound.as_ref() {
            Some(tx) => tx.send(message.to_string()).is_ok(),
            None => false,
        }
    }

    /// Drops the current connection and starts over with zero failed attempts.
    pub async fn reconnect(&self) -> bool {
        self.stop_driver().await;
        self.start()
    }

    /// Intentional close with the normal-closure code. No reconnect follows.
    pub async fn close(&self) {
        self.stop_driver().await;
        self.inner.set_state(ChannelState::Disconnected);
    }

    async fn stop_driver(&self) {
        let driver = lock(&self.inner.driver).take();
        if let Some(driver) = driver {
            driver.stop.cancel();
            if let Err(err) = driver.handle.await {
                warn!(error = %err, "change channel driver ended abnormally");
            }
        }
    }
}

async fn drive(inner: Arc<ChannelInner>, stop: CancellationToken) {
    let mut attempts: u32 = 0;
    loop {
        let Some(credential) = inner.credentials.token() else {
            debug!("credential gone, change channel stays disconnected");
            inner.set_state(ChannelState::Disconnected);
            return;
        };

        inner.set_state(ChannelState::Connecting);
        let connected = tokio::select! {
            _ = stop.cancelled() => {
                inner.set_state(ChannelState::Disconnected);
                return;
            }
            result = inner.connector.connect(&credential) => result,
        };

        match connected {
            Ok(connection) => {
                attempts = 0;
                inner.set_state(ChannelState::Connected);
                info!("change channel connected");
                match inner.pump(connection, &stop).await {
                    Closure::Intentional => {
                        info!("change channel closed");
                        inner.set_state(ChannelState::Disconnected);
                        return;
                    }
                    Closure::Lost { code, reason } => {
                        warn!(code, reason = %reason, "change channel lost");
                    }
                }
            }
            Err(err) => {
                warn!(error = %err, attempts, "change channel connect failed");
            }
        }

        if !inner.policy.can_retry(attempts) {
            warn!(attempts, "change channel giving up on reconnecting");
            inner.set_state(ChannelState::Disconnected);
            return;
        }
        let delay = inner.policy.next_delay(attempts + 1);
        inner.set_state(ChannelState::Reconnecting {
            attempt: attempts + 1,
            delay,
        });
        tokio::select! {
            _ = stop.cancelled() => {
                inner.set_state(ChannelState::Disconnected);
                return;
            }
            _ = tokio::time::sleep(delay) => {}
        }
        attempts += 1;
    }
}

impl ChannelInner {
    fn set_state(&self, next: ChannelState) {
        let changed = self.state.send_if_modified(|state| {
            if *state == next {
                return false;
            }
            *state = next;
            true
        });
        if changed {
            debug!(state = ?next, "change channel state");
        }
    }

    async fn pump(&self, mut connection: Box<dyn PushConnection>, stop: &CancellationToken) -> Closure {
        let (tx, mut rx) = mpsc::unbounded_channel();
        *lock(&self.outbound) = Some(tx);

        let closure = loop {
            let step = tokio::select! {
                _ = stop.cancelled() => PumpStep::Stop,
                Some(text) = rx.recv() => PumpStep::Send(text),
                frame = connection.recv() => PumpStep::Frame(frame),
            };
            match step {
                PumpStep::Stop => {
                    if let Err(err) = connection.close(NORMAL_CLOSURE, "client closing").await {
                        debug!(error = %err, "close frame not delivered");
                    }
                    break Closure::Intentional;
                }
                PumpStep::Send(text) => {
                    if let Err(err) = connection.send(text).await {
                        warn!(error = %err, "outbound push message dropped");
                    }
                }
                PumpStep::Frame(Some(PushFrame::Text(text))) => self.accept(&text),
                PumpStep::Frame(Some(PushFrame::Closed { code, reason })) => {
                    if code == NORMAL_CLOSURE {
                        break Closure::Intentional;
                    }
                    break Closure::Lost { code, reason };
                }
                PumpStep::Frame(None) => {
                    break Closure::Lost {
                        code: ABNORMAL_CLOSURE,
                        reason: "stream ended".to_string(),
                    };
                }
            }
        };

        *lock(&self.outbound) = None;
        closure
    }

    fn accept(&self, text: &str) {
        match InboundMessage::decode(text) {
            Ok(InboundMessage::DataChange(mut event)) => {
                event.arrival_order = self.arrivals.fetch_add(1, Ordering::Relaxed) + 1;
                debug!(
                    entity_type = %event.entity_type,
                    entity_id = %event.entity_id,
                    arrival = event.arrival_order,
                    "change received"
                );
                self.last_message.send_replace(Some(event));
            }
            Ok(InboundMessage::Other(kind)) => {
                debug!(kind = %kind, "ignoring push message");
            }
            Err(err) => {
                warn!(error = %err, "unparseable push message");
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::domain::{EntityType, TransportError};
    use crate::impls::InMemoryCredentialStore;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;

    pub(crate) enum Script {
        Fail,
        Accept(ScriptedConnection),
    }

    /// Hands out scripted connections in order; fails once the script runs out.
    #[derive(Default)]
    pub(crate) struct ScriptedConnector {
        scripts: Mutex<VecDeque<Script>>,
        pub(crate) connects: AtomicUsize,
    }

    impl ScriptedConnector {
        pub(crate) fn push(&self, script: Script) {
            self.scripts.lock().unwrap().push_back(script);
        }

        pub(crate) fn connects(&self) -> usize {
            self.connects.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PushConnector for ScriptedConnector {
        async fn connect(&self, credential: &str) -> Result<Box<dyn PushConnection>, TransportError> {
            assert_eq!(credential, "token-1");
            self.connects.fetch_add(1, Ordering::SeqCst);
            match self.scripts.lock().unwrap().pop_front() {
                Some(Script::Accept(connection)) => Ok(Box::new(connection)),
                Some(Script::Fail) | None => {
                    Err(TransportError::Network("connection refused".into()))
                }
            }
        }
    }

    pub(crate) struct ScriptedConnection {
        frames: mpsc::UnboundedReceiver<PushFrame>,
        sent: Arc<Mutex<Vec<String>>>,
        closed_with: Arc<Mutex<Option<u16>>>,
    }

    /// Test side of a scripted connection.
    pub(crate) struct Remote {
        pub(crate) frames: mpsc::UnboundedSender<PushFrame>,
        pub(crate) sent: Arc<Mutex<Vec<String>>>,
        pub(crate) closed_with: Arc<Mutex<Option<u16>>>,
    }

    pub(crate) fn connection() -> (ScriptedConnection, Remote) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sent = Arc::new(Mutex::new(Vec::new()));
        let closed_with = Arc::new(Mutex::new(None));
        (
            ScriptedConnection {
                frames: rx,
                sent: Arc::clone(&sent),
                closed_with: Arc::clone(&closed_with),
            },
            Remote {
                frames: tx,
                sent,
                closed_with,
            },
        )
    }

    #[async_trait]
    impl PushConnection for ScriptedConnection {
        async fn recv(&mut self) -> Option<PushFrame> {
            self.frames.recv().await
        }

        async fn send(&mut self, text: String) -> Result<(), TransportError> {
            self.sent.lock().unwrap().push(text);
            Ok(())
        }

        async fn close(&mut self, code: u16, _reason: &str) -> Result<(), TransportError> {
            *self.closed_with.lock().unwrap() = Some(code);
            Ok(())
        }
    }

    pub(crate) fn change_frame(entity: &str, id: &str) -> PushFrame {
        PushFrame::Text(
            json!({
                "type": "data_change",
                "change_type": "update",
                "entity_type": entity,
                "entity_id": id,
                "data": {"id": id},
                "timestamp": "2026-03-01T10:00:00Z"
            })
            .to_string(),
        )
    }

    fn channel(connector: Arc<ScriptedConnector>, token: Option<&str>) -> ChangeChannel {
        let credentials = Arc::new(InMemoryCredentialStore::new(token.map(str::to_string)));
        ChangeChannel::new(connector, credentials, RetryPolicy::reconnect_default())
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_without_credential_nothing_connects() {
        let connector = Arc::new(ScriptedConnector::default());
        let channel = channel(connector.clone(), None);

        assert!(!channel.start());
        settle().await;

        assert_eq!(channel.state(), ChannelState::Disconnected);
        assert_eq!(connector.connects(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_only_the_latest_message_is_exposed() {
        let connector = Arc::new(ScriptedConnector::default());
        let (conn, remote) = connection();
        connector.push(Script::Accept(conn));
        let channel = channel(connector.clone(), Some("token-1"));

        assert!(channel.start());
        settle().await;
        assert_eq!(channel.state(), ChannelState::Connected);

        remote.frames.send(change_frame("case", "a")).unwrap();
        remote.frames.send(change_frame("client", "b")).unwrap();
        remote.frames.send(PushFrame::Text("not json".into())).unwrap();
        remote.frames.send(PushFrame::Text(r#"{"type":"pong"}"#.into())).unwrap();
        settle().await;

        let last = channel.last_message().unwrap();
        assert_eq!(last.entity_type, EntityType::Client);
        assert_eq!(last.entity_id, "b");
        assert_eq!(last.arrival_order, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lost_connection_reconnects_and_resets_attempts() {
        let connector = Arc::new(ScriptedConnector::default());
        let (first, first_remote) = connection();
        let (second, second_remote) = connection();
        connector.push(Script::Accept(first));
        connector.push(Script::Accept(second));
        let channel = channel(connector.clone(), Some("token-1"));
        channel.start();
        settle().await;

        drop(first_remote);
        settle().await;
        assert_eq!(
            channel.state(),
            ChannelState::Reconnecting {
                attempt: 1,
                delay: Duration::from_secs(1)
            }
        );

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(channel.state(), ChannelState::Connected);
        assert_eq!(connector.connects(), 2);

        second_remote
            .frames
            .send(PushFrame::Closed {
                code: 1011,
                reason: "server error".into(),
            })
            .unwrap();
        settle().await;
        assert_eq!(
            channel.state(),
            ChannelState::Reconnecting {
                attempt: 1,
                delay: Duration::from_secs(1)
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_five_failed_reconnects() {
        let connector = Arc::new(ScriptedConnector::default());
        let channel = channel(connector.clone(), Some("token-1"));
        let start = tokio::time::Instant::now();
        let mut states = channel.subscribe_state();

        channel.start();
        let mut delays = Vec::new();
        loop {
            states.changed().await.unwrap();
            match *states.borrow_and_update() {
                ChannelState::Reconnecting { delay, .. } => delays.push(delay),
                ChannelState::Disconnected => break,
                _ => {}
            }
        }

        assert_eq!(
            delays,
            [1, 2, 4, 8, 16].map(Duration::from_secs).to_vec()
        );
        assert_eq!(connector.connects(), 6);
        assert_eq!(start.elapsed(), Duration::from_secs(31));

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(connector.connects(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_normal_closure_from_server_is_terminal() {
        let connector = Arc::new(ScriptedConnector::default());
        let (conn, remote) = connection();
        connector.push(Script::Accept(conn));
        let channel = channel(connector.clone(), Some("token-1"));
        channel.start();
        settle().await;

        remote
            .frames
            .send(PushFrame::Closed {
                code: NORMAL_CLOSURE,
                reason: "bye".into(),
            })
            .unwrap();
        settle().await;
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(channel.state(), ChannelState::Disconnected);
        assert_eq!(connector.connects(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_sends_normal_closure_and_stops() {
        let connector = Arc::new(ScriptedConnector::default());
        let (conn, remote) = connection();
        connector.push(Script::Accept(conn));
        let channel = channel(connector.clone(), Some("token-1"));
        channel.start();
        settle().await;

        channel.close().await;

        assert_eq!(*remote.closed_with.lock().unwrap(), Some(NORMAL_CLOSURE));
        assert_eq!(channel.state(), ChannelState::Disconnected);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(connector.connects(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_only_reaches_a_live_connection() {
        let connector = Arc::new(ScriptedConnector::default());
        let (conn, remote) = connection();
        connector.push(Script::Accept(conn));
        let channel = channel(connector.clone(), Some("token-1"));

        assert!(!channel.send(&json!({"type": "ping"})));
        channel.start();
        settle().await;

        assert!(channel.send(&json!({"type": "ping"})));
        settle().await;
        assert_eq!(*remote.sent.lock().unwrap(), vec![r#"{"type":"ping"}"#.to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_reconnect_restarts_the_machine() {
        let connector = Arc::new(ScriptedConnector::default());
        let (first, first_remote) = connection();
        let (second, _second_remote) = connection();
        connector.push(Script::Accept(first));
        connector.push(Script::Accept(second));
        let channel = channel(connector.clone(), Some("token-1"));
        channel.start();
        settle().await;

        assert!(channel.reconnect().await);
        settle().await;

        assert_eq!(*first_remote.closed_with.lock().unwrap(), Some(NORMAL_CLOSURE));
        assert_eq!(channel.state(), ChannelState::Connected);
        assert_eq!(connector.connects(), 2);
    }
}
