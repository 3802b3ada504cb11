//! ResilientLoader - 不安定なネットワーク越しの参照データ取得
//!
//! # フロー（1 回の呼び出し）
//! 1. 新しい ticket を発行し、前の ticket の token をキャンセル
//! 2. 取得処理とタイムアウト（5000 ms）を競争させる
//! 3. 取得が先に終われば、ticket がまだ最新ならコミット。古ければ黙って捨てる
//! 4. タイムアウトが先なら取得はキャンセルせず、裏で待ち続ける（遅延到着）。
//!    attempt < maxRetries なら `2^(attempt-1)` 秒後に再試行。再試行の直前に
//!    ticket がまだ最新で、かつ遅延到着がコミットしていないことを確認する
//! 5. 再試行を使い切ったら TerminalLoadError。手動リトライは attempt 1 から
//!
//! # 設計原則
//! - 状態を変えてよいのは最新 ticket の結果だけ（`ticket == counter` のときだけコミット）
//! - キャンセル（資源の回収）と鮮度チェック（古い結果の破棄）は別の仕組みで、両方必要
//! - キャンセルされた呼び出しが TerminalLoadError になることはない
//! - 遅延到着の成功は、すでに表示したエラーより優先する（ticket が最新である限り）

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::retry::RetryPolicy;
use crate::domain::{LoadError, LoadTicket, TerminalLoadError, TicketId, TransportError};
use crate::ports::ResourceFetcher;

/// Timeout race and retry budget for one loader.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadPolicy {
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for LoadPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(5000),
            retry: RetryPolicy::loader_default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadPhase {
    Idle,
    Loading { attempt: u32 },
    Ready,
    Failed(TerminalLoadError),
}

/// What a view renders: the last committed records plus the current phase.
///
/// Records stay visible while a reload is in flight or after it failed.
#[derive(Debug)]
pub struct LoadSnapshot<T> {
    pub records: Option<Arc<Vec<T>>>,
    pub phase: LoadPhase,
    pub committed: Option<TicketId>,
}

impl<T> Clone for LoadSnapshot<T> {
    fn clone(&self) -> Self {
        Self {
            records: self.records.clone(),
            phase: self.phase.clone(),
            committed: self.committed,
        }
    }
}

impl<T> LoadSnapshot<T> {
    fn initial() -> Self {
        Self {
            records: None,
            phase: LoadPhase::Idle,
            committed: None,
        }
    }

    pub fn records(&self) -> &[T] {
        self.records.as_deref().map(Vec::as_slice).unwrap_or_default()
    }

    pub fn error(&self) -> Option<&TerminalLoadError> {
        match &self.phase {
            LoadPhase::Failed(err) => Some(err),
            _ => None,
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(self.phase, LoadPhase::Loading { .. })
    }

    /// Forms disable submission while reference data is in flight or failed.
    pub fn blocks_submission(&self) -> bool {
        matches!(self.phase, LoadPhase::Loading { .. } | LoadPhase::Failed(_))
    }
}

/// Anything a form must wait on before it may submit.
pub trait ReferenceGate: Send + Sync {
    fn blocks_submission(&self) -> bool;
}

struct TicketBook {
    counter: u64,
    in_flight: Option<CancellationToken>,
    committed: Option<TicketId>,
}

enum RetryGate<T> {
    Proceed,
    Committed(Arc<Vec<T>>),
    Superseded,
}

struct LoaderInner<T> {
    resource: String,
    fetcher: Arc<dyn ResourceFetcher<T>>,
    policy: LoadPolicy,
    book: Mutex<TicketBook>,
    snapshot: watch::Sender<LoadSnapshot<T>>,
}

/// One loader instance per view. Each instance owns its own ticket counter
/// and in-flight cancellation handle; clones share them.
pub struct ResilientLoader<T> {
    inner: Arc<LoaderInner<T>>,
}

impl<T> Clone for ResilientLoader<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> ResilientLoader<T>
where
    T: Send + Sync + 'static,
{
    pub fn new(
        resource: impl Into<String>,
        fetcher: Arc<dyn ResourceFetcher<T>>,
        policy: LoadPolicy,
    ) -> Self {
        let (snapshot, _) = watch::channel(LoadSnapshot::initial());
        Self {
            inner: Arc::new(LoaderInner {
                resource: resource.into(),
                fetcher,
                policy,
                book: Mutex::new(TicketBook {
                    counter: 0,
                    in_flight: None,
                    committed: None,
                }),
                snapshot,
            }),
        }
    }

    pub fn resource(&self) -> &str {
        &self.inner.resource
    }

    pub fn policy(&self) -> &LoadPolicy {
        &self.inner.policy
    }

    pub fn snapshot(&self) -> LoadSnapshot<T> {
        self.inner.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<LoadSnapshot<T>> {
        self.inner.snapshot.subscribe()
    }

    /// Load from attempt 1. Supersedes any invocation still in flight.
    pub async fn load(&self) -> Result<Arc<Vec<T>>, LoadError> {
        self.run(1).await
    }

    /// User-triggered retry after a terminal error. Starts over at attempt 1.
    pub async fn retry(&self) -> Result<Arc<Vec<T>>, LoadError> {
        self.run(1).await
    }

    /// Abandon everything in flight (view unmount). Outstanding calls are
    /// cancelled and any result they still produce is stale.
    pub async fn cancel(&self) {
        let mut book = self.inner.book.lock().await;
        if let Some(token) = book.in_flight.take() {
            token.cancel();
        }
        book.counter += 1;
        self.inner.snapshot.send_modify(|snapshot| {
            if snapshot.is_loading() {
                snapshot.phase = LoadPhase::Idle;
            }
        });
        debug!(resource = %self.inner.resource, "loader cancelled");
    }

    async fn run(&self, first_attempt: u32) -> Result<Arc<Vec<T>>, LoadError> {
        let inner = &self.inner;
        let retry = &inner.policy.retry;
        let mut attempt = first_attempt;

        loop {
            let ticket = inner.issue(attempt).await;
            debug!(resource = %inner.resource, ticket = %ticket.id, attempt = ticket.attempt, "fetch start");

            let mut call = inner.spawn_call(&ticket);
            let settled = tokio::select! {
                joined = &mut call => Some(settle(joined)),
                _ = tokio::time::sleep(inner.policy.timeout) => None,
            };

            let last_error = match settled {
                Some(Ok(records)) => {
                    return match inner.commit(&ticket, records).await {
                        Some(records) => Ok(records),
                        None => {
                            debug!(resource = %inner.resource, ticket = %ticket.id, "stale result ignored");
                            Err(LoadError::Cancelled(ticket.id))
                        }
                    };
                }
                Some(Err(TransportError::Cancelled)) => {
                    debug!(resource = %inner.resource, ticket = %ticket.id, "fetch cancelled");
                    return Err(LoadError::Cancelled(ticket.id));
                }
                Some(Err(err)) => {
                    if !inner.is_current(ticket.id).await {
                        debug!(resource = %inner.resource, ticket = %ticket.id, "stale error ignored");
                        return Err(LoadError::Cancelled(ticket.id));
                    }
                    warn!(
                        resource = %inner.resource,
                        ticket = %ticket.id,
                        attempt = ticket.attempt,
                        error = %err,
                        "fetch attempt failed"
                    );
                    err
                }
                None => {
                    if !inner.is_current(ticket.id).await {
                        return Err(LoadError::Cancelled(ticket.id));
                    }
                    info!(
                        resource = %inner.resource,
                        ticket = %ticket.id,
                        attempt = ticket.attempt,
                        "timeout reached, still waiting for the response"
                    );
                    watch_late_arrival(Arc::clone(inner), ticket.clone(), call);
                    TransportError::Timeout(duration_millis(inner.policy.timeout))
                }
            };

            if !retry.can_retry(attempt) {
                return Err(inner.fail(&ticket, last_error).await);
            }

            tokio::time::sleep(retry.next_delay(attempt)).await;
            match inner.gate(ticket.id).await {
                RetryGate::Proceed => attempt += 1,
                RetryGate::Committed(records) => return Ok(records),
                RetryGate::Superseded => return Err(LoadError::Cancelled(ticket.id)),
            }
        }
    }
}

impl<T> ReferenceGate for ResilientLoader<T>
where
    T: Send + Sync + 'static,
{
    fn blocks_submission(&self) -> bool {
        self.inner.snapshot.borrow().blocks_submission()
    }
}

impl<T> LoaderInner<T>
where
    T: Send + Sync + 'static,
{
    async fn issue(&self, attempt: u32) -> LoadTicket {
        let mut book = self.book.lock().await;
        if let Some(previous) = book.in_flight.take() {
            previous.cancel();
        }
        book.counter += 1;
        let ticket = LoadTicket::new(TicketId::new(book.counter), attempt);
        book.in_flight = Some(ticket.token.clone());
        self.snapshot
            .send_modify(|snapshot| snapshot.phase = LoadPhase::Loading { attempt });
        ticket
    }

    fn spawn_call(&self, ticket: &LoadTicket) -> JoinHandle<Result<Vec<T>, TransportError>> {
        let fetcher = Arc::clone(&self.fetcher);
        let token = ticket.token.clone();
        tokio::spawn(async move { fetcher.fetch(token).await })
    }

    async fn is_current(&self, id: TicketId) -> bool {
        self.book.lock().await.counter == id.get()
    }

    /// Commits only if `ticket` is still the latest one issued.
    async fn commit(&self, ticket: &LoadTicket, records: Vec<T>) -> Option<Arc<Vec<T>>> {
        let mut book = self.book.lock().await;
        if book.counter != ticket.id.get() {
            return None;
        }
        book.committed = Some(ticket.id);
        let records = Arc::new(records);
        self.snapshot.send_modify(|snapshot| {
            snapshot.records = Some(Arc::clone(&records));
            snapshot.phase = LoadPhase::Ready;
            snapshot.committed = Some(ticket.id);
        });
        debug!(resource = %self.resource, ticket = %ticket.id, count = records.len(), "records committed");
        Some(records)
    }

    /// Terminal failure after `ticket.attempt` attempts.
    async fn fail(&self, ticket: &LoadTicket, last_error: TransportError) -> LoadError {
        let book = self.book.lock().await;
        if book.counter != ticket.id.get() || book.committed == Some(ticket.id) {
            return LoadError::Cancelled(ticket.id);
        }
        let terminal = TerminalLoadError {
            resource: self.resource.clone(),
            attempts: ticket.attempt,
            last_error,
        };
        self.snapshot
            .send_modify(|snapshot| snapshot.phase = LoadPhase::Failed(terminal.clone()));
        warn!(resource = %self.resource, attempts = ticket.attempt, error = %terminal.last_error, "giving up");
        LoadError::Terminal(terminal)
    }

    async fn gate(&self, id: TicketId) -> RetryGate<T> {
        let book = self.book.lock().await;
        if book.counter != id.get() {
            return RetryGate::Superseded;
        }
        if book.committed == Some(id) {
            let records = self.snapshot.borrow().records.clone().unwrap_or_default();
            return RetryGate::Committed(records);
        }
        RetryGate::Proceed
    }
}

/// Keeps awaiting a call whose timeout already fired.
fn watch_late_arrival<T>(
    inner: Arc<LoaderInner<T>>,
    ticket: LoadTicket,
    call: JoinHandle<Result<Vec<T>, TransportError>>,
) where
    T: Send + Sync + 'static,
{
    tokio::spawn(async move {
        match settle(call.await) {
            Ok(records) => {
                if inner.commit(&ticket, records).await.is_some() {
                    info!(resource = %inner.resource, ticket = %ticket.id, attempt = ticket.attempt, "late response committed");
                } else {
                    debug!(resource = %inner.resource, ticket = %ticket.id, "late response was stale");
                }
            }
            Err(err) => {
                debug!(resource = %inner.resource, ticket = %ticket.id, error = %err, "late response failed");
            }
        }
    });
}

fn settle<T>(
    joined: Result<Result<Vec<T>, TransportError>, JoinError>,
) -> Result<Vec<T>, TransportError> {
    joined.unwrap_or_else(|err| {
        if err.is_cancelled() {
            Err(TransportError::Cancelled)
        } else {
            Err(TransportError::Network(format!("fetch task failed: {err}")))
        }
    })
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
