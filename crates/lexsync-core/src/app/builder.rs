//! SyncClientBuilder - 同期クライアントの構築とワイヤリング
//!
//! # Fail-fast 設計
//! - REST コラボレータと credential store は必須。push connector と local store は任意
//!   （push が無ければ常にポーリング、local store が無ければメモリ上に Draft を置く）
//! - build() 時に不足コンポーネントと不正なポリシーをまとめて検出して BuildError を返す

use std::sync::Arc;
use std::time::Duration;

use super::aggregator::ChangeAggregator;
use super::channel::ChangeChannel;
use super::drafts::{DraftPolicy, DraftStore};
use super::form::FormSession;
use super::loader::{LoadPolicy, ResilientLoader};
use super::poller::FallbackPoller;
use super::realtime::RealtimeSync;
use super::retry::RetryPolicy;
use super::writer::ConflictAwareWriter;
use crate::config::SyncConfig;
use crate::domain::{EntityType, TransportError};
use crate::impls::InMemoryKeyValueStore;
use crate::ports::{
    Clock, CredentialStore, KeyValueStore, PushConnection, PushConnector, RecordStore, SystemClock,
};
use crate::typed::{Entity, ListFetcher};

/// SyncClientBuilder は SyncClient を構築
///
/// # 使用例
/// ```ignore
/// let client = SyncClientBuilder::from_config(&config)
///     .record_store(Arc::new(http_store))
///     .credentials(credentials)
///     .push_connector(Arc::new(WsPushConnector::new(config.ws_url())))
///     .build()?;
/// let clients = client.loader::<Client>();
/// ```
pub struct SyncClientBuilder {
    store: Option<Arc<dyn RecordStore>>,
    credentials: Option<Arc<dyn CredentialStore>>,
    connector: Option<Arc<dyn PushConnector>>,
    kv: Option<Arc<dyn KeyValueStore>>,
    clock: Arc<dyn Clock>,
    load_policy: LoadPolicy,
    reconnect_policy: RetryPolicy,
    poll_interval: Duration,
    draft_policy: DraftPolicy,
}

/// BuildError は構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Missing components: {0:?}. These must be provided before build().")]
    MissingComponents(Vec<&'static str>),

    #[error("Invalid policy: {0}")]
    InvalidPolicy(String),
}

impl SyncClientBuilder {
    pub fn new() -> Self {
        Self {
            store: None,
            credentials: None,
            connector: None,
            kv: None,
            clock: Arc::new(SystemClock),
            load_policy: LoadPolicy::default(),
            reconnect_policy: RetryPolicy::reconnect_default(),
            poll_interval: Duration::from_secs(10),
            draft_policy: DraftPolicy::default(),
        }
    }

    /// Policies from `config`; components still have to be supplied.
    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new()
            .load_policy(config.load_policy())
            .reconnect_policy(config.reconnect_policy())
            .poll_interval(config.poll_interval())
            .draft_policy(config.draft_policy())
    }

    pub fn record_store(mut self, store: Arc<dyn RecordStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn credentials(mut self, credentials: Arc<dyn CredentialStore>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn push_connector(mut self, connector: Arc<dyn PushConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn local_store(mut self, kv: Arc<dyn KeyValueStore>) -> Self {
        self.kv = Some(kv);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn load_policy(mut self, policy: LoadPolicy) -> Self {
        self.load_policy = policy;
        self
    }

    pub fn reconnect_policy(mut self, policy: RetryPolicy) -> Self {
        self.reconnect_policy = policy;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn draft_policy(mut self, policy: DraftPolicy) -> Self {
        self.draft_policy = policy;
        self
    }

    /// # 検証
    /// - record_store と credentials が設定されているか
    /// - timeout / poll interval / debounce が 0 でないか、loader の試行回数が 1 以上か
    pub fn build(self) -> Result<SyncClient, BuildError> {
        let mut missing = Vec::new();
        if self.store.is_none() {
            missing.push("record_store");
        }
        if self.credentials.is_none() {
            missing.push("credentials");
        }
        let (Some(store), Some(credentials)) = (self.store, self.credentials) else {
            return Err(BuildError::MissingComponents(missing));
        };

        if self.load_policy.timeout.is_zero() {
            return Err(BuildError::InvalidPolicy("load timeout must be non-zero".into()));
        }
        if self.load_policy.retry.max_attempts == 0 {
            return Err(BuildError::InvalidPolicy(
                "loader needs at least one attempt".into(),
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(BuildError::InvalidPolicy("poll interval must be non-zero".into()));
        }
        if self.draft_policy.debounce.is_zero() {
            return Err(BuildError::InvalidPolicy("draft debounce must be non-zero".into()));
        }

        let kv = self
            .kv
            .unwrap_or_else(|| Arc::new(InMemoryKeyValueStore::new()));
        let connector = self
            .connector
            .unwrap_or_else(|| Arc::new(NoPushConnector));
        let drafts = Arc::new(DraftStore::new(kv, Arc::clone(&self.clock), self.draft_policy));

        Ok(SyncClient {
            writer: ConflictAwareWriter::new(Arc::clone(&store)),
            store,
            credentials,
            connector,
            clock: self.clock,
            drafts,
            load_policy: self.load_policy,
            reconnect_policy: self.reconnect_policy,
            poll_interval: self.poll_interval,
        })
    }
}

impl Default for SyncClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Stand-in when no push transport is configured; the poller covers for it.
struct NoPushConnector;

#[async_trait::async_trait]
impl PushConnector for NoPushConnector {
    async fn connect(&self, _credential: &str) -> Result<Box<dyn PushConnection>, TransportError> {
        Err(TransportError::Network("no push transport configured".into()))
    }
}

/// SyncClient は構築済みのコンポーネント一式
///
/// loader / form / realtime はそれぞれ呼び出しごとに独立したインスタンスを作る
/// （ticket counter はビューごとに持つ）。
pub struct SyncClient {
    store: Arc<dyn RecordStore>,
    credentials: Arc<dyn CredentialStore>,
    connector: Arc<dyn PushConnector>,
    clock: Arc<dyn Clock>,
    writer: ConflictAwareWriter,
    drafts: Arc<DraftStore>,
    load_policy: LoadPolicy,
    reconnect_policy: RetryPolicy,
    poll_interval: Duration,
}

impl SyncClient {
    pub fn record_store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    pub fn credentials(&self) -> &Arc<dyn CredentialStore> {
        &self.credentials
    }

    pub fn writer(&self) -> ConflictAwareWriter {
        self.writer.clone()
    }

    pub fn drafts(&self) -> &Arc<DraftStore> {
        &self.drafts
    }

    /// A fresh loader for the full `T` collection.
    pub fn loader<T: Entity>(&self) -> ResilientLoader<T> {
        ResilientLoader::new(
            T::TYPE.collection_path(),
            Arc::new(ListFetcher::<T>::new(Arc::clone(&self.store))),
            self.load_policy.clone(),
        )
    }

    /// A fresh loader for a filtered `T` collection.
    pub fn search_loader<T: Entity>(&self, params: Vec<(String, String)>) -> ResilientLoader<T> {
        ResilientLoader::new(
            format!("{} search", T::TYPE.collection_path()),
            Arc::new(ListFetcher::<T>::search(Arc::clone(&self.store), params)),
            self.load_policy.clone(),
        )
    }

    pub fn form(&self, entity: EntityType, record_id: Option<&str>) -> FormSession {
        FormSession::new(entity, record_id, self.writer(), Arc::clone(&self.drafts))
    }

    /// Starts the push channel, the fallback poller and the aggregator.
    pub fn start_realtime(&self) -> RealtimeSync {
        let aggregator = Arc::new(ChangeAggregator::new());
        let channel = ChangeChannel::new(
            Arc::clone(&self.connector),
            Arc::clone(&self.credentials),
            self.reconnect_policy.clone(),
        );
        let poller = FallbackPoller::new(
            Arc::clone(&self.store),
            aggregator.clone(),
            Arc::clone(&self.clock),
            self.poll_interval,
        );
        RealtimeSync::start(channel, poller, aggregator)
    }
}
