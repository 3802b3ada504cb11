//! App - アプリケーション層
//!
//! このモジュールは、ports を組み合わせて同期クライアントのロジックを実装します。
//!
//! # 主要コンポーネント
//! - **SyncClientBuilder**: クライアントの構築とワイヤリング
//! - **ResilientLoader**: ticket 付きの取得（timeout, retry, cancel, 古い応答の破棄）
//! - **ChangeChannel**: push channel の接続管理と指数バックオフ再接続
//! - **FallbackPoller**: channel 切断中のポーリング
//! - **ChangeAggregator**: 受信した ChangeEvent のバッファ
//! - **ConflictAwareWriter / FormSession**: version 付き書き込みと競合処理
//! - **DraftStore / Autosaver**: フォーム入力の自動保存と復元
//! - **RealtimeSync**: channel + poller + aggregator の束ね役

pub mod aggregator;
pub mod builder;
pub mod channel;
pub mod drafts;
pub mod form;
pub mod loader;
pub mod poller;
pub mod realtime;
pub mod retry;
pub mod status;
pub mod writer;

// 主要な型を再エクスポート
pub use self::aggregator::ChangeAggregator;
pub use self::builder::{BuildError, SyncClient, SyncClientBuilder};
pub use self::channel::{ChangeChannel, ChannelState};
pub use self::drafts::{Autosaver, DraftError, DraftPolicy, DraftStore, UnloadGuard};
pub use self::form::{FormMode, FormSession, MountOutcome, SubmitError};
pub use self::loader::{LoadPhase, LoadPolicy, LoadSnapshot, ReferenceGate, ResilientLoader};
pub use self::poller::{FallbackPoller, PollSnapshot};
pub use self::realtime::RealtimeSync;
pub use self::retry::RetryPolicy;
pub use self::status::SyncStatus;
pub use self::writer::ConflictAwareWriter;
