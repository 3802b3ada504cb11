//! Ports - 抽象化レイヤー
//!
//! このモジュールは Hexagonal Architecture の「ポート」を定義します。
//! 各 trait は外部コラボレータ（REST API, push channel, ローカルストア, 資格情報）
//! へのインターフェースを提供し、実装の詳細を隠蔽します。
//!
//! # 設計原則
//! - サーバの REST API が正本（source of truth）
//! - push channel は無効化シグナルを運ぶだけ
//! - ローカルストアは Draft 専用

pub mod clock;
pub mod credential;
pub mod event_sink;
pub mod fetcher;
pub mod kv_store;
pub mod push;
pub mod record_store;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::credential::CredentialStore;
pub use self::event_sink::EventSink;
pub use self::fetcher::ResourceFetcher;
pub use self::kv_store::{KeyValueStore, KvError};
pub use self::push::{PushConnection, PushConnector, PushFrame};
pub use self::record_store::RecordStore;
