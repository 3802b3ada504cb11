//! lexsync-core
//!
//! Client-side synchronization for a case-management REST backend.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（entity, record, events, ticket, draft, errors）
//! - **ports**: 抽象化レイヤー（RecordStore, PushConnector, KeyValueStore, CredentialStore, Clock, など）
//! - **app**: アプリケーションロジック（builder, loader, channel, poller, aggregator, writer, form, drafts）
//! - **typed**: 型付きエンティティ API（Entity trait, ListFetcher）
//! - **impls**: 実装（HttpRecordStore, WsPushConnector, FileKeyValueStore, InMemory 系）
//! - **config**: TOML + 環境変数による設定
//! - **observability**: tracing の初期化

pub mod domain;
pub mod ports;
pub mod app;
pub mod typed;
pub mod impls;
pub mod config;
pub mod observability;
