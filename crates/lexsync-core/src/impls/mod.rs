//! Impls - ports の実装
//!
//! # 本番用
//! - **HttpRecordStore**: reqwest による REST コラボレータ
//! - **WsPushConnector**: tokio-tungstenite による push channel
//! - **FileKeyValueStore**: ディレクトリ上の Draft 保存先
//!
//! # 開発用・テスト用
//! - **InMemoryRecordStore**: version 不変条件を守る REST の代役（CLI の `--demo` でも使用）
//! - **InMemoryKeyValueStore**
//! - **InMemoryCredentialStore**

pub mod credential;
pub mod http_store;
pub mod inmem_store;
pub mod kv;
pub mod ws_push;

pub use self::credential::InMemoryCredentialStore;
pub use self::http_store::HttpRecordStore;
pub use self::inmem_store::InMemoryRecordStore;
pub use self::kv::{FileKeyValueStore, InMemoryKeyValueStore};
pub use self::ws_push::WsPushConnector;
