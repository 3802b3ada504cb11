//! KeyValueStore port - ローカル永続ストア
//!
//! このクレートでは Draft の保存と、Draft 削除時のキャッシュ無効化にだけ使います。
//!
//! # 実装
//! - **InMemoryKeyValueStore**: テスト用
//! - **FileKeyValueStore**: ディレクトリ配下に 1 キー 1 ファイル

use thiserror::Error;

#[derive(Debug, Error)]
pub enum KvError {
    #[error("local store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid key: {0}")]
    InvalidKey(String),
}

/// KeyValueStore は文字列キーと文字列値の永続ストア
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, KvError>;

    fn set(&self, key: &str, value: &str) -> Result<(), KvError>;

    /// Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<(), KvError>;
}
