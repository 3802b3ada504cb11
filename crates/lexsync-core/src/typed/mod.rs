//! Typed - 型付きエンティティ API
//!
//! エンティティ種別の取り違えを型で排除し、REST の JSON を
//! ResilientLoader<T> が扱う型付きレコードへ変換します。
//!
//! # 二層構造
//! - **表層（Typed）**: `Entity` trait, `ListFetcher<T>` - 型安全
//! - **内部（Dyn）**: `RecordStore` - serde_json::Value で全エンティティを扱う

pub mod entity;
pub mod fetcher;

pub use self::entity::{Client, Entity};
pub use self::fetcher::ListFetcher;
