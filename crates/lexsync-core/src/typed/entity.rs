//! Entity trait - 型付きレコードの定義
//!
//! `const TYPE` でエンティティ種別と Rust の型を対応付けます。

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::domain::{EntityType, Version};

/// Entity は REST コレクションの 1 レコードを表す型
///
/// # 使用例
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct Case {
///     id: String,
///     version: Version,
///     title: String,
/// }
///
/// impl Entity for Case {
///     const TYPE: EntityType = EntityType::Case;
///     fn id(&self) -> &str { &self.id }
///     fn version(&self) -> Version { self.version }
/// }
/// ```
pub trait Entity: Serialize + DeserializeOwned + Send + Sync + 'static {
    const TYPE: EntityType;

    fn id(&self) -> &str;

    fn version(&self) -> Version;
}

/// A client, as the reference-data selectors of the case, execution and
/// compensation-letter forms need it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Client {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tax_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    pub version: Version,
}

impl Entity for Client {
    const TYPE: EntityType = EntityType::Client;

    fn id(&self) -> &str {
        &self.id
    }

    fn version(&self) -> Version {
        self.version
    }
}
