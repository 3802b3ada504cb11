//! Versioned records (optimistic concurrency stamp).
//!
//! サーバが保持する全エンティティは `version` を持ちます。
//!
//! # 不変条件
//! - 作成時は `version = 1`
//! - 更新が受理されるたびにサーバ側で +1（クライアントは加算しない）
//! - 送信された version と保存済み version が一致しない書き込みは拒否される

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Version stamp carried by every stored record. Always `>= 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct Version(u32);

impl Version {
    pub const INITIAL: Version = Version(1);

    /// `None` for 0: a stored record never carries version 0.
    pub fn new(value: u32) -> Option<Self> {
        (value >= 1).then_some(Self(value))
    }

    pub fn get(self) -> u32 {
        self.0
    }

    /// The version the server assigns after accepting a write at `self`.
    pub fn next(self) -> Version {
        Version(self.0.saturating_add(1))
    }
}

impl TryFrom<u32> for Version {
    type Error = String;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Version::new(value).ok_or_else(|| format!("version must be >= 1, got {value}"))
    }
}

impl From<Version> for u32 {
    fn from(version: Version) -> Self {
        version.0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// A domain entity as the REST collaborator returns it: id, version, and the
/// remaining fields kept opaque.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionedRecord {
    pub id: String,
    pub version: Version,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl VersionedRecord {
    pub fn new(id: impl Into<String>, version: Version, fields: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            version,
            fields,
        }
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_version_zero_is_not_a_version() {
        assert_eq!(Version::new(0), None);
        assert_eq!(Version::new(1), Some(Version::INITIAL));
        assert_eq!(Version::INITIAL.next().get(), 2);
    }

    #[test]
    fn test_record_flattens_fields() {
        let record: VersionedRecord = serde_json::from_value(json!({
            "id": "c-1",
            "version": 3,
            "name": "Acme",
            "phone": "555"
        }))
        .unwrap();

        assert_eq!(record.id, "c-1");
        assert_eq!(record.version.get(), 3);
        assert_eq!(record.field("name"), Some(&json!("Acme")));
        assert!(record.field("version").is_none());
    }

    #[test]
    fn test_record_with_version_zero_fails_to_decode() {
        let decoded: Result<VersionedRecord, _> =
            serde_json::from_value(json!({ "id": "x", "version": 0 }));
        assert!(decoded.is_err());
    }
}
