//! Entity kinds and change kinds shared by the REST and push collaborators.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// EntityType は同期対象のレコード種別
///
/// ワイヤ上の表現は snake_case（`compensation_letter` など）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Client,
    Case,
    Execution,
    CompensationLetter,
}

impl EntityType {
    /// All four collections, in the order the fallback poller pulls them.
    pub const ALL: [EntityType; 4] = [
        EntityType::Client,
        EntityType::Case,
        EntityType::Execution,
        EntityType::CompensationLetter,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EntityType::Client => "client",
            EntityType::Case => "case",
            EntityType::Execution => "execution",
            EntityType::CompensationLetter => "compensation_letter",
        }
    }

    /// REST collection path for this entity.
    pub fn collection_path(self) -> &'static str {
        match self {
            EntityType::Client => "/api/clients",
            EntityType::Case => "/api/cases",
            EntityType::Execution => "/api/executions",
            EntityType::CompensationLetter => "/api/compensation-letters",
        }
    }

    /// Human readable name used in change notices.
    pub fn display_name(self) -> &'static str {
        match self {
            EntityType::Client => "Client",
            EntityType::Case => "Case",
            EntityType::Execution => "Execution",
            EntityType::CompensationLetter => "Compensation letter",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown entity type: {0}")]
pub struct UnknownEntityType(pub String);

impl FromStr for EntityType {
    type Err = UnknownEntityType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntityType::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| UnknownEntityType(s.to_string()))
    }
}

/// ChangeType はサーバ側で起きた変更の種類
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Create,
    Update,
    Delete,
}

impl ChangeType {
    pub fn past_tense(self) -> &'static str {
        match self {
            ChangeType::Create => "created",
            ChangeType::Update => "updated",
            ChangeType::Delete => "deleted",
        }
    }
}
