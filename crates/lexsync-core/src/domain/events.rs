//! Events - サーバ側の変更通知
//!
//! ChangeEvent は永続化されない一時的な通知です。
//!
//! # 設計原則
//! - 消費者にとっての順序は到着順（`arrival_order`）のみ
//! - 埋め込まれた timestamp は表示用で、順序付けには使わない（時計のずれは補正しない）
//! - payload は権威ある状態として扱わない。受信側は必ず全件を再読み込みする

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::entity::{ChangeType, EntityType};

/// Message `type` tag of the only inbound push message this crate consumes.
pub const DATA_CHANGE: &str = "data_change";

/// Entity id used by change events synthesized from a fallback poll.
pub const POLLING_FALLBACK_ID: &str = "polling-fallback";

/// An invalidation signal for one entity type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub entity_type: EntityType,
    pub change_type: ChangeType,
    pub entity_id: String,
    pub payload: Value,
    /// Producer timestamp, informational only.
    pub timestamp: Option<DateTime<Utc>>,
    /// Position in the receiving buffer; assigned on arrival.
    pub arrival_order: u64,
}

impl ChangeEvent {
    pub fn new(
        entity_type: EntityType,
        change_type: ChangeType,
        entity_id: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            entity_type,
            change_type,
            entity_id: entity_id.into(),
            payload,
            timestamp: None,
            arrival_order: 0,
        }
    }

    /// Generic "client updated" event the poller emits to invalidate views.
    pub fn polling_fallback(snapshot: Value, at: DateTime<Utc>) -> Self {
        Self {
            timestamp: Some(at),
            ..Self::new(
                EntityType::Client,
                ChangeType::Update,
                POLLING_FALLBACK_ID,
                snapshot,
            )
        }
    }

    pub fn is_polling_fallback(&self) -> bool {
        self.entity_id == POLLING_FALLBACK_ID
    }

    /// Short notice text, e.g. "Client updated".
    pub fn describe(&self) -> String {
        format!(
            "{} {}",
            self.entity_type.display_name(),
            self.change_type.past_tense()
        )
    }
}

/// Wire envelope of a push message:
/// `{type: "data_change", change_type, entity_type, entity_id, data, timestamp}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataChangeMessage {
    #[serde(rename = "type")]
    pub kind: String,
    pub change_type: ChangeType,
    pub entity_type: EntityType,
    pub entity_id: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Outcome of decoding one inbound text frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    DataChange(ChangeEvent),
    /// Well-formed JSON with some other `type`; not consumed here.
    Other(String),
}

impl InboundMessage {
    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_str(text)?;
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        if kind != DATA_CHANGE {
            return Ok(InboundMessage::Other(kind));
        }
        let message: DataChangeMessage = serde_json::from_value(value)?;
        Ok(InboundMessage::DataChange(message.into()))
    }
}

impl From<DataChangeMessage> for ChangeEvent {
    fn from(message: DataChangeMessage) -> Self {
        Self {
            entity_type: message.entity_type,
            change_type: message.change_type,
            entity_id: message.entity_id,
            payload: message.data,
            timestamp: message.timestamp,
            arrival_order: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decodes_data_change_envelope() {
        let text = json!({
            "type": "data_change",
            "change_type": "delete",
            "entity_type": "compensation_letter",
            "entity_id": "cl-9",
            "data": {"id": "cl-9"},
            "timestamp": "2026-01-02T03:04:05Z"
        })
        .to_string();

        let InboundMessage::DataChange(event) = InboundMessage::decode(&text).unwrap() else {
            panic!("expected data change");
        };
        assert_eq!(event.entity_type, EntityType::CompensationLetter);
        assert_eq!(event.change_type, ChangeType::Delete);
        assert_eq!(event.entity_id, "cl-9");
        assert!(event.timestamp.is_some());
        assert_eq!(event.describe(), "Compensation letter deleted");
    }

    #[test]
    fn test_other_message_types_are_passed_through_by_tag() {
        let decoded = InboundMessage::decode(r#"{"type":"pong"}"#).unwrap();
        assert_eq!(decoded, InboundMessage::Other("pong".into()));
    }

    #[test]
    fn test_malformed_data_change_is_an_error() {
        let decoded = InboundMessage::decode(r#"{"type":"data_change","entity_type":"invoice"}"#);
        assert!(decoded.is_err());
    }

    #[test]
    fn test_polling_fallback_event_is_a_client_update() {
        let event = ChangeEvent::polling_fallback(json!({}), Utc::now());
        assert_eq!(event.entity_type, EntityType::Client);
        assert_eq!(event.change_type, ChangeType::Update);
        assert!(event.is_polling_fallback());
    }
}
